//! Pipeline statistics.
//!
//! `docgraph stats` summarizes the store: documents per status, segment
//! progress, and the nodes and relationships created so far. After a
//! `process` run the CLI also prints the per-stage timings collected by
//! [`InMemoryMetrics`](docgraph_core::metrics::InMemoryMetrics).

use std::collections::BTreeMap;

use anyhow::Result;

use docgraph_core::metrics::StageStats;
use docgraph_core::models::Stage;
use docgraph_core::store::{Store, StoreStats};

use crate::config::Config;

/// Run the stats command: read the store and print a summary.
pub async fn run_stats(config: &Config, store: &dyn Store) -> Result<()> {
    let stats = store.stats().await?;
    let db_size = std::fs::metadata(&config.db.path)
        .map(|m| m.len())
        .unwrap_or(0);

    println!("docgraph pipeline stats");
    println!("=======================");
    println!();
    println!("  Database:    {}", config.db.path.display());
    println!("  Size:        {}", format_bytes(db_size));
    println!();
    print!("{}", format_store_stats(&stats));
    println!();
    Ok(())
}

pub fn format_store_stats(stats: &StoreStats) -> String {
    let mut out = String::new();
    out.push_str(&format!("  Documents:   {}\n", stats.total_documents));
    for (status, count) in &stats.documents_by_status {
        out.push_str(&format!("    {:<22} {:>6}\n", status, count));
    }
    out.push_str(&format!(
        "  Segments:    {} ingested / {}\n",
        stats.segments_ingested, stats.total_segments
    ));
    out.push_str(&format!(
        "  Results:     {} executed / {}\n",
        stats.results_executed, stats.total_results
    ));
    out.push_str(&format!("  Nodes created:          {}\n", stats.nodes_created));
    out.push_str(&format!(
        "  Relationships created:  {}\n",
        stats.relationships_created
    ));
    out
}

/// Per-stage table for metrics gathered during this process.
pub fn format_stage_metrics(stages: &BTreeMap<Stage, StageStats>) -> String {
    if stages.is_empty() {
        return String::new();
    }
    let mut out = format!(
        "  {:<16} {:>6} {:>6} {:>10} {:>10}\n",
        "STAGE", "OK", "FAILED", "MEAN MS", "MAX MS"
    );
    out.push_str(&format!("  {}\n", "-".repeat(52)));
    for (stage, s) in stages {
        out.push_str(&format!(
            "  {:<16} {:>6} {:>6} {:>10.1} {:>10}\n",
            stage.as_str(),
            s.successes,
            s.failures,
            s.mean_ms(),
            s.max_ms
        ));
    }
    out
}

/// Format a byte count as a human-readable string.
fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else if bytes < 1024 * 1024 * 1024 {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    } else {
        format!("{:.2} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    }
}

/// Format a Unix timestamp as a relative time string (e.g. "3 hours ago").
pub fn format_ts_relative(ts: i64) -> String {
    let now = chrono::Utc::now().timestamp();
    let delta = now - ts;

    if delta < 0 {
        return format_ts_iso(ts);
    }

    if delta < 60 {
        "just now".to_string()
    } else if delta < 3600 {
        let mins = delta / 60;
        format!("{} min{} ago", mins, if mins == 1 { "" } else { "s" })
    } else if delta < 86400 {
        let hours = delta / 3600;
        format!("{} hour{} ago", hours, if hours == 1 { "" } else { "s" })
    } else if delta < 86400 * 30 {
        let days = delta / 86400;
        format!("{} day{} ago", days, if days == 1 { "" } else { "s" })
    } else {
        format_ts_iso(ts)
    }
}

fn format_ts_iso(ts: i64) -> String {
    chrono::DateTime::from_timestamp(ts, 0)
        .map(|dt| dt.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| ts.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(512), "512 B");
        assert_eq!(format_bytes(2048), "2.0 KB");
        assert_eq!(format_bytes(5 * 1024 * 1024), "5.0 MB");
    }

    #[test]
    fn test_store_stats_lists_statuses() {
        let stats = StoreStats {
            documents_by_status: vec![("completed".into(), 2), ("error".into(), 1)],
            total_documents: 3,
            total_segments: 4,
            segments_ingested: 3,
            total_results: 4,
            results_executed: 3,
            nodes_created: 12,
            relationships_created: 7,
        };
        let text = format_store_stats(&stats);
        assert!(text.contains("Documents:   3"));
        assert!(text.contains("completed"));
        assert!(text.contains("3 ingested / 4"));
        assert!(text.contains("Relationships created:  7"));
    }

    #[test]
    fn test_stage_metrics_table() {
        let mut stages = BTreeMap::new();
        stages.insert(
            Stage::Ingest,
            StageStats {
                successes: 1,
                failures: 1,
                total_ms: 30,
                max_ms: 20,
            },
        );
        let text = format_stage_metrics(&stages);
        assert!(text.contains("ingest"));
        assert!(text.contains("15.0"));
        assert_eq!(format_stage_metrics(&BTreeMap::new()), "");
    }

    #[test]
    fn test_relative_timestamps() {
        let now = chrono::Utc::now().timestamp();
        assert_eq!(format_ts_relative(now), "just now");
        assert_eq!(format_ts_relative(now - 7200), "2 hours ago");
    }
}
