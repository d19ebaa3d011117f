//! Per-stage pipeline metrics.
//!
//! The orchestrator reports one [`StageSample`] per stage execution to a
//! [`MetricsRecorder`]. [`InMemoryMetrics`] aggregates samples for the
//! `stats` command and tests; [`NoopMetrics`] discards them.

use std::collections::BTreeMap;
use std::sync::Mutex;
use std::time::Duration;

use serde::Serialize;

use crate::models::Stage;

/// One stage execution.
#[derive(Debug, Clone, PartialEq)]
pub struct StageSample {
    pub stage: Stage,
    pub document_id: String,
    pub duration: Duration,
    pub success: bool,
}

/// Aggregated counters for one stage.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct StageStats {
    pub successes: u64,
    pub failures: u64,
    pub total_ms: u64,
    pub max_ms: u64,
}

impl StageStats {
    pub fn count(&self) -> u64 {
        self.successes + self.failures
    }

    pub fn mean_ms(&self) -> f64 {
        if self.count() == 0 {
            0.0
        } else {
            self.total_ms as f64 / self.count() as f64
        }
    }
}

pub trait MetricsRecorder: Send + Sync {
    fn record(&self, sample: StageSample);
}

#[derive(Debug, Default)]
pub struct NoopMetrics;

impl MetricsRecorder for NoopMetrics {
    fn record(&self, _sample: StageSample) {}
}

#[derive(Debug, Default)]
pub struct InMemoryMetrics {
    stages: Mutex<BTreeMap<Stage, StageStats>>,
}

impl InMemoryMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of the current per-stage counters, in stage order.
    pub fn snapshot(&self) -> BTreeMap<Stage, StageStats> {
        match self.stages.lock() {
            Ok(stages) => stages.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

impl MetricsRecorder for InMemoryMetrics {
    fn record(&self, sample: StageSample) {
        let mut stages = match self.stages.lock() {
            Ok(stages) => stages,
            Err(poisoned) => poisoned.into_inner(),
        };
        let stats = stages.entry(sample.stage).or_default();
        let ms = sample.duration.as_millis() as u64;
        if sample.success {
            stats.successes += 1;
        } else {
            stats.failures += 1;
        }
        stats.total_ms += ms;
        stats.max_ms = stats.max_ms.max(ms);
    }
}
