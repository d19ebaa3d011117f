//! Document submission.
//!
//! A single file is submitted as-is; a directory is walked and every file
//! matching `[submit] include_globs` (and not `exclude_globs`) is
//! submitted. Files whose bytes were already submitted resolve to the
//! existing document instead of a new one.

use std::path::Path;

use anyhow::{bail, Context, Result};
use globset::{Glob, GlobSet, GlobSetBuilder};
use serde::Serialize;
use tracing::{debug, info};
use walkdir::WalkDir;

use docgraph_core::models::{content_hash, Document, NewDocument};
use docgraph_core::store::Store;

use crate::config::SubmitConfig;
use crate::extract::mime_for_path;

#[derive(Debug, Clone, Serialize)]
pub struct Submission {
    pub document: Document,
    /// `false` when identical bytes had been submitted before.
    pub created: bool,
}

/// Store `source` as a new document, or return the one with the same bytes.
pub async fn submit_document(store: &dyn Store, source: NewDocument) -> Result<Submission> {
    if source.bytes.is_empty() {
        bail!("{} is empty", source.filename);
    }
    if let Some(existing) = store.find_by_hash(&content_hash(&source.bytes)).await? {
        debug!(document_id = %existing.id, filename = %source.filename, "duplicate submission");
        return Ok(Submission {
            document: existing,
            created: false,
        });
    }
    let document = Document::new(&source);
    store.insert_document(&document, &source.bytes).await?;
    info!(document_id = %document.id, filename = %document.filename, bytes = document.size_bytes, "document submitted");
    Ok(Submission {
        document,
        created: true,
    })
}

/// Submit a file, or every matching file under a directory.
pub async fn submit_path(store: &dyn Store, config: &SubmitConfig, path: &Path) -> Result<Vec<Submission>> {
    if !path.exists() {
        bail!("path does not exist: {}", path.display());
    }
    if path.is_file() {
        return Ok(vec![submit_document(store, read_source(path)?).await?]);
    }

    let include = build_globset(&config.include_globs)?;
    let mut excludes = vec!["**/.git/**".to_string()];
    excludes.extend(config.exclude_globs.iter().cloned());
    let exclude = build_globset(&excludes)?;

    let mut files = Vec::new();
    for entry in WalkDir::new(path) {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }
        let relative = entry.path().strip_prefix(path).unwrap_or(entry.path());
        let rel_str = relative.to_string_lossy().to_string();
        if exclude.is_match(&rel_str) || !include.is_match(&rel_str) {
            continue;
        }
        files.push(entry.into_path());
    }
    files.sort();

    let mut submissions = Vec::new();
    for file in files {
        submissions.push(submit_document(store, read_source(&file)?).await?);
    }
    Ok(submissions)
}

fn read_source(path: &Path) -> Result<NewDocument> {
    let mime_type = mime_for_path(path)
        .with_context(|| format!("unsupported file type: {}", path.display()))?;
    let bytes = std::fs::read(path).with_context(|| format!("failed to read {}", path.display()))?;
    let filename = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| path.display().to_string());
    Ok(NewDocument {
        filename,
        mime_type: mime_type.to_string(),
        bytes,
    })
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern)?);
    }
    Ok(builder.build()?)
}
