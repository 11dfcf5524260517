use std::fs;
use std::io::{self, Write};
use std::path::Path;

use chrono::{SecondsFormat, Utc};
use serde::Serialize;
use thiserror::Error;

use crate::config::FeedMode;
use crate::feed::FeedCounters;
use crate::graph::{GraphStats, TagGraph};

#[derive(Debug, Error)]
pub enum ReportError {
    #[error("failed to write report {path}: {error}")]
    Io {
        path: String,
        #[source]
        error: io::Error,
    },
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Serialize)]
pub struct FeedReport {
    pub path: String,
    pub mode: &'static str,
    pub sha256: String,
    #[serde(flatten)]
    pub counters: FeedCounters,
}

impl FeedReport {
    pub fn new(path: &Path, mode: FeedMode, sha256: String, counters: FeedCounters) -> Self {
        Self {
            path: path.display().to_string(),
            mode: mode.as_str(),
            sha256,
            counters,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub generated_at: String,
    pub delete_policy: &'static str,
    pub feeds: Vec<FeedReport>,
    pub stats: GraphStats,
}

impl RunReport {
    pub fn new(graph: &TagGraph, feeds: Vec<FeedReport>) -> Self {
        Self {
            generated_at: Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
            delete_policy: graph.policy().as_str(),
            feeds,
            stats: graph.stats(),
        }
    }
}

/// Writes the report so readers never observe a half-written file: the JSON
/// goes to a temp file beside `path`, is synced, then renamed over it.
pub fn write_report(path: &Path, report: &RunReport) -> Result<(), ReportError> {
    let io_err = |error: io::Error| ReportError::Io {
        path: path.display().to_string(),
        error,
    };
    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    fs::create_dir_all(parent).map_err(io_err)?;

    let rendered = serde_json::to_vec_pretty(report)?;
    let mut tmp = tempfile::Builder::new()
        .prefix(".hashgraph-report.")
        .tempfile_in(parent)
        .map_err(io_err)?;
    tmp.write_all(&rendered).map_err(io_err)?;
    tmp.write_all(b"\n").map_err(io_err)?;
    tmp.as_file().sync_all().map_err(io_err)?;
    tmp.persist(path).map_err(|err| io_err(err.error))?;
    Ok(())
}
