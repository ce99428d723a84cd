use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use uuid::Uuid;

use super::stage::{Stage, StageResult, StageStatus};
use crate::models::DateRange;

// ── Progress events ───────────────────────────────────────────────────────────

/// Progress event emitted during a run (cloneable for broadcast).
#[derive(Debug, Clone, Serialize)]
pub struct IngestionProgress {
    pub run_id: Uuid,
    /// `started`, `record` or `finished`.
    pub phase: String,
    pub message: String,
    pub papers_fetched: usize,
    pub papers_done: usize,
    pub error: Option<String>,
}

impl IngestionProgress {
    pub(crate) fn new(run_id: Uuid, phase: &str, message: impl Into<String>) -> Self {
        Self {
            run_id,
            phase: phase.to_string(),
            message: message.into(),
            papers_fetched: 0,
            papers_done: 0,
            error: None,
        }
    }
}

// ── Report ────────────────────────────────────────────────────────────────────

/// One failed stage of one record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageFailure {
    pub arxiv_id: String,
    pub stage: Stage,
    pub reason: String,
    pub retryable: bool,
}

/// Aggregate outcome of a run. Immutable once returned.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IngestionReport {
    pub run_id: Uuid,
    pub date_range: DateRange,
    pub papers_fetched: usize,
    pub pdfs_downloaded: usize,
    pub pdfs_parsed: usize,
    /// Records with at least one committed write.
    pub papers_stored: usize,
    pub papers_indexed: usize,
    /// `"<stage> failed: <arxiv_id>"`, ordered by source position then stage.
    pub errors: Vec<String>,
    /// Same order as `errors`, with the cause.
    pub failures: Vec<StageFailure>,
    /// Wall-clock seconds.
    pub processing_time: f64,
    pub peak_concurrent_fetches: usize,
    pub peak_concurrent_parses: usize,
    pub started_at: DateTime<Utc>,
}

impl IngestionReport {
    pub fn is_clean(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Folds per-record results into a report. Owned by the single consumer of
/// the record stream.
#[derive(Debug)]
pub struct ReportBuilder {
    run_id: Uuid,
    date_range: DateRange,
    started_at: DateTime<Utc>,
    papers_fetched: usize,
    results: Vec<StageResult>,
}

impl ReportBuilder {
    pub fn new(run_id: Uuid, date_range: DateRange) -> Self {
        Self { run_id, date_range, started_at: Utc::now(), papers_fetched: 0, results: Vec::new() }
    }

    pub fn set_fetched(&mut self, n: usize) {
        self.papers_fetched = n;
        self.results.reserve(n);
    }

    pub fn record(&mut self, result: StageResult) {
        self.results.push(result);
    }

    pub fn completed(&self) -> usize {
        self.results.len()
    }

    pub fn finish(mut self, elapsed: Duration, peak_fetches: usize, peak_parses: usize) -> IngestionReport {
        self.results.sort_by_key(|r| r.index);

        let count = |stage: Stage| {
            self.results.iter().filter(|r| r.status(stage) == StageStatus::Succeeded).count()
        };

        let mut errors = Vec::new();
        let mut failures = Vec::new();
        for result in &self.results {
            for (stage, error) in result.errors_by_stage() {
                errors.push(format!("{stage} failed: {}", result.arxiv_id));
                failures.push(StageFailure {
                    arxiv_id: result.arxiv_id.clone(),
                    stage: *stage,
                    reason: error.to_string(),
                    retryable: error.is_retryable(),
                });
            }
        }

        IngestionReport {
            run_id: self.run_id,
            date_range: self.date_range,
            papers_fetched: self.papers_fetched,
            pdfs_downloaded: count(Stage::Fetch),
            pdfs_parsed: count(Stage::Parse),
            papers_stored: self.results.iter().filter(|r| r.durable).count(),
            papers_indexed: count(Stage::Index),
            errors,
            failures,
            processing_time: elapsed.as_secs_f64(),
            peak_concurrent_fetches: peak_fetches,
            peak_concurrent_parses: peak_parses,
            started_at: self.started_at,
        }
    }
}
