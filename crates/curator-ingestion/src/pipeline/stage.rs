use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::StageError;

/// Per-record pipeline stages, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Fetch,
    Parse,
    Persist,
    Index,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Fetch   => "fetch",
            Stage::Parse   => "parse",
            Stage::Persist => "persist",
            Stage::Index   => "index",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StageStatus {
    #[default]
    Skipped,
    Succeeded,
    Failed,
}

/// Outcome of every stage for one record.
#[derive(Debug, Clone, PartialEq)]
pub struct StageResult {
    /// Position of the record in the source batch.
    pub index: usize,
    pub arxiv_id: String,
    pub fetch: StageStatus,
    pub parse: StageStatus,
    pub persist: StageStatus,
    pub index_status: StageStatus,
    /// At most one error per stage, in the order they happened.
    pub errors: Vec<(Stage, StageError)>,
    /// Some write of this record was committed during the run.
    pub durable: bool,
}

impl StageResult {
    pub fn new(index: usize, arxiv_id: impl Into<String>) -> Self {
        Self {
            index,
            arxiv_id: arxiv_id.into(),
            fetch: StageStatus::Skipped,
            parse: StageStatus::Skipped,
            persist: StageStatus::Skipped,
            index_status: StageStatus::Skipped,
            errors: Vec::new(),
            durable: false,
        }
    }

    pub fn status(&self, stage: Stage) -> StageStatus {
        match stage {
            Stage::Fetch   => self.fetch,
            Stage::Parse   => self.parse,
            Stage::Persist => self.persist,
            Stage::Index   => self.index_status,
        }
    }

    fn status_mut(&mut self, stage: Stage) -> &mut StageStatus {
        match stage {
            Stage::Fetch   => &mut self.fetch,
            Stage::Parse   => &mut self.parse,
            Stage::Persist => &mut self.persist,
            Stage::Index   => &mut self.index_status,
        }
    }

    /// Mark a stage succeeded. A stage that already failed stays failed.
    pub fn succeed(&mut self, stage: Stage) {
        let status = self.status_mut(stage);
        if *status != StageStatus::Failed {
            *status = StageStatus::Succeeded;
        }
    }

    /// Mark a stage failed. Only the first error of a stage is kept.
    pub fn fail(&mut self, stage: Stage, error: StageError) {
        let status = self.status_mut(stage);
        if *status == StageStatus::Failed {
            return;
        }
        *status = StageStatus::Failed;
        self.errors.push((stage, error));
    }

    /// Errors sorted by stage order.
    pub fn errors_by_stage(&self) -> Vec<&(Stage, StageError)> {
        let mut errors: Vec<_> = self.errors.iter().collect();
        errors.sort_by_key(|(stage, _)| *stage);
        errors
    }
}
