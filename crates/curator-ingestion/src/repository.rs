//! Paper persistence interface and an in-process store.
//!
//! Stores upsert by arXiv identifier. A metadata-only upsert never clears
//! parsed content already stored for the same paper.

use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use tokio::sync::Mutex;

use crate::error::StageError;
use crate::models::{PaperUpsert, StoredRecord};

#[async_trait]
pub trait PaperStore: Send + Sync {
    /// Insert or update the paper keyed by `upsert.record.arxiv_id`. The
    /// write is committed before this returns.
    async fn upsert(&self, upsert: &PaperUpsert<'_>) -> Result<StoredRecord, StageError>;

    async fn get(&self, arxiv_id: &str) -> Result<Option<StoredRecord>, StageError>;

    async fn count(&self) -> Result<u64, StageError>;
}

/// Store backed by a map, for tests and dry runs.
#[derive(Debug, Default)]
pub struct InMemoryPaperStore {
    rows: Mutex<HashMap<String, StoredRecord>>,
}

impl InMemoryPaperStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of every row, ordered by identifier.
    pub async fn all(&self) -> Vec<StoredRecord> {
        let rows = self.rows.lock().await;
        let mut all: Vec<StoredRecord> = rows.values().cloned().collect();
        all.sort_by(|a, b| a.arxiv_id.cmp(&b.arxiv_id));
        all
    }
}

#[async_trait]
impl PaperStore for InMemoryPaperStore {
    async fn upsert(&self, upsert: &PaperUpsert<'_>) -> Result<StoredRecord, StageError> {
        let now = Utc::now();
        let mut rows = self.rows.lock().await;
        let row = rows
            .entry(upsert.record.arxiv_id.clone())
            .and_modify(|existing| existing.merge(upsert, now))
            .or_insert_with(|| StoredRecord::new(upsert, now));
        Ok(row.clone())
    }

    async fn get(&self, arxiv_id: &str) -> Result<Option<StoredRecord>, StageError> {
        Ok(self.rows.lock().await.get(arxiv_id).cloned())
    }

    async fn count(&self) -> Result<u64, StageError> {
        Ok(self.rows.lock().await.len() as u64)
    }
}
