//! Search indexing.

pub mod index_config;
pub mod opensearch;

use async_trait::async_trait;

use crate::error::StageError;
use crate::models::IndexDocument;

/// Writes flattened paper documents to a search index.
#[async_trait]
pub trait SearchIndexer: Send + Sync {
    /// `Ok(true)` when the index accepted the document, `Ok(false)` when it
    /// answered but did not create or update it.
    async fn index(&self, doc: &IndexDocument) -> Result<bool, StageError>;
}
