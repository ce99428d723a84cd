//! Content download interface.

use async_trait::async_trait;

use crate::error::StageError;
use crate::models::{ContentHandle, SourceRecord};

/// Retrieves a record's binary content into local storage.
///
/// Implementations enforce their own timeouts and log their own failures;
/// callers only see the tagged result.
#[async_trait]
pub trait ContentFetcher: Send + Sync {
    async fn fetch(&self, record: &SourceRecord, use_cache: bool) -> Result<ContentHandle, StageError>;
}

/// File name used for a record's cached PDF. Old-style identifiers such as
/// `hep-th/9901001v1` contain a slash.
pub fn cache_file_name(arxiv_id: &str) -> String {
    format!("{}.pdf", arxiv_id.replace('/', "_"))
}
