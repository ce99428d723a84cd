//! Paper metadata sources.

pub mod arxiv;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::SourceError;
use crate::models::{DateRange, SourceRecord};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SortField {
    #[serde(rename = "submittedDate")]
    SubmittedDate,
    #[serde(rename = "lastUpdatedDate")]
    LastUpdatedDate,
    #[serde(rename = "relevance")]
    Relevance,
}

impl SortField {
    pub fn as_str(&self) -> &'static str {
        match self {
            SortField::SubmittedDate   => "submittedDate",
            SortField::LastUpdatedDate => "lastUpdatedDate",
            SortField::Relevance       => "relevance",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    Ascending,
    Descending,
}

impl SortOrder {
    pub fn as_str(&self) -> &'static str {
        match self {
            SortOrder::Ascending  => "ascending",
            SortOrder::Descending => "descending",
        }
    }
}

/// One page request against a metadata source.
///
/// Dates are pre-formatted in the source's native `YYYYMMDD` format.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceQuery {
    pub max_results: usize,
    pub from_date: Option<String>,
    pub to_date: Option<String>,
    pub sort_by: SortField,
    pub sort_order: SortOrder,
}

impl SourceQuery {
    /// Newest-first query covering `range`.
    pub fn for_range(range: &DateRange, max_results: usize) -> Self {
        Self {
            max_results,
            from_date: Some(range.source_from()),
            to_date: Some(range.source_to()),
            sort_by: SortField::SubmittedDate,
            sort_order: SortOrder::Descending,
        }
    }
}

/// Common interface for paper metadata sources.
#[async_trait]
pub trait MetadataSource: Send + Sync {
    /// Fetch one page of records. Any error here is fatal to the run.
    async fn fetch_records(&self, query: &SourceQuery) -> Result<Vec<SourceRecord>, SourceError>;
}
