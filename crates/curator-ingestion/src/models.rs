//! Data models for the ingestion pipeline.
//!
//! One type per stage boundary: the source yields [`SourceRecord`]s, the
//! parser yields [`ParsedContent`], the store accepts a [`PaperUpsert`] and
//! returns a [`StoredRecord`], and the search index receives an
//! [`IndexDocument`].

use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::path::PathBuf;
use uuid::Uuid;

/// One paper's metadata as returned by the source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceRecord {
    pub arxiv_id: String,
    pub title: String,
    pub authors: Vec<String>,
    pub abstract_text: String,
    pub categories: BTreeSet<String>,
    pub published_date: DateTime<Utc>,
    pub pdf_url: String,
}

/// Local handle to downloaded content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentHandle {
    pub path: PathBuf,
    pub size_bytes: u64,
    /// True when the file was already present in the cache.
    pub from_cache: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Section {
    pub title: String,
    pub content: String,
}

/// Which parser produced a [`ParsedContent`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParserKind {
    Lopdf,
}

impl ParserKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ParserKind::Lopdf => "lopdf",
        }
    }
}

/// Structured text extracted from a PDF.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParsedContent {
    pub raw_text: String,
    pub sections: Vec<Section>,
    pub references: Vec<String>,
    pub parser_used: ParserKind,
    pub parser_metadata: serde_json::Value,
    pub extracted_at: DateTime<Utc>,
}

/// Input to [`crate::repository::PaperStore::upsert`].
///
/// `content == None` is a metadata-only write; it never clears parsed
/// content already stored for the same identifier.
#[derive(Debug, Clone, Copy)]
pub struct PaperUpsert<'a> {
    pub record: &'a SourceRecord,
    pub content: Option<&'a ParsedContent>,
}

impl<'a> PaperUpsert<'a> {
    pub fn metadata_only(record: &'a SourceRecord) -> Self {
        Self { record, content: None }
    }

    pub fn with_content(record: &'a SourceRecord, content: &'a ParsedContent) -> Self {
        Self { record, content: Some(content) }
    }
}

/// A persisted paper row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredRecord {
    pub id: Uuid,
    pub arxiv_id: String,
    pub title: String,
    pub authors: Vec<String>,
    pub abstract_text: String,
    pub categories: Vec<String>,
    pub published_date: DateTime<Utc>,
    pub pdf_url: String,

    pub raw_text: Option<String>,
    pub sections: Option<Vec<Section>>,
    pub references: Option<Vec<String>>,
    pub parser_used: Option<String>,
    pub parser_metadata: serde_json::Value,
    pub pdf_processed: bool,
    pub pdf_processing_date: Option<DateTime<Utc>>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl StoredRecord {
    /// Build a fresh row for an identifier seen for the first time.
    pub fn new(upsert: &PaperUpsert<'_>, now: DateTime<Utc>) -> Self {
        let record = upsert.record;
        let mut stored = Self {
            id: Uuid::new_v4(),
            arxiv_id: record.arxiv_id.clone(),
            title: record.title.clone(),
            authors: record.authors.clone(),
            abstract_text: record.abstract_text.clone(),
            categories: record.categories.iter().cloned().collect(),
            published_date: record.published_date,
            pdf_url: record.pdf_url.clone(),
            raw_text: None,
            sections: None,
            references: None,
            parser_used: None,
            parser_metadata: unprocessed_note(),
            pdf_processed: false,
            pdf_processing_date: None,
            created_at: now,
            updated_at: now,
        };
        if let Some(content) = upsert.content {
            stored.apply_content(content, now);
        }
        stored
    }

    /// Merge an upsert into an existing row.
    ///
    /// Existing metadata is kept; parsed content replaces the stored content
    /// when present and is otherwise left untouched.
    pub fn merge(&mut self, upsert: &PaperUpsert<'_>, now: DateTime<Utc>) {
        if let Some(content) = upsert.content {
            self.apply_content(content, now);
        }
        self.updated_at = now;
    }

    fn apply_content(&mut self, content: &ParsedContent, now: DateTime<Utc>) {
        self.raw_text = Some(content.raw_text.clone());
        self.sections = Some(content.sections.clone());
        self.references = Some(content.references.clone());
        self.parser_used = Some(content.parser_used.as_str().to_string());
        self.parser_metadata = content.parser_metadata.clone();
        self.pdf_processed = true;
        self.pdf_processing_date = Some(now);
    }

    /// `pdf_processed` is set exactly when the parsed-content columns are.
    pub fn is_consistent(&self) -> bool {
        let has_content = self.raw_text.is_some() && self.sections.is_some() && self.references.is_some();
        self.pdf_processed == has_content
    }
}

/// Parser metadata recorded for metadata-only rows.
pub fn unprocessed_note() -> serde_json::Value {
    serde_json::json!({ "note": "PDF not processed" })
}

/// Flattened search document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexDocument {
    pub arxiv_id: String,
    pub title: String,
    /// Authors joined with ", ".
    pub authors: String,
    #[serde(rename = "abstract")]
    pub abstract_text: String,
    pub categories: Vec<String>,
    pub pdf_url: String,
    /// RFC 3339 timestamp.
    pub published_date: String,
    /// PDF text truncated to the configured number of characters; empty when
    /// the paper has no parsed content.
    pub raw_text: String,
}

impl IndexDocument {
    pub fn from_record(record: &SourceRecord, content: Option<&ParsedContent>, max_text_chars: usize) -> Self {
        let raw_text = content
            .map(|c| truncate_chars(&c.raw_text, max_text_chars))
            .unwrap_or_default();

        Self {
            arxiv_id: record.arxiv_id.clone(),
            title: record.title.clone(),
            authors: record.authors.join(", "),
            abstract_text: record.abstract_text.clone(),
            categories: record.categories.iter().cloned().collect(),
            pdf_url: record.pdf_url.clone(),
            published_date: record.published_date.to_rfc3339(),
            raw_text,
        }
    }
}

/// First `max_chars` characters of `text`, never splitting a code point.
pub fn truncate_chars(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((byte_idx, _)) => text[..byte_idx].to_string(),
        None => text.to_string(),
    }
}

/// Inclusive range of submission dates a run targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateRange {
    pub from: NaiveDate,
    pub to: NaiveDate,
}

impl DateRange {
    /// Returns `None` when `from` is after `to`.
    pub fn new(from: NaiveDate, to: NaiveDate) -> Option<Self> {
        (from <= to).then_some(Self { from, to })
    }

    pub fn single_day(day: NaiveDate) -> Self {
        Self { from: day, to: day }
    }

    /// The day before `logical_date`, which is what a daily job ingests.
    pub fn day_before(logical_date: NaiveDate) -> Self {
        Self::single_day(logical_date - Duration::days(1))
    }

    /// `from` in the source's `YYYYMMDD` format.
    pub fn source_from(&self) -> String {
        self.from.format("%Y%m%d").to_string()
    }

    /// `to` in the source's `YYYYMMDD` format.
    pub fn source_to(&self) -> String {
        self.to.format("%Y%m%d").to_string()
    }
}

impl fmt::Display for DateRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.from == self.to {
            write!(f, "{}", self.from)
        } else {
            write!(f, "{}..{}", self.from, self.to)
        }
    }
}
