//! In-process adapters for pipeline tests.

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use curator_ingestion::error::{SourceError, StageError};
use curator_ingestion::fetcher::ContentFetcher;
use curator_ingestion::models::{
    ContentHandle, IndexDocument, PaperUpsert, ParsedContent, ParserKind, Section, SourceRecord, StoredRecord,
};
use curator_ingestion::pdf_parser::ContentParser;
use curator_ingestion::pipeline::{PipelineOptions, RetryPolicy};
use curator_ingestion::repository::{InMemoryPaperStore, PaperStore};
use curator_ingestion::search::SearchIndexer;
use curator_ingestion::sources::{MetadataSource, SourceQuery};
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub fn record(id: &str) -> SourceRecord {
    SourceRecord {
        arxiv_id: id.to_string(),
        title: format!("Paper {id}"),
        authors: vec!["Ada Lovelace".to_string(), "Alan Turing".to_string()],
        abstract_text: format!("Abstract of {id}."),
        categories: ["cs.AI".to_string()].into_iter().collect(),
        published_date: Utc.with_ymd_and_hms(2024, 1, 2, 12, 0, 0).unwrap(),
        pdf_url: format!("https://arxiv.org/pdf/{id}"),
    }
}

pub fn records(ids: &[&str]) -> Vec<SourceRecord> {
    ids.iter().map(|id| record(id)).collect()
}

/// Default options with millisecond retry delays.
pub fn fast_options() -> PipelineOptions {
    PipelineOptions {
        retry: RetryPolicy { max_retries: 2, base_delay_ms: 1, max_delay_ms: 5 },
        ..Default::default()
    }
}

/// Tracks current and peak concurrent callers.
#[derive(Debug, Default)]
pub struct Gauge {
    current: AtomicUsize,
    peak: AtomicUsize,
}

impl Gauge {
    pub fn enter(&self) {
        let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
    }

    pub fn exit(&self) {
        self.current.fetch_sub(1, Ordering::SeqCst);
    }

    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    pub fn current(&self) -> usize {
        self.current.load(Ordering::SeqCst)
    }
}

/// Consume one pending transient failure for `id`.
fn take_transient(pending: &Mutex<HashMap<String, u32>>, id: &str) -> bool {
    let mut pending = pending.lock().unwrap();
    match pending.get_mut(id) {
        Some(left) if *left > 0 => {
            *left -= 1;
            true
        }
        _ => false,
    }
}

// ── Source ────────────────────────────────────────────────────────────────────

pub struct MockSource {
    records: Vec<SourceRecord>,
    fail: bool,
    pub calls: AtomicUsize,
    pub last_query: Mutex<Option<SourceQuery>>,
}

impl MockSource {
    pub fn new(records: Vec<SourceRecord>) -> Self {
        Self { records, fail: false, calls: AtomicUsize::new(0), last_query: Mutex::new(None) }
    }

    pub fn failing() -> Self {
        Self { fail: true, ..Self::new(Vec::new()) }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MetadataSource for MockSource {
    async fn fetch_records(&self, query: &SourceQuery) -> Result<Vec<SourceRecord>, SourceError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        *self.last_query.lock().unwrap() = Some(query.clone());
        if self.fail {
            return Err(SourceError::Status { status: 503 });
        }
        Ok(self.records.clone())
    }
}

// ── Fetcher ───────────────────────────────────────────────────────────────────

#[derive(Default)]
pub struct MockFetcher {
    /// Ids that always fail with a permanent error.
    failing: HashSet<String>,
    /// Ids that time out this many more times before succeeding.
    transient: Mutex<HashMap<String, u32>>,
    /// Per-id delay; ids not listed use `delay`.
    delays: HashMap<String, Duration>,
    delay: Duration,
    pub gauge: Gauge,
    pub calls: AtomicUsize,
    /// Fetches that started while `watched` had a parse running.
    watched: Option<Arc<MockParser>>,
    pub overlaps: AtomicUsize,
    /// Stored `pdf_processed` for each id at the moment its fetch began.
    store: Option<Arc<dyn PaperStore>>,
    pub rows_at_fetch: Mutex<Vec<(String, Option<bool>)>>,
}

impl MockFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing(mut self, id: &str) -> Self {
        self.failing.insert(id.to_string());
        self
    }

    pub fn transient(self, id: &str, times: u32) -> Self {
        self.transient.lock().unwrap().insert(id.to_string(), times);
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn with_delay_for(mut self, id: &str, delay: Duration) -> Self {
        self.delays.insert(id.to_string(), delay);
        self
    }

    pub fn watching(mut self, parser: Arc<MockParser>) -> Self {
        self.watched = Some(parser);
        self
    }

    pub fn observing_store(mut self, store: Arc<dyn PaperStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn overlaps(&self) -> usize {
        self.overlaps.load(Ordering::SeqCst)
    }

    pub fn rows_at_fetch(&self) -> Vec<(String, Option<bool>)> {
        let mut rows = self.rows_at_fetch.lock().unwrap().clone();
        rows.sort();
        rows
    }
}

#[async_trait]
impl ContentFetcher for MockFetcher {
    async fn fetch(&self, record: &SourceRecord, use_cache: bool) -> Result<ContentHandle, StageError> {
        if let Some(store) = &self.store {
            let row = store.get(&record.arxiv_id).await?.map(|r| r.pdf_processed);
            self.rows_at_fetch.lock().unwrap().push((record.arxiv_id.clone(), row));
        }
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.gauge.enter();
        if let Some(parser) = &self.watched {
            if parser.gauge.current() > 0 {
                self.overlaps.fetch_add(1, Ordering::SeqCst);
            }
        }
        let delay = self.delays.get(&record.arxiv_id).copied().unwrap_or(self.delay);
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        self.gauge.exit();

        if self.failing.contains(&record.arxiv_id) {
            return Err(StageError::Rejected("HTTP 404 Not Found".to_string()));
        }
        if take_transient(&self.transient, &record.arxiv_id) {
            return Err(StageError::Timeout);
        }
        Ok(ContentHandle {
            path: PathBuf::from(format!("/cache/{}.pdf", record.arxiv_id)),
            size_bytes: 1024,
            from_cache: use_cache,
        })
    }
}

// ── Parser ────────────────────────────────────────────────────────────────────

#[derive(Default)]
pub struct MockParser {
    fail_all: bool,
    empty: HashSet<String>,
    delay: Duration,
    /// Text length of every parse result.
    text_len: usize,
    pub gauge: Gauge,
}

impl MockParser {
    pub fn new() -> Self {
        Self { text_len: 32, ..Self::default() }
    }

    pub fn failing() -> Self {
        Self { fail_all: true, ..Self::new() }
    }

    pub fn empty_for(mut self, id: &str) -> Self {
        self.empty.insert(id.to_string());
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn with_text_len(mut self, len: usize) -> Self {
        self.text_len = len;
        self
    }
}

#[async_trait]
impl ContentParser for MockParser {
    async fn parse(&self, handle: &ContentHandle) -> Result<Option<ParsedContent>, StageError> {
        self.gauge.enter();
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.gauge.exit();

        if self.fail_all {
            return Err(StageError::Invalid("corrupt PDF".to_string()));
        }
        let id = handle
            .path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        if self.empty.contains(&id) {
            return Ok(None);
        }
        Ok(Some(ParsedContent {
            raw_text: "x".repeat(self.text_len),
            sections: vec![Section { title: "Introduction".to_string(), content: format!("Body of {id}") }],
            references: vec!["[1] Reference".to_string()],
            parser_used: ParserKind::Lopdf,
            parser_metadata: serde_json::json!({ "pages_total": 1 }),
            extracted_at: Utc::now(),
        }))
    }
}

// ── Store ─────────────────────────────────────────────────────────────────────

/// In-memory store that fails upserts for chosen ids.
#[derive(Default)]
pub struct FlakyStore {
    pub inner: InMemoryPaperStore,
    failing: HashSet<String>,
    /// Ids whose next N upserts fail transiently.
    transient: Mutex<HashMap<String, u32>>,
    pub upserts: AtomicUsize,
}

impl FlakyStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing(mut self, id: &str) -> Self {
        self.failing.insert(id.to_string());
        self
    }

    pub fn transient(self, id: &str, times: u32) -> Self {
        self.transient.lock().unwrap().insert(id.to_string(), times);
        self
    }
}

#[async_trait]
impl PaperStore for FlakyStore {
    async fn upsert(&self, upsert: &PaperUpsert<'_>) -> Result<StoredRecord, StageError> {
        self.upserts.fetch_add(1, Ordering::SeqCst);
        let id = &upsert.record.arxiv_id;
        if self.failing.contains(id) {
            return Err(StageError::Rejected("constraint violation".to_string()));
        }
        if take_transient(&self.transient, id) {
            return Err(StageError::Unavailable("pool timed out".to_string()));
        }
        self.inner.upsert(upsert).await
    }

    async fn get(&self, arxiv_id: &str) -> Result<Option<StoredRecord>, StageError> {
        self.inner.get(arxiv_id).await
    }

    async fn count(&self) -> Result<u64, StageError> {
        self.inner.count().await
    }
}

// ── Indexer ───────────────────────────────────────────────────────────────────

#[derive(Default)]
pub struct MockIndexer {
    rejected: HashSet<String>,
    pub docs: Mutex<Vec<IndexDocument>>,
}

impl MockIndexer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn rejecting(mut self, id: &str) -> Self {
        self.rejected.insert(id.to_string());
        self
    }

    pub fn doc(&self, id: &str) -> Option<IndexDocument> {
        self.docs.lock().unwrap().iter().find(|d| d.arxiv_id == id).cloned()
    }
}

#[async_trait]
impl SearchIndexer for MockIndexer {
    async fn index(&self, doc: &IndexDocument) -> Result<bool, StageError> {
        if self.rejected.contains(&doc.arxiv_id) {
            return Ok(false);
        }
        self.docs.lock().unwrap().push(doc.clone());
        Ok(true)
    }
}
