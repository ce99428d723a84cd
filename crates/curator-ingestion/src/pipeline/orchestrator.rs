use futures::stream::{self, StreamExt};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::broadcast;
use tracing::{debug, error, info, info_span, instrument, warn, Instrument};
use uuid::Uuid;

use super::limiter::StageLimiter;
use super::options::{PersistOrder, PipelineOptions};
use super::report::{IngestionProgress, IngestionReport, ReportBuilder};
use super::stage::{Stage, StageResult};
use crate::error::{PipelineError, StageError};
use crate::fetcher::ContentFetcher;
use crate::models::{ContentHandle, DateRange, IndexDocument, PaperUpsert, ParsedContent, SourceRecord};
use crate::pdf_parser::ContentParser;
use crate::repository::PaperStore;
use crate::search::SearchIndexer;
use crate::sources::{MetadataSource, SourceQuery};

/// Drives records from a metadata source through fetch, parse, persist and
/// index. Adapters are injected; the pipeline holds no other state between
/// runs.
#[derive(Clone)]
pub struct IngestionPipeline {
    source: Arc<dyn MetadataSource>,
    fetcher: Arc<dyn ContentFetcher>,
    parser: Arc<dyn ContentParser>,
    store: Option<Arc<dyn PaperStore>>,
    indexer: Option<Arc<dyn SearchIndexer>>,
    progress_tx: Option<broadcast::Sender<IngestionProgress>>,
}

impl IngestionPipeline {
    pub fn new(
        source: Arc<dyn MetadataSource>,
        fetcher: Arc<dyn ContentFetcher>,
        parser: Arc<dyn ContentParser>,
    ) -> Self {
        Self { source, fetcher, parser, store: None, indexer: None, progress_tx: None }
    }

    pub fn with_store(mut self, store: Arc<dyn PaperStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn with_indexer(mut self, indexer: Arc<dyn SearchIndexer>) -> Self {
        self.indexer = Some(indexer);
        self
    }

    /// Progress events are sent here if provided. Send errors (no
    /// subscribers) are ignored.
    pub fn with_progress(mut self, tx: broadcast::Sender<IngestionProgress>) -> Self {
        self.progress_tx = Some(tx);
        self
    }

    fn emit(&self, progress: IngestionProgress) {
        if let Some(ref tx) = self.progress_tx {
            let _ = tx.send(progress);
        }
    }

    /// Run the pipeline for one date range.
    ///
    /// Fails only when the options are unusable or the metadata source
    /// fails; every per-record failure ends up in the report instead.
    #[instrument(skip_all, fields(range = %range))]
    pub async fn run(&self, range: &DateRange, options: &PipelineOptions) -> Result<IngestionReport, PipelineError> {
        options.validate()?;
        if options.persist && self.store.is_none() {
            return Err(PipelineError::MissingStore);
        }
        if options.index && self.indexer.is_none() {
            return Err(PipelineError::MissingIndexer);
        }

        let run_id = Uuid::new_v4();
        let t0 = Instant::now();
        let mut builder = ReportBuilder::new(run_id, *range);
        info!(%run_id, fetch = options.fetch_content, persist = options.persist, index = options.index, "Starting ingestion run");
        self.emit(IngestionProgress::new(run_id, "started", format!("Fetching records for {range}")));

        let query = SourceQuery::for_range(range, options.max_results);
        let records = match self.source.fetch_records(&query).await {
            Ok(records) => records,
            Err(e) => {
                error!(%run_id, error = %e, "Metadata source failed");
                let mut progress = IngestionProgress::new(run_id, "finished", "Run aborted");
                progress.error = Some(e.to_string());
                self.emit(progress);
                return Err(e.into());
            }
        };
        let total = records.len();
        builder.set_fetched(total);
        info!(%run_id, papers = total, "Fetched records");

        let fetch_limiter = StageLimiter::new(Stage::Fetch, options.max_concurrent_fetches);
        let parse_limiter = StageLimiter::new(Stage::Parse, options.max_concurrent_parses);
        let worker = &RecordWorker {
            pipeline: self,
            options,
            fetch_limiter: &fetch_limiter,
            parse_limiter: &parse_limiter,
        };

        let mut results = stream::iter(records.into_iter().enumerate())
            .map(move |(index, record)| {
                let span = info_span!("record", arxiv_id = %record.arxiv_id);
                worker.process(index, record).instrument(span)
            })
            .buffer_unordered(options.in_flight_limit());

        while let Some(result) = results.next().await {
            let mut progress = IngestionProgress::new(run_id, "record", format!("Processed {}", result.arxiv_id));
            progress.papers_fetched = total;
            progress.error = result.errors.first().map(|(stage, _)| format!("{stage} failed: {}", result.arxiv_id));
            builder.record(result);
            progress.papers_done = builder.completed();
            self.emit(progress);
        }

        let report = builder.finish(t0.elapsed(), fetch_limiter.peak(), parse_limiter.peak());
        info!(
            %run_id,
            fetched = report.papers_fetched,
            downloaded = report.pdfs_downloaded,
            parsed = report.pdfs_parsed,
            stored = report.papers_stored,
            indexed = report.papers_indexed,
            errors = report.errors.len(),
            secs = report.processing_time,
            "Ingestion run complete"
        );

        let mut progress = IngestionProgress::new(run_id, "finished", "Ingestion run complete");
        progress.papers_fetched = report.papers_fetched;
        progress.papers_done = total;
        self.emit(progress);

        Ok(report)
    }
}

/// Per-run context shared by every record future.
struct RecordWorker<'a> {
    pipeline: &'a IngestionPipeline,
    options: &'a PipelineOptions,
    fetch_limiter: &'a StageLimiter,
    parse_limiter: &'a StageLimiter,
}

impl RecordWorker<'_> {
    async fn process(&self, index: usize, record: SourceRecord) -> StageResult {
        let mut result = StageResult::new(index, &record.arxiv_id);
        let metadata_first = self.options.persist_order == PersistOrder::MetadataFirst;

        if self.options.persist && metadata_first {
            self.persist(&mut result, PaperUpsert::metadata_only(&record)).await;
        }

        let mut content: Option<ParsedContent> = None;
        if self.options.fetch_content {
            match self.fetch(&record).await {
                Ok(handle) => {
                    result.succeed(Stage::Fetch);
                    match self.parse(&handle).await {
                        Ok(Some(parsed)) => {
                            result.succeed(Stage::Parse);
                            content = Some(parsed);
                        }
                        Ok(None) => record_failure(&mut result, Stage::Parse, StageError::Empty),
                        Err(e) => record_failure(&mut result, Stage::Parse, e),
                    }
                }
                Err(e) => record_failure(&mut result, Stage::Fetch, e),
            }
        }

        if self.options.persist {
            match (metadata_first, content.as_ref()) {
                (true, Some(parsed)) => {
                    self.persist(&mut result, PaperUpsert::with_content(&record, parsed)).await;
                }
                (true, None) => {}
                (false, parsed) => {
                    self.persist(&mut result, PaperUpsert { record: &record, content: parsed }).await;
                }
            }
        }

        if self.options.index {
            let doc = IndexDocument::from_record(&record, content.as_ref(), self.options.max_index_text_chars);
            match self.index(&doc).await {
                Ok(true) => result.succeed(Stage::Index),
                Ok(false) => record_failure(
                    &mut result,
                    Stage::Index,
                    StageError::Rejected("document was not created or updated".to_string()),
                ),
                Err(e) => record_failure(&mut result, Stage::Index, e),
            }
        }

        debug!(
            fetch = ?result.fetch,
            parse = ?result.parse,
            persist = ?result.persist,
            index = ?result.index_status,
            durable = result.durable,
            "Record finished"
        );
        result
    }

    async fn fetch(&self, record: &SourceRecord) -> Result<ContentHandle, StageError> {
        let fetcher = &*self.pipeline.fetcher;
        let limiter = self.fetch_limiter;
        let use_cache = self.options.use_cache;
        self.options
            .retry
            .run(Stage::Fetch, &record.arxiv_id, move || async move {
                let _slot = limiter.acquire().await?;
                fetcher.fetch(record, use_cache).await
            })
            .await
    }

    async fn parse(&self, handle: &ContentHandle) -> Result<Option<ParsedContent>, StageError> {
        let slot = self.parse_limiter.acquire().await?;
        self.pipeline.parser.parse_in_slot(handle, slot).await
    }

    async fn persist(&self, result: &mut StageResult, upsert: PaperUpsert<'_>) {
        let Some(store) = self.pipeline.store.as_deref() else {
            return;
        };
        let outcome = self
            .options
            .retry
            .run(Stage::Persist, &upsert.record.arxiv_id, move || async move { store.upsert(&upsert).await })
            .await;
        match outcome {
            Ok(row) => {
                result.durable = true;
                result.succeed(Stage::Persist);
                debug!(processed = row.pdf_processed, "Paper stored");
            }
            Err(e) => record_failure(result, Stage::Persist, e),
        }
    }

    async fn index(&self, doc: &IndexDocument) -> Result<bool, StageError> {
        let Some(indexer) = self.pipeline.indexer.as_deref() else {
            return Err(StageError::Rejected("no search indexer configured".to_string()));
        };
        self.options
            .retry
            .run(Stage::Index, &doc.arxiv_id, move || async move { indexer.index(doc).await })
            .await
    }
}

fn record_failure(result: &mut StageResult, stage: Stage, error: StageError) {
    warn!(arxiv_id = %result.arxiv_id, %stage, error = %error, "Stage failed");
    result.fail(stage, error);
}
