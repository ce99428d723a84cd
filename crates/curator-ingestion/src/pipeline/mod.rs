//! Ingestion pipeline.
//!
//! For one date range:
//!   1. Fetch the record batch from the metadata source (fatal on failure)
//!   2. Per record, with a bounded number of records in flight:
//!      fetch PDF → parse → persist → index
//!   3. Fold per-record results into an [`IngestionReport`]
//!
//! Fetch and parse each have their own concurrency limit. A record's
//! failures are recorded in the report and never abort the run.

mod limiter;
mod options;
mod orchestrator;
mod report;
mod retry;
mod stage;

pub use limiter::{StageLimiter, StagePermit};
pub use options::{PersistOrder, PipelineOptions};
pub use orchestrator::IngestionPipeline;
pub use report::{IngestionProgress, IngestionReport, ReportBuilder, StageFailure};
pub use retry::RetryPolicy;
pub use stage::{Stage, StageResult, StageStatus};
