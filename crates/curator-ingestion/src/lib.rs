//! curator-ingestion — arXiv paper ingestion pipeline.
//! - Metadata retrieval from the arXiv API
//! - PDF download with a local cache
//! - lopdf text extraction and section detection
//! - PostgreSQL persistence with per-paper upserts
//! - OpenSearch indexing
//! - Orchestration with per-stage concurrency limits

pub mod error;
pub mod fetcher;
pub mod models;
pub mod pdf_parser;
pub mod pg_repository;
pub mod pipeline;
pub mod repository;
pub mod search;
pub mod services;
pub mod sources;

pub use error::{PipelineError, SourceError, StageError};
pub use pipeline::{IngestionPipeline, IngestionReport, PipelineOptions};
