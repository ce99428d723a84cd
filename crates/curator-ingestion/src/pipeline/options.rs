use curator_config::Config;
use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;

pub use curator_config::PersistOrder;

use super::retry::RetryPolicy;
use crate::error::PipelineError;

/// Switches and limits for one run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineOptions {
    /// Download and parse PDFs. When false, records go straight to persist.
    #[serde(default = "default_true")]
    pub fetch_content: bool,
    #[serde(default = "default_true")]
    pub persist: bool,
    #[serde(default)]
    pub index: bool,
    #[serde(default = "default_fetches")]
    pub max_concurrent_fetches: usize,
    #[serde(default = "default_parses")]
    pub max_concurrent_parses: usize,
    #[serde(default = "default_max_results")]
    pub max_results: usize,
    /// Reuse PDFs already present in the download cache.
    #[serde(default = "default_true")]
    pub use_cache: bool,
    #[serde(default)]
    pub persist_order: PersistOrder,
    /// Characters of PDF text sent to the search index.
    #[serde(default = "default_index_chars")]
    pub max_index_text_chars: usize,
    /// Records processed at once. Defaults to fetches + parses.
    #[serde(default)]
    pub max_in_flight: Option<usize>,
    #[serde(default)]
    pub retry: RetryPolicy,
}

fn default_true()          -> bool  { true }
fn default_fetches()       -> usize { 5 }
fn default_parses()        -> usize { 3 }
fn default_max_results()   -> usize { 100 }
fn default_index_chars()   -> usize { 1_000_000 }

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            fetch_content: true,
            persist: true,
            index: false,
            max_concurrent_fetches: default_fetches(),
            max_concurrent_parses: default_parses(),
            max_results: default_max_results(),
            use_cache: true,
            persist_order: PersistOrder::default(),
            max_index_text_chars: default_index_chars(),
            max_in_flight: None,
            retry: RetryPolicy::default(),
        }
    }
}

impl PipelineOptions {
    /// Options seeded from the loaded configuration.
    pub fn from_config(config: &Config) -> Self {
        Self {
            max_concurrent_fetches: config.arxiv.max_concurrent_downloads,
            max_concurrent_parses: config.arxiv.max_concurrent_parsing,
            max_results: config.arxiv.max_results,
            persist_order: config.pipeline.persist_order,
            max_index_text_chars: config.opensearch.max_text_size,
            retry: RetryPolicy {
                max_retries: config.pipeline.max_retries,
                base_delay_ms: config.pipeline.retry_base_delay_ms,
                ..RetryPolicy::default()
            },
            ..Self::default()
        }
    }

    pub fn in_flight_limit(&self) -> usize {
        self.max_in_flight
            .unwrap_or(self.max_concurrent_fetches.saturating_add(self.max_concurrent_parses))
            .max(1)
    }

    pub fn validate(&self) -> Result<(), PipelineError> {
        for (key, value) in [
            ("max_concurrent_fetches", self.max_concurrent_fetches),
            ("max_concurrent_parses", self.max_concurrent_parses),
        ] {
            if value == 0 {
                return Err(PipelineError::InvalidOptions(format!("{key} must be at least 1")));
            }
            if value > Semaphore::MAX_PERMITS {
                return Err(PipelineError::InvalidOptions(format!(
                    "{key} must be at most {}",
                    Semaphore::MAX_PERMITS
                )));
            }
        }
        if self.max_results == 0 {
            return Err(PipelineError::InvalidOptions("max_results must be at least 1".into()));
        }
        if self.max_in_flight == Some(0) {
            return Err(PipelineError::InvalidOptions("max_in_flight must be at least 1".into()));
        }
        Ok(())
    }
}
