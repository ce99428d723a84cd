//! Adapter construction from configuration.
//!
//! [`ServiceCache`] builds each adapter on first use and hands out shared
//! handles afterwards. Callers own the cache; nothing here is global.

use anyhow::{Context, Result};
use curator_config::Config;
use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::info;

use crate::pdf_parser::LopdfParser;
use crate::pg_repository::PgPaperStore;
use crate::pipeline::{IngestionPipeline, PipelineOptions};
use crate::search::opensearch::OpenSearchClient;
use crate::sources::arxiv::ArxivClient;

pub struct ServiceCache {
    config: Config,
    arxiv: OnceCell<Arc<ArxivClient>>,
    parser: OnceCell<Arc<LopdfParser>>,
    store: OnceCell<Arc<PgPaperStore>>,
    opensearch: OnceCell<Arc<OpenSearchClient>>,
}

impl ServiceCache {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            arxiv: OnceCell::new(),
            parser: OnceCell::new(),
            store: OnceCell::new(),
            opensearch: OnceCell::new(),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub async fn arxiv(&self) -> Result<Arc<ArxivClient>> {
        self.arxiv
            .get_or_try_init(|| async {
                let max_pdf_bytes = self.config.pdf_parser.max_file_size_mb * 1024 * 1024;
                let client = ArxivClient::new(&self.config.arxiv, max_pdf_bytes)
                    .context("failed to build arXiv client")?;
                Ok::<_, anyhow::Error>(Arc::new(client))
            })
            .await
            .cloned()
    }

    pub async fn parser(&self) -> Arc<LopdfParser> {
        self.parser
            .get_or_init(|| async { Arc::new(LopdfParser::from_config(&self.config.pdf_parser)) })
            .await
            .clone()
    }

    /// Connects and migrates the schema on first use.
    pub async fn store(&self) -> Result<Arc<PgPaperStore>> {
        self.store
            .get_or_try_init(|| async {
                let db = &self.config.database;
                let store = PgPaperStore::connect(&db.url, db.max_connections)
                    .await
                    .context("failed to connect to PostgreSQL")?;
                store.migrate().await.context("failed to migrate papers schema")?;
                info!(max_connections = db.max_connections, "Database connected");
                Ok::<_, anyhow::Error>(Arc::new(store))
            })
            .await
            .cloned()
    }

    pub async fn opensearch(&self) -> Result<Arc<OpenSearchClient>> {
        self.opensearch
            .get_or_try_init(|| async {
                let client = OpenSearchClient::new(&self.config.opensearch)
                    .context("failed to build OpenSearch client")?;
                Ok::<_, anyhow::Error>(Arc::new(client))
            })
            .await
            .cloned()
    }

    /// A pipeline wired with the adapters `options` needs.
    pub async fn pipeline(&self, options: &PipelineOptions) -> Result<IngestionPipeline> {
        let arxiv = self.arxiv().await?;
        let mut pipeline = IngestionPipeline::new(arxiv.clone(), arxiv, self.parser().await);
        if options.persist {
            pipeline = pipeline.with_store(self.store().await?);
        }
        if options.index {
            pipeline = pipeline.with_indexer(self.opensearch().await?);
        }
        Ok(pipeline)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_adapters_are_cached() {
        let cache = ServiceCache::new(Config::default());
        let a = cache.arxiv().await.unwrap();
        let b = cache.arxiv().await.unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert!(Arc::ptr_eq(&cache.parser().await, &cache.parser().await));
    }

    #[tokio::test]
    async fn test_pipeline_without_persist_or_index_needs_no_backends() {
        let cache = ServiceCache::new(Config::default());
        let options = PipelineOptions { persist: false, ..Default::default() };
        assert!(cache.pipeline(&options).await.is_ok());
    }
}
