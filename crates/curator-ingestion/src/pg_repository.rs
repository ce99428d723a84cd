//! PostgreSQL paper store.
//!
//! One row per arXiv identifier in `papers`. Each upsert is a single
//! `INSERT ... ON CONFLICT` statement in its own transaction, so a paper is
//! durable as soon as its stage returns.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgPoolOptions;
use sqlx::types::Json;
use sqlx::PgPool;
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::StageError;
use crate::models::{unprocessed_note, PaperUpsert, Section, StoredRecord};
use crate::repository::PaperStore;

const CREATE_PAPERS: &str = r#"
CREATE TABLE IF NOT EXISTS papers (
    id                  UUID PRIMARY KEY,
    arxiv_id            TEXT NOT NULL UNIQUE,
    title               TEXT NOT NULL,
    authors             JSONB NOT NULL,
    abstract            TEXT NOT NULL,
    categories          JSONB NOT NULL,
    published_date      TIMESTAMPTZ NOT NULL,
    pdf_url             TEXT NOT NULL,
    raw_text            TEXT,
    sections            JSONB,
    "references"        JSONB,
    parser_used         TEXT,
    parser_metadata     JSONB,
    pdf_processed       BOOLEAN NOT NULL DEFAULT FALSE,
    pdf_processing_date TIMESTAMPTZ,
    created_at          TIMESTAMPTZ NOT NULL DEFAULT now(),
    updated_at          TIMESTAMPTZ NOT NULL DEFAULT now()
)
"#;

const CREATE_PUBLISHED_INDEX: &str =
    "CREATE INDEX IF NOT EXISTS papers_published_date_idx ON papers (published_date)";

// Metadata columns are written on insert only. Content columns are replaced
// when the upsert carries content and kept otherwise.
const UPSERT_PAPER: &str = r#"
INSERT INTO papers
    (id, arxiv_id, title, authors, abstract, categories, published_date, pdf_url,
     raw_text, sections, "references", parser_used, parser_metadata,
     pdf_processed, pdf_processing_date, created_at, updated_at)
VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10,$11,$12,$13,$14,$15,$16,$16)
ON CONFLICT (arxiv_id) DO UPDATE SET
    raw_text            = COALESCE(EXCLUDED.raw_text, papers.raw_text),
    sections            = COALESCE(EXCLUDED.sections, papers.sections),
    "references"        = COALESCE(EXCLUDED."references", papers."references"),
    parser_used         = COALESCE(EXCLUDED.parser_used, papers.parser_used),
    parser_metadata     = CASE WHEN EXCLUDED.pdf_processed
                               THEN EXCLUDED.parser_metadata
                               ELSE papers.parser_metadata END,
    pdf_processed       = papers.pdf_processed OR EXCLUDED.pdf_processed,
    pdf_processing_date = COALESCE(EXCLUDED.pdf_processing_date, papers.pdf_processing_date),
    updated_at          = EXCLUDED.updated_at
RETURNING id, arxiv_id, title, authors, abstract, categories, published_date, pdf_url,
          raw_text, sections, "references", parser_used, parser_metadata,
          pdf_processed, pdf_processing_date, created_at, updated_at
"#;

const SELECT_PAPER: &str = r#"
SELECT id, arxiv_id, title, authors, abstract, categories, published_date, pdf_url,
       raw_text, sections, "references", parser_used, parser_metadata,
       pdf_processed, pdf_processing_date, created_at, updated_at
FROM papers WHERE arxiv_id = $1
"#;

#[derive(sqlx::FromRow)]
struct PaperRow {
    id: Uuid,
    arxiv_id: String,
    title: String,
    authors: Json<Vec<String>>,
    #[sqlx(rename = "abstract")]
    abstract_text: String,
    categories: Json<Vec<String>>,
    published_date: DateTime<Utc>,
    pdf_url: String,
    raw_text: Option<String>,
    sections: Option<Json<Vec<Section>>>,
    references: Option<Json<Vec<String>>>,
    parser_used: Option<String>,
    parser_metadata: Option<serde_json::Value>,
    pdf_processed: bool,
    pdf_processing_date: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<PaperRow> for StoredRecord {
    fn from(row: PaperRow) -> Self {
        Self {
            id: row.id,
            arxiv_id: row.arxiv_id,
            title: row.title,
            authors: row.authors.0,
            abstract_text: row.abstract_text,
            categories: row.categories.0,
            published_date: row.published_date,
            pdf_url: row.pdf_url,
            raw_text: row.raw_text,
            sections: row.sections.map(|s| s.0),
            references: row.references.map(|r| r.0),
            parser_used: row.parser_used,
            parser_metadata: row.parser_metadata.unwrap_or_else(unprocessed_note),
            pdf_processed: row.pdf_processed,
            pdf_processing_date: row.pdf_processing_date,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

#[derive(Clone)]
pub struct PgPaperStore {
    pool: PgPool,
}

impl PgPaperStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Open a pool against `url`.
    pub async fn connect(url: &str, max_connections: u32) -> Result<Self, sqlx::Error> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(url)
            .await?;
        Ok(Self::new(pool))
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Create the `papers` table and its indexes if they do not exist.
    pub async fn migrate(&self) -> Result<(), sqlx::Error> {
        sqlx::query(CREATE_PAPERS).execute(&self.pool).await?;
        sqlx::query(CREATE_PUBLISHED_INDEX).execute(&self.pool).await?;
        info!("papers schema ready");
        Ok(())
    }

    /// Papers whose PDF content has been stored.
    pub async fn processed_count(&self) -> Result<i64, sqlx::Error> {
        sqlx::query_scalar("SELECT COUNT(*) FROM papers WHERE pdf_processed")
            .fetch_one(&self.pool)
            .await
    }
}

#[async_trait]
impl PaperStore for PgPaperStore {
    async fn upsert(&self, upsert: &PaperUpsert<'_>) -> Result<StoredRecord, StageError> {
        let record = upsert.record;
        let content = upsert.content;
        let now = Utc::now();
        let categories: Vec<&String> = record.categories.iter().collect();

        let mut tx = self.pool.begin().await?;
        let row: PaperRow = sqlx::query_as(UPSERT_PAPER)
            .bind(Uuid::new_v4())
            .bind(&record.arxiv_id)
            .bind(&record.title)
            .bind(Json(&record.authors))
            .bind(&record.abstract_text)
            .bind(Json(&categories))
            .bind(record.published_date)
            .bind(&record.pdf_url)
            .bind(content.map(|c| c.raw_text.as_str()))
            .bind(content.map(|c| Json(&c.sections)))
            .bind(content.map(|c| Json(&c.references)))
            .bind(content.map(|c| c.parser_used.as_str()))
            .bind(content.map(|c| c.parser_metadata.clone()).unwrap_or_else(unprocessed_note))
            .bind(content.is_some())
            .bind(content.map(|_| now))
            .bind(now)
            .fetch_one(&mut *tx)
            .await?;
        tx.commit().await?;

        debug!(arxiv_id = %record.arxiv_id, with_content = content.is_some(), "Paper upserted");
        Ok(row.into())
    }

    async fn get(&self, arxiv_id: &str) -> Result<Option<StoredRecord>, StageError> {
        let row: Option<PaperRow> = sqlx::query_as(SELECT_PAPER)
            .bind(arxiv_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(Into::into))
    }

    async fn count(&self) -> Result<u64, StageError> {
        let n: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM papers")
            .fetch_one(&self.pool)
            .await?;
        Ok(n.max(0) as u64)
    }
}
