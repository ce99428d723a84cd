//! arXiv API client.
//!
//! Endpoint: https://export.arxiv.org/api/query (Atom feed)
//!
//! Serves both as the metadata source and as the content fetcher: PDFs are
//! downloaded into a local cache directory keyed by arXiv identifier.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use curator_common::{CuratorError, SandboxClient};
use curator_config::ArxivConfig;
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};

use super::{MetadataSource, SourceQuery};
use crate::error::{SourceError, StageError};
use crate::fetcher::{cache_file_name, ContentFetcher};
use crate::models::{ContentHandle, SourceRecord};

pub struct ArxivClient {
    client: SandboxClient,
    base_url: String,
    search_category: String,
    pdf_cache_dir: PathBuf,
    rate_limit_delay: Duration,
    max_pdf_bytes: u64,
    /// Time of the last API request; held across the wait so requests queue.
    last_request: Mutex<Option<Instant>>,
}

impl ArxivClient {
    pub fn new(config: &ArxivConfig, max_pdf_bytes: u64) -> Result<Self, CuratorError> {
        let rate_limit_delay = Duration::try_from_secs_f64(config.rate_limit_delay_secs).map_err(|e| {
            CuratorError::Config(format!("invalid arxiv.rate_limit_delay_secs {}: {e}", config.rate_limit_delay_secs))
        })?;
        let mut client = SandboxClient::with_timeout(Duration::from_secs(config.timeout_seconds))?;
        client.allow_url(&config.base_url)?;

        Ok(Self {
            client,
            base_url: config.base_url.clone(),
            search_category: config.search_category.clone(),
            pdf_cache_dir: config.pdf_cache_dir.clone(),
            rate_limit_delay,
            max_pdf_bytes,
            last_request: Mutex::new(None),
        })
    }

    pub fn pdf_cache_dir(&self) -> &Path {
        &self.pdf_cache_dir
    }

    /// `search_query` parameter: category plus optional submission window.
    pub fn build_search_query(&self, query: &SourceQuery) -> String {
        let mut search = format!("cat:{}", self.search_category);
        if query.from_date.is_some() || query.to_date.is_some() {
            let from = query.from_date.as_deref().map(|d| format!("{d}0000")).unwrap_or_else(|| "*".to_string());
            let to = query.to_date.as_deref().map(|d| format!("{d}2359")).unwrap_or_else(|| "*".to_string());
            search.push_str(&format!(" AND submittedDate:[{from} TO {to}]"));
        }
        search
    }

    async fn throttle(&self) {
        let mut last = self.last_request.lock().await;
        if let Some(previous) = *last {
            let elapsed = previous.elapsed();
            if elapsed < self.rate_limit_delay {
                tokio::time::sleep(self.rate_limit_delay - elapsed).await;
            }
        }
        *last = Some(Instant::now());
    }

    async fn download(&self, record: &SourceRecord, path: &Path) -> Result<u64, StageError> {
        let resp = self.client.get(&record.pdf_url)?.send().await?.error_for_status()?;

        if let Some(len) = resp.content_length() {
            if len > self.max_pdf_bytes {
                return Err(StageError::Invalid(format!(
                    "PDF is {len} bytes, limit is {}",
                    self.max_pdf_bytes
                )));
            }
        }

        let bytes = resp.bytes().await?;
        if bytes.len() as u64 > self.max_pdf_bytes {
            return Err(StageError::Invalid(format!(
                "PDF is {} bytes, limit is {}",
                bytes.len(),
                self.max_pdf_bytes
            )));
        }
        if !bytes.starts_with(b"%PDF") {
            return Err(StageError::Invalid("response is not a PDF".to_string()));
        }

        // Write beside the target and rename, so a partial download never
        // shows up as a cache hit.
        let tmp = path.with_extension("pdf.part");
        tokio::fs::write(&tmp, &bytes).await.map_err(io_error)?;
        tokio::fs::rename(&tmp, path).await.map_err(io_error)?;
        Ok(bytes.len() as u64)
    }
}

fn io_error(err: std::io::Error) -> StageError {
    StageError::Unavailable(format!("cache I/O: {err}"))
}

#[async_trait]
impl MetadataSource for ArxivClient {
    #[instrument(skip(self), fields(category = %self.search_category))]
    async fn fetch_records(&self, query: &SourceQuery) -> Result<Vec<SourceRecord>, SourceError> {
        let search_query = self.build_search_query(query);
        let params = [
            ("search_query", search_query),
            ("start", "0".to_string()),
            ("max_results", query.max_results.to_string()),
            ("sortBy", query.sort_by.as_str().to_string()),
            ("sortOrder", query.sort_order.as_str().to_string()),
        ];

        self.throttle().await;
        let resp = self.client.get(&self.base_url)?.query(&params).send().await?;

        let status = resp.status();
        if status.as_u16() == 429 {
            return Err(SourceError::RateLimited);
        }
        if !status.is_success() {
            return Err(SourceError::Status { status: status.as_u16() });
        }

        let xml = resp.text().await?;
        let records = parse_arxiv_feed(&xml)?;
        info!(count = records.len(), "arXiv query returned records");
        Ok(records)
    }
}

#[async_trait]
impl ContentFetcher for ArxivClient {
    #[instrument(skip(self, record), fields(arxiv_id = %record.arxiv_id))]
    async fn fetch(&self, record: &SourceRecord, use_cache: bool) -> Result<ContentHandle, StageError> {
        let path = self.pdf_cache_dir.join(cache_file_name(&record.arxiv_id));

        if use_cache {
            if let Ok(meta) = tokio::fs::metadata(&path).await {
                if meta.len() > 0 {
                    debug!(path = %path.display(), "Using cached PDF");
                    return Ok(ContentHandle { path, size_bytes: meta.len(), from_cache: true });
                }
            }
        }

        tokio::fs::create_dir_all(&self.pdf_cache_dir).await.map_err(io_error)?;

        match self.download(record, &path).await {
            Ok(size_bytes) => {
                debug!(size_bytes, "PDF downloaded");
                Ok(ContentHandle { path, size_bytes, from_cache: false })
            }
            Err(e) => {
                warn!(url = %record.pdf_url, error = %e, "PDF download failed");
                Err(e)
            }
        }
    }
}

// ── Atom feed parsing ─────────────────────────────────────────────────────────

#[derive(Clone, Copy, PartialEq)]
enum Field {
    Id,
    Title,
    Summary,
    Published,
    AuthorName,
}

#[derive(Default)]
struct EntryBuilder {
    id: String,
    title: String,
    summary: String,
    published: String,
    authors: Vec<String>,
    categories: BTreeSet<String>,
    pdf_url: Option<String>,
}

impl EntryBuilder {
    fn on_empty_or_start(&mut self, e: &BytesStart<'_>) {
        match e.name().as_ref() {
            b"category" => {
                if let Some(term) = attr(e, b"term") {
                    self.categories.insert(term);
                }
            }
            b"link" => {
                if attr(e, b"title").as_deref() == Some("pdf") {
                    self.pdf_url = attr(e, b"href");
                }
            }
            _ => {}
        }
    }

    fn build(self) -> Result<Option<SourceRecord>, SourceError> {
        if self.id.contains("/api/errors") {
            return Err(SourceError::Parse(format!("arXiv API error: {}", collapse(&self.summary))));
        }

        let arxiv_id = extract_arxiv_id(&self.id);
        if arxiv_id.is_empty() {
            warn!("Skipping entry without an identifier");
            return Ok(None);
        }

        let published_date = match DateTime::parse_from_rfc3339(self.published.trim()) {
            Ok(dt) => dt.with_timezone(&Utc),
            Err(e) => {
                warn!(%arxiv_id, published = %self.published, error = %e, "Skipping entry with bad published date");
                return Ok(None);
            }
        };

        let pdf_url = self
            .pdf_url
            .map(|u| u.replacen("http://", "https://", 1))
            .unwrap_or_else(|| format!("https://arxiv.org/pdf/{arxiv_id}"));

        Ok(Some(SourceRecord {
            arxiv_id,
            title: collapse(&self.title),
            authors: self.authors,
            abstract_text: collapse(&self.summary),
            categories: self.categories,
            published_date,
            pdf_url,
        }))
    }
}

fn attr(e: &BytesStart<'_>, key: &[u8]) -> Option<String> {
    e.attributes()
        .flatten()
        .find(|a| a.key.as_ref() == key)
        .and_then(|a| a.unescape_value().ok().map(|v| v.into_owned()))
}

/// `http://arxiv.org/abs/2401.00001v1` → `2401.00001v1`.
pub fn extract_arxiv_id(id_url: &str) -> String {
    let id = id_url.trim();
    id.split_once("/abs/").map(|(_, tail)| tail).unwrap_or(id).to_string()
}

fn collapse(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Parse an arXiv Atom response into records.
pub fn parse_arxiv_feed(xml: &str) -> Result<Vec<SourceRecord>, SourceError> {
    let mut records = Vec::new();
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut entry: Option<EntryBuilder> = None;
    let mut field: Option<Field> = None;
    let mut author_name = String::new();
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(ref e)) => match e.name().as_ref() {
                b"entry" => entry = Some(EntryBuilder::default()),
                name => {
                    if let Some(ref mut current) = entry {
                        field = match name {
                            b"id"        => Some(Field::Id),
                            b"title"     => Some(Field::Title),
                            b"summary"   => Some(Field::Summary),
                            b"published" => Some(Field::Published),
                            b"name"      => Some(Field::AuthorName),
                            _ => {
                                current.on_empty_or_start(e);
                                None
                            }
                        };
                    }
                }
            },
            Ok(Event::Empty(ref e)) => {
                if let Some(ref mut current) = entry {
                    current.on_empty_or_start(e);
                }
            }
            Ok(Event::Text(ref e)) => {
                if let (Some(current), Some(f)) = (entry.as_mut(), field) {
                    let text = e
                        .unescape()
                        .map_err(|err| SourceError::Parse(err.to_string()))?;
                    let target = match f {
                        Field::Id         => &mut current.id,
                        Field::Title      => &mut current.title,
                        Field::Summary    => &mut current.summary,
                        Field::Published  => &mut current.published,
                        Field::AuthorName => &mut author_name,
                    };
                    if !target.is_empty() {
                        target.push(' ');
                    }
                    target.push_str(&text);
                }
            }
            Ok(Event::End(ref e)) => match e.name().as_ref() {
                b"entry" => {
                    if let Some(done) = entry.take() {
                        if let Some(record) = done.build()? {
                            records.push(record);
                        }
                    }
                    field = None;
                }
                b"author" => {
                    if let Some(ref mut current) = entry {
                        let name = collapse(&author_name);
                        if !name.is_empty() {
                            current.authors.push(name);
                        }
                    }
                    author_name.clear();
                }
                _ => field = None,
            },
            Ok(Event::Eof) => break,
            Err(e) => {
                return Err(SourceError::Parse(format!(
                    "XML error at position {}: {e}",
                    reader.buffer_position()
                )));
            }
            _ => {}
        }
        buf.clear();
    }

    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sources::{SortField, SortOrder};

    const FEED: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<feed xmlns="http://www.w3.org/2005/Atom" xmlns:arxiv="http://arxiv.org/schemas/atom">
  <id>http://arxiv.org/api/abc</id>
  <title type="html">ArXiv Query: search_query=cat:cs.AI</title>
  <entry>
    <id>http://arxiv.org/abs/2401.00001v1</id>
    <updated>2024-01-02T18:00:00Z</updated>
    <published>2024-01-02T18:00:00Z</published>
    <title>Attention   Is
      Still All You Need</title>
    <summary>  We revisit attention &amp; friends.
    </summary>
    <author><name>Ada Lovelace</name></author>
    <author><name>Alan Turing</name></author>
    <link href="http://arxiv.org/abs/2401.00001v1" rel="alternate" type="text/html"/>
    <link title="pdf" href="http://arxiv.org/pdf/2401.00001v1" rel="related" type="application/pdf"/>
    <arxiv:primary_category term="cs.AI" scheme="http://arxiv.org/schemas/atom"/>
    <category term="cs.AI" scheme="http://arxiv.org/schemas/atom"/>
    <category term="cs.LG" scheme="http://arxiv.org/schemas/atom"/>
  </entry>
  <entry>
    <id>http://arxiv.org/abs/hep-th/9901001v2</id>
    <published>1999-01-01T00:00:00Z</published>
    <title>Old Style</title>
    <summary>Strings.</summary>
    <author><name>Ed Witten</name></author>
    <category term="hep-th"/>
  </entry>
</feed>"#;

    fn client(dir: &Path) -> ArxivClient {
        let config = ArxivConfig {
            pdf_cache_dir: dir.to_path_buf(),
            rate_limit_delay_secs: 0.0,
            ..Default::default()
        };
        ArxivClient::new(&config, 1024).unwrap()
    }

    #[test]
    fn test_non_finite_rate_limit_is_config_error() {
        for bad in [f64::NAN, f64::INFINITY] {
            let config = ArxivConfig { rate_limit_delay_secs: bad, ..Default::default() };
            assert!(matches!(ArxivClient::new(&config, 1024), Err(CuratorError::Config(_))));
        }
    }

    #[test]
    fn test_parse_feed() {
        let records = parse_arxiv_feed(FEED).unwrap();
        assert_eq!(records.len(), 2);

        let first = &records[0];
        assert_eq!(first.arxiv_id, "2401.00001v1");
        assert_eq!(first.title, "Attention Is Still All You Need");
        assert_eq!(first.abstract_text, "We revisit attention & friends.");
        assert_eq!(first.authors, vec!["Ada Lovelace", "Alan Turing"]);
        assert_eq!(first.pdf_url, "https://arxiv.org/pdf/2401.00001v1");
        assert!(first.categories.contains("cs.LG"));
        assert_eq!(first.categories.len(), 2);

        let second = &records[1];
        assert_eq!(second.arxiv_id, "hep-th/9901001v2");
        assert_eq!(second.pdf_url, "https://arxiv.org/pdf/hep-th/9901001v2");
    }

    #[test]
    fn test_api_error_entry_is_parse_error() {
        let xml = r#"<feed xmlns="http://www.w3.org/2005/Atom"><entry>
            <id>http://arxiv.org/api/errors#incorrect_id_format</id>
            <title>Error</title>
            <summary>incorrect id format</summary>
        </entry></feed>"#;
        let err = parse_arxiv_feed(xml).unwrap_err();
        assert!(err.to_string().contains("incorrect id format"));
    }

    #[test]
    fn test_malformed_xml_is_parse_error() {
        let err = parse_arxiv_feed("<feed><entry><id>x</feed>").unwrap_err();
        assert!(matches!(err, SourceError::Parse(_)));
    }

    #[test]
    fn test_entry_with_bad_date_is_skipped() {
        let xml = r#"<feed><entry><id>http://arxiv.org/abs/1</id><published>yesterday</published><title>t</title></entry></feed>"#;
        assert!(parse_arxiv_feed(xml).unwrap().is_empty());
    }

    #[test]
    fn test_search_query_with_dates() {
        let dir = tempfile::tempdir().unwrap();
        let c = client(dir.path());
        let query = SourceQuery {
            max_results: 10,
            from_date: Some("20240101".to_string()),
            to_date: Some("20240102".to_string()),
            sort_by: SortField::SubmittedDate,
            sort_order: SortOrder::Descending,
        };
        assert_eq!(
            c.build_search_query(&query),
            "cat:cs.AI AND submittedDate:[202401010000 TO 202401022359]"
        );

        let open = SourceQuery { from_date: None, to_date: None, ..query };
        assert_eq!(c.build_search_query(&open), "cat:cs.AI");
    }

    #[tokio::test]
    async fn test_cached_pdf_is_reused() {
        let dir = tempfile::tempdir().unwrap();
        let c = client(dir.path());
        let record = parse_arxiv_feed(FEED).unwrap().remove(0);
        let cached = dir.path().join(cache_file_name(&record.arxiv_id));
        std::fs::write(&cached, b"%PDF-1.4 cached").unwrap();

        let handle = c.fetch(&record, true).await.unwrap();
        assert!(handle.from_cache);
        assert_eq!(handle.path, cached);
        assert_eq!(handle.size_bytes, 15);
    }
}
