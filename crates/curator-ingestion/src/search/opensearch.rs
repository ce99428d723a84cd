//! OpenSearch REST client.
//!
//! Documents are written with `refresh=true` so a paper is searchable as soon
//! as its index stage reports success.

use async_trait::async_trait;
use curator_common::{CuratorError, SandboxClient};
use curator_config::OpenSearchConfig;
use reqwest::{Method, StatusCode};
use serde::Deserialize;
use tracing::{debug, info, instrument, warn};

use super::index_config::papers_index_body;
use super::SearchIndexer;
use crate::error::StageError;
use crate::models::IndexDocument;

#[derive(Debug, Deserialize)]
struct IndexResponse {
    result: Option<String>,
}

#[derive(Debug, Deserialize)]
struct HealthResponse {
    status: String,
}

#[derive(Debug, Deserialize)]
struct CountResponse {
    count: u64,
}

pub struct OpenSearchClient {
    client: SandboxClient,
    host: String,
    index_name: String,
}

impl OpenSearchClient {
    pub fn new(config: &OpenSearchConfig) -> Result<Self, CuratorError> {
        let mut client = SandboxClient::new()?;
        client.allow_url(&config.host)?;
        Ok(Self {
            client,
            host: config.host.trim_end_matches('/').to_string(),
            index_name: config.index_name.clone(),
        })
    }

    pub fn index_name(&self) -> &str {
        &self.index_name
    }

    fn index_url(&self) -> String {
        format!("{}/{}", self.host, self.index_name)
    }

    pub async fn index_exists(&self) -> Result<bool, CuratorError> {
        let resp = self.client.head(&self.index_url())?.send().await?;
        Ok(resp.status().is_success())
    }

    /// Create the papers index. An existing index is left alone unless
    /// `force` is set, in which case it is dropped first. Returns whether an
    /// index was created.
    #[instrument(skip(self), fields(index = %self.index_name))]
    pub async fn create_index(&self, force: bool) -> Result<bool, CuratorError> {
        if self.index_exists().await? {
            if !force {
                info!("Index already exists");
                return Ok(false);
            }
            self.client
                .request(Method::DELETE, &self.index_url())?
                .send()
                .await?
                .error_for_status()?;
            info!("Deleted existing index");
        }

        self.client
            .put(&self.index_url())?
            .json(&papers_index_body())
            .send()
            .await?
            .error_for_status()?;
        info!("Created index");
        Ok(true)
    }

    /// Cluster health is green or yellow.
    pub async fn health_check(&self) -> bool {
        let url = format!("{}/_cluster/health", self.host);
        let resp = match self.client.get(&url) {
            Ok(req) => req.send().await,
            Err(e) => {
                warn!(error = %e, "OpenSearch health check blocked");
                return false;
            }
        };
        match resp {
            Ok(r) if r.status().is_success() => match r.json::<HealthResponse>().await {
                Ok(h) => matches!(h.status.as_str(), "green" | "yellow"),
                Err(_) => false,
            },
            Ok(r) => {
                warn!(status = %r.status(), "OpenSearch health check failed");
                false
            }
            Err(e) => {
                warn!(error = %e, "OpenSearch unreachable");
                false
            }
        }
    }

    /// Number of documents in the index.
    pub async fn document_count(&self) -> Result<u64, CuratorError> {
        let url = format!("{}/_count", self.index_url());
        let resp = self.client.get(&url)?.send().await?.error_for_status()?;
        Ok(resp.json::<CountResponse>().await?.count)
    }
}

/// Document ids may contain `/` (old-style arXiv identifiers).
fn encode_doc_id(id: &str) -> String {
    id.replace('%', "%25").replace('/', "%2F")
}

#[async_trait]
impl SearchIndexer for OpenSearchClient {
    #[instrument(skip(self, doc), fields(arxiv_id = %doc.arxiv_id))]
    async fn index(&self, doc: &IndexDocument) -> Result<bool, StageError> {
        let url = format!("{}/_doc/{}", self.index_url(), encode_doc_id(&doc.arxiv_id));
        let resp = self
            .client
            .put(&url)?
            .query(&[("refresh", "true")])
            .json(doc)
            .send()
            .await?;

        let status = resp.status();
        if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
            return Err(StageError::Unavailable(format!("HTTP {status}")));
        }
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(StageError::Rejected(format!("HTTP {status}: {body}")));
        }

        let body: IndexResponse = resp
            .json()
            .await
            .map_err(|e| StageError::Rejected(format!("unreadable index response: {e}")))?;
        let accepted = matches!(body.result.as_deref(), Some("created" | "updated"));
        debug!(result = ?body.result, "Indexed document");
        Ok(accepted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::SourceRecord;
    use chrono::Utc;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client(server: &MockServer) -> OpenSearchClient {
        let config = OpenSearchConfig { host: server.uri(), ..Default::default() };
        OpenSearchClient::new(&config).unwrap()
    }

    fn doc(id: &str) -> IndexDocument {
        let record = SourceRecord {
            arxiv_id: id.to_string(),
            title: "Title".into(),
            authors: vec!["A".into(), "B".into()],
            abstract_text: "Abstract".into(),
            categories: ["cs.AI".to_string()].into_iter().collect(),
            published_date: Utc::now(),
            pdf_url: format!("https://arxiv.org/pdf/{id}"),
        };
        IndexDocument::from_record(&record, None, 100)
    }

    #[test]
    fn test_encode_doc_id() {
        assert_eq!(encode_doc_id("hep-th/9901001v1"), "hep-th%2F9901001v1");
        assert_eq!(encode_doc_id("2401.00001"), "2401.00001");
    }

    #[tokio::test]
    async fn test_index_created() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path("/arxiv-papers/_doc/2401.00001"))
            .and(query_param("refresh", "true"))
            .respond_with(ResponseTemplate::new(201).set_body_json(serde_json::json!({ "result": "created" })))
            .expect(1)
            .mount(&server)
            .await;

        assert!(client(&server).index(&doc("2401.00001")).await.unwrap());
    }

    #[tokio::test]
    async fn test_index_noop_is_not_accepted() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({ "result": "noop" })))
            .mount(&server)
            .await;

        assert!(!client(&server).index(&doc("1")).await.unwrap());
    }

    #[tokio::test]
    async fn test_index_errors_are_classified() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path("/arxiv-papers/_doc/bad"))
            .respond_with(ResponseTemplate::new(400).set_body_string("strict_dynamic_mapping_exception"))
            .mount(&server)
            .await;
        Mock::given(method("PUT"))
            .and(path("/arxiv-papers/_doc/busy"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let c = client(&server);
        let err = c.index(&doc("bad")).await.unwrap_err();
        assert!(matches!(err, StageError::Rejected(ref m) if m.contains("strict_dynamic")));
        let err = c.index(&doc("busy")).await.unwrap_err();
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_create_index_skips_existing_unless_forced() {
        let server = MockServer::start().await;
        Mock::given(method("HEAD"))
            .and(path("/arxiv-papers"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;
        Mock::given(method("DELETE"))
            .and(path("/arxiv-papers"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("PUT"))
            .and(path("/arxiv-papers"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let c = client(&server);
        assert!(!c.create_index(false).await.unwrap());
        assert!(c.create_index(true).await.unwrap());
    }

    #[tokio::test]
    async fn test_health_check() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/_cluster/health"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({ "status": "yellow" })))
            .mount(&server)
            .await;

        assert!(client(&server).health_check().await);
    }
}
