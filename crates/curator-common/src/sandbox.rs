use reqwest::{Client, ClientBuilder, Method, RequestBuilder};
use std::collections::HashSet;
use std::time::Duration;
use url::Url;

use crate::error::CuratorError;

const DEFAULT_USER_AGENT: &str = "arxiv-curator/0.1 (research)";

/// An HTTP client that only issues requests to approved hosts.
///
/// Every adapter that reaches the network goes through this type, so the set
/// of hosts the ingestion job can contact is visible in one place.
#[derive(Debug, Clone)]
pub struct SandboxClient {
    client: Client,
    allowlist: HashSet<String>,
}

impl SandboxClient {
    /// Client with the default allowlist and a 30 second timeout.
    pub fn new() -> Result<Self, CuratorError> {
        Self::with_timeout(Duration::from_secs(30))
    }

    /// Client with the default allowlist and the given request timeout.
    pub fn with_timeout(timeout: Duration) -> Result<Self, CuratorError> {
        let domains = [
            "export.arxiv.org", // arXiv API
            "arxiv.org",        // arXiv PDFs
            "localhost",        // local OpenSearch
            "127.0.0.1",
        ];
        let allowlist = domains.iter().map(|d| d.to_string()).collect();

        let client = ClientBuilder::new()
            .timeout(timeout)
            .user_agent(DEFAULT_USER_AGENT)
            .build()?;

        Ok(Self { client, allowlist })
    }

    /// Appends an exact hostname to the allowlist.
    pub fn allow_domain(&mut self, domain: &str) {
        self.allowlist.insert(domain.to_string());
    }

    /// Appends the host of a configured endpoint (e.g. `http://opensearch:9200`).
    pub fn allow_url(&mut self, url: &str) -> Result<(), CuratorError> {
        let parsed = Url::parse(url).map_err(|e| CuratorError::InvalidUrl(format!("{url}: {e}")))?;
        let host = parsed
            .host_str()
            .ok_or_else(|| CuratorError::InvalidUrl(format!("{url}: missing host")))?;
        self.allow_domain(host);
        Ok(())
    }

    /// Validates if a URL is permitted under the current sandbox policy.
    pub fn is_allowed(&self, url: &str) -> bool {
        let Ok(parsed) = Url::parse(url) else {
            return false;
        };
        let Some(host) = parsed.host_str() else {
            return false;
        };
        self.allowlist
            .iter()
            .any(|allowed| host == allowed || host.ends_with(&format!(".{allowed}")))
    }

    pub fn get(&self, url: &str) -> Result<RequestBuilder, CuratorError> {
        self.request(Method::GET, url)
    }

    pub fn put(&self, url: &str) -> Result<RequestBuilder, CuratorError> {
        self.request(Method::PUT, url)
    }

    pub fn head(&self, url: &str) -> Result<RequestBuilder, CuratorError> {
        self.request(Method::HEAD, url)
    }

    /// Request builder for any method, after the allowlist check.
    pub fn request(&self, method: Method, url: &str) -> Result<RequestBuilder, CuratorError> {
        if !self.is_allowed(url) {
            tracing::warn!(%url, "Blocked request to host outside the allowlist");
            return Err(CuratorError::Security(format!(
                "domain not in allowlist for URL {url}"
            )));
        }
        Ok(self.client.request(method, url))
    }
}
