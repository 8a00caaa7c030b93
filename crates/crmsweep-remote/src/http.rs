//! HTTP client for a CRM v3 objects API.

use std::time::Duration;

use async_trait::async_trait;
use crmsweep_core::{
    CapabilityError, MutationCapability, SearchCapability, SearchPage, SearchRequest,
};
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::wire::{MergeBody, SearchResponse, classify_status, search_body};

#[derive(Error, Debug)]
pub enum RemoteError {
    #[error("HTTP client setup failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("no API token configured")]
    MissingToken,
    #[error("invalid base URL {0:?}: expected http:// or https://")]
    InvalidBaseUrl(String),
}

/// Search and merge over one object type (`contacts`, `companies`, ...).
///
/// The bearer token is held here and never handed to the engines.
pub struct HttpCrmClient {
    client: reqwest::Client,
    base_url: String,
    token: String,
    object_type: String,
    properties: Vec<String>,
    timeout: Duration,
}

impl HttpCrmClient {
    /// `base_url` like `https://api.example.com`; a trailing slash is ignored.
    pub fn new(
        base_url: &str,
        token: &str,
        object_type: &str,
        timeout: Duration,
    ) -> Result<Self, RemoteError> {
        let base_url = base_url.trim_end_matches('/');
        if !(base_url.starts_with("http://") || base_url.starts_with("https://")) {
            return Err(RemoteError::InvalidBaseUrl(base_url.to_string()));
        }
        if token.trim().is_empty() {
            return Err(RemoteError::MissingToken);
        }
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.to_string(),
            token: token.trim().to_string(),
            object_type: object_type.to_string(),
            properties: Vec::new(),
            timeout,
        })
    }

    /// Properties to request on every search result.
    pub fn with_properties(mut self, properties: Vec<String>) -> Self {
        self.properties = properties;
        self
    }

    fn url(&self, action: &str) -> String {
        format!(
            "{}/crm/v3/objects/{}/{action}",
            self.base_url, self.object_type
        )
    }

    async fn post<B: Serialize + ?Sized>(
        &self,
        url: &str,
        body: &B,
        keys: &[String],
    ) -> Result<String, CapabilityError> {
        let resp = self
            .client
            .post(url)
            .bearer_auth(&self.token)
            .json(body)
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;

        let status = resp.status();
        if !status.is_success() {
            let retry_after = resp
                .headers()
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.trim().parse::<u64>().ok())
                .map(Duration::from_secs);
            let body = resp.text().await.unwrap_or_default();
            return Err(classify_status(status.as_u16(), &body, retry_after, keys));
        }
        resp.text().await.map_err(|e| self.transport_error(e))
    }

    fn transport_error(&self, err: reqwest::Error) -> CapabilityError {
        if err.is_timeout() {
            CapabilityError::Timeout(self.timeout)
        } else {
            CapabilityError::Transient(err.to_string())
        }
    }
}

#[async_trait]
impl SearchCapability for HttpCrmClient {
    async fn search(&self, request: &SearchRequest) -> Result<SearchPage, CapabilityError> {
        let url = self.url("search");
        let body = search_body(request, &self.properties);
        let text = self.post(&url, &body, &[]).await?;
        let resp: SearchResponse = serde_json::from_str(&text)
            .map_err(|e| CapabilityError::Rejected(format!("unreadable search response: {e}")))?;
        let page = resp.into_page(&request.sort_property);
        debug!(
            url = %url,
            range = %request.range,
            count = page.records.len(),
            total = page.total_matched,
            "search call"
        );
        Ok(page)
    }
}

#[async_trait]
impl MutationCapability for HttpCrmClient {
    /// The merge endpoint takes one secondary per call; stops at the first failure.
    async fn merge_records(
        &self,
        primary: &str,
        secondaries: &[String],
    ) -> Result<(), CapabilityError> {
        let url = self.url("merge");
        let mut merged = Vec::new();
        for secondary in secondaries {
            let body = MergeBody {
                primary_object_id: primary,
                object_id_to_merge: secondary,
            };
            // A 404 does not say which side is gone.
            let keys = [primary.to_string(), secondary.clone()];
            if let Err(err) = self.post(&url, &body, &keys).await {
                return Err(partial_failure(primary, merged, err));
            }
            info!(primary, secondary = %secondary, object_type = %self.object_type, "merged record");
            merged.push(secondary.clone());
        }
        Ok(())
    }
}

/// Wrap `err` so a failure after earlier merges is not mistaken for a no-op.
fn partial_failure(primary: &str, merged: Vec<String>, err: CapabilityError) -> CapabilityError {
    if merged.is_empty() {
        return err;
    }
    warn!(primary, merged = merged.len(), error = %err, "merge stopped part way");
    CapabilityError::PartialMerge {
        primary: primary.to_string(),
        merged,
        cause: Box::new(err),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client(base: &str) -> HttpCrmClient {
        HttpCrmClient::new(base, "pat-123", "contacts", Duration::from_secs(5)).unwrap()
    }

    #[test]
    fn trims_trailing_slash() {
        let c = client("https://api.example.com/");
        assert_eq!(c.base_url, "https://api.example.com");
    }

    #[test]
    fn endpoint_urls() {
        let c = client("http://localhost:8080");
        assert_eq!(
            c.url("search"),
            "http://localhost:8080/crm/v3/objects/contacts/search"
        );
        assert_eq!(
            c.url("merge"),
            "http://localhost:8080/crm/v3/objects/contacts/merge"
        );
    }

    #[test]
    fn rejects_missing_token_and_bad_url() {
        assert!(matches!(
            HttpCrmClient::new("https://api.example.com", "  ", "contacts", Duration::from_secs(1)),
            Err(RemoteError::MissingToken)
        ));
        assert!(matches!(
            HttpCrmClient::new("api.example.com", "t", "contacts", Duration::from_secs(1)),
            Err(RemoteError::InvalidBaseUrl(_))
        ));
    }

    #[test]
    fn failure_after_a_merge_is_partial() {
        let not_found = CapabilityError::NotFound {
            keys: vec!["1".into(), "3".into()],
        };
        assert_eq!(partial_failure("1", vec![], not_found.clone()), not_found);

        match partial_failure("1", vec!["2".into()], not_found.clone()) {
            CapabilityError::PartialMerge {
                primary,
                merged,
                cause,
            } => {
                assert_eq!(primary, "1");
                assert_eq!(merged, vec!["2"]);
                assert_eq!(*cause, not_found);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn unreachable_host_is_transient() {
        // Nothing listens on port 9 of the loopback interface.
        let c = client("http://127.0.0.1:9");
        let err = c
            .merge_records("1", &["2".to_string()])
            .await
            .unwrap_err();
        assert!(err.is_transient());
    }
}
