//! Confluence REST connector.
//!
//! Implements [`RemoteStore`] against the Confluence Server/Data Center
//! content API:
//!
//! | Operation | Request |
//! |-----------|---------|
//! | fetch | `GET {base}/rest/api/content/{id}?expand=body.storage,version` |
//! | write | `PUT {base}/rest/api/content/{id}` |
//!
//! Writes send `version.number = base_version + 1`. Confluence rejects a
//! number that is not exactly one above its stored version with
//! `409 Conflict`, which is mapped to [`StoreError::Conflict`].
//!
//! # Authentication
//!
//! Personal access token sent as `Authorization: Bearer <token>`. The token
//! comes from `remote.auth_token` or the `remote.token_env` environment
//! variable (default `CONFLUENCE_TOKEN`).
//!
//! # Error mapping
//!
//! | Condition | Result |
//! |-----------|--------|
//! | timeout | [`StoreError::Timeout`] (transient) |
//! | connect/reset | [`StoreError::Network`] (transient) |
//! | 404 | [`StoreError::NotFound`] |
//! | 409 on PUT | [`StoreError::Conflict`] |
//! | other status | [`StoreError::Http`] (5xx/408/429 transient) |

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use doc_sync_core::{RemoteDocument, RemoteStore, StoreError, WriteAck, WriteRequest};
use reqwest::{Response, Url};
use serde::Deserialize;
use tracing::{debug, warn};

use crate::config::Config;

/// Longest error body kept in a [`StoreError::Http`].
const MAX_ERROR_BODY: usize = 500;

pub struct ConfluenceStore {
    base_url: String,
    token: String,
    client: reqwest::Client,
}

impl ConfluenceStore {
    pub fn new(
        base_url: &str,
        token: &str,
        timeout: Duration,
        accept_invalid_certs: bool,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .danger_accept_invalid_certs(accept_invalid_certs)
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            base_url: base_url.trim().trim_end_matches('/').to_string(),
            token: token.to_string(),
            client,
        })
    }

    pub fn from_config(config: &Config) -> Result<Self> {
        let token = config.auth_token()?;
        Self::new(
            &config.remote.base_url,
            &token,
            config.request_timeout(),
            config.remote.accept_invalid_certs,
        )
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn content_url(&self, document_id: &str) -> Result<Url, StoreError> {
        let mut url = Url::parse(&self.base_url)
            .map_err(|e| StoreError::InvalidRequest(format!("bad base URL {}: {e}", self.base_url)))?;
        url.path_segments_mut()
            .map_err(|_| StoreError::InvalidRequest(format!("bad base URL {}", self.base_url)))?
            .pop_if_empty()
            .extend(["rest", "api", "content", document_id]);
        Ok(url)
    }

    async fn check(
        response: Response,
        document_id: &str,
        base_version: Option<u64>,
    ) -> Result<Response, StoreError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(classify_status(status.as_u16(), body, document_id, base_version))
    }
}

#[async_trait]
impl RemoteStore for ConfluenceStore {
    fn kind(&self) -> &str {
        "confluence"
    }

    async fn fetch(&self, document_id: &str) -> Result<RemoteDocument, StoreError> {
        let mut url = self.content_url(document_id)?;
        url.set_query(Some("expand=body.storage,version"));
        debug!(%url, "GET page");

        let response = self
            .client
            .get(url)
            .bearer_auth(&self.token)
            .header("Accept", "application/json")
            .send()
            .await
            .map_err(classify_transport)?;
        let response = Self::check(response, document_id, None).await?;

        let page: PageResponse = response
            .json()
            .await
            .map_err(|e| StoreError::InvalidResponse(e.to_string()))?;
        page.into_document(document_id)
    }

    async fn write(&self, request: &WriteRequest) -> Result<WriteAck, StoreError> {
        let url = self.content_url(&request.document_id)?;
        let payload = put_payload(request)?;
        debug!(%url, base_version = request.base_version, "PUT page");

        let response = self
            .client
            .put(url)
            .bearer_auth(&self.token)
            .json(&payload)
            .send()
            .await
            .map_err(classify_transport)?;
        let response =
            Self::check(response, &request.document_id, Some(request.base_version)).await?;

        // The write is applied once Confluence answers 2xx; an unreadable
        // body must not turn it into a failure.
        let expected = next_version(request)?;
        let new_version = match response.json::<PageResponse>().await {
            Ok(page) => page.version.number,
            Err(e) => {
                warn!(
                    document_id = %request.document_id,
                    error = %e,
                    "unreadable PUT response, assuming version {expected}"
                );
                expected
            }
        };
        Ok(WriteAck { new_version })
    }
}

/// Confluence `content` resource, reduced to the fields we use.
#[derive(Debug, Deserialize)]
struct PageResponse {
    #[serde(default)]
    title: Option<String>,
    version: PageVersion,
    #[serde(default)]
    body: Option<PageBody>,
}

#[derive(Debug, Deserialize)]
struct PageVersion {
    number: u64,
}

#[derive(Debug, Deserialize)]
struct PageBody {
    #[serde(default)]
    storage: Option<StorageBody>,
}

#[derive(Debug, Deserialize)]
struct StorageBody {
    value: String,
}

impl PageResponse {
    fn into_document(self, document_id: &str) -> Result<RemoteDocument, StoreError> {
        let content = self
            .body
            .and_then(|b| b.storage)
            .map(|s| s.value)
            .ok_or_else(|| {
                StoreError::InvalidResponse(format!(
                    "page {document_id} has no body.storage (was expand=body.storage honoured?)"
                ))
            })?;
        Ok(RemoteDocument {
            id: document_id.to_string(),
            version: self.version.number,
            content,
            title: self.title,
        })
    }
}

fn next_version(request: &WriteRequest) -> Result<u64, StoreError> {
    request.base_version.checked_add(1).ok_or_else(|| {
        StoreError::InvalidRequest(format!(
            "{} is at version {}, which cannot be incremented",
            request.document_id, request.base_version
        ))
    })
}

fn put_payload(request: &WriteRequest) -> Result<serde_json::Value, StoreError> {
    let mut version = serde_json::json!({ "number": next_version(request)? });
    if let Some(message) = &request.message {
        version["message"] = serde_json::Value::String(message.clone());
    }
    Ok(serde_json::json!({
        "id": request.document_id,
        "type": "page",
        "title": request.title.clone().unwrap_or_default(),
        "version": version,
        "body": {
            "storage": {
                "value": request.content,
                "representation": "storage",
            }
        }
    }))
}

fn classify_status(
    status: u16,
    body: String,
    document_id: &str,
    base_version: Option<u64>,
) -> StoreError {
    match (status, base_version) {
        (404, _) => StoreError::NotFound(document_id.to_string()),
        (409, Some(expected)) => StoreError::Conflict {
            document_id: document_id.to_string(),
            expected,
            found: None,
        },
        _ => StoreError::Http {
            status,
            body: body.chars().take(MAX_ERROR_BODY).collect(),
        },
    }
}

fn classify_transport(err: reqwest::Error) -> StoreError {
    if err.is_timeout() {
        StoreError::Timeout(err.to_string())
    } else if err.is_builder() {
        StoreError::InvalidRequest(err.to_string())
    } else if err.is_decode() {
        StoreError::InvalidResponse(err.to_string())
    } else {
        StoreError::Network(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store(base: &str) -> ConfluenceStore {
        ConfluenceStore::new(base, "token", Duration::from_secs(5), false).unwrap()
    }

    #[test]
    fn content_url_handles_trailing_slash_and_context_path() {
        assert_eq!(
            store("https://wiki.example.com/").content_url("123").unwrap().as_str(),
            "https://wiki.example.com/rest/api/content/123"
        );
        assert_eq!(
            store("https://example.com/confluence").content_url("123").unwrap().as_str(),
            "https://example.com/confluence/rest/api/content/123"
        );
    }

    #[test]
    fn content_url_escapes_path_characters() {
        let url = store("https://wiki.example.com").content_url("a/b?c").unwrap();
        assert_eq!(url.path(), "/rest/api/content/a%2Fb%3Fc");
        assert!(url.query().is_none());
    }

    #[test]
    fn payload_bumps_version_and_keeps_title() {
        let payload = put_payload(&WriteRequest {
            document_id: "123".into(),
            base_version: 41,
            content: "<p>new</p>".into(),
            title: Some("FM: Shipment profit".into()),
            message: Some("[FM 1.0.7] Updated section 3".into()),
        })
        .unwrap();
        assert_eq!(payload["version"]["number"], 42);
        assert_eq!(payload["version"]["message"], "[FM 1.0.7] Updated section 3");
        assert_eq!(payload["title"], "FM: Shipment profit");
        assert_eq!(payload["type"], "page");
        assert_eq!(payload["body"]["storage"]["value"], "<p>new</p>");
        assert_eq!(payload["body"]["storage"]["representation"], "storage");
    }

    #[test]
    fn payload_without_message_has_no_message_key() {
        let payload = put_payload(&WriteRequest {
            document_id: "123".into(),
            base_version: 1,
            content: String::new(),
            title: None,
            message: None,
        })
        .unwrap();
        assert!(payload["version"].get("message").is_none());
    }

    #[test]
    fn payload_rejects_version_that_cannot_be_incremented() {
        let err = put_payload(&WriteRequest {
            document_id: "123".into(),
            base_version: u64::MAX,
            content: String::new(),
            title: None,
            message: None,
        })
        .unwrap_err();
        assert!(matches!(err, StoreError::InvalidRequest(_)));
        assert!(!err.is_transient());
    }

    #[test]
    fn status_classification() {
        assert!(matches!(
            classify_status(409, String::new(), "123", Some(5)),
            StoreError::Conflict { expected: 5, found: None, .. }
        ));
        assert!(matches!(
            classify_status(404, String::new(), "123", None),
            StoreError::NotFound(_)
        ));
        let forbidden = classify_status(403, "no".into(), "123", Some(5));
        assert!(!forbidden.is_transient());
        assert!(classify_status(503, String::new(), "123", Some(5)).is_transient());
    }

    #[test]
    fn long_error_bodies_are_truncated() {
        let err = classify_status(500, "x".repeat(5000), "123", None);
        match err {
            StoreError::Http { body, .. } => assert_eq!(body.len(), MAX_ERROR_BODY),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn page_without_body_is_invalid() {
        let page: PageResponse =
            serde_json::from_str(r#"{"id":"123","title":"T","version":{"number":3}}"#).unwrap();
        assert!(matches!(
            page.into_document("123"),
            Err(StoreError::InvalidResponse(_))
        ));
    }

    #[test]
    fn page_parses_into_document() {
        let page: PageResponse = serde_json::from_str(
            r#"{"id":"123","type":"page","title":"FM","version":{"number":7,"message":"m"},
               "body":{"storage":{"value":"<p>A</p>","representation":"storage"}}}"#,
        )
        .unwrap();
        let doc = page.into_document("123").unwrap();
        assert_eq!(doc.version, 7);
        assert_eq!(doc.content, "<p>A</p>");
        assert_eq!(doc.title.as_deref(), Some("FM"));
    }
}
