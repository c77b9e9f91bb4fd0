//! REST provider adapter.
//!
//! Speaks a small JSON API:
//! - `POST   {endpoint}/v1/{kind}`       create, body `{name, inputs}`
//! - `GET    {endpoint}/v1/{kind}/{id}`  read
//! - `PUT    {endpoint}/v1/{kind}/{id}`  update, body `{inputs}`
//! - `DELETE {endpoint}/v1/{kind}/{id}`  delete
//!
//! Responses carry `{id, outputs}`. HTTP status codes are mapped onto
//! [`ProviderError`] so the retry policy can tell transient from permanent.

use async_trait::async_trait;
use reqwest::{header, Client, Response, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, trace};

use crate::error::ProviderError;
use crate::resource::{InputMap, ResourceKind};

use super::adapter::{Provider, ProviderResource};

/// Default request timeout in seconds.
const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// HTTP provider adapter.
#[derive(Debug, Clone)]
pub struct HttpProvider {
    /// HTTP client.
    client: Client,
    /// Base URL without trailing slash.
    endpoint: String,
    /// Bearer token.
    token: Option<String>,
}

#[derive(Debug, Serialize)]
struct CreateRequest<'a> {
    name: &'a str,
    inputs: &'a InputMap,
}

#[derive(Debug, Serialize)]
struct UpdateRequest<'a> {
    inputs: &'a InputMap,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(alias = "error")]
    message: String,
}

impl HttpProvider {
    /// Creates an adapter for `endpoint`.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be created.
    pub fn new(endpoint: &str, token: Option<String>) -> Result<Self, ProviderError> {
        Self::with_timeout(endpoint, token, DEFAULT_TIMEOUT_SECS)
    }

    /// Creates an adapter with a custom request timeout.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be created.
    pub fn with_timeout(
        endpoint: &str,
        token: Option<String>,
        timeout_secs: u64,
    ) -> Result<Self, ProviderError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| ProviderError::network(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            client,
            endpoint: endpoint.trim_end_matches('/').to_string(),
            token,
        })
    }

    fn collection_url(&self, kind: ResourceKind) -> String {
        format!("{}/v1/{kind}", self.endpoint)
    }

    fn item_url(&self, kind: ResourceKind, id: &str) -> String {
        format!("{}/v1/{kind}/{id}", self.endpoint)
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        let request = request.header(header::ACCEPT, "application/json");
        match &self.token {
            Some(token) => request.header(header::AUTHORIZATION, format!("Bearer {token}")),
            None => request,
        }
    }

    async fn send(&self, request: reqwest::RequestBuilder) -> Result<Response, ProviderError> {
        self.authorize(request)
            .send()
            .await
            .map_err(|e| ProviderError::network(format!("Request failed: {e}")))
    }

    async fn parse_resource(response: Response) -> Result<ProviderResource, ProviderError> {
        response
            .json::<ProviderResource>()
            .await
            .map_err(|e| ProviderError::InvalidResponse {
                message: format!("Failed to parse response: {e}"),
            })
    }

    /// Maps a non-success response to an error.
    async fn failure(kind: ResourceKind, id: Option<&str>, response: Response) -> ProviderError {
        let status = response.status();
        let retry_after = response
            .headers()
            .get(header::RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.trim().parse().ok());
        let body = response.text().await.unwrap_or_default();
        let message = serde_json::from_str::<ErrorBody>(&body)
            .map(|b| b.message)
            .unwrap_or(body);
        classify_status(status, retry_after, message, kind, id)
    }
}

/// Maps an HTTP status to the provider error taxonomy.
#[must_use]
pub fn classify_status(
    status: StatusCode,
    retry_after_secs: Option<u64>,
    message: String,
    kind: ResourceKind,
    id: Option<&str>,
) -> ProviderError {
    match status.as_u16() {
        429 => ProviderError::Throttled {
            message,
            retry_after_secs,
        },
        400 | 422 => ProviderError::InvalidParameters { message },
        401 | 403 => ProviderError::Unauthorized { message },
        404 => ProviderError::NotFound {
            kind: kind.to_string(),
            id: id.unwrap_or_default().to_string(),
        },
        code if status.is_server_error() => ProviderError::Unavailable {
            status: code,
            message,
        },
        code => ProviderError::api_error(code, message),
    }
}

#[async_trait]
impl Provider for HttpProvider {
    fn name(&self) -> &'static str {
        "http"
    }

    async fn create(
        &self,
        kind: ResourceKind,
        name: &str,
        inputs: &InputMap,
    ) -> Result<ProviderResource, ProviderError> {
        debug!("POST {} ({name})", self.collection_url(kind));
        let request = self
            .client
            .post(self.collection_url(kind))
            .json(&CreateRequest { name, inputs });
        let response = self.send(request).await?;
        if !response.status().is_success() {
            return Err(Self::failure(kind, None, response).await);
        }
        Self::parse_resource(response).await
    }

    async fn read(&self, kind: ResourceKind, id: &str) -> Result<Option<ProviderResource>, ProviderError> {
        trace!("GET {}", self.item_url(kind, id));
        let response = self.send(self.client.get(self.item_url(kind, id))).await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(Self::failure(kind, Some(id), response).await);
        }
        Self::parse_resource(response).await.map(Some)
    }

    async fn update(
        &self,
        kind: ResourceKind,
        id: &str,
        _old: &InputMap,
        new: &InputMap,
    ) -> Result<ProviderResource, ProviderError> {
        debug!("PUT {}", self.item_url(kind, id));
        let request = self
            .client
            .put(self.item_url(kind, id))
            .json(&UpdateRequest { inputs: new });
        let response = self.send(request).await?;
        if !response.status().is_success() {
            return Err(Self::failure(kind, Some(id), response).await);
        }
        Self::parse_resource(response).await
    }

    async fn delete(&self, kind: ResourceKind, id: &str) -> Result<(), ProviderError> {
        debug!("DELETE {}", self.item_url(kind, id));
        let response = self.send(self.client.delete(self.item_url(kind, id))).await?;
        let status = response.status();
        if status.is_success() || status == StatusCode::NOT_FOUND {
            return Ok(());
        }
        Err(Self::failure(kind, Some(id), response).await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, header as header_eq, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn inputs() -> InputMap {
        InputMap::from([(String::from("cidr_block"), json!("10.0.0.0/16"))])
    }

    #[test]
    fn test_status_classification() {
        let kind = ResourceKind::Vpc;
        let classify = |code: u16| {
            classify_status(
                StatusCode::from_u16(code).unwrap(),
                None,
                String::from("x"),
                kind,
                Some("vpc-1"),
            )
        };

        assert!(matches!(classify(429), ProviderError::Throttled { .. }));
        assert!(matches!(classify(503), ProviderError::Unavailable { status: 503, .. }));
        assert!(matches!(classify(400), ProviderError::InvalidParameters { .. }));
        assert!(matches!(classify(422), ProviderError::InvalidParameters { .. }));
        assert!(matches!(classify(403), ProviderError::Unauthorized { .. }));
        assert!(matches!(classify(404), ProviderError::NotFound { .. }));
        assert!(matches!(classify(409), ProviderError::Api { status: 409, .. }));
        assert!(classify(502).is_transient());
        assert!(!classify(409).is_transient());
    }

    #[tokio::test]
    async fn test_create_sends_bearer_token() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/vpc"))
            .and(header_eq("authorization", "Bearer secret-token"))
            .and(body_partial_json(json!({"name": "net", "inputs": {"cidr_block": "10.0.0.0/16"}})))
            .respond_with(
                ResponseTemplate::new(201).set_body_json(json!({"id": "vpc-42", "outputs": {"arn": "arn:vpc-42"}})),
            )
            .mount(&server)
            .await;

        let provider = HttpProvider::new(&server.uri(), Some(String::from("secret-token"))).unwrap();
        let created = provider.create(ResourceKind::Vpc, "net", &inputs()).await.unwrap();
        assert_eq!(created.id, "vpc-42");
        assert_eq!(created.outputs["arn"], json!("arn:vpc-42"));
    }

    #[tokio::test]
    async fn test_throttling_carries_retry_after() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/vpc"))
            .respond_with(
                ResponseTemplate::new(429)
                    .insert_header("retry-after", "3")
                    .set_body_json(json!({"message": "slow down"})),
            )
            .mount(&server)
            .await;

        let provider = HttpProvider::new(&server.uri(), None).unwrap();
        let err = provider.create(ResourceKind::Vpc, "net", &inputs()).await.unwrap_err();
        assert_eq!(
            err,
            ProviderError::Throttled {
                message: String::from("slow down"),
                retry_after_secs: Some(3),
            }
        );
    }

    #[tokio::test]
    async fn test_read_missing_returns_none() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/instance/i-gone"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let provider = HttpProvider::new(&server.uri(), None).unwrap();
        let read = provider.read(ResourceKind::Instance, "i-gone").await.unwrap();
        assert!(read.is_none());
    }

    #[tokio::test]
    async fn test_delete_tolerates_missing() {
        let server = MockServer::start().await;
        Mock::given(method("DELETE"))
            .and(path("/v1/subnet/subnet-1"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let provider = HttpProvider::new(&server.uri(), None).unwrap();
        assert!(provider.delete(ResourceKind::Subnet, "subnet-1").await.is_ok());
    }

    #[tokio::test]
    async fn test_update_server_error_is_transient() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path("/v1/vpc/vpc-1"))
            .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
            .mount(&server)
            .await;

        let provider = HttpProvider::new(&server.uri(), None).unwrap();
        let err = provider
            .update(ResourceKind::Vpc, "vpc-1", &inputs(), &inputs())
            .await
            .unwrap_err();
        assert!(err.is_transient());
        assert!(err.to_string().contains("boom"));
    }
}
