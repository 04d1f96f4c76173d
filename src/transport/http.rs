use std::sync::Arc;
use std::time::Duration;

use reqwest::{Client, Method, RequestBuilder, Response, StatusCode};

use super::auth::TokenSource;
use super::{TransportError, ENDPOINT_RETRY};

/// A remote service reached over HTTP.
///
/// Every request carries the configured timeout and, when a token source is
/// set, a fresh bearer token.
#[derive(Clone)]
pub struct HttpPeer {
    client: Client,
    base_url: String,
    tokens: Option<Arc<dyn TokenSource>>,
}

impl HttpPeer {
    pub fn new(
        base_url: &str,
        timeout: Duration,
        tokens: Option<Arc<dyn TokenSource>>,
    ) -> Result<Self, TransportError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| TransportError::Build(format!("failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            tokens,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Start a request against `path`, with auth already attached.
    pub fn request(&self, method: Method, path: &str) -> Result<RequestBuilder, TransportError> {
        let mut request = self.client.request(method, self.url(path));
        if let Some(tokens) = &self.tokens {
            request = request.bearer_auth(tokens.token()?);
        }
        Ok(request)
    }

    /// Send and require `200 OK`, returning the response for the body.
    pub async fn send(&self, request: RequestBuilder) -> Result<Response, TransportError> {
        let response = request.send().await?;
        if response.status() != StatusCode::OK {
            return Err(status_error(response).await);
        }
        Ok(response)
    }

    /// Ask the peer to re-run its startup recovery.
    pub async fn trigger_retry(&self) -> Result<(), TransportError> {
        let request = self.request(Method::POST, ENDPOINT_RETRY)?;
        self.send(request).await?;
        Ok(())
    }
}

pub(crate) async fn status_error(response: Response) -> TransportError {
    let status = response.status().as_u16();
    let body = response.text().await.unwrap_or_default();
    TransportError::Status { status, body }
}
