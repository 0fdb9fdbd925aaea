//! HTTP client with a fixed retry schedule.

use std::fmt;

use reqwest::header::CONTENT_TYPE;
use reqwest::{Client, ClientBuilder, Response};
use serde_json::Value;
use tracing::{trace, warn};

use vkbot_core::{TransportError, TransportResult};

use crate::config::HttpConfig;

/// Request method.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    /// Parameters in the query string.
    Get,
    /// Parameters as a form body.
    Post,
}

/// A response body: JSON when the server says so, text otherwise.
#[derive(Debug, Clone, PartialEq)]
pub enum ResponseBody {
    /// `application/json` body.
    Json(Value),
    /// Any other body.
    Text(String),
}

impl ResponseBody {
    /// Returns the JSON value, or an error naming `url` for text bodies.
    pub fn into_json(self, url: &str) -> TransportResult<Value> {
        match self {
            Self::Json(value) => Ok(value),
            Self::Text(text) => Err(TransportError::InvalidResponse {
                url: url.to_string(),
                reason: format!("expected JSON, got text: {}", truncate(&text, 200)),
            }),
        }
    }
}

fn truncate(text: &str, max: usize) -> &str {
    match text.char_indices().nth(max) {
        Some((index, _)) => &text[..index],
        None => text,
    }
}

/// Shared HTTP client.
///
/// Cloning is cheap; clones share the connection pool.
#[derive(Clone)]
pub struct HttpClient {
    client: Client,
    retry_attempts: u32,
}

impl HttpClient {
    /// Builds a client from `config`.
    pub fn new(config: &HttpConfig) -> TransportResult<Self> {
        let mut builder = ClientBuilder::new()
            .timeout(config.total_timeout)
            .connect_timeout(config.connect_timeout);
        if let Some(user_agent) = &config.user_agent {
            builder = builder.user_agent(user_agent.clone());
        }
        let client = builder
            .build()
            .map_err(|e| TransportError::InvalidConfig(e.to_string()))?;

        Ok(Self {
            client,
            retry_attempts: config.retry_attempts.max(1),
        })
    }

    /// Sends one request, without retries.
    pub async fn request_once(
        &self,
        method: Method,
        url: &str,
        params: &[(String, String)],
    ) -> TransportResult<ResponseBody> {
        let request = match method {
            Method::Get => self.client.get(url).query(params),
            Method::Post => self.client.post(url).form(params),
        };
        let response = request.send().await.map_err(|e| map_error(url, &e))?;
        read_body(url, response).await
    }

    /// Sends a request, retrying failures on the configured schedule.
    ///
    /// The wait after failed attempt `n` is `2n + 1` seconds.
    pub async fn request(
        &self,
        method: Method,
        url: &str,
        params: &[(String, String)],
    ) -> TransportResult<ResponseBody> {
        let mut last_error = None;
        for attempt in 0..self.retry_attempts {
            match self.request_once(method, url, params).await {
                Ok(body) => return Ok(body),
                Err(e) => {
                    let delay = HttpConfig::retry_delay(attempt);
                    warn!(
                        url = %url,
                        attempt = attempt + 1,
                        error = %e,
                        "Got exception in request, retrying in {}s",
                        delay.as_secs()
                    );
                    last_error = Some(e);
                    tokio::time::sleep(delay).await;
                }
            }
        }
        Err(TransportError::RetriesExhausted {
            url: url.to_string(),
            attempts: self.retry_attempts,
            reason: last_error.map(|e| e.to_string()).unwrap_or_default(),
        })
    }
}

impl fmt::Debug for HttpClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpClient")
            .field("retry_attempts", &self.retry_attempts)
            .finish_non_exhaustive()
    }
}

fn map_error(url: &str, error: &reqwest::Error) -> TransportError {
    if error.is_timeout() {
        TransportError::Timeout {
            url: url.to_string(),
        }
    } else {
        TransportError::RequestFailed {
            url: url.to_string(),
            reason: error.to_string(),
        }
    }
}

async fn read_body(url: &str, response: Response) -> TransportResult<ResponseBody> {
    let is_json = response
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.starts_with("application/json"));
    let status = response.status();
    let text = response.text().await.map_err(|e| map_error(url, &e))?;
    trace!(url = %url, status = status.as_u16(), len = text.len(), "Response received");

    if !is_json {
        return Ok(ResponseBody::Text(text));
    }
    serde_json::from_str(&text)
        .map(ResponseBody::Json)
        .map_err(|e| TransportError::InvalidResponse {
            url: url.to_string(),
            reason: e.to_string(),
        })
}
