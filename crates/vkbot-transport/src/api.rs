//! VK API method calls.
//!
//! # Overview
//!
//! Code that needs the API holds an `Arc<dyn ApiCaller>` and never sees
//! tokens, versions or HTTP. [`VkApi`] is the network implementation:
//!
//! 1. Adds `access_token` and `v` to the parameters.
//! 2. POSTs `https://api.vk.com/method/<method>` through the retrying
//!    [`HttpClient`].
//! 3. Unwraps `response`, or turns `error` into [`ApiError::Vk`].
//!
//! Two API errors are transient and retried in place, without surfacing:
//!
//! | Code | Meaning | Wait |
//! |------|---------|------|
//! | 6 | too many requests per second | 1s |
//! | 10 | "could not check access_token now" | 100ms |

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Map, Value};
use tracing::{debug, trace};

use vkbot_core::{ApiError, ApiResult};

use crate::config::DEFAULT_API_BASE;
use crate::http::{HttpClient, Method, encode_params};

/// Error code: user authorization failed (token revoked or invalid).
pub const ERROR_AUTH_FAILED: i64 = 5;
/// Error code: too many requests per second.
pub const ERROR_TOO_MANY_REQUESTS: i64 = 6;
/// Error code: internal server error.
pub const ERROR_INTERNAL: i64 = 10;
/// Error code: access denied.
pub const ERROR_ACCESS_DENIED: i64 = 15;
/// Error code: a required parameter is invalid or long-poll is disabled.
pub const ERROR_INVALID_PARAMETER: i64 = 100;

// =============================================================================
// ApiCaller trait
// =============================================================================

/// Makes VK API method calls.
#[async_trait]
pub trait ApiCaller: Send + Sync {
    /// Calls `method` with a JSON object of parameters and returns the
    /// `response` value.
    async fn call(&self, method: &str, params: Value) -> ApiResult<Value>;
}

/// Extracts the result of one API envelope.
pub fn unwrap_envelope(method: &str, envelope: Value) -> ApiResult<Value> {
    let Value::Object(mut envelope) = envelope else {
        return Err(ApiError::Decode(format!(
            "method '{method}' returned a non-object envelope"
        )));
    };
    if let Some(error) = envelope.get("error") {
        return Err(ApiError::Vk {
            code: error.get("error_code").and_then(Value::as_i64).unwrap_or(0),
            message: error
                .get("error_msg")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
        });
    }
    envelope
        .remove("response")
        .ok_or_else(|| ApiError::MissingResponse {
            method: method.to_string(),
        })
}

/// Returns how long to wait before repeating a call that failed with
/// `error`, or `None` if the failure is not transient.
pub fn transient_delay(error: &ApiError) -> Option<Duration> {
    match error {
        ApiError::Vk { code, .. } if *code == ERROR_TOO_MANY_REQUESTS => {
            Some(Duration::from_secs(1))
        }
        ApiError::Vk { code, message }
            if *code == ERROR_INTERNAL && message.contains("could not check access_token now") =>
        {
            Some(Duration::from_millis(100))
        }
        _ => None,
    }
}

// =============================================================================
// VkApi
// =============================================================================

/// [`ApiCaller`] over HTTPS.
#[derive(Clone)]
pub struct VkApi {
    http: HttpClient,
    token: String,
    version: String,
    base_url: String,
}

impl VkApi {
    /// Creates a caller using `token` and API `version`.
    pub fn new(http: HttpClient, token: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            http,
            token: token.into(),
            version: version.into(),
            base_url: DEFAULT_API_BASE.to_string(),
        }
    }

    /// Overrides the API base URL.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// The API version sent with every call.
    pub fn version(&self) -> &str {
        &self.version
    }

    fn payload(&self, params: &Value) -> Vec<(String, String)> {
        let mut pairs = encode_params(params);
        pairs.push(("access_token".to_string(), self.token.clone()));
        pairs.push(("v".to_string(), self.version.clone()));
        pairs
    }
}

#[async_trait]
impl ApiCaller for VkApi {
    async fn call(&self, method: &str, params: Value) -> ApiResult<Value> {
        let params = if params.is_null() {
            Value::Object(Map::new())
        } else {
            params
        };
        let url = format!("{}{method}", self.base_url);
        let payload = self.payload(&params);

        loop {
            trace!(method, "Calling API method");
            let envelope = self
                .http
                .request(Method::Post, &url, &payload)
                .await?
                .into_json(&url)?;

            match unwrap_envelope(method, envelope) {
                Err(error) => match transient_delay(&error) {
                    Some(delay) => {
                        debug!(method, error = %error, ?delay, "Transient API error, repeating call");
                        tokio::time::sleep(delay).await;
                    }
                    None => return Err(error),
                },
                ok => return ok,
            }
        }
    }
}

impl fmt::Debug for VkApi {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VkApi")
            .field("version", &self.version)
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::HttpConfig;
    use serde_json::json;

    #[test]
    fn test_unwrap_envelope() {
        assert_eq!(
            unwrap_envelope("users.get", json!({"response": [{"id": 1}]})).unwrap(),
            json!([{"id": 1}])
        );

        let err = unwrap_envelope(
            "groups.getLongPollServer",
            json!({"error": {"error_code": 100, "error_msg": "long poll disabled"}}),
        )
        .unwrap_err();
        assert_eq!(err.code(), Some(100));

        assert!(matches!(
            unwrap_envelope("users.get", json!({})),
            Err(ApiError::MissingResponse { .. })
        ));
        assert!(matches!(
            unwrap_envelope("users.get", json!("oops")),
            Err(ApiError::Decode(_))
        ));
    }

    #[test]
    fn test_transient_errors() {
        let flood = ApiError::Vk {
            code: 6,
            message: "Too many requests per second".into(),
        };
        assert_eq!(transient_delay(&flood), Some(Duration::from_secs(1)));

        let token_check = ApiError::Vk {
            code: 10,
            message: "Internal server error: could not check access_token now, check later."
                .into(),
        };
        assert_eq!(transient_delay(&token_check), Some(Duration::from_millis(100)));

        let other_internal = ApiError::Vk {
            code: 10,
            message: "Internal server error".into(),
        };
        assert_eq!(transient_delay(&other_internal), None);
        assert_eq!(transient_delay(&ApiError::Decode("x".into())), None);
    }

    #[test]
    fn test_payload_carries_credentials() {
        let api = VkApi::new(HttpClient::new(&HttpConfig::default()).unwrap(), "secret", "5.131");
        let payload = api.payload(&json!({"user_ids": [1, 2]}));
        assert!(payload.contains(&("user_ids".to_string(), "1,2".to_string())));
        assert!(payload.contains(&("access_token".to_string(), "secret".to_string())));
        assert!(payload.contains(&("v".to_string(), "5.131".to_string())));
        assert!(!format!("{api:?}").contains("secret"));
    }
}
