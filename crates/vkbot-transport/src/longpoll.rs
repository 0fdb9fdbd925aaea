//! HTTP long-poll transport.
//!
//! One poll is a single `GET <server>?act=a_check&key=..&ts=..&wait=..`. It is
//! never retried here: a failed poll sends the ingestion loop back to
//! negotiation, which has its own retries.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tracing::{trace, warn};

use vkbot_core::{
    Cursor, PollBatch, PollError, PollTransport, Position, RawUpdate, TransportError,
};

use crate::http::{HttpClient, Method};

/// Default server-side wait of one poll.
pub const DEFAULT_WAIT: Duration = Duration::from_secs(10);

/// `mode` flags requested by user clients: attachments (2) and extended
/// events (8).
pub const USER_POLL_MODE: u32 = 10;

/// Shape of the updates returned by the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateFormat {
    /// Community long-poll: `{"type": .., "object": ..}` objects.
    Group,
    /// User long-poll: positional arrays.
    User,
}

impl UpdateFormat {
    fn decode(self, update: &Value) -> Option<RawUpdate> {
        match self {
            Self::Group => RawUpdate::from_group(update),
            Self::User => RawUpdate::from_user(update),
        }
    }
}

/// Decodes one poll response.
///
/// - `failed` present, or `ts` missing → [`PollError::CursorInvalid`]
/// - otherwise the new position and every decodable update, in order
pub fn parse_poll_response(body: &Value, format: UpdateFormat) -> Result<PollBatch, PollError> {
    if let Some(failed) = body.get("failed") {
        return Err(PollError::CursorInvalid {
            code: failed.as_i64(),
        });
    }
    let position = body
        .get("ts")
        .and_then(Position::from_value)
        .ok_or(PollError::CursorInvalid { code: None })?;

    let updates = body
        .get("updates")
        .and_then(Value::as_array)
        .map(|updates| {
            updates
                .iter()
                .filter_map(|update| {
                    let raw = format.decode(update);
                    if raw.is_none() {
                        warn!(update = %update, "Skipping undecodable long-poll update");
                    }
                    raw
                })
                .collect()
        })
        .unwrap_or_default();

    Ok(PollBatch { position, updates })
}

/// [`PollTransport`] over HTTP.
#[derive(Debug, Clone)]
pub struct HttpPollTransport {
    http: HttpClient,
    format: UpdateFormat,
    wait: Duration,
}

impl HttpPollTransport {
    /// Creates a transport for `format` with the default wait.
    pub fn new(http: HttpClient, format: UpdateFormat) -> Self {
        Self {
            http,
            format,
            wait: DEFAULT_WAIT,
        }
    }

    /// Sets how long the server may hold a poll open.
    pub fn with_wait(mut self, wait: Duration) -> Self {
        self.wait = wait;
        self
    }

    fn params(&self, cursor: &Cursor) -> Vec<(String, String)> {
        let mut params = vec![
            ("act".to_string(), "a_check".to_string()),
            ("key".to_string(), cursor.session_key().to_string()),
            ("ts".to_string(), cursor.position().to_string()),
            ("wait".to_string(), self.wait.as_secs().to_string()),
        ];
        if self.format == UpdateFormat::User {
            params.push(("mode".to_string(), USER_POLL_MODE.to_string()));
        }
        params
    }
}

#[async_trait]
impl PollTransport for HttpPollTransport {
    async fn poll(&self, cursor: &Cursor) -> Result<PollBatch, PollError> {
        trace!(position = %cursor.position(), "Polling");
        let body = match self
            .http
            .request_once(Method::Get, cursor.server(), &self.params(cursor))
            .await
        {
            Ok(body) => body,
            Err(TransportError::Timeout { .. }) => return Err(PollError::Timeout),
            Err(e) => return Err(e.into()),
        };
        let body = body.into_json(cursor.server())?;
        parse_poll_response(&body, self.format)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::HttpConfig;
    use serde_json::json;

    #[test]
    fn test_group_batch() {
        let batch = parse_poll_response(
            &json!({
                "ts": "7",
                "updates": [
                    {"type": "message_new", "object": {"message": {"text": "hello"}}},
                    {"no_type": true},
                    {"type": "group_join", "object": {"user_id": 1}}
                ]
            }),
            UpdateFormat::Group,
        )
        .unwrap();
        assert_eq!(batch.position, Position::new("7"));
        let types: Vec<&str> = batch.updates.iter().map(|u| u.event_type.as_str()).collect();
        assert_eq!(types, vec!["message_new", "group_join"]);
    }

    #[test]
    fn test_user_batch_and_empty_updates() {
        let batch = parse_poll_response(
            &json!({"ts": 1700, "updates": [[4, 1, 0, 2, 3, "", "hi"], [8, -5, 1]]}),
            UpdateFormat::User,
        )
        .unwrap();
        assert_eq!(batch.position.as_u64(), Some(1700));
        assert_eq!(batch.updates[1].event_type, "8");

        let empty = parse_poll_response(&json!({"ts": 1701}), UpdateFormat::User).unwrap();
        assert!(empty.updates.is_empty());
    }

    #[test]
    fn test_invalid_cursor_responses() {
        assert!(matches!(
            parse_poll_response(&json!({"failed": 2}), UpdateFormat::Group),
            Err(PollError::CursorInvalid { code: Some(2) })
        ));
        assert!(matches!(
            parse_poll_response(&json!({"failed": 1, "ts": 30}), UpdateFormat::Group),
            Err(PollError::CursorInvalid { code: Some(1) })
        ));
        assert!(matches!(
            parse_poll_response(&json!({"updates": []}), UpdateFormat::Group),
            Err(PollError::CursorInvalid { code: None })
        ));
    }

    #[test]
    fn test_user_poll_params() {
        let http = HttpClient::new(&HttpConfig::default()).unwrap();
        let transport = HttpPollTransport::new(http, UpdateFormat::User).with_wait(Duration::from_secs(25));
        let cursor = Cursor::new(Position::new("99"), "abc", "https://im.vk.com/nim1");
        let params = transport.params(&cursor);
        assert!(params.contains(&("ts".to_string(), "99".to_string())));
        assert!(params.contains(&("wait".to_string(), "25".to_string())));
        assert!(params.contains(&("mode".to_string(), "10".to_string())));
    }
}
