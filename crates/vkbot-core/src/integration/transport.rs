//! Long-poll transport abstractions.
//!
//! The ingestion loop talks to the network through two traits only:
//!
//! - [`SessionNegotiator`] exchanges credentials for a fresh [`Cursor`].
//! - [`PollTransport`] performs one blocking poll with a cursor.
//!
//! Concrete HTTP implementations live in `vkbot-transport`; tests use
//! in-memory ones.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::foundation::cursor::{Cursor, Position};
use crate::foundation::error::{PollError, SessionResult};

/// One undecoded update from a poll batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawUpdate {
    /// Group updates: the `type` field. User updates: the numeric event code.
    pub event_type: String,
    /// Group updates: the `object` field. User updates: the whole array.
    pub payload: Value,
}

impl RawUpdate {
    /// Creates a raw update.
    pub fn new(event_type: impl Into<String>, payload: Value) -> Self {
        Self {
            event_type: event_type.into(),
            payload,
        }
    }

    /// Reads a group (bot) update: `{"type": ..., "object": ...}`.
    pub fn from_group(update: &Value) -> Option<Self> {
        let event_type = update.get("type")?.as_str()?;
        let payload = update.get("object").cloned().unwrap_or(Value::Null);
        Some(Self::new(event_type, payload))
    }

    /// Reads a user update: `[code, ...fields]`.
    pub fn from_user(update: &Value) -> Option<Self> {
        let code = update.as_array()?.first()?.as_i64()?;
        Some(Self::new(code.to_string(), update.clone()))
    }
}

/// The result of one successful poll.
#[derive(Debug, Clone, PartialEq)]
pub struct PollBatch {
    /// Position to poll from next.
    pub position: Position,
    /// Updates in server order.
    pub updates: Vec<RawUpdate>,
}

impl PollBatch {
    /// An empty batch at `position`.
    pub fn empty(position: Position) -> Self {
        Self {
            position,
            updates: Vec::new(),
        }
    }
}

/// Performs long-poll requests.
#[async_trait]
pub trait PollTransport: Send + Sync {
    /// Polls once with `cursor`.
    ///
    /// [`PollError::Timeout`] means the local wait expired; the loop treats
    /// it as an empty batch and keeps its position.
    async fn poll(&self, cursor: &Cursor) -> Result<PollBatch, PollError>;
}

/// Obtains long-poll sessions.
#[async_trait]
pub trait SessionNegotiator: Send + Sync {
    /// Negotiates a fresh cursor. Safe to call repeatedly.
    async fn negotiate(&self) -> SessionResult<Cursor>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_group_update_envelope() {
        let update = json!({
            "type": "message_new",
            "object": {"message": {"text": "hi"}},
            "group_id": 1
        });
        let raw = RawUpdate::from_group(&update).unwrap();
        assert_eq!(raw.event_type, "message_new");
        assert_eq!(raw.payload["message"]["text"], "hi");

        assert!(RawUpdate::from_group(&json!({"object": {}})).is_none());
    }

    #[test]
    fn test_user_update_envelope() {
        let update = json!([4, 1234, 1, 2000000001, 1700000000, "hello"]);
        let raw = RawUpdate::from_user(&update).unwrap();
        assert_eq!(raw.event_type, "4");
        assert_eq!(raw.payload, update);

        assert!(RawUpdate::from_user(&json!([])).is_none());
        assert!(RawUpdate::from_user(&json!({"type": "x"})).is_none());
    }
}
