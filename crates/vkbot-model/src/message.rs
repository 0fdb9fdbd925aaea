//! Community messages.
//!
//! VK nests messages: a message may forward others (`fwd_messages`) and reply
//! to one (`reply_message`), and each of those may nest again. The tree is
//! built by [`Message::from_value`] with an explicit depth limit; levels below
//! the limit are cut off and the message is marked [`Message::truncated`].

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

use crate::error::{ModelError, ModelResult};

/// Default limit for nested forwarded / replied messages.
pub const DEFAULT_MAX_NESTING_DEPTH: usize = 16;

/// Payload VK attaches to the "Start" button of a new conversation.
pub const START_PAYLOAD: &str = r#"{"command":"start"}"#;

// ============================================================================
// Attachment
// ============================================================================

/// A media attachment reference.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Attachment {
    /// Attachment type (`photo`, `doc`, `wall`, ...).
    pub kind: String,
    /// Owner of the attached object.
    pub owner_id: Option<i64>,
    /// Object id.
    pub id: Option<i64>,
    /// Access key for private objects.
    pub access_key: Option<String>,
    /// The type-specific object as sent by VK.
    pub body: Value,
}

impl Attachment {
    /// Reads `{"type": kind, kind: {...}}`.
    pub fn from_value(value: &Value) -> ModelResult<Self> {
        let kind = value
            .get("type")
            .and_then(Value::as_str)
            .ok_or_else(|| ModelError::malformed("attachment", "missing type"))?;
        let body = value.get(kind).cloned().unwrap_or(Value::Null);
        Ok(Self {
            kind: kind.to_string(),
            owner_id: body.get("owner_id").and_then(Value::as_i64),
            id: body.get("id").and_then(Value::as_i64),
            access_key: body
                .get("access_key")
                .and_then(Value::as_str)
                .map(str::to_string),
            body,
        })
    }

    /// The `photo123_456[_key]` form accepted by `messages.send`.
    pub fn reference(&self) -> Option<String> {
        let (owner_id, id) = (self.owner_id?, self.id?);
        Some(match &self.access_key {
            Some(key) => format!("{}{owner_id}_{id}_{key}", self.kind),
            None => format!("{}{owner_id}_{id}", self.kind),
        })
    }
}

// ============================================================================
// MessageAction
// ============================================================================

/// A service action in a chat (member joined, title changed, ...).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageAction {
    /// Action type, e.g. `chat_invite_user`. Dispatched as the event name.
    #[serde(rename = "type")]
    pub kind: String,
    /// Member the action concerns.
    #[serde(default)]
    pub member_id: Option<i64>,
    /// New chat title, for title changes.
    #[serde(default)]
    pub text: Option<String>,
    /// Invited email.
    #[serde(default)]
    pub email: Option<String>,
    /// New chat photo.
    #[serde(default)]
    pub photo: Option<Value>,
}

// ============================================================================
// Message
// ============================================================================

#[derive(Deserialize)]
struct RawMessage {
    #[serde(default)]
    id: i64,
    #[serde(default)]
    date: i64,
    #[serde(default)]
    peer_id: i64,
    #[serde(default)]
    from_id: i64,
    #[serde(default)]
    text: String,
    #[serde(default)]
    conversation_message_id: Option<i64>,
    #[serde(default)]
    payload: Option<String>,
    #[serde(default)]
    action: Option<MessageAction>,
    #[serde(default)]
    attachments: Vec<Value>,
    #[serde(default)]
    fwd_messages: Vec<Value>,
    #[serde(default)]
    reply_message: Option<Value>,
}

/// A message received by (or sent from) a community.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Message {
    /// Message id (0 for messages in chats the bot cannot see by id).
    pub id: i64,
    /// Unix time.
    pub date: i64,
    /// Conversation id.
    pub peer_id: i64,
    /// Author id (negative for communities).
    pub from_id: i64,
    /// Message text.
    pub text: String,
    /// Per-conversation message id.
    pub conversation_message_id: Option<i64>,
    /// Keyboard button payload.
    pub payload: Option<String>,
    /// Service action, if this is a service message.
    pub action: Option<MessageAction>,
    /// Media attachments.
    pub attachments: Vec<Attachment>,
    /// Forwarded messages.
    pub fwd_messages: Vec<Message>,
    /// The message this one replies to.
    pub reply_message: Option<Box<Message>>,
    /// `true` if nested messages were dropped by the depth limit.
    pub truncated: bool,
}

impl Message {
    /// Builds a message tree, keeping at most `max_depth` nested levels.
    pub fn from_value(value: &Value, max_depth: usize) -> ModelResult<Self> {
        Self::build(value, 0, max_depth)
    }

    fn build(value: &Value, depth: usize, max_depth: usize) -> ModelResult<Self> {
        let raw = RawMessage::deserialize(value).map_err(|e| ModelError::decode("message", e))?;

        let attachments = raw
            .attachments
            .iter()
            .map(Attachment::from_value)
            .collect::<ModelResult<Vec<_>>>()?;

        let nested = raw.fwd_messages.len() + usize::from(raw.reply_message.is_some());
        let (fwd_messages, reply_message, truncated) = if nested > 0 && depth >= max_depth {
            warn!(
                message_id = raw.id,
                depth, dropped = nested, "Nested messages exceed depth limit, truncating"
            );
            (Vec::new(), None, true)
        } else {
            let fwd = raw
                .fwd_messages
                .iter()
                .map(|m| Self::build(m, depth + 1, max_depth))
                .collect::<ModelResult<Vec<_>>>()?;
            let reply = raw
                .reply_message
                .as_ref()
                .map(|m| Self::build(m, depth + 1, max_depth).map(Box::new))
                .transpose()?;
            (fwd, reply, false)
        };

        Ok(Self {
            id: raw.id,
            date: raw.date,
            peer_id: raw.peer_id,
            from_id: raw.from_id,
            text: raw.text,
            conversation_message_id: raw.conversation_message_id,
            payload: raw.payload,
            action: raw.action,
            attachments,
            fwd_messages,
            reply_message,
            truncated,
        })
    }

    /// `true` for the first message of a conversation started with the
    /// "Start" button.
    pub fn is_conversation_start(&self) -> bool {
        self.payload.as_deref() == Some(START_PAYLOAD)
    }

    /// The service action type, if any.
    pub fn action_type(&self) -> Option<&str> {
        self.action.as_ref().map(|a| a.kind.as_str())
    }

    /// The event name this message is dispatched under.
    pub fn event_name(&self) -> &str {
        if self.is_conversation_start() {
            "conversation_start"
        } else if let Some(kind) = self.action_type() {
            kind
        } else {
            "message_new"
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn chain(levels: usize) -> Value {
        let mut msg = json!({"id": levels, "text": format!("level {levels}")});
        for level in (0..levels).rev() {
            msg = json!({"id": level, "text": format!("level {level}"), "fwd_messages": [msg]});
        }
        msg
    }

    fn depth_of(msg: &Message) -> usize {
        msg.fwd_messages.first().map_or(0, |m| 1 + depth_of(m))
    }

    #[test]
    fn test_plain_message() {
        let msg = Message::from_value(
            &json!({
                "id": 10, "date": 1700000000, "peer_id": 2000000001, "from_id": 42,
                "text": "hello",
                "attachments": [{"type": "photo", "photo": {"owner_id": -1, "id": 7, "access_key": "k"}}],
                "reply_message": {"id": 9, "text": "hi?"}
            }),
            DEFAULT_MAX_NESTING_DEPTH,
        )
        .unwrap();

        assert_eq!(msg.text, "hello");
        assert_eq!(msg.event_name(), "message_new");
        assert_eq!(msg.attachments[0].reference().as_deref(), Some("photo-1_7_k"));
        assert_eq!(msg.reply_message.as_ref().unwrap().text, "hi?");
        assert!(!msg.truncated);
    }

    #[test]
    fn test_event_name_variants() {
        let start = Message::from_value(&json!({"text": "", "payload": START_PAYLOAD}), 4).unwrap();
        assert_eq!(start.event_name(), "conversation_start");

        let action = Message::from_value(
            &json!({"text": "", "action": {"type": "chat_invite_user", "member_id": 5}}),
            4,
        )
        .unwrap();
        assert_eq!(action.event_name(), "chat_invite_user");
        assert_eq!(action.action.unwrap().member_id, Some(5));
    }

    #[test]
    fn test_nesting_is_truncated_at_limit() {
        let msg = Message::from_value(&chain(40), 16).unwrap();
        assert_eq!(depth_of(&msg), 16);

        let mut deepest = &msg;
        while let Some(next) = deepest.fwd_messages.first() {
            deepest = next;
        }
        assert!(deepest.truncated);
        assert!(!msg.truncated);

        let shallow = Message::from_value(&chain(3), 16).unwrap();
        assert_eq!(depth_of(&shallow), 3);
    }

    #[test]
    fn test_bad_attachment_is_an_error() {
        let err = Message::from_value(&json!({"attachments": [{"photo": {}}]}), 4).unwrap_err();
        assert!(matches!(err, ModelError::Malformed { what: "attachment", .. }));
    }
}
