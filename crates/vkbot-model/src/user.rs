//! Messages seen by a user account.
//!
//! User long-poll updates are positional arrays. A new message is code `4`:
//!
//! ```text
//! [4, message_id, flags, peer_id, timestamp, <subject | text>, <text | extra>, attachments, ...]
//! ```
//!
//! Older protocol versions put a subject at index 5 and the text at index 6;
//! version 3 puts the text at index 5 and an extra-fields object at index 6.
//! Both layouts are accepted.

use std::fmt;
use std::ops::{BitAnd, BitOr};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{ModelError, ModelResult};
use crate::message::Attachment;

/// Event code of a new message in a user long-poll update.
pub const NEW_MESSAGE_CODE: i64 = 4;

/// Message flag bits of the user long-poll.
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserMessageFlags(u32);

impl UserMessageFlags {
    pub const UNREAD: Self = Self(1);
    pub const OUTBOX: Self = Self(2);
    pub const REPLIED: Self = Self(4);
    pub const IMPORTANT: Self = Self(8);
    pub const CHAT: Self = Self(16);
    pub const FRIENDS: Self = Self(32);
    pub const SPAM: Self = Self(64);
    pub const DELETED: Self = Self(128);
    pub const FIXED: Self = Self(256);
    pub const MEDIA: Self = Self(512);
    pub const HIDDEN: Self = Self(65536);
    pub const DELETE_FOR_ALL: Self = Self(131_072);
    pub const NOT_DELIVERED: Self = Self(262_144);

    const NAMED: [(&'static str, Self); 13] = [
        ("UNREAD", Self::UNREAD),
        ("OUTBOX", Self::OUTBOX),
        ("REPLIED", Self::REPLIED),
        ("IMPORTANT", Self::IMPORTANT),
        ("CHAT", Self::CHAT),
        ("FRIENDS", Self::FRIENDS),
        ("SPAM", Self::SPAM),
        ("DELETED", Self::DELETED),
        ("FIXED", Self::FIXED),
        ("MEDIA", Self::MEDIA),
        ("HIDDEN", Self::HIDDEN),
        ("DELETE_FOR_ALL", Self::DELETE_FOR_ALL),
        ("NOT_DELIVERED", Self::NOT_DELIVERED),
    ];

    /// Wraps raw flag bits.
    pub const fn from_bits(bits: u32) -> Self {
        Self(bits)
    }

    /// Raw flag bits.
    pub const fn bits(self) -> u32 {
        self.0
    }

    /// Returns `true` if every bit of `other` is set.
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }
}

impl BitOr for UserMessageFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl BitAnd for UserMessageFlags {
    type Output = Self;

    fn bitand(self, rhs: Self) -> Self {
        Self(self.0 & rhs.0)
    }
}

impl fmt::Debug for UserMessageFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = Self::NAMED
            .iter()
            .filter(|(_, flag)| self.contains(*flag))
            .map(|(name, _)| *name)
            .collect();
        write!(f, "UserMessageFlags({})", names.join(" | "))
    }
}

/// A message from the user long-poll.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UserMessage {
    /// Message id.
    pub id: i64,
    /// Flag bits.
    pub flags: UserMessageFlags,
    /// Conversation id.
    pub peer_id: i64,
    /// Unix time.
    pub date: i64,
    /// Message text.
    pub text: String,
    /// Raw attachments object (`attach1_type`, `attach1`, ...).
    pub attachments: Value,
    /// Full attachment objects, when they were fetched separately.
    pub resolved_attachments: Vec<Attachment>,
}

impl UserMessage {
    /// Decodes a code-4 update array.
    pub fn from_update(update: &Value) -> ModelResult<Self> {
        let fields = update
            .as_array()
            .ok_or_else(|| ModelError::malformed("user message", "update is not an array"))?;

        let int = |index: usize, name: &str| -> ModelResult<i64> {
            fields
                .get(index)
                .and_then(Value::as_i64)
                .ok_or_else(|| ModelError::malformed("user message", format!("missing {name}")))
        };

        let code = int(0, "event code")?;
        if code != NEW_MESSAGE_CODE {
            return Err(ModelError::malformed(
                "user message",
                format!("event code {code} is not a new message"),
            ));
        }

        let text = match (fields.get(5), fields.get(6)) {
            (_, Some(Value::String(text))) => text.clone(),
            (Some(Value::String(text)), _) => text.clone(),
            _ => String::new(),
        };

        let flags = u32::try_from(int(2, "flags")?)
            .map_err(|_| ModelError::malformed("user message", "flags out of range"))?;

        Ok(Self {
            id: int(1, "message id")?,
            flags: UserMessageFlags::from_bits(flags),
            peer_id: int(3, "peer id")?,
            date: int(4, "timestamp")?,
            text,
            attachments: fields.get(7).cloned().unwrap_or(Value::Null),
            resolved_attachments: Vec::new(),
        })
    }

    /// `true` if the raw attachments object announces any attachment.
    pub fn has_attachments(&self) -> bool {
        self.attachments
            .as_object()
            .is_some_and(|object| object.keys().any(|key| key.starts_with("attach")))
    }

    /// `true` if the account itself sent the message.
    pub fn is_outgoing(&self) -> bool {
        self.flags.contains(UserMessageFlags::OUTBOX)
    }
}
