//! Long-poll cursor.
//!
//! A [`Cursor`] is the opaque polling position (`ts`) plus the transient
//! session credentials (`key`, `server`) needed to issue the next poll. It is
//! owned by a single ingestion loop and replaced wholesale whenever the
//! session is renegotiated; between negotiations only the position moves.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::trace;

/// Opaque long-poll position.
///
/// VK reports `ts` either as a number or as a numeric string depending on the
/// endpoint; both are kept verbatim as a string.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Position(String);

impl Position {
    /// Creates a position from its textual form.
    pub fn new(ts: impl Into<String>) -> Self {
        Self(ts.into())
    }

    /// Reads a position from a JSON `ts` value.
    pub fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::String(s) if !s.is_empty() => Some(Self(s.clone())),
            Value::Number(n) => Some(Self(n.to_string())),
            _ => None,
        }
    }

    /// Returns the textual form sent back to the server.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns the numeric value when the position is numeric.
    pub fn as_u64(&self) -> Option<u64> {
        self.0.parse().ok()
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Polling position plus the session it belongs to.
#[derive(Clone, PartialEq, Eq)]
pub struct Cursor {
    position: Position,
    session_key: String,
    server: String,
}

impl Cursor {
    /// Creates a cursor from a freshly negotiated session.
    ///
    /// Escaped slashes (`\/`) in the server address are unescaped.
    pub fn new(position: Position, session_key: impl Into<String>, server: &str) -> Self {
        Self {
            position,
            session_key: session_key.into(),
            server: server.replace(r"\/", "/"),
        }
    }

    /// Current polling position.
    pub fn position(&self) -> &Position {
        &self.position
    }

    /// Session key issued by the negotiation.
    pub fn session_key(&self) -> &str {
        &self.session_key
    }

    /// Long-poll server address.
    pub fn server(&self) -> &str {
        &self.server
    }

    /// Adopts the position returned by a successful poll.
    pub fn advance(&mut self, position: Position) {
        if let (Some(old), Some(new)) = (self.position.as_u64(), position.as_u64())
            && new < old
        {
            trace!(old, new, "Long-poll position moved backwards, adopting anyway");
        }
        self.position = position;
    }
}

// The session key is a credential; keep it out of logs.
impl fmt::Debug for Cursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Cursor")
            .field("position", &self.position)
            .field("server", &self.server)
            .finish_non_exhaustive()
    }
}
