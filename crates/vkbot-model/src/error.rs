//! Decoding errors.

use thiserror::Error;

/// Failure to build a typed object from a raw payload.
#[derive(Debug, Error)]
pub enum ModelError {
    /// The payload did not match the expected JSON shape.
    #[error("failed to decode {what}: {source}")]
    Decode {
        /// What was being decoded.
        what: &'static str,
        /// Underlying serde error.
        #[source]
        source: serde_json::Error,
    },

    /// A positional (array) payload was too short or had a wrong element.
    #[error("malformed {what}: {reason}")]
    Malformed {
        /// What was being decoded.
        what: &'static str,
        /// What was wrong.
        reason: String,
    },
}

impl ModelError {
    pub(crate) fn decode(what: &'static str, source: serde_json::Error) -> Self {
        Self::Decode { what, source }
    }

    pub(crate) fn malformed(what: &'static str, reason: impl Into<String>) -> Self {
        Self::Malformed {
            what,
            reason: reason.into(),
        }
    }
}

/// Result type for model decoding.
pub type ModelResult<T> = Result<T, ModelError>;
