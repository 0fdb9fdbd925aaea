//! Unified error types for the vkbot core.
//!
//! Every layer of the client reports failures through one of these enums.
//! Errors produced by application code (handlers, predicates, hydration) are
//! carried as [`anyhow::Error`] and never mixed into this taxonomy.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

// =============================================================================
// Transport Errors
// =============================================================================

/// Network-level failures of a single HTTP exchange.
#[derive(Debug, Clone, Error)]
pub enum TransportError {
    /// The request could not be completed.
    #[error("request to {url} failed: {reason}")]
    RequestFailed {
        /// The URL that was requested.
        url: String,
        /// Reason for failure.
        reason: String,
    },

    /// The request did not complete within its timeout.
    #[error("request to {url} timed out")]
    Timeout {
        /// The URL that was requested.
        url: String,
    },

    /// Every retry attempt failed.
    #[error("request to {url} failed after {attempts} attempts: {reason}")]
    RetriesExhausted {
        /// The URL that was requested.
        url: String,
        /// Number of attempts made.
        attempts: u32,
        /// Reason for the last failure.
        reason: String,
    },

    /// The peer answered with something that cannot be interpreted.
    #[error("unexpected response from {url}: {reason}")]
    InvalidResponse {
        /// The URL that was requested.
        url: String,
        /// What was wrong with the response.
        reason: String,
    },

    /// Invalid configuration.
    #[error("invalid transport configuration: {0}")]
    InvalidConfig(String),
}

// =============================================================================
// API Errors
// =============================================================================

/// Errors returned by VK API method calls.
#[derive(Debug, Clone, Error)]
pub enum ApiError {
    /// The API answered with an `error` object.
    #[error("VK API error [{code}] {message}")]
    Vk {
        /// VK error code.
        code: i64,
        /// Human-readable message from VK.
        message: String,
    },

    /// The API answered without `response` or `error`.
    #[error("method '{method}' returned no response")]
    MissingResponse {
        /// The called method.
        method: String,
    },

    /// The response did not have the expected shape.
    #[error("failed to decode response: {0}")]
    Decode(String),

    /// Transport error.
    #[error(transparent)]
    Transport(#[from] TransportError),
}

impl ApiError {
    /// Returns the VK error code, if this is an API-level error.
    pub fn code(&self) -> Option<i64> {
        match self {
            Self::Vk { code, .. } => Some(*code),
            _ => None,
        }
    }

    /// Returns `true` for a rejected token (5) or a denied method (15).
    pub fn is_auth_failure(&self) -> bool {
        matches!(self.code(), Some(5 | 15))
    }
}

impl From<serde_json::Error> for ApiError {
    fn from(err: serde_json::Error) -> Self {
        Self::Decode(err.to_string())
    }
}

// =============================================================================
// Long-poll Errors
// =============================================================================

/// Failures of a single long-poll request.
#[derive(Debug, Clone, Error)]
pub enum PollError {
    /// The local wait expired before the server answered.
    #[error("long-poll request timed out")]
    Timeout,

    /// The server rejected the cursor (`failed` in the response, or no `ts`).
    #[error("long-poll cursor rejected (failed = {code:?})")]
    CursorInvalid {
        /// The `failed` code reported by the server, when present.
        code: Option<i64>,
    },

    /// Transport error.
    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// Failures while exchanging credentials for a fresh cursor.
#[derive(Debug, Clone, Error)]
pub enum SessionError {
    /// Long-poll is disabled remotely and cannot be repaired.
    #[error("long-poll configuration error: {0}")]
    Configuration(String),

    /// The credentials cannot be used for this client variant.
    #[error("authorization error: {0}")]
    Auth(String),

    /// The API rejected the negotiation call.
    #[error(transparent)]
    Api(#[from] ApiError),

    /// Transport error.
    #[error(transparent)]
    Transport(#[from] TransportError),
}

impl SessionError {
    /// Returns `true` when retrying negotiation cannot succeed.
    pub fn is_fatal(&self) -> bool {
        match self {
            Self::Configuration(_) | Self::Auth(_) => true,
            Self::Api(e) => e.is_auth_failure(),
            Self::Transport(_) => false,
        }
    }
}

// =============================================================================
// Wait Errors
// =============================================================================

/// Ways a `wait_for` can finish without a matching event.
#[derive(Debug, Clone, Error)]
pub enum WaitError {
    /// No matching event arrived in time.
    #[error("timed out after {0:?} waiting for event")]
    Timeout(Duration),

    /// The predicate returned an error.
    #[error("wait predicate failed: {0}")]
    Predicate(Arc<anyhow::Error>),

    /// The predicate panicked.
    #[error("wait predicate panicked: {0}")]
    PredicatePanicked(String),

    /// The dispatcher went away before the wait was resolved.
    #[error("dispatcher dropped the wait")]
    Cancelled,
}

// =============================================================================
// Result Type Aliases
// =============================================================================

/// Result type for transport operations.
pub type TransportResult<T> = Result<T, TransportError>;

/// Result type for API calls.
pub type ApiResult<T> = Result<T, ApiError>;

/// Result type for session negotiation.
pub type SessionResult<T> = Result<T, SessionError>;

/// Result type for `wait_for`.
pub type WaitResult<T> = Result<T, WaitError>;
