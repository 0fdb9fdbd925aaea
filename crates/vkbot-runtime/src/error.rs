//! Runtime error types.

use std::path::PathBuf;

use thiserror::Error;

use vkbot_core::{ApiError, SessionError, TransportError};
use vkbot_model::ModelError;

/// Errors raised while loading or validating configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// An explicitly requested file does not exist.
    #[error("Configuration file not found: {0}")]
    FileNotFound(PathBuf),

    /// The sources could not be merged or extracted.
    #[error("Failed to parse configuration: {0}")]
    ParseError(String),

    /// A value is out of range or inconsistent.
    #[error("Invalid configuration: {message}")]
    ValidationError { message: String },

    /// A required value is empty.
    #[error("Missing required configuration field: {field}")]
    MissingField { field: String },
}

impl ConfigError {
    /// Creates a validation error with the given message.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::ValidationError {
            message: message.into(),
        }
    }

    /// Creates a missing field error.
    pub fn missing_field(field: impl Into<String>) -> Self {
        Self::MissingField {
            field: field.into(),
        }
    }
}

/// Result type for configuration operations.
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Errors that stop the client.
#[derive(Error, Debug)]
pub enum RuntimeError {
    /// The token does not belong to the configured client variant.
    #[error("Wrong credentials: {0}")]
    WrongCredentials(String),

    /// `owner_id` is not a positive user id.
    #[error("Owner_id must be positive integer, got {0}")]
    InvalidOwnerId(i64),

    /// `owner_id` was given together with a community token.
    #[error("Owner_id passed together with group access_token")]
    OwnerIdWithGroupToken,

    /// Neither `users.get` nor `groups.getById` identified the token.
    #[error("Could not identify the page owning the token")]
    UnknownPage,

    /// Fatal negotiation failure.
    #[error(transparent)]
    Session(#[from] SessionError),

    /// An API call during startup failed.
    #[error(transparent)]
    Api(#[from] ApiError),

    /// The HTTP layer could not be built.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// A startup response could not be decoded.
    #[error(transparent)]
    Model(#[from] ModelError),

    /// Configuration could not be loaded.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Installing a signal handler failed.
    #[error("Failed to listen for shutdown signals: {0}")]
    Signal(#[from] std::io::Error),
}

/// Result type for runtime operations.
pub type RuntimeResult<T> = Result<T, RuntimeError>;
