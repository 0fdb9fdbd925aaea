//! Configuration for the vkbot runtime.
//!
//! Layered loading (defaults, files, `VKBOT_*` environment) is handled by
//! [`ConfigLoader`]; the schema lives in [`schema`] and is checked by
//! [`validate_config`] before use.

pub mod loader;
pub mod schema;
pub mod validation;

pub use crate::error::{ConfigError, ConfigResult};
pub use loader::{ConfigLoader, ENV_PREFIX, PROFILE_ENV, Profile};
pub use schema::{
    ClientConfig, ClientVariant, DEFAULT_API_VERSION, LogFormat, LogLevel, LogOutput,
    LogRotation, LoggingConfig, LongPollConfig, SpanEventConfig, VkbotConfig,
};
pub use validation::validate_config;
