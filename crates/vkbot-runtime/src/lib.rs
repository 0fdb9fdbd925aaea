//! vkbot Runtime - everything between a configuration file and a running bot.
//!
//! This crate provides:
//! - Layered configuration (`ConfigLoader`, `VkbotConfig`)
//! - Logging setup (`LoggingBuilder`)
//! - Hydrators turning raw updates into typed events (`GroupHydrator`, `UserHydrator`)
//! - The cursor state machine driving polls (`IngestionLoop`)
//! - Startup checks and shutdown handling (`VkClient`)
//!
//! # Startup
//!
//! ```text
//! identify token ──▶ check variant / owner ──▶ negotiate ──▶ settings check ──▶ "ready"
//!                                                  ▲                              │
//!                                                  │ cursor invalid / failure     ▼
//!                                                  └─────────────────────── poll ◀┘
//! ```
//!
//! ```ignore
//! use vkbot_runtime::VkClient;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let client = VkClient::builder().profile("production").build()?;
//!     client.on("ready", |_| async { anyhow::Ok(()) });
//!
//!     // Run until Ctrl+C
//!     client.run().await?;
//!     Ok(())
//! }
//! ```
//!
//! # Features
//!
//! - `toml-config`: read `vkbot.toml` / `config.toml`
//! - `yaml-config`: read `vkbot.yaml` / `config.yaml`
//! - `json-log`: `format = "json"` log output

pub mod client;
pub mod config;
pub mod error;
pub mod hydrate;
pub mod ingest;
pub mod logging;

// Re-exports
pub use client::{ClientBuilder, VkClient, check_credentials, identify, settings_warnings};
pub use config::{
    ClientVariant, ConfigError, ConfigLoader, ConfigResult, LoggingConfig, LongPollConfig,
    VkbotConfig,
};
pub use error::{RuntimeError, RuntimeResult};
pub use hydrate::{GroupHydrator, UNKNOWN_EVENT, UserHydrator, fetch_page};
pub use ingest::{DEFAULT_RETRY_DELAY, IngestionLoop, StartupHook};
pub use logging::{LoggingBuilder, SpanEvents};

// Re-export tracing for use by other crates
pub use tracing;
pub use tracing_subscriber;

/// Prelude module for convenient imports.
///
/// This provides all the commonly used logging macros:
/// - `trace!`, `debug!`, `info!`, `warn!`, `error!`
/// - `span`, `event`
/// - `instrument` attribute
/// - `Level` for span creation
pub mod prelude {
    pub use tracing::{Level, debug, error, event, info, instrument, span, trace, warn};
}
