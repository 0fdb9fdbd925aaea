//! Configuration schema.
//!
//! ```toml
//! [client]
//! variant = "group"        # or "user"
//! token = "vk1.a...."
//! api_version = "5.199"
//! force = false            # enable long-poll remotely if it is disabled
//! owner_id = 0             # user-token group clients only
//!
//! [longpoll]
//! wait_secs = 10
//! retry_delay = 1.0
//! max_nesting_depth = 16
//!
//! [http]
//! total_timeout = 100.0
//! connect_timeout = 10.0
//! retry_attempts = 5
//!
//! [logging]
//! level = "info"
//! format = "compact"
//! output = "stdout"        # or "stderr", "file"
//!
//! [logging.filters]
//! vkbot_transport = "debug"
//! ```

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use vkbot_model::DEFAULT_MAX_NESTING_DEPTH;
use vkbot_transport::config::secs;
use vkbot_transport::{HttpConfig, KATE_MOBILE_USER_AGENT};

/// API version sent with every method call unless configured.
pub const DEFAULT_API_VERSION: &str = "5.199";

/// Root configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VkbotConfig {
    /// Credentials and client behaviour.
    pub client: ClientConfig,
    /// Ingestion loop settings.
    pub longpoll: LongPollConfig,
    /// HTTP client settings.
    pub http: HttpConfig,
    /// Logging settings.
    pub logging: LoggingConfig,
}

impl VkbotConfig {
    /// HTTP settings with the variant's default user agent filled in.
    pub fn effective_http(&self) -> HttpConfig {
        let mut http = self.http.clone();
        if http.user_agent.is_none() {
            http.user_agent = self
                .client
                .user_agent
                .clone()
                .or_else(|| match self.client.variant {
                    ClientVariant::User => Some(KATE_MOBILE_USER_AGENT.to_string()),
                    ClientVariant::Group => None,
                });
        }
        http
    }
}

// =============================================================================
// [client]
// =============================================================================

/// Which kind of token the client runs with.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClientVariant {
    /// Community token, community long-poll.
    #[default]
    Group,
    /// User token, user long-poll.
    User,
}

impl ClientVariant {
    /// Returns the variant name.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Group => "group",
            Self::User => "user",
        }
    }
}

impl fmt::Display for ClientVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// `[client]` section.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Token kind.
    pub variant: ClientVariant,
    /// Access token.
    pub token: String,
    /// API version.
    pub api_version: String,
    /// Enable long-poll remotely when it is disabled for the community.
    pub force: bool,
    /// Owner of the bot; positive user id.
    pub owner_id: Option<i64>,
    /// Overrides the `User-Agent` header.
    pub user_agent: Option<String>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            variant: ClientVariant::Group,
            token: String::new(),
            api_version: DEFAULT_API_VERSION.to_string(),
            force: false,
            owner_id: None,
            user_agent: None,
        }
    }
}

impl fmt::Debug for ClientConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientConfig")
            .field("variant", &self.variant)
            .field("token", &if self.token.is_empty() { "" } else { "<redacted>" })
            .field("api_version", &self.api_version)
            .field("force", &self.force)
            .field("owner_id", &self.owner_id)
            .field("user_agent", &self.user_agent)
            .finish()
    }
}

// =============================================================================
// [longpoll]
// =============================================================================

/// `[longpoll]` section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LongPollConfig {
    /// How long the server may hold one poll open.
    pub wait_secs: u64,
    /// Pause between failed negotiation attempts.
    #[serde(with = "secs")]
    pub retry_delay: Duration,
    /// Depth at which forwarded / replied message trees are cut.
    pub max_nesting_depth: usize,
}

impl Default for LongPollConfig {
    fn default() -> Self {
        Self {
            wait_secs: 10,
            retry_delay: Duration::from_secs(1),
            max_nesting_depth: DEFAULT_MAX_NESTING_DEPTH,
        }
    }
}

impl LongPollConfig {
    /// [`Self::wait_secs`] as a duration.
    pub fn wait(&self) -> Duration {
        Duration::from_secs(self.wait_secs)
    }
}

// =============================================================================
// [logging]
// =============================================================================

/// Log verbosity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl LogLevel {
    /// Lowercase name, as used in filter directives.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Trace => "trace",
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
        }
    }

    /// Converts to a `tracing` level.
    pub fn to_tracing_level(self) -> tracing::Level {
        match self {
            Self::Trace => tracing::Level::TRACE,
            Self::Debug => tracing::Level::DEBUG,
            Self::Info => tracing::Level::INFO,
            Self::Warn => tracing::Level::WARN,
            Self::Error => tracing::Level::ERROR,
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Compact,
    Full,
    Pretty,
    /// Requires the `json-log` feature; falls back to compact otherwise.
    Json,
}

/// Output destination.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogOutput {
    #[default]
    Stdout,
    Stderr,
    File,
}

/// How often the log file is rotated.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogRotation {
    #[default]
    Never,
    Hourly,
    Daily,
}

/// Which span lifecycle events are logged.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SpanEventConfig {
    pub new: bool,
    pub enter: bool,
    pub exit: bool,
    pub close: bool,
}

/// `[logging]` section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Base level; `RUST_LOG` takes precedence.
    pub level: LogLevel,
    pub format: LogFormat,
    pub output: LogOutput,
    /// Log file, for `output = "file"`.
    pub file_path: Option<PathBuf>,
    pub rotation: LogRotation,
    /// Include thread ids.
    pub thread_ids: bool,
    /// Include file names and line numbers.
    pub file_location: bool,
    pub span_events: SpanEventConfig,
    /// Per-module levels, e.g. `vkbot_transport = "debug"`.
    pub filters: BTreeMap<String, LogLevel>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: LogLevel::Info,
            format: LogFormat::Compact,
            output: LogOutput::Stdout,
            file_path: None,
            rotation: LogRotation::Never,
            thread_ids: false,
            file_location: false,
            span_events: SpanEventConfig::default(),
            filters: BTreeMap::new(),
        }
    }
}
