//! Transport configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Base URL of the VK API.
pub const DEFAULT_API_BASE: &str = "https://api.vk.com/method/";

/// User agent sent by user-account clients unless configured otherwise.
pub const KATE_MOBILE_USER_AGENT: &str = "KateMobileAndroid/52.1 lite-445 (Android 4.4.2; SDK 19; x86; unknown Android SDK built for x86; en)";

/// HTTP client settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    /// Upper bound for one whole request, including the long-poll wait.
    #[serde(with = "secs")]
    pub total_timeout: Duration,
    /// Upper bound for establishing a connection.
    #[serde(with = "secs")]
    pub connect_timeout: Duration,
    /// `User-Agent` header, if any.
    pub user_agent: Option<String>,
    /// Attempts per API request before giving up.
    pub retry_attempts: u32,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            total_timeout: Duration::from_secs(100),
            connect_timeout: Duration::from_secs(10),
            user_agent: None,
            retry_attempts: 5,
        }
    }
}

impl HttpConfig {
    /// Wait after the failed attempt number `attempt` (0-based): 1s, 3s, 5s, ...
    pub fn retry_delay(attempt: u32) -> Duration {
        Duration::from_secs(u64::from(attempt) * 2 + 1)
    }
}

/// Durations as whole or fractional seconds.
pub mod secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(value.as_secs_f64())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(deserializer)?;
        Duration::try_from_secs_f64(secs).map_err(serde::de::Error::custom)
    }
}
