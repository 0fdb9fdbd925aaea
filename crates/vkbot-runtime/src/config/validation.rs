//! Configuration validation utilities.

use super::schema::{ClientConfig, LoggingConfig, LogOutput, LongPollConfig, VkbotConfig};
use crate::error::{ConfigError, ConfigResult};
use vkbot_transport::HttpConfig;

/// Longest wait the long-poll server accepts.
pub const MAX_WAIT_SECS: u64 = 90;

/// Validates the entire configuration.
pub fn validate_config(config: &VkbotConfig) -> ConfigResult<()> {
    validate_client_config(&config.client)?;
    validate_longpoll_config(&config.longpoll)?;
    validate_http_config(&config.http, &config.longpoll)?;
    validate_logging_config(&config.logging)?;
    Ok(())
}

fn validate_client_config(client: &ClientConfig) -> ConfigResult<()> {
    if client.token.trim().is_empty() {
        return Err(ConfigError::missing_field("client.token"));
    }

    let mut parts = client.api_version.split('.');
    let well_formed = matches!(
        (parts.next(), parts.next(), parts.next()),
        (Some(major), Some(minor), None)
            if major.parse::<u32>().is_ok() && minor.parse::<u32>().is_ok()
    );
    if !well_formed {
        return Err(ConfigError::validation(format!(
            "API version must look like 5.199, got '{}'",
            client.api_version
        )));
    }

    Ok(())
}

fn validate_longpoll_config(longpoll: &LongPollConfig) -> ConfigResult<()> {
    if longpoll.wait_secs == 0 || longpoll.wait_secs > MAX_WAIT_SECS {
        return Err(ConfigError::validation(format!(
            "longpoll.wait_secs must be between 1 and {MAX_WAIT_SECS}"
        )));
    }

    if longpoll.retry_delay.is_zero() {
        return Err(ConfigError::validation(
            "longpoll.retry_delay must be greater than 0",
        ));
    }

    if longpoll.max_nesting_depth == 0 {
        return Err(ConfigError::validation(
            "longpoll.max_nesting_depth must be at least 1",
        ));
    }

    Ok(())
}

fn validate_http_config(http: &HttpConfig, longpoll: &LongPollConfig) -> ConfigResult<()> {
    if http.retry_attempts == 0 {
        return Err(ConfigError::validation(
            "http.retry_attempts must be at least 1",
        ));
    }

    // A poll is held open for `wait` seconds; the request must outlive it.
    if http.total_timeout <= longpoll.wait() {
        return Err(ConfigError::validation(format!(
            "http.total_timeout ({}s) must exceed longpoll.wait_secs ({}s)",
            http.total_timeout.as_secs_f64(),
            longpoll.wait_secs
        )));
    }

    Ok(())
}

fn validate_logging_config(logging: &LoggingConfig) -> ConfigResult<()> {
    if logging.output == LogOutput::File && logging.file_path.is_none() {
        return Err(ConfigError::missing_field("logging.file_path"));
    }
    Ok(())
}
