//! Layered configuration loading.
//!
//! Later layers win:
//!
//! | Layer | Source |
//! |-------|--------|
//! | 1 | [`VkbotConfig::default`] |
//! | 2 | `vkbot.<profile>.<ext>` next to the main file |
//! | 3 | `vkbot.<ext>` or `config.<ext>`, or the file given to [`ConfigLoader::file`] |
//! | 4 | `VKBOT_*` environment variables |
//!
//! `<ext>` is `toml` with the `toml-config` feature and `yaml`/`yml` with
//! `yaml-config`. Each enabled format is searched on its own, and within a
//! format the first directory holding a main file ends the search.
//!
//! Nested keys use `__` in variable names, so `VKBOT_CLIENT__TOKEN` sets
//! `client.token` and `VKBOT_LONGPOLL__WAIT_SECS` sets `longpoll.wait_secs`.
//!
//! ```rust,ignore
//! let config = ConfigLoader::new()
//!     .profile("production")
//!     .search_path("/etc/vkbot")
//!     .load()?;
//! ```

use std::fmt;
use std::path::{Path, PathBuf};

use figment::Figment;
#[cfg(any(feature = "yaml-config", feature = "toml-config"))]
use figment::providers::Format;
#[cfg(feature = "toml-config")]
use figment::providers::Toml;
#[cfg(feature = "yaml-config")]
use figment::providers::Yaml;
use figment::providers::{Env, Serialized};
use tracing::{debug, info, trace, warn};

use super::schema::VkbotConfig;
use super::validation::validate_config;
use crate::error::{ConfigError, ConfigResult};

/// Prefix of environment variables read by the loader.
pub const ENV_PREFIX: &str = "VKBOT_";
/// Environment variable selecting the profile.
pub const PROFILE_ENV: &str = "VKBOT_PROFILE";
/// Directory under the user config dir searched for files.
const APP_DIR: &str = "vkbot";
/// File stems tried in every search directory, in order.
const FILE_STEMS: &[&str] = &["vkbot", "config"];

/// Extensions of one file format, in lookup order.
type FormatExtensions = &'static [&'static str];

/// File formats compiled in.
const FORMATS: &[FormatExtensions] = &[
    #[cfg(feature = "toml-config")]
    &["toml"],
    #[cfg(feature = "yaml-config")]
    &["yaml", "yml"],
];

/// Named set of overrides layered under the main file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum Profile {
    #[default]
    Development,
    Production,
    Custom(String),
}

impl Profile {
    /// File name segment of this profile.
    pub fn as_str(&self) -> &str {
        match self {
            Self::Development => "development",
            Self::Production => "production",
            Self::Custom(name) => name,
        }
    }

    /// Parses a profile name; `prod` and `dev` are accepted as short forms.
    pub fn parse(name: &str) -> Self {
        match name.to_lowercase().as_str() {
            "production" | "prod" => Self::Production,
            "development" | "dev" => Self::Development,
            other => Self::Custom(other.to_string()),
        }
    }

    /// Reads [`PROFILE_ENV`], defaulting to Development.
    pub fn from_env() -> Self {
        std::env::var(PROFILE_ENV)
            .map(|p| Self::parse(&p))
            .unwrap_or_default()
    }
}

impl fmt::Display for Profile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Builds a [`VkbotConfig`] from files and the environment.
#[derive(Debug)]
pub struct ConfigLoader {
    profile: Profile,
    search_paths: Vec<PathBuf>,
    load_env: bool,
    /// Replaces the directory search when set.
    config_file: Option<PathBuf>,
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigLoader {
    /// Creates a loader for the profile named by [`PROFILE_ENV`].
    pub fn new() -> Self {
        Self {
            profile: Profile::from_env(),
            search_paths: Vec::new(),
            load_env: true,
            config_file: None,
        }
    }

    pub fn profile(mut self, profile: impl Into<String>) -> Self {
        self.profile = Profile::parse(&profile.into());
        self
    }

    /// Adds a directory to search. Without any, the working directory and
    /// the user config directory are searched.
    pub fn search_path<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.search_paths.push(path.as_ref().to_path_buf());
        self
    }

    pub fn with_current_dir(self) -> Self {
        match std::env::current_dir() {
            Ok(cwd) => self.search_path(cwd),
            Err(_) => self,
        }
    }

    /// Loads exactly this file instead of searching. A missing file is an error.
    pub fn file<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.config_file = Some(path.as_ref().to_path_buf());
        self
    }

    /// Skips the `VKBOT_*` environment layer.
    pub fn without_env(mut self) -> Self {
        self.load_env = false;
        self
    }

    /// Loads the configuration without validating it.
    pub fn load_unchecked(self) -> ConfigResult<VkbotConfig> {
        let figment = self.figment()?;
        let config: VkbotConfig = figment.extract().map_err(|e| {
            ConfigError::ParseError(format!("Failed to extract configuration: {e}"))
        })?;

        debug!(
            profile = %self.profile,
            variant = %config.client.variant,
            logging_level = %config.logging.level,
            "Configuration loaded"
        );
        Ok(config)
    }

    /// Loads and validates the configuration.
    pub fn load(self) -> ConfigResult<VkbotConfig> {
        let config = self.load_unchecked()?;
        validate_config(&config)?;
        Ok(config)
    }

    fn figment(&self) -> ConfigResult<Figment> {
        let mut figment = Figment::from(Serialized::defaults(VkbotConfig::default()));

        match &self.config_file {
            Some(path) if !path.exists() => return Err(ConfigError::FileNotFound(path.clone())),
            Some(path) => {
                info!(path = %path.display(), "Loading configuration file");
                figment = merge_file(figment, path)?;
            }
            None => figment = self.search(figment)?,
        }

        if self.load_env {
            trace!(prefix = ENV_PREFIX, "Loading environment variables");
            figment = figment.merge(
                Env::prefixed(ENV_PREFIX)
                    .split("__")
                    .map(|key| key.as_str().replace("__", ".").into()),
            );
        }
        Ok(figment)
    }

    fn search_dirs(&self) -> Vec<PathBuf> {
        if !self.search_paths.is_empty() {
            return self.search_paths.clone();
        }
        std::env::current_dir()
            .ok()
            .into_iter()
            .chain(dirs::config_dir().map(|dir| dir.join(APP_DIR)))
            .collect()
    }

    /// Merges the profile and main file of every compiled-in format.
    fn search(&self, mut figment: Figment) -> ConfigResult<Figment> {
        let dirs = self.search_dirs();
        let mut found = false;
        for extensions in FORMATS {
            if let Some(main) = find_main_file(&dirs, extensions) {
                let profile = profile_file(&main, &self.profile);
                if profile.exists() {
                    debug!(path = %profile.display(), "Loading profile configuration");
                    figment = merge_file(figment, &profile)?;
                }
                info!(path = %main.display(), "Loading configuration file");
                figment = merge_file(figment, &main)?;
                found = true;
            }
        }
        if !found {
            warn!("No configuration file found, using defaults");
        }
        Ok(figment)
    }
}

/// First existing `<dir>/<stem>.<ext>`, directories taking precedence.
fn find_main_file(dirs: &[PathBuf], extensions: &[&str]) -> Option<PathBuf> {
    dirs.iter().find_map(|dir| {
        FILE_STEMS.iter().find_map(|stem| {
            extensions
                .iter()
                .map(|ext| dir.join(format!("{stem}.{ext}")))
                .find(|path| path.exists())
        })
    })
}

/// `vkbot.toml` becomes `vkbot.production.toml`.
fn profile_file(main: &Path, profile: &Profile) -> PathBuf {
    let stem = main.file_stem().and_then(|s| s.to_str()).unwrap_or_default();
    let ext = main.extension().and_then(|e| e.to_str()).unwrap_or_default();
    main.with_file_name(format!("{stem}.{profile}.{ext}"))
}

fn merge_file(figment: Figment, path: &Path) -> ConfigResult<Figment> {
    let ext = path.extension().and_then(|e| e.to_str()).unwrap_or_default();
    match ext {
        #[cfg(feature = "toml-config")]
        "toml" => Ok(figment.merge(Toml::file(path))),
        #[cfg(feature = "yaml-config")]
        "yaml" | "yml" => Ok(figment.merge(Yaml::file(path))),
        _ => Err(ConfigError::ParseError(format!(
            "Unsupported or disabled configuration file format: .{ext}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use figment::Jail;

    #[test]
    fn test_default_config() {
        let config = ConfigLoader::new()
            .search_path("/nonexistent")
            .without_env()
            .load_unchecked()
            .unwrap();
        assert_eq!(config.logging.level.as_str(), "info");
        assert!(config.client.token.is_empty());
    }

    #[test]
    fn test_defaults_fail_validation_without_token() {
        let result = ConfigLoader::new()
            .search_path("/nonexistent")
            .without_env()
            .load();
        assert!(matches!(result, Err(ConfigError::MissingField { .. })));
    }

    #[test]
    fn test_env_overrides() {
        Jail::expect_with(|jail| {
            jail.set_env("VKBOT_CLIENT__TOKEN", "from-env");
            jail.set_env("VKBOT_CLIENT__VARIANT", "user");
            jail.set_env("VKBOT_LONGPOLL__WAIT_SECS", "25");

            let config = ConfigLoader::new()
                .search_path(jail.directory())
                .load()
                .map_err(|e| e.to_string())?;
            assert_eq!(config.client.token, "from-env");
            assert_eq!(config.client.variant.as_str(), "user");
            assert_eq!(config.longpoll.wait_secs, 25);
            Ok(())
        });
    }

    #[cfg(feature = "toml-config")]
    #[test]
    fn test_profile_file_is_overridden_by_main_file() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "vkbot.production.toml",
                r#"
                [client]
                token = "profile"
                force = true
                "#,
            )?;
            jail.create_file(
                "vkbot.toml",
                r#"
                [client]
                token = "main"
                "#,
            )?;

            let config = ConfigLoader::new()
                .profile("prod")
                .search_path(jail.directory())
                .without_env()
                .load()
                .map_err(|e| e.to_string())?;
            assert_eq!(config.client.token, "main");
            assert!(config.client.force);
            Ok(())
        });
    }

    #[test]
    fn test_explicit_missing_file() {
        let result = ConfigLoader::new().file("/nonexistent/vkbot.toml").load();
        assert!(matches!(result, Err(ConfigError::FileNotFound(_))));
    }

    #[test]
    fn test_profile_file_name() {
        let main = Path::new("/etc/vkbot/config.toml");
        assert_eq!(
            profile_file(main, &Profile::parse("PROD")),
            PathBuf::from("/etc/vkbot/config.production.toml")
        );
        assert_eq!(
            profile_file(main, &Profile::parse("staging")),
            PathBuf::from("/etc/vkbot/config.staging.toml")
        );
    }

    #[cfg(feature = "toml-config")]
    #[test]
    fn test_first_directory_with_a_main_file_wins() {
        Jail::expect_with(|jail| {
            std::fs::create_dir("empty").map_err(|e| e.to_string())?;
            std::fs::create_dir("site").map_err(|e| e.to_string())?;
            jail.create_file("site/config.toml", "[client]\ntoken = \"site\"")?;
            jail.create_file("vkbot.toml", "[client]\ntoken = \"cwd\"")?;

            let config = ConfigLoader::new()
                .search_path(jail.directory().join("empty"))
                .search_path(jail.directory().join("site"))
                .search_path(jail.directory())
                .without_env()
                .load()
                .map_err(|e| e.to_string())?;
            assert_eq!(config.client.token, "site");
            Ok(())
        });
    }

    #[test]
    fn test_profile_from_env() {
        Jail::expect_with(|jail| {
            jail.set_env(PROFILE_ENV, "production");
            assert!(matches!(Profile::from_env(), Profile::Production));
            jail.set_env(PROFILE_ENV, "staging");
            assert_eq!(Profile::from_env().as_str(), "staging");
            Ok(())
        });
    }
}
