//! Configuration system using Figment.
//!
//! Settings are loaded from:
//! 1. a TOML file (`relay.toml` by default, base configuration)
//! 2. environment variables prefixed with `RELAY_`
//!
//! CLI flags are applied on top by the binary, so precedence is
//! flags > environment > file. The archive URL and token are required to do
//! anything, but the requirement is enforced at startup by the binary once
//! overrides are applied, so that any of the three layers can provide them.
//!
//! # Environment Variable Overrides
//!
//! ```text
//! RELAY_LOG_LEVEL=debug
//! RELAY_ARCHIVE_URL=https://archive.example.org/api/v1
//! RELAY_ARCHIVE_TOKEN=...
//! RELAY_CATALOG_POLL_PERIOD=10s
//! ```

use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::error::{RelayError, RelayResult};

/// Default configuration file next to the working directory.
pub const DEFAULT_CONFIG_FILE: &str = "relay.toml";

/// Relay settings, one flat section per collaborator.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Logging level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Base URL of the archive API.
    pub archive_url: Option<String>,
    /// Bearer token for the archive API.
    pub archive_token: Option<String>,
    /// Per-request timeout for archive calls.
    #[serde(with = "humantime_serde")]
    pub archive_timeout: Duration,

    /// Message bus URL for push delivery.
    pub bus_url: Option<String>,
    /// Bus subject carrying the document stream.
    pub bus_subject: String,

    /// Catalog service URL for pull delivery.
    pub catalog_url: Option<String>,
    /// API key for the catalog service.
    pub catalog_api_key: Option<String>,
    /// Period between catalog polls.
    #[serde(with = "humantime_serde")]
    pub catalog_poll_period: Duration,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            archive_url: None,
            archive_token: None,
            archive_timeout: Duration::from_secs(30),
            bus_url: None,
            bus_subject: "documents".to_string(),
            catalog_url: None,
            catalog_api_key: None,
            catalog_poll_period: Duration::from_secs(5),
        }
    }
}

impl Settings {
    /// Load settings from the default file location and the environment.
    pub fn load() -> RelayResult<Self> {
        Self::load_from(DEFAULT_CONFIG_FILE)
    }

    /// Load settings from a specific file, then apply `RELAY_`-prefixed
    /// environment variables on top. A missing file is fine; the defaults
    /// and the environment still apply.
    pub fn load_from<P: AsRef<Path>>(path: P) -> RelayResult<Self> {
        let settings: Self = Figment::new()
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed("RELAY_"))
            .extract()?;
        settings.validate()?;
        Ok(settings)
    }

    /// Validate settings after loading and after CLI overrides.
    pub fn validate(&self) -> Result<(), RelayError> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.log_level.as_str()) {
            return Err(RelayError::Configuration(format!(
                "Invalid log_level '{}'. Must be one of: {}",
                self.log_level,
                valid_levels.join(", ")
            )));
        }

        if self.archive_timeout.is_zero() {
            return Err(RelayError::Configuration(
                "archive_timeout must be non-zero".to_string(),
            ));
        }
        if self.catalog_poll_period.is_zero() {
            return Err(RelayError::Configuration(
                "catalog_poll_period must be non-zero".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let settings = Settings::default();
        assert_eq!(settings.log_level, "info");
        assert_eq!(settings.bus_subject, "documents");
        assert_eq!(settings.archive_timeout, Duration::from_secs(30));
        assert_eq!(settings.catalog_poll_period, Duration::from_secs(5));
        assert!(settings.archive_url.is_none());
    }

    #[test]
    fn test_file_and_env_layering() {
        figment::Jail::expect_with(|jail| {
            jail.create_file(
                "relay.toml",
                r#"
                    log_level = "debug"
                    archive_url = "https://archive.example.org/api/v1"
                    archive_timeout = "10s"
                "#,
            )?;
            jail.set_env("RELAY_ARCHIVE_TOKEN", "secret");
            jail.set_env("RELAY_LOG_LEVEL", "warn");

            let settings = Settings::load_from("relay.toml").expect("load");
            // Environment overrides the file; the file overrides defaults.
            assert_eq!(settings.log_level, "warn");
            assert_eq!(
                settings.archive_url.as_deref(),
                Some("https://archive.example.org/api/v1")
            );
            assert_eq!(settings.archive_token.as_deref(), Some("secret"));
            assert_eq!(settings.archive_timeout, Duration::from_secs(10));
            Ok(())
        });
    }

    #[test]
    fn test_missing_file_falls_back_to_defaults() {
        figment::Jail::expect_with(|_jail| {
            let settings = Settings::load_from("does-not-exist.toml").expect("load");
            assert_eq!(settings.log_level, "info");
            assert_eq!(settings.catalog_poll_period, Duration::from_secs(5));
            Ok(())
        });
    }

    #[test]
    fn test_invalid_log_level_is_rejected() {
        let settings = Settings {
            log_level: "verbose".to_string(),
            ..Settings::default()
        };
        assert!(matches!(
            settings.validate(),
            Err(RelayError::Configuration(_))
        ));
    }

    #[test]
    fn test_zero_poll_period_is_rejected() {
        let settings = Settings {
            catalog_poll_period: Duration::ZERO,
            ..Settings::default()
        };
        assert!(matches!(
            settings.validate(),
            Err(RelayError::Configuration(_))
        ));
    }
}
