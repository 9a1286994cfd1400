//! Application settings loading from config.toml
//!
//! Every section is optional; missing values fall back to defaults so an empty
//! or absent file yields a working development setup. `DATABASE_URL` from the
//! environment (or `.env`) always wins over the file.

use crate::config::database::DEFAULT_DATABASE_URL;
use crate::errors::{Error, Result};
use crate::money::Money;
use serde::Deserialize;
use std::path::Path;
use tracing::{debug, info};

/// Environment variable naming an alternative settings file.
pub const CONFIG_PATH_ENV: &str = "TAG_LEDGER_CONFIG";

/// Configuration structure representing the entire config.toml file
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AppConfig {
    /// Storage connection settings
    #[serde(default)]
    pub database: DatabaseSettings,
    /// Ledger behaviour
    #[serde(default)]
    pub ledger: LedgerSettings,
}

/// `[database]` section
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseSettings {
    /// Connection URL, e.g. `sqlite://data/tag_ledger.sqlite?mode=rwc`
    #[serde(default = "default_database_url")]
    pub url: String,
    /// Pool size
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    /// Upper bound on waiting for a pooled connection
    #[serde(default = "default_acquire_timeout_secs")]
    pub acquire_timeout_secs: u64,
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        Self {
            url: default_database_url(),
            max_connections: default_max_connections(),
            acquire_timeout_secs: default_acquire_timeout_secs(),
        }
    }
}

/// `[ledger]` section
#[derive(Debug, Clone, Deserialize)]
pub struct LedgerSettings {
    /// Attempts per atomic unit before a conflict is surfaced to the caller
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Largest absolute cash-up variance still labelled `acceptable`
    #[serde(default = "default_acceptable_variance")]
    pub acceptable_variance: Money,
}

impl Default for LedgerSettings {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            acceptable_variance: default_acceptable_variance(),
        }
    }
}

fn default_database_url() -> String {
    DEFAULT_DATABASE_URL.to_string()
}

const fn default_max_connections() -> u32 {
    1
}

const fn default_acquire_timeout_secs() -> u64 {
    5
}

const fn default_max_attempts() -> u32 {
    3
}

const fn default_acceptable_variance() -> Money {
    Money::from_cents(500)
}

/// Loads settings from a TOML file
///
/// # Errors
/// Returns an error if:
/// - The file cannot be read
/// - The TOML syntax is invalid
/// - A value has the wrong type (e.g. a variance with three decimals)
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<AppConfig> {
    let contents = std::fs::read_to_string(path.as_ref()).map_err(|e| Error::Config {
        message: format!("Failed to read config file: {e}"),
    })?;

    parse_config(&contents)
}

/// Parses settings from TOML text.
pub fn parse_config(contents: &str) -> Result<AppConfig> {
    let config: AppConfig = toml::from_str(contents).map_err(|e| Error::Config {
        message: format!("Failed to parse config.toml: {e}"),
    })?;

    if config.ledger.max_attempts == 0 {
        return Err(Error::Config {
            message: "ledger.max_attempts must be at least 1".to_string(),
        });
    }
    if config.ledger.acceptable_variance.is_negative() {
        return Err(Error::Config {
            message: "ledger.acceptable_variance must not be negative".to_string(),
        });
    }

    Ok(config)
}

/// Loads the application configuration the binary runs with.
///
/// Reads the file named by `TAG_LEDGER_CONFIG` (default `./config.toml`);
/// an absent file means defaults. `DATABASE_URL` overrides `database.url`.
pub fn load_app_configuration() -> Result<AppConfig> {
    let path = std::env::var(CONFIG_PATH_ENV).unwrap_or_else(|_| "config.toml".to_string());

    let mut config = if Path::new(&path).exists() {
        debug!("Loading configuration from {path}");
        load_config(&path)?
    } else {
        info!("No configuration file at {path}, using defaults");
        AppConfig::default()
    };

    if let Ok(url) = std::env::var("DATABASE_URL") {
        config.database.url = url;
    }

    Ok(config)
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use super::*;

    #[test]
    fn test_parse_full_config() {
        let toml_str = r#"
            [database]
            url = "sqlite://festival.sqlite?mode=rwc"
            max_connections = 4
            acquire_timeout_secs = 2

            [ledger]
            max_attempts = 5
            acceptable_variance = "2.50"
        "#;

        let config = parse_config(toml_str).unwrap();
        assert_eq!(config.database.url, "sqlite://festival.sqlite?mode=rwc");
        assert_eq!(config.database.max_connections, 4);
        assert_eq!(config.database.acquire_timeout_secs, 2);
        assert_eq!(config.ledger.max_attempts, 5);
        assert_eq!(config.ledger.acceptable_variance, Money::from_cents(250));
    }

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = parse_config("").unwrap();
        assert_eq!(config.database.url, DEFAULT_DATABASE_URL);
        assert_eq!(config.ledger.max_attempts, 3);
        assert_eq!(config.ledger.acceptable_variance, Money::from_cents(500));
    }

    #[test]
    fn test_rejects_invalid_values() {
        assert!(matches!(
            parse_config("[ledger]\nmax_attempts = 0\n"),
            Err(Error::Config { .. })
        ));
        assert!(matches!(
            parse_config("[ledger]\nacceptable_variance = \"5.001\"\n"),
            Err(Error::Config { .. })
        ));
        assert!(matches!(
            parse_config("[database\nurl = 1"),
            Err(Error::Config { .. })
        ));
    }
}
