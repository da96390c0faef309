//! Configuration for a data context.

use serde::{Deserialize, Serialize};
use std::env;

/// Data context configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Config {
    /// Label attached to log events of this context
    pub name: String,
    /// Flush the baseline to the adapter after every successful commit
    pub auto_flush: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            name: "default".to_string(),
            auto_flush: false,
        }
    }
}

impl Config {
    /// Load configuration from environment variables, falling back to
    /// defaults for unset ones.
    ///
    /// - `ROWTRACK_CONTEXT_NAME`
    /// - `ROWTRACK_AUTO_FLUSH` (`true`/`false`/`1`/`0`)
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let name = lookup("ROWTRACK_CONTEXT_NAME").unwrap_or(defaults.name);

        let auto_flush = match lookup("ROWTRACK_AUTO_FLUSH") {
            Some(raw) => parse_bool(&raw).ok_or(ConfigError::InvalidAutoFlush(raw))?,
            None => defaults.auto_flush,
        };

        Ok(Self { name, auto_flush })
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_auto_flush(mut self, auto_flush: bool) -> Self {
        self.auto_flush = auto_flush;
        self
    }
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Configuration errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid ROWTRACK_AUTO_FLUSH value: {0}")]
    InvalidAutoFlush(String),
}
