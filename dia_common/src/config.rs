//! Configuration error and tracing configuration types.
//!
//! The reserved `tracing` key of a settings document carries logger
//! verbosity for the whole gateway:
//!
//! ```toml
//! [tracing]
//! level = "info"
//! json = false
//!
//! [tracing.targets]
//! "dia_core::scheduler" = "debug"
//! ```

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;
use tracing_subscriber::EnvFilter;

use crate::consts::TRACING_KEY;

/// Error type for settings document loading operations.
#[derive(Debug, Clone, Error)]
pub enum ConfigError {
    /// Settings file not found at specified path.
    #[error("Configuration file not found")]
    FileNotFound,

    /// Document parsing or rendering failed.
    #[error("Failed to parse configuration: {0}")]
    ParseError(String),

    /// Semantic validation failed.
    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}

/// Log level for application logging.
///
/// Uses lowercase serde values for document compatibility.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Most verbose, detailed tracing information.
    Trace,
    /// Debug information useful during development.
    Debug,
    /// General information about application operation.
    #[default]
    Info,
    /// Warning messages for potentially problematic situations.
    Warn,
    /// Error messages for serious problems.
    Error,
}

impl LogLevel {
    /// Directive string understood by `EnvFilter`.
    pub fn as_directive(&self) -> &'static str {
        match self {
            Self::Trace => "trace",
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
        }
    }
}

/// Logger verbosity configuration read from the `tracing` key.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TracingConfig {
    /// Default verbosity for every target.
    #[serde(default)]
    pub level: LogLevel,

    /// Emit logs as JSON lines.
    #[serde(default)]
    pub json: bool,

    /// Per-target overrides (`target = level`).
    #[serde(default)]
    pub targets: BTreeMap<String, LogLevel>,
}

impl TracingConfig {
    /// Extract the tracing section of a settings document.
    ///
    /// A missing `tracing` key yields the default configuration.
    ///
    /// # Errors
    /// Returns `ConfigError::ValidationError` if the section is malformed.
    pub fn from_document(document: &serde_json::Value) -> Result<Self, ConfigError> {
        match document.get(TRACING_KEY) {
            None | Some(serde_json::Value::Null) => Ok(Self::default()),
            Some(section) => serde_json::from_value(section.clone()).map_err(|e| {
                ConfigError::ValidationError(format!("invalid '{TRACING_KEY}' section: {e}"))
            }),
        }
    }

    /// Build an `EnvFilter` from this configuration.
    ///
    /// `RUST_LOG` directives, when present, are layered first; the
    /// configured level and target overrides are added on top.
    pub fn env_filter(&self) -> EnvFilter {
        let mut filter = EnvFilter::builder()
            .with_default_directive(
                self.level
                    .as_directive()
                    .parse()
                    .unwrap_or_else(|_| tracing::Level::INFO.into()),
            )
            .from_env_lossy();
        for (target, level) in &self.targets {
            match format!("{target}={}", level.as_directive()).parse() {
                Ok(directive) => filter = filter.add_directive(directive),
                Err(e) => tracing::warn!("Ignoring tracing target '{}': {}", target, e),
            }
        }
        filter
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_log_level_default() {
        assert_eq!(LogLevel::default(), LogLevel::Info);
    }

    #[test]
    fn test_log_level_deserialization() {
        #[derive(Debug, Deserialize, PartialEq)]
        struct TestWrapper {
            level: LogLevel,
        }

        assert_eq!(
            toml::from_str::<TestWrapper>("level = \"trace\"")
                .unwrap()
                .level,
            LogLevel::Trace
        );
        assert_eq!(
            toml::from_str::<TestWrapper>("level = \"warn\"")
                .unwrap()
                .level,
            LogLevel::Warn
        );
    }

    #[test]
    fn test_tracing_config_missing_section_is_default() {
        let config = TracingConfig::from_document(&json!({"devices": []})).unwrap();
        assert_eq!(config, TracingConfig::default());
    }

    #[test]
    fn test_tracing_config_parses_targets() {
        let doc = json!({
            "tracing": {
                "level": "debug",
                "json": true,
                "targets": {"dia_core::scheduler": "trace"}
            }
        });
        let config = TracingConfig::from_document(&doc).unwrap();
        assert_eq!(config.level, LogLevel::Debug);
        assert!(config.json);
        assert_eq!(
            config.targets.get("dia_core::scheduler"),
            Some(&LogLevel::Trace)
        );
    }

    #[test]
    fn test_tracing_config_rejects_unknown_fields() {
        let doc = json!({"tracing": {"verbosity": "loud"}});
        let result = TracingConfig::from_document(&doc);
        assert!(matches!(result, Err(ConfigError::ValidationError(_))));
    }
}
