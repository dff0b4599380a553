//! Pluggable settings document formats.
//!
//! Every serializer maps text to the neutral `serde_json::Value` tree
//! and back. TOML is the default; YAML and JSON are selectable by file
//! extension or explicitly.

use serde_json::{Map, Value};
use std::fmt;
use std::path::Path;
use std::str::FromStr;

use crate::config::ConfigError;

/// Load/save strategy for settings documents.
///
/// # Contract
///
/// - `load` returns `ConfigError::FileNotFound` if the file does not exist
/// - `loads`/`load` return `ConfigError::ParseError` on syntax errors
/// - an empty document loads as an empty mapping
/// - `loads(saves(doc))` reproduces `doc` up to mapping order
pub trait SettingsSerializer: Send + Sync {
    /// Format name, for logs.
    fn name(&self) -> &'static str;

    /// Parse a document from text.
    fn loads(&self, text: &str) -> Result<Value, ConfigError>;

    /// Render a document to text.
    fn saves(&self, document: &Value) -> Result<String, ConfigError>;

    /// Parse a document from a file.
    fn load(&self, path: &Path) -> Result<Value, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                ConfigError::FileNotFound
            } else {
                ConfigError::ParseError(format!("{}: {e}", path.display()))
            }
        })?;
        self.loads(&content)
    }

    /// Render a document into a file.
    fn save(&self, path: &Path, document: &Value) -> Result<(), ConfigError> {
        let content = self.saves(document)?;
        std::fs::write(path, content)
            .map_err(|e| ConfigError::ParseError(format!("{}: {e}", path.display())))
    }
}

fn empty_as_mapping(document: Value) -> Value {
    if document.is_null() {
        Value::Object(Map::new())
    } else {
        document
    }
}

/// TOML documents.
#[derive(Debug, Clone, Copy, Default)]
pub struct TomlSerializer;

impl SettingsSerializer for TomlSerializer {
    fn name(&self) -> &'static str {
        "toml"
    }

    fn loads(&self, text: &str) -> Result<Value, ConfigError> {
        toml::from_str::<Value>(text)
            .map(empty_as_mapping)
            .map_err(|e| ConfigError::ParseError(e.to_string()))
    }

    fn saves(&self, document: &Value) -> Result<String, ConfigError> {
        toml::to_string(document).map_err(|e| ConfigError::ParseError(e.to_string()))
    }
}

/// YAML documents.
#[derive(Debug, Clone, Copy, Default)]
pub struct YamlSerializer;

impl SettingsSerializer for YamlSerializer {
    fn name(&self) -> &'static str {
        "yaml"
    }

    fn loads(&self, text: &str) -> Result<Value, ConfigError> {
        serde_yaml::from_str::<Value>(text)
            .map(empty_as_mapping)
            .map_err(|e| ConfigError::ParseError(e.to_string()))
    }

    fn saves(&self, document: &Value) -> Result<String, ConfigError> {
        serde_yaml::to_string(document).map_err(|e| ConfigError::ParseError(e.to_string()))
    }
}

/// JSON documents.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonSerializer;

impl SettingsSerializer for JsonSerializer {
    fn name(&self) -> &'static str {
        "json"
    }

    fn loads(&self, text: &str) -> Result<Value, ConfigError> {
        if text.trim().is_empty() {
            return Ok(Value::Object(Map::new()));
        }
        serde_json::from_str::<Value>(text)
            .map(empty_as_mapping)
            .map_err(|e| ConfigError::ParseError(e.to_string()))
    }

    fn saves(&self, document: &Value) -> Result<String, ConfigError> {
        serde_json::to_string_pretty(document).map_err(|e| ConfigError::ParseError(e.to_string()))
    }
}

// ─── Format selection ───────────────────────────────────────────────

/// Supported settings document formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SettingsFormat {
    /// TOML (default).
    #[default]
    Toml,
    /// YAML.
    Yaml,
    /// JSON.
    Json,
}

impl SettingsFormat {
    /// Guess the format from a file extension; unknown extensions are TOML.
    pub fn from_path(path: &Path) -> Self {
        match path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(str::to_ascii_lowercase)
            .as_deref()
        {
            Some("yaml") | Some("yml") => Self::Yaml,
            Some("json") => Self::Json,
            _ => Self::Toml,
        }
    }

    /// Serializer implementing this format.
    pub fn serializer(&self) -> Box<dyn SettingsSerializer> {
        match self {
            Self::Toml => Box::new(TomlSerializer),
            Self::Yaml => Box::new(YamlSerializer),
            Self::Json => Box::new(JsonSerializer),
        }
    }
}

impl FromStr for SettingsFormat {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "toml" => Ok(Self::Toml),
            "yaml" | "yml" => Ok(Self::Yaml),
            "json" => Ok(Self::Json),
            other => Err(ConfigError::ValidationError(format!(
                "unknown settings format '{other}'"
            ))),
        }
    }
}

impl fmt::Display for SettingsFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.serializer().name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_format_from_path() {
        assert_eq!(SettingsFormat::from_path(Path::new("a/dia.yml")), SettingsFormat::Yaml);
        assert_eq!(SettingsFormat::from_path(Path::new("dia.JSON")), SettingsFormat::Json);
        assert_eq!(SettingsFormat::from_path(Path::new("dia.toml")), SettingsFormat::Toml);
        assert_eq!(SettingsFormat::from_path(Path::new("dia")), SettingsFormat::Toml);
    }

    #[test]
    fn test_format_from_str() {
        assert_eq!("YAML".parse::<SettingsFormat>().unwrap(), SettingsFormat::Yaml);
        assert!("ini".parse::<SettingsFormat>().is_err());
    }

    #[test]
    fn test_empty_documents_are_mappings() {
        assert_eq!(TomlSerializer.loads("").unwrap(), json!({}));
        assert_eq!(YamlSerializer.loads("").unwrap(), json!({}));
        assert_eq!(JsonSerializer.loads("  ").unwrap(), json!({}));
    }

    #[test]
    fn test_toml_instance_list() {
        let doc = TomlSerializer
            .loads(
                r#"
[[devices]]
name = "t1"
driver = "dia_core.devices.simulation:SimulationDevice"

[devices.settings]
update_rate = 0.5
"#,
            )
            .unwrap();
        assert_eq!(doc["devices"][0]["name"], "t1");
        assert_eq!(doc["devices"][0]["settings"]["update_rate"], json!(0.5));
    }

    #[test]
    fn test_parse_error() {
        let result = TomlSerializer.loads("invalid toml {{{{");
        assert!(matches!(result, Err(ConfigError::ParseError(_))));
        let result = YamlSerializer.loads("a: [1, 2");
        assert!(matches!(result, Err(ConfigError::ParseError(_))));
    }

    #[test]
    fn test_load_missing_file() {
        let result = TomlSerializer.load(Path::new("/nonexistent/path/dia.toml"));
        assert!(matches!(result, Err(ConfigError::FileNotFound)));
    }
}
