//! Settings document tree helpers.
//!
//! A settings document is a `serde_json::Value` tree. Bindings address a
//! subtree by path. A path segment selects a mapping key, or inside an
//! instance list the record whose `name` equals the segment.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashSet;
use std::fmt;

use crate::config::ConfigError;
use crate::consts::{RECORD_NAME_KEY, RECORD_SETTINGS_KEY};

// ─── Binding ────────────────────────────────────────────────────────

/// Path identifying a subtree of the settings document.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SettingsBinding(Vec<String>);

impl SettingsBinding {
    /// Binding from explicit path segments.
    pub fn new<I, S>(segments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(segments.into_iter().map(Into::into).collect())
    }

    /// Binding of a driver instance: `(<category>, <instance>, "settings")`.
    pub fn instance(category: &str, instance: &str) -> Self {
        Self::new([category, instance, RECORD_SETTINGS_KEY])
    }

    /// Path segments.
    pub fn segments(&self) -> &[String] {
        &self.0
    }

    /// Dotted rendering used as a report key.
    pub fn key(&self) -> String {
        self.0.join(".")
    }
}

impl fmt::Display for SettingsBinding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({})", self.0.join(", "))
    }
}

// ─── Path walking ───────────────────────────────────────────────────

fn record_name(value: &Value) -> Option<&str> {
    value.get(RECORD_NAME_KEY).and_then(Value::as_str)
}

/// Find the subtree at `path`.
pub fn lookup<'a>(document: &'a Value, path: &[String]) -> Option<&'a Value> {
    let mut node = document;
    for segment in path {
        node = match node {
            Value::Object(map) => map.get(segment)?,
            Value::Array(items) => items
                .iter()
                .find(|item| record_name(item) == Some(segment.as_str()))?,
            _ => return None,
        };
    }
    Some(node)
}

/// Find the subtree at `path`, creating empty mappings along the way.
///
/// Inside an instance list a missing record is appended as
/// `{ name = <segment> }`.
///
/// # Errors
/// Returns `ConfigError::ValidationError` if a scalar sits on the path.
pub fn lookup_or_insert<'a>(
    document: &'a mut Value,
    path: &[String],
) -> Result<&'a mut Value, ConfigError> {
    let mut node = document;
    for segment in path {
        if node.is_null() {
            *node = Value::Object(Map::new());
        }
        node = match node {
            Value::Object(map) => map.entry(segment.clone()).or_insert(Value::Null),
            Value::Array(items) => {
                let idx = match items
                    .iter()
                    .position(|item| record_name(item) == Some(segment.as_str()))
                {
                    Some(idx) => idx,
                    None => {
                        let mut record = Map::new();
                        record.insert(RECORD_NAME_KEY.to_string(), Value::from(segment.as_str()));
                        items.push(Value::Object(record));
                        items.len() - 1
                    }
                };
                &mut items[idx]
            }
            other => {
                return Err(ConfigError::ValidationError(format!(
                    "cannot descend into '{segment}': found scalar {other}"
                )));
            }
        };
    }
    Ok(node)
}

/// Flat copy of the mapping at `path`; empty when absent or not a mapping.
pub fn mapping_at(document: &Value, path: &[String]) -> Map<String, Value> {
    match lookup(document, path) {
        Some(Value::Object(map)) => map.clone(),
        _ => Map::new(),
    }
}

// ─── Instance records ───────────────────────────────────────────────

/// One entry of an instance list (`devices`, `loggers`, ...).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstanceRecord {
    /// Instance name, unique within its category.
    pub name: String,
    /// Driver reference in `module.path:ClassName` form.
    pub driver: String,
    /// Driver-specific settings.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub settings: Option<Value>,
}

/// Parse the instance list stored under `category`.
///
/// A missing category yields an empty list.
///
/// # Errors
/// Returns `ConfigError::ValidationError` if the category is not a list,
/// a record misses `name`/`driver`, or two records share a name.
pub fn parse_instance_list(
    document: &Value,
    category: &str,
) -> Result<Vec<InstanceRecord>, ConfigError> {
    let items = match document.get(category) {
        None | Some(Value::Null) => return Ok(Vec::new()),
        Some(Value::Array(items)) => items,
        Some(_) => {
            return Err(ConfigError::ValidationError(format!(
                "'{category}' must be a list of instance records"
            )));
        }
    };

    let mut seen = HashSet::new();
    let mut records = Vec::with_capacity(items.len());
    for (idx, item) in items.iter().enumerate() {
        let record: InstanceRecord = serde_json::from_value(item.clone()).map_err(|e| {
            ConfigError::ValidationError(format!("{category}[{idx}]: {e}"))
        })?;
        if record.name.is_empty() {
            return Err(ConfigError::ValidationError(format!(
                "{category}[{idx}]: instance name cannot be empty"
            )));
        }
        if !seen.insert(record.name.clone()) {
            return Err(ConfigError::ValidationError(format!(
                "{category}: duplicate instance name '{}'",
                record.name
            )));
        }
        records.push(record);
    }
    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn document() -> Value {
        json!({
            "devices": [
                {"name": "d1", "driver": "a.b:C", "settings": {"rate": 2.0}},
                {"name": "d2", "driver": "a.b:D"}
            ]
        })
    }

    #[test]
    fn test_lookup_walks_instance_lists() {
        let doc = document();
        let binding = SettingsBinding::instance("devices", "d1");
        assert_eq!(lookup(&doc, binding.segments()), Some(&json!({"rate": 2.0})));
        assert!(lookup(&doc, SettingsBinding::instance("devices", "zz").segments()).is_none());
    }

    #[test]
    fn test_lookup_or_insert_creates_path() {
        let mut doc = document();
        let binding = SettingsBinding::instance("devices", "d2");
        let node = lookup_or_insert(&mut doc, binding.segments()).unwrap();
        assert!(node.is_null());
        *node = json!({"rate": 5});
        assert_eq!(mapping_at(&doc, binding.segments())["rate"], json!(5));

        let binding = SettingsBinding::instance("loggers", "mem");
        lookup_or_insert(&mut doc, binding.segments()).unwrap();
        assert!(doc["loggers"]["mem"].is_object());
    }

    #[test]
    fn test_lookup_or_insert_appends_record() {
        let mut doc = document();
        let binding = SettingsBinding::instance("devices", "d3");
        lookup_or_insert(&mut doc, binding.segments()).unwrap();
        assert_eq!(doc["devices"].as_array().unwrap().len(), 3);
        assert_eq!(doc["devices"][2]["name"], "d3");
    }

    #[test]
    fn test_lookup_or_insert_rejects_scalar() {
        let mut doc = json!({"devices": 5});
        let result = lookup_or_insert(&mut doc, SettingsBinding::instance("devices", "x").segments());
        assert!(matches!(result, Err(ConfigError::ValidationError(_))));
    }

    #[test]
    fn test_parse_instance_list() {
        let records = parse_instance_list(&document(), "devices").unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].driver, "a.b:C");
        assert!(records[1].settings.is_none());
        assert!(parse_instance_list(&document(), "loggers").unwrap().is_empty());
    }

    #[test]
    fn test_parse_instance_list_rejects_duplicates() {
        let doc = json!({"devices": [
            {"name": "d", "driver": "x:Y"},
            {"name": "d", "driver": "x:Z"}
        ]});
        let err = parse_instance_list(&doc, "devices").unwrap_err();
        assert!(err.to_string().contains("duplicate"));
    }

    #[test]
    fn test_parse_instance_list_requires_driver() {
        let doc = json!({"devices": [{"name": "d"}]});
        assert!(parse_instance_list(&doc, "devices").is_err());
    }

    #[test]
    fn test_binding_key() {
        let binding = SettingsBinding::instance("devices", "myDevice");
        assert_eq!(binding.key(), "devices.myDevice.settings");
        assert_eq!(binding.to_string(), "(devices, myDevice, settings)");
    }
}
