//! Setting definitions and the verify step of the settings protocol.

use serde::Serialize;
use serde_json::{Map, Number, Value};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;

/// Declared type of a setting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SettingType {
    /// Boolean; accepts `true/false`, `on/off`, `yes/no`, `0/1`.
    Bool,
    /// Signed integer; accepts integral floats and numeric strings.
    Integer,
    /// Floating point; accepts integers and numeric strings.
    Float,
    /// String; scalars are rendered to text.
    String,
    /// Sequence.
    List,
    /// Mapping.
    Map,
    /// Any value, unchecked.
    Any,
}

/// Extra check run after type coercion.
pub type VerifyFn = Arc<dyn Fn(&Value) -> bool + Send + Sync>;

/// One declared setting: `(name, type, required?, default, verify?)`.
#[derive(Clone)]
pub struct SettingDefinition {
    /// Setting key within the binding's mapping.
    pub name: String,
    /// Declared type.
    pub setting_type: SettingType,
    /// Whether a value must be present (or defaulted).
    pub required: bool,
    /// Value used when the operator supplies none.
    pub default: Option<Value>,
    verify: Option<VerifyFn>,
}

impl SettingDefinition {
    /// Optional setting without default or verify function.
    pub fn new(name: impl Into<String>, setting_type: SettingType) -> Self {
        Self {
            name: name.into(),
            setting_type,
            required: false,
            default: None,
            verify: None,
        }
    }

    /// Mark the setting as required.
    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    /// Set the default value.
    pub fn with_default(mut self, default: impl Into<Value>) -> Self {
        self.default = Some(default.into());
        self
    }

    /// Attach a verify function.
    pub fn with_verify<F>(mut self, verify: F) -> Self
    where
        F: Fn(&Value) -> bool + Send + Sync + 'static,
    {
        self.verify = Some(Arc::new(verify));
        self
    }

    /// Coerce a raw value to the declared type.
    pub fn coerce(&self, raw: &Value) -> Option<Value> {
        match self.setting_type {
            SettingType::Any => Some(raw.clone()),
            SettingType::Bool => match raw {
                Value::Bool(_) => Some(raw.clone()),
                Value::Number(n) => match n.as_i64() {
                    Some(0) => Some(Value::Bool(false)),
                    Some(1) => Some(Value::Bool(true)),
                    _ => None,
                },
                Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
                    "true" | "on" | "yes" | "1" => Some(Value::Bool(true)),
                    "false" | "off" | "no" | "0" => Some(Value::Bool(false)),
                    _ => None,
                },
                _ => None,
            },
            SettingType::Integer => match raw {
                Value::Number(n) => n.as_i64().map(Value::from).or_else(|| {
                    n.as_f64()
                        .filter(|f| f.is_finite() && f.fract() == 0.0 && f.abs() < i64::MAX as f64)
                        .map(|f| Value::from(f as i64))
                }),
                Value::String(s) => s.trim().parse::<i64>().ok().map(Value::from),
                _ => None,
            },
            SettingType::Float => match raw {
                Value::Number(n) => n.as_f64().and_then(Number::from_f64).map(Value::Number),
                Value::String(s) => s
                    .trim()
                    .parse::<f64>()
                    .ok()
                    .and_then(Number::from_f64)
                    .map(Value::Number),
                _ => None,
            },
            SettingType::String => match raw {
                Value::String(_) => Some(raw.clone()),
                Value::Bool(_) | Value::Number(_) => Some(Value::String(raw.to_string())),
                _ => None,
            },
            SettingType::List => raw.is_array().then(|| raw.clone()),
            SettingType::Map => raw.is_object().then(|| raw.clone()),
        }
    }

    /// Coerce then verify. Returns the accepted value.
    pub fn check(&self, raw: &Value) -> Option<Value> {
        let value = self.coerce(raw)?;
        match &self.verify {
            Some(verify) if !verify(&value) => None,
            _ => Some(value),
        }
    }
}

impl fmt::Debug for SettingDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SettingDefinition")
            .field("name", &self.name)
            .field("setting_type", &self.setting_type)
            .field("required", &self.required)
            .field("default", &self.default)
            .field("verify", &self.verify.is_some())
            .finish()
    }
}

// ─── Verify ─────────────────────────────────────────────────────────

/// Outcome of one `apply_settings`: `(accepted, rejected, not_found)`.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SettingsReport {
    /// Coerced, verified values that were committed.
    pub accepted: BTreeMap<String, Value>,
    /// Raw values that failed coercion or verification, or are undeclared.
    pub rejected: BTreeMap<String, Value>,
    /// Required settings with neither a value nor a default.
    pub not_found: BTreeSet<String>,
}

impl SettingsReport {
    /// True when nothing was rejected or missing.
    pub fn is_clean(&self) -> bool {
        self.rejected.is_empty() && self.not_found.is_empty()
    }
}

/// Partition a merged mapping against the declared definitions.
///
/// Defaults that coerce to the declared type are accepted when the
/// operator supplied nothing. Undeclared keys are rejected.
pub fn verify_settings(definitions: &[SettingDefinition], merged: &Map<String, Value>) -> SettingsReport {
    let mut report = SettingsReport::default();

    for definition in definitions {
        match merged.get(&definition.name) {
            Some(raw) => match definition.check(raw) {
                Some(value) => {
                    report.accepted.insert(definition.name.clone(), value);
                }
                None => {
                    report.rejected.insert(definition.name.clone(), raw.clone());
                }
            },
            None => match definition.default.as_ref().and_then(|d| definition.coerce(d)) {
                Some(value) => {
                    report.accepted.insert(definition.name.clone(), value);
                }
                None if definition.required => {
                    report.not_found.insert(definition.name.clone());
                }
                None => {}
            },
        }
    }

    for (key, raw) in merged {
        if !definitions.iter().any(|d| &d.name == key) {
            report.rejected.insert(key.clone(), raw.clone());
        }
    }

    report
}
