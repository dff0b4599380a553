//! Timestamped channel samples.
//!
//! A [`Sample`] is an immutable `(timestamp, value, unit)` triple. The
//! payload is a tagged [`SampleValue`]; styled booleans carry their
//! display style so presentations can render "on/off", "open/closed"
//! and friends without the core knowing about formatting.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

/// Seconds since the UNIX epoch as a float.
pub fn now_timestamp() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs_f64()
}

// ─── Styled booleans ────────────────────────────────────────────────

/// Tri-state output mode of a digital line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tristate {
    /// Line sinks current.
    Sink,
    /// Line sources current.
    Source,
    /// Line is high impedance.
    Tristate,
}

/// Boolean-like payload with a display style.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "style", content = "state", rename_all = "snake_case")]
pub enum StyledValue {
    /// Rendered as `On` / `Off`.
    OnOff(bool),
    /// Rendered as `Open` / `Closed`.
    OpenClosed(bool),
    /// Rendered as `Sink` / `Source` / `Tristate`.
    SinkSource(Tristate),
}

impl StyledValue {
    /// Boolean reading of the styled value. A tri-stated line reads false.
    pub fn as_bool(&self) -> bool {
        match self {
            Self::OnOff(state) | Self::OpenClosed(state) => *state,
            Self::SinkSource(mode) => *mode == Tristate::Source,
        }
    }

    /// Same style carrying a new boolean state.
    pub fn with_state(&self, state: bool) -> Self {
        match self {
            Self::OnOff(_) => Self::OnOff(state),
            Self::OpenClosed(_) => Self::OpenClosed(state),
            Self::SinkSource(_) => Self::SinkSource(if state {
                Tristate::Source
            } else {
                Tristate::Sink
            }),
        }
    }
}

impl fmt::Display for StyledValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::OnOff(true) => write!(f, "On"),
            Self::OnOff(false) => write!(f, "Off"),
            Self::OpenClosed(true) => write!(f, "Open"),
            Self::OpenClosed(false) => write!(f, "Closed"),
            Self::SinkSource(Tristate::Sink) => write!(f, "Sink"),
            Self::SinkSource(Tristate::Source) => write!(f, "Source"),
            Self::SinkSource(Tristate::Tristate) => write!(f, "Tristate"),
        }
    }
}

// ─── Payload ────────────────────────────────────────────────────────

/// Declared type of a channel payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValueType {
    /// Plain boolean.
    Bool,
    /// Signed integer.
    Int,
    /// Floating point.
    Float,
    /// String.
    Str,
    /// Styled boolean.
    Styled,
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Bool => "bool",
            Self::Int => "int",
            Self::Float => "float",
            Self::Str => "str",
            Self::Styled => "styled",
        };
        f.write_str(name)
    }
}

/// One typed sample payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "lowercase")]
pub enum SampleValue {
    /// Plain boolean.
    Bool(bool),
    /// Signed integer.
    Int(i64),
    /// Floating point.
    Float(f64),
    /// String.
    Str(String),
    /// Styled boolean.
    Styled(StyledValue),
}

impl SampleValue {
    /// Concrete type of this payload.
    pub fn value_type(&self) -> ValueType {
        match self {
            Self::Bool(_) => ValueType::Bool,
            Self::Int(_) => ValueType::Int,
            Self::Float(_) => ValueType::Float,
            Self::Str(_) => ValueType::Str,
            Self::Styled(_) => ValueType::Styled,
        }
    }

    /// Coerce this payload into `target`.
    ///
    /// Returns the payload unchanged when it already has the target type.
    /// Otherwise consults the remap table:
    ///
    /// | from  | to     | rule                         |
    /// |-------|--------|------------------------------|
    /// | int   | float  | always                       |
    /// | float | int    | integral values only         |
    /// | bool  | int    | `false → 0`, `true → 1`      |
    /// | int   | bool   | `0` and `1` only             |
    /// | str   | bool, int, float | parse              |
    /// | bool  | styled | keeps the style of `template` |
    ///
    /// Returns `None` when the pair is not in the table or the value
    /// cannot be represented.
    pub fn remap(self, target: ValueType, template: Option<&SampleValue>) -> Option<SampleValue> {
        if self.value_type() == target {
            return Some(self);
        }
        match (self, target) {
            (Self::Int(v), ValueType::Float) => Some(Self::Float(v as f64)),
            (Self::Float(v), ValueType::Int) => {
                if v.is_finite() && v.fract() == 0.0 && v.abs() < i64::MAX as f64 {
                    Some(Self::Int(v as i64))
                } else {
                    None
                }
            }
            (Self::Bool(v), ValueType::Int) => Some(Self::Int(i64::from(v))),
            (Self::Int(0), ValueType::Bool) => Some(Self::Bool(false)),
            (Self::Int(1), ValueType::Bool) => Some(Self::Bool(true)),
            (Self::Str(s), ValueType::Bool) => parse_bool(&s).map(Self::Bool),
            (Self::Str(s), ValueType::Int) => s.trim().parse().ok().map(Self::Int),
            (Self::Str(s), ValueType::Float) => s.trim().parse().ok().map(Self::Float),
            (Self::Bool(v), ValueType::Styled) => {
                let style = match template {
                    Some(Self::Styled(style)) => *style,
                    _ => StyledValue::OnOff(false),
                };
                Some(Self::Styled(style.with_state(v)))
            }
            _ => None,
        }
    }
}

impl fmt::Display for SampleValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(v) => write!(f, "{v}"),
            Self::Int(v) => write!(f, "{v}"),
            Self::Float(v) => write!(f, "{v}"),
            Self::Str(v) => f.write_str(v),
            Self::Styled(v) => write!(f, "{v}"),
        }
    }
}

impl From<bool> for SampleValue {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<i64> for SampleValue {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<f64> for SampleValue {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<&str> for SampleValue {
    fn from(v: &str) -> Self {
        Self::Str(v.to_string())
    }
}

impl From<String> for SampleValue {
    fn from(v: String) -> Self {
        Self::Str(v)
    }
}

impl From<StyledValue> for SampleValue {
    fn from(v: StyledValue) -> Self {
        Self::Styled(v)
    }
}

fn parse_bool(text: &str) -> Option<bool> {
    match text.trim().to_ascii_lowercase().as_str() {
        "true" | "on" | "yes" | "1" => Some(true),
        "false" | "off" | "no" | "0" => Some(false),
        _ => None,
    }
}

// ─── Sample ─────────────────────────────────────────────────────────

/// One timestamped reading.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    /// Seconds since the UNIX epoch.
    pub timestamp: f64,
    /// Typed payload.
    pub value: SampleValue,
    /// Free-form unit label.
    #[serde(default)]
    pub unit: String,
}

impl Sample {
    /// Create a sample with an explicit timestamp.
    pub fn new(timestamp: f64, value: impl Into<SampleValue>, unit: impl Into<String>) -> Self {
        Self {
            timestamp,
            value: value.into(),
            unit: unit.into(),
        }
    }

    /// Create a sample stamped with the current time.
    pub fn now(value: impl Into<SampleValue>, unit: impl Into<String>) -> Self {
        Self::new(now_timestamp(), value, unit)
    }

    /// Same sample with a different timestamp.
    pub fn with_timestamp(mut self, timestamp: f64) -> Self {
        self.timestamp = timestamp;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_remap_int_to_float() {
        let v = SampleValue::Int(7).remap(ValueType::Float, None);
        assert_eq!(v, Some(SampleValue::Float(7.0)));
    }

    #[test]
    fn test_remap_float_to_int_requires_integral() {
        assert_eq!(
            SampleValue::Float(3.0).remap(ValueType::Int, None),
            Some(SampleValue::Int(3))
        );
        assert_eq!(SampleValue::Float(3.5).remap(ValueType::Int, None), None);
        assert_eq!(SampleValue::Float(f64::NAN).remap(ValueType::Int, None), None);
    }

    #[test]
    fn test_remap_string_parse() {
        assert_eq!(
            SampleValue::from(" 42 ").remap(ValueType::Int, None),
            Some(SampleValue::Int(42))
        );
        assert_eq!(SampleValue::from("abc").remap(ValueType::Int, None), None);
        assert_eq!(
            SampleValue::from("off").remap(ValueType::Bool, None),
            Some(SampleValue::Bool(false))
        );
    }

    #[test]
    fn test_remap_int_to_bool_only_zero_one() {
        assert_eq!(
            SampleValue::Int(1).remap(ValueType::Bool, None),
            Some(SampleValue::Bool(true))
        );
        assert_eq!(SampleValue::Int(2).remap(ValueType::Bool, None), None);
    }

    #[test]
    fn test_remap_bool_keeps_style() {
        let template = SampleValue::Styled(StyledValue::OpenClosed(false));
        let v = SampleValue::Bool(true).remap(ValueType::Styled, Some(&template));
        assert_eq!(v, Some(SampleValue::Styled(StyledValue::OpenClosed(true))));
    }

    #[test]
    fn test_remap_not_in_table() {
        assert_eq!(SampleValue::Float(1.0).remap(ValueType::Str, None), None);
    }

    #[test]
    fn test_styled_display() {
        assert_eq!(StyledValue::OnOff(true).to_string(), "On");
        assert_eq!(StyledValue::OpenClosed(false).to_string(), "Closed");
        assert_eq!(
            StyledValue::SinkSource(Tristate::Tristate).to_string(),
            "Tristate"
        );
    }

    #[test]
    fn test_sample_serde_shape() {
        let sample = Sample::new(100.0, 7i64, "counts");
        let json = serde_json::to_value(&sample).unwrap();
        assert_eq!(json["value"]["type"], "int");
        assert_eq!(json["value"]["value"], 7);
        let back: Sample = serde_json::from_value(json).unwrap();
        assert_eq!(back, sample);
    }
}
