//! Prelude module for common re-exports.
//!
//! ```rust
//! use dia_common::prelude::*;
//! ```

// ─── Samples ────────────────────────────────────────────────────────
pub use crate::sample::{Sample, SampleValue, StyledValue, Tristate, ValueType, now_timestamp};

// ─── Channels & events ──────────────────────────────────────────────
pub use crate::channel::{
    ChannelEventKind, ChannelOptions, ChannelSnapshot, LoggingEvent, LoggingEventKind, Permission,
};

// ─── Errors ─────────────────────────────────────────────────────────
pub use crate::config::ConfigError;
pub use crate::error::{CoreError, CoreResult};

// ─── Configuration & settings ───────────────────────────────────────
pub use crate::config::{LogLevel, TracingConfig};
pub use crate::settings::{
    InstanceRecord, SettingDefinition, SettingType, SettingsBinding, SettingsFormat,
    SettingsReport, SettingsSerializer,
};
