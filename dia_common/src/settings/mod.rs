//! Settings document model.
//!
//! - [`document`] - binding paths, tree walking and instance records
//! - [`definition`] - declared settings and the verify step
//! - [`serializer`] - pluggable TOML/YAML/JSON document formats

pub mod definition;
pub mod document;
pub mod serializer;

pub use definition::{SettingDefinition, SettingType, SettingsReport, VerifyFn, verify_settings};
pub use document::{InstanceRecord, SettingsBinding, parse_instance_list};
pub use serializer::{
    JsonSerializer, SettingsFormat, SettingsSerializer, TomlSerializer, YamlSerializer,
};
