//! DIA Common Library
//!
//! Shared types for the DIA device-integration runtime: samples and
//! their payloads, channel metadata and logging events, the settings
//! document model and the error taxonomy.
//!
//! # Module Structure
//!
//! - [`sample`] - Timestamped samples and typed payloads
//! - [`channel`] - Permission masks, channel snapshots, logging events
//! - [`settings`] - Settings documents, bindings, definitions, serializers
//! - [`config`] - Tracing configuration and document errors
//! - [`error`] - `CoreError` taxonomy
//! - [`consts`] - Well-known service names and document keys
//! - [`prelude`] - Common re-exports for convenience
//!
//! # Usage
//!
//! ```rust
//! use dia_common::prelude::*;
//!
//! let sample = Sample::new(100.0, 7i64, "counts");
//! assert_eq!(sample.value.value_type(), ValueType::Int);
//! ```

pub mod channel;
pub mod config;
pub mod consts;
pub mod error;
pub mod prelude;
pub mod sample;
pub mod settings;
