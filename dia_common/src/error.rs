//! Error types shared by every DIA crate.
//!
//! `CoreError` names each failure kind the runtime core can surface:
//! lookup failures, constraint violations, transient external failures
//! and settings/document problems. Isolated subscriber failures are
//! logged by the publisher and never reach a caller.

use crate::config::ConfigError;
use crate::sample::ValueType;
use thiserror::Error;

/// Result alias used throughout the runtime core.
pub type CoreResult<T> = Result<T, CoreError>;

/// Error types for runtime core operations.
#[derive(Debug, Clone, Error)]
pub enum CoreError {
    // ─── Lookup failures ────────────────────────────────────────────
    /// No channel with the given name exists in the database.
    #[error("Channel does not exist: {0}")]
    ChannelDoesNotExist(String),

    /// No service is registered under the given name.
    #[error("Service not registered: {0}")]
    ServiceNotRegistered(String),

    /// A driver reference could not be resolved to a factory.
    #[error("Object not found: {0}")]
    ObjectNotFound(String),

    /// Scheduler handle refers to an event that already fired or was cancelled.
    #[error("Scheduled event not found: {0}")]
    NotFound(u64),

    // ─── Constraint violations ──────────────────────────────────────
    /// A channel with the given name already exists.
    #[error("Channel already exists: {0}")]
    ChannelAlreadyExists(String),

    /// A sample payload does not match the declared channel type.
    #[error("Type mismatch on {channel}: expected {expected}, found {found}")]
    TypeMismatch {
        /// Channel (or setting) being written.
        channel: String,
        /// Declared type.
        expected: ValueType,
        /// Type of the submitted payload.
        found: ValueType,
    },

    /// The channel's permission mask does not allow the operation.
    #[error("Access violation on {channel}: {operation} not permitted")]
    AccessViolation {
        /// Channel name.
        channel: String,
        /// Rejected operation (`get`, `set` or `refresh`).
        operation: &'static str,
    },

    /// The scheduler refused to accept a callback.
    #[error("Bad callback: {0}")]
    BadCallback(String),

    /// A logging event is missing required payload.
    #[error("Malformed logging event: {0}")]
    MalformedEvent(String),

    /// A log seek landed outside the stored record range.
    #[error("Seek out of range: record {requested} not in [{first}, {last}]")]
    SeekOutOfRange {
        /// Requested absolute record index.
        requested: i64,
        /// Earliest stored record.
        first: u64,
        /// Latest stored record.
        last: u64,
    },

    // ─── Driver lifecycle ───────────────────────────────────────────
    /// Driver construction failed.
    #[error("Failed to load {instance}: {reason}")]
    LoadError {
        /// Instance name.
        instance: String,
        /// Reason reported by the factory.
        reason: String,
    },

    /// Driver start failed; the instance stays pending.
    #[error("Failed to start {instance}: {reason}")]
    StartFailed {
        /// Instance name.
        instance: String,
        /// Reason reported by the driver.
        reason: String,
    },

    // ─── Transient external ─────────────────────────────────────────
    /// A remote operation exhausted its retry budget.
    #[error("Operation timed out after {attempts} attempts: {operation}")]
    OperationTimeout {
        /// Operation description.
        operation: String,
        /// Attempts made before giving up.
        attempts: u32,
    },

    // ─── Core workers ───────────────────────────────────────────────
    /// A core worker thread could not be spawned or joined.
    #[error("Worker error: {0}")]
    Worker(String),

    // ─── Settings & documents ───────────────────────────────────────
    /// Settings store failure (unknown binding, bad path).
    #[error("Settings error: {0}")]
    Settings(String),

    /// Settings document load/save failure.
    #[error(transparent)]
    Config(#[from] ConfigError),
}
