//! Channel metadata, snapshots and logging events.
//!
//! These are the plain-data shapes that travel between the live channel
//! database, the publisher and the loggers. The live objects themselves
//! live in `dia_core::channels`.

use bitflags::bitflags;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::sample::{Sample, ValueType};

bitflags! {
    /// Operations a consumer may perform on a channel.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub struct Permission: u8 {
        /// Read the current sample.
        const GET     = 0x01;
        /// Submit a new sample.
        const SET     = 0x02;
        /// Request an out-of-band refresh.
        const REFRESH = 0x04;
    }
}

impl Default for Permission {
    fn default() -> Self {
        Self::GET
    }
}

bitflags! {
    /// Channel behaviour options.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub struct ChannelOptions: u8 {
        /// Stamp every stored sample with the receive time.
        const AUTOTIMESTAMP = 0x01;
    }
}

impl Default for ChannelOptions {
    fn default() -> Self {
        Self::empty()
    }
}

/// Point-in-time copy of a channel: metadata plus its sample.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelSnapshot {
    /// Fully qualified channel name (`<device-instance>.<property>`).
    pub name: String,
    /// Declared payload type.
    pub value_type: ValueType,
    /// Consumer permission mask.
    pub perm_mask: Permission,
    /// Sample at the time of the snapshot.
    pub sample: Sample,
}

// ─── Events ─────────────────────────────────────────────────────────

/// Kind of event fired by the channel publisher.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChannelEventKind {
    /// A channel was added to the database.
    ChannelAdded,
    /// A channel was removed from the database.
    ChannelRemoved,
    /// A channel received a new sample.
    NewSample,
}

/// Tag of a record fed to the logging manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LoggingEventKind {
    /// A channel was added to the database.
    ChannelAdded,
    /// A channel was removed from the database.
    ChannelRemoved,
    /// A channel received a new sample.
    NewSample,
    /// Logger bookkeeping record without a channel.
    Meta,
}

impl From<ChannelEventKind> for LoggingEventKind {
    fn from(kind: ChannelEventKind) -> Self {
        match kind {
            ChannelEventKind::ChannelAdded => Self::ChannelAdded,
            ChannelEventKind::ChannelRemoved => Self::ChannelRemoved,
            ChannelEventKind::NewSample => Self::NewSample,
        }
    }
}

impl fmt::Display for LoggingEventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::ChannelAdded => "CHANNEL_ADDED",
            Self::ChannelRemoved => "CHANNEL_REMOVED",
            Self::NewSample => "NEW_SAMPLE",
            Self::Meta => "META",
        };
        f.write_str(name)
    }
}

/// Record delivered to every running logger.
///
/// `record` is assigned by the logger that stores the event; events
/// emitted by the live database carry `0`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingEvent {
    /// Event tag.
    pub kind: LoggingEventKind,
    /// Absolute record number within a logger.
    pub record: u64,
    /// Channel state the event refers to. Absent for `Meta`.
    pub channel: Option<ChannelSnapshot>,
    /// Free-form description.
    pub description: String,
}

impl LoggingEvent {
    /// Build an event describing a channel.
    pub fn for_channel(kind: ChannelEventKind, channel: ChannelSnapshot) -> Self {
        Self {
            kind: kind.into(),
            record: 0,
            description: channel.name.clone(),
            channel: Some(channel),
        }
    }

    /// Build a bookkeeping event.
    pub fn meta(description: impl Into<String>) -> Self {
        Self {
            kind: LoggingEventKind::Meta,
            record: 0,
            channel: None,
            description: description.into(),
        }
    }

    /// Timestamp of the carried sample, if any.
    pub fn timestamp(&self) -> Option<f64> {
        self.channel.as_ref().map(|c| c.sample.timestamp)
    }

    /// Check the event carries the payload its tag requires.
    ///
    /// Returns a description of the problem when malformed.
    pub fn validate(&self) -> Result<(), String> {
        match (self.kind, &self.channel) {
            (LoggingEventKind::Meta, _) => Ok(()),
            (kind, None) => Err(format!("{kind} event without a channel")),
            (_, Some(channel)) if channel.name.is_empty() => {
                Err(format!("{} event with an unnamed channel", self.kind))
            }
            (_, Some(channel)) if channel.sample.value.value_type() != channel.value_type => {
                Err(format!(
                    "{} event for {} carries {} but channel is {}",
                    self.kind,
                    channel.name,
                    channel.sample.value.value_type(),
                    channel.value_type
                ))
            }
            _ => Ok(()),
        }
    }
}
