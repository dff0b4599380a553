//! A named, typed channel and its consumer operations.

use dia_common::channel::{ChannelOptions, ChannelSnapshot, Permission};
use dia_common::error::{CoreError, CoreResult};
use dia_common::sample::{Sample, ValueType, now_timestamp};
use parking_lot::ReentrantMutex;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use super::database::ChannelDatabase;
use super::source::{ChannelSource, SetOutcome};

/// Named, typed cell backed by a [`ChannelSource`].
///
/// `get`, `set` and `refresh` are serialized per channel. Once the
/// channel is removed from its database, `set` fails and nothing more is
/// published for it.
pub struct Channel {
    name: String,
    source: Arc<dyn ChannelSource>,
    database: Weak<ChannelDatabase>,
    op_lock: ReentrantMutex<()>,
    removed: AtomicBool,
}

impl Channel {
    pub(crate) fn new(name: String, source: Arc<dyn ChannelSource>, database: Weak<ChannelDatabase>) -> Self {
        Self {
            name,
            source,
            database,
            op_lock: ReentrantMutex::new(()),
            removed: AtomicBool::new(false),
        }
    }

    pub(crate) fn mark_removed(&self) {
        let _guard = self.op_lock.lock();
        self.removed.store(true, Ordering::SeqCst);
    }

    /// Whether the channel has been removed from its database.
    pub fn is_removed(&self) -> bool {
        self.removed.load(Ordering::SeqCst)
    }

    /// Fully qualified name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Declared payload type.
    pub fn value_type(&self) -> ValueType {
        self.source.value_type()
    }

    /// Consumer permission mask.
    pub fn perm_mask(&self) -> Permission {
        self.source.perm_mask()
    }

    /// Channel options.
    pub fn options(&self) -> ChannelOptions {
        self.source.options()
    }

    /// Backing source.
    pub fn source(&self) -> &Arc<dyn ChannelSource> {
        &self.source
    }

    fn require(&self, permission: Permission, operation: &'static str) -> CoreResult<()> {
        if self.perm_mask().contains(permission) {
            Ok(())
        } else {
            Err(CoreError::AccessViolation {
                channel: self.name.clone(),
                operation,
            })
        }
    }

    /// Copy of the current sample.
    ///
    /// # Errors
    /// Returns `CoreError::AccessViolation` without the `GET` bit.
    pub fn get(&self) -> CoreResult<Sample> {
        self.require(Permission::GET, "get")?;
        let _guard = self.op_lock.lock();
        Ok(self.source.consumer_get())
    }

    /// Submit a new sample.
    ///
    /// The payload is remapped to the declared type first. With
    /// `AUTOTIMESTAMP` the timestamp is replaced by the receive time.
    /// A stored sample is published as `NEW_SAMPLE`.
    ///
    /// # Errors
    /// Returns `CoreError::ChannelDoesNotExist` once the channel has been
    /// removed, `CoreError::AccessViolation` without the `SET` bit,
    /// `CoreError::TypeMismatch` if the payload cannot be remapped, or
    /// whatever the source's set callback returns.
    pub fn set(&self, sample: Sample) -> CoreResult<()> {
        self.require(Permission::SET, "set")?;
        let declared = self.value_type();

        let outcome = {
            let _guard = self.op_lock.lock();
            if self.is_removed() {
                return Err(CoreError::ChannelDoesNotExist(self.name.clone()));
            }
            let current = self.source.consumer_get();
            let found = sample.value.value_type();
            let value = sample
                .value
                .remap(declared, Some(&current.value))
                .ok_or_else(|| CoreError::TypeMismatch {
                    channel: self.name.clone(),
                    expected: declared,
                    found,
                })?;
            let timestamp = if self.options().contains(ChannelOptions::AUTOTIMESTAMP) {
                now_timestamp()
            } else {
                sample.timestamp
            };
            self.source.consumer_set(Sample {
                timestamp,
                value,
                unit: sample.unit,
            })?
        };

        if outcome == SetOutcome::Stored
            && !self.is_removed()
            && let Some(database) = self.database.upgrade()
        {
            database.publish_new_sample(self);
        }
        Ok(())
    }

    /// Ask the producer to re-read its sensor.
    ///
    /// # Errors
    /// Returns `CoreError::AccessViolation` without the `REFRESH` bit.
    pub fn refresh(&self) -> CoreResult<()> {
        self.require(Permission::REFRESH, "refresh")?;
        let _guard = self.op_lock.lock();
        self.source.consumer_refresh();
        Ok(())
    }

    /// Metadata plus current sample, regardless of permissions.
    pub fn snapshot(&self) -> ChannelSnapshot {
        let _guard = self.op_lock.lock();
        ChannelSnapshot {
            name: self.name.clone(),
            value_type: self.value_type(),
            perm_mask: self.perm_mask(),
            sample: self.source.producer_get(),
        }
    }
}

impl fmt::Debug for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Channel")
            .field("name", &self.name)
            .field("value_type", &self.value_type())
            .field("perm_mask", &self.perm_mask())
            .finish()
    }
}
