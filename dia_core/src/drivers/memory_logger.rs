//! Bounded in-memory logger.

use dia_common::channel::{ChannelSnapshot, LoggingEvent};
use dia_common::consts::LOGGERS_KEY;
use dia_common::error::{CoreError, CoreResult};
use dia_common::settings::{SettingDefinition, SettingType, SettingsBinding, SettingsReport};
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::debug;

use crate::channels::ChannelView;
use crate::core_services::CoreServices;
use crate::logging::{LogPosition, LogReplay, Logger, Whence};
use crate::service::Service;
use crate::settings::SettingsBase;

/// Driver reference.
pub const DRIVER: &str = "dia_core.loggers.memory:MemoryLogger";

const DEFAULT_CAPACITY: usize = 1024;

/// Logger keeping the most recent `capacity` events in memory.
pub struct MemoryLogger {
    name: String,
    settings: SettingsBase,
    replay: Mutex<LogReplay>,
}

/// Factory registered in the driver catalog.
pub fn create(name: &str, core: &Arc<CoreServices>) -> CoreResult<Arc<dyn Logger>> {
    let settings = SettingsBase::new(
        core.settings()?,
        SettingsBinding::instance(LOGGERS_KEY, name),
        vec![
            SettingDefinition::new("capacity", SettingType::Integer)
                .with_default(DEFAULT_CAPACITY)
                .with_verify(|v| v.as_i64().is_some_and(|c| c > 0)),
        ],
    );
    Ok(Arc::new(MemoryLogger {
        name: name.to_string(),
        settings,
        replay: Mutex::new(LogReplay::new(DEFAULT_CAPACITY)),
    }))
}

impl MemoryLogger {
    /// Number of stored records.
    pub fn len(&self) -> usize {
        self.replay.lock().len()
    }

    /// True when nothing is stored.
    pub fn is_empty(&self) -> bool {
        self.replay.lock().is_empty()
    }
}

impl Service for MemoryLogger {
    fn instance_name(&self) -> &str {
        &self.name
    }

    fn apply_settings(&self) -> CoreResult<SettingsReport> {
        let report = self.settings.apply_settings()?;
        let capacity = self
            .settings
            .get_setting_as::<usize>("capacity")
            .unwrap_or(DEFAULT_CAPACITY);
        self.replay.lock().set_capacity(capacity);
        debug!("{}: holding up to {} records", self.name, capacity);
        Ok(report)
    }

    fn start(&self) -> CoreResult<()> {
        Ok(())
    }

    fn stop(&self) -> CoreResult<()> {
        Ok(())
    }
}

impl ChannelView for MemoryLogger {
    fn channel_list(&self) -> Vec<String> {
        self.replay.lock().state().into_keys().collect()
    }

    fn channel_exists(&self, name: &str) -> bool {
        self.replay.lock().state().contains_key(name)
    }

    fn channel_snapshot(&self, name: &str) -> CoreResult<ChannelSnapshot> {
        self.replay
            .lock()
            .state()
            .remove(name)
            .ok_or_else(|| CoreError::ChannelDoesNotExist(name.to_string()))
    }
}

impl Logger for MemoryLogger {
    fn log_event(&self, event: &LoggingEvent) -> CoreResult<()> {
        self.replay.lock().append(event.clone());
        Ok(())
    }

    fn log_next(&self) -> CoreResult<Option<LoggingEvent>> {
        Ok(self.replay.lock().next())
    }

    fn log_prev(&self) -> CoreResult<Option<LoggingEvent>> {
        Ok(self.replay.lock().prev())
    }

    fn log_rewind(&self) -> CoreResult<()> {
        self.replay.lock().rewind();
        Ok(())
    }

    fn log_seek(&self, offset: i64, whence: Whence, record: Option<u64>) -> CoreResult<u64> {
        self.replay.lock().seek(offset, whence, record)
    }

    fn log_position(&self) -> Option<LogPosition> {
        self.replay.lock().position()
    }
}
