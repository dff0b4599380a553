//! Logging subsystem: loggers as historical channel views, and the
//! manager that feeds them.
//!
//! ```text
//!  ChannelPublisher ──LoggingEvent──► LoggingManager ──log_event──► Logger 1
//!                                         (validate)  └──────────► Logger N
//! ```
//!
//! A [`Logger`] answers the same queries as the live database
//! ([`ChannelView`]) but over the state replayed up to its cursor.

mod view;

pub use view::{LogPosition, LogReplay, Whence};

use dia_common::channel::LoggingEvent;
use dia_common::consts::LOGGERS_KEY;
use dia_common::error::{CoreError, CoreResult};
use std::ops::Deref;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use tracing::{debug, error};

use crate::channels::ChannelView;
use crate::core_services::CoreServices;
use crate::driver_registry::DriverRegistry;
use crate::service::{Service, ServiceManager};

/// Receiver of logging events.
pub trait LoggingSink: Send + Sync {
    /// Deliver one event.
    fn dispatch_logging_event(&self, event: LoggingEvent) -> CoreResult<()>;
}

/// A logger: a driver storing events and replaying them through the
/// channel view surface.
pub trait Logger: Service + ChannelView {
    /// Store one event.
    fn log_event(&self, event: &LoggingEvent) -> CoreResult<()>;

    /// Record at the cursor; advances the cursor. `None` at the end.
    fn log_next(&self) -> CoreResult<Option<LoggingEvent>>;

    /// Record before the cursor; moves the cursor back onto it.
    fn log_prev(&self) -> CoreResult<Option<LoggingEvent>>;

    /// Move the cursor to the earliest stored record.
    fn log_rewind(&self) -> CoreResult<()>;

    /// Move the cursor relative to `whence`; `record` is the reference for
    /// [`Whence::Rec`]. Returns the new cursor.
    fn log_seek(&self, offset: i64, whence: Whence, record: Option<u64>) -> CoreResult<u64>;

    /// Record last delivered by the cursor.
    fn log_position(&self) -> Option<LogPosition>;
}

impl dyn Logger {
    /// Lazy forward iteration from `from_record` through `to_record`
    /// (inclusive), or to the end.
    ///
    /// Seeks immediately; every step advances the logger's cursor.
    ///
    /// # Errors
    /// Returns `CoreError::SeekOutOfRange` if `from_record` is not stored.
    pub fn log_event_iterator(&self, from_record: u64, to_record: Option<u64>) -> CoreResult<LogEventIterator<'_>> {
        self.log_seek(0, Whence::Rec, Some(from_record))?;
        Ok(LogEventIterator {
            logger: self,
            to_record,
            done: false,
        })
    }
}

/// Iterator returned by `log_event_iterator`.
pub struct LogEventIterator<'a> {
    logger: &'a dyn Logger,
    to_record: Option<u64>,
    done: bool,
}

impl Iterator for LogEventIterator<'_> {
    type Item = CoreResult<LoggingEvent>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        if let Some(to) = self.to_record {
            match self.logger.log_seek(0, Whence::Cur, None) {
                Ok(cursor) if cursor > to => {
                    self.done = true;
                    return None;
                }
                Ok(_) => {}
                Err(e) => {
                    self.done = true;
                    return Some(Err(e));
                }
            }
        }
        match self.logger.log_next() {
            Ok(Some(event)) => Some(Ok(event)),
            Ok(None) => {
                self.done = true;
                None
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}

// ─── Manager ────────────────────────────────────────────────────────

/// Service manager specialized for loggers.
pub struct LoggingManager {
    manager: ServiceManager<dyn Logger>,
}

impl LoggingManager {
    /// Manager for the `loggers` category.
    pub fn new(core: Arc<CoreServices>, drivers: DriverRegistry<dyn Logger>) -> Self {
        Self {
            manager: ServiceManager::new(LOGGERS_KEY, core, drivers),
        }
    }
}

impl Deref for LoggingManager {
    type Target = ServiceManager<dyn Logger>;

    fn deref(&self) -> &Self::Target {
        &self.manager
    }
}

impl LoggingSink for LoggingManager {
    /// Validate `event` and deliver it to every running logger.
    ///
    /// A failing logger is logged and the others still receive the event.
    fn dispatch_logging_event(&self, event: LoggingEvent) -> CoreResult<()> {
        event.validate().map_err(CoreError::MalformedEvent)?;
        for logger in self.running_instances() {
            let delivered = panic::catch_unwind(AssertUnwindSafe(|| logger.log_event(&event)));
            match delivered {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    error!(logger = %logger.instance_name(), "log_event failed: {}", e);
                }
                Err(_) => {
                    error!(logger = %logger.instance_name(), "log_event panicked");
                }
            }
        }
        debug!("Dispatched {} to loggers", event.kind);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dia_common::channel::{ChannelEventKind, ChannelSnapshot, LoggingEventKind, Permission};
    use dia_common::sample::{Sample, ValueType};
    use dia_common::settings::{InstanceRecord, SettingsReport};
    use parking_lot::Mutex;

    struct VecLogger {
        name: String,
        replay: Mutex<LogReplay>,
        fail: bool,
    }

    impl Service for VecLogger {
        fn instance_name(&self) -> &str {
            &self.name
        }
        fn apply_settings(&self) -> CoreResult<SettingsReport> {
            Ok(SettingsReport::default())
        }
        fn start(&self) -> CoreResult<()> {
            Ok(())
        }
        fn stop(&self) -> CoreResult<()> {
            Ok(())
        }
    }

    impl ChannelView for VecLogger {
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

    impl Logger for VecLogger {
        fn log_event(&self, event: &LoggingEvent) -> CoreResult<()> {
            if self.fail {
                return Err(CoreError::Worker("disk full".to_string()));
            }
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

    fn failing(name: &str, _core: &Arc<CoreServices>) -> CoreResult<Arc<dyn Logger>> {
        Ok(Arc::new(VecLogger {
            name: name.to_string(),
            replay: Mutex::new(LogReplay::new(16)),
            fail: true,
        }))
    }

    fn working(name: &str, _core: &Arc<CoreServices>) -> CoreResult<Arc<dyn Logger>> {
        Ok(Arc::new(VecLogger {
            name: name.to_string(),
            replay: Mutex::new(LogReplay::new(16)),
            fail: false,
        }))
    }

    fn event(value: i64) -> LoggingEvent {
        LoggingEvent::for_channel(
            ChannelEventKind::NewSample,
            ChannelSnapshot {
                name: "c".to_string(),
                value_type: ValueType::Int,
                perm_mask: Permission::GET,
                sample: Sample::new(value as f64, value, ""),
            },
        )
    }

    fn manager() -> LoggingManager {
        let mut drivers: DriverRegistry<dyn Logger> = DriverRegistry::new();
        drivers.register("tests.loggers:Failing", failing);
        drivers.register("tests.loggers:Working", working);
        let manager = LoggingManager::new(CoreServices::new(), drivers);
        manager.load_records(vec![
            InstanceRecord {
                name: "bad".to_string(),
                driver: "tests.loggers:Failing".to_string(),
                settings: None,
            },
            InstanceRecord {
                name: "good".to_string(),
                driver: "tests.loggers:Working".to_string(),
                settings: None,
            },
        ]);
        manager.start_all();
        manager
    }

    #[test]
    fn test_failing_logger_does_not_stop_dispatch() {
        let manager = manager();
        manager.dispatch_logging_event(event(1)).unwrap();
        let good = manager.instance_get("good").unwrap();
        assert_eq!(good.log_next().unwrap().unwrap().record, 0);
    }

    #[test]
    fn test_malformed_event_rejected() {
        let manager = manager();
        let mut bad = event(1);
        bad.channel = None;
        assert!(matches!(
            manager.dispatch_logging_event(bad),
            Err(CoreError::MalformedEvent(_))
        ));
        assert!(manager.dispatch_logging_event(LoggingEvent::meta("boot")).is_ok());
    }

    #[test]
    fn test_iterator_bounds_and_cursor() {
        let manager = manager();
        for v in 1..=5 {
            manager.dispatch_logging_event(event(v)).unwrap();
        }
        let good = manager.instance_get("good").unwrap();

        let records: Vec<u64> = good
            .log_event_iterator(1, Some(3))
            .unwrap()
            .map(|e| e.unwrap().record)
            .collect();
        assert_eq!(records, vec![1, 2, 3]);
        assert_eq!(good.log_position().unwrap().record, 3);
        assert_eq!(good.log_next().unwrap().unwrap().record, 4);

        assert!(good.log_event_iterator(9, None).is_err());

        let all: Vec<_> = good.log_event_iterator(0, None).unwrap().collect();
        assert_eq!(all.len(), 5);
        assert!(all.iter().all(|e| e.as_ref().unwrap().kind == LoggingEventKind::NewSample));
        assert!(good.channel_exists("c"));
    }
}
