//! Channel database: the live set of named channels and their publisher.

use dia_common::channel::{ChannelEventKind, ChannelSnapshot};
use dia_common::consts::CHANNEL_NAME_SEPARATOR;
use dia_common::error::{CoreError, CoreResult};
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::{Arc, Weak};
use tracing::debug;

use super::channel::Channel;
use super::publisher::ChannelPublisher;
use super::source::ChannelSource;

/// Read-only query surface shared by the live database and logger views.
pub trait ChannelView: Send + Sync {
    /// Channel names in order.
    fn channel_list(&self) -> Vec<String>;

    /// Whether a channel named `name` exists.
    fn channel_exists(&self, name: &str) -> bool;

    /// Current state of one channel.
    ///
    /// # Errors
    /// Returns `CoreError::ChannelDoesNotExist` if absent.
    fn channel_snapshot(&self, name: &str) -> CoreResult<ChannelSnapshot>;
}

/// Live channel database.
///
/// Mutations take the map's write lock; queries take the read lock.
/// Events are published after the lock is released.
pub struct ChannelDatabase {
    channels: RwLock<BTreeMap<String, Arc<Channel>>>,
    publisher: ChannelPublisher,
    self_ref: Weak<ChannelDatabase>,
}

impl ChannelDatabase {
    /// Empty database.
    pub fn new() -> Arc<Self> {
        Arc::new_cyclic(|self_ref| Self {
            channels: RwLock::new(BTreeMap::new()),
            publisher: ChannelPublisher::new(),
            self_ref: self_ref.clone(),
        })
    }

    /// The database's publisher.
    pub fn publisher(&self) -> &ChannelPublisher {
        &self.publisher
    }

    /// Add a channel backed by `source` and fire `CHANNEL_ADDED`.
    ///
    /// # Errors
    /// Returns `CoreError::ChannelAlreadyExists` on a duplicate name, or
    /// `CoreError::TypeMismatch` if the source's current sample does not
    /// match its declared type.
    pub fn channel_add(&self, name: &str, source: Arc<dyn ChannelSource>) -> CoreResult<Arc<Channel>> {
        let expected = source.value_type();
        let found = source.producer_get().value.value_type();
        if found != expected {
            return Err(CoreError::TypeMismatch {
                channel: name.to_string(),
                expected,
                found,
            });
        }
        let channel = {
            let mut channels = self.channels.write();
            if channels.contains_key(name) {
                return Err(CoreError::ChannelAlreadyExists(name.to_string()));
            }
            let channel = Arc::new(Channel::new(name.to_string(), source, self.self_ref.clone()));
            channels.insert(name.to_string(), Arc::clone(&channel));
            channel
        };
        debug!("Channel added: {}", name);
        self.publisher
            .publish(ChannelEventKind::ChannelAdded, channel.snapshot());
        Ok(channel)
    }

    /// Remove a channel, drop its subscribers and fire `CHANNEL_REMOVED`.
    ///
    /// # Errors
    /// Returns `CoreError::ChannelDoesNotExist` if absent.
    pub fn channel_remove(&self, name: &str) -> CoreResult<()> {
        let channel = self
            .channels
            .write()
            .remove(name)
            .ok_or_else(|| CoreError::ChannelDoesNotExist(name.to_string()))?;
        channel.mark_removed();
        self.publisher.remove_channel(name);
        debug!("Channel removed: {}", name);
        self.publisher
            .publish(ChannelEventKind::ChannelRemoved, channel.snapshot());
        Ok(())
    }

    /// Look up a channel.
    ///
    /// # Errors
    /// Returns `CoreError::ChannelDoesNotExist` if absent.
    pub fn channel_get(&self, name: &str) -> CoreResult<Arc<Channel>> {
        self.channels
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| CoreError::ChannelDoesNotExist(name.to_string()))
    }

    /// Channel names in order.
    pub fn channel_list(&self) -> Vec<String> {
        self.channels.read().keys().cloned().collect()
    }

    /// Whether a channel exists.
    pub fn channel_exists(&self, name: &str) -> bool {
        self.channels.read().contains_key(name)
    }

    /// Remove every channel owned by a device instance (`<instance>.*`).
    ///
    /// Returns the removed names.
    pub fn remove_instance_channels(&self, instance: &str) -> Vec<String> {
        let prefix = format!("{instance}{CHANNEL_NAME_SEPARATOR}");
        let names: Vec<String> = self
            .channels
            .read()
            .keys()
            .filter(|name| name.starts_with(&prefix))
            .cloned()
            .collect();
        names
            .into_iter()
            .filter(|name| self.channel_remove(name).is_ok())
            .collect()
    }

    /// Publish the current sample of `name` as `NEW_SAMPLE`.
    ///
    /// Used by producers after writing through the producer side.
    ///
    /// # Errors
    /// Returns `CoreError::ChannelDoesNotExist` if absent.
    pub fn notify_new_sample(&self, name: &str) -> CoreResult<()> {
        let channel = self.channel_get(name)?;
        self.publish_new_sample(&channel);
        Ok(())
    }

    pub(crate) fn publish_new_sample(&self, channel: &Channel) {
        self.publisher
            .publish(ChannelEventKind::NewSample, channel.snapshot());
    }
}

impl ChannelView for ChannelDatabase {
    fn channel_list(&self) -> Vec<String> {
        ChannelDatabase::channel_list(self)
    }

    fn channel_exists(&self, name: &str) -> bool {
        ChannelDatabase::channel_exists(self, name)
    }

    fn channel_snapshot(&self, name: &str) -> CoreResult<ChannelSnapshot> {
        Ok(self.channel_get(name)?.snapshot())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channels::source::{ChannelPropertyDescriptor, DevicePropertySource};
    use crate::logging::LoggingSink;
    use dia_common::channel::{ChannelOptions, LoggingEvent, LoggingEventKind, Permission};
    use dia_common::sample::{Sample, SampleValue, ValueType};
    use parking_lot::Mutex;
    use std::thread;

    fn source(value_type: ValueType, initial: impl Into<SampleValue>, perm: Permission) -> Arc<dyn ChannelSource> {
        let descriptor = ChannelPropertyDescriptor::new("p", value_type, Sample::new(0.0, initial, ""))
            .with_perm(perm);
        Arc::new(DevicePropertySource::new(&descriptor))
    }

    fn rw() -> Permission {
        Permission::GET | Permission::SET
    }

    #[test]
    fn test_add_get_remove() {
        let db = ChannelDatabase::new();
        db.channel_add("t1.counter", source(ValueType::Int, 0i64, Permission::GET))
            .unwrap();
        assert!(db.channel_exists("t1.counter"));
        assert_eq!(db.channel_get("t1.counter").unwrap().get().unwrap().value, 0i64.into());

        db.channel_remove("t1.counter").unwrap();
        assert!(!db.channel_exists("t1.counter"));
        assert!(matches!(
            db.channel_get("t1.counter"),
            Err(CoreError::ChannelDoesNotExist(_))
        ));
        assert!(matches!(
            db.channel_remove("t1.counter"),
            Err(CoreError::ChannelDoesNotExist(_))
        ));
    }

    #[test]
    fn test_duplicate_add_fails() {
        let db = ChannelDatabase::new();
        db.channel_add("c", source(ValueType::Int, 0i64, Permission::GET)).unwrap();
        let result = db.channel_add("c", source(ValueType::Int, 0i64, Permission::GET));
        assert!(matches!(result, Err(CoreError::ChannelAlreadyExists(_))));
    }

    #[test]
    fn test_mistyped_initial_sample_rejected() {
        let db = ChannelDatabase::new();
        let result = db.channel_add("t1.temp", source(ValueType::Float, 5i64, Permission::GET));
        assert!(matches!(
            result,
            Err(CoreError::TypeMismatch {
                expected: ValueType::Float,
                found: ValueType::Int,
                ..
            })
        ));
        assert!(!db.channel_exists("t1.temp"));
    }

    #[test]
    fn test_permissions_enforced() {
        let db = ChannelDatabase::new();
        let channel = db
            .channel_add("c", source(ValueType::Int, 0i64, Permission::SET))
            .unwrap();
        assert!(matches!(
            channel.get(),
            Err(CoreError::AccessViolation { operation: "get", .. })
        ));
        assert!(matches!(
            channel.refresh(),
            Err(CoreError::AccessViolation { operation: "refresh", .. })
        ));
        channel.set(Sample::new(1.0, 3i64, "")).unwrap();
        assert_eq!(channel.snapshot().sample.value, 3i64.into());
    }

    #[test]
    fn test_set_remaps_and_rejects() {
        let db = ChannelDatabase::new();
        let channel = db.channel_add("c", source(ValueType::Float, 0.0, rw())).unwrap();
        channel.set(Sample::new(1.0, 2i64, "")).unwrap();
        assert_eq!(channel.get().unwrap().value, SampleValue::Float(2.0));

        channel.set(Sample::new(2.0, "2.5", "")).unwrap();
        assert_eq!(channel.get().unwrap().value, SampleValue::Float(2.5));

        let result = channel.set(Sample::new(3.0, "warm", ""));
        assert!(matches!(
            result,
            Err(CoreError::TypeMismatch {
                expected: ValueType::Float,
                found: ValueType::Str,
                ..
            })
        ));
    }

    #[test]
    fn test_autotimestamp_overrides_time() {
        let db = ChannelDatabase::new();
        let descriptor = ChannelPropertyDescriptor::new("p", ValueType::Int, Sample::new(0.0, 0i64, ""))
            .with_perm(rw())
            .with_options(ChannelOptions::AUTOTIMESTAMP);
        let channel = db
            .channel_add("c", Arc::new(DevicePropertySource::new(&descriptor)))
            .unwrap();
        channel.set(Sample::new(5.0, 1i64, "")).unwrap();
        assert!(channel.get().unwrap().timestamp > 1_000_000.0);
    }

    #[test]
    fn test_set_publishes_and_remove_silences() {
        let db = ChannelDatabase::new();
        let channel = db.channel_add("c", source(ValueType::Int, 0i64, rw())).unwrap();
        let values = Arc::new(Mutex::new(Vec::new()));
        let seen = Arc::clone(&values);
        db.publisher().subscribe("c", move |event| {
            seen.lock().push(event.channel.sample.value.clone());
            Ok(())
        });

        channel.set(Sample::new(1.0, 4i64, "")).unwrap();
        db.channel_remove("c").unwrap();
        assert!(channel.is_removed());
        assert!(matches!(
            channel.set(Sample::new(2.0, 5i64, "")),
            Err(CoreError::ChannelDoesNotExist(_))
        ));

        assert_eq!(*values.lock(), vec![SampleValue::Int(4)]);
    }

    struct KindLog(Mutex<Vec<LoggingEventKind>>);

    impl LoggingSink for KindLog {
        fn dispatch_logging_event(&self, event: LoggingEvent) -> CoreResult<()> {
            self.0.lock().push(event.kind);
            Ok(())
        }
    }

    #[test]
    fn test_removed_channel_logs_no_samples() {
        let db = ChannelDatabase::new();
        let log = Arc::new(KindLog(Mutex::new(Vec::new())));
        let sink: Arc<dyn LoggingSink> = log.clone();
        db.publisher().attach_logging(Arc::downgrade(&sink));

        let channel = db.channel_add("c", source(ValueType::Int, 0i64, rw())).unwrap();
        channel.set(Sample::new(1.0, 1i64, "")).unwrap();
        db.channel_remove("c").unwrap();
        assert!(channel.set(Sample::new(2.0, 2i64, "")).is_err());

        assert_eq!(channel.get().unwrap().value, SampleValue::Int(1));
        assert_eq!(
            *log.0.lock(),
            vec![
                LoggingEventKind::ChannelAdded,
                LoggingEventKind::NewSample,
                LoggingEventKind::ChannelRemoved,
            ]
        );
    }

    #[test]
    fn test_wildcard_sees_add_and_remove() {
        let db = ChannelDatabase::new();
        let names = Arc::new(Mutex::new(Vec::new()));
        let seen = Arc::clone(&names);
        db.publisher().subscribe_new_channels(move |event| {
            seen.lock().push((event.kind, event.channel.name.clone()));
            Ok(())
        });
        db.channel_add("a.x", source(ValueType::Int, 0i64, Permission::GET)).unwrap();
        db.channel_remove("a.x").unwrap();
        assert_eq!(
            *names.lock(),
            vec![
                (ChannelEventKind::ChannelAdded, "a.x".to_string()),
                (ChannelEventKind::ChannelRemoved, "a.x".to_string()),
            ]
        );
    }

    #[test]
    fn test_remove_instance_channels() {
        let db = ChannelDatabase::new();
        for name in ["d.a", "d.b", "dd.a", "e.a"] {
            db.channel_add(name, source(ValueType::Int, 0i64, Permission::GET)).unwrap();
        }
        let removed = db.remove_instance_channels("d");
        assert_eq!(removed, vec!["d.a".to_string(), "d.b".to_string()]);
        assert_eq!(db.channel_list(), vec!["dd.a".to_string(), "e.a".to_string()]);
    }

    #[test]
    fn test_concurrent_gets_are_monotonic() {
        let db = ChannelDatabase::new();
        let channel = db.channel_add("c", source(ValueType::Int, 0i64, rw())).unwrap();

        let writers: Vec<_> = (0..4)
            .map(|w| {
                let channel = Arc::clone(&channel);
                thread::spawn(move || {
                    for i in 0..200 {
                        let ts = f64::from((i * 7 + w * 13) % 97);
                        channel.set(Sample::new(ts, i64::from(i), "")).unwrap();
                    }
                })
            })
            .collect();

        let reader = {
            let channel = Arc::clone(&channel);
            thread::spawn(move || {
                let mut last = f64::MIN;
                for _ in 0..500 {
                    let ts = channel.get().unwrap().timestamp;
                    assert!(ts >= last);
                    last = ts;
                }
            })
        };

        for writer in writers {
            writer.join().unwrap();
        }
        reader.join().unwrap();
    }

    #[test]
    fn test_channel_get_exists_agree() {
        let db = ChannelDatabase::new();
        db.channel_add("x.y", source(ValueType::Bool, false, Permission::GET)).unwrap();
        for name in ["x.y", "x.z", ""] {
            assert_eq!(db.channel_exists(name), db.channel_get(name).is_ok());
        }
    }
}
