//! Channel sources: the objects that own a channel's data.

use dia_common::channel::{ChannelOptions, Permission};
use dia_common::error::CoreResult;
use dia_common::sample::{Sample, ValueType};
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;

/// Out-of-band refresh hook.
pub type RefreshCallback = Arc<dyn Fn() + Send + Sync>;

/// Consumer write hook. Receives the type-checked sample.
pub type SetCallback = Arc<dyn Fn(Sample) -> CoreResult<()> + Send + Sync>;

/// What a consumer `set` did with the sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetOutcome {
    /// The sample became the channel's current value.
    Stored,
    /// The sample was handed to the producer, which publishes on its own.
    Delegated,
}

/// Producer of one channel's samples.
///
/// The producer side is used by the owning driver, the consumer side by
/// readers going through a [`Channel`](super::Channel).
pub trait ChannelSource: Send + Sync {
    /// Declared payload type.
    fn value_type(&self) -> ValueType;

    /// Consumer permission mask.
    fn perm_mask(&self) -> Permission;

    /// Channel options.
    fn options(&self) -> ChannelOptions;

    /// Current sample.
    fn producer_get(&self) -> Sample;

    /// Overwrite the current sample.
    fn producer_set(&self, sample: Sample);

    /// Copy of the current sample for a reader.
    fn consumer_get(&self) -> Sample {
        self.producer_get()
    }

    /// Submit a type-checked sample from a reader.
    fn consumer_set(&self, sample: Sample) -> CoreResult<SetOutcome>;

    /// Ask the producer to re-read its backing sensor.
    fn consumer_refresh(&self);
}

// ─── Descriptor ─────────────────────────────────────────────────────

/// Declaration of one device property, turned into a channel by the core.
#[derive(Clone)]
pub struct ChannelPropertyDescriptor {
    /// Property name; the channel is `<instance>.<name>`.
    pub name: String,
    /// Declared payload type.
    pub value_type: ValueType,
    /// Sample before the first reading.
    pub initial: Sample,
    /// Consumer permissions.
    pub perm: Permission,
    /// Channel options.
    pub options: ChannelOptions,
    /// Called on `refresh`.
    pub refresh_cb: Option<RefreshCallback>,
    /// Called on `set` instead of storing the sample.
    pub set_cb: Option<SetCallback>,
}

impl ChannelPropertyDescriptor {
    /// Read-only property without callbacks.
    pub fn new(name: impl Into<String>, value_type: ValueType, initial: Sample) -> Self {
        Self {
            name: name.into(),
            value_type,
            initial,
            perm: Permission::GET,
            options: ChannelOptions::empty(),
            refresh_cb: None,
            set_cb: None,
        }
    }

    /// Set the permission mask.
    pub fn with_perm(mut self, perm: Permission) -> Self {
        self.perm = perm;
        self
    }

    /// Set the options mask.
    pub fn with_options(mut self, options: ChannelOptions) -> Self {
        self.options = options;
        self
    }

    /// Attach a refresh callback.
    pub fn on_refresh<F>(mut self, refresh: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.refresh_cb = Some(Arc::new(refresh));
        self
    }

    /// Attach a set callback.
    pub fn on_set<F>(mut self, set: F) -> Self
    where
        F: Fn(Sample) -> CoreResult<()> + Send + Sync + 'static,
    {
        self.set_cb = Some(Arc::new(set));
        self
    }
}

impl fmt::Debug for ChannelPropertyDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChannelPropertyDescriptor")
            .field("name", &self.name)
            .field("value_type", &self.value_type)
            .field("initial", &self.initial)
            .field("perm", &self.perm)
            .field("options", &self.options)
            .field("refresh_cb", &self.refresh_cb.is_some())
            .field("set_cb", &self.set_cb.is_some())
            .finish()
    }
}

// ─── Device property source ─────────────────────────────────────────

/// Source backing a device property.
///
/// Stored timestamps never go backwards: a sample older than the current
/// one is stored with the current timestamp.
pub struct DevicePropertySource {
    value_type: ValueType,
    perm: Permission,
    options: ChannelOptions,
    refresh_cb: Option<RefreshCallback>,
    set_cb: Option<SetCallback>,
    sample: Mutex<Sample>,
}

impl DevicePropertySource {
    /// Build a source from a property descriptor.
    pub fn new(descriptor: &ChannelPropertyDescriptor) -> Self {
        Self {
            value_type: descriptor.value_type,
            perm: descriptor.perm,
            options: descriptor.options,
            refresh_cb: descriptor.refresh_cb.clone(),
            set_cb: descriptor.set_cb.clone(),
            sample: Mutex::new(descriptor.initial.clone()),
        }
    }
}

impl ChannelSource for DevicePropertySource {
    fn value_type(&self) -> ValueType {
        self.value_type
    }

    fn perm_mask(&self) -> Permission {
        self.perm
    }

    fn options(&self) -> ChannelOptions {
        self.options
    }

    fn producer_get(&self) -> Sample {
        self.sample.lock().clone()
    }

    fn producer_set(&self, mut sample: Sample) {
        let mut current = self.sample.lock();
        if sample.timestamp.is_nan() || sample.timestamp < current.timestamp {
            sample.timestamp = current.timestamp;
        }
        *current = sample;
    }

    fn consumer_set(&self, sample: Sample) -> CoreResult<SetOutcome> {
        match &self.set_cb {
            Some(set) => {
                set(sample)?;
                Ok(SetOutcome::Delegated)
            }
            None => {
                self.producer_set(sample);
                Ok(SetOutcome::Stored)
            }
        }
    }

    fn consumer_refresh(&self) {
        if let Some(refresh) = &self.refresh_cb {
            refresh();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counter() -> ChannelPropertyDescriptor {
        ChannelPropertyDescriptor::new("counter", ValueType::Int, Sample::new(0.0, 0i64, ""))
    }

    #[test]
    fn test_timestamps_never_go_backwards() {
        let source = DevicePropertySource::new(&counter());
        source.producer_set(Sample::new(100.0, 1i64, ""));
        source.producer_set(Sample::new(50.0, 2i64, ""));
        let sample = source.producer_get();
        assert_eq!(sample.timestamp, 100.0);
        assert_eq!(sample.value, 2i64.into());

        source.producer_set(Sample::new(f64::NAN, 3i64, ""));
        assert_eq!(source.producer_get().timestamp, 100.0);
    }

    #[test]
    fn test_consumer_set_stores_without_callback() {
        let source = DevicePropertySource::new(&counter().with_perm(Permission::GET | Permission::SET));
        let outcome = source.consumer_set(Sample::new(1.0, 9i64, "")).unwrap();
        assert_eq!(outcome, SetOutcome::Stored);
        assert_eq!(source.consumer_get().value, 9i64.into());
    }

    #[test]
    fn test_callbacks_are_invoked() {
        let refreshes = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&refreshes);
        let descriptor = counter()
            .on_refresh(move || {
                seen.fetch_add(1, Ordering::SeqCst);
            })
            .on_set(|_| Ok(()));
        let source = DevicePropertySource::new(&descriptor);

        source.consumer_refresh();
        assert_eq!(refreshes.load(Ordering::SeqCst), 1);

        let outcome = source.consumer_set(Sample::new(1.0, 5i64, "")).unwrap();
        assert_eq!(outcome, SetOutcome::Delegated);
        assert_eq!(source.consumer_get().value, 0i64.into());
    }
}
