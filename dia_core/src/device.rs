//! Device drivers: services that own channel properties.

use dia_common::consts::{CHANNEL_NAME_SEPARATOR, DEVICES_KEY};
use dia_common::error::{CoreError, CoreResult};
use dia_common::sample::Sample;
use dia_common::settings::{SettingDefinition, SettingsBinding};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::debug;

use crate::channels::{ChannelPropertyDescriptor, ChannelSource, DevicePropertySource};
use crate::core_services::CoreServices;
use crate::service::{Service, ServiceManager};
use crate::settings::SettingsBase;

/// Manager of device instances.
pub type DeviceManager = ServiceManager<dyn Device>;

/// A device driver.
///
/// The property operations default to the [`DeviceBase`] implementation.
pub trait Device: Service {
    /// Shared device state.
    fn base(&self) -> &DeviceBase;

    /// Current sample of one property.
    fn property_get(&self, name: &str) -> CoreResult<Sample> {
        self.base().property_get(name)
    }

    /// Publish a new sample for one property.
    fn property_set(&self, name: &str, sample: Sample) -> CoreResult<()> {
        self.base().property_set(name, sample)
    }

    /// Descriptors of the registered properties.
    fn get_properties(&self) -> Vec<ChannelPropertyDescriptor> {
        self.base().get_properties()
    }
}

struct Property {
    descriptor: ChannelPropertyDescriptor,
    source: Arc<DevicePropertySource>,
}

/// State every device carries: name, core handle, settings binding and
/// the registered properties.
pub struct DeviceBase {
    name: String,
    core: Arc<CoreServices>,
    settings: SettingsBase,
    properties: Mutex<BTreeMap<String, Property>>,
}

impl DeviceBase {
    /// Bind the device's settings at `("devices", name, "settings")`.
    ///
    /// # Errors
    /// Returns `CoreError::ServiceNotRegistered` without a settings context.
    pub fn new(name: &str, core: &Arc<CoreServices>, definitions: Vec<SettingDefinition>) -> CoreResult<Self> {
        let settings = SettingsBase::new(
            core.settings()?,
            SettingsBinding::instance(DEVICES_KEY, name),
            definitions,
        );
        Ok(Self {
            name: name.to_string(),
            core: Arc::clone(core),
            settings,
            properties: Mutex::new(BTreeMap::new()),
        })
    }

    /// Instance name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Core services handle.
    pub fn core(&self) -> &Arc<CoreServices> {
        &self.core
    }

    /// Settings handle.
    pub fn settings(&self) -> &SettingsBase {
        &self.settings
    }

    /// Fully qualified channel name of a property.
    pub fn channel_name(&self, property: &str) -> String {
        format!("{}{CHANNEL_NAME_SEPARATOR}{property}", self.name)
    }

    /// Whether a property is registered.
    pub fn has_property(&self, property: &str) -> bool {
        self.properties.lock().contains_key(property)
    }

    /// Create the channel for `descriptor` in the live database.
    ///
    /// # Errors
    /// Returns `CoreError::ChannelAlreadyExists` on a duplicate,
    /// `CoreError::TypeMismatch` if the initial value cannot be converted to
    /// the declared type, or `CoreError::ServiceNotRegistered` without a
    /// channel database.
    pub fn add_property(&self, mut descriptor: ChannelPropertyDescriptor) -> CoreResult<()> {
        let database = self.core.channel_database()?;
        let channel = self.channel_name(&descriptor.name);
        let found = descriptor.initial.value.value_type();
        descriptor.initial.value = descriptor
            .initial
            .value
            .clone()
            .remap(descriptor.value_type, None)
            .ok_or_else(|| CoreError::TypeMismatch {
                channel: channel.clone(),
                expected: descriptor.value_type,
                found,
            })?;
        let source = Arc::new(DevicePropertySource::new(&descriptor));
        let channel_source: Arc<dyn ChannelSource> = source.clone();
        database.channel_add(&channel, channel_source)?;
        self.properties
            .lock()
            .insert(descriptor.name.clone(), Property { descriptor, source });
        Ok(())
    }

    /// Remove every property channel. Already-removed channels are skipped.
    pub fn remove_all_properties(&self) {
        let names: Vec<String> = std::mem::take(&mut *self.properties.lock())
            .into_keys()
            .collect();
        let Ok(database) = self.core.channel_database() else {
            return;
        };
        for name in names {
            let channel = self.channel_name(&name);
            if database.channel_remove(&channel).is_err() {
                debug!("Property channel {} already removed", channel);
            }
        }
    }

    fn source(&self, property: &str) -> CoreResult<(Arc<DevicePropertySource>, ChannelPropertyDescriptor)> {
        self.properties
            .lock()
            .get(property)
            .map(|p| (Arc::clone(&p.source), p.descriptor.clone()))
            .ok_or_else(|| CoreError::ChannelDoesNotExist(self.channel_name(property)))
    }

    /// Current sample of a property.
    ///
    /// # Errors
    /// Returns `CoreError::ChannelDoesNotExist` for an unknown property.
    pub fn property_get(&self, property: &str) -> CoreResult<Sample> {
        Ok(self.source(property)?.0.producer_get())
    }

    /// Store a new sample and publish `NEW_SAMPLE`.
    ///
    /// # Errors
    /// Returns `CoreError::ChannelDoesNotExist` for an unknown property or
    /// `CoreError::TypeMismatch` if the payload does not fit.
    pub fn property_set(&self, property: &str, sample: Sample) -> CoreResult<()> {
        let (source, descriptor) = self.source(property)?;
        let found = sample.value.value_type();
        let current = source.producer_get();
        let value = sample
            .value
            .remap(descriptor.value_type, Some(&current.value))
            .ok_or_else(|| CoreError::TypeMismatch {
                channel: self.channel_name(property),
                expected: descriptor.value_type,
                found,
            })?;
        source.producer_set(Sample {
            timestamp: sample.timestamp,
            value,
            unit: sample.unit,
        });
        self.core
            .channel_database()?
            .notify_new_sample(&self.channel_name(property))
    }

    /// Descriptors of the registered properties.
    pub fn get_properties(&self) -> Vec<ChannelPropertyDescriptor> {
        self.properties
            .lock()
            .values()
            .map(|p| p.descriptor.clone())
            .collect()
    }
}
