//! Simulated device: a periodically incrementing counter and a writable
//! setpoint, driven by the scheduler.

use dia_common::channel::{ChannelOptions, Permission};
use dia_common::error::{CoreError, CoreResult};
use dia_common::sample::{Sample, ValueType};
use dia_common::settings::{SettingDefinition, SettingType, SettingsReport};
use parking_lot::Mutex;
use serde_json::Value;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tracing::{debug, info};

use crate::channels::ChannelPropertyDescriptor;
use crate::core_services::CoreServices;
use crate::device::{Device, DeviceBase};
use crate::retry::retry_with_deadline;
use crate::scheduler::EventHandle;
use crate::service::Service;

/// Driver reference.
pub const DRIVER: &str = "dia_core.devices.simulation:SimulationDevice";

/// Counter property.
pub const COUNTER: &str = "counter";
/// Setpoint property.
pub const SETPOINT: &str = "setpoint";

const SETPOINT_ATTEMPTS: u32 = 3;
const SETPOINT_BACKOFF: Duration = Duration::from_millis(10);

fn positive(value: &Value) -> bool {
    value.as_f64().is_some_and(|v| v > 0.0)
}

fn definitions() -> Vec<SettingDefinition> {
    vec![
        SettingDefinition::new("update_rate", SettingType::Float)
            .required()
            .with_default(1.0)
            .with_verify(positive),
        SettingDefinition::new("unit", SettingType::String).with_default("counts"),
        SettingDefinition::new("initial", SettingType::Integer).with_default(0),
        SettingDefinition::new("command_timeout", SettingType::Float)
            .with_default(0.5)
            .with_verify(positive),
    ]
}

/// Simulated counter device.
pub struct SimulationDevice {
    base: DeviceBase,
    self_ref: Weak<SimulationDevice>,
    count: AtomicI64,
    running: AtomicBool,
    tick: Mutex<Option<EventHandle>>,
}

/// Factory registered in the driver catalog.
pub fn create(name: &str, core: &Arc<CoreServices>) -> CoreResult<Arc<dyn Device>> {
    let base = DeviceBase::new(name, core, definitions())?;
    let device = Arc::new_cyclic(|self_ref| SimulationDevice {
        base,
        self_ref: self_ref.clone(),
        count: AtomicI64::new(0),
        running: AtomicBool::new(false),
        tick: Mutex::new(None),
    });
    Ok(device)
}

impl SimulationDevice {
    fn update_rate(&self) -> f64 {
        self.base.settings().get_setting_as("update_rate").unwrap_or(1.0)
    }

    fn unit(&self) -> String {
        self.base
            .settings()
            .get_setting_as("unit")
            .unwrap_or_default()
    }

    fn register_properties(&self) -> CoreResult<()> {
        if self.base.has_property(COUNTER) {
            return Ok(());
        }
        let initial: i64 = self.base.settings().get_setting_as("initial").unwrap_or(0);
        self.count.store(initial, Ordering::SeqCst);
        let unit = self.unit();

        let refresh_ref = self.self_ref.clone();
        self.base.add_property(
            ChannelPropertyDescriptor::new(COUNTER, ValueType::Int, Sample::new(0.0, initial, unit))
                .with_perm(Permission::GET | Permission::REFRESH)
                .on_refresh(move || {
                    if let Some(device) = refresh_ref.upgrade() {
                        device.increment();
                    }
                }),
        )?;

        let set_ref = self.self_ref.clone();
        self.base.add_property(
            ChannelPropertyDescriptor::new(SETPOINT, ValueType::Float, Sample::new(0.0, 0.0, ""))
                .with_perm(Permission::GET | Permission::SET)
                .with_options(ChannelOptions::AUTOTIMESTAMP)
                .on_set(move |sample| {
                    let device = set_ref
                        .upgrade()
                        .ok_or_else(|| CoreError::Worker("device dropped".to_string()))?;
                    device.write_setpoint(sample)
                }),
        )
    }

    /// Remote-command stand-in: accept the setpoint and publish it.
    fn write_setpoint(&self, sample: Sample) -> CoreResult<()> {
        let timeout: f64 = self
            .base
            .settings()
            .get_setting_as("command_timeout")
            .unwrap_or(0.5);
        retry_with_deadline(
            &self.base.channel_name(SETPOINT),
            SETPOINT_ATTEMPTS,
            Duration::from_secs_f64(timeout),
            SETPOINT_BACKOFF,
            |_| self.base.property_set(SETPOINT, sample.clone()),
        )
    }

    fn increment(&self) {
        let value = self.count.fetch_add(1, Ordering::SeqCst) + 1;
        if let Err(e) = self.base.property_set(COUNTER, Sample::now(value, self.unit())) {
            debug!("{}: counter update failed: {}", self.base.name(), e);
        }
    }

    fn schedule_tick(&self) -> CoreResult<()> {
        let scheduler = self.base.core().scheduler()?;
        let device = self.self_ref.clone();
        let handle = scheduler.schedule_after(self.update_rate(), move || {
            if let Some(device) = device.upgrade() {
                device.on_tick();
            }
        })?;
        *self.tick.lock() = Some(handle);
        Ok(())
    }

    fn on_tick(&self) {
        if !self.running.load(Ordering::SeqCst) {
            return;
        }
        self.increment();
        if let Err(e) = self.schedule_tick() {
            debug!("{}: tick not rescheduled: {}", self.base.name(), e);
        }
    }
}

impl Service for SimulationDevice {
    fn instance_name(&self) -> &str {
        self.base.name()
    }

    fn apply_settings(&self) -> CoreResult<SettingsReport> {
        let report = self.base.settings().apply_settings()?;
        self.register_properties()?;
        Ok(report)
    }

    fn start(&self) -> CoreResult<()> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        if let Err(e) = self.schedule_tick() {
            self.running.store(false, Ordering::SeqCst);
            return Err(e);
        }
        info!("{}: simulating every {}s", self.base.name(), self.update_rate());
        Ok(())
    }

    fn stop(&self) -> CoreResult<()> {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.tick.lock().take()
            && let Ok(scheduler) = self.base.core().scheduler()
            && let Err(e) = scheduler.cancel(handle)
        {
            debug!("{}: tick not cancelled: {}", self.base.name(), e);
        }
        Ok(())
    }
}

impl Device for SimulationDevice {
    fn base(&self) -> &DeviceBase {
        &self.base
    }
}
