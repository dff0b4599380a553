//! Bootstrap: wires the core services together and drives the instance
//! managers through startup and teardown.
//!
//! Startup order is loggers, devices, presentations, services, so every
//! channel a device creates is already seen by the loggers. Teardown runs
//! in reverse.

use dia_common::consts::{
    CHANNEL_DATABASE_SERVICE, DEVICE_MANAGER_SERVICE, DEVICES_KEY, LOGGING_MANAGER_SERVICE,
    PRESENTATION_MANAGER_SERVICE, PRESENTATIONS_KEY, SCHEDULER_SERVICE, SERVICES_KEY,
    SERVICES_MANAGER_SERVICE, SETTINGS_SERVICE,
};
use dia_common::error::CoreResult;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use tracing::{debug, info, warn};

use crate::channels::ChannelDatabase;
use crate::core_services::{CoreServices, ShutdownSignal};
use crate::device::DeviceManager;
use crate::driver_registry::DriverCatalog;
use crate::logging::{LoggingManager, LoggingSink};
use crate::scheduler::Scheduler;
use crate::service::{Service, ServiceManager};
use crate::settings::SettingsContext;

/// Manager of presentations or generic services.
pub type GenericManager = ServiceManager<dyn Service>;

/// The assembled runtime.
pub struct Gateway {
    core: Arc<CoreServices>,
    settings: Arc<SettingsContext>,
    scheduler: Arc<Scheduler>,
    channels: Arc<ChannelDatabase>,
    loggers: Arc<LoggingManager>,
    devices: Arc<DeviceManager>,
    presentations: Arc<GenericManager>,
    services: Arc<GenericManager>,
    shut_down: AtomicBool,
}

impl Gateway {
    /// Build the core services around `settings` and register every
    /// manager under its well-known name.
    ///
    /// # Errors
    /// Currently infallible; reserved for services that validate the
    /// settings document at construction.
    pub fn new(settings: SettingsContext, catalog: DriverCatalog) -> CoreResult<Self> {
        let core = CoreServices::new();
        let DriverCatalog {
            devices,
            loggers,
            presentations,
            services,
        } = catalog;

        let settings = Arc::new(settings);
        core.register(SETTINGS_SERVICE, Arc::clone(&settings));

        let scheduler = Arc::new(Scheduler::new(core.shutdown_signal()));
        core.register(SCHEDULER_SERVICE, Arc::clone(&scheduler));

        let channels = ChannelDatabase::new();
        core.register(CHANNEL_DATABASE_SERVICE, Arc::clone(&channels));

        let loggers = Arc::new(LoggingManager::new(Arc::clone(&core), loggers));
        core.register(LOGGING_MANAGER_SERVICE, Arc::clone(&loggers));
        let sink: Arc<dyn LoggingSink> = loggers.clone();
        channels.publisher().attach_logging(Arc::downgrade(&sink));

        let devices = Arc::new(DeviceManager::new(DEVICES_KEY, Arc::clone(&core), devices));
        let database: Weak<ChannelDatabase> = Arc::downgrade(&channels);
        devices.set_evict_hook(move |instance| {
            if let Some(database) = database.upgrade() {
                let removed = database.remove_instance_channels(instance);
                debug!("Removed {} channels of '{}'", removed.len(), instance);
            }
        });
        core.register(DEVICE_MANAGER_SERVICE, Arc::clone(&devices));

        let presentations = Arc::new(GenericManager::new(PRESENTATIONS_KEY, Arc::clone(&core), presentations));
        core.register(PRESENTATION_MANAGER_SERVICE, Arc::clone(&presentations));

        let services = Arc::new(GenericManager::new(SERVICES_KEY, Arc::clone(&core), services));
        core.register(SERVICES_MANAGER_SERVICE, Arc::clone(&services));

        info!("Core services registered: {:?}", core.service_names());
        Ok(Self {
            core,
            settings,
            scheduler,
            channels,
            loggers,
            devices,
            presentations,
            services,
            shut_down: AtomicBool::new(false),
        })
    }

    // ─── Accessors ──────────────────────────────────────────────────

    /// Service registry.
    pub fn core(&self) -> &Arc<CoreServices> {
        &self.core
    }

    /// Settings context.
    pub fn settings(&self) -> &Arc<SettingsContext> {
        &self.settings
    }

    /// Scheduler.
    pub fn scheduler(&self) -> &Arc<Scheduler> {
        &self.scheduler
    }

    /// Live channel database.
    pub fn channels(&self) -> &Arc<ChannelDatabase> {
        &self.channels
    }

    /// Logger manager.
    pub fn loggers(&self) -> &Arc<LoggingManager> {
        &self.loggers
    }

    /// Device manager.
    pub fn devices(&self) -> &Arc<DeviceManager> {
        &self.devices
    }

    /// Presentation manager.
    pub fn presentations(&self) -> &Arc<GenericManager> {
        &self.presentations
    }

    /// Generic services manager.
    pub fn services(&self) -> &Arc<GenericManager> {
        &self.services
    }

    /// Clone of the shutdown signal.
    pub fn shutdown_signal(&self) -> ShutdownSignal {
        self.core.shutdown_signal()
    }

    // ─── Lifecycle ──────────────────────────────────────────────────

    /// Read the instance lists, start the scheduler and bring every
    /// instance up. Instances that fail are logged and left pending.
    ///
    /// # Errors
    /// Returns `CoreError::Config` if an instance list is malformed, or
    /// `CoreError::Worker` if the scheduler thread cannot start.
    pub fn start(&self) -> CoreResult<()> {
        self.loggers.load_from_settings()?;
        self.devices.load_from_settings()?;
        self.presentations.load_from_settings()?;
        self.services.load_from_settings()?;

        self.scheduler.start()?;

        let loggers = self.loggers.start_all();
        let devices = self.devices.start_all();
        let presentations = self.presentations.start_all();
        let services = self.services.start_all();
        info!(
            "Gateway up: {} loggers, {} devices, {} presentations, {} services, {} channels",
            loggers,
            devices,
            presentations,
            services,
            self.channels.channel_list().len()
        );
        Ok(())
    }

    /// Start, block until shutdown is requested, then tear down.
    ///
    /// # Errors
    /// Returns the startup error; teardown still runs.
    pub fn run(&self) -> CoreResult<()> {
        let started = self.start();
        if started.is_ok() {
            self.core.shutdown_signal().wait();
        }
        self.shutdown();
        started
    }

    /// Stop every instance in reverse startup order and release the
    /// core services. Safe to call more than once.
    pub fn shutdown(&self) {
        if self.shut_down.swap(true, Ordering::SeqCst) {
            return;
        }
        info!("Gateway shutting down");
        self.services.unload_all();
        self.presentations.unload_all();
        self.devices.unload_all();
        self.scheduler.stop();
        self.loggers.unload_all();
        self.channels.publisher().detach_logging();
        if !self.channels.channel_list().is_empty() {
            warn!("Channels left after teardown: {:?}", self.channels.channel_list());
        }
        self.core.clear_services();
        info!("Gateway shutdown complete");
    }
}

impl Drop for Gateway {
    fn drop(&mut self) {
        self.shutdown();
    }
}
