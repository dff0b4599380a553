//! Process-wide service registry.
//!
//! `CoreServices` is the injected root every component receives at
//! construction. It maps well-known names to shared handles, carries the
//! shutdown signal and the pending/running instance registries written by
//! the service managers.

use dia_common::consts::{
    CHANNEL_DATABASE_SERVICE, LOGGING_MANAGER_SERVICE, SCHEDULER_SERVICE, SETTINGS_SERVICE,
};
use dia_common::error::{CoreError, CoreResult};
use dia_common::settings::InstanceRecord;
use parking_lot::{Condvar, Mutex, RwLock};
use std::any::Any;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use crate::channels::ChannelDatabase;
use crate::locked::LockedMap;
use crate::logging::LoggingManager;
use crate::scheduler::Scheduler;
use crate::settings::SettingsContext;

/// Shared handle stored in the registry.
pub type ServiceHandle = Arc<dyn Any + Send + Sync>;

/// Category name → instance name → instance record.
pub type SettingsRegistry = LockedMap<String, BTreeMap<String, InstanceRecord>>;

// ─── Shutdown signal ────────────────────────────────────────────────

/// One-shot shutdown request shared between the main loop and workers.
#[derive(Debug, Clone, Default)]
pub struct ShutdownSignal {
    inner: Arc<(Mutex<bool>, Condvar)>,
}

impl ShutdownSignal {
    /// Create an unsignalled shutdown request.
    pub fn new() -> Self {
        Self::default()
    }

    /// Request shutdown and wake every waiter.
    pub fn request(&self) {
        let (flag, cond) = &*self.inner;
        let mut requested = flag.lock();
        if !*requested {
            *requested = true;
            info!("Shutdown requested");
        }
        cond.notify_all();
    }

    /// Whether shutdown has been requested.
    pub fn is_requested(&self) -> bool {
        *self.inner.0.lock()
    }

    /// Block until shutdown is requested.
    pub fn wait(&self) {
        let (flag, cond) = &*self.inner;
        let mut requested = flag.lock();
        while !*requested {
            cond.wait(&mut requested);
        }
    }

    /// Block until shutdown is requested or `timeout` elapses.
    ///
    /// Returns true if shutdown was requested.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let (flag, cond) = &*self.inner;
        let mut requested = flag.lock();
        if !*requested {
            cond.wait_for(&mut requested, timeout);
        }
        *requested
    }
}

// ─── Registry ───────────────────────────────────────────────────────

/// Named-handle directory shared by every component.
#[derive(Default)]
pub struct CoreServices {
    services: RwLock<HashMap<String, ServiceHandle>>,
    shutdown: ShutdownSignal,
    pending_registry: SettingsRegistry,
    running_registry: SettingsRegistry,
}

impl CoreServices {
    /// Create an empty registry.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Register or replace a service handle.
    pub fn set_service(&self, name: &str, handle: ServiceHandle) {
        debug!("Registering service '{}'", name);
        self.services.write().insert(name.to_string(), handle);
    }

    /// Register a typed service.
    pub fn register<T: Any + Send + Sync>(&self, name: &str, service: Arc<T>) {
        self.set_service(name, service);
    }

    /// Look up a service handle.
    ///
    /// # Errors
    /// Returns `CoreError::ServiceNotRegistered` when absent.
    pub fn get_service(&self, name: &str) -> CoreResult<ServiceHandle> {
        self.services
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| CoreError::ServiceNotRegistered(name.to_string()))
    }

    /// Look up a service and downcast it to `T`.
    ///
    /// # Errors
    /// Returns `CoreError::ServiceNotRegistered` when absent or of another type.
    pub fn get_service_as<T: Any + Send + Sync>(&self, name: &str) -> CoreResult<Arc<T>> {
        self.get_service(name)?.downcast::<T>().map_err(|_| {
            CoreError::ServiceNotRegistered(format!(
                "{name} (registered with a different type than {})",
                std::any::type_name::<T>()
            ))
        })
    }

    /// Whether a service is registered under `name`.
    pub fn has_service(&self, name: &str) -> bool {
        self.services.read().contains_key(name)
    }

    /// Names of all registered services.
    pub fn service_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.services.read().keys().cloned().collect();
        names.sort();
        names
    }

    /// Drop every registered handle.
    ///
    /// Called at the end of teardown so handles that point back at the
    /// registry are released.
    pub fn clear_services(&self) {
        self.services.write().clear();
    }

    // ─── Shutdown ───────────────────────────────────────────────────

    /// Ask the main loop to tear the system down.
    pub fn request_shutdown(&self) {
        self.shutdown.request();
    }

    /// Clone of the shutdown signal.
    pub fn shutdown_signal(&self) -> ShutdownSignal {
        self.shutdown.clone()
    }

    // ─── Instance registries ────────────────────────────────────────

    /// Everything the settings loader found, per category.
    pub fn pending_registry(&self) -> &SettingsRegistry {
        &self.pending_registry
    }

    /// Everything that actually came up, per category.
    pub fn running_registry(&self) -> &SettingsRegistry {
        &self.running_registry
    }

    // ─── Well-known services ────────────────────────────────────────

    /// Settings context.
    pub fn settings(&self) -> CoreResult<Arc<SettingsContext>> {
        self.get_service_as(SETTINGS_SERVICE)
    }

    /// Scheduler.
    pub fn scheduler(&self) -> CoreResult<Arc<Scheduler>> {
        self.get_service_as(SCHEDULER_SERVICE)
    }

    /// Live channel database.
    pub fn channel_database(&self) -> CoreResult<Arc<ChannelDatabase>> {
        self.get_service_as(CHANNEL_DATABASE_SERVICE)
    }

    /// Logging manager.
    pub fn logging_manager(&self) -> CoreResult<Arc<LoggingManager>> {
        self.get_service_as(LOGGING_MANAGER_SERVICE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    struct FakeService {
        value: u32,
    }

    #[test]
    fn test_set_and_get_service() {
        let core = CoreServices::new();
        core.register("fake", Arc::new(FakeService { value: 42 }));

        let service = core.get_service_as::<FakeService>("fake").unwrap();
        assert_eq!(service.value, 42);
        assert!(core.has_service("fake"));
        assert_eq!(core.service_names(), vec!["fake".to_string()]);
    }

    #[test]
    fn test_set_service_replaces() {
        let core = CoreServices::new();
        core.register("fake", Arc::new(FakeService { value: 1 }));
        core.register("fake", Arc::new(FakeService { value: 2 }));
        assert_eq!(core.get_service_as::<FakeService>("fake").unwrap().value, 2);
    }

    #[test]
    fn test_missing_service() {
        let core = CoreServices::new();
        let result = core.get_service("nope");
        assert!(matches!(result, Err(CoreError::ServiceNotRegistered(_))));
        assert!(matches!(
            core.scheduler(),
            Err(CoreError::ServiceNotRegistered(_))
        ));
    }

    #[test]
    fn test_wrong_type_is_not_registered() {
        let core = CoreServices::new();
        core.register("fake", Arc::new(FakeService { value: 1 }));
        let result = core.get_service_as::<String>("fake");
        assert!(matches!(result, Err(CoreError::ServiceNotRegistered(_))));
    }

    #[test]
    fn test_shutdown_wakes_waiter() {
        let core = CoreServices::new();
        let signal = core.shutdown_signal();
        assert!(!signal.is_requested());

        let waiter = thread::spawn(move || {
            signal.wait();
            signal.is_requested()
        });
        core.request_shutdown();
        assert!(waiter.join().unwrap());
    }

    #[test]
    fn test_wait_timeout_without_request() {
        let signal = ShutdownSignal::new();
        assert!(!signal.wait_timeout(Duration::from_millis(10)));
        signal.request();
        assert!(signal.wait_timeout(Duration::from_millis(10)));
    }

    #[test]
    fn test_registries_are_independent() {
        let core = CoreServices::new();
        core.pending_registry().update("devices".to_string(), |m| {
            m.insert(
                "d".to_string(),
                InstanceRecord {
                    name: "d".to_string(),
                    driver: "x:Y".to_string(),
                    settings: None,
                },
            );
        });
        assert!(core.pending_registry().contains_key(&"devices".to_string()));
        assert!(core.running_registry().is_empty());
    }
}
