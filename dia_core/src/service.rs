//! Generic instance manager for pluggable drivers.
//!
//! One `ServiceManager` exists per category (devices, loggers,
//! presentations, services). It keeps every record found in the settings
//! document as *pending*, constructs instances through its
//! [`DriverRegistry`], and promotes an instance to *running* only after
//! `apply_settings` and `start` succeed.
//!
//! ```text
//!  UNLOADED ─load─► LOADED ─apply─► CONFIGURED ─start─► STARTING ─► RUNNING ─stop─► STOPPED
//!                                        ▲                                              │
//!                                        └────────────────────start─────────────────────┘
//! ```

use dia_common::error::{CoreError, CoreResult};
use dia_common::settings::{InstanceRecord, SettingsReport};
use parking_lot::{Mutex, RwLock};
use std::collections::BTreeMap;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::core_services::CoreServices;
use crate::driver_registry::DriverRegistry;

/// Lifecycle contract of every driver.
pub trait Service: Send + Sync {
    /// Instance name from the settings document.
    fn instance_name(&self) -> &str;

    /// Run merge → verify → commit for the instance's settings.
    fn apply_settings(&self) -> CoreResult<SettingsReport>;

    /// Begin operating. An error keeps the instance out of the running set.
    fn start(&self) -> CoreResult<()>;

    /// Stop operating. May be followed by another `start`.
    fn stop(&self) -> CoreResult<()>;
}

/// Lifecycle state of a managed instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstanceState {
    /// Record known, nothing constructed.
    Unloaded,
    /// Constructed.
    Loaded,
    /// Settings applied.
    Configured,
    /// `start` is in progress on another caller.
    Starting,
    /// Started successfully.
    Running,
    /// Stopped after running.
    Stopped,
}

impl fmt::Display for InstanceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Unloaded => "UNLOADED",
            Self::Loaded => "LOADED",
            Self::Configured => "CONFIGURED",
            Self::Starting => "STARTING",
            Self::Running => "RUNNING",
            Self::Stopped => "STOPPED",
        };
        f.write_str(name)
    }
}

/// Called with the instance name whenever an instance is evicted.
pub type EvictHook = Box<dyn Fn(&str) + Send + Sync>;

struct Managed<T: ?Sized> {
    instance: Arc<T>,
    state: InstanceState,
}

struct Instances<T: ?Sized> {
    pending: Vec<InstanceRecord>,
    loaded: BTreeMap<String, Managed<T>>,
    running: Vec<String>,
}

fn panic_reason(payload: &(dyn std::any::Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| (*s).to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "panicked".to_string())
}

/// Instance manager for one driver category.
pub struct ServiceManager<T: ?Sized + Service> {
    category: String,
    core: Arc<CoreServices>,
    drivers: DriverRegistry<T>,
    instances: Mutex<Instances<T>>,
    load_lock: Mutex<()>,
    evict_hook: RwLock<Option<EvictHook>>,
}

impl<T: ?Sized + Service> ServiceManager<T> {
    /// Manager for `category` resolving drivers through `drivers`.
    pub fn new(category: &str, core: Arc<CoreServices>, drivers: DriverRegistry<T>) -> Self {
        Self {
            category: category.to_string(),
            core,
            drivers,
            instances: Mutex::new(Instances {
                pending: Vec::new(),
                loaded: BTreeMap::new(),
                running: Vec::new(),
            }),
            load_lock: Mutex::new(()),
            evict_hook: RwLock::new(None),
        }
    }

    /// Category name (the settings document key).
    pub fn category(&self) -> &str {
        &self.category
    }

    /// Registry the manager was given.
    pub fn drivers(&self) -> &DriverRegistry<T> {
        &self.drivers
    }

    /// Install a hook run whenever an instance is evicted.
    pub fn set_evict_hook<F>(&self, hook: F)
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        *self.evict_hook.write() = Some(Box::new(hook));
    }

    // ─── Pending records ────────────────────────────────────────────

    /// Replace the pending records and publish them to the pending registry.
    pub fn load_records(&self, records: Vec<InstanceRecord>) {
        self.core.pending_registry().update(self.category.clone(), |registry| {
            registry.clear();
            for record in &records {
                registry.insert(record.name.clone(), record.clone());
            }
        });
        debug!("{}: {} pending instance records", self.category, records.len());
        self.instances.lock().pending = records;
    }

    /// Read this category's records from the settings context.
    ///
    /// # Errors
    /// Returns `CoreError::ServiceNotRegistered` without a settings
    /// context, or `CoreError::Config` if the instance list is malformed.
    pub fn load_from_settings(&self) -> CoreResult<usize> {
        let records = self.core.settings()?.instance_records(&self.category)?;
        let count = records.len();
        self.load_records(records);
        Ok(count)
    }

    /// Names of every pending record, in document order.
    pub fn pending_list(&self) -> Vec<String> {
        self.instances
            .lock()
            .pending
            .iter()
            .map(|r| r.name.clone())
            .collect()
    }

    fn pending_record(&self, name: &str) -> Option<InstanceRecord> {
        self.instances
            .lock()
            .pending
            .iter()
            .find(|r| r.name == name)
            .cloned()
    }

    // ─── Lifecycle ──────────────────────────────────────────────────

    /// Construct the instance named `name` from its pending record.
    ///
    /// Returns true if the instance was constructed, false if it was
    /// already loaded.
    ///
    /// # Errors
    /// Returns `CoreError::ObjectNotFound` if there is no record or the
    /// driver cannot be resolved, `CoreError::LoadError` if the
    /// constructor fails.
    pub fn service_load(&self, name: &str) -> CoreResult<bool> {
        let _loading = self.load_lock.lock();
        if self.instances.lock().loaded.contains_key(name) {
            return Ok(false);
        }

        let record = self.pending_record(name).ok_or_else(|| {
            CoreError::ObjectNotFound(format!("{}: no instance record named '{name}'", self.category))
        })?;
        let factory = self.drivers.resolve(&record.driver)?;

        let constructed = panic::catch_unwind(AssertUnwindSafe(|| factory(name, &self.core)));
        let instance = match constructed {
            Ok(Ok(instance)) => instance,
            Ok(Err(e)) => {
                return Err(CoreError::LoadError {
                    instance: name.to_string(),
                    reason: e.to_string(),
                });
            }
            Err(payload) => {
                return Err(CoreError::LoadError {
                    instance: name.to_string(),
                    reason: panic_reason(payload.as_ref()),
                });
            }
        };

        self.instances.lock().loaded.insert(
            name.to_string(),
            Managed {
                instance,
                state: InstanceState::Loaded,
            },
        );
        info!("{}: loaded '{}' ({})", self.category, name, record.driver);
        Ok(true)
    }

    fn loaded_instance(&self, name: &str) -> CoreResult<(Arc<T>, InstanceState)> {
        self.instances
            .lock()
            .loaded
            .get(name)
            .map(|m| (Arc::clone(&m.instance), m.state))
            .ok_or_else(|| CoreError::ObjectNotFound(format!("{}: '{name}' is not loaded", self.category)))
    }

    fn promote(&self, name: &str, from: InstanceState, to: InstanceState) {
        if let Some(managed) = self.instances.lock().loaded.get_mut(name)
            && managed.state == from
        {
            managed.state = to;
        }
    }

    /// Apply the instance's settings.
    ///
    /// # Errors
    /// Returns `CoreError::ObjectNotFound` if not loaded, or the
    /// instance's own error.
    pub fn configure_instance(&self, name: &str) -> CoreResult<SettingsReport> {
        let (instance, _) = self.loaded_instance(name)?;
        let report = instance.apply_settings()?;
        self.promote(name, InstanceState::Loaded, InstanceState::Configured);
        if !report.is_clean() {
            warn!(
                "{}: '{}' settings rejected {:?}, not found {:?}",
                self.category,
                name,
                report.rejected.keys().collect::<Vec<_>>(),
                report.not_found
            );
        }
        Ok(report)
    }

    /// Start a loaded instance and promote it to running.
    ///
    /// An instance already running or being started by another caller is
    /// left alone. On failure the instance is evicted and only its pending
    /// record remains.
    ///
    /// # Errors
    /// Returns `CoreError::ObjectNotFound` if not loaded, or
    /// `CoreError::StartFailed`.
    pub fn start_instance(&self, name: &str) -> CoreResult<()> {
        let instance = {
            let mut instances = self.instances.lock();
            let managed = instances.loaded.get_mut(name).ok_or_else(|| {
                CoreError::ObjectNotFound(format!("{}: '{name}' is not loaded", self.category))
            })?;
            if matches!(managed.state, InstanceState::Running | InstanceState::Starting) {
                return Ok(());
            }
            managed.state = InstanceState::Starting;
            Arc::clone(&managed.instance)
        };

        let failure = match panic::catch_unwind(AssertUnwindSafe(|| instance.start())) {
            Ok(Ok(())) => None,
            Ok(Err(CoreError::StartFailed { reason, .. })) => Some(reason),
            Ok(Err(e)) => Some(e.to_string()),
            Err(payload) => Some(panic_reason(payload.as_ref())),
        };

        if let Some(reason) = failure {
            warn!("{}: '{}' failed to start: {}", self.category, name, reason);
            self.evict(name);
            return Err(CoreError::StartFailed {
                instance: name.to_string(),
                reason,
            });
        }

        {
            let mut instances = self.instances.lock();
            if let Some(managed) = instances.loaded.get_mut(name) {
                managed.state = InstanceState::Running;
            }
            if !instances.running.iter().any(|n| n == name) {
                instances.running.push(name.to_string());
            }
        }
        if let Some(record) = self.pending_record(name) {
            self.core
                .running_registry()
                .update(self.category.clone(), |registry| {
                    registry.insert(name.to_string(), record);
                });
        }
        info!("{}: '{}' running", self.category, name);
        Ok(())
    }

    /// Stop a running instance. Stopping a non-running instance does nothing.
    ///
    /// # Errors
    /// Returns `CoreError::ObjectNotFound` if not loaded, or the
    /// instance's own stop error (the instance is stopped regardless).
    pub fn stop_instance(&self, name: &str) -> CoreResult<()> {
        let (instance, state) = self.loaded_instance(name)?;
        if state != InstanceState::Running {
            return Ok(());
        }

        let result = match panic::catch_unwind(AssertUnwindSafe(|| instance.stop())) {
            Ok(result) => result,
            Err(payload) => Err(CoreError::Worker(panic_reason(payload.as_ref()))),
        };

        {
            let mut instances = self.instances.lock();
            instances.running.retain(|n| n != name);
            if let Some(managed) = instances.loaded.get_mut(name) {
                managed.state = InstanceState::Stopped;
            }
        }
        self.core
            .running_registry()
            .update(self.category.clone(), |registry| {
                registry.remove(name);
            });

        match &result {
            Ok(()) => info!("{}: '{}' stopped", self.category, name),
            Err(e) => warn!("{}: '{}' stop failed: {}", self.category, name, e),
        }
        result
    }

    fn evict(&self, name: &str) {
        if let Some(hook) = self.evict_hook.read().as_ref() {
            hook(name);
        }
        let mut instances = self.instances.lock();
        instances.running.retain(|n| n != name);
        instances.loaded.remove(name);
    }

    /// Stop and evict an instance.
    ///
    /// # Errors
    /// Returns `CoreError::ObjectNotFound` if not loaded; a stop error is
    /// returned after the instance has been evicted.
    pub fn instance_remove(&self, name: &str) -> CoreResult<()> {
        let stopped = self.stop_instance(name);
        if matches!(stopped, Err(CoreError::ObjectNotFound(_))) {
            return stopped;
        }
        self.evict(name);
        debug!("{}: '{}' removed", self.category, name);
        stopped
    }

    // ─── Queries over the running set ───────────────────────────────

    /// A running instance.
    ///
    /// # Errors
    /// Returns `CoreError::ObjectNotFound` if `name` is not running.
    pub fn instance_get(&self, name: &str) -> CoreResult<Arc<T>> {
        let instances = self.instances.lock();
        match instances.loaded.get(name) {
            Some(managed) if managed.state == InstanceState::Running => Ok(Arc::clone(&managed.instance)),
            _ => Err(CoreError::ObjectNotFound(format!(
                "{}: '{name}' is not running",
                self.category
            ))),
        }
    }

    /// Names of running instances, in start order.
    pub fn instance_list(&self) -> Vec<String> {
        self.instances.lock().running.clone()
    }

    /// Whether `name` is running.
    pub fn instance_exists(&self, name: &str) -> bool {
        self.instances.lock().running.iter().any(|n| n == name)
    }

    /// Running instances, in start order.
    pub fn running_instances(&self) -> Vec<Arc<T>> {
        let instances = self.instances.lock();
        instances
            .running
            .iter()
            .filter_map(|name| instances.loaded.get(name))
            .map(|managed| Arc::clone(&managed.instance))
            .collect()
    }

    /// Lifecycle state of `name`; `Unloaded` for a pending-only record.
    pub fn instance_state(&self, name: &str) -> Option<InstanceState> {
        let instances = self.instances.lock();
        if let Some(managed) = instances.loaded.get(name) {
            return Some(managed.state);
        }
        instances
            .pending
            .iter()
            .any(|r| r.name == name)
            .then_some(InstanceState::Unloaded)
    }

    // ─── Orchestration ──────────────────────────────────────────────

    /// Load, configure and start one instance.
    ///
    /// # Errors
    /// Returns the first failing step's error; a configure failure
    /// evicts the instance.
    pub fn bring_up(&self, name: &str) -> CoreResult<()> {
        self.service_load(name)?;
        if let Err(e) = self.configure_instance(name) {
            self.evict(name);
            return Err(e);
        }
        self.start_instance(name)
    }

    /// Bring up every pending record in document order.
    ///
    /// Failures are logged and skipped. Returns the number of instances
    /// running afterwards.
    pub fn start_all(&self) -> usize {
        let names = self.pending_list();
        for name in &names {
            if let Err(e) = self.bring_up(name) {
                error!("{}: '{}' not started: {}", self.category, name, e);
            }
        }
        let running = self.instance_list().len();
        info!("{}: {}/{} instances running", self.category, running, names.len());
        running
    }

    /// Stop running instances in reverse start order.
    pub fn stop_all(&self) {
        let mut names = self.instance_list();
        names.reverse();
        for name in names {
            if let Err(e) = self.stop_instance(&name) {
                error!("{}: '{}' stop failed: {}", self.category, name, e);
            }
        }
    }

    /// Stop and evict every loaded instance.
    pub fn unload_all(&self) {
        self.stop_all();
        let names: Vec<String> = self.instances.lock().loaded.keys().cloned().collect();
        for name in names {
            self.evict(&name);
        }
    }
}
