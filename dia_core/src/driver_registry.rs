//! Driver registry for pluggable components.
//!
//! Driver references in the settings document have the form
//! `module.path:ClassName`. A `DriverRegistry` maps those strings to
//! constructor functions; it is populated at startup and handed to a
//! service manager by value. No global state, testable in isolation.

use dia_common::error::{CoreError, CoreResult};
use std::collections::HashMap;
use std::sync::Arc;

use crate::core_services::CoreServices;
use crate::device::Device;
use crate::logging::Logger;
use crate::service::Service;

/// Driver constructor: `(instance_name, core_services) → instance`.
pub type DriverFactory<T> = fn(&str, &Arc<CoreServices>) -> CoreResult<Arc<T>>;

/// Registry of driver constructors for one component kind.
pub struct DriverRegistry<T: ?Sized> {
    factories: HashMap<String, DriverFactory<T>>,
}

/// Split `module.path:ClassName` into its two halves.
///
/// # Errors
/// Returns `CoreError::ObjectNotFound` if the reference is malformed.
pub fn parse_driver_reference(reference: &str) -> CoreResult<(&str, &str)> {
    let malformed = || {
        CoreError::ObjectNotFound(format!(
            "'{reference}' is not a driver reference of the form module.path:ClassName"
        ))
    };
    let (module, class) = reference.split_once(':').ok_or_else(malformed)?;
    let valid_module = !module.is_empty()
        && module
            .split('.')
            .all(|part| !part.is_empty() && part.chars().all(|c| c.is_alphanumeric() || c == '_'));
    let valid_class = !class.is_empty() && class.chars().all(|c| c.is_alphanumeric() || c == '_');
    if valid_module && valid_class {
        Ok((module, class))
    } else {
        Err(malformed())
    }
}

impl<T: ?Sized> DriverRegistry<T> {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    /// Register a driver factory.
    ///
    /// # Panics
    /// Panics if a driver with the same reference is already registered,
    /// or the reference is malformed.
    pub fn register(&mut self, reference: &str, factory: DriverFactory<T>) {
        if let Err(e) = parse_driver_reference(reference) {
            panic!("{e}");
        }
        if self.factories.contains_key(reference) {
            panic!("Driver '{reference}' is already registered");
        }
        self.factories.insert(reference.to_string(), factory);
    }

    /// Get a driver factory by reference.
    pub fn get_factory(&self, reference: &str) -> Option<DriverFactory<T>> {
        self.factories.get(reference).copied()
    }

    /// Resolve a reference to its factory.
    ///
    /// # Errors
    /// Returns `CoreError::ObjectNotFound` if the reference is malformed
    /// or nothing is registered under it.
    pub fn resolve(&self, reference: &str) -> CoreResult<DriverFactory<T>> {
        parse_driver_reference(reference)?;
        self.get_factory(reference)
            .ok_or_else(|| CoreError::ObjectNotFound(format!("no driver registered as '{reference}'")))
    }

    /// List all registered references, sorted.
    pub fn list_drivers(&self) -> Vec<String> {
        let mut names: Vec<String> = self.factories.keys().cloned().collect();
        names.sort();
        names
    }
}

impl<T: ?Sized> Default for DriverRegistry<T> {
    fn default() -> Self {
        Self::new()
    }
}

// ─── Catalog ────────────────────────────────────────────────────────

/// Driver registries for every component category.
#[derive(Default)]
pub struct DriverCatalog {
    /// Device drivers.
    pub devices: DriverRegistry<dyn Device>,
    /// Loggers.
    pub loggers: DriverRegistry<dyn Logger>,
    /// Presentations.
    pub presentations: DriverRegistry<dyn Service>,
    /// Generic services.
    pub services: DriverRegistry<dyn Service>,
}

impl DriverCatalog {
    /// Empty catalog.
    pub fn new() -> Self {
        Self::default()
    }

    /// Catalog holding the drivers shipped with the core.
    pub fn with_builtin_drivers() -> Self {
        let mut catalog = Self::new();
        crate::drivers::register_builtin(&mut catalog);
        catalog
    }
}
