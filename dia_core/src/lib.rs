//! # DIA Core Library
//!
//! Runtime core of the device-integration gateway: a named service
//! registry, a priority scheduler, the settings store, the channel
//! database with its publisher, and the managers that load drivers from
//! the settings document.
//!
//! # Module Structure
//!
//! - [`core_services`] - Service registry, shutdown signal, instance registries
//! - [`scheduler`] - Delayed actions on one worker thread
//! - [`settings`] - Pending/running trees and the merge → verify → commit protocol
//! - [`channels`] - Channel database, channels, sources and the publisher
//! - [`logging`] - Logger contract, replay store and logging manager
//! - [`service`] - Generic instance manager and the `Service` lifecycle
//! - [`device`] - Device contract and shared device state
//! - [`driver_registry`] - `module.path:ClassName` → constructor maps
//! - [`drivers`] - Built-in drivers
//! - [`gateway`] - Bootstrap and teardown
//! - [`retry`] - Bounded retry for remote commands
//! - [`locked`] - Lock-wrapped map
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                          CoreServices                            │
//! │  settings   scheduler   channel_manager   *_manager (×4)         │
//! └──────┬───────────┬──────────────┬───────────────┬────────────────┘
//!        │           │              │               │
//!        ▼           ▼              ▼               ▼
//!  ┌───────────┐ ┌─────────┐ ┌───────────────┐ ┌──────────────────┐
//!  │ Settings  │ │Scheduler│ │ChannelDatabase│ │ ServiceManager   │
//!  │ Context   │ │ (thread)│ │  + Publisher  │ │ devices/loggers/ │
//!  └───────────┘ └─────────┘ └───────┬───────┘ │ presentations/   │
//!                                    │         │ services         │
//!                                    ▼         └──────────────────┘
//!                             LoggingManager ──► Logger instances
//! ```

pub mod channels;
pub mod core_services;
pub mod device;
pub mod driver_registry;
pub mod drivers;
pub mod gateway;
pub mod locked;
pub mod logging;
pub mod retry;
pub mod scheduler;
pub mod service;
pub mod settings;

// Re-export key types for convenience
pub use crate::channels::{Channel, ChannelDatabase, ChannelView};
pub use crate::core_services::{CoreServices, ShutdownSignal};
pub use crate::device::{Device, DeviceBase, DeviceManager};
pub use crate::driver_registry::{DriverCatalog, DriverRegistry};
pub use crate::gateway::Gateway;
pub use crate::logging::{Logger, LoggingManager, Whence};
pub use crate::scheduler::{EventHandle, Priority, Scheduler};
pub use crate::service::{InstanceState, Service, ServiceManager};
pub use crate::settings::{SettingsBase, SettingsContext};
