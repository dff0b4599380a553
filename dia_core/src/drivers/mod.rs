//! Drivers shipped with the core.
//!
//! | Reference                                        | Category      |
//! |--------------------------------------------------|---------------|
//! | `dia_core.devices.simulation:SimulationDevice`   | devices       |
//! | `dia_core.loggers.memory:MemoryLogger`           | loggers       |
//! | `dia_core.presentations.trace:TracePresentation` | presentations |

pub mod memory_logger;
pub mod simulation;
pub mod trace_presentation;

use crate::driver_registry::DriverCatalog;

/// Register every built-in driver in `catalog`.
pub fn register_builtin(catalog: &mut DriverCatalog) {
    catalog.devices.register(simulation::DRIVER, simulation::create);
    catalog.loggers.register(memory_logger::DRIVER, memory_logger::create);
    catalog
        .presentations
        .register(trace_presentation::DRIVER, trace_presentation::create);
}
