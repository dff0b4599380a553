//! Well-known names shared by the runtime core and its collaborators.

// ─── Registry service names ─────────────────────────────────────────

/// Settings context.
pub const SETTINGS_SERVICE: &str = "settings";
/// Delayed-event scheduler.
pub const SCHEDULER_SERVICE: &str = "scheduler";
/// Live channel database.
pub const CHANNEL_DATABASE_SERVICE: &str = "channel_manager";
/// Logger instance manager.
pub const LOGGING_MANAGER_SERVICE: &str = "logger_manager";
/// Device driver manager.
pub const DEVICE_MANAGER_SERVICE: &str = "device_driver_manager";
/// Presentation manager.
pub const PRESENTATION_MANAGER_SERVICE: &str = "presentation_manager";
/// Generic services manager.
pub const SERVICES_MANAGER_SERVICE: &str = "services_manager";

// ─── Settings document keys ─────────────────────────────────────────

/// Device instance list.
pub const DEVICES_KEY: &str = "devices";
/// Logger instance list.
pub const LOGGERS_KEY: &str = "loggers";
/// Presentation instance list.
pub const PRESENTATIONS_KEY: &str = "presentations";
/// Service instance list.
pub const SERVICES_KEY: &str = "services";
/// Reserved logger-verbosity key.
pub const TRACING_KEY: &str = "tracing";

/// Instance record: instance name.
pub const RECORD_NAME_KEY: &str = "name";
/// Instance record: driver reference (`module.path:ClassName`).
pub const RECORD_DRIVER_KEY: &str = "driver";
/// Instance record: driver settings sub-mapping.
pub const RECORD_SETTINGS_KEY: &str = "settings";

/// Separator between device instance and property in a channel name.
pub const CHANNEL_NAME_SEPARATOR: char = '.';
