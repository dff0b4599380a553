use dia_common::error::{CoreError, CoreResult};
use dia_common::settings::{SettingDefinition, SettingsBinding, SettingsReport};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::sync::Arc;

use super::SettingsContext;

/// Settings handle carried by a settings-bearing component.
///
/// Registers the component's binding and definitions with the context on
/// construction and detaches them on drop.
pub struct SettingsBase {
    context: Arc<SettingsContext>,
    binding: SettingsBinding,
}

impl SettingsBase {
    /// Attach `definitions` at `binding`.
    pub fn new(
        context: Arc<SettingsContext>,
        binding: SettingsBinding,
        definitions: Vec<SettingDefinition>,
    ) -> Self {
        context.register_binding(binding.clone(), definitions);
        Self { context, binding }
    }

    /// Binding path.
    pub fn binding(&self) -> &SettingsBinding {
        &self.binding
    }

    /// Run merge → verify → commit for this binding.
    ///
    /// # Errors
    /// See [`SettingsContext::apply`].
    pub fn apply_settings(&self) -> CoreResult<SettingsReport> {
        self.context.apply(&self.binding)
    }

    /// Committed value of a setting.
    ///
    /// # Errors
    /// Returns `CoreError::Settings` if nothing has been committed for `name`.
    pub fn get_setting(&self, name: &str) -> CoreResult<Value> {
        self.context
            .running_value(&self.binding, name)
            .ok_or_else(|| CoreError::Settings(format!("{}: '{name}' has no running value", self.binding)))
    }

    /// Committed value of a setting, deserialized.
    ///
    /// # Errors
    /// Returns `CoreError::Settings` if absent or of the wrong shape.
    pub fn get_setting_as<T: DeserializeOwned>(&self, name: &str) -> CoreResult<T> {
        serde_json::from_value(self.get_setting(name)?)
            .map_err(|e| CoreError::Settings(format!("{}: '{name}': {e}", self.binding)))
    }

    /// Record an operator edit; applied on the next `apply_settings`.
    ///
    /// # Errors
    /// See [`SettingsContext::set_pending`].
    pub fn set_pending_setting(&self, name: &str, value: Value) -> CoreResult<()> {
        self.context.set_pending(&self.binding, name, value)
    }
}

impl Drop for SettingsBase {
    fn drop(&mut self) {
        self.context.unregister_binding(&self.binding);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dia_common::settings::{SettingType, TomlSerializer};
    use serde_json::json;

    #[test]
    fn test_base_lifecycle() {
        let ctx = Arc::new(SettingsContext::from_document(
            json!({"loggers": [{"name": "mem", "driver": "x:Y", "settings": {"capacity": "32"}}]}),
            Box::new(TomlSerializer),
        ));
        let binding = SettingsBinding::instance("loggers", "mem");
        let base = SettingsBase::new(
            Arc::clone(&ctx),
            binding.clone(),
            vec![SettingDefinition::new("capacity", SettingType::Integer).with_default(1024)],
        );

        assert!(matches!(base.get_setting("capacity"), Err(CoreError::Settings(_))));
        base.apply_settings().unwrap();
        assert_eq!(base.get_setting_as::<usize>("capacity").unwrap(), 32);

        base.set_pending_setting("capacity", json!(64)).unwrap();
        base.apply_settings().unwrap();
        assert_eq!(base.get_setting_as::<usize>("capacity").unwrap(), 64);

        drop(base);
        assert!(ctx.bindings().is_empty());
    }
}
