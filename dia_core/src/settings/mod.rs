//! Settings store: pending and running document trees with the
//! per-binding merge → verify → commit protocol.
//!
//! The *pending* tree is what the operator requested (loaded from the
//! settings file or edited at runtime). The *running* tree only ever
//! holds values that passed verification against a registered
//! binding's definitions.

mod base;

pub use base::SettingsBase;

use dia_common::error::{CoreError, CoreResult};
use dia_common::settings::document::{lookup, lookup_or_insert, mapping_at};
use dia_common::settings::{
    InstanceRecord, SettingDefinition, SettingsBinding, SettingsFormat, SettingsReport,
    SettingsSerializer, parse_instance_list, verify_settings,
};
use parking_lot::RwLock;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::path::Path;
use tracing::{debug, info, warn};

/// Settings documents plus the registered bindings.
pub struct SettingsContext {
    serializer: Box<dyn SettingsSerializer>,
    pending: RwLock<Value>,
    running: RwLock<Value>,
    bindings: RwLock<BTreeMap<SettingsBinding, Vec<SettingDefinition>>>,
}

impl SettingsContext {
    /// Empty context using `serializer` for load/save.
    pub fn new(serializer: Box<dyn SettingsSerializer>) -> Self {
        Self::from_document(Value::Object(Map::new()), serializer)
    }

    /// Context whose pending tree is `document`.
    pub fn from_document(document: Value, serializer: Box<dyn SettingsSerializer>) -> Self {
        Self {
            serializer,
            pending: RwLock::new(document),
            running: RwLock::new(Value::Object(Map::new())),
            bindings: RwLock::new(BTreeMap::new()),
        }
    }

    /// Load the pending tree from a file.
    ///
    /// The format is taken from `format`, or guessed from the extension.
    ///
    /// # Errors
    /// Returns `CoreError::Config` if the file is missing or malformed.
    pub fn load(path: &Path, format: Option<SettingsFormat>) -> CoreResult<Self> {
        let format = format.unwrap_or_else(|| SettingsFormat::from_path(path));
        let serializer = format.serializer();
        let document = serializer.load(path)?;
        info!("Loaded {} settings from {}", serializer.name(), path.display());
        Ok(Self::from_document(document, serializer))
    }

    /// Replace the pending tree with a document parsed from text.
    ///
    /// # Errors
    /// Returns `CoreError::Config` on a parse error.
    pub fn loads(&self, text: &str) -> CoreResult<()> {
        let document = self.serializer.loads(text)?;
        *self.pending.write() = document;
        Ok(())
    }

    /// Write the pending tree to a file.
    ///
    /// # Errors
    /// Returns `CoreError::Config` if it cannot be rendered or written.
    pub fn save(&self, path: &Path) -> CoreResult<()> {
        let document = self.pending.read().clone();
        self.serializer.save(path, &document)?;
        Ok(())
    }

    /// Render the pending tree to text.
    ///
    /// # Errors
    /// Returns `CoreError::Config` if it cannot be rendered.
    pub fn saves(&self) -> CoreResult<String> {
        let document = self.pending.read().clone();
        Ok(self.serializer.saves(&document)?)
    }

    /// Name of the document format.
    pub fn format_name(&self) -> &'static str {
        self.serializer.name()
    }

    /// Copy of the pending tree.
    pub fn pending_snapshot(&self) -> Value {
        self.pending.read().clone()
    }

    /// Copy of the running tree.
    pub fn running_snapshot(&self) -> Value {
        self.running.read().clone()
    }

    /// Instance records listed under `category` in the pending tree.
    ///
    /// # Errors
    /// Returns `CoreError::Config` if the list is malformed.
    pub fn instance_records(&self, category: &str) -> CoreResult<Vec<InstanceRecord>> {
        Ok(parse_instance_list(&self.pending.read(), category)?)
    }

    // ─── Bindings ───────────────────────────────────────────────────

    /// Attach setting definitions to a binding, replacing earlier ones.
    pub fn register_binding(&self, binding: SettingsBinding, definitions: Vec<SettingDefinition>) {
        debug!("Registering settings binding {}", binding);
        self.bindings.write().insert(binding, definitions);
    }

    /// Detach a binding. Running values are kept.
    pub fn unregister_binding(&self, binding: &SettingsBinding) {
        self.bindings.write().remove(binding);
    }

    /// Registered bindings.
    pub fn bindings(&self) -> Vec<SettingsBinding> {
        self.bindings.read().keys().cloned().collect()
    }

    // ─── Protocol ───────────────────────────────────────────────────

    /// Merge step: the pending mapping at `binding` layered over the
    /// committed one.
    pub fn merge(&self, binding: &SettingsBinding) -> Map<String, Value> {
        let mut merged = mapping_at(&self.running.read(), binding.segments());
        for (key, value) in mapping_at(&self.pending.read(), binding.segments()) {
            merged.insert(key, value);
        }
        merged
    }

    /// Run merge → verify → commit for one binding.
    ///
    /// Accepted values are written to the running tree. Rejected and
    /// missing settings keep their running value; on first apply a
    /// declared default is committed in their place.
    ///
    /// # Errors
    /// Returns `CoreError::Settings` if no definitions are registered for
    /// `binding` or the running tree cannot hold the path.
    pub fn apply(&self, binding: &SettingsBinding) -> CoreResult<SettingsReport> {
        let definitions = self
            .bindings
            .read()
            .get(binding)
            .cloned()
            .ok_or_else(|| CoreError::Settings(format!("no definitions registered for {binding}")))?;

        let merged = self.merge(binding);
        let report = verify_settings(&definitions, &merged);
        self.commit(binding, &definitions, &report)?;

        if report.is_clean() {
            debug!("Applied settings for {}: {} accepted", binding, report.accepted.len());
        } else {
            warn!(
                "Settings for {}: rejected {:?}, not found {:?}",
                binding,
                report.rejected.keys().collect::<Vec<_>>(),
                report.not_found
            );
        }
        Ok(report)
    }

    fn commit(
        &self,
        binding: &SettingsBinding,
        definitions: &[SettingDefinition],
        report: &SettingsReport,
    ) -> CoreResult<()> {
        let mut running = self.running.write();
        let node = lookup_or_insert(&mut running, binding.segments())
            .map_err(|e| CoreError::Settings(format!("{binding}: {e}")))?;
        if !node.is_object() {
            *node = Value::Object(Map::new());
        }
        let Value::Object(committed) = node else {
            return Ok(());
        };

        for (key, value) in &report.accepted {
            committed.insert(key.clone(), value.clone());
        }
        for definition in definitions {
            let held_back = report.rejected.contains_key(&definition.name)
                || report.not_found.contains(&definition.name);
            if !held_back || committed.contains_key(&definition.name) {
                continue;
            }
            if let Some(value) = definition.default.as_ref().and_then(|d| definition.coerce(d)) {
                committed.insert(definition.name.clone(), value);
            }
        }
        Ok(())
    }

    /// Apply every registered binding.
    ///
    /// Returns the per-binding reports keyed by the dotted binding path.
    ///
    /// # Errors
    /// Propagates the first failing [`apply`](Self::apply).
    pub fn globally_apply_settings(&self) -> CoreResult<BTreeMap<String, SettingsReport>> {
        let mut reports = BTreeMap::new();
        for binding in self.bindings() {
            let report = self.apply(&binding)?;
            reports.insert(binding.key(), report);
        }
        Ok(reports)
    }

    // ─── Single values ──────────────────────────────────────────────

    /// Committed value of `name` under `binding`.
    pub fn running_value(&self, binding: &SettingsBinding, name: &str) -> Option<Value> {
        lookup(&self.running.read(), binding.segments())
            .and_then(|node| node.get(name))
            .cloned()
    }

    /// Requested value of `name` under `binding`.
    pub fn pending_value(&self, binding: &SettingsBinding, name: &str) -> Option<Value> {
        lookup(&self.pending.read(), binding.segments())
            .and_then(|node| node.get(name))
            .cloned()
    }

    /// Write an operator edit into the pending tree.
    ///
    /// Takes effect at the next [`apply`](Self::apply).
    ///
    /// # Errors
    /// Returns `CoreError::Settings` if a scalar sits on the binding path.
    pub fn set_pending(&self, binding: &SettingsBinding, name: &str, value: Value) -> CoreResult<()> {
        let mut pending = self.pending.write();
        let node = lookup_or_insert(&mut pending, binding.segments())
            .map_err(|e| CoreError::Settings(format!("{binding}: {e}")))?;
        if !node.is_object() {
            *node = Value::Object(Map::new());
        }
        if let Value::Object(map) = node {
            map.insert(name.to_string(), value);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dia_common::settings::{SettingType, TomlSerializer};
    use serde_json::json;

    fn update_rate() -> SettingDefinition {
        SettingDefinition::new("update_rate", SettingType::Float)
            .required()
            .with_default(1.0)
            .with_verify(|v| v.as_f64().is_some_and(|f| f > 0.0))
    }

    fn context(document: Value) -> SettingsContext {
        SettingsContext::from_document(document, Box::new(TomlSerializer))
    }

    fn binding() -> SettingsBinding {
        SettingsBinding::instance("devices", "d")
    }

    #[test]
    fn test_apply_commits_accepted() {
        let ctx = context(json!({
            "devices": [{"name": "d", "driver": "x:Y", "settings": {"update_rate": 2}}]
        }));
        ctx.register_binding(binding(), vec![update_rate()]);

        let report = ctx.apply(&binding()).unwrap();
        assert_eq!(report.accepted.get("update_rate"), Some(&json!(2.0)));
        assert_eq!(ctx.running_value(&binding(), "update_rate"), Some(json!(2.0)));
    }

    #[test]
    fn test_rejected_keeps_prior_value() {
        let ctx = context(json!({
            "devices": [{"name": "d", "driver": "x:Y", "settings": {"update_rate": 3.0}}]
        }));
        ctx.register_binding(binding(), vec![update_rate()]);
        ctx.apply(&binding()).unwrap();

        ctx.set_pending(&binding(), "update_rate", json!(-1)).unwrap();
        let report = ctx.apply(&binding()).unwrap();
        assert!(report.accepted.is_empty());
        assert_eq!(report.rejected.get("update_rate"), Some(&json!(-1)));
        assert_eq!(ctx.running_value(&binding(), "update_rate"), Some(json!(3.0)));
        assert_eq!(ctx.pending_value(&binding(), "update_rate"), Some(json!(-1)));
    }

    #[test]
    fn test_rejected_on_first_apply_commits_default() {
        let ctx = context(json!({
            "devices": [{"name": "d", "driver": "x:Y", "settings": {"update_rate": -1}}]
        }));
        ctx.register_binding(binding(), vec![update_rate()]);
        let report = ctx.apply(&binding()).unwrap();
        assert_eq!(report.rejected.get("update_rate"), Some(&json!(-1)));
        assert_eq!(ctx.running_value(&binding(), "update_rate"), Some(json!(1.0)));
    }

    #[test]
    fn test_unbound_apply_fails() {
        let ctx = context(json!({}));
        assert!(matches!(ctx.apply(&binding()), Err(CoreError::Settings(_))));
    }

    #[test]
    fn test_set_pending_creates_record() {
        let ctx = context(json!({"devices": []}));
        ctx.set_pending(&binding(), "update_rate", json!(5)).unwrap();
        let pending = ctx.pending_snapshot();
        assert_eq!(pending["devices"][0]["name"], json!("d"));
        assert_eq!(pending["devices"][0]["settings"]["update_rate"], json!(5));
    }

    #[test]
    fn test_globally_apply_keys_by_binding() {
        let ctx = context(json!({}));
        ctx.register_binding(binding(), vec![update_rate()]);
        ctx.register_binding(
            SettingsBinding::instance("loggers", "mem"),
            vec![SettingDefinition::new("capacity", SettingType::Integer).with_default(8)],
        );
        let reports = ctx.globally_apply_settings().unwrap();
        assert_eq!(reports.len(), 2);
        assert!(reports["devices.d.settings"].is_clean());
        assert_eq!(reports["loggers.mem.settings"].accepted["capacity"], json!(8));
    }

    #[test]
    fn test_loads_and_saves() {
        let ctx = context(json!({}));
        ctx.loads("[tracing]\nlevel = \"debug\"\n").unwrap();
        assert_eq!(ctx.pending_snapshot()["tracing"]["level"], json!("debug"));
        assert!(ctx.saves().unwrap().contains("level"));
    }
}
