//! Model registry: a read-only catalog built once at process start.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

use tracing::info;

use crate::domain::errors::{CoreError, CoreResult};
use crate::domain::models::model_spec::{Capability, ModelId, ModelSpec};
use crate::domain::ports::ProviderAdapter;

/// Registry construction settings.
#[derive(Debug, Clone)]
pub struct RegistryConfig {
    /// Models that must be present per provider; a missing entry aborts
    /// start-up so a bad deploy cannot silently downgrade the fleet.
    pub minimum_supported_models: BTreeMap<String, Vec<String>>,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        let mut minimum = BTreeMap::new();
        minimum.insert(
            "openai".to_string(),
            vec!["gpt-4.1".to_string(), "gpt-4.1-mini".to_string()],
        );
        minimum.insert(
            "anthropic".to_string(),
            vec!["claude-3.5-sonnet".to_string()],
        );
        minimum.insert(
            "groq".to_string(),
            vec!["llama-3.3-70b-versatile".to_string()],
        );
        Self {
            minimum_supported_models: minimum,
        }
    }
}

impl RegistryConfig {
    /// No integrity requirements; used by tests that stub the registry.
    pub fn unchecked() -> Self {
        Self {
            minimum_supported_models: BTreeMap::new(),
        }
    }
}

/// Read-mostly map of `provider/model` to its spec and serving adapter.
pub struct ModelRegistry {
    entries: HashMap<ModelId, (Arc<dyn ProviderAdapter>, ModelSpec)>,
}

impl std::fmt::Debug for ModelRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelRegistry")
            .field("entries", &self.entries.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl ModelRegistry {
    /// Build the registry from the configured adapters and run the
    /// integrity check. Only providers whose keys were supplied appear;
    /// the integrity minimum applies per registered provider.
    pub fn new(adapters: Vec<Arc<dyn ProviderAdapter>>, config: &RegistryConfig) -> CoreResult<Self> {
        let mut entries = HashMap::new();
        for adapter in &adapters {
            for spec in adapter.list_models() {
                if !spec.has_capability(Capability::TextGeneration) && !spec.is_special_purpose() {
                    return Err(CoreError::Integrity(format!(
                        "model {} lacks text_generation and is not special-purpose",
                        spec.id
                    )));
                }
                entries.insert(spec.id.clone(), (Arc::clone(adapter), spec));
            }
        }

        let registry = Self { entries };
        registry.check_integrity(config)?;
        info!(models = registry.entries.len(), "model registry initialized");
        Ok(registry)
    }

    fn check_integrity(&self, config: &RegistryConfig) -> CoreResult<()> {
        let registered_providers: BTreeSet<&str> =
            self.entries.keys().map(ModelId::provider).collect();
        for (provider, required) in &config.minimum_supported_models {
            if !registered_providers.contains(provider.as_str()) {
                // Providers without injected keys are disabled entirely;
                // the minimum applies only to active providers.
                continue;
            }
            for model in required {
                let id = ModelId::new(provider, model);
                if !self.entries.contains_key(&id) {
                    return Err(CoreError::Integrity(format!(
                        "required model '{model}' missing from provider '{provider}'"
                    )));
                }
            }
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, id: &ModelId) -> Option<&ModelSpec> {
        self.entries.get(id).map(|(_, spec)| spec)
    }

    pub fn adapter_for(&self, id: &ModelId) -> Option<Arc<dyn ProviderAdapter>> {
        self.entries.get(id).map(|(adapter, _)| Arc::clone(adapter))
    }

    pub fn all(&self) -> impl Iterator<Item = &ModelSpec> {
        self.entries.values().map(|(_, spec)| spec)
    }

    pub fn model_ids(&self) -> Vec<ModelId> {
        let mut ids: Vec<ModelId> = self.entries.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn by_provider(&self, provider: &str) -> Vec<&ModelSpec> {
        self.all().filter(|s| s.id.provider() == provider).collect()
    }

    pub fn by_capabilities(&self, required: &BTreeSet<Capability>) -> Vec<&ModelSpec> {
        self.all().filter(|s| s.has_all(required)).collect()
    }

    pub fn by_max_input_cost(&self, max_input_cost_per_mtok: f64) -> Vec<&ModelSpec> {
        self.all()
            .filter(|s| s.input_cost_per_mtok <= max_input_cost_per_mtok)
            .collect()
    }

    pub fn reasoning_models(&self) -> Vec<&ModelSpec> {
        self.all().filter(|s| s.is_reasoning).collect()
    }

    pub fn multimodal_models(&self) -> Vec<&ModelSpec> {
        self.all().filter(|s| s.is_multimodal).collect()
    }

    /// Validate a persisted `task_type -> model` routing table: every
    /// entry must reference a registered model.
    pub fn validate_routing_table(
        &self,
        table: &HashMap<String, ModelId>,
    ) -> CoreResult<()> {
        for (task_type, model_id) in table {
            if !self.entries.contains_key(model_id) {
                return Err(CoreError::Validation(format!(
                    "routing table entry '{task_type}' references unknown model '{model_id}'"
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::{mock_spec, MockProvider};

    fn adapter_with(provider: &str, models: &[&str]) -> Arc<dyn ProviderAdapter> {
        let specs = models.iter().map(|m| mock_spec(provider, m)).collect();
        Arc::new(MockProvider::new(provider).with_models(specs))
    }

    #[test]
    fn integrity_passes_when_required_models_present() {
        let mut config = RegistryConfig::unchecked();
        config
            .minimum_supported_models
            .insert("openai".into(), vec!["m1".into()]);

        let registry =
            ModelRegistry::new(vec![adapter_with("openai", &["m1", "m2"])], &config).unwrap();
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn integrity_fails_on_missing_model() {
        let mut config = RegistryConfig::unchecked();
        config
            .minimum_supported_models
            .insert("openai".into(), vec!["m1".into(), "m-gone".into()]);

        let err = ModelRegistry::new(vec![adapter_with("openai", &["m1"])], &config).unwrap_err();
        assert!(matches!(err, CoreError::Integrity(_)));
        assert!(err.to_string().contains("m-gone"));
    }

    #[test]
    fn disabled_provider_skips_minimum_check() {
        // anthropic has a minimum but no adapter was registered for it.
        let mut config = RegistryConfig::unchecked();
        config
            .minimum_supported_models
            .insert("anthropic".into(), vec!["claude-3.5-sonnet".into()]);

        let registry =
            ModelRegistry::new(vec![adapter_with("openai", &["m1"])], &config).unwrap();
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn routing_table_validation() {
        let registry = ModelRegistry::new(
            vec![adapter_with("openai", &["m1"])],
            &RegistryConfig::unchecked(),
        )
        .unwrap();

        let mut table = HashMap::new();
        table.insert("summarize".to_string(), ModelId::new("openai", "m1"));
        registry.validate_routing_table(&table).unwrap();

        table.insert("translate".to_string(), ModelId::new("openai", "ghost"));
        let err = registry.validate_routing_table(&table).unwrap_err();
        assert!(err.to_string().contains("translate"));
    }

    #[test]
    fn filter_queries() {
        let registry = ModelRegistry::new(
            vec![
                adapter_with("openai", &["m1"]),
                adapter_with("groq", &["g1", "g2"]),
            ],
            &RegistryConfig::unchecked(),
        )
        .unwrap();

        assert_eq!(registry.by_provider("groq").len(), 2);
        assert_eq!(registry.by_provider("openai").len(), 1);

        let required: BTreeSet<Capability> = [Capability::FunctionCalling].into_iter().collect();
        assert_eq!(registry.by_capabilities(&required).len(), 3);

        assert_eq!(registry.by_max_input_cost(0.5).len(), 0);
        assert_eq!(registry.by_max_input_cost(2.0).len(), 3);
    }
}
