use super::Provider;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

/// Read-mostly provider registry: registration happens at init time and during provider
/// duplication only (§5 "Shared-resource policy").
#[derive(Default)]
pub struct ProviderRegistry {
    providers: RwLock<HashMap<String, Arc<dyn Provider>>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, name: impl Into<String>, provider: Arc<dyn Provider>) {
        self.providers.write().insert(name.into(), provider);
    }

    pub fn list(&self) -> Vec<String> {
        self.providers.read().keys().cloned().collect()
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Provider>> {
        self.providers.read().get(name).cloned()
    }

    /// Registers an existing provider's adapter under a second name, e.g. so a single
    /// account can be exposed as two rotation slots with independent quota bookkeeping at
    /// the selector level.
    pub fn register_copy(&self, original: &str, new_name: impl Into<String>) -> anyhow::Result<()> {
        let provider = self
            .get(original)
            .ok_or_else(|| anyhow::anyhow!("unknown provider: {original}"))?;
        self.register(new_name, provider);
        Ok(())
    }
}
