//! Builds the provider registry and the default rotation from environment variables. This is
//! the reference binary's wiring layer, not part of the core crate: a real deployment swaps
//! this module out for whatever inventory of MT accounts it actually holds.

use std::sync::Arc;
use tm_core::provider::{HttpJsonProvider, HttpJsonProviderConfig, MockProvider, Provider, ProviderRegistry};

/// Registers one `HttpJsonProvider` per recognized `TM_<NAME>_API_KEY` environment variable,
/// falling back to a single deterministic `MockProvider` when none are configured so the
/// binary still starts in a demo-able state.
pub fn build_registry() -> (Arc<ProviderRegistry>, Vec<String>) {
    let registry = Arc::new(ProviderRegistry::new());
    let mut order = Vec::new();

    for (name, endpoint, model, env_key) in [
        (
            "qwen-mt-turbo",
            "https://dashscope.aliyuncs.com/compatible-mode/v1/translate",
            "qwen-mt-turbo",
            "TM_QWEN_API_KEY",
        ),
        (
            "deepl-pro",
            "https://api.deepl.com/v2/translate",
            "deepl-pro",
            "TM_DEEPL_API_KEY",
        ),
    ] {
        if let Ok(api_key) = std::env::var(env_key) {
            let provider = HttpJsonProvider::new(HttpJsonProviderConfig {
                name: name.to_string(),
                endpoint: endpoint.to_string(),
                api_key: Some(api_key),
                model: model.to_string(),
                body_template: serde_json::json!({
                    "text": "{{text}}",
                    "source_lang": "{{source}}",
                    "target_lang": "{{target}}",
                    "model": "{{model}}",
                }),
            });
            registry.register(name, Arc::new(provider) as Arc<dyn Provider>);
            order.push(name.to_string());
        }
    }

    if order.is_empty() {
        let name = "mock";
        registry.register(name, Arc::new(MockProvider::new(name)) as Arc<dyn Provider>);
        order.push(name.to_string());
    }

    (registry, order)
}
