//! Compose defaults → env overlay → persisted JSON overlay, then validate (§4.11).

use super::types::CoreConfig;
use super::{env, parse};
use crate::error::CoreError;
use crate::kv::KvStore;

pub const CONFIG_SYNC_KEY: &str = "config";

/// Loads and validates configuration. `registered_providers` is the set of provider names the
/// binary has actually constructed adapters for; `provider_order` entries outside that set are
/// a validation error rather than a silent no-op, since a typo there would otherwise surface
/// only much later as "no provider available".
pub async fn load(
    store: &dyn KvStore,
    registered_providers: &[String],
) -> Result<CoreConfig, CoreError> {
    let mut cfg = CoreConfig::default();

    let overlay = env::from_env().map_err(|err| CoreError::Config(err.to_string()))?;
    env::apply(&mut cfg, overlay);

    if let Some(blob) = store
        .get(CONFIG_SYNC_KEY)
        .await
        .map_err(|err| CoreError::Storage(err.to_string()))?
    {
        let overlay = parse::parse(&blob).map_err(|err| CoreError::Config(err.to_string()))?;
        parse::apply(&mut cfg, overlay);
    }

    validate(&cfg, registered_providers)?;
    Ok(cfg)
}

fn validate(cfg: &CoreConfig, registered_providers: &[String]) -> Result<(), CoreError> {
    if cfg.provider_order.is_empty() {
        return Err(CoreError::Config(
            "provider_order must name at least one provider".to_string(),
        ));
    }
    for name in &cfg.provider_order {
        if !registered_providers.iter().any(|p| p == name) {
            return Err(CoreError::Config(format!(
                "provider_order references unregistered provider {name}"
            )));
        }
    }
    if cfg.max_inflight_per_client == 0 {
        return Err(CoreError::Config(
            "max_inflight_per_client must be at least 1".to_string(),
        ));
    }
    if cfg.max_inflight_global < cfg.max_inflight_per_client {
        return Err(CoreError::Config(
            "max_inflight_global must be at least max_inflight_per_client".to_string(),
        ));
    }
    if cfg.status_emit_hz <= 0.0 {
        return Err(CoreError::Config(
            "status_emit_hz must be positive".to_string(),
        ));
    }
    if cfg.throttle_window_ms == 0 {
        return Err(CoreError::Config(
            "throttle_window_ms must be positive".to_string(),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::MemoryStore;

    #[tokio::test]
    async fn rejects_empty_provider_order() {
        let store = MemoryStore::new();
        let err = load(&store, &[]).await.unwrap_err();
        assert!(matches!(err, CoreError::Config(_)));
    }

    #[tokio::test]
    async fn json_overlay_overrides_env_and_defaults() {
        let store = MemoryStore::new();
        store
            .set(
                CONFIG_SYNC_KEY,
                r#"{"provider_order": ["a"], "tm_ttl_ms": 5000}"#.to_string(),
            )
            .await
            .unwrap();
        let cfg = load(&store, &["a".to_string()]).await.unwrap();
        assert_eq!(cfg.provider_order, vec!["a".to_string()]);
        assert_eq!(cfg.tm_ttl_ms, 5000);
    }

    #[tokio::test]
    async fn rejects_provider_order_referencing_unregistered_provider() {
        let store = MemoryStore::new();
        store
            .set(CONFIG_SYNC_KEY, r#"{"provider_order": ["ghost"]}"#.to_string())
            .await
            .unwrap();
        let err = load(&store, &["a".to_string()]).await.unwrap_err();
        assert!(matches!(err, CoreError::Config(_)));
    }

    #[tokio::test]
    async fn rejects_global_limit_below_per_client_limit() {
        let store = MemoryStore::new();
        store
            .set(
                CONFIG_SYNC_KEY,
                r#"{"provider_order": ["a"], "max_inflight_per_client": 10, "max_inflight_global": 2}"#
                    .to_string(),
            )
            .await
            .unwrap();
        let err = load(&store, &["a".to_string()]).await.unwrap_err();
        assert!(matches!(err, CoreError::Config(_)));
    }
}
