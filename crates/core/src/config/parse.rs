//! Explicit JSON overlay source, read from the persisted `sync[config]` key (§4.11). This is
//! the layer a settings UI would write to; it takes precedence over the environment layer.

use super::types::CoreConfig;
use serde::Deserialize;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct JsonOverlay {
    pub throttle_window_ms: Option<u64>,
    pub request_limit: Option<u64>,
    pub token_limit: Option<u64>,
    pub tm_max_entries: Option<usize>,
    pub tm_ttl_ms: Option<u64>,
    pub tm_sync: Option<bool>,
    pub provider_order: Option<Vec<String>>,
    pub request_threshold: Option<u64>,
    pub token_threshold: Option<u64>,
    pub max_inflight_per_client: Option<usize>,
    pub max_inflight_global: Option<usize>,
    pub premium_models: Option<Vec<String>>,
    pub status_emit_hz: Option<f64>,
    pub auto_translate: Option<bool>,
    pub theme: Option<String>,
}

pub fn parse(blob: &str) -> Result<JsonOverlay, serde_json::Error> {
    serde_json::from_str(blob)
}

pub fn apply(cfg: &mut CoreConfig, overlay: JsonOverlay) {
    if let Some(v) = overlay.throttle_window_ms {
        cfg.throttle_window_ms = v;
    }
    if let Some(v) = overlay.request_limit {
        cfg.request_limit = v;
    }
    if let Some(v) = overlay.token_limit {
        cfg.token_limit = v;
    }
    if let Some(v) = overlay.tm_max_entries {
        cfg.tm_max_entries = v;
    }
    if let Some(v) = overlay.tm_ttl_ms {
        cfg.tm_ttl_ms = v;
    }
    if let Some(v) = overlay.tm_sync {
        cfg.tm_sync = v;
    }
    if let Some(v) = overlay.provider_order {
        cfg.provider_order = v;
    }
    if let Some(v) = overlay.request_threshold {
        cfg.request_threshold = v;
    }
    if let Some(v) = overlay.token_threshold {
        cfg.token_threshold = v;
    }
    if let Some(v) = overlay.max_inflight_per_client {
        cfg.max_inflight_per_client = v;
    }
    if let Some(v) = overlay.max_inflight_global {
        cfg.max_inflight_global = v;
    }
    if let Some(v) = overlay.premium_models {
        cfg.premium_models = v;
    }
    if let Some(v) = overlay.status_emit_hz {
        cfg.status_emit_hz = v;
    }
    if let Some(v) = overlay.auto_translate {
        cfg.auto_translate = v;
    }
    if let Some(v) = overlay.theme {
        cfg.theme = v;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_partial_overlay() {
        let overlay = parse(r#"{"tm_ttl_ms": 1000, "provider_order": ["a", "b"]}"#).unwrap();
        assert_eq!(overlay.tm_ttl_ms, Some(1000));
        assert_eq!(overlay.provider_order, Some(vec!["a".to_string(), "b".to_string()]));
        assert_eq!(overlay.request_limit, None);
    }
}
