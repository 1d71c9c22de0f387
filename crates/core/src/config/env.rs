//! Environment-variable overlay source (`TM_` prefix), the first layer above defaults.

use serde::Deserialize;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct EnvOverlay {
    pub throttle_window_ms: Option<u64>,
    pub request_limit: Option<u64>,
    pub token_limit: Option<u64>,
    pub tm_max_entries: Option<usize>,
    pub tm_ttl_ms: Option<u64>,
    pub tm_sync: Option<bool>,
    pub provider_order: Option<String>,
    pub request_threshold: Option<u64>,
    pub token_threshold: Option<u64>,
    pub max_inflight_per_client: Option<usize>,
    pub max_inflight_global: Option<usize>,
    pub premium_models: Option<String>,
    pub status_emit_hz: Option<f64>,
    pub auto_translate: Option<bool>,
    pub theme: Option<String>,
}

/// Reads `TM_*` environment variables into an overlay. Absent variables stay `None` and do
/// not override the defaults/previous layer.
pub fn from_env() -> anyhow::Result<EnvOverlay> {
    Ok(envy::prefixed("TM_").from_env::<EnvOverlay>()?)
}

pub fn apply(cfg: &mut super::types::CoreConfig, overlay: EnvOverlay) {
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
        cfg.provider_order = split_csv(&v);
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
        cfg.premium_models = split_csv(&v);
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

fn split_csv(v: &str) -> Vec<String> {
    v.split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}
