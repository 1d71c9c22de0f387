//! Plain configuration structs (§4.11). No loading logic lives here; see
//! [`super::env`] and [`super::load`].

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoreConfig {
    pub throttle_window_ms: u64,
    pub request_limit: u64,
    pub token_limit: u64,

    pub tm_max_entries: usize,
    pub tm_ttl_ms: u64,
    pub tm_sync: bool,

    /// Ordered provider names; must be non-empty and reference only registered providers.
    pub provider_order: Vec<String>,
    pub request_threshold: u64,
    pub token_threshold: u64,

    pub max_inflight_per_client: usize,
    pub max_inflight_global: usize,

    pub premium_models: Vec<String>,
    pub status_emit_hz: f64,

    /// Whether auto-inject should fire on navigation completion when permission is already
    /// granted (§4.10); the gate itself stays stateless about this, the caller supplies it.
    pub auto_translate: bool,
    /// Settings-UI theme name, passed through verbatim; the core never interprets it.
    pub theme: String,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            throttle_window_ms: 60_000,
            request_limit: 0,
            token_limit: 0,
            tm_max_entries: 5_000,
            tm_ttl_ms: 0,
            tm_sync: false,
            provider_order: Vec::new(),
            request_threshold: 5,
            token_threshold: 1_000,
            max_inflight_per_client: 16,
            max_inflight_global: 256,
            premium_models: Vec::new(),
            status_emit_hz: 2.0,
            auto_translate: false,
            theme: "system".to_string(),
        }
    }
}
