//! Shared request/response data model for the translation core.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::time::{SystemTime, UNIX_EPOCH};

/// Absolute unary request deadline when the caller does not set one.
pub const DEFAULT_UNARY_DEADLINE_MS: u64 = 20_000;
/// Absolute streaming request deadline when the caller does not set one.
pub const DEFAULT_STREAM_DEADLINE_MS: u64 = 60_000;

/// Milliseconds since the Unix epoch, used throughout for `ts`/`deadline`/`time` fields.
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Immutable input to the orchestrator. Constructed by the request channel from a
/// client-supplied `opts` payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranslationRequest {
    pub text: String,
    pub source: String,
    pub target: String,
    pub model: String,
    #[serde(default)]
    pub stream: bool,
    #[serde(default)]
    pub provider_hint: Option<String>,
    /// Absolute deadline, ms since epoch. Filled in by the channel if absent on the wire.
    pub deadline: u64,
}

impl TranslationRequest {
    pub fn default_deadline(now: u64, stream: bool) -> u64 {
        now + if stream {
            DEFAULT_STREAM_DEADLINE_MS
        } else {
            DEFAULT_UNARY_DEADLINE_MS
        }
    }
}

/// Output of a completed translation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranslationResult {
    pub text: String,
    pub provider: String,
    pub model: String,
    pub cached: bool,
    pub tokens_in: u64,
    pub tokens_out: u64,
    pub chars_in: u64,
    pub chars_out: u64,
}

/// Deterministic, case-insensitive fingerprint over `(provider_family, source, target,
/// normalized_text)`. ASCII-safe hex string, suitable as a map key and a storage key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TMKey(pub String);

impl TMKey {
    pub fn fingerprint(provider_family: &str, source: &str, target: &str, text: &str) -> Self {
        let normalized = text.trim().to_lowercase();
        let mut hasher = Sha256::new();
        hasher.update(provider_family.as_bytes());
        hasher.update(b"\0");
        hasher.update(source.as_bytes());
        hasher.update(b"\0");
        hasher.update(target.as_bytes());
        hasher.update(b"\0");
        hasher.update(normalized.as_bytes());
        TMKey(hex::encode(hasher.finalize()))
    }
}

/// A single cache entry. `ts` doubles as the TTL clock and the LRU recency clock.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TMEntry {
    pub text: String,
    pub ts: u64,
}

/// Snapshot of a registered provider's advertised capability and quota state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderSnapshot {
    pub api_key_present: bool,
    pub model: String,
    pub endpoint: String,
    pub requests: u64,
    pub tokens: u64,
    pub total_requests: u64,
    pub total_tokens: u64,
}

/// One accounted usage event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UsageRecord {
    pub time: u64,
    pub provider: String,
    pub model: String,
    pub tokens_in: u64,
    pub tokens_out: u64,
    pub chars_in: u64,
    pub chars_out: u64,
}

/// Derived, never-persisted status view consumed by the badge compositor.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Status {
    pub active_count: u32,
    pub using_plus: bool,
    pub offline: bool,
    pub last_error_recent_ms: Option<u64>,
}
