//! Ambient telemetry handle (§4.12 ambient stack). Counters only — this crate has no
//! metrics-export backend of its own; a binary wires `Telemetry::snapshot` into whatever
//! exporter it chooses (Prometheus, logs, etc.). Safe to read from any task without
//! synchronization concerns: every counter is an independent atomic, never a cross-component
//! lock (§5).

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Default)]
pub struct Telemetry {
    throttle_admitted: AtomicU64,
    throttle_denied: AtomicU64,
    tm_hits: AtomicU64,
    tm_misses: AtomicU64,
    tm_evictions: AtomicU64,
    provider_success: AtomicU64,
    provider_failure: AtomicU64,
    selector_advances: AtomicU64,
    requests_completed: AtomicU64,
    requests_errored: AtomicU64,
    requests_cancelled: AtomicU64,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct TelemetrySnapshot {
    pub throttle_admitted: u64,
    pub throttle_denied: u64,
    pub tm_hits: u64,
    pub tm_misses: u64,
    pub tm_evictions: u64,
    pub provider_success: u64,
    pub provider_failure: u64,
    pub selector_advances: u64,
    pub requests_completed: u64,
    pub requests_errored: u64,
    pub requests_cancelled: u64,
}

/// Which terminal frame a request ended with (§5 ordering guarantee: exactly one of these
/// per `request_id`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminalKind {
    Result,
    Error,
    Cancelled,
}

impl Telemetry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_admitted(&self) {
        self.throttle_admitted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_denied(&self) {
        self.throttle_denied.fetch_add(1, Ordering::Relaxed);
        tracing::debug!("throttle denied an admission request");
    }

    pub fn record_tm_hit(&self) {
        self.tm_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_tm_miss(&self) {
        self.tm_misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_tm_eviction(&self, count: u64) {
        self.tm_evictions.fetch_add(count, Ordering::Relaxed);
    }

    pub fn record_provider_outcome(&self, provider: &str, ok: bool) {
        if ok {
            self.provider_success.fetch_add(1, Ordering::Relaxed);
        } else {
            self.provider_failure.fetch_add(1, Ordering::Relaxed);
            tracing::warn!(provider, "provider call failed");
        }
    }

    pub fn record_selector_advance(&self, from: &str, to: &str) {
        self.selector_advances.fetch_add(1, Ordering::Relaxed);
        tracing::info!(from, to, "provider selector advanced");
    }

    /// Counts a `request_id`'s terminal frame kind (§3.1 Telemetry: "requests by terminal
    /// frame kind"). Called once per request from the request channel's completion path.
    pub fn record_terminal(&self, kind: TerminalKind) {
        match kind {
            TerminalKind::Result => self.requests_completed.fetch_add(1, Ordering::Relaxed),
            TerminalKind::Error => self.requests_errored.fetch_add(1, Ordering::Relaxed),
            TerminalKind::Cancelled => self.requests_cancelled.fetch_add(1, Ordering::Relaxed),
        };
    }

    pub fn snapshot(&self) -> TelemetrySnapshot {
        TelemetrySnapshot {
            throttle_admitted: self.throttle_admitted.load(Ordering::Relaxed),
            throttle_denied: self.throttle_denied.load(Ordering::Relaxed),
            tm_hits: self.tm_hits.load(Ordering::Relaxed),
            tm_misses: self.tm_misses.load(Ordering::Relaxed),
            tm_evictions: self.tm_evictions.load(Ordering::Relaxed),
            provider_success: self.provider_success.load(Ordering::Relaxed),
            provider_failure: self.provider_failure.load(Ordering::Relaxed),
            selector_advances: self.selector_advances.load(Ordering::Relaxed),
            requests_completed: self.requests_completed.load(Ordering::Relaxed),
            requests_errored: self.requests_errored.load(Ordering::Relaxed),
            requests_cancelled: self.requests_cancelled.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_accumulate_independently() {
        let t = Telemetry::new();
        t.record_admitted();
        t.record_admitted();
        t.record_denied();
        t.record_tm_hit();
        t.record_provider_outcome("a", true);
        t.record_provider_outcome("a", false);
        t.record_selector_advance("a", "b");

        let snap = t.snapshot();
        assert_eq!(snap.throttle_admitted, 2);
        assert_eq!(snap.throttle_denied, 1);
        assert_eq!(snap.tm_hits, 1);
        assert_eq!(snap.provider_success, 1);
        assert_eq!(snap.provider_failure, 1);
        assert_eq!(snap.selector_advances, 1);
    }

    #[test]
    fn terminal_kinds_count_independently() {
        let t = Telemetry::new();
        t.record_terminal(TerminalKind::Result);
        t.record_terminal(TerminalKind::Result);
        t.record_terminal(TerminalKind::Error);
        t.record_terminal(TerminalKind::Cancelled);

        let snap = t.snapshot();
        assert_eq!(snap.requests_completed, 2);
        assert_eq!(snap.requests_errored, 1);
        assert_eq!(snap.requests_cancelled, 1);
    }
}
