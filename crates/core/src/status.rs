//! C9: status & badge (§4.9).
//!
//! A small compositor: `StatusTracker` accumulates the few facts the badge needs (which
//! models are currently in flight, when the last provider error happened, whether the host is
//! offline) and derives a `BadgeView` on demand. The only external contract is "emit an icon
//! update N times per second, throttled" — modeled here as an async task that coalesces
//! redundant recomputation via a `Notify`, mirroring the debounced-persist idiom in
//! [`crate::tm`] and [`crate::accountant`] but for in-memory recomputation rather than I/O.

use crate::throttle::Throttle;
use crate::types::now_ms;
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Badge {
    Empty,
    Spinner,
    Premium,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Colour {
    Idle,
    Busy,
    Error,
}

#[derive(Debug, Clone, Serialize)]
pub struct BadgeView {
    pub badge: Badge,
    pub colour: Colour,
    pub active_count: u32,
    pub offline: bool,
}

#[derive(Debug, Clone)]
pub struct StatusConfig {
    pub premium_models: HashSet<String>,
    /// An error within this many ms of `now` keeps the badge red.
    pub error_recent_window_ms: u64,
    pub emit_hz: f64,
}

impl Default for StatusConfig {
    fn default() -> Self {
        Self {
            premium_models: HashSet::new(),
            error_recent_window_ms: 5_000,
            emit_hz: 2.0,
        }
    }
}

pub struct StatusTracker {
    cfg: StatusConfig,
    active_models: parking_lot::Mutex<HashMap<u64, String>>,
    last_error_at_ms: AtomicU64,
    offline: AtomicBool,
    throttle: Option<Throttle>,
    notify: Notify,
}

impl StatusTracker {
    pub fn new(cfg: StatusConfig, throttle: Option<Throttle>) -> Self {
        Self {
            cfg,
            active_models: parking_lot::Mutex::new(HashMap::new()),
            last_error_at_ms: AtomicU64::new(0),
            offline: AtomicBool::new(false),
            throttle,
            notify: Notify::new(),
        }
    }

    pub fn request_started(&self, request_id: u64, model: &str) {
        self.active_models
            .lock()
            .insert(request_id, model.to_string());
        self.notify.notify_one();
    }

    pub fn request_finished(&self, request_id: u64) {
        self.active_models.lock().remove(&request_id);
        self.notify.notify_one();
    }

    pub fn record_error(&self) {
        self.last_error_at_ms.store(now_ms(), Ordering::Relaxed);
        self.notify.notify_one();
    }

    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::Relaxed);
        self.notify.notify_one();
    }

    pub fn snapshot(&self, now: u64) -> BadgeView {
        let active = self.active_models.lock();
        let active_count = active.len() as u32;
        let has_premium = active
            .values()
            .any(|model| self.cfg.premium_models.contains(model));
        drop(active);

        let badge = if has_premium {
            Badge::Premium
        } else if active_count > 0 {
            Badge::Spinner
        } else {
            Badge::Empty
        };

        let last_error = self.last_error_at_ms.load(Ordering::Relaxed);
        let recent_error =
            last_error > 0 && now.saturating_sub(last_error) <= self.cfg.error_recent_window_ms;

        let colour = if recent_error {
            Colour::Error
        } else if self.occupied() {
            Colour::Busy
        } else {
            Colour::Idle
        };

        BadgeView {
            badge,
            colour,
            active_count,
            offline: self.offline.load(Ordering::Relaxed),
        }
    }

    fn occupied(&self) -> bool {
        match &self.throttle {
            Some(throttle) => {
                let occ = throttle.occupancy();
                (occ.request_limit > 0 && occ.requests > 0)
                    || (occ.token_limit > 0 && occ.tokens > 0)
            }
            None => !self.active_models.lock().is_empty(),
        }
    }

    /// Runs until `cancel` fires, calling `emit` at most `cfg.emit_hz` times per second,
    /// coalescing any number of state changes that happened since the last emission into one
    /// recomputed snapshot.
    pub async fn run_emitter(self: Arc<Self>, cancel: CancellationToken, emit: impl Fn(BadgeView)) {
        let period = std::time::Duration::from_secs_f64(1.0 / self.cfg.emit_hz.max(0.01));
        loop {
            tokio::select! {
                _ = self.notify.notified() => {}
                _ = tokio::time::sleep(period) => {}
                _ = cancel.cancelled() => return,
            }
            emit(self.snapshot(now_ms()));
            tokio::select! {
                _ = tokio::time::sleep(period) => {}
                _ = cancel.cancelled() => return,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_when_idle() {
        let tracker = StatusTracker::new(StatusConfig::default(), None);
        let view = tracker.snapshot(now_ms());
        assert_eq!(view.badge, Badge::Empty);
        assert_eq!(view.colour, Colour::Idle);
    }

    #[test]
    fn spinner_while_any_request_active() {
        let tracker = StatusTracker::new(StatusConfig::default(), None);
        tracker.request_started(1, "deepl-free");
        let view = tracker.snapshot(now_ms());
        assert_eq!(view.badge, Badge::Spinner);
        assert_eq!(view.active_count, 1);
        tracker.request_finished(1);
        assert_eq!(tracker.snapshot(now_ms()).active_count, 0);
    }

    #[test]
    fn premium_badge_while_a_premium_model_is_in_flight() {
        let mut cfg = StatusConfig::default();
        cfg.premium_models.insert("google-llm".to_string());
        let tracker = StatusTracker::new(cfg, None);
        tracker.request_started(1, "deepl-free");
        tracker.request_started(2, "google-llm");
        assert_eq!(tracker.snapshot(now_ms()).badge, Badge::Premium);
    }

    #[test]
    fn recent_error_colours_red_until_window_elapses() {
        let tracker = StatusTracker::new(
            StatusConfig {
                error_recent_window_ms: 100,
                ..StatusConfig::default()
            },
            None,
        );
        tracker.record_error();
        assert_eq!(tracker.snapshot(now_ms()).colour, Colour::Error);
        assert_eq!(tracker.snapshot(now_ms() + 200).colour, Colour::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn emitter_coalesces_bursts_into_throttled_emissions() {
        let tracker = Arc::new(StatusTracker::new(
            StatusConfig {
                emit_hz: 10.0,
                ..StatusConfig::default()
            },
            None,
        ));
        let cancel = CancellationToken::new();
        let emitted = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let emitted2 = emitted.clone();
        let handle = tokio::spawn(tracker.clone().run_emitter(cancel.clone(), move |view| {
            emitted2.lock().push(view.active_count);
        }));

        for i in 0..20u64 {
            tracker.request_started(i, "deepl-free");
        }
        tokio::time::advance(std::time::Duration::from_millis(250)).await;
        cancel.cancel();
        handle.await.unwrap();

        assert!(emitted.lock().len() < 20, "bursts of state changes must coalesce");
    }
}
