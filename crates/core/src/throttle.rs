//! C2: sliding-window admission throttle (§4.2).
//!
//! Two independent counters — requests and tokens — each admitted contribution is scheduled
//! to decrement itself after the window `W` elapses. A zero limit on a dimension means that
//! dimension is unlimited (always admits). The throttle never fails; denial is a value, not
//! an error.

use parking_lot::Mutex;
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug, Clone, Copy)]
pub enum AdmitDecision {
    Admitted,
    Denied { retry_after_ms: u64 },
}

#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct Occupancy {
    pub requests: u64,
    pub request_limit: u64,
    pub tokens: u64,
    pub token_limit: u64,
}

#[derive(Debug, Clone, Copy)]
pub struct ThrottleConfig {
    pub window: Duration,
    pub request_limit: u64,
    pub token_limit: u64,
}

impl Default for ThrottleConfig {
    fn default() -> Self {
        Self {
            window: Duration::from_secs(60),
            request_limit: 0,
            token_limit: 0,
        }
    }
}

/// One admitted contribution, due to drain at `expires_at`.
struct Scheduled {
    expires_at: Instant,
    requests: u64,
    tokens: u64,
}

struct Inner {
    cfg: ThrottleConfig,
    requests_in_window: u64,
    tokens_in_window: u64,
    scheduled: VecDeque<Scheduled>,
}

impl Inner {
    fn reap_expired(&mut self, now: Instant) {
        while let Some(front) = self.scheduled.front() {
            if front.expires_at <= now {
                let entry = self.scheduled.pop_front().unwrap();
                self.requests_in_window = self.requests_in_window.saturating_sub(entry.requests);
                self.tokens_in_window = self.tokens_in_window.saturating_sub(entry.tokens);
            } else {
                break;
            }
        }
    }

    fn earliest_retry_ms(&self, now: Instant) -> u64 {
        self.scheduled
            .front()
            .map(|s| s.expires_at.saturating_duration_since(now).as_millis() as u64)
            .unwrap_or(0)
    }
}

/// Single-writer sliding window throttle. Cloning gives a new handle to the same state.
#[derive(Clone)]
pub struct Throttle {
    inner: Arc<Mutex<Inner>>,
}

impl Throttle {
    pub fn new(cfg: ThrottleConfig) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                cfg,
                requests_in_window: 0,
                tokens_in_window: 0,
                scheduled: VecDeque::new(),
            })),
        }
    }

    /// Reconfigure limits/window at runtime. In-flight schedules are preserved; only the
    /// thresholds used by future admission checks change.
    pub fn reconfigure(&self, cfg: ThrottleConfig) {
        self.inner.lock().cfg = cfg;
    }

    pub fn try_admit(&self, tokens_estimate: u64) -> AdmitDecision {
        let now = Instant::now();
        let mut inner = self.inner.lock();
        inner.reap_expired(now);

        let request_ok = inner.cfg.request_limit == 0
            || inner.requests_in_window + 1 <= inner.cfg.request_limit;
        let token_ok = inner.cfg.token_limit == 0
            || inner.tokens_in_window + tokens_estimate <= inner.cfg.token_limit;

        if !request_ok || !token_ok {
            let retry_after_ms = inner.earliest_retry_ms(now).max(1);
            return AdmitDecision::Denied { retry_after_ms };
        }

        inner.requests_in_window += 1;
        inner.tokens_in_window += tokens_estimate;
        let window = inner.cfg.window;
        inner.scheduled.push_back(Scheduled {
            expires_at: now + window,
            requests: 1,
            tokens: tokens_estimate,
        });
        AdmitDecision::Admitted
    }

    /// Reconciles an admitted contribution's estimate with actual usage, by adjusting the
    /// most recently scheduled decrement for this caller. Implemented as a delta against the
    /// last scheduled entry: callers invoke this immediately after the matching `try_admit`.
    pub fn record(&self, tokens_estimate: u64, tokens_used: u64) {
        if tokens_estimate == tokens_used {
            return;
        }
        let mut inner = self.inner.lock();
        if let Some(last) = inner.scheduled.back_mut() {
            let delta = tokens_used as i64 - tokens_estimate as i64;
            last.tokens = (last.tokens as i64 + delta).max(0) as u64;
            inner.tokens_in_window = (inner.tokens_in_window as i64 + delta).max(0) as u64;
        }
    }

    pub fn occupancy(&self) -> Occupancy {
        let now = Instant::now();
        let mut inner = self.inner.lock();
        inner.reap_expired(now);
        Occupancy {
            requests: inner.requests_in_window,
            request_limit: inner.cfg.request_limit,
            tokens: inner.tokens_in_window,
            token_limit: inner.cfg.token_limit,
        }
    }

    /// Suspends until admission becomes possible, the cancel token fires, or `deadline`
    /// (ms since epoch) elapses — whichever is first. Returns the final admission decision.
    pub async fn wait_until_admitted(
        &self,
        tokens_estimate: u64,
        cancel: &tokio_util::sync::CancellationToken,
        deadline_ms_from_now: Duration,
    ) -> AdmitDecision {
        let deadline = Instant::now() + deadline_ms_from_now;
        loop {
            match self.try_admit(tokens_estimate) {
                AdmitDecision::Admitted => return AdmitDecision::Admitted,
                AdmitDecision::Denied { retry_after_ms } => {
                    let wait = Duration::from_millis(retry_after_ms).min(
                        deadline.saturating_duration_since(Instant::now()),
                    );
                    if wait.is_zero() {
                        return AdmitDecision::Denied { retry_after_ms: 0 };
                    }
                    tokio::select! {
                        _ = tokio::time::sleep(wait) => continue,
                        _ = cancel.cancelled() => {
                            return AdmitDecision::Denied { retry_after_ms };
                        }
                        _ = tokio::time::sleep_until(deadline) => {
                            return AdmitDecision::Denied { retry_after_ms };
                        }
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_limit_means_unlimited() {
        let t = Throttle::new(ThrottleConfig {
            window: Duration::from_secs(60),
            request_limit: 0,
            token_limit: 0,
        });
        for _ in 0..1000 {
            assert!(matches!(t.try_admit(1_000_000), AdmitDecision::Admitted));
        }
    }

    #[test]
    fn denies_once_request_limit_reached() {
        let t = Throttle::new(ThrottleConfig {
            window: Duration::from_secs(60),
            request_limit: 2,
            token_limit: 0,
        });
        assert!(matches!(t.try_admit(0), AdmitDecision::Admitted));
        assert!(matches!(t.try_admit(0), AdmitDecision::Admitted));
        assert!(matches!(t.try_admit(0), AdmitDecision::Denied { .. }));
    }

    #[test]
    fn denies_once_token_limit_reached() {
        let t = Throttle::new(ThrottleConfig {
            window: Duration::from_secs(60),
            request_limit: 0,
            token_limit: 100,
        });
        assert!(matches!(t.try_admit(60), AdmitDecision::Admitted));
        assert!(matches!(t.try_admit(60), AdmitDecision::Denied { .. }));
        assert!(matches!(t.try_admit(40), AdmitDecision::Admitted));
    }

    #[test]
    fn occupancy_reflects_counters() {
        let t = Throttle::new(ThrottleConfig {
            window: Duration::from_secs(60),
            request_limit: 5,
            token_limit: 500,
        });
        t.try_admit(100);
        t.try_admit(50);
        let occ = t.occupancy();
        assert_eq!(occ.requests, 2);
        assert_eq!(occ.tokens, 150);
        assert_eq!(occ.request_limit, 5);
        assert_eq!(occ.token_limit, 500);
    }

    #[tokio::test(start_paused = true)]
    async fn admission_frees_up_after_window_elapses() {
        let t = Throttle::new(ThrottleConfig {
            window: Duration::from_millis(50),
            request_limit: 1,
            token_limit: 0,
        });
        assert!(matches!(t.try_admit(0), AdmitDecision::Admitted));
        assert!(matches!(t.try_admit(0), AdmitDecision::Denied { .. }));
        tokio::time::advance(Duration::from_millis(60)).await;
        assert!(matches!(t.try_admit(0), AdmitDecision::Admitted));
    }

    #[tokio::test(start_paused = true)]
    async fn wait_until_admitted_honors_cancellation() {
        let t = Throttle::new(ThrottleConfig {
            window: Duration::from_secs(60),
            request_limit: 1,
            token_limit: 0,
        });
        assert!(matches!(t.try_admit(0), AdmitDecision::Admitted));
        let cancel = tokio_util::sync::CancellationToken::new();
        let cancel2 = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            cancel2.cancel();
        });
        let decision = t
            .wait_until_admitted(0, &cancel, Duration::from_secs(60))
            .await;
        assert!(matches!(decision, AdmitDecision::Denied { .. }));
    }
}
