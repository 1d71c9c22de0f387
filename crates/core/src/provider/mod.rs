//! C4: provider registry (§4.4).

mod http_json;
mod mock;
mod registry;

pub use http_json::{HttpJsonProvider, HttpJsonProviderConfig};
pub use mock::MockProvider;
pub use registry::ProviderRegistry;

use crate::error::ProviderError;
use crate::types::{ProviderSnapshot, TranslationRequest, TranslationResult};
use async_trait::async_trait;
use futures::stream::BoxStream;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio_util::sync::CancellationToken;
use tokio::time::{Duration, Instant};

/// One partial translation chunk, forwarded to the client as it arrives.
#[derive(Debug, Clone)]
pub struct Chunk {
    pub text: String,
}

#[derive(Debug, Clone, Default)]
pub struct QuotaRemaining {
    pub requests: Option<u64>,
    pub tokens: Option<u64>,
}

#[derive(Debug, Clone, Default)]
pub struct Quota {
    pub remaining: QuotaRemaining,
}

/// The capability set every MT provider adapter must expose (§4.4, §9 "duck-typed provider
/// objects → a capability set expressed as a trait").
#[async_trait]
pub trait Provider: Send + Sync {
    fn name(&self) -> &str;

    async fn translate_unary(
        &self,
        request: &TranslationRequest,
        cancel: &CancellationToken,
    ) -> Result<TranslationResult, ProviderError>;

    /// Streams chunks in generation order; the stream ends either after the last chunk or on
    /// the first `Err`. Callers accumulate chunks into the final text themselves since
    /// [`Provider`] implementations do not all support true streaming.
    async fn translate_stream(
        &self,
        request: &TranslationRequest,
        cancel: &CancellationToken,
    ) -> BoxStream<'static, Result<Chunk, ProviderError>>;

    /// `None` means the provider does not expose quota information; treated as "sufficient
    /// quota" by the selector (§4.5).
    async fn get_quota(&self) -> Option<Quota> {
        None
    }

    /// Cheap, approximate token estimate used for pre-admission throttle checks.
    fn approx_tokens(&self, text: &str) -> usize {
        text.chars().count().div_ceil(4)
    }

    fn snapshot(&self) -> ProviderSnapshot;
}

/// Backs `ProviderSnapshot`'s `requests`/`tokens` (sliding-window) vs. `total_requests`/
/// `total_tokens` (monotonic) distinction (§3). Each recorded call expires out of the window
/// after `window` elapses, the same decrement-after-`W` shape as [`crate::throttle::Throttle`],
/// but with no admission decision to make — just a running sum.
pub(crate) struct UsageCounters {
    window: Duration,
    entries: parking_lot::Mutex<VecDeque<(Instant, u64)>>,
    total_requests: AtomicU64,
    total_tokens: AtomicU64,
}

impl UsageCounters {
    pub(crate) fn new(window: Duration) -> Self {
        Self {
            window,
            entries: parking_lot::Mutex::new(VecDeque::new()),
            total_requests: AtomicU64::new(0),
            total_tokens: AtomicU64::new(0),
        }
    }

    pub(crate) fn record(&self, tokens: u64) {
        let now = Instant::now();
        let mut entries = self.entries.lock();
        entries.push_back((now + self.window, tokens));
        self.total_requests.fetch_add(1, Ordering::Relaxed);
        self.total_tokens.fetch_add(tokens, Ordering::Relaxed);
    }

    /// `(requests_in_window, tokens_in_window)`, reaping anything past its expiry first.
    pub(crate) fn windowed(&self) -> (u64, u64) {
        let now = Instant::now();
        let mut entries = self.entries.lock();
        while matches!(entries.front(), Some((expires_at, _)) if *expires_at <= now) {
            entries.pop_front();
        }
        let tokens: u64 = entries.iter().map(|(_, t)| t).sum();
        (entries.len() as u64, tokens)
    }

    pub(crate) fn totals(&self) -> (u64, u64) {
        (
            self.total_requests.load(Ordering::Relaxed),
            self.total_tokens.load(Ordering::Relaxed),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn windowed_counts_decay_while_totals_stay_monotonic() {
        let counters = UsageCounters::new(Duration::from_millis(50));
        counters.record(10);
        counters.record(20);
        let (requests, tokens) = counters.windowed();
        assert_eq!(requests, 2);
        assert_eq!(tokens, 30);

        tokio::time::advance(Duration::from_millis(60)).await;
        let (requests, tokens) = counters.windowed();
        assert_eq!(requests, 0);
        assert_eq!(tokens, 0);

        let (total_requests, total_tokens) = counters.totals();
        assert_eq!(total_requests, 2);
        assert_eq!(total_tokens, 30);
    }
}
