//! C5: provider selector (§4.5).
//!
//! Holds an ordered rotation of provider names and a current index. Each call probes the
//! current provider's quota; if remaining requests or tokens are at or below the configured
//! threshold, the index advances (wrapping). The decision is per-call but the advanced index
//! persists across calls. A single-provider rotation never switches.

use crate::provider::{ProviderRegistry, Quota};
use parking_lot::Mutex;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, Default)]
pub struct SelectorThresholds {
    pub request_threshold: u64,
    pub token_threshold: u64,
}

pub struct ProviderSelector {
    rotation: Mutex<Vec<String>>,
    index: Mutex<usize>,
    thresholds: Mutex<SelectorThresholds>,
    registry: Arc<ProviderRegistry>,
}

impl ProviderSelector {
    pub fn new(
        rotation: Vec<String>,
        thresholds: SelectorThresholds,
        registry: Arc<ProviderRegistry>,
    ) -> Self {
        Self {
            rotation: Mutex::new(rotation),
            index: Mutex::new(0),
            thresholds: Mutex::new(thresholds),
            registry,
        }
    }

    pub fn set_rotation(&self, rotation: Vec<String>) {
        *self.rotation.lock() = rotation;
        *self.index.lock() = 0;
    }

    pub fn set_thresholds(&self, thresholds: SelectorThresholds) {
        *self.thresholds.lock() = thresholds;
    }

    fn is_low(quota: &Quota, thresholds: SelectorThresholds) -> bool {
        let requests_low = quota
            .remaining
            .requests
            .is_some_and(|remaining| remaining <= thresholds.request_threshold);
        let tokens_low = quota
            .remaining
            .tokens
            .is_some_and(|remaining| remaining <= thresholds.token_threshold);
        requests_low || tokens_low
    }

    /// Returns the provider name to use for this call, advancing the rotation index first
    /// if the current provider reports low quota. Quota probe errors (provider has no quota
    /// API, or the probe itself failed) are treated as "sufficient quota" (§4.5).
    pub async fn select(&self) -> Option<String> {
        let rotation = self.rotation.lock().clone();
        if rotation.is_empty() {
            return None;
        }
        if rotation.len() == 1 {
            return Some(rotation[0].clone());
        }

        let thresholds = *self.thresholds.lock();
        let current_index = *self.index.lock();
        let current_name = &rotation[current_index % rotation.len()];

        let low = match self.registry.get(current_name) {
            Some(provider) => match provider.get_quota().await {
                Some(quota) => Self::is_low(&quota, thresholds),
                None => false,
            },
            None => false,
        };

        if low {
            let mut index = self.index.lock();
            *index = (*index + 1) % rotation.len();
            Some(rotation[*index].clone())
        } else {
            Some(current_name.clone())
        }
    }

    /// Force-advance the rotation by one, used by the orchestrator's single retry-on-error
    /// step (§4.7 step 6).
    pub fn advance(&self) {
        let rotation_len = self.rotation.lock().len();
        if rotation_len == 0 {
            return;
        }
        let mut index = self.index.lock();
        *index = (*index + 1) % rotation_len;
    }

    pub fn current_index(&self) -> usize {
        *self.index.lock()
    }

    /// The rotation name at the current index, if any (e.g. for telemetry after `advance`).
    pub fn current_provider(&self) -> Option<String> {
        let rotation = self.rotation.lock();
        if rotation.is_empty() {
            return None;
        }
        let index = *self.index.lock() % rotation.len();
        Some(rotation[index].clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::MockProvider;
    use crate::provider::QuotaRemaining;

    fn registry_with(providers: &[(&str, Arc<MockProvider>)]) -> Arc<ProviderRegistry> {
        let registry = Arc::new(ProviderRegistry::new());
        for (name, mock) in providers {
            registry.register(*name, mock.clone() as Arc<dyn crate::provider::Provider>);
        }
        registry
    }

    #[tokio::test]
    async fn single_provider_never_switches_regardless_of_quota() {
        let only = Arc::new(MockProvider::new("only"));
        only.set_quota(Some(Quota {
            remaining: QuotaRemaining {
                requests: Some(0),
                tokens: None,
            },
        }));
        let registry = registry_with(&[("only", only)]);
        let selector = ProviderSelector::new(
            vec!["only".to_string()],
            SelectorThresholds {
                request_threshold: 5,
                token_threshold: 5,
            },
            registry,
        );
        assert_eq!(selector.select().await.as_deref(), Some("only"));
        assert_eq!(selector.select().await.as_deref(), Some("only"));
    }

    #[tokio::test]
    async fn advances_when_current_quota_is_low() {
        let a = Arc::new(MockProvider::new("a"));
        a.set_quota(Some(Quota {
            remaining: QuotaRemaining {
                requests: Some(0),
                tokens: None,
            },
        }));
        let b = Arc::new(MockProvider::new("b"));
        let registry = registry_with(&[("a", a), ("b", b)]);
        let selector = ProviderSelector::new(
            vec!["a".to_string(), "b".to_string()],
            SelectorThresholds {
                request_threshold: 1,
                token_threshold: 0,
            },
            registry,
        );
        assert_eq!(selector.select().await.as_deref(), Some("b"));
        assert_eq!(selector.current_index(), 1);
    }

    #[tokio::test]
    async fn quota_probe_error_treated_as_sufficient() {
        let a = Arc::new(MockProvider::new("a"));
        let b = Arc::new(MockProvider::new("b"));
        // "a" has no quota set (None), selector must keep using it.
        let registry = registry_with(&[("a", a), ("b", b)]);
        let selector = ProviderSelector::new(
            vec!["a".to_string(), "b".to_string()],
            SelectorThresholds {
                request_threshold: 10,
                token_threshold: 10,
            },
            registry,
        );
        assert_eq!(selector.select().await.as_deref(), Some("a"));
    }
}
