use super::{Chunk, Provider, Quota, UsageCounters};
use crate::error::ProviderError;
use crate::types::{ProviderSnapshot, TranslationRequest, TranslationResult};
use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};
use parking_lot::Mutex;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Deterministic, config-driven provider used in tests and the reference binary's demo
/// mode: no network calls, optional injected latency/errors, and a settable quota.
pub struct MockProvider {
    name: String,
    latency: Duration,
    fail_next: Mutex<Option<ProviderError>>,
    quota: Mutex<Option<Quota>>,
    usage: UsageCounters,
}

impl MockProvider {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            latency: Duration::from_millis(0),
            fail_next: Mutex::new(None),
            quota: Mutex::new(None),
            usage: UsageCounters::new(Duration::from_secs(60)),
        }
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// The next call to `translate_unary`/`translate_stream` will fail with `err`; cleared
    /// after one use.
    pub fn fail_next_call(&self, err: ProviderError) {
        *self.fail_next.lock() = Some(err);
    }

    pub fn set_quota(&self, quota: Option<Quota>) {
        *self.quota.lock() = quota;
    }

    fn take_failure(&self) -> Option<ProviderError> {
        self.fail_next.lock().take()
    }

    fn translate_text(&self, request: &TranslationRequest) -> String {
        format!("[{}->{}] {}", request.source, request.target, request.text)
    }
}

#[async_trait]
impl Provider for MockProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn translate_unary(
        &self,
        request: &TranslationRequest,
        cancel: &CancellationToken,
    ) -> Result<TranslationResult, ProviderError> {
        if !self.latency.is_zero() {
            tokio::select! {
                _ = tokio::time::sleep(self.latency) => {}
                _ = cancel.cancelled() => return Err(ProviderError::Cancelled),
            }
        }
        if let Some(err) = self.take_failure() {
            return Err(err);
        }
        let text = self.translate_text(request);
        let tokens_in = self.approx_tokens(&request.text) as u64;
        let tokens_out = self.approx_tokens(&text) as u64;
        self.usage.record(tokens_in + tokens_out);
        Ok(TranslationResult {
            text,
            provider: self.name.clone(),
            model: request.model.clone(),
            cached: false,
            tokens_in,
            tokens_out,
            chars_in: request.text.chars().count() as u64,
            chars_out: 0,
        })
    }

    async fn translate_stream(
        &self,
        request: &TranslationRequest,
        cancel: &CancellationToken,
    ) -> BoxStream<'static, Result<Chunk, ProviderError>> {
        if let Some(err) = self.take_failure() {
            return stream::once(async move { Err(err) }).boxed();
        }
        let full = self.translate_text(request);
        let words: Vec<String> = full.split(' ').map(|s| s.to_string()).collect();
        let cancel = cancel.clone();
        stream::iter(words.into_iter().enumerate())
            .take_while(move |_| {
                let cancelled = cancel.is_cancelled();
                async move { !cancelled }
            })
            .map(|(i, w)| {
                let prefix = if i == 0 { "" } else { " " };
                Ok(Chunk {
                    text: format!("{prefix}{w}"),
                })
            })
            .boxed()
    }

    async fn get_quota(&self) -> Option<Quota> {
        self.quota.lock().clone()
    }

    fn snapshot(&self) -> ProviderSnapshot {
        let (requests, tokens) = self.usage.windowed();
        let (total_requests, total_tokens) = self.usage.totals();
        ProviderSnapshot {
            api_key_present: true,
            model: "mock".to_string(),
            endpoint: "mock://local".to_string(),
            requests,
            tokens,
            total_requests,
            total_tokens,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn req(text: &str) -> TranslationRequest {
        TranslationRequest {
            text: text.to_string(),
            source: "en".to_string(),
            target: "fr".to_string(),
            model: "qwen-mt-turbo".to_string(),
            stream: false,
            provider_hint: None,
            deadline: crate::types::now_ms() + 20_000,
        }
    }

    #[tokio::test]
    async fn translate_unary_produces_deterministic_output() {
        let provider = MockProvider::new("a");
        let cancel = CancellationToken::new();
        let result = provider.translate_unary(&req("hello"), &cancel).await.unwrap();
        assert_eq!(result.text, "[en->fr] hello");
        assert_eq!(result.provider, "a");
    }

    #[tokio::test]
    async fn injected_failure_applies_once() {
        let provider = MockProvider::new("a");
        provider.fail_next_call(ProviderError::Network("down".into()));
        let cancel = CancellationToken::new();
        assert!(provider.translate_unary(&req("x"), &cancel).await.is_err());
        assert!(provider.translate_unary(&req("x"), &cancel).await.is_ok());
    }
}
