//! C7: translation orchestrator (§4.7).
//!
//! Owns no state of its own beyond an offline flag; it composes C2–C6 into the nine-step
//! lifecycle: fingerprint, TM lookup, provider selection, throttle admission, provider call,
//! single retry-on-retryable-error, offline detection, TM put + accounting on success, and an
//! unconditional status update on every exit path (left to the caller — §9 "process-scoped
//! components reachable through an explicit Core handle" keeps C8's InFlightRequest bookkeeping
//! out of this module).

use crate::error::CoreError;
use crate::provider::{Chunk, Provider, ProviderRegistry};
use crate::selector::ProviderSelector;
use crate::telemetry::Telemetry;
use crate::throttle::{AdmitDecision, Throttle};
use crate::tm::TranslationMemory;
use crate::accountant::UsageAccountant;
use crate::types::{now_ms, TMKey, TranslationRequest, TranslationResult};
use futures::StreamExt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

pub struct OrchestratorDeps {
    pub tm: Arc<TranslationMemory>,
    pub throttle: Throttle,
    pub selector: Arc<ProviderSelector>,
    pub registry: Arc<ProviderRegistry>,
    pub accountant: Arc<UsageAccountant>,
}

pub struct Orchestrator {
    deps: OrchestratorDeps,
    offline: AtomicBool,
    telemetry: Option<Arc<Telemetry>>,
}

impl Orchestrator {
    pub fn new(deps: OrchestratorDeps) -> Self {
        Self {
            deps,
            offline: AtomicBool::new(false),
            telemetry: None,
        }
    }

    /// Attaches the ambient telemetry handle so suspension-point outcomes (TM hit/miss,
    /// throttle admit/deny, provider success/failure, selector advance) are counted. Optional,
    /// mirroring [`crate::channel::RequestChannel::with_observability`]: an orchestrator built
    /// without one still translates correctly, just without those counters incrementing.
    pub fn with_telemetry(mut self, telemetry: Arc<Telemetry>) -> Self {
        self.telemetry = Some(telemetry);
        self
    }

    /// Set by a host-connectivity collaborator (out of scope here); consulted only to turn a
    /// `Network` provider error into a distinct `Offline` condition (§4.7 step 7).
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::Relaxed);
    }

    pub fn is_offline(&self) -> bool {
        self.offline.load(Ordering::Relaxed)
    }

    fn cancellation_outcome(request: &TranslationRequest) -> CoreError {
        if now_ms() >= request.deadline {
            CoreError::Timeout
        } else {
            CoreError::Cancelled
        }
    }

    /// `on_chunk` is invoked once per streamed chunk, in generation order, before the final
    /// `result`/`error` (§5 ordering guarantee). Ignored for non-streaming requests.
    pub async fn translate(
        &self,
        request: &TranslationRequest,
        cancel: &CancellationToken,
        mut on_chunk: impl FnMut(Chunk) + Send,
    ) -> Result<TranslationResult, CoreError> {
        let provider_family = request
            .provider_hint
            .as_deref()
            .unwrap_or(request.model.as_str());
        let key = TMKey::fingerprint(
            provider_family,
            &request.source,
            &request.target,
            &request.text,
        );

        if let Some(entry) = self.deps.tm.get(&key) {
            if let Some(telemetry) = &self.telemetry {
                telemetry.record_tm_hit();
            }
            return Ok(TranslationResult {
                text: entry.text,
                provider: "cache".to_string(),
                model: request.model.clone(),
                cached: true,
                tokens_in: 0,
                tokens_out: 0,
                chars_in: request.text.chars().count() as u64,
                chars_out: 0,
            });
        }
        if let Some(telemetry) = &self.telemetry {
            telemetry.record_tm_miss();
        }

        let deadline_duration =
            Duration::from_millis(request.deadline.saturating_sub(now_ms()));

        let mut attempt = 0u32;
        loop {
            attempt += 1;

            let provider_name = if attempt == 1 {
                match &request.provider_hint {
                    Some(hint) if self.deps.registry.get(hint).is_some() => Some(hint.clone()),
                    _ => self.deps.selector.select().await,
                }
            } else {
                self.deps.selector.select().await
            };
            let provider_name = match provider_name {
                Some(name) => name,
                None => return Err(CoreError::Internal("no provider available".to_string())),
            };
            let provider = match self.deps.registry.get(&provider_name) {
                Some(p) => p,
                None => {
                    return Err(CoreError::Internal(format!(
                        "provider {provider_name} not registered"
                    )))
                }
            };

            let tokens_estimate = provider.approx_tokens(&request.text) as u64;
            match self
                .deps
                .throttle
                .wait_until_admitted(tokens_estimate, cancel, deadline_duration)
                .await
            {
                AdmitDecision::Admitted => {
                    if let Some(telemetry) = &self.telemetry {
                        telemetry.record_admitted();
                    }
                }
                AdmitDecision::Denied { retry_after_ms } => {
                    if let Some(telemetry) = &self.telemetry {
                        telemetry.record_denied();
                    }
                    if cancel.is_cancelled() {
                        return Err(Self::cancellation_outcome(request));
                    }
                    if now_ms() >= request.deadline {
                        return Err(CoreError::Timeout);
                    }
                    return Err(CoreError::RateLimited { retry_after_ms });
                }
            }

            let outcome = if request.stream {
                self.call_streaming(&provider, request, cancel, &mut on_chunk)
                    .await
            } else {
                provider
                    .translate_unary(request, cancel)
                    .await
                    .map_err(CoreError::from)
            };

            match outcome {
                Ok(result) => {
                    if let Some(telemetry) = &self.telemetry {
                        telemetry.record_provider_outcome(&provider_name, true);
                    }
                    let tokens_used = result.tokens_in + result.tokens_out;
                    self.deps.throttle.record(tokens_estimate, tokens_used);
                    self.deps.tm.put(key.clone(), result.text.clone()).await;
                    self.deps
                        .accountant
                        .record(
                            &result.provider,
                            &result.model,
                            result.tokens_in,
                            result.tokens_out,
                            result.chars_in,
                            result.chars_out,
                        )
                        .await;
                    return Ok(result);
                }
                Err(err) => {
                    if let Some(telemetry) = &self.telemetry {
                        telemetry.record_provider_outcome(&provider_name, false);
                    }
                    self.deps.throttle.record(tokens_estimate, 0);
                    if matches!(err, CoreError::Cancelled | CoreError::Timeout) {
                        return Err(err);
                    }
                    if matches!(err, CoreError::Network(_)) && self.is_offline() {
                        tracing::warn!(provider = %provider_name, "translate failed while host is offline");
                        return Err(CoreError::Offline);
                    }
                    if err.retryable() && attempt == 1 {
                        let before = provider_name.clone();
                        self.deps.selector.advance();
                        if let Some(telemetry) = &self.telemetry {
                            if let Some(after) = self.deps.selector.current_provider() {
                                telemetry.record_selector_advance(&before, &after);
                            }
                        }
                        continue;
                    }
                    return Err(err);
                }
            }
        }
    }

    async fn call_streaming(
        &self,
        provider: &Arc<dyn Provider>,
        request: &TranslationRequest,
        cancel: &CancellationToken,
        on_chunk: &mut (impl FnMut(Chunk) + Send),
    ) -> Result<TranslationResult, CoreError> {
        let mut stream = provider.translate_stream(request, cancel).await;
        let mut text = String::new();
        loop {
            tokio::select! {
                item = stream.next() => {
                    match item {
                        Some(Ok(chunk)) => {
                            text.push_str(&chunk.text);
                            on_chunk(chunk);
                        }
                        Some(Err(err)) => return Err(CoreError::from(err)),
                        None => break,
                    }
                }
                _ = cancel.cancelled() => return Err(Self::cancellation_outcome(request)),
            }
        }
        if cancel.is_cancelled() {
            return Err(Self::cancellation_outcome(request));
        }
        Ok(TranslationResult {
            tokens_in: provider.approx_tokens(&request.text) as u64,
            tokens_out: provider.approx_tokens(&text) as u64,
            chars_in: request.text.chars().count() as u64,
            chars_out: text.chars().count() as u64,
            provider: provider.name().to_string(),
            model: request.model.clone(),
            cached: false,
            text,
        })
    }
}
