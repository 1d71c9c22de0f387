//! C8: request channel (§4.8).
//!
//! Transport-agnostic: this module knows nothing about WebSockets or any particular wire
//! encoding (that lives in the binary's connection handler). It owns the `InFlightRequest`
//! table, the per-request lifecycle (allocate, arm deadline, spawn, tear down exactly once),
//! and disconnect cleanup. Frames reach a client through an injected [`FrameSink`].
//!
//! This expansion additionally bounds admission into the channel itself — a configurable
//! `max_inflight_per_client` / `max_inflight_global` reject a `translate` frame before an
//! `InFlightRequest` is even allocated, grounded in the teacher's per-connection limiter
//! pattern, so one misbehaving client cannot exhaust the deadline-timer pool for everyone else.

use crate::error::{CoreError, ErrorFrame};
use crate::orchestrator::Orchestrator;
use crate::provider::Chunk;
use crate::status::StatusTracker;
use crate::telemetry::{Telemetry, TerminalKind};
use crate::types::{now_ms, TranslationRequest, TranslationResult};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum ClientFrame {
    Translate {
        request_id: u64,
        opts: TranslationRequest,
    },
    Cancel {
        request_id: u64,
    },
    Detect {
        request_id: u64,
        text: String,
        detector: DetectorKind,
    },
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DetectorKind {
    Local,
    Remote,
}

#[derive(Debug, Clone, Serialize)]
pub struct DetectResult {
    pub lang: String,
    pub confidence: f32,
}

#[derive(Debug, Clone, Serialize)]
pub struct ServerFrame {
    pub request_id: u64,
    #[serde(flatten)]
    pub body: ServerFrameBody,
}

#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum ServerFrameBody {
    Chunk { chunk: String },
    Result { result: TranslationResult },
    Detected { lang: String, confidence: f32 },
    Error { error: ErrorFrame },
}

/// Language detector collaborator, out of scope per the core's own responsibilities; the
/// channel only forwards to whatever is injected and surfaces `unsupported` if none is.
#[async_trait]
pub trait Detector: Send + Sync {
    async fn detect(&self, text: &str, kind: DetectorKind) -> anyhow::Result<DetectResult>;
}

/// Delivers server frames to a specific connected client. Implemented by the transport (e.g.
/// a WebSocket connection registry) outside this crate's core.
#[async_trait]
pub trait FrameSink: Send + Sync {
    async fn send(&self, client_id: &str, frame: ServerFrame);
}

#[derive(Debug, Clone, Copy)]
pub struct ChannelLimits {
    pub max_inflight_per_client: usize,
    pub max_inflight_global: usize,
}

impl Default for ChannelLimits {
    fn default() -> Self {
        Self {
            max_inflight_per_client: 16,
            max_inflight_global: 256,
        }
    }
}

struct InFlight {
    client_id: String,
    cancel: CancellationToken,
}

/// `request_id` is only unique per-client (§4.8); combine with `client_id` before using it as
/// a key in the ambient status tracker, which is keyed by a flat `u64`.
fn status_key(client_id: &str, request_id: u64) -> u64 {
    use std::hash::{Hash, Hasher};
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    client_id.hash(&mut hasher);
    request_id.hash(&mut hasher);
    hasher.finish()
}

/// Owns every `InFlightRequest` for the process. Cloning shares the same table (cheap handle,
/// like [`crate::throttle::Throttle`]).
#[derive(Clone)]
pub struct RequestChannel {
    orchestrator: Arc<Orchestrator>,
    sink: Arc<dyn FrameSink>,
    detector: Option<Arc<dyn Detector>>,
    limits: ChannelLimits,
    inflight: Arc<Mutex<HashMap<(String, u64), InFlight>>>,
    active: Arc<AtomicU64>,
    status: Option<Arc<StatusTracker>>,
    telemetry: Option<Arc<Telemetry>>,
}

impl RequestChannel {
    pub fn new(
        orchestrator: Arc<Orchestrator>,
        sink: Arc<dyn FrameSink>,
        detector: Option<Arc<dyn Detector>>,
        limits: ChannelLimits,
    ) -> Self {
        Self {
            orchestrator,
            sink,
            detector,
            limits,
            inflight: Arc::new(Mutex::new(HashMap::new())),
            active: Arc::new(AtomicU64::new(0)),
            status: None,
            telemetry: None,
        }
    }

    /// Attaches the ambient status tracker (C9) and telemetry handle so the channel reports
    /// per-request lifecycle events as they happen, rather than only through `active_count`.
    /// Optional: a channel built without this still behaves correctly, just without the
    /// status/telemetry side effects.
    pub fn with_observability(
        mut self,
        status: Option<Arc<StatusTracker>>,
        telemetry: Option<Arc<Telemetry>>,
    ) -> Self {
        self.status = status;
        self.telemetry = telemetry;
        self
    }

    pub fn active_count(&self) -> u64 {
        self.active.load(Ordering::Relaxed)
    }

    pub async fn handle(&self, client_id: &str, frame: ClientFrame) {
        match frame {
            ClientFrame::Translate { request_id, opts } => {
                self.handle_translate(client_id, request_id, opts).await
            }
            ClientFrame::Cancel { request_id } => self.handle_cancel(client_id, request_id),
            ClientFrame::Detect {
                request_id,
                text,
                detector,
            } => self.handle_detect(client_id, request_id, text, detector).await,
        }
    }

    fn client_count(&self, client_id: &str) -> usize {
        self.inflight
            .lock()
            .keys()
            .filter(|(c, _)| c == client_id)
            .count()
    }

    async fn handle_translate(&self, client_id: &str, request_id: u64, mut opts: TranslationRequest) {
        if opts.deadline == 0 {
            opts.deadline = TranslationRequest::default_deadline(now_ms(), opts.stream);
        }

        {
            let inflight = self.inflight.lock();
            if inflight.len() >= self.limits.max_inflight_global
                || self.client_count(client_id) >= self.limits.max_inflight_per_client
            {
                drop(inflight);
                self.send_error(client_id, request_id, &CoreError::Internal(
                    "resource exhausted: too many in-flight requests".to_string(),
                ))
                .await;
                return;
            }
        }

        let cancel = CancellationToken::new();
        self.inflight.lock().insert(
            (client_id.to_string(), request_id),
            InFlight {
                client_id: client_id.to_string(),
                cancel: cancel.clone(),
            },
        );
        self.active.fetch_add(1, Ordering::Relaxed);
        if let Some(status) = &self.status {
            status.request_started(status_key(client_id, request_id), &opts.model);
        }
        tracing::debug!(request_id, client_id, model = %opts.model, "translate request admitted");

        let deadline_cancel = cancel.clone();
        let wait = Duration::from_millis(opts.deadline.saturating_sub(now_ms()));
        tokio::spawn(async move {
            tokio::time::sleep(wait).await;
            deadline_cancel.cancel();
        });

        let orchestrator = self.orchestrator.clone();
        let sink = self.sink.clone();
        let channel = self.clone();
        let client_id = client_id.to_string();

        tokio::spawn(async move {
            let sink_for_chunks = sink.clone();
            let client_for_chunks = client_id.clone();
            let on_chunk = move |chunk: Chunk| {
                let sink = sink_for_chunks.clone();
                let client_id = client_for_chunks.clone();
                tokio::spawn(async move {
                    sink.send(
                        &client_id,
                        ServerFrame {
                            request_id,
                            body: ServerFrameBody::Chunk { chunk: chunk.text },
                        },
                    )
                    .await;
                });
            };

            let outcome = orchestrator.translate(&opts, &cancel, on_chunk).await;
            match outcome {
                Ok(result) => {
                    sink.send(
                        &client_id,
                        ServerFrame {
                            request_id,
                            body: ServerFrameBody::Result { result },
                        },
                    )
                    .await;
                    channel.note_terminal(&client_id, request_id, TerminalKind::Result);
                }
                Err(err) => {
                    let kind = if matches!(err, CoreError::Cancelled) {
                        TerminalKind::Cancelled
                    } else {
                        TerminalKind::Error
                    };
                    channel.send_error(&client_id, request_id, &err).await;
                    channel.note_terminal(&client_id, request_id, kind);
                }
            }
            channel.complete(&client_id, request_id);
        });
    }

    /// Records the terminal outcome of a request against the ambient telemetry/status
    /// handles, if attached. `Cancelled` suppresses the status red flash (§7 error table).
    fn note_terminal(&self, client_id: &str, request_id: u64, kind: TerminalKind) {
        if let Some(telemetry) = &self.telemetry {
            telemetry.record_terminal(kind);
        }
        if let Some(status) = &self.status {
            if kind == TerminalKind::Error {
                status.record_error();
            }
            status.request_finished(status_key(client_id, request_id));
        }
    }

    fn handle_cancel(&self, client_id: &str, request_id: u64) {
        // Idempotent: a second cancel for an already-removed request is a no-op.
        if let Some(entry) = self
            .inflight
            .lock()
            .get(&(client_id.to_string(), request_id))
        {
            entry.cancel.cancel();
        }
    }

    async fn handle_detect(
        &self,
        client_id: &str,
        request_id: u64,
        text: String,
        kind: DetectorKind,
    ) {
        let Some(detector) = &self.detector else {
            self.send_error(
                client_id,
                request_id,
                &CoreError::Internal("detector unavailable".to_string()),
            )
            .await;
            return;
        };
        match detector.detect(&text, kind).await {
            Ok(detected) => {
                self.sink
                    .send(
                        client_id,
                        ServerFrame {
                            request_id,
                            body: ServerFrameBody::Detected {
                                lang: detected.lang,
                                confidence: detected.confidence,
                            },
                        },
                    )
                    .await;
            }
            Err(err) => {
                self.send_error(client_id, request_id, &CoreError::Internal(err.to_string()))
                    .await;
            }
        }
    }

    /// Cancels and removes every `InFlightRequest` owned by `client_id`. Called on transport
    /// disconnect; within one tick every cancel handle has fired and the table entries are
    /// gone (§8 scenario 6).
    pub fn disconnect(&self, client_id: &str) {
        let mut removed = 0u64;
        let mut inflight = self.inflight.lock();
        let keys: Vec<(String, u64)> = inflight
            .keys()
            .filter(|(c, _)| c == client_id)
            .cloned()
            .collect();
        for key in keys {
            if let Some(entry) = inflight.remove(&key) {
                entry.cancel.cancel();
                removed += 1;
            }
        }
        drop(inflight);
        self.active.fetch_sub(removed, Ordering::Relaxed);
    }

    fn complete(&self, client_id: &str, request_id: u64) {
        let removed = self
            .inflight
            .lock()
            .remove(&(client_id.to_string(), request_id))
            .is_some();
        if removed {
            self.active.fetch_sub(1, Ordering::Relaxed);
        }
    }

    async fn send_error(&self, client_id: &str, request_id: u64, err: &CoreError) {
        self.sink
            .send(
                client_id,
                ServerFrame {
                    request_id,
                    body: ServerFrameBody::Error { error: err.into() },
                },
            )
            .await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::accountant::{default_cost_table, UsageAccountant};
    use crate::kv::MemoryStore;
    use crate::orchestrator::OrchestratorDeps;
    use crate::provider::{MockProvider, Provider, ProviderRegistry};
    use crate::selector::{ProviderSelector, SelectorThresholds};
    use crate::throttle::{Throttle, ThrottleConfig};
    use crate::tm::{TmConfig, TranslationMemory};
    use tokio::sync::Mutex as AsyncMutex;

    #[derive(Default)]
    struct RecordingSink {
        frames: AsyncMutex<Vec<(String, ServerFrame)>>,
    }

    #[async_trait]
    impl FrameSink for RecordingSink {
        async fn send(&self, client_id: &str, frame: ServerFrame) {
            self.frames
                .lock()
                .await
                .push((client_id.to_string(), frame));
        }
    }

    fn channel(sink: Arc<RecordingSink>) -> RequestChannel {
        let registry = Arc::new(ProviderRegistry::new());
        let provider = Arc::new(MockProvider::new("a"));
        registry.register("a", provider as Arc<dyn Provider>);
        let selector = Arc::new(ProviderSelector::new(
            vec!["a".to_string()],
            SelectorThresholds::default(),
            registry.clone(),
        ));
        let orchestrator = Arc::new(Orchestrator::new(OrchestratorDeps {
            tm: Arc::new(TranslationMemory::new(
                TmConfig::default(),
                MemoryStore::shared(),
                None,
            )),
            throttle: Throttle::new(ThrottleConfig::default()),
            selector,
            registry,
            accountant: Arc::new(UsageAccountant::new(MemoryStore::shared(), default_cost_table())),
        }));
        RequestChannel::new(orchestrator, sink, None, ChannelLimits::default())
    }

    fn opts() -> TranslationRequest {
        TranslationRequest {
            text: "hello".to_string(),
            source: "en".to_string(),
            target: "fr".to_string(),
            model: "qwen-mt-turbo".to_string(),
            stream: false,
            provider_hint: None,
            deadline: now_ms() + 20_000,
        }
    }

    #[tokio::test]
    async fn translate_delivers_exactly_one_terminal_frame() {
        let sink = Arc::new(RecordingSink::default());
        let ch = channel(sink.clone());
        ch.handle(
            "c1",
            ClientFrame::Translate {
                request_id: 1,
                opts: opts(),
            },
        )
        .await;
        tokio::time::sleep(Duration::from_millis(20)).await;

        let frames = sink.frames.lock().await;
        let terminal_count = frames
            .iter()
            .filter(|(_, f)| matches!(f.body, ServerFrameBody::Result { .. } | ServerFrameBody::Error { .. }))
            .count();
        assert_eq!(terminal_count, 1);
        assert_eq!(ch.active_count(), 0);
    }

    #[tokio::test]
    async fn cancel_is_idempotent_and_yields_a_single_error_frame() {
        let sink = Arc::new(RecordingSink::default());
        let ch = channel(sink.clone());
        let mut slow = opts();
        slow.stream = true;
        ch.handle(
            "c1",
            ClientFrame::Translate {
                request_id: 7,
                opts: slow,
            },
        )
        .await;
        ch.handle_cancel("c1", 7);
        ch.handle_cancel("c1", 7);
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(ch.active_count(), 0);
    }

    #[tokio::test]
    async fn disconnect_cancels_and_clears_every_owned_request() {
        let sink = Arc::new(RecordingSink::default());
        let ch = channel(sink.clone());
        for id in 0..3 {
            let mut req = opts();
            req.stream = true;
            ch.handle("c1", ClientFrame::Translate { request_id: id, opts: req })
                .await;
        }
        assert_eq!(ch.active_count(), 3);
        ch.disconnect("c1");
        assert_eq!(ch.active_count(), 0);
    }

    struct StubDetector;

    #[async_trait]
    impl Detector for StubDetector {
        async fn detect(&self, _text: &str, _kind: DetectorKind) -> anyhow::Result<DetectResult> {
            Ok(DetectResult {
                lang: "fr".to_string(),
                confidence: 0.9,
            })
        }
    }

    #[tokio::test]
    async fn detect_delivers_a_detected_frame() {
        let sink = Arc::new(RecordingSink::default());
        let registry = Arc::new(ProviderRegistry::new());
        let provider = Arc::new(MockProvider::new("a"));
        registry.register("a", provider as Arc<dyn Provider>);
        let selector = Arc::new(ProviderSelector::new(
            vec!["a".to_string()],
            SelectorThresholds::default(),
            registry.clone(),
        ));
        let orchestrator = Arc::new(Orchestrator::new(OrchestratorDeps {
            tm: Arc::new(TranslationMemory::new(TmConfig::default(), MemoryStore::shared(), None)),
            throttle: Throttle::new(ThrottleConfig::default()),
            selector,
            registry,
            accountant: Arc::new(UsageAccountant::new(MemoryStore::shared(), default_cost_table())),
        }));
        let ch = RequestChannel::new(
            orchestrator,
            sink.clone(),
            Some(Arc::new(StubDetector) as Arc<dyn Detector>),
            ChannelLimits::default(),
        );
        ch.handle(
            "c1",
            ClientFrame::Detect {
                request_id: 9,
                text: "bonjour".to_string(),
                detector: DetectorKind::Local,
            },
        )
        .await;

        let frames = sink.frames.lock().await;
        assert!(frames.iter().any(|(_, f)| {
            f.request_id == 9
                && matches!(
                    &f.body,
                    ServerFrameBody::Detected { lang, .. } if lang == "fr"
                )
        }));
    }

    #[tokio::test]
    async fn global_admission_limit_rejects_new_translates() {
        let sink = Arc::new(RecordingSink::default());
        let registry = Arc::new(ProviderRegistry::new());
        let provider = Arc::new(MockProvider::new("a").with_latency(Duration::from_millis(50)));
        registry.register("a", provider as Arc<dyn Provider>);
        let selector = Arc::new(ProviderSelector::new(
            vec!["a".to_string()],
            SelectorThresholds::default(),
            registry.clone(),
        ));
        let orchestrator = Arc::new(Orchestrator::new(OrchestratorDeps {
            tm: Arc::new(TranslationMemory::new(TmConfig::default(), MemoryStore::shared(), None)),
            throttle: Throttle::new(ThrottleConfig::default()),
            selector,
            registry,
            accountant: Arc::new(UsageAccountant::new(MemoryStore::shared(), default_cost_table())),
        }));
        let ch = RequestChannel::new(
            orchestrator,
            sink.clone(),
            None,
            ChannelLimits {
                max_inflight_per_client: 1,
                max_inflight_global: 1,
            },
        );
        ch.handle("c1", ClientFrame::Translate { request_id: 1, opts: opts() }).await;
        ch.handle("c1", ClientFrame::Translate { request_id: 2, opts: opts() }).await;

        let frames = sink.frames.lock().await;
        let rejected = frames
            .iter()
            .any(|(_, f)| f.request_id == 2 && matches!(f.body, ServerFrameBody::Error { .. }));
        assert!(rejected);
    }
}
