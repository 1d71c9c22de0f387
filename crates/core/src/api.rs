//! One-shot message API (§6 "One-shot message API"): a convenience request/response surface
//! distinct from the persistent `translate` channel (C8). No streaming, no `InFlightRequest`
//! bookkeeping, no deadline timer — one call in, one structured-cloneable value out. `translate`
//! and `detect` here reuse exactly the same collaborators the channel uses (the orchestrator and
//! the injected [`Detector`]); everything else is a read or a small side effect against the
//! core's own components.

use crate::accountant::CostStats;
use crate::channel::{DetectResult, Detector, DetectorKind};
use crate::error::{CoreError, ErrorFrame};
use crate::status::BadgeView;
use crate::throttle::Occupancy;
use crate::tm::TmStats;
use crate::types::{now_ms, ProviderSnapshot, Status, TMKey, TranslationRequest, TranslationResult};
use crate::Core;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "action", rename_all = "kebab-case")]
pub enum OneShotRequest {
    Translate {
        opts: TranslationRequest,
    },
    Detect {
        text: String,
        detector: DetectorKind,
    },
    Usage,
    Metrics,
    TmGetAll,
    TmClear,
    TmImport {
        entries: Vec<(TMKey, String)>,
    },
    TmExport,
    PermissionsCheck {
        origin: String,
    },
    PermissionsRequest {
        origin: String,
    },
    #[serde(rename = "home:init")]
    HomeInit,
    TranslationStatus {
        status: Status,
    },
    GetStatus,
    EnsureStart {
        #[serde(rename = "tabId")]
        tab_id: u64,
        url: String,
    },
}

#[derive(Debug, Clone, Serialize)]
pub struct TmEntryView {
    pub key: TMKey,
    pub text: String,
    pub ts: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct UsageSnapshot {
    pub occupancy: Occupancy,
    pub cost: CostStats,
}

#[derive(Debug, Clone, Serialize)]
pub struct TmSummary {
    pub entries: u64,
    pub max_entries: usize,
    pub ttl_ms: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub usage: UsageSnapshot,
    pub cache: TmStats,
    pub tm: TmSummary,
    pub providers: Vec<ProviderSnapshot>,
    pub status: BadgeView,
}

#[derive(Debug, Clone, Serialize)]
pub struct HomeInitSnapshot {
    pub providers: Vec<ProviderSnapshot>,
    pub usage: UsageSnapshot,
}

#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum OneShotResponse {
    Translate(TranslationResult),
    Detect(DetectResult),
    Usage(UsageSnapshot),
    Metrics(MetricsSnapshot),
    TmEntries(Vec<TmEntryView>),
    TmExport(Vec<(TMKey, String)>),
    Ok { ok: bool },
    Permission { granted: bool, origin: String },
    HomeInit(HomeInitSnapshot),
    Status(BadgeView),
    EnsureStart { ok: bool, error: Option<String> },
    Error(ErrorFrame),
}

impl Core {
    /// Dispatches a single one-shot request. `detector` mirrors the channel's own optional
    /// collaborator (§4.8) — a core built without one still answers every action except
    /// `detect`, which surfaces `{ error: "internal" }`.
    pub async fn handle_one_shot(
        &self,
        request: OneShotRequest,
        detector: Option<&Arc<dyn Detector>>,
    ) -> OneShotResponse {
        match request {
            OneShotRequest::Translate { opts } => self.one_shot_translate(opts).await,
            OneShotRequest::Detect { text, detector: kind } => {
                self.one_shot_detect(text, kind, detector).await
            }
            OneShotRequest::Usage => OneShotResponse::Usage(self.usage_snapshot()),
            OneShotRequest::Metrics => OneShotResponse::Metrics(self.metrics_snapshot()),
            OneShotRequest::TmGetAll => OneShotResponse::TmEntries(
                self.tm
                    .get_all()
                    .into_iter()
                    .map(|(key, entry)| TmEntryView {
                        key,
                        text: entry.text,
                        ts: entry.ts,
                    })
                    .collect(),
            ),
            OneShotRequest::TmClear => {
                self.tm.clear().await;
                OneShotResponse::Ok { ok: true }
            }
            OneShotRequest::TmImport { entries } => {
                self.tm.import(entries).await;
                OneShotResponse::Ok { ok: true }
            }
            OneShotRequest::TmExport => OneShotResponse::TmExport(
                self.tm
                    .get_all()
                    .into_iter()
                    .map(|(key, entry)| (key, entry.text))
                    .collect(),
            ),
            OneShotRequest::PermissionsCheck { origin } => OneShotResponse::Permission {
                granted: self.permissions.has_permission(&origin),
                origin,
            },
            OneShotRequest::PermissionsRequest { origin } => {
                self.permissions.request_permission(&origin);
                OneShotResponse::Permission {
                    granted: true,
                    origin,
                }
            }
            OneShotRequest::HomeInit => OneShotResponse::HomeInit(self.home_init_snapshot()),
            OneShotRequest::TranslationStatus { status } => {
                // The only host-connectivity signal this API surface carries back in: the
                // orchestrator's offline flag is otherwise only ever set by an out-of-scope
                // collaborator (§4.7).
                self.orchestrator.set_offline(status.offline);
                OneShotResponse::Ok { ok: true }
            }
            OneShotRequest::GetStatus => OneShotResponse::Status(self.status.snapshot(now_ms())),
            OneShotRequest::EnsureStart { tab_id: _, url } => {
                match crate::permissions::origin_pattern(&url) {
                    Some(_) => {
                        let ok = self
                            .permissions
                            .ensure_started(&url, self.config.auto_translate);
                        OneShotResponse::EnsureStart { ok, error: None }
                    }
                    None => OneShotResponse::EnsureStart {
                        ok: false,
                        error: Some("ineligible_scheme".to_string()),
                    },
                }
            }
        }
    }

    async fn one_shot_translate(&self, mut opts: TranslationRequest) -> OneShotResponse {
        opts.stream = false;
        if opts.deadline == 0 {
            opts.deadline = TranslationRequest::default_deadline(now_ms(), false);
        }
        let cancel = CancellationToken::new();
        match self.orchestrator.translate(&opts, &cancel, |_| {}).await {
            Ok(result) => OneShotResponse::Translate(result),
            Err(err) => OneShotResponse::Error((&err).into()),
        }
    }

    async fn one_shot_detect(
        &self,
        text: String,
        kind: DetectorKind,
        detector: Option<&Arc<dyn Detector>>,
    ) -> OneShotResponse {
        let Some(detector) = detector else {
            return OneShotResponse::Error((&CoreError::Internal("detector unavailable".to_string())).into());
        };
        match detector.detect(&text, kind).await {
            Ok(result) => OneShotResponse::Detect(result),
            Err(err) => OneShotResponse::Error((&CoreError::Internal(err.to_string())).into()),
        }
    }

    fn usage_snapshot(&self) -> UsageSnapshot {
        UsageSnapshot {
            occupancy: self.throttle.occupancy(),
            cost: self.accountant.cost_stats(now_ms()),
        }
    }

    fn provider_snapshots(&self) -> Vec<ProviderSnapshot> {
        self.registry
            .list()
            .into_iter()
            .filter_map(|name| self.registry.get(&name))
            .map(|provider| provider.snapshot())
            .collect()
    }

    fn metrics_snapshot(&self) -> MetricsSnapshot {
        let cache = self.tm.stats();
        MetricsSnapshot {
            usage: self.usage_snapshot(),
            cache,
            tm: TmSummary {
                entries: cache.entries,
                max_entries: self.config.tm_max_entries,
                ttl_ms: self.config.tm_ttl_ms,
            },
            providers: self.provider_snapshots(),
            status: self.status.snapshot(now_ms()),
        }
    }

    fn home_init_snapshot(&self) -> HomeInitSnapshot {
        HomeInitSnapshot {
            providers: self.provider_snapshots(),
            usage: self.usage_snapshot(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::accountant::default_cost_table;
    use crate::config::CoreConfig;
    use crate::kv::MemoryStore;
    use crate::provider::{MockProvider, Provider, ProviderRegistry};
    use std::sync::Arc;

    fn core() -> Core {
        let registry = Arc::new(ProviderRegistry::new());
        registry.register("a", Arc::new(MockProvider::new("a")) as Arc<dyn Provider>);
        let mut config = CoreConfig::default();
        config.provider_order = vec!["a".to_string()];
        Core::new(
            config,
            registry,
            MemoryStore::shared(),
            None,
            default_cost_table(),
        )
    }

    fn opts(text: &str) -> TranslationRequest {
        TranslationRequest {
            text: text.to_string(),
            source: "en".to_string(),
            target: "fr".to_string(),
            model: "qwen-mt-turbo".to_string(),
            stream: false,
            provider_hint: None,
            deadline: 0,
        }
    }

    #[tokio::test]
    async fn translate_round_trips_through_the_orchestrator() {
        let core = core();
        let resp = core
            .handle_one_shot(OneShotRequest::Translate { opts: opts("hello") }, None)
            .await;
        assert!(matches!(resp, OneShotResponse::Translate(_)));
    }

    #[tokio::test]
    async fn detect_without_a_collaborator_errors() {
        let core = core();
        let resp = core
            .handle_one_shot(
                OneShotRequest::Detect {
                    text: "bonjour".to_string(),
                    detector: DetectorKind::Local,
                },
                None,
            )
            .await;
        assert!(matches!(resp, OneShotResponse::Error(_)));
    }

    #[tokio::test]
    async fn tm_import_then_export_round_trips_as_a_set() {
        let core = core();
        let key = TMKey::fingerprint("qwen", "en", "fr", "hi");
        core.handle_one_shot(
            OneShotRequest::TmImport {
                entries: vec![(key.clone(), "salut".to_string())],
            },
            None,
        )
        .await;
        let resp = core.handle_one_shot(OneShotRequest::TmExport, None).await;
        match resp {
            OneShotResponse::TmExport(entries) => {
                assert_eq!(entries, vec![(key, "salut".to_string())]);
            }
            other => panic!("unexpected response: {other:?}"),
        }
    }

    #[tokio::test]
    async fn permissions_request_then_check_reports_granted() {
        let core = core();
        core.handle_one_shot(
            OneShotRequest::PermissionsRequest {
                origin: "https://example.com/*".to_string(),
            },
            None,
        )
        .await;
        let resp = core
            .handle_one_shot(
                OneShotRequest::PermissionsCheck {
                    origin: "https://example.com/*".to_string(),
                },
                None,
            )
            .await;
        assert!(matches!(
            resp,
            OneShotResponse::Permission { granted: true, .. }
        ));
    }

    #[tokio::test]
    async fn ensure_start_rejects_ineligible_schemes() {
        let core = core();
        let resp = core
            .handle_one_shot(
                OneShotRequest::EnsureStart {
                    tab_id: 1,
                    url: "chrome-extension://abc/page.html".to_string(),
                },
                None,
            )
            .await;
        assert!(matches!(
            resp,
            OneShotResponse::EnsureStart { ok: false, .. }
        ));
    }

    #[tokio::test]
    async fn translation_status_updates_orchestrator_offline_flag() {
        let core = core();
        assert!(!core.orchestrator.is_offline());
        core.handle_one_shot(
            OneShotRequest::TranslationStatus {
                status: Status {
                    offline: true,
                    ..Status::default()
                },
            },
            None,
        )
        .await;
        assert!(core.orchestrator.is_offline());
    }

    #[tokio::test]
    async fn home_init_lists_registered_providers() {
        let core = core();
        let resp = core.handle_one_shot(OneShotRequest::HomeInit, None).await;
        match resp {
            OneShotResponse::HomeInit(snapshot) => assert_eq!(snapshot.providers.len(), 1),
            other => panic!("unexpected response: {other:?}"),
        }
    }
}
