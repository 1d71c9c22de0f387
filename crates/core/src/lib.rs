//! Translation core: admission control, a two-tier translation memory, provider selection
//! with quota-driven failover, request lifecycle management over a persistent channel, and
//! usage/cost accounting.
//!
//! Global mutable singletons in the source this was modeled on become process-scoped
//! components here, initialised once and reachable through an explicit [`Core`] handle (§9).

pub mod accountant;
pub mod api;
pub mod channel;
pub mod config;
pub mod error;
pub mod kv;
pub mod orchestrator;
pub mod permissions;
pub mod provider;
pub mod selector;
pub mod status;
pub mod telemetry;
pub mod throttle;
pub mod tm;
pub mod types;

use accountant::UsageAccountant;
use channel::{ChannelLimits, Detector, FrameSink, RequestChannel};
use config::CoreConfig;
use kv::KvStore;
use orchestrator::{Orchestrator, OrchestratorDeps};
use permissions::PermissionGate;
use provider::ProviderRegistry;
use selector::{ProviderSelector, SelectorThresholds};
use status::{StatusConfig, StatusTracker};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use telemetry::Telemetry;
use throttle::{Throttle, ThrottleConfig};
use tm::{TmConfig, TranslationMemory};

/// Every process-scoped component, constructed once at startup and handed down to whatever
/// drives the transport (the request channel's binding to a concrete connection type lives in
/// the binary, since the core stays transport-agnostic).
pub struct Core {
    pub config: CoreConfig,
    pub telemetry: Arc<Telemetry>,
    pub registry: Arc<ProviderRegistry>,
    pub selector: Arc<ProviderSelector>,
    pub throttle: Throttle,
    pub tm: Arc<TranslationMemory>,
    pub accountant: Arc<UsageAccountant>,
    pub orchestrator: Arc<Orchestrator>,
    pub status: Arc<StatusTracker>,
    pub permissions: Arc<PermissionGate>,
}

impl Core {
    /// `local`/`sync` are the two KV roles (§4.1); `registry` must already have every provider
    /// in `config.provider_order` registered (config validation enforces this at load time).
    pub fn new(
        config: CoreConfig,
        registry: Arc<ProviderRegistry>,
        local: Arc<dyn KvStore>,
        sync: Option<Arc<dyn KvStore>>,
        cost_table: std::collections::BTreeMap<String, accountant::Price>,
    ) -> Self {
        let selector = Arc::new(ProviderSelector::new(
            config.provider_order.clone(),
            SelectorThresholds {
                request_threshold: config.request_threshold,
                token_threshold: config.token_threshold,
            },
            registry.clone(),
        ));
        let throttle = Throttle::new(ThrottleConfig {
            window: Duration::from_millis(config.throttle_window_ms),
            request_limit: config.request_limit,
            token_limit: config.token_limit,
        });
        let telemetry = Arc::new(Telemetry::new());
        let tm = Arc::new(
            TranslationMemory::new(
                TmConfig {
                    max_entries: config.tm_max_entries,
                    ttl_ms: config.tm_ttl_ms,
                    sync_enabled: config.tm_sync,
                },
                local.clone(),
                sync,
            )
            .with_telemetry(telemetry.clone()),
        );
        let accountant = Arc::new(UsageAccountant::new(local, cost_table));
        let orchestrator = Arc::new(
            Orchestrator::new(OrchestratorDeps {
                tm: tm.clone(),
                throttle: throttle.clone(),
                selector: selector.clone(),
                registry: registry.clone(),
                accountant: accountant.clone(),
            })
            .with_telemetry(telemetry.clone()),
        );
        let status = Arc::new(StatusTracker::new(
            StatusConfig {
                premium_models: config.premium_models.iter().cloned().collect::<HashSet<_>>(),
                emit_hz: config.status_emit_hz,
                ..StatusConfig::default()
            },
            Some(throttle.clone()),
        ));

        Self {
            config,
            telemetry,
            registry,
            selector,
            throttle,
            tm,
            accountant,
            orchestrator,
            status,
            permissions: Arc::new(PermissionGate::new()),
        }
    }

    /// Loads any persisted TM/usage snapshots. Call once before accepting connections.
    pub async fn init(&self) -> anyhow::Result<()> {
        self.tm.init().await?;
        self.accountant.init().await?;
        Ok(())
    }

    pub fn request_channel(
        &self,
        sink: Arc<dyn FrameSink>,
        detector: Option<Arc<dyn Detector>>,
    ) -> RequestChannel {
        RequestChannel::new(
            self.orchestrator.clone(),
            sink,
            detector,
            ChannelLimits {
                max_inflight_per_client: self.config.max_inflight_per_client,
                max_inflight_global: self.config.max_inflight_global,
            },
        )
        .with_observability(Some(self.status.clone()), Some(self.telemetry.clone()))
    }
}
