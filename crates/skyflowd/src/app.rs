//! Control plane assembly
//!
//! Wires the connection manager and one sync worker per resource kind from a
//! parsed [`SkyflowConfig`], then owns their start and shutdown order.

use crate::settings;
use anyhow::Context;
use skyflow_cloud::{ProviderClient, ResourceKind};
use skyflow_config::SkyflowConfig;
use skyflow_connect::{
    ConnectionRegistry, ConnectionStateMonitor, GrpcDialer, GrpcProviderClient, HealthChecker,
};
use skyflow_sync::{
    BroadcastBus, EventEnvelope, MemoryCache, RedisCache, RedisSubscriptionRegistry, SnapshotCache,
    SubscriptionRegistry, SubscriptionTracker, SyncWorker, WorkspaceDirectory,
};
use std::sync::{Arc, Mutex};
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, info, warn};

pub type Registry = ConnectionRegistry<GrpcDialer>;

pub struct ControlPlane {
    registry: Arc<Registry>,
    health: Arc<HealthChecker<GrpcDialer>>,
    monitor: Option<Arc<ConnectionStateMonitor<GrpcDialer>>>,
    workers: Vec<SyncWorker>,
    bus: Arc<BroadcastBus>,
    event_log: Mutex<Option<JoinHandle<()>>>,
}

impl ControlPlane {
    /// Build every component; Redis backends are connected here
    pub async fn build(config: &SkyflowConfig) -> anyhow::Result<Self> {
        let registry = Arc::new(ConnectionRegistry::with_settings(
            GrpcDialer::new(),
            settings::dial_settings(&config.connection),
        ));
        for provider in &config.providers {
            registry
                .register_provider(provider.clone())
                .await
                .with_context(|| format!("provider '{}' の登録に失敗しました", provider.name))?;
        }

        let health = Arc::new(HealthChecker::new(
            Arc::clone(&registry),
            settings::health_settings(&config.health),
        ));
        health.set_reconnect_mode(config.health.reconnect);

        let monitor = config.monitor.enabled.then(|| {
            Arc::new(ConnectionStateMonitor::new(
                Arc::clone(&registry),
                settings::monitor_settings(&config.monitor, &config.health),
            ))
        });

        let cache: Arc<dyn SnapshotCache> = match &config.cache.redis {
            Some(url) => Arc::new(
                RedisCache::connect(url)
                    .await
                    .with_context(|| format!("snapshot cache {url} に接続できません"))?,
            ),
            None => Arc::new(MemoryCache::new()),
        };

        let subscriptions = match &config.subscriptions.redis {
            Some(url) => {
                let registry = RedisSubscriptionRegistry::connect(url)
                    .await
                    .with_context(|| format!("subscription registry {url} に接続できません"))?;
                Some(Arc::new(registry) as Arc<dyn SubscriptionRegistry>)
            }
            None => {
                info!("No subscription registry configured, syncing on the base interval");
                None
            }
        };

        let bus = Arc::new(BroadcastBus::default());
        let directory: Arc<dyn WorkspaceDirectory> = Arc::new(settings::directory(config));
        let client: Arc<dyn ProviderClient> =
            Arc::new(GrpcProviderClient::new(Arc::clone(&registry)));
        let policy = settings::sync_policy(&config.sync.priority);

        let workers = config
            .sync
            .kinds
            .iter()
            .map(|&kind| {
                SyncWorker::new(
                    settings::worker_config(&config.sync, &config.cache, kind),
                    Arc::clone(&client),
                    Arc::clone(&directory),
                    Arc::clone(&cache),
                    bus.clone(),
                    SubscriptionTracker::new(subscriptions.clone(), kind, policy.clone()),
                )
            })
            .collect();

        Ok(Self {
            registry,
            health,
            monitor,
            workers,
            bus,
            event_log: Mutex::new(None),
        })
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    pub fn health(&self) -> &Arc<HealthChecker<GrpcDialer>> {
        &self.health
    }

    pub fn workers(&self) -> &[SyncWorker] {
        &self.workers
    }

    pub fn worker(&self, kind: ResourceKind) -> Option<&SyncWorker> {
        self.workers.iter().find(|w| w.kind() == kind)
    }

    /// Receive every event published from now on
    pub fn subscribe_events(&self) -> broadcast::Receiver<EventEnvelope> {
        self.bus.subscribe()
    }

    /// Connect enabled providers, then start the background loops
    ///
    /// A provider that cannot be reached is left to the health checker.
    pub async fn start(&self) -> anyhow::Result<()> {
        let mut dials = JoinSet::new();
        for name in self.registry.list_enabled_providers().await {
            let registry = Arc::clone(&self.registry);
            dials.spawn(async move {
                let result = registry.connect(&name).await;
                (name, result)
            });
        }
        while let Some(joined) = dials.join_next().await {
            match joined {
                Ok((name, Ok(()))) => info!(provider = %name, "Provider connected"),
                Ok((name, Err(e))) => {
                    warn!(provider = %name, error = %e, "Provider not reachable at startup")
                }
                Err(e) => warn!(error = %e, "Connect task failed"),
            }
        }

        if let Err(e) = self.start_loops() {
            // 起動済みのループと接続を片付けてから返す
            self.shutdown().await;
            return Err(e);
        }

        info!(
            providers = self.registry.list_connected_providers().await.len(),
            workers = self.workers.len(),
            "Control plane started"
        );
        Ok(())
    }

    fn start_loops(&self) -> anyhow::Result<()> {
        self.health
            .start()
            .context("health checker を起動できません")?;
        if let Some(monitor) = &self.monitor {
            monitor
                .start()
                .context("connection monitor を起動できません")?;
        }
        self.spawn_event_log();
        for worker in &self.workers {
            worker
                .start()
                .with_context(|| format!("{} worker を起動できません", worker.kind()))?;
        }
        Ok(())
    }

    /// Stop loops first so nothing redials while connections are closed
    pub async fn shutdown(&self) {
        for worker in &self.workers {
            worker.stop().await;
        }
        if let Some(monitor) = &self.monitor {
            monitor.stop().await;
        }
        self.health.stop().await;

        if let Some(handle) = self.take_event_log() {
            handle.abort();
        }

        if let Err(e) = self.registry.disconnect_all().await {
            warn!(error = %e, "Some provider connections did not close cleanly");
        }
        info!("Control plane stopped");
    }

    fn spawn_event_log(&self) {
        let mut rx = self.bus.subscribe();
        let handle = tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(event) => debug!(
                        event_type = %event.event_type,
                        credential_id = %event.scope.credential_id,
                        region = %event.scope.region,
                        "Event published"
                    ),
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped, "Event log fell behind")
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        });

        let previous = match self.event_log.lock() {
            Ok(mut slot) => slot.replace(handle),
            Err(poisoned) => poisoned.into_inner().replace(handle),
        };
        if let Some(previous) = previous {
            previous.abort();
        }
    }

    fn take_event_log(&self) -> Option<JoinHandle<()>> {
        match self.event_log.lock() {
            Ok(mut slot) => slot.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        }
    }
}
