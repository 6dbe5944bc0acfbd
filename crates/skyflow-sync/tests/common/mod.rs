use async_trait::async_trait;
use skyflow_cloud::{CloudError, Credential, ProviderClient, Resource, ResourceKind, Workspace};
use skyflow_sync::{
    BroadcastBus, EventBus, EventEnvelope, MemoryCache, MemorySubscriptionRegistry,
    StaticDirectory, SubscriptionRegistry, SubscriptionTracker, SyncError, SyncPolicy, SyncWorker,
    SyncWorkerConfig,
};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::broadcast;

pub const KIND: ResourceKind = ResourceKind::KubernetesCluster;

/// Provider returning canned inventories per (credential, region)
#[derive(Default)]
pub struct FakeProvider {
    inventory: Mutex<HashMap<(String, String), Vec<Resource>>>,
    failing: Mutex<HashSet<String>>,
    panicking: Mutex<HashSet<String>>,
    delay: Mutex<Duration>,
    calls: Mutex<Vec<(String, String)>>,
}

impl FakeProvider {
    pub fn set(&self, credential_id: &str, region: &str, resources: Vec<Resource>) {
        self.inventory
            .lock()
            .unwrap()
            .insert((credential_id.to_string(), region.to_string()), resources);
    }

    pub fn fail(&self, credential_id: &str) {
        self.failing.lock().unwrap().insert(credential_id.to_string());
    }

    pub fn panic_on(&self, credential_id: &str) {
        self.panicking
            .lock()
            .unwrap()
            .insert(credential_id.to_string());
    }

    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = delay;
    }

    pub fn calls(&self) -> Vec<(String, String)> {
        self.calls.lock().unwrap().clone()
    }

    pub fn calls_for_region(&self, region: &str) -> usize {
        self.calls().iter().filter(|(_, r)| r == region).count()
    }
}

#[async_trait]
impl ProviderClient for FakeProvider {
    async fn fetch(
        &self,
        credential: &Credential,
        _kind: ResourceKind,
        region: &str,
    ) -> skyflow_cloud::Result<Vec<Resource>> {
        self.calls
            .lock()
            .unwrap()
            .push((credential.id.clone(), region.to_string()));

        if self.panicking.lock().unwrap().contains(&credential.id) {
            panic!("provider plugin crashed");
        }
        if self.failing.lock().unwrap().contains(&credential.id) {
            return Err(CloudError::ApiError("throttled".to_string()));
        }

        let delay = *self.delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        Ok(self
            .inventory
            .lock()
            .unwrap()
            .get(&(credential.id.clone(), region.to_string()))
            .cloned()
            .unwrap_or_default())
    }
}

/// Bus that rejects everything
pub struct BrokenBus;

#[async_trait]
impl EventBus for BrokenBus {
    async fn publish(&self, _envelope: EventEnvelope) -> skyflow_sync::Result<()> {
        Err(SyncError::Bus("bus offline".to_string()))
    }
}

pub fn config() -> SyncWorkerConfig {
    let mut config = SyncWorkerConfig::new(KIND);
    config.default_regions = BTreeMap::from([
        (
            "aws".to_string(),
            vec!["us-east-1".to_string(), "eu-west-1".to_string()],
        ),
        ("gcp".to_string(), vec!["us-central1".to_string()]),
    ]);
    config
}

pub fn directory(credentials: &[Credential]) -> StaticDirectory {
    let mut directory = StaticDirectory::new();
    for credential in credentials {
        directory.add_workspace(Workspace::new(
            credential.workspace_id.clone(),
            credential.workspace_id.clone(),
        ));
        directory.add_credential(credential.clone());
    }
    directory
}

pub struct Harness {
    pub provider: Arc<FakeProvider>,
    pub cache: Arc<MemoryCache>,
    pub subscriptions: Arc<MemorySubscriptionRegistry>,
    pub events: broadcast::Receiver<EventEnvelope>,
    pub worker: SyncWorker,
}

impl Harness {
    pub fn new(config: SyncWorkerConfig, directory: StaticDirectory, with_subscriptions: bool) -> Self {
        let provider = Arc::new(FakeProvider::default());
        let cache = Arc::new(MemoryCache::new());
        let subscriptions = Arc::new(MemorySubscriptionRegistry::new());
        let bus = BroadcastBus::new(4096);
        let events = bus.subscribe();

        let registry: Option<Arc<dyn SubscriptionRegistry>> = if with_subscriptions {
            Some(subscriptions.clone())
        } else {
            None
        };
        let tracker = SubscriptionTracker::new(registry, config.kind, SyncPolicy::default());

        let worker = SyncWorker::new(
            config,
            provider.clone(),
            Arc::new(directory),
            cache.clone(),
            Arc::new(bus),
            tracker,
        );

        Self {
            provider,
            cache,
            subscriptions,
            events,
            worker,
        }
    }

    /// Everything published since the last drain
    pub fn drain(&mut self) -> Vec<EventEnvelope> {
        let mut events = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            events.push(event);
        }
        events
    }
}
