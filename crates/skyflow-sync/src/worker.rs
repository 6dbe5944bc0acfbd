//! Resource sync worker
//!
//! One worker per resource kind. A cycle walks workspaces → credentials →
//! regions and, for each (credential, region):
//!
//! 1. reads the cached snapshot
//! 2. fetches the live list from the provider
//! 3. publishes one event per detected change (when a snapshot existed)
//! 4. publishes a `list` event with the full result
//! 5. overwrites the cached snapshot
//!
//! Without a subscription backend the worker runs a full cycle every
//! `interval`. With one, three priority tickers drive it: high and medium
//! ticks sync only the subscribed pairs of that priority, low ticks sync each
//! provider's default regions.

use crate::cache::{SnapshotCache, TtlPolicy, snapshot_key};
use crate::directory::WorkspaceDirectory;
use crate::error::{Result, SyncError};
use crate::publisher::{ChangeEvent, EventBus, EventPublisher};
use crate::subscription::{SubscriptionTracker, SyncPriority};
use skyflow_cloud::{
    Credential, Lifecycle, LifecycleState, ProviderClient, ResourceKind, ResourceSnapshot,
    detect_changes,
};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::{Semaphore, watch};
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::{Instant, MissedTickBehavior, interval_at};
use tracing::{debug, error, info, warn};

/// Regions synced when nobody is subscribed, per provider
pub fn default_regions() -> BTreeMap<String, Vec<String>> {
    let table: [(&str, &[&str]); 4] = [
        ("aws", &["ap-northeast-2", "us-east-1", "us-west-2", "eu-west-1"]),
        (
            "gcp",
            &["asia-northeast3", "asia-northeast1", "us-central1", "europe-west1"],
        ),
        ("azure", &["koreacentral", "eastus", "westus", "westeurope"]),
        ("ncp", &["KR"]),
    ];

    table
        .into_iter()
        .map(|(provider, regions)| {
            (
                provider.to_string(),
                regions.iter().map(|r| r.to_string()).collect(),
            )
        })
        .collect()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncWorkerConfig {
    pub kind: ResourceKind,
    /// Full-sync period when no subscription backend is configured
    pub interval: Duration,
    /// Workspaces listed per page
    pub batch_size: usize,
    /// Credentials synced at the same time
    pub max_concurrency: usize,
    pub fetch_timeout: Duration,
    pub ttl: TtlPolicy,
    /// Providers without an entry here are not synced
    pub default_regions: BTreeMap<String, Vec<String>>,
}

impl SyncWorkerConfig {
    pub fn new(kind: ResourceKind) -> Self {
        Self {
            kind,
            interval: Duration::from_secs(5 * 60),
            batch_size: 1000,
            max_concurrency: 5,
            fetch_timeout: Duration::from_secs(60),
            ttl: TtlPolicy::default(),
            default_regions: default_regions(),
        }
    }

    pub fn supports(&self, provider: &str) -> bool {
        self.default_regions.contains_key(provider)
    }

    pub fn regions_for(&self, provider: &str) -> &[String] {
        self.default_regions
            .get(provider)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }
}

/// Tally of one cycle
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleReport {
    /// Credentials processed
    pub credentials: usize,
    /// (credential, region) pairs fetched and cached
    pub regions_synced: usize,
    /// Failed fetches, cache writes, publishes and crashed tasks
    pub failures: usize,
    pub events_published: usize,
}

impl CycleReport {
    fn merge(&mut self, other: &CycleReport) {
        self.credentials += other.credentials;
        self.regions_synced += other.regions_synced;
        self.failures += other.failures;
        self.events_published += other.events_published;
    }
}

type PairKey = (String, String);

/// Shared by the loop task and every credential task
struct SyncContext {
    config: SyncWorkerConfig,
    provider: Arc<dyn ProviderClient>,
    directory: Arc<dyn WorkspaceDirectory>,
    cache: Arc<dyn SnapshotCache>,
    publisher: EventPublisher,
    tracker: SubscriptionTracker,
    last_synced: Mutex<HashMap<SyncPriority, HashMap<PairKey, Instant>>>,
}

pub struct SyncWorker {
    ctx: Arc<SyncContext>,
    lifecycle: Lifecycle,
    stop_tx: Mutex<Option<watch::Sender<bool>>>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl SyncWorker {
    pub fn new(
        config: SyncWorkerConfig,
        provider: Arc<dyn ProviderClient>,
        directory: Arc<dyn WorkspaceDirectory>,
        cache: Arc<dyn SnapshotCache>,
        bus: Arc<dyn EventBus>,
        tracker: SubscriptionTracker,
    ) -> Self {
        Self {
            ctx: Arc::new(SyncContext {
                config,
                provider,
                directory,
                cache,
                publisher: EventPublisher::new(bus),
                tracker,
                last_synced: Mutex::new(HashMap::new()),
            }),
            lifecycle: Lifecycle::new(),
            stop_tx: Mutex::new(None),
            handle: Mutex::new(None),
        }
    }

    pub fn kind(&self) -> ResourceKind {
        self.ctx.config.kind
    }

    pub fn state(&self) -> LifecycleState {
        self.lifecycle.state()
    }

    /// Spawn the sync loop; the first full cycle starts immediately
    ///
    /// Every ticker period (base, high, medium, low) must be non-zero.
    pub fn start(&self) -> Result<()> {
        self.check_intervals()?;
        if !self.lifecycle.begin_start() {
            return Err(SyncError::AlreadyRunning(self.kind()));
        }

        let (tx, rx) = watch::channel(false);
        let handle = tokio::spawn(run_loop(Arc::clone(&self.ctx), rx));
        *lock(&self.stop_tx) = Some(tx);
        *lock(&self.handle) = Some(handle);
        self.lifecycle.mark_running();

        info!(
            resource_kind = %self.kind(),
            subscriptions = self.ctx.tracker.has_backend(),
            "Sync worker started"
        );
        Ok(())
    }

    fn check_intervals(&self) -> Result<()> {
        let policy = self.ctx.tracker.policy();
        let tickers = [
            ("base", self.ctx.config.interval),
            ("high", policy.high_interval),
            ("medium", policy.medium_interval),
            ("low", policy.low_interval),
        ];
        match tickers.into_iter().find(|(_, period)| period.is_zero()) {
            Some((ticker, _)) => Err(SyncError::ZeroInterval {
                kind: self.kind(),
                ticker,
            }),
            None => Ok(()),
        }
    }

    /// Signal the loop and wait for it to exit; idempotent
    pub async fn stop(&self) {
        if !self.lifecycle.begin_stop() {
            return;
        }

        if let Some(tx) = lock(&self.stop_tx).take() {
            let _ = tx.send(true);
        }
        let handle = lock(&self.handle).take();
        if let Some(handle) = handle
            && let Err(e) = handle.await
            && e.is_panic()
        {
            error!(resource_kind = %self.kind(), error = %e, "Sync loop panicked");
        }
        info!(resource_kind = %self.kind(), "Sync worker stopped");
    }

    /// Run one full cycle now
    pub async fn sync_all(&self) -> CycleReport {
        self.ctx.sync_all().await
    }

    /// Run one priority cycle now
    pub async fn sync_priority(&self, priority: SyncPriority) -> CycleReport {
        self.ctx.sync_priority(priority, Instant::now()).await
    }
}

enum Cycle {
    Full,
    Priority(SyncPriority, Instant),
}

fn ticker(period: Duration) -> tokio::time::Interval {
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker
}

async fn run_loop(ctx: Arc<SyncContext>, mut stop: watch::Receiver<bool>) {
    let kind = ctx.config.kind;
    let priority_mode = ctx.tracker.has_backend();
    let policy = ctx.tracker.policy().clone();

    let mut base = ticker(ctx.config.interval);
    let mut high = ticker(policy.high_interval);
    let mut medium = ticker(policy.medium_interval);
    let mut low = ticker(policy.low_interval);

    let mut next = Some(Cycle::Full);
    loop {
        if let Some(cycle) = next.take() {
            let run = async {
                match cycle {
                    Cycle::Full => ctx.sync_all().await,
                    Cycle::Priority(priority, tick) => ctx.sync_priority(priority, tick).await,
                }
            };
            tokio::select! {
                _ = run => {}
                _ = stop.changed() => break,
            }
        }

        next = tokio::select! {
            _ = base.tick(), if !priority_mode => Some(Cycle::Full),
            tick = high.tick(), if priority_mode => Some(Cycle::Priority(SyncPriority::High, tick)),
            tick = medium.tick(), if priority_mode => Some(Cycle::Priority(SyncPriority::Medium, tick)),
            tick = low.tick(), if priority_mode => Some(Cycle::Priority(SyncPriority::Low, tick)),
            _ = stop.changed() => break,
        };
    }
    debug!(resource_kind = %kind, "Sync loop exited");
}

impl SyncContext {
    async fn sync_all(self: &Arc<Self>) -> CycleReport {
        let jobs = self
            .collect_credentials()
            .await
            .into_iter()
            .map(|credential| (credential, None))
            .collect();

        let report = self.run_jobs(jobs, None).await;
        info!(
            resource_kind = %self.config.kind,
            credentials = report.credentials,
            regions_synced = report.regions_synced,
            failures = report.failures,
            events_published = report.events_published,
            "Full sync cycle complete"
        );
        report
    }

    async fn sync_priority(self: &Arc<Self>, priority: SyncPriority, tick: Instant) -> CycleReport {
        self.prune_synced(tick);
        let credentials = self.collect_credentials().await;

        let jobs: Vec<(Credential, Option<Vec<String>>)> = match priority {
            SyncPriority::Low => credentials
                .into_iter()
                .map(|credential| {
                    let regions = self.config.regions_for(&credential.provider).to_vec();
                    (credential, Some(regions))
                })
                .collect(),
            SyncPriority::High | SyncPriority::Medium => {
                let subscriptions = match self.tracker.subscriptions().await {
                    Ok(subscriptions) => subscriptions,
                    Err(e) => {
                        warn!(
                            resource_kind = %self.config.kind,
                            priority = %priority,
                            error = %e,
                            "Failed to read subscriptions"
                        );
                        return CycleReport::default();
                    }
                };

                let mut regions_by_credential: HashMap<String, Vec<String>> = HashMap::new();
                for info in subscriptions {
                    if self.tracker.priority_for(info.count) == priority {
                        regions_by_credential
                            .entry(info.credential_id)
                            .or_default()
                            .push(info.region);
                    }
                }

                credentials
                    .into_iter()
                    .filter_map(|credential| {
                        regions_by_credential
                            .remove(&credential.id)
                            .map(|regions| (credential, Some(regions)))
                    })
                    .collect()
            }
        };

        let report = self.run_jobs(jobs, Some((priority, tick))).await;
        debug!(
            resource_kind = %self.config.kind,
            priority = %priority,
            credentials = report.credentials,
            regions_synced = report.regions_synced,
            failures = report.failures,
            "Priority sync cycle complete"
        );
        report
    }

    /// Active credentials of supported providers across all workspaces
    async fn collect_credentials(&self) -> Vec<Credential> {
        let batch = self.config.batch_size.max(1);
        let mut credentials = Vec::new();
        let mut offset = 0;

        loop {
            let workspaces = match self.directory.list_workspaces(batch, offset).await {
                Ok(workspaces) => workspaces,
                Err(e) => {
                    warn!(offset, error = %e, "Failed to list workspaces");
                    break;
                }
            };
            let page_len = workspaces.len();

            for workspace in workspaces {
                match self.directory.credentials_for(&workspace.id).await {
                    Ok(found) => credentials.extend(
                        found
                            .into_iter()
                            .filter(|c| c.active && self.config.supports(&c.provider)),
                    ),
                    Err(e) => warn!(
                        workspace_id = %workspace.id,
                        error = %e,
                        "Failed to list credentials"
                    ),
                }
            }

            if page_len < batch {
                break;
            }
            offset += page_len;
        }

        credentials
    }

    /// One task per credential, at most `max_concurrency` at a time
    async fn run_jobs(
        self: &Arc<Self>,
        jobs: Vec<(Credential, Option<Vec<String>>)>,
        priority: Option<(SyncPriority, Instant)>,
    ) -> CycleReport {
        let semaphore = Arc::new(Semaphore::new(self.config.max_concurrency.max(1)));
        let mut tasks = JoinSet::new();

        for (credential, regions) in jobs {
            let ctx = Arc::clone(self);
            let semaphore = Arc::clone(&semaphore);
            tasks.spawn(async move {
                let Ok(_permit) = semaphore.acquire_owned().await else {
                    return CycleReport::default();
                };
                ctx.sync_credential(credential, regions, priority).await
            });
        }

        let mut report = CycleReport::default();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(task_report) => report.merge(&task_report),
                Err(e) if e.is_panic() => {
                    error!(
                        resource_kind = %self.config.kind,
                        error = %e,
                        "Credential sync task panicked"
                    );
                    report.failures += 1;
                }
                Err(e) => debug!(error = %e, "Credential sync task cancelled"),
            }
        }
        report
    }

    async fn sync_credential(
        &self,
        credential: Credential,
        regions: Option<Vec<String>>,
        priority: Option<(SyncPriority, Instant)>,
    ) -> CycleReport {
        let regions = match regions {
            Some(regions) => regions,
            None => self.target_regions(&credential).await,
        };

        let mut report = CycleReport {
            credentials: 1,
            ..CycleReport::default()
        };

        for region in regions {
            if let Some((priority, tick)) = priority
                && self.synced_since(priority, tick, &credential.id, &region)
            {
                debug!(
                    credential_id = %credential.id,
                    region = %region,
                    priority = %priority,
                    "Pair synced recently, skipping"
                );
                continue;
            }

            match self.sync_region(&credential, &region, &mut report).await {
                Ok(()) => {
                    report.regions_synced += 1;
                    if let Some((priority, tick)) = priority {
                        self.mark_synced(priority, tick, &credential.id, &region);
                    }
                }
                Err(e) => {
                    report.failures += 1;
                    warn!(
                        provider = %credential.provider,
                        credential_id = %credential.id,
                        region = %region,
                        resource_kind = %self.config.kind,
                        error = %e,
                        "Region sync failed"
                    );
                }
            }
        }

        report
    }

    /// Subscribed regions, or the provider defaults when there are none
    async fn target_regions(&self, credential: &Credential) -> Vec<String> {
        match self.tracker.subscribed_regions(&credential.id).await {
            Ok(regions) if !regions.is_empty() => return regions,
            Ok(_) => {}
            Err(e) => warn!(
                credential_id = %credential.id,
                error = %e,
                "Failed to read subscribed regions, using defaults"
            ),
        }
        self.config.regions_for(&credential.provider).to_vec()
    }

    async fn sync_region(
        &self,
        credential: &Credential,
        region: &str,
        report: &mut CycleReport,
    ) -> Result<()> {
        let kind = self.config.kind;
        let provider = credential.provider.as_str();
        let key = snapshot_key(kind, provider, &credential.id, region);

        let cached = match self.cache.get(&key).await {
            Ok(cached) => cached,
            Err(e) => {
                warn!(key = %key, error = %e, "Cache read failed, treating as empty");
                None
            }
        };

        let timeout = self.config.fetch_timeout;
        let resources = tokio::time::timeout(timeout, self.provider.fetch(credential, kind, region))
            .await
            .map_err(|_| SyncError::FetchTimeout {
                kind,
                region: region.to_string(),
                timeout,
            })??;

        let mut events = Vec::new();
        if let Some(cached) = &cached {
            let changes = detect_changes(&cached.resources, &resources);
            if !changes.is_empty() {
                info!(
                    provider = %provider,
                    credential_id = %credential.id,
                    region = %region,
                    resource_kind = %kind,
                    "Detected changes: {}",
                    changes.summary()
                );
            }
            events.extend(
                changes
                    .iter()
                    .map(|c| ChangeEvent::from_change(provider, &credential.id, region, kind, c)),
            );
        }
        events.push(ChangeEvent::list(provider, &credential.id, region, kind, &resources));

        for event in &events {
            match self.publisher.publish(event).await {
                Ok(()) => report.events_published += 1,
                Err(_) => report.failures += 1,
            }
        }

        let snapshot = ResourceSnapshot::new(provider, &credential.id, region, kind, resources);
        self.cache
            .set(&key, &snapshot, self.config.ttl.ttl_for(kind))
            .await?;

        debug!(
            provider = %provider,
            credential_id = %credential.id,
            region = %region,
            resource_kind = %kind,
            resources = snapshot.len(),
            "Region synced"
        );
        Ok(())
    }

    fn synced_since(&self, priority: SyncPriority, tick: Instant, credential_id: &str, region: &str) -> bool {
        let interval = self.tracker.interval_for(priority);
        lock(&self.last_synced)
            .get(&priority)
            .and_then(|pairs| pairs.get(&(credential_id.to_string(), region.to_string())))
            .is_some_and(|last| tick.saturating_duration_since(*last) < interval)
    }

    /// Forget pairs not synced within the low interval; nothing older can skip a tick
    fn prune_synced(&self, now: Instant) {
        let horizon = self.tracker.policy().low_interval;
        let mut last_synced = lock(&self.last_synced);
        for pairs in last_synced.values_mut() {
            pairs.retain(|_, last| now.saturating_duration_since(*last) < horizon);
        }
        last_synced.retain(|_, pairs| !pairs.is_empty());
    }

    fn mark_synced(&self, priority: SyncPriority, tick: Instant, credential_id: &str, region: &str) {
        lock(&self.last_synced)
            .entry(priority)
            .or_default()
            .insert((credential_id.to_string(), region.to_string()), tick);
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
