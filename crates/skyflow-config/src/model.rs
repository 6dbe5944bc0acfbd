//! Typed configuration model

use skyflow_cloud::{Credential, ProviderConfig, ResourceKind, Workspace};
use std::collections::BTreeMap;
use std::time::Duration;

/// Whole `skyflow.kdl`
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SkyflowConfig {
    pub providers: Vec<ProviderConfig>,
    pub connection: ConnectionConfig,
    pub health: HealthConfig,
    pub monitor: MonitorConfig,
    pub sync: SyncConfig,
    pub cache: CacheConfig,
    pub subscriptions: SubscriptionConfig,
    pub workspaces: Vec<WorkspaceConfig>,
}

impl SkyflowConfig {
    pub fn provider(&self, name: &str) -> Option<&ProviderConfig> {
        self.providers.iter().find(|p| p.name == name)
    }

    pub fn enabled_providers(&self) -> impl Iterator<Item = &ProviderConfig> {
        self.providers.iter().filter(|p| p.enabled)
    }

    /// Every credential across all workspaces
    pub fn credentials(&self) -> impl Iterator<Item = &Credential> {
        self.workspaces.iter().flat_map(|w| w.credentials.iter())
    }
}

/// Dial policy for provider plugins
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionConfig {
    pub dial_timeout: Duration,
    pub max_retries: u32,
    pub retry_interval: Duration,
    pub keep_alive_interval: Duration,
    pub keep_alive_timeout: Duration,
    pub permit_without_stream: bool,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            dial_timeout: Duration::from_secs(10),
            max_retries: 3,
            retry_interval: Duration::from_secs(2),
            keep_alive_interval: Duration::from_secs(10),
            keep_alive_timeout: Duration::from_secs(3),
            permit_without_stream: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HealthConfig {
    pub interval: Duration,
    pub timeout: Duration,
    pub failure_threshold: u32,
    pub reconnect_delay: Duration,
    pub reconnect_timeout: Duration,
    /// Reconnect automatically after repeated failures
    pub reconnect: bool,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(30),
            timeout: Duration::from_secs(5),
            failure_threshold: 3,
            reconnect_delay: Duration::from_secs(2),
            reconnect_timeout: Duration::from_secs(30),
            reconnect: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MonitorConfig {
    pub enabled: bool,
    pub interval: Duration,
    pub reconnect_delay: Duration,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval: Duration::from_secs(5),
            reconnect_delay: Duration::from_secs(2),
        }
    }
}

/// Subscriber thresholds and sync intervals per priority
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PriorityConfig {
    pub high_threshold: usize,
    pub medium_threshold: usize,
    pub high_interval: Duration,
    pub medium_interval: Duration,
    pub low_interval: Duration,
}

impl Default for PriorityConfig {
    fn default() -> Self {
        Self {
            high_threshold: 5,
            medium_threshold: 1,
            high_interval: Duration::from_secs(60),
            medium_interval: Duration::from_secs(3 * 60),
            low_interval: Duration::from_secs(10 * 60),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncConfig {
    /// Kinds to run a worker for
    pub kinds: Vec<ResourceKind>,
    pub interval: Duration,
    pub concurrency: usize,
    pub batch_size: usize,
    pub fetch_timeout: Duration,
    pub priority: PriorityConfig,
    /// Per-provider default region overrides
    pub regions: BTreeMap<String, Vec<String>>,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            kinds: ResourceKind::ALL.to_vec(),
            interval: Duration::from_secs(5 * 60),
            concurrency: 5,
            batch_size: 1000,
            fetch_timeout: Duration::from_secs(60),
            priority: PriorityConfig::default(),
            regions: BTreeMap::new(),
        }
    }
}

/// Snapshot TTL per kind
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheConfig {
    /// Redis URL; snapshots stay in process memory when unset
    pub redis: Option<String>,
    pub kubernetes: Duration,
    pub network: Duration,
    pub vm: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            redis: None,
            kubernetes: Duration::from_secs(30),
            network: Duration::from_secs(5 * 60),
            vm: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubscriptionConfig {
    /// Redis URL of the shared subscription registry
    pub redis: Option<String>,
}

/// Statically configured workspace with its credentials
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkspaceConfig {
    pub workspace: Workspace,
    pub credentials: Vec<Credential>,
}
