//! Snapshot cache
//!
//! Snapshots are stored as JSON under `list:{kind}:{provider}:{credential}:{region}`
//! with a TTL chosen per resource kind.

use crate::error::{Result, SyncError};
use async_trait::async_trait;
use redis::AsyncCommands;
use redis::aio::ConnectionManager;
use skyflow_cloud::{ResourceKind, ResourceSnapshot};
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::Instant;
use tracing::debug;

/// Frequently changing data
pub const SHORT_TTL: Duration = Duration::from_secs(30);
/// Moderately changing data
pub const MEDIUM_TTL: Duration = Duration::from_secs(5 * 60);
/// Rarely changing data
pub const LONG_TTL: Duration = Duration::from_secs(30 * 60);

/// Cache key of the snapshot for one (kind, provider, credential, region)
pub fn snapshot_key(
    kind: ResourceKind,
    provider: &str,
    credential_id: &str,
    region: &str,
) -> String {
    format!("list:{kind}:{provider}:{credential_id}:{region}")
}

/// TTL per resource kind
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TtlPolicy {
    pub kubernetes: Duration,
    pub network: Duration,
    pub vm: Duration,
}

impl Default for TtlPolicy {
    fn default() -> Self {
        Self {
            kubernetes: SHORT_TTL,
            network: MEDIUM_TTL,
            vm: SHORT_TTL,
        }
    }
}

impl TtlPolicy {
    pub fn ttl_for(&self, kind: ResourceKind) -> Duration {
        match kind {
            ResourceKind::KubernetesCluster => self.kubernetes,
            ResourceKind::NetworkVpc => self.network,
            ResourceKind::Vm => self.vm,
        }
    }
}

#[async_trait]
pub trait SnapshotCache: Send + Sync {
    /// Stored snapshot, or `None` when absent or expired
    async fn get(&self, key: &str) -> Result<Option<ResourceSnapshot>>;

    /// Replace the entry for `key`
    async fn set(&self, key: &str, snapshot: &ResourceSnapshot, ttl: Duration) -> Result<()>;
}

/// Process-local cache
#[derive(Debug, Default)]
pub struct MemoryCache {
    entries: RwLock<HashMap<String, (ResourceSnapshot, Instant)>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of unexpired entries
    pub async fn len(&self) -> usize {
        let now = Instant::now();
        self.entries
            .read()
            .await
            .values()
            .filter(|(_, expires)| *expires > now)
            .count()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Drop every expired entry; returns how many were removed
    pub async fn purge_expired(&self) -> usize {
        let mut entries = self.entries.write().await;
        let before = entries.len();
        let now = Instant::now();
        entries.retain(|_, (_, expires)| *expires > now);
        before - entries.len()
    }
}

#[async_trait]
impl SnapshotCache for MemoryCache {
    async fn get(&self, key: &str) -> Result<Option<ResourceSnapshot>> {
        let now = Instant::now();
        {
            let entries = self.entries.read().await;
            match entries.get(key) {
                Some((snapshot, expires)) if *expires > now => return Ok(Some(snapshot.clone())),
                Some(_) => {}
                None => return Ok(None),
            }
        }

        // 期限切れのエントリを削除
        self.entries.write().await.remove(key);
        Ok(None)
    }

    /// Expired entries of pairs that are never read again are swept here
    async fn set(&self, key: &str, snapshot: &ResourceSnapshot, ttl: Duration) -> Result<()> {
        let now = Instant::now();
        let mut entries = self.entries.write().await;
        entries.retain(|_, (_, expires)| *expires > now);
        entries.insert(key.to_string(), (snapshot.clone(), now + ttl));
        Ok(())
    }
}

/// Redis-backed cache shared between control plane instances
#[derive(Clone)]
pub struct RedisCache {
    conn: ConnectionManager,
}

impl RedisCache {
    pub async fn connect(url: &str) -> Result<Self> {
        let client = redis::Client::open(url)?;
        let conn = ConnectionManager::new(client).await?;
        debug!(url = %url, "Connected to Redis cache");
        Ok(Self { conn })
    }

    pub fn from_connection(conn: ConnectionManager) -> Self {
        Self { conn }
    }
}

#[async_trait]
impl SnapshotCache for RedisCache {
    async fn get(&self, key: &str) -> Result<Option<ResourceSnapshot>> {
        let mut conn = self.conn.clone();
        let raw: Option<String> = conn.get(key).await?;
        raw.map(|json| serde_json::from_str(&json))
            .transpose()
            .map_err(|e| SyncError::Cache(format!("corrupt entry {key}: {e}")))
    }

    async fn set(&self, key: &str, snapshot: &ResourceSnapshot, ttl: Duration) -> Result<()> {
        let json = serde_json::to_string(snapshot)?;
        let mut conn = self.conn.clone();
        conn.set_ex::<_, _, ()>(key, json, ttl.as_secs().max(1))
            .await?;
        Ok(())
    }
}
