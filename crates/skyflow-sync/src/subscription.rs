//! Live subscriber demand
//!
//! The event gateway keeps one set per (kind, credential, region) under
//! `sse:subscriptions:{kind}:{credential}:{region}`, holding the IDs of the
//! connections watching it. The number of members decides how often that
//! pair is synced.

use crate::error::Result;
use async_trait::async_trait;
use redis::AsyncCommands;
use redis::aio::ConnectionManager;
use skyflow_cloud::ResourceKind;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, warn};

const KEY_PREFIX: &str = "sse:subscriptions";

/// Registry key for one (kind, credential, region)
pub fn subscription_key(kind: ResourceKind, credential_id: &str, region: &str) -> String {
    format!("{KEY_PREFIX}:{kind}:{credential_id}:{region}")
}

/// Read access to the shared subscription sets
#[async_trait]
pub trait SubscriptionRegistry: Send + Sync {
    /// Keys matching a glob pattern (`*` wildcards)
    async fn keys(&self, pattern: &str) -> Result<Vec<String>>;

    /// Number of members of the set at `key`
    async fn cardinality(&self, key: &str) -> Result<usize>;
}

/// Redis registry (`KEYS` + `SCARD`)
#[derive(Clone)]
pub struct RedisSubscriptionRegistry {
    conn: ConnectionManager,
}

impl RedisSubscriptionRegistry {
    pub async fn connect(url: &str) -> Result<Self> {
        let client = redis::Client::open(url)?;
        let conn = ConnectionManager::new(client).await?;
        debug!(url = %url, "Connected to subscription registry");
        Ok(Self { conn })
    }

    pub fn from_connection(conn: ConnectionManager) -> Self {
        Self { conn }
    }
}

#[async_trait]
impl SubscriptionRegistry for RedisSubscriptionRegistry {
    async fn keys(&self, pattern: &str) -> Result<Vec<String>> {
        let mut conn = self.conn.clone();
        Ok(conn.keys(pattern).await?)
    }

    async fn cardinality(&self, key: &str) -> Result<usize> {
        let mut conn = self.conn.clone();
        Ok(conn.scard(key).await?)
    }
}

/// In-process registry for tests and single-instance deployments
#[derive(Debug, Default)]
pub struct MemorySubscriptionRegistry {
    sets: RwLock<HashMap<String, HashSet<String>>>,
}

impl MemorySubscriptionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `connection_id` as a watcher of (kind, credential, region)
    pub async fn subscribe(
        &self,
        kind: ResourceKind,
        credential_id: &str,
        region: &str,
        connection_id: &str,
    ) {
        self.add(&subscription_key(kind, credential_id, region), connection_id)
            .await;
    }

    pub async fn unsubscribe(
        &self,
        kind: ResourceKind,
        credential_id: &str,
        region: &str,
        connection_id: &str,
    ) {
        let key = subscription_key(kind, credential_id, region);
        let mut sets = self.sets.write().await;
        if let Some(members) = sets.get_mut(&key) {
            members.remove(connection_id);
            if members.is_empty() {
                sets.remove(&key);
            }
        }
    }

    /// Raw set insert; the key is not validated
    pub async fn add(&self, key: &str, member: &str) {
        self.sets
            .write()
            .await
            .entry(key.to_string())
            .or_default()
            .insert(member.to_string());
    }

    /// Create an empty set, as a gateway may briefly leave behind
    pub async fn touch(&self, key: &str) {
        self.sets
            .write()
            .await
            .entry(key.to_string())
            .or_default();
    }
}

#[async_trait]
impl SubscriptionRegistry for MemorySubscriptionRegistry {
    async fn keys(&self, pattern: &str) -> Result<Vec<String>> {
        let mut keys: Vec<String> = self
            .sets
            .read()
            .await
            .keys()
            .filter(|key| glob_match(pattern, key))
            .cloned()
            .collect();
        keys.sort();
        Ok(keys)
    }

    async fn cardinality(&self, key: &str) -> Result<usize> {
        Ok(self.sets.read().await.get(key).map_or(0, HashSet::len))
    }
}

/// Escape Redis glob metacharacters so `value` only matches itself
pub fn escape_glob(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        if matches!(c, '*' | '?' | '[' | ']' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

enum GlobToken {
    Any,
    One,
    Literal(char),
    Class { negated: bool, ranges: Vec<(char, char)> },
}

impl GlobToken {
    fn matches(&self, c: char) -> bool {
        match self {
            GlobToken::Any | GlobToken::One => true,
            GlobToken::Literal(l) => *l == c,
            GlobToken::Class { negated, ranges } => {
                ranges.iter().any(|(lo, hi)| (*lo..=*hi).contains(&c)) != *negated
            }
        }
    }
}

fn glob_tokens(pattern: &str) -> Vec<GlobToken> {
    let mut tokens = Vec::new();
    let mut chars = pattern.chars().peekable();
    while let Some(c) = chars.next() {
        let token = match c {
            '*' => GlobToken::Any,
            '?' => GlobToken::One,
            '\\' => GlobToken::Literal(chars.next().unwrap_or('\\')),
            '[' => {
                let negated = chars.next_if_eq(&'^').is_some();
                let mut ranges = Vec::new();
                while let Some(c) = chars.next() {
                    let lo = match c {
                        ']' => break,
                        '\\' => chars.next().unwrap_or('\\'),
                        c => c,
                    };
                    let hi = match chars.next_if_eq(&'-') {
                        Some(_) => chars.next().unwrap_or(lo),
                        None => lo,
                    };
                    ranges.push((lo.min(hi), lo.max(hi)));
                }
                GlobToken::Class { negated, ranges }
            }
            c => GlobToken::Literal(c),
        };
        tokens.push(token);
    }
    tokens
}

/// Redis `KEYS` glob: `*`, `?`, `[...]` classes and `\` escapes
fn glob_match(pattern: &str, text: &str) -> bool {
    let tokens = glob_tokens(pattern);
    let text: Vec<char> = text.chars().collect();
    let (mut t, mut p) = (0, 0);
    // 最後の `*` の位置と、そこから再試行するテキスト位置
    let mut backtrack: Option<(usize, usize)> = None;

    while t < text.len() {
        match tokens.get(p) {
            Some(GlobToken::Any) => {
                backtrack = Some((p, t));
                p += 1;
            }
            Some(token) if token.matches(text[t]) => {
                p += 1;
                t += 1;
            }
            _ => match backtrack {
                Some((star, from)) => {
                    p = star + 1;
                    t = from + 1;
                    backtrack = Some((star, from + 1));
                }
                None => return false,
            },
        }
    }
    tokens[p..].iter().all(|token| matches!(token, GlobToken::Any))
}

/// How urgently a (credential, region) needs syncing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum SyncPriority {
    High,
    Medium,
    Low,
}

impl SyncPriority {
    pub const ALL: [SyncPriority; 3] = [SyncPriority::High, SyncPriority::Medium, SyncPriority::Low];

    pub fn as_str(&self) -> &'static str {
        match self {
            SyncPriority::High => "high",
            SyncPriority::Medium => "medium",
            SyncPriority::Low => "low",
        }
    }
}

impl std::fmt::Display for SyncPriority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Subscriber thresholds and sync intervals per priority
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncPolicy {
    /// Subscribers needed for high priority
    pub high_threshold: usize,
    /// Subscribers needed for medium priority
    pub medium_threshold: usize,
    pub high_interval: Duration,
    pub medium_interval: Duration,
    pub low_interval: Duration,
}

impl Default for SyncPolicy {
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

impl SyncPolicy {
    pub fn priority_for(&self, count: usize) -> SyncPriority {
        if count >= self.high_threshold {
            SyncPriority::High
        } else if count >= self.medium_threshold {
            SyncPriority::Medium
        } else {
            SyncPriority::Low
        }
    }

    pub fn interval_for(&self, priority: SyncPriority) -> Duration {
        match priority {
            SyncPriority::High => self.high_interval,
            SyncPriority::Medium => self.medium_interval,
            SyncPriority::Low => self.low_interval,
        }
    }
}

/// Priority for `count` subscribers under the default policy
pub fn priority_for(count: usize) -> SyncPriority {
    SyncPolicy::default().priority_for(count)
}

/// Interval for `priority` under the default policy
pub fn interval_for(priority: SyncPriority) -> Duration {
    SyncPolicy::default().interval_for(priority)
}

/// Watchers of one (credential, region)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionInfo {
    pub credential_id: String,
    pub region: String,
    pub count: usize,
}

/// credential → region → subscriber count
pub type ActiveSubscriptions = HashMap<String, HashMap<String, usize>>;

/// Reads subscriber demand for one resource kind
#[derive(Clone)]
pub struct SubscriptionTracker {
    registry: Option<Arc<dyn SubscriptionRegistry>>,
    kind: ResourceKind,
    policy: SyncPolicy,
}

impl SubscriptionTracker {
    pub fn new(
        registry: Option<Arc<dyn SubscriptionRegistry>>,
        kind: ResourceKind,
        policy: SyncPolicy,
    ) -> Self {
        Self {
            registry,
            kind,
            policy,
        }
    }

    /// Tracker with no backend: reports no subscriptions
    pub fn disabled(kind: ResourceKind) -> Self {
        Self::new(None, kind, SyncPolicy::default())
    }

    pub fn has_backend(&self) -> bool {
        self.registry.is_some()
    }

    pub fn kind(&self) -> ResourceKind {
        self.kind
    }

    pub fn policy(&self) -> &SyncPolicy {
        &self.policy
    }

    /// Non-zero subscriber counts per credential and region
    pub async fn active_subscriptions(&self) -> Result<ActiveSubscriptions> {
        let pattern = format!("{KEY_PREFIX}:{}:*:*", self.kind);
        let mut active = ActiveSubscriptions::new();

        for info in self.scan(&pattern).await? {
            active
                .entry(info.credential_id)
                .or_default()
                .insert(info.region, info.count);
        }
        Ok(active)
    }

    /// Same as [`active_subscriptions`](Self::active_subscriptions), flattened
    /// and sorted by credential then region
    pub async fn subscriptions(&self) -> Result<Vec<SubscriptionInfo>> {
        let pattern = format!("{KEY_PREFIX}:{}:*:*", self.kind);
        let mut infos = self.scan(&pattern).await?;
        infos.sort_by(|a, b| {
            (a.credential_id.as_str(), a.region.as_str())
                .cmp(&(b.credential_id.as_str(), b.region.as_str()))
        });
        Ok(infos)
    }

    /// Regions of `credential_id` with at least one subscriber, sorted
    pub async fn subscribed_regions(&self, credential_id: &str) -> Result<Vec<String>> {
        let pattern = format!("{KEY_PREFIX}:{}:{}:*", self.kind, escape_glob(credential_id));
        let mut regions: Vec<String> = self
            .scan(&pattern)
            .await?
            .into_iter()
            .filter(|info| info.credential_id == credential_id)
            .map(|info| info.region)
            .collect();
        regions.sort();
        regions.dedup();
        Ok(regions)
    }

    pub fn priority_for(&self, count: usize) -> SyncPriority {
        self.policy.priority_for(count)
    }

    pub fn interval_for(&self, priority: SyncPriority) -> Duration {
        self.policy.interval_for(priority)
    }

    async fn scan(&self, pattern: &str) -> Result<Vec<SubscriptionInfo>> {
        let Some(registry) = &self.registry else {
            return Ok(Vec::new());
        };

        let keys = registry.keys(pattern).await?;
        let mut infos = Vec::with_capacity(keys.len());

        for key in keys {
            let Some((credential_id, region)) = self.parse_key(&key) else {
                debug!(key = %key, "Skipping malformed subscription key");
                continue;
            };

            let count = match registry.cardinality(&key).await {
                Ok(count) => count,
                Err(e) => {
                    warn!(key = %key, error = %e, "Failed to count subscribers");
                    continue;
                }
            };
            if count == 0 {
                continue;
            }

            infos.push(SubscriptionInfo {
                credential_id: credential_id.to_string(),
                region: region.to_string(),
                count,
            });
        }
        Ok(infos)
    }

    fn parse_key<'k>(&self, key: &'k str) -> Option<(&'k str, &'k str)> {
        let parts: Vec<&str> = key.split(':').collect();
        match parts.as_slice() {
            ["sse", "subscriptions", kind, credential_id, region]
                if *kind == self.kind.as_str()
                    && !credential_id.is_empty()
                    && !region.is_empty() =>
            {
                Some((*credential_id, *region))
            }
            _ => None,
        }
    }
}
