//! KDLパーサー
//!
//! `skyflow.kdl` を [`SkyflowConfig`] に変換します。

use crate::error::{ConfigError, Result};
use crate::model::{
    CacheConfig, ConnectionConfig, HealthConfig, MonitorConfig, PriorityConfig, SkyflowConfig,
    SyncConfig, WorkspaceConfig,
};
use kdl::{KdlDocument, KdlNode, KdlValue};
use skyflow_cloud::{Credential, ProviderConfig, ResourceKind, Workspace};
use std::fs;
use std::path::Path;
use std::time::Duration;
use tracing::{debug, warn};

/// KDLファイルをパース
pub fn parse_config_file<P: AsRef<Path>>(path: P) -> Result<SkyflowConfig> {
    let path = path.as_ref();
    let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    parse_config_str(&content)
}

/// KDL文字列をパース
pub fn parse_config_str(content: &str) -> Result<SkyflowConfig> {
    let doc: KdlDocument = content.parse()?;
    let mut config = SkyflowConfig::default();

    for node in doc.nodes() {
        match node.name().value() {
            "provider" => {
                let provider = parse_provider(node)?;
                // 同名のproviderは後勝ち
                config.providers.retain(|p| p.name != provider.name);
                config.providers.push(provider);
            }
            "connection" => config.connection = parse_connection(node)?,
            "health" => config.health = parse_health(node)?,
            "monitor" => config.monitor = parse_monitor(node)?,
            "sync" => config.sync = parse_sync(node)?,
            "cache" => config.cache = parse_cache(node)?,
            "subscriptions" => config.subscriptions.redis = string_prop(node, "redis"),
            "workspace" => config.workspaces.push(parse_workspace(node)?),
            other => {
                debug!(node = %other, "Skipping unknown config node");
            }
        }
    }

    validate(&config)?;
    Ok(config)
}

/// Parse `500ms`, `30s`, `5m` or `1h`
pub fn parse_duration(value: &str) -> Result<Duration> {
    let value = value.trim();
    let invalid = || ConfigError::InvalidDuration(value.to_string());

    let (number, unit) = match value.find(|c: char| !c.is_ascii_digit()) {
        Some(pos) => value.split_at(pos),
        None => return Err(invalid()),
    };
    let amount: u64 = number.parse().map_err(|_| invalid())?;
    let secs = |factor: u64| {
        amount
            .checked_mul(factor)
            .map(Duration::from_secs)
            .ok_or_else(invalid)
    };

    match unit {
        "ms" => Ok(Duration::from_millis(amount)),
        "s" => secs(1),
        "m" => secs(60),
        "h" => secs(60 * 60),
        _ => Err(invalid()),
    }
}

/// provider ノードをパース
///
/// ```kdl
/// provider "aws" address="localhost:50051" enabled=#true {
///     credential "profile" "default"
///     metadata "team" "platform"
/// }
/// ```
fn parse_provider(node: &KdlNode) -> Result<ProviderConfig> {
    let name = name_arg(node, "provider")?;
    let address = string_prop(node, "address").ok_or_else(|| {
        ConfigError::InvalidConfig(format!("provider '{name}' requires address"))
    })?;

    let mut provider = ProviderConfig::new(name, address);
    if let Some(enabled) = bool_prop(node, "enabled")? {
        provider.enabled = enabled;
    }

    if let Some(children) = node.children() {
        for child in children.nodes() {
            let (key, value) = match (string_arg(child, 0), string_arg(child, 1)) {
                (Some(key), Some(value)) => (key, value),
                _ => {
                    return Err(ConfigError::InvalidConfig(format!(
                        "provider '{}': {} requires a key and a value",
                        provider.name,
                        child.name().value()
                    )));
                }
            };
            match child.name().value() {
                "credential" => {
                    provider.credentials.insert(key, value);
                }
                "metadata" => {
                    provider.metadata.insert(key, value);
                }
                other => debug!(node = %other, "Skipping unknown provider setting"),
            }
        }
    }

    Ok(provider)
}

fn parse_connection(node: &KdlNode) -> Result<ConnectionConfig> {
    let mut connection = ConnectionConfig::default();

    if let Some(timeout) = duration_prop(node, "dial-timeout")? {
        connection.dial_timeout = timeout;
    }
    if let Some(retries) = uint_prop(node, "max-retries")? {
        connection.max_retries = to_u32(retries, "max-retries")?;
    }
    if let Some(interval) = duration_prop(node, "retry-interval")? {
        connection.retry_interval = interval;
    }

    if let Some(children) = node.children() {
        for child in children.nodes() {
            if child.name().value() != "keep-alive" {
                continue;
            }
            if let Some(interval) = duration_prop(child, "interval")? {
                connection.keep_alive_interval = interval;
            }
            if let Some(timeout) = duration_prop(child, "timeout")? {
                connection.keep_alive_timeout = timeout;
            }
            if let Some(permit) = bool_prop(child, "permit-without-stream")? {
                connection.permit_without_stream = permit;
            }
        }
    }

    Ok(connection)
}

fn parse_health(node: &KdlNode) -> Result<HealthConfig> {
    let mut health = HealthConfig::default();

    if let Some(interval) = duration_prop(node, "interval")? {
        health.interval = interval;
    }
    if let Some(timeout) = duration_prop(node, "timeout")? {
        health.timeout = timeout;
    }
    if let Some(threshold) = uint_prop(node, "failure-threshold")? {
        health.failure_threshold = to_u32(threshold, "failure-threshold")?;
    }
    if let Some(delay) = duration_prop(node, "reconnect-delay")? {
        health.reconnect_delay = delay;
    }
    if let Some(timeout) = duration_prop(node, "reconnect-timeout")? {
        health.reconnect_timeout = timeout;
    }
    if let Some(reconnect) = bool_prop(node, "reconnect")? {
        health.reconnect = reconnect;
    }

    Ok(health)
}

fn parse_monitor(node: &KdlNode) -> Result<MonitorConfig> {
    let mut monitor = MonitorConfig::default();

    if let Some(enabled) = bool_prop(node, "enabled")? {
        monitor.enabled = enabled;
    }
    if let Some(interval) = duration_prop(node, "interval")? {
        monitor.interval = interval;
    }
    if let Some(delay) = duration_prop(node, "reconnect-delay")? {
        monitor.reconnect_delay = delay;
    }

    Ok(monitor)
}

/// sync ノードをパース
///
/// ```kdl
/// sync interval="5m" concurrency=5 batch-size=1000 fetch-timeout="60s" {
///     kinds "kubernetes-cluster" "network-vpc"
///     priority high=5 medium=1 high-interval="1m" medium-interval="3m" low-interval="10m"
///     regions "aws" "us-east-1" "eu-west-1"
/// }
/// ```
fn parse_sync(node: &KdlNode) -> Result<SyncConfig> {
    let mut sync = SyncConfig::default();

    if let Some(interval) = duration_prop(node, "interval")? {
        sync.interval = interval;
    }
    if let Some(concurrency) = uint_prop(node, "concurrency")? {
        sync.concurrency = concurrency as usize;
    }
    if let Some(batch) = uint_prop(node, "batch-size")? {
        sync.batch_size = batch as usize;
    }
    if let Some(timeout) = duration_prop(node, "fetch-timeout")? {
        sync.fetch_timeout = timeout;
    }

    if let Some(children) = node.children() {
        for child in children.nodes() {
            match child.name().value() {
                "kinds" => {
                    sync.kinds = string_args(child)
                        .iter()
                        .map(|kind| {
                            kind.parse::<ResourceKind>()
                                .map_err(|e| ConfigError::InvalidConfig(e.to_string()))
                        })
                        .collect::<Result<_>>()?;
                }
                "priority" => sync.priority = parse_priority(child)?,
                "regions" => {
                    let mut args = string_args(child).into_iter();
                    let provider = args.next().ok_or_else(|| {
                        ConfigError::InvalidConfig("regions requires a provider name".to_string())
                    })?;
                    sync.regions.insert(provider, args.collect());
                }
                other => debug!(node = %other, "Skipping unknown sync setting"),
            }
        }
    }

    Ok(sync)
}

fn parse_priority(node: &KdlNode) -> Result<PriorityConfig> {
    let mut priority = PriorityConfig::default();

    if let Some(high) = uint_prop(node, "high")? {
        priority.high_threshold = high as usize;
    }
    if let Some(medium) = uint_prop(node, "medium")? {
        priority.medium_threshold = medium as usize;
    }
    if let Some(interval) = duration_prop(node, "high-interval")? {
        priority.high_interval = interval;
    }
    if let Some(interval) = duration_prop(node, "medium-interval")? {
        priority.medium_interval = interval;
    }
    if let Some(interval) = duration_prop(node, "low-interval")? {
        priority.low_interval = interval;
    }

    Ok(priority)
}

fn parse_cache(node: &KdlNode) -> Result<CacheConfig> {
    let mut cache = CacheConfig {
        redis: string_prop(node, "redis"),
        ..CacheConfig::default()
    };

    if let Some(ttl) = duration_prop(node, "kubernetes")? {
        cache.kubernetes = ttl;
    }
    if let Some(ttl) = duration_prop(node, "network")? {
        cache.network = ttl;
    }
    if let Some(ttl) = duration_prop(node, "vm")? {
        cache.vm = ttl;
    }

    Ok(cache)
}

/// workspace ノードをパース
///
/// ```kdl
/// workspace "ws-1" name="Platform" {
///     credential "cred-1" provider="aws"
///     credential "cred-2" provider="gcp" active=#false
/// }
/// ```
fn parse_workspace(node: &KdlNode) -> Result<WorkspaceConfig> {
    let id = name_arg(node, "workspace")?;
    let name = string_prop(node, "name").unwrap_or_else(|| id.clone());

    let mut credentials = Vec::new();
    if let Some(children) = node.children() {
        for child in children.nodes() {
            if child.name().value() != "credential" {
                continue;
            }
            let credential_id = name_arg(child, "credential")?;
            let provider = string_prop(child, "provider").ok_or_else(|| {
                ConfigError::InvalidConfig(format!("credential '{credential_id}' requires provider"))
            })?;

            let mut credential = Credential::new(credential_id, id.clone(), provider);
            if bool_prop(child, "active")? == Some(false) {
                credential = credential.inactive();
            }
            credentials.push(credential);
        }
    }

    Ok(WorkspaceConfig {
        workspace: Workspace::new(id, name),
        credentials,
    })
}

fn validate(config: &SkyflowConfig) -> Result<()> {
    if config.health.failure_threshold == 0 {
        return Err(ConfigError::InvalidConfig(
            "health failure-threshold must be at least 1".to_string(),
        ));
    }

    let sync = &config.sync;
    if sync.concurrency == 0 || sync.batch_size == 0 {
        return Err(ConfigError::InvalidConfig(
            "sync concurrency and batch-size must be at least 1".to_string(),
        ));
    }
    if sync.priority.medium_threshold > sync.priority.high_threshold {
        return Err(ConfigError::InvalidConfig(format!(
            "priority medium ({}) must not exceed high ({})",
            sync.priority.medium_threshold, sync.priority.high_threshold
        )));
    }

    let intervals = [
        ("health interval", config.health.interval),
        ("monitor interval", config.monitor.interval),
        ("sync interval", sync.interval),
        ("priority high-interval", sync.priority.high_interval),
        ("priority medium-interval", sync.priority.medium_interval),
        ("priority low-interval", sync.priority.low_interval),
    ];
    if let Some((name, _)) = intervals.iter().find(|(_, period)| period.is_zero()) {
        return Err(ConfigError::InvalidConfig(format!(
            "{name} must be greater than zero"
        )));
    }

    for credential in config.credentials() {
        if config.provider(&credential.provider).is_none() {
            warn!(
                credential_id = %credential.id,
                provider = %credential.provider,
                "Credential refers to a provider that is not configured"
            );
        }
    }
    Ok(())
}

fn name_arg(node: &KdlNode, what: &str) -> Result<String> {
    string_arg(node, 0).ok_or_else(|| ConfigError::InvalidConfig(format!("{what} requires a name")))
}

/// Positional string argument at `index` (properties are not counted)
fn string_arg(node: &KdlNode, index: usize) -> Option<String> {
    node.entries()
        .iter()
        .filter(|e| e.name().is_none())
        .nth(index)
        .and_then(|e| e.value().as_string())
        .map(|s| s.to_string())
}

fn string_args(node: &KdlNode) -> Vec<String> {
    node.entries()
        .iter()
        .filter(|e| e.name().is_none())
        .filter_map(|e| e.value().as_string().map(|s| s.to_string()))
        .collect()
}

fn string_prop(node: &KdlNode, key: &str) -> Option<String> {
    node.get(key)
        .and_then(|v| v.as_string())
        .map(|s| s.to_string())
}

/// `#true`/`#false`; the strings "true"/"false" are accepted with a warning
fn bool_prop(node: &KdlNode, key: &str) -> Result<Option<bool>> {
    match node.get(key) {
        None => Ok(None),
        Some(value) => {
            if let Some(b) = value.as_bool() {
                return Ok(Some(b));
            }
            match value.as_string() {
                Some(s @ ("true" | "false")) => {
                    warn!(
                        key = %key,
                        "'{key}=\"{s}\"' is a string; use {key}=#{s} for booleans in KDL v2"
                    );
                    Ok(Some(s == "true"))
                }
                _ => Err(ConfigError::InvalidConfig(format!(
                    "{key} must be #true or #false"
                ))),
            }
        }
    }
}

/// Duration string, or a bare integer meaning seconds
fn duration_prop(node: &KdlNode, key: &str) -> Result<Option<Duration>> {
    match node.get(key) {
        None => Ok(None),
        Some(value) => duration_value(value, key).map(Some),
    }
}

fn duration_value(value: &KdlValue, key: &str) -> Result<Duration> {
    if let Some(s) = value.as_string() {
        return parse_duration(s);
    }
    match value.as_integer().and_then(|secs| u64::try_from(secs).ok()) {
        Some(secs) => Ok(Duration::from_secs(secs)),
        None => Err(ConfigError::InvalidConfig(format!(
            "{key} must be a duration such as \"30s\""
        ))),
    }
}

fn uint_prop(node: &KdlNode, key: &str) -> Result<Option<u64>> {
    match node.get(key) {
        None => Ok(None),
        Some(value) => value
            .as_integer()
            .and_then(|v| u64::try_from(v).ok())
            .map(Some)
            .ok_or_else(|| {
                ConfigError::InvalidConfig(format!("{key} must be a non-negative integer"))
            }),
    }
}

fn to_u32(value: u64, key: &str) -> Result<u32> {
    u32::try_from(value)
        .map_err(|_| ConfigError::InvalidConfig(format!("{key} is out of range")))
}
