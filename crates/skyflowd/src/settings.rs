//! Mapping from `skyflow.kdl` sections to component settings

use skyflow_cloud::ResourceKind;
use skyflow_config::{
    CacheConfig, ConnectionConfig, HealthConfig, MonitorConfig, PriorityConfig, SkyflowConfig,
    SyncConfig,
};
use skyflow_connect::{DialSettings, HealthSettings, KeepAlive, MonitorSettings};
use skyflow_sync::{StaticDirectory, SyncPolicy, SyncWorkerConfig, TtlPolicy};

pub fn dial_settings(config: &ConnectionConfig) -> DialSettings {
    DialSettings {
        dial_timeout: config.dial_timeout,
        max_retries: config.max_retries,
        retry_interval: config.retry_interval,
        keep_alive: KeepAlive {
            interval: config.keep_alive_interval,
            timeout: config.keep_alive_timeout,
            permit_without_stream: config.permit_without_stream,
        },
    }
}

pub fn health_settings(config: &HealthConfig) -> HealthSettings {
    HealthSettings {
        interval: config.interval,
        timeout: config.timeout,
        failure_threshold: config.failure_threshold,
        reconnect_delay: config.reconnect_delay,
        reconnect_timeout: config.reconnect_timeout,
    }
}

/// The monitor shares the health section's reconnect timeout
pub fn monitor_settings(config: &MonitorConfig, health: &HealthConfig) -> MonitorSettings {
    MonitorSettings {
        interval: config.interval,
        reconnect_delay: config.reconnect_delay,
        reconnect_timeout: health.reconnect_timeout,
    }
}

pub fn sync_policy(config: &PriorityConfig) -> SyncPolicy {
    SyncPolicy {
        high_threshold: config.high_threshold,
        medium_threshold: config.medium_threshold,
        high_interval: config.high_interval,
        medium_interval: config.medium_interval,
        low_interval: config.low_interval,
    }
}

pub fn ttl_policy(config: &CacheConfig) -> TtlPolicy {
    TtlPolicy {
        kubernetes: config.kubernetes,
        network: config.network,
        vm: config.vm,
    }
}

/// Worker config for `kind`; configured regions replace the built-in table per provider
pub fn worker_config(sync: &SyncConfig, cache: &CacheConfig, kind: ResourceKind) -> SyncWorkerConfig {
    let mut worker = SyncWorkerConfig::new(kind);
    worker.interval = sync.interval;
    worker.batch_size = sync.batch_size;
    worker.max_concurrency = sync.concurrency;
    worker.fetch_timeout = sync.fetch_timeout;
    worker.ttl = ttl_policy(cache);
    for (provider, regions) in &sync.regions {
        worker
            .default_regions
            .insert(provider.clone(), regions.clone());
    }
    worker
}

pub fn directory(config: &SkyflowConfig) -> StaticDirectory {
    let mut directory = StaticDirectory::new();
    for ws in &config.workspaces {
        directory.add_workspace(ws.workspace.clone());
        for credential in &ws.credentials {
            directory.add_credential(credential.clone());
        }
    }
    directory
}

#[cfg(test)]
mod tests {
    use super::*;
    use skyflow_config::parse_config_str;
    use skyflow_sync::WorkspaceDirectory;
    use std::time::Duration;

    #[test]
    fn test_defaults_line_up() {
        let config = SkyflowConfig::default();

        assert_eq!(dial_settings(&config.connection), DialSettings::default());
        assert_eq!(health_settings(&config.health), HealthSettings::default());
        assert_eq!(
            monitor_settings(&config.monitor, &config.health),
            MonitorSettings::default()
        );
        assert_eq!(sync_policy(&config.sync.priority), SyncPolicy::default());
        assert_eq!(ttl_policy(&config.cache), TtlPolicy::default());
        assert_eq!(
            worker_config(&config.sync, &config.cache, ResourceKind::Vm),
            SyncWorkerConfig::new(ResourceKind::Vm)
        );
    }

    #[test]
    fn test_worker_config_overrides_regions() {
        let config = parse_config_str(
            r#"
sync concurrency=2 {
    regions "aws" "us-east-1"
    regions "oracle" "us-ashburn-1"
}
cache network="1m"
"#,
        )
        .unwrap();

        let worker = worker_config(&config.sync, &config.cache, ResourceKind::NetworkVpc);
        assert_eq!(worker.max_concurrency, 2);
        assert_eq!(worker.regions_for("aws"), ["us-east-1".to_string()]);
        assert!(worker.supports("oracle"));
        // 未指定のプロバイダは組み込みテーブルのまま
        assert!(!worker.regions_for("gcp").is_empty());
        assert_eq!(worker.ttl.ttl_for(ResourceKind::NetworkVpc), Duration::from_secs(60));
    }

    #[tokio::test]
    async fn test_directory_from_workspaces() {
        let config = parse_config_str(
            r#"
workspace "ws-1" {
    credential "cred-1" provider="aws"
}
workspace "ws-2" {
    credential "cred-2" provider="gcp"
    credential "cred-3" provider="gcp" active=#false
}
"#,
        )
        .unwrap();

        let directory = directory(&config);
        assert_eq!(directory.workspace_count(), 2);

        let credentials = directory.credentials_for("ws-2").await.unwrap();
        assert_eq!(credentials.len(), 2);
    }
}
