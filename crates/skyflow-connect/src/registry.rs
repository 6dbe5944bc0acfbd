//! Provider connection registry
//!
//! Holds provider configs and at most one live connection per provider name.
//! Dials for one provider are serialized; reconnects are single-flight.

use crate::connection::{ConnState, ProviderConnection};
use crate::dialer::{DialSettings, Dialer, dial_with_retry};
use crate::error::{ConnectError, Result};
use skyflow_cloud::ProviderConfig;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

/// Result of [`ConnectionRegistry::reconnect`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconnectOutcome {
    /// Disconnected and dialed a fresh connection
    Reconnected,
    /// Another reconnect for the same provider was already running
    AlreadyInProgress,
}

/// Owns provider configs and their live connections
pub struct ConnectionRegistry<D: Dialer> {
    dialer: D,
    configs: RwLock<HashMap<String, ProviderConfig>>,
    connections: RwLock<HashMap<String, Arc<D::Connection>>>,
    settings: RwLock<DialSettings>,
    dial_locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
    reconnecting: Mutex<HashSet<String>>,
}

impl<D: Dialer> ConnectionRegistry<D> {
    pub fn new(dialer: D) -> Self {
        Self::with_settings(dialer, DialSettings::default())
    }

    pub fn with_settings(dialer: D, settings: DialSettings) -> Self {
        Self {
            dialer,
            configs: RwLock::new(HashMap::new()),
            connections: RwLock::new(HashMap::new()),
            settings: RwLock::new(settings),
            dial_locks: Mutex::new(HashMap::new()),
            reconnecting: Mutex::new(HashSet::new()),
        }
    }

    pub fn dialer(&self) -> &D {
        &self.dialer
    }

    /// Register or replace a provider config
    pub async fn register_provider(&self, config: ProviderConfig) -> Result<()> {
        if config.name.is_empty() {
            return Err(ConnectError::EmptyName);
        }
        if config.address.is_empty() {
            return Err(ConnectError::EmptyAddress(config.name));
        }

        debug!(
            provider = %config.name,
            address = %config.address,
            enabled = config.enabled,
            "Registered provider"
        );
        self.configs.write().await.insert(config.name.clone(), config);
        Ok(())
    }

    /// Ensure a ready connection exists for `name`
    pub async fn connect(&self, name: &str) -> Result<()> {
        let config = self
            .provider_config(name)
            .await
            .ok_or_else(|| ConnectError::NotRegistered(name.to_string()))?;
        if !config.enabled {
            return Err(ConnectError::Disabled(name.to_string()));
        }

        let dial_lock = self.dial_lock(name);
        let _guard = dial_lock.lock().await;

        // 既に接続済みなら何もしない
        let stale = {
            let mut connections = self.connections.write().await;
            match connections.get(name).map(|c| c.state()) {
                Some(ConnState::Ready) => {
                    debug!(provider = %name, "Connection already ready");
                    return Ok(());
                }
                Some(_) => connections.remove(name),
                None => None,
            }
        };
        if let Some(stale) = stale {
            debug!(provider = %name, state = %stale.state(), "Closing stale connection");
            if let Err(e) = stale.close().await {
                warn!(provider = %name, error = %e, "Failed to close stale connection");
            }
        }

        let settings = self.settings.read().await.clone();
        let connection = dial_with_retry(&self.dialer, &config, &settings).await?;

        let previous = self
            .connections
            .write()
            .await
            .insert(name.to_string(), Arc::new(connection));
        if let Some(previous) = previous
            && let Err(e) = previous.close().await
        {
            warn!(provider = %name, error = %e, "Failed to close replaced connection");
        }

        info!(provider = %name, address = %config.address, "Connected to provider");
        Ok(())
    }

    /// Usable connection for `name`
    ///
    /// Fails when there is no connection or its state is neither ready nor idle.
    pub async fn get_connection(&self, name: &str) -> Result<Arc<D::Connection>> {
        let connection = self
            .connections
            .read()
            .await
            .get(name)
            .cloned()
            .ok_or_else(|| ConnectError::NotConnected(name.to_string()))?;

        let state = connection.state();
        if !state.is_usable() {
            return Err(ConnectError::NotReady {
                provider: name.to_string(),
                state,
            });
        }
        Ok(connection)
    }

    /// Close and forget the connection for `name`; absent is fine
    pub async fn disconnect(&self, name: &str) -> Result<()> {
        let Some(connection) = self.connections.write().await.remove(name) else {
            return Ok(());
        };

        connection.close().await.map_err(|e| ConnectError::Close {
            provider: name.to_string(),
            reason: e.to_string(),
        })?;
        info!(provider = %name, "Disconnected from provider");
        Ok(())
    }

    /// Close every connection, reporting all close failures together
    pub async fn disconnect_all(&self) -> Result<()> {
        let drained: Vec<(String, Arc<D::Connection>)> =
            self.connections.write().await.drain().collect();

        let mut errors = Vec::new();
        for (name, connection) in drained {
            if let Err(e) = connection.close().await {
                warn!(provider = %name, error = %e, "Failed to close connection");
                errors.push(format!("{name}: {e}"));
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            errors.sort();
            Err(ConnectError::CloseAll(errors))
        }
    }

    pub async fn is_connected(&self, name: &str) -> bool {
        self.connections.read().await.contains_key(name)
    }

    /// Registered provider names, sorted
    pub async fn list_providers(&self) -> Vec<String> {
        let mut names: Vec<String> = self.configs.read().await.keys().cloned().collect();
        names.sort();
        names
    }

    pub async fn list_enabled_providers(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .configs
            .read()
            .await
            .values()
            .filter(|c| c.enabled)
            .map(|c| c.name.clone())
            .collect();
        names.sort();
        names
    }

    pub async fn list_connected_providers(&self) -> Vec<String> {
        let mut names: Vec<String> = self.connections.read().await.keys().cloned().collect();
        names.sort();
        names
    }

    pub async fn provider_config(&self, name: &str) -> Option<ProviderConfig> {
        self.configs.read().await.get(name).cloned()
    }

    /// Whether each connection is currently usable (ready or idle)
    pub async fn health_check(&self) -> HashMap<String, bool> {
        self.connections
            .read()
            .await
            .iter()
            .map(|(name, conn)| (name.clone(), conn.state().is_usable()))
            .collect()
    }

    pub async fn connection_states(&self) -> HashMap<String, ConnState> {
        self.connections
            .read()
            .await
            .iter()
            .map(|(name, conn)| (name.clone(), conn.state()))
            .collect()
    }

    /// Disconnect, wait `delay`, connect; at most one in flight per provider
    pub async fn reconnect(&self, name: &str, delay: Duration) -> Result<ReconnectOutcome> {
        let Some(_flight) = ReconnectFlight::acquire(&self.reconnecting, name) else {
            debug!(provider = %name, "Reconnect already in progress");
            return Ok(ReconnectOutcome::AlreadyInProgress);
        };

        info!(provider = %name, "Reconnecting to provider");
        if let Err(e) = self.disconnect(name).await {
            warn!(provider = %name, error = %e, "Error while disconnecting before reconnect");
        }

        tokio::time::sleep(delay).await;

        self.connect(name).await?;
        info!(provider = %name, "Reconnected to provider");
        Ok(ReconnectOutcome::Reconnected)
    }

    pub async fn dial_settings(&self) -> DialSettings {
        self.settings.read().await.clone()
    }

    pub async fn set_dial_timeout(&self, timeout: Duration) {
        self.settings.write().await.dial_timeout = timeout;
    }

    pub async fn set_max_retries(&self, retries: u32) {
        self.settings.write().await.max_retries = retries;
    }

    pub async fn set_retry_interval(&self, interval: Duration) {
        self.settings.write().await.retry_interval = interval;
    }

    fn dial_lock(&self, name: &str) -> Arc<tokio::sync::Mutex<()>> {
        lock(&self.dial_locks)
            .entry(name.to_string())
            .or_default()
            .clone()
    }
}

/// Claim on a provider's "reconnecting" flag, released on drop
struct ReconnectFlight<'a> {
    flags: &'a Mutex<HashSet<String>>,
    name: String,
}

impl<'a> ReconnectFlight<'a> {
    fn acquire(flags: &'a Mutex<HashSet<String>>, name: &str) -> Option<Self> {
        lock(flags).insert(name.to_string()).then(|| Self {
            flags,
            name: name.to_string(),
        })
    }
}

impl Drop for ReconnectFlight<'_> {
    fn drop(&mut self) {
        lock(self.flags).remove(&self.name);
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::StubDialer;

    async fn registry() -> ConnectionRegistry<StubDialer> {
        let registry = ConnectionRegistry::new(StubDialer::new());
        registry
            .register_provider(ProviderConfig::new("aws", "a:1"))
            .await
            .unwrap();
        registry
    }

    #[tokio::test]
    async fn test_register_rejects_empty_fields() {
        let registry = ConnectionRegistry::new(StubDialer::new());

        let err = registry
            .register_provider(ProviderConfig::new("", "a:1"))
            .await
            .unwrap_err();
        assert!(matches!(err, ConnectError::EmptyName));

        let err = registry
            .register_provider(ProviderConfig::new("aws", ""))
            .await
            .unwrap_err();
        assert!(matches!(err, ConnectError::EmptyAddress(name) if name == "aws"));
        assert!(registry.list_providers().await.is_empty());
    }

    #[tokio::test]
    async fn test_reregister_overwrites() {
        let registry = registry().await;
        registry
            .register_provider(ProviderConfig::new("aws", "b:2"))
            .await
            .unwrap();
        assert_eq!(registry.provider_config("aws").await.unwrap().address, "b:2");
        assert_eq!(registry.list_providers().await, vec!["aws"]);
    }

    #[tokio::test]
    async fn test_connect_ready_is_noop() {
        let registry = registry().await;
        registry.connect("aws").await.unwrap();
        registry.connect("aws").await.unwrap();
        assert_eq!(registry.dialer().dial_count("aws"), 1);
    }

    #[tokio::test]
    async fn test_connect_replaces_stale_connection() {
        let registry = registry().await;
        registry.connect("aws").await.unwrap();
        let first = registry.dialer().latest("aws").unwrap();
        first.set_state(ConnState::TransientFailure);

        registry.connect("aws").await.unwrap();
        assert!(first.is_closed());
        assert_eq!(registry.dialer().dial_count("aws"), 2);
        assert_eq!(registry.dialer().open_connections("aws"), 1);
    }

    #[tokio::test]
    async fn test_disconnect_is_idempotent() {
        let registry = registry().await;
        registry.disconnect("aws").await.unwrap();
        registry.connect("aws").await.unwrap();
        registry.disconnect("aws").await.unwrap();
        registry.disconnect("aws").await.unwrap();
        assert!(!registry.is_connected("aws").await);
    }

    #[tokio::test]
    async fn test_runtime_settings() {
        let registry = registry().await;
        registry.set_dial_timeout(Duration::from_secs(1)).await;
        registry.set_max_retries(5).await;
        registry.set_retry_interval(Duration::from_millis(100)).await;

        let settings = registry.dial_settings().await;
        assert_eq!(settings.dial_timeout, Duration::from_secs(1));
        assert_eq!(settings.max_retries, 5);
        assert_eq!(settings.retry_interval, Duration::from_millis(100));
    }
}
