//! Periodic health probing with reconnect escalation
//!
//! Every tick probes each enabled provider over `grpc.health.v1.Health`.
//! A provider is reconnected once `failure_threshold` probes in a row have
//! failed; any successful probe resets that streak.

use crate::background::BackgroundLoop;
use crate::connection::{ConnState, ProviderConnection};
use crate::dialer::Dialer;
use crate::error::{ConnectError, Result};
use crate::registry::{ConnectionRegistry, ReconnectOutcome};
use chrono::{DateTime, Utc};
use skyflow_cloud::LifecycleState;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::{Instant, MissedTickBehavior, interval_at};
use tracing::{debug, error, info, warn};

/// Health checker tuning
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HealthSettings {
    /// Time between checks
    pub interval: Duration,
    /// Bound on a single health probe
    pub timeout: Duration,
    /// Consecutive failures that trigger a reconnect
    pub failure_threshold: u32,
    /// Pause between disconnect and connect
    pub reconnect_delay: Duration,
    /// Bound on a whole reconnect attempt
    pub reconnect_timeout: Duration,
}

impl Default for HealthSettings {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(30),
            timeout: Duration::from_secs(5),
            failure_threshold: 3,
            reconnect_delay: Duration::from_secs(2),
            reconnect_timeout: Duration::from_secs(30),
        }
    }
}

/// Health of one provider as last observed
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HealthStatus {
    pub healthy: bool,
    pub last_check: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    /// Transport state at the last check; `None` when no connection existed
    pub conn_state: Option<ConnState>,
    pub check_count: u64,
    pub failure_count: u64,
    pub consecutive_fails: u32,
}

/// What a single provider check did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProbeOutcome {
    pub healthy: bool,
    pub reconnect_scheduled: bool,
}

pub struct HealthChecker<D: Dialer> {
    registry: Arc<ConnectionRegistry<D>>,
    settings: HealthSettings,
    statuses: Arc<RwLock<HashMap<String, HealthStatus>>>,
    reconnect_mode: AtomicBool,
    background: BackgroundLoop,
}

impl<D: Dialer> HealthChecker<D> {
    pub fn new(registry: Arc<ConnectionRegistry<D>>, settings: HealthSettings) -> Self {
        Self {
            registry,
            settings,
            statuses: Arc::new(RwLock::new(HashMap::new())),
            reconnect_mode: AtomicBool::new(true),
            background: BackgroundLoop::default(),
        }
    }

    pub fn settings(&self) -> &HealthSettings {
        &self.settings
    }

    pub fn state(&self) -> LifecycleState {
        self.background.state()
    }

    /// Spawn the check loop; a second call while running does nothing
    ///
    /// The first check runs one interval after start. Call [`stop`](Self::stop)
    /// to end the loop. A zero interval is refused and nothing is spawned.
    pub fn start(self: &Arc<Self>) -> Result<()> {
        if self.settings.interval.is_zero() {
            return Err(ConnectError::ZeroInterval("health check"));
        }

        let this = Arc::clone(self);
        let started = self.background.start(move |mut stop| async move {
            let period = this.settings.interval;
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        this.check_all().await;
                    }
                    _ = stop.changed() => break,
                }
            }
            debug!("Health check loop exited");
        });

        if started {
            info!(interval = ?self.settings.interval, "Health checker started");
        } else {
            debug!("Health checker already running");
        }
        Ok(())
    }

    /// Stop the loop and wait for it; idempotent
    pub async fn stop(&self) {
        if self.background.stop().await {
            info!("Health checker stopped");
        }
    }

    /// Check every enabled provider once
    pub async fn check_all(&self) -> HashMap<String, ProbeOutcome> {
        let mut outcomes = HashMap::new();
        for name in self.registry.list_enabled_providers().await {
            let outcome = self.check_provider(&name).await;
            outcomes.insert(name, outcome);
        }
        outcomes
    }

    /// Probe one provider and update its status
    pub async fn check_provider(&self, name: &str) -> ProbeOutcome {
        let (healthy, conn_state, last_error) = match self.registry.get_connection(name).await {
            Err(e) => (false, None, Some(e.to_string())),
            Ok(connection) => {
                let state = connection.state();
                match connection.probe(self.settings.timeout).await {
                    Ok(status) if status.is_serving() => (true, Some(state), None),
                    Ok(status) => (false, Some(state), Some(format!("health status {status}"))),
                    Err(e) => (false, Some(state), Some(e.to_string())),
                }
            }
        };

        let consecutive_fails = {
            let mut statuses = self.statuses.write().await;
            let status = statuses.entry(name.to_string()).or_default();
            status.check_count += 1;
            status.last_check = Some(Utc::now());
            status.conn_state = conn_state;
            status.healthy = healthy;
            if healthy {
                status.consecutive_fails = 0;
                status.last_error = None;
            } else {
                status.failure_count += 1;
                status.consecutive_fails += 1;
                status.last_error = last_error.clone();
            }
            status.consecutive_fails
        };

        if healthy {
            debug!(provider = %name, "Provider healthy");
            return ProbeOutcome {
                healthy,
                reconnect_scheduled: false,
            };
        }

        warn!(
            provider = %name,
            consecutive_fails,
            error = last_error.as_deref().unwrap_or_default(),
            "Provider health check failed"
        );

        let reconnect_scheduled = consecutive_fails >= self.settings.failure_threshold
            && self.reconnect_mode.load(Ordering::Acquire);
        if reconnect_scheduled {
            self.schedule_reconnect(name);
        }

        ProbeOutcome {
            healthy,
            reconnect_scheduled,
        }
    }

    fn schedule_reconnect(&self, name: &str) {
        let registry = Arc::clone(&self.registry);
        let statuses = Arc::clone(&self.statuses);
        let name = name.to_string();
        let delay = self.settings.reconnect_delay;
        let bound = self.settings.reconnect_timeout;

        info!(provider = %name, "Scheduling reconnect after repeated health failures");
        tokio::spawn(async move {
            match tokio::time::timeout(bound, registry.reconnect(&name, delay)).await {
                Ok(Ok(ReconnectOutcome::Reconnected)) => {
                    if let Some(status) = statuses.write().await.get_mut(&name) {
                        status.consecutive_fails = 0;
                    }
                }
                Ok(Ok(ReconnectOutcome::AlreadyInProgress)) => {}
                Ok(Err(e)) => {
                    error!(provider = %name, error = %e, "Reconnect failed");
                }
                Err(_) => {
                    error!(provider = %name, timeout = ?bound, "Reconnect timed out");
                }
            }
        });
    }

    pub async fn status(&self, name: &str) -> Option<HealthStatus> {
        self.statuses.read().await.get(name).cloned()
    }

    pub async fn all_statuses(&self) -> HashMap<String, HealthStatus> {
        self.statuses.read().await.clone()
    }

    /// False for providers that were never checked
    pub async fn is_healthy(&self, name: &str) -> bool {
        self.statuses
            .read()
            .await
            .get(name)
            .is_some_and(|s| s.healthy)
    }

    /// Enable or disable automatic reconnects
    pub fn set_reconnect_mode(&self, enabled: bool) {
        self.reconnect_mode.store(enabled, Ordering::Release);
    }
}
