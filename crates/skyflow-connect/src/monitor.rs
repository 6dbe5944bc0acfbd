//! Transport-state watcher
//!
//! Polls connection states without any RPC and reconnects providers whose
//! channel has shut down or hit a transient failure, ahead of the next health
//! probe.

use crate::background::BackgroundLoop;
use crate::dialer::Dialer;
use crate::error::{ConnectError, Result};
use crate::registry::{ConnectionRegistry, ReconnectOutcome};
use skyflow_cloud::LifecycleState;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{Instant, MissedTickBehavior, interval_at};
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MonitorSettings {
    pub interval: Duration,
    pub reconnect_delay: Duration,
    pub reconnect_timeout: Duration,
}

impl Default for MonitorSettings {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(5),
            reconnect_delay: Duration::from_secs(2),
            reconnect_timeout: Duration::from_secs(30),
        }
    }
}

pub struct ConnectionStateMonitor<D: Dialer> {
    registry: Arc<ConnectionRegistry<D>>,
    settings: MonitorSettings,
    background: BackgroundLoop,
}

impl<D: Dialer> ConnectionStateMonitor<D> {
    pub fn new(registry: Arc<ConnectionRegistry<D>>, settings: MonitorSettings) -> Self {
        Self {
            registry,
            settings,
            background: BackgroundLoop::default(),
        }
    }

    pub fn state(&self) -> LifecycleState {
        self.background.state()
    }

    /// Spawn the watch loop; a zero interval is refused
    pub fn start(self: &Arc<Self>) -> Result<()> {
        if self.settings.interval.is_zero() {
            return Err(ConnectError::ZeroInterval("connection monitor"));
        }

        let this = Arc::clone(self);
        let started = self.background.start(move |mut stop| async move {
            let period = this.settings.interval;
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        this.inspect().await;
                    }
                    _ = stop.changed() => break,
                }
            }
            debug!("Connection state monitor exited");
        });

        if started {
            info!(interval = ?self.settings.interval, "Connection state monitor started");
        }
        Ok(())
    }

    pub async fn stop(&self) {
        if self.background.stop().await {
            info!("Connection state monitor stopped");
        }
    }

    /// Look at every connection once; returns the providers sent to reconnect
    pub async fn inspect(&self) -> Vec<String> {
        let mut failing: Vec<String> = self
            .registry
            .connection_states()
            .await
            .into_iter()
            .filter(|(_, state)| state.needs_reconnect())
            .map(|(name, state)| {
                warn!(provider = %name, state = %state, "Connection in failure state");
                name
            })
            .collect();
        failing.sort();

        for name in &failing {
            self.spawn_reconnect(name.clone());
        }
        failing
    }

    fn spawn_reconnect(&self, name: String) {
        let registry = Arc::clone(&self.registry);
        let delay = self.settings.reconnect_delay;
        let bound = self.settings.reconnect_timeout;

        tokio::spawn(async move {
            match tokio::time::timeout(bound, registry.reconnect(&name, delay)).await {
                Ok(Ok(ReconnectOutcome::Reconnected)) => {
                    info!(provider = %name, "Connection restored");
                }
                Ok(Ok(ReconnectOutcome::AlreadyInProgress)) => {}
                Ok(Err(e)) => error!(provider = %name, error = %e, "Reconnect failed"),
                Err(_) => error!(provider = %name, timeout = ?bound, "Reconnect timed out"),
            }
        });
    }
}
