//! Dialing provider plugins
//!
//! [`Dialer::dial`] makes a single attempt; [`dial_with_retry`] wraps it with
//! the bounded, fixed-interval retry policy used by the registry.

use crate::connection::{ConnState, ProviderConnection, ServingStatus};
use crate::error::{ConnectError, Result};
use async_trait::async_trait;
use skyflow_cloud::ProviderConfig;
use std::sync::atomic::{AtomicU8, Ordering};
use std::time::Duration;
use tokio::time::sleep;
use tonic::Code;
use tonic::transport::{Channel, Endpoint};
use tonic_health::pb::health_check_response::ServingStatus as PbServingStatus;
use tonic_health::pb::health_client::HealthClient;
use tonic_health::pb::HealthCheckRequest;
use tracing::{debug, warn};

/// HTTP/2 keep-alive parameters
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeepAlive {
    /// Ping interval
    pub interval: Duration,
    /// How long to wait for a ping ack before the transport is considered dead
    pub timeout: Duration,
    /// Send pings even when no RPC is in flight
    pub permit_without_stream: bool,
}

impl Default for KeepAlive {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(10),
            timeout: Duration::from_secs(3),
            permit_without_stream: true,
        }
    }
}

/// Dial policy
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DialSettings {
    /// Timeout of a single connection attempt
    pub dial_timeout: Duration,
    /// Maximum number of attempts
    pub max_retries: u32,
    /// Fixed pause between attempts
    pub retry_interval: Duration,
    pub keep_alive: KeepAlive,
}

impl Default for DialSettings {
    fn default() -> Self {
        Self {
            dial_timeout: Duration::from_secs(10),
            max_retries: 3,
            retry_interval: Duration::from_secs(2),
            keep_alive: KeepAlive::default(),
        }
    }
}

/// Opens channels to provider plugins
#[async_trait]
pub trait Dialer: Send + Sync + 'static {
    type Connection: ProviderConnection;

    /// One connection attempt
    async fn dial(
        &self,
        config: &ProviderConfig,
        settings: &DialSettings,
    ) -> Result<Self::Connection>;
}

/// Dial with up to `max_retries` attempts and `retry_interval` between them
pub async fn dial_with_retry<D: Dialer>(
    dialer: &D,
    config: &ProviderConfig,
    settings: &DialSettings,
) -> Result<D::Connection> {
    let attempts = settings.max_retries.max(1);
    let mut last_error = None;

    for attempt in 0..attempts {
        match dialer.dial(config, settings).await {
            Ok(connection) => {
                debug!(provider = %config.name, attempt = attempt + 1, "Dialed provider");
                return Ok(connection);
            }
            Err(e) if e.is_config_error() => return Err(e),
            Err(e) => {
                debug!(
                    provider = %config.name,
                    attempt = attempt + 1,
                    error = %e,
                    "Dial attempt failed"
                );
                last_error = Some(e);
            }
        }

        // 最後の試行でなければ待機
        if attempt + 1 < attempts {
            sleep(settings.retry_interval).await;
        }
    }

    Err(ConnectError::DialFailed {
        provider: config.name.clone(),
        attempts,
        reason: last_error.map(|e| e.to_string()).unwrap_or_default(),
    })
}

/// Dialer for tonic gRPC channels
#[derive(Debug, Clone, Default)]
pub struct GrpcDialer;

impl GrpcDialer {
    pub fn new() -> Self {
        Self
    }

    fn endpoint(config: &ProviderConfig, settings: &DialSettings) -> Result<Endpoint> {
        let uri = if config.address.contains("://") {
            config.address.clone()
        } else {
            format!("http://{}", config.address)
        };

        let endpoint = Endpoint::from_shared(uri).map_err(|e| ConnectError::InvalidAddress {
            address: config.address.clone(),
            reason: e.to_string(),
        })?;

        Ok(endpoint
            .connect_timeout(settings.dial_timeout)
            .http2_keep_alive_interval(settings.keep_alive.interval)
            .keep_alive_timeout(settings.keep_alive.timeout)
            .keep_alive_while_idle(settings.keep_alive.permit_without_stream))
    }
}

#[async_trait]
impl Dialer for GrpcDialer {
    type Connection = GrpcConnection;

    async fn dial(&self, config: &ProviderConfig, settings: &DialSettings) -> Result<GrpcConnection> {
        let endpoint = Self::endpoint(config, settings)?;
        let channel = endpoint
            .connect()
            .await
            .map_err(|e| ConnectError::Transport(e.to_string()))?;

        Ok(GrpcConnection::new(&config.name, channel))
    }
}

/// A tonic channel plus the transport state observed on it
///
/// tonic does not expose connectivity state, so it is derived from dial and
/// RPC outcomes: ready after a successful dial or RPC, transient-failure after
/// a transport-level RPC error, shutdown once closed.
#[derive(Debug)]
pub struct GrpcConnection {
    provider: String,
    channel: Channel,
    state: AtomicU8,
}

impl GrpcConnection {
    pub fn new(provider: &str, channel: Channel) -> Self {
        Self {
            provider: provider.to_string(),
            channel,
            state: AtomicU8::new(ConnState::Ready as u8),
        }
    }

    /// Channel for provider-specific RPCs
    pub fn channel(&self) -> Result<Channel> {
        match self.state() {
            ConnState::Shutdown => Err(ConnectError::NotConnected(self.provider.clone())),
            _ => Ok(self.channel.clone()),
        }
    }

    /// Update the tracked state from an RPC result
    pub fn observe<T>(&self, result: &std::result::Result<T, tonic::Status>) {
        match result {
            Ok(_) => self.set_state(ConnState::Ready),
            Err(status) if is_transport_failure(status) => {
                self.set_state(ConnState::TransientFailure)
            }
            // The server answered, so the transport itself is fine
            Err(_) => self.set_state(ConnState::Ready),
        }
    }

    fn set_state(&self, next: ConnState) {
        // shutdown is terminal
        let _ = self
            .state
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                (current != ConnState::Shutdown as u8).then_some(next as u8)
            });
    }
}

/// Only failures of the channel itself; application errors (a plugin's
/// `Unknown`, a slow region's `DeadlineExceeded`) say nothing about it
fn is_transport_failure(status: &tonic::Status) -> bool {
    status.code() == Code::Unavailable
        || std::error::Error::source(status)
            .is_some_and(|source| source.is::<tonic::transport::Error>())
}

#[async_trait]
impl ProviderConnection for GrpcConnection {
    fn state(&self) -> ConnState {
        ConnState::from_u8(self.state.load(Ordering::Acquire))
    }

    async fn probe(&self, timeout: Duration) -> Result<ServingStatus> {
        let mut client = HealthClient::new(self.channel()?);
        let request = HealthCheckRequest {
            service: String::new(),
        };

        let response = match tokio::time::timeout(timeout, client.check(request)).await {
            Ok(result) => result,
            Err(_) => {
                self.set_state(ConnState::TransientFailure);
                return Err(ConnectError::ProbeTimeout(timeout));
            }
        };

        self.observe(&response);
        let response = response.map_err(|status| ConnectError::Probe(status.to_string()))?;

        Ok(match response.into_inner().status() {
            PbServingStatus::Serving => ServingStatus::Serving,
            PbServingStatus::NotServing => ServingStatus::NotServing,
            PbServingStatus::ServiceUnknown => ServingStatus::ServiceUnknown,
            PbServingStatus::Unknown => ServingStatus::Unknown,
        })
    }

    async fn close(&self) -> Result<()> {
        let previous = self.state.swap(ConnState::Shutdown as u8, Ordering::AcqRel);
        if previous != ConnState::Shutdown as u8 {
            debug!(provider = %self.provider, "Closed gRPC channel");
        } else {
            warn!(provider = %self.provider, "gRPC channel already closed");
        }
        Ok(())
    }
}
