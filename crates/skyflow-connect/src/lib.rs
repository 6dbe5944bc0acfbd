//! skyflow provider connection manager
//!
//! Keeps one gRPC channel per provider plugin usable:
//!
//! - [`ConnectionRegistry`] owns provider configs and live connections
//! - [`Dialer`] opens a channel (bounded retries, keep-alive)
//! - [`HealthChecker`] probes `grpc.health.v1.Health` and reconnects after
//!   consecutive failures
//! - [`ConnectionStateMonitor`] reacts to transport-level failures without
//!   waiting for the next health probe
//!
//! [`GrpcProviderClient`] implements [`skyflow_cloud::ProviderClient`] on top of
//! the registry so the sync engine can fetch resources through it.

mod background;
pub mod client;
pub mod connection;
pub mod dialer;
pub mod error;
pub mod health;
pub mod monitor;
pub mod registry;

#[cfg(any(test, feature = "test-utils"))]
pub mod testing;

/// Generated plugin protocol (`skyflow.plugin.v1`)
pub mod proto {
    tonic::include_proto!("skyflow.plugin.v1");
}

pub use client::GrpcProviderClient;
pub use connection::{ConnState, ProviderConnection, ServingStatus};
pub use dialer::{DialSettings, Dialer, GrpcConnection, GrpcDialer, KeepAlive, dial_with_retry};
pub use error::{ConnectError, Result};
pub use health::{HealthChecker, HealthSettings, HealthStatus, ProbeOutcome};
pub use monitor::{ConnectionStateMonitor, MonitorSettings};
pub use registry::{ConnectionRegistry, ReconnectOutcome};
