//! Connection handle abstraction

use crate::error::Result;
use async_trait::async_trait;
use std::str::FromStr;
use std::time::Duration;

/// Transport state of a provider channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ConnState {
    Idle = 0,
    Connecting = 1,
    Ready = 2,
    TransientFailure = 3,
    Shutdown = 4,
}

impl ConnState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnState::Idle => "idle",
            ConnState::Connecting => "connecting",
            ConnState::Ready => "ready",
            ConnState::TransientFailure => "transient-failure",
            ConnState::Shutdown => "shutdown",
        }
    }

    /// Whether callers may issue RPCs on a channel in this state
    pub fn is_usable(&self) -> bool {
        matches!(self, ConnState::Ready | ConnState::Idle)
    }

    /// Hard failure states that warrant an immediate reconnect
    pub fn needs_reconnect(&self) -> bool {
        matches!(self, ConnState::TransientFailure | ConnState::Shutdown)
    }

    pub(crate) fn from_u8(value: u8) -> Self {
        match value {
            0 => ConnState::Idle,
            1 => ConnState::Connecting,
            2 => ConnState::Ready,
            3 => ConnState::TransientFailure,
            _ => ConnState::Shutdown,
        }
    }
}

impl std::fmt::Display for ConnState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ConnState {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "idle" => Ok(ConnState::Idle),
            "connecting" => Ok(ConnState::Connecting),
            "ready" => Ok(ConnState::Ready),
            "transient-failure" => Ok(ConnState::TransientFailure),
            "shutdown" => Ok(ConnState::Shutdown),
            other => Err(format!("unknown connection state: {other}")),
        }
    }
}

/// Result of a health probe
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServingStatus {
    Unknown,
    Serving,
    NotServing,
    ServiceUnknown,
}

impl ServingStatus {
    pub fn is_serving(&self) -> bool {
        *self == ServingStatus::Serving
    }
}

impl std::fmt::Display for ServingStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ServingStatus::Unknown => write!(f, "UNKNOWN"),
            ServingStatus::Serving => write!(f, "SERVING"),
            ServingStatus::NotServing => write!(f, "NOT_SERVING"),
            ServingStatus::ServiceUnknown => write!(f, "SERVICE_UNKNOWN"),
        }
    }
}

/// A live channel to one provider plugin
///
/// Owned by the registry; everyone else borrows it through an `Arc`.
#[async_trait]
pub trait ProviderConnection: Send + Sync + 'static {
    /// Current transport state, without any RPC
    fn state(&self) -> ConnState;

    /// Run the standard health check RPC, bounded by `timeout`
    async fn probe(&self, timeout: Duration) -> Result<ServingStatus>;

    /// Release the channel; later calls are no-ops
    async fn close(&self) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_usable_states() {
        assert!(ConnState::Ready.is_usable());
        assert!(ConnState::Idle.is_usable());
        assert!(!ConnState::Connecting.is_usable());
        assert!(!ConnState::TransientFailure.is_usable());
        assert!(!ConnState::Shutdown.is_usable());
    }

    #[test]
    fn test_state_names_round_trip() {
        for state in [
            ConnState::Idle,
            ConnState::Connecting,
            ConnState::Ready,
            ConnState::TransientFailure,
            ConnState::Shutdown,
        ] {
            assert_eq!(state.as_str().parse::<ConnState>().unwrap(), state);
            assert_eq!(ConnState::from_u8(state as u8), state);
        }
    }
}
