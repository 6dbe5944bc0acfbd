//! Connection manager error types

use crate::connection::ConnState;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConnectError {
    #[error("Provider name cannot be empty")]
    EmptyName,

    #[error("Provider {0}: address cannot be empty")]
    EmptyAddress(String),

    #[error("Provider {0} not registered")]
    NotRegistered(String),

    #[error("Provider {0} is disabled")]
    Disabled(String),

    #[error("Invalid address '{address}': {reason}")]
    InvalidAddress { address: String, reason: String },

    #[error("Failed to connect to provider {provider} after {attempts} attempts: {reason}")]
    DialFailed {
        provider: String,
        attempts: u32,
        reason: String,
    },

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Provider {0} not connected")]
    NotConnected(String),

    #[error("Provider {provider} connection not ready (state: {state})")]
    NotReady { provider: String, state: ConnState },

    #[error("{0} interval must be greater than zero")]
    ZeroInterval(&'static str),

    #[error("Health probe failed: {0}")]
    Probe(String),

    #[error("Health probe timed out after {0:?}")]
    ProbeTimeout(Duration),

    #[error("Failed to close {provider}: {reason}")]
    Close { provider: String, reason: String },

    #[error("Errors closing connections: {}", .0.join("; "))]
    CloseAll(Vec<String>),
}

impl ConnectError {
    /// Configuration errors are returned synchronously and never retried
    pub fn is_config_error(&self) -> bool {
        matches!(
            self,
            ConnectError::EmptyName
                | ConnectError::EmptyAddress(_)
                | ConnectError::NotRegistered(_)
                | ConnectError::Disabled(_)
                | ConnectError::InvalidAddress { .. }
                | ConnectError::ZeroInterval(_)
        )
    }

    /// "Provider temporarily unusable": callers should retry later
    pub fn is_unavailable(&self) -> bool {
        matches!(
            self,
            ConnectError::NotConnected(_)
                | ConnectError::NotReady { .. }
                | ConnectError::DialFailed { .. }
                | ConnectError::Transport(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, ConnectError>;
