//! Cloud provider error types

use thiserror::Error;

/// Cloud provider errors
#[derive(Error, Debug)]
pub enum CloudError {
    #[error("Provider not found: {0}")]
    ProviderNotFound(String),

    #[error("Provider unavailable: {provider}: {reason}")]
    ProviderUnavailable { provider: String, reason: String },

    #[error("Unsupported resource kind '{kind}' for provider {provider}")]
    UnsupportedKind { provider: String, kind: String },

    #[error("Unknown resource kind: {0}")]
    UnknownKind(String),

    #[error("API error: {0}")]
    ApiError(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl CloudError {
    /// Whether the failure is expected to clear up on a later attempt
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            CloudError::ProviderUnavailable { .. } | CloudError::Timeout(_) | CloudError::ApiError(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, CloudError>;
