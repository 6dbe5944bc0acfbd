//! Sync engine error types

use skyflow_cloud::{CloudError, ResourceKind};
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SyncError {
    #[error("Sync worker for {0} is already running")]
    AlreadyRunning(ResourceKind),

    #[error("Sync worker for {kind}: {ticker} interval must be greater than zero")]
    ZeroInterval {
        kind: ResourceKind,
        ticker: &'static str,
    },

    #[error("Cache error: {0}")]
    Cache(String),

    #[error("Event bus error: {0}")]
    Bus(String),

    #[error("Subscription registry error: {0}")]
    Subscription(String),

    #[error("Workspace directory error: {0}")]
    Directory(String),

    #[error("Fetch of {kind} in {region} timed out after {timeout:?}")]
    FetchTimeout {
        kind: ResourceKind,
        region: String,
        timeout: Duration,
    },

    #[error(transparent)]
    Provider(#[from] CloudError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),
}

pub type Result<T> = std::result::Result<T, SyncError>;
