//! skyflow adaptive resource synchronizer
//!
//! Polls provider state on a schedule driven by live subscriber demand, diffs
//! it against the cached snapshot and publishes change events.
//!
//! Collaborators are traits so deployments and tests choose the backends:
//!
//! | Concern            | Trait                   | Implementations                                   |
//! |--------------------|-------------------------|---------------------------------------------------|
//! | workspace lookup   | [`WorkspaceDirectory`]  | [`StaticDirectory`]                               |
//! | snapshot cache     | [`SnapshotCache`]       | [`MemoryCache`], [`RedisCache`]                   |
//! | subscriber demand  | [`SubscriptionRegistry`]| [`MemorySubscriptionRegistry`], [`RedisSubscriptionRegistry`] |
//! | event delivery     | [`EventBus`]            | [`BroadcastBus`]                                  |

pub mod cache;
pub mod directory;
pub mod error;
pub mod publisher;
pub mod subscription;
pub mod worker;

pub use cache::{MemoryCache, RedisCache, SnapshotCache, TtlPolicy, snapshot_key};
pub use directory::{StaticDirectory, WorkspaceDirectory};
pub use error::{Result, SyncError};
pub use publisher::{BroadcastBus, ChangeEvent, EventBus, EventEnvelope, EventPublisher, EventScope};
pub use subscription::{
    ActiveSubscriptions, MemorySubscriptionRegistry, RedisSubscriptionRegistry, SubscriptionInfo,
    SubscriptionRegistry, SubscriptionTracker, SyncPolicy, SyncPriority, interval_for,
    priority_for, subscription_key,
};
pub use worker::{CycleReport, SyncWorker, SyncWorkerConfig, default_regions};
