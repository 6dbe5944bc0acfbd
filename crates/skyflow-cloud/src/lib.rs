//! skyflow cloud domain
//!
//! This crate holds the provider-independent half of skyflow: the data model for
//! provider plugins and their resources, the [`ProviderClient`] abstraction the sync
//! engine fetches through, and the pure change detector that turns two snapshots
//! into created/updated/deleted changes.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────┐
//! │                    skyflowd                      │
//! └───────┬─────────────────────────┬───────────────┘
//!         │                         │
//! ┌───────▼─────────┐      ┌────────▼────────┐
//! │ skyflow-connect │      │  skyflow-sync   │
//! │  registry       │      │  tracker        │
//! │  health/monitor │      │  worker         │
//! └───────┬─────────┘      └────────┬────────┘
//!         │                         │
//! ┌───────▼─────────────────────────▼───────────────┐
//! │                 skyflow-cloud                    │
//! │  ProviderConfig / Credential / Resource          │
//! │  trait ProviderClient { fetch(..) }              │
//! │  detect_changes(cached, current)                 │
//! └─────────────────────────────────────────────────┘
//! ```

pub mod change;
pub mod error;
pub mod lifecycle;
pub mod provider;
pub mod state;

// Re-exports
pub use change::{Change, ChangeSet, ChangeSummary, ChangeType, detect_changes};
pub use error::{CloudError, Result};
pub use lifecycle::{Lifecycle, LifecycleState};
pub use provider::{Credential, ProviderClient, ProviderConfig, Workspace};
pub use state::{Resource, ResourceKind, ResourceSnapshot};
