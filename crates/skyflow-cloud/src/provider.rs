//! Provider plugin abstraction

use crate::error::Result;
use crate::state::{Resource, ResourceKind};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Provider-facing fetch interface used by the sync engine
///
/// Implementations reach the provider plugin however they like (gRPC in
/// production, canned data in tests). A fetch returns the complete list of
/// resources of `kind` visible to `credential` in `region`.
#[async_trait]
pub trait ProviderClient: Send + Sync {
    async fn fetch(
        &self,
        credential: &Credential,
        kind: ResourceKind,
        region: &str,
    ) -> Result<Vec<Resource>>;
}

/// Configuration of one provider plugin endpoint
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// Provider name (e.g., "aws", "gcp")
    pub name: String,

    /// Plugin RPC address (e.g., "localhost:50051")
    pub address: String,

    /// Whether this provider may be connected
    pub enabled: bool,

    /// Provider-specific credentials handed to the plugin
    #[serde(default)]
    pub credentials: BTreeMap<String, String>,

    /// Additional metadata
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

impl ProviderConfig {
    pub fn new(name: impl Into<String>, address: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            address: address.into(),
            enabled: true,
            credentials: BTreeMap::new(),
            metadata: BTreeMap::new(),
        }
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    pub fn with_credential(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.credentials.insert(key.into(), value.into());
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

/// Workspace as seen by the sync engine
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Workspace {
    pub id: String,
    pub name: String,
}

impl Workspace {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
        }
    }
}

/// Cloud credential registered in a workspace
///
/// Secrets stay with the credential service; the sync engine only needs the
/// identity, the provider it belongs to and whether it is active.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credential {
    pub id: String,
    pub workspace_id: String,
    pub provider: String,
    pub active: bool,
}

impl Credential {
    pub fn new(
        id: impl Into<String>,
        workspace_id: impl Into<String>,
        provider: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            workspace_id: workspace_id.into(),
            provider: provider.into(),
            active: true,
        }
    }

    pub fn inactive(mut self) -> Self {
        self.active = false;
        self
    }
}
