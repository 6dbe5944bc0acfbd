//! Remote resource state
//!
//! Resources are what provider plugins report for one (credential, region, kind);
//! a [`ResourceSnapshot`] is the full list as of the last successful fetch.

use crate::error::CloudError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::str::FromStr;

/// Kind of remote resource tracked by the sync engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ResourceKind {
    /// Managed Kubernetes cluster (EKS, GKE, AKS, ...)
    KubernetesCluster,
    /// Virtual network / VPC
    NetworkVpc,
    /// Virtual machine
    Vm,
}

impl ResourceKind {
    pub const ALL: [ResourceKind; 3] = [
        ResourceKind::KubernetesCluster,
        ResourceKind::NetworkVpc,
        ResourceKind::Vm,
    ];

    /// Wire name used in subscription keys, cache keys and event types
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceKind::KubernetesCluster => "kubernetes-cluster",
            ResourceKind::NetworkVpc => "network-vpc",
            ResourceKind::Vm => "vm",
        }
    }

    /// Field name of the resource list inside a `list` event payload
    pub fn list_field(&self) -> &'static str {
        match self {
            ResourceKind::KubernetesCluster => "clusters",
            ResourceKind::NetworkVpc => "vpcs",
            ResourceKind::Vm => "vms",
        }
    }
}

impl std::fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ResourceKind {
    type Err = CloudError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ResourceKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| CloudError::UnknownKind(s.to_string()))
    }
}

/// A single remote resource as reported by a provider plugin
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resource {
    /// Provider-specific resource ID
    pub id: String,

    /// Human readable name
    pub name: String,

    /// Provider status string (e.g. "ACTIVE", "UPDATING")
    pub status: String,

    /// Region the resource lives in
    pub region: String,

    /// Additional attributes (version, CIDR, ...)
    #[serde(default)]
    pub attributes: BTreeMap<String, serde_json::Value>,
}

impl Resource {
    pub fn new(id: impl Into<String>, status: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            status: status.into(),
            region: String::new(),
            attributes: BTreeMap::new(),
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_region(mut self, region: impl Into<String>) -> Self {
        self.region = region.into();
        self
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.attributes.insert(key.into(), value);
        self
    }

    pub fn get_attribute<T: serde::de::DeserializeOwned>(&self, key: &str) -> Option<T> {
        self.attributes
            .get(key)
            .and_then(|v| serde_json::from_value(v.clone()).ok())
    }
}

/// Last-known resource list for one (provider, credential, region, kind)
///
/// Snapshots are replaced wholesale after every successful fetch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceSnapshot {
    pub provider: String,
    pub credential_id: String,
    pub region: String,
    pub kind: ResourceKind,
    pub resources: Vec<Resource>,
    pub fetched_at: DateTime<Utc>,
}

impl ResourceSnapshot {
    pub fn new(
        provider: impl Into<String>,
        credential_id: impl Into<String>,
        region: impl Into<String>,
        kind: ResourceKind,
        resources: Vec<Resource>,
    ) -> Self {
        Self {
            provider: provider.into(),
            credential_id: credential_id.into(),
            region: region.into(),
            kind,
            resources,
            fetched_at: Utc::now(),
        }
    }

    pub fn len(&self) -> usize {
        self.resources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }

    pub fn get(&self, id: &str) -> Option<&Resource> {
        self.resources.iter().find(|r| r.id == id)
    }
}
