//! Change event publishing
//!
//! Events are named `{provider}.{kind}.{change}` and scoped to a
//! (credential, region). Publishing never retries; failures are logged and
//! handed back so the caller can count them.

use crate::error::{Result, SyncError};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use skyflow_cloud::{Change, ChangeType, Resource, ResourceKind};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, warn};

/// Credential and region an event belongs to
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventScope {
    pub credential_id: String,
    pub region: String,
}

/// A change to publish
#[derive(Debug, Clone, PartialEq)]
pub struct ChangeEvent {
    pub provider: String,
    pub credential_id: String,
    pub region: String,
    pub resource_kind: ResourceKind,
    pub change_type: ChangeType,
    pub payload: serde_json::Value,
}

impl ChangeEvent {
    /// Event for one detected change
    pub fn from_change(
        provider: &str,
        credential_id: &str,
        region: &str,
        kind: ResourceKind,
        change: &Change,
    ) -> Self {
        Self {
            provider: provider.to_string(),
            credential_id: credential_id.to_string(),
            region: region.to_string(),
            resource_kind: kind,
            change_type: change.change_type,
            payload: change.payload(),
        }
    }

    /// `list` event carrying the full fetch result
    pub fn list(
        provider: &str,
        credential_id: &str,
        region: &str,
        kind: ResourceKind,
        resources: &[Resource],
    ) -> Self {
        let items: Vec<serde_json::Value> = resources
            .iter()
            .map(|r| {
                serde_json::json!({
                    "id": r.id,
                    "name": r.name,
                    "status": r.status,
                    "region": r.region,
                    "attributes": r.attributes,
                })
            })
            .collect();

        let mut payload = serde_json::Map::new();
        payload.insert(kind.list_field().to_string(), serde_json::Value::Array(items));
        payload.insert("count".to_string(), resources.len().into());

        Self {
            provider: provider.to_string(),
            credential_id: credential_id.to_string(),
            region: region.to_string(),
            resource_kind: kind,
            change_type: ChangeType::List,
            payload: serde_json::Value::Object(payload),
        }
    }

    /// `{provider}.{kind}.{change}`
    pub fn event_type(&self) -> String {
        format!("{}.{}.{}", self.provider, self.resource_kind, self.change_type)
    }

    /// Wire form; the data carries the routing fields next to the payload
    pub fn envelope(&self) -> EventEnvelope {
        let mut data = serde_json::Map::new();
        data.insert("provider".into(), self.provider.clone().into());
        data.insert("credential_id".into(), self.credential_id.clone().into());
        data.insert("region".into(), self.region.clone().into());
        data.insert("action".into(), self.change_type.as_str().into());
        match &self.payload {
            serde_json::Value::Object(fields) => {
                data.extend(fields.iter().map(|(k, v)| (k.clone(), v.clone())));
            }
            other => {
                data.insert("payload".into(), other.clone());
            }
        }

        EventEnvelope {
            event_type: self.event_type(),
            scope: EventScope {
                credential_id: self.credential_id.clone(),
                region: self.region.clone(),
            },
            data: serde_json::Value::Object(data),
            timestamp: Utc::now(),
        }
    }
}

/// Published message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventEnvelope {
    #[serde(rename = "type")]
    pub event_type: String,
    pub scope: EventScope,
    pub data: serde_json::Value,
    pub timestamp: DateTime<Utc>,
}

/// Destination for published events
#[async_trait]
pub trait EventBus: Send + Sync {
    async fn publish(&self, envelope: EventEnvelope) -> Result<()>;
}

/// In-process fan-out over a tokio broadcast channel
#[derive(Debug, Clone)]
pub struct BroadcastBus {
    sender: broadcast::Sender<EventEnvelope>,
}

impl BroadcastBus {
    pub const DEFAULT_CAPACITY: usize = 1024;

    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EventEnvelope> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for BroadcastBus {
    fn default() -> Self {
        Self::new(Self::DEFAULT_CAPACITY)
    }
}

#[async_trait]
impl EventBus for BroadcastBus {
    async fn publish(&self, envelope: EventEnvelope) -> Result<()> {
        let event_type = envelope.event_type.clone();
        match self.sender.send(envelope) {
            Ok(receivers) => debug!(event_type = %event_type, receivers, "Event broadcast"),
            // No subscribers yet is fine
            Err(_) => debug!(event_type = %event_type, "Event broadcast with no subscribers"),
        }
        Ok(())
    }
}

/// Publishes change events onto an [`EventBus`]
#[derive(Clone)]
pub struct EventPublisher {
    bus: Arc<dyn EventBus>,
}

impl EventPublisher {
    pub fn new(bus: Arc<dyn EventBus>) -> Self {
        Self { bus }
    }

    pub async fn publish(&self, event: &ChangeEvent) -> Result<()> {
        let envelope = event.envelope();
        let event_type = envelope.event_type.clone();

        if let Err(e) = self.bus.publish(envelope).await {
            warn!(
                event_type = %event_type,
                provider = %event.provider,
                credential_id = %event.credential_id,
                region = %event.region,
                error = %e,
                "Failed to publish event"
            );
            return Err(match e {
                SyncError::Bus(_) => e,
                other => SyncError::Bus(other.to_string()),
            });
        }

        debug!(event_type = %event_type, "Published event");
        Ok(())
    }
}
