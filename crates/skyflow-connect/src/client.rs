//! [`ProviderClient`] over the plugin `ResourceService`

use crate::dialer::GrpcDialer;
use crate::proto;
use crate::proto::resource_service_client::ResourceServiceClient;
use crate::registry::ConnectionRegistry;
use async_trait::async_trait;
use skyflow_cloud::{CloudError, Credential, ProviderClient, Resource, ResourceKind};
use std::sync::Arc;
use tonic::Code;
use tracing::debug;

/// Fetches resources from the plugin registered under the credential's provider
#[derive(Clone)]
pub struct GrpcProviderClient {
    registry: Arc<ConnectionRegistry<GrpcDialer>>,
}

impl GrpcProviderClient {
    pub fn new(registry: Arc<ConnectionRegistry<GrpcDialer>>) -> Self {
        Self { registry }
    }
}

#[async_trait]
impl ProviderClient for GrpcProviderClient {
    async fn fetch(
        &self,
        credential: &Credential,
        kind: ResourceKind,
        region: &str,
    ) -> skyflow_cloud::Result<Vec<Resource>> {
        let provider = credential.provider.as_str();
        let unavailable = |reason: String| CloudError::ProviderUnavailable {
            provider: provider.to_string(),
            reason,
        };

        let connection = self
            .registry
            .get_connection(provider)
            .await
            .map_err(|e| unavailable(e.to_string()))?;
        let channel = connection.channel().map_err(|e| unavailable(e.to_string()))?;

        let request = proto::ListResourcesRequest {
            resource_kind: kind.as_str().to_string(),
            region: region.to_string(),
            credential_id: credential.id.clone(),
            workspace_id: credential.workspace_id.clone(),
        };

        let response = ResourceServiceClient::new(channel)
            .list_resources(request)
            .await;
        connection.observe(&response);

        let resources = response
            .map_err(|status| match status.code() {
                Code::Unimplemented => CloudError::UnsupportedKind {
                    provider: provider.to_string(),
                    kind: kind.to_string(),
                },
                Code::Unavailable | Code::DeadlineExceeded => {
                    unavailable(status.message().to_string())
                }
                _ => CloudError::ApiError(format!("{provider}: {}", status.message())),
            })?
            .into_inner()
            .resources;

        debug!(
            provider = %provider,
            credential_id = %credential.id,
            region = %region,
            resource_kind = %kind,
            count = resources.len(),
            "Listed resources"
        );

        Ok(resources
            .into_iter()
            .map(|r| into_resource(r, region))
            .collect())
    }
}

/// Plugin attributes are JSON-encoded; plain strings pass through as-is
fn into_resource(raw: proto::Resource, requested_region: &str) -> Resource {
    let region = if raw.region.is_empty() {
        requested_region.to_string()
    } else {
        raw.region
    };

    let mut resource = Resource::new(raw.id, raw.status)
        .with_name(raw.name)
        .with_region(region);
    for (key, value) in raw.attributes {
        let value = serde_json::from_str(&value).unwrap_or(serde_json::Value::String(value));
        resource = resource.with_attribute(key, value);
    }
    resource
}
