//! Daemon wiring against an in-process plugin server

use skyflow_cloud::{LifecycleState, ResourceKind};
use skyflow_config::parse_config_str;
use skyflow_connect::proto::resource_service_server::{ResourceService, ResourceServiceServer};
use skyflow_connect::proto::{self, ListResourcesRequest, ListResourcesResponse};
use skyflowd::ControlPlane;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::time::timeout;
use tokio_stream::wrappers::TcpListenerStream;
use tonic::{Request, Response, Status};

struct ClusterPlugin;

#[tonic::async_trait]
impl ResourceService for ClusterPlugin {
    async fn list_resources(
        &self,
        request: Request<ListResourcesRequest>,
    ) -> Result<Response<ListResourcesResponse>, Status> {
        let request = request.into_inner();
        let resources = vec![proto::Resource {
            id: format!("{}-c1", request.credential_id),
            name: "prod".to_string(),
            status: "ACTIVE".to_string(),
            region: request.region,
            attributes: Default::default(),
        }];
        Ok(Response::new(ListResourcesResponse { resources }))
    }
}

async fn spawn_plugin() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let (mut reporter, health_service) = tonic_health::server::health_reporter();
    reporter
        .set_service_status("", tonic_health::ServingStatus::Serving)
        .await;

    tokio::spawn(async move {
        // reporter must outlive the server
        let _reporter = reporter;
        tonic::transport::Server::builder()
            .add_service(health_service)
            .add_service(ResourceServiceServer::new(ClusterPlugin))
            .serve_with_incoming(TcpListenerStream::new(listener))
            .await
            .unwrap();
    });

    addr
}

fn config_for(address: &str) -> String {
    format!(
        r#"
provider "aws" address="{address}"
connection dial-timeout="1s" max-retries=1
sync {{
    kinds "kubernetes-cluster"
    regions "aws" "us-east-1"
}}
workspace "ws-1" {{
    credential "cred-a" provider="aws"
}}
"#
    )
}

#[tokio::test]
async fn test_start_syncs_and_shutdown_closes() {
    let addr = spawn_plugin().await;
    let config = parse_config_str(&config_for(&addr.to_string())).unwrap();

    let plane = ControlPlane::build(&config).await.unwrap();
    assert_eq!(plane.workers().len(), 1);
    let mut events = plane.subscribe_events();

    plane.start().await.unwrap();
    assert!(plane.registry().is_connected("aws").await);

    let event = timeout(Duration::from_secs(10), events.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(event.event_type, "aws.kubernetes-cluster.list");
    assert_eq!(event.scope.credential_id, "cred-a");
    assert_eq!(event.data["clusters"][0]["id"], "cred-a-c1");
    assert_eq!(event.data["count"], 1);

    plane.shutdown().await;
    let worker = plane.worker(ResourceKind::KubernetesCluster).unwrap();
    assert_eq!(worker.state(), LifecycleState::Stopped);
    assert_eq!(plane.health().state(), LifecycleState::Stopped);
    assert!(!plane.registry().is_connected("aws").await);
}

#[tokio::test]
async fn test_unreachable_provider_does_not_block_start() {
    // bind then drop to get a port nobody listens on
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let config = parse_config_str(&config_for(&addr.to_string())).unwrap();
    let plane = ControlPlane::build(&config).await.unwrap();

    plane.start().await.unwrap();
    assert!(!plane.registry().is_connected("aws").await);
    assert_eq!(
        plane.worker(ResourceKind::KubernetesCluster).unwrap().state(),
        LifecycleState::Running
    );

    plane.shutdown().await;
}

#[tokio::test]
async fn test_disabled_provider_is_not_dialed() {
    let config = parse_config_str(
        r#"
provider "aws" address="127.0.0.1:1" enabled=#false
monitor enabled=#false
"#,
    )
    .unwrap();
    let plane = ControlPlane::build(&config).await.unwrap();
    assert_eq!(plane.workers().len(), 3);

    plane.start().await.unwrap();
    assert!(plane.registry().list_connected_providers().await.is_empty());
    assert_eq!(plane.registry().list_providers().await, vec!["aws"]);
    plane.shutdown().await;
}

#[tokio::test]
async fn test_invalid_redis_url_fails_build() {
    let config = parse_config_str(r#"subscriptions redis="not a url""#).unwrap();
    assert!(ControlPlane::build(&config).await.is_err());
}

#[tokio::test]
async fn test_failed_start_rolls_back() {
    let addr = spawn_plugin().await;
    let config = parse_config_str(&config_for(&addr.to_string())).unwrap();
    let plane = ControlPlane::build(&config).await.unwrap();

    // a worker that is already running makes start fail part way
    let worker = plane.worker(ResourceKind::KubernetesCluster).unwrap();
    worker.start().unwrap();

    let err = plane.start().await.unwrap_err();
    assert!(format!("{err:#}").contains("already running"));

    assert_eq!(worker.state(), LifecycleState::Stopped);
    assert_eq!(plane.health().state(), LifecycleState::Stopped);
    assert!(plane.registry().list_connected_providers().await.is_empty());
}
