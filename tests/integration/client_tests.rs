//! Integration tests for the Kubernetes-backed resource client
//!
//! These only need the API server and the CRD, not the operator: they check
//! that the harness can create, mutate, observe and tear down what the
//! scenarios rely on.

use futures::FutureExt;
use k8s_openapi::api::core::v1::Namespace;
use kube::Api;
use runtime_e2e::fixtures::RuntimeComponentBuilder;
use runtime_e2e::{
    Error, PullPolicy, ResourceClient, RuntimeComponent, RuntimeComponentSpec, TestContext,
};

use crate::{SharedTestCluster, setup};

#[tokio::test]
#[ignore = "requires Kubernetes cluster"]
async fn test_cluster_reports_version() {
    let cluster = SharedTestCluster::get()
        .await
        .expect("Failed to get cluster");
    assert!(!cluster.server_version().is_empty());
}

#[tokio::test]
#[ignore = "requires Kubernetes cluster"]
async fn test_namespace_is_labelled_and_removed() {
    let (client, config) = setup().await;
    let kube_client = SharedTestCluster::get()
        .await
        .expect("Failed to get cluster")
        .new_client()
        .await
        .expect("Failed to create client");
    let namespaces: Api<Namespace> = Api::all(kube_client);

    let mut ctx = TestContext::new(client.clone(), config)
        .await
        .expect("Failed to create test context");
    let name = ctx.namespace().to_string();

    let ns = namespaces.get(&name).await.expect("Namespace missing");
    let labels = ns.metadata.labels.unwrap_or_default();
    assert_eq!(
        labels.get(runtime_e2e::client::TEST_NAMESPACE_LABEL),
        Some(&"true".to_string())
    );
    assert!(
        client
            .list_namespaces()
            .await
            .expect("Failed to list namespaces")
            .contains(&name)
    );

    let report = ctx.cleanup().await;
    assert!(report.is_clean(), "cleanup failed: {:?}", report.failures);

    // Namespace deletion is asynchronous; it is either gone or terminating
    if let Some(ns) = namespaces.get_opt(&name).await.expect("Failed to get namespace") {
        assert_eq!(
            ns.status.and_then(|s| s.phase).as_deref(),
            Some("Terminating")
        );
    }
}

#[tokio::test]
#[ignore = "requires Kubernetes cluster"]
async fn test_component_update_round_trips_through_api() {
    let (client, config) = setup().await;
    let kube_client = SharedTestCluster::get()
        .await
        .expect("Failed to get cluster")
        .new_client()
        .await
        .expect("Failed to create client");

    let (result, report) = TestContext::scoped(client, config, |ctx| {
        async move {
            let ns = ctx.namespace().to_string();
            let component = RuntimeComponentBuilder::new("round-trip", &ns).build();
            ctx.create(&component).await?;
            assert!(ctx.client().exists(&ns, "round-trip").await?);

            ctx.update("round-trip", &|spec: &mut RuntimeComponentSpec| {
                spec.pull_policy = Some(PullPolicy::Always);
            })
            .await?;

            let api: Api<RuntimeComponent> = Api::namespaced(kube_client, &ns);
            let stored = api.get("round-trip").await?;
            Ok::<_, Error>(stored.spec.pull_policy)
        }
        .boxed()
    })
    .await;

    assert_eq!(result.expect("Round trip failed"), Some(PullPolicy::Always));
    assert!(report.is_clean(), "cleanup failed: {:?}", report.failures);
}

#[tokio::test]
#[ignore = "requires Kubernetes cluster"]
async fn test_duplicate_create_is_already_exists() {
    let (client, config) = setup().await;

    let (result, _) = TestContext::scoped(client, config, |ctx| {
        async move {
            let ns = ctx.namespace().to_string();
            let component = RuntimeComponentBuilder::new("duplicate", &ns).build();
            ctx.create(&component).await?;
            ctx.create(&component).await
        }
        .boxed()
    })
    .await;

    assert!(matches!(result, Err(Error::AlreadyExists { .. })));
}

#[tokio::test]
#[ignore = "requires Kubernetes cluster"]
async fn test_missing_component_is_not_found() {
    let (client, config) = setup().await;

    let (result, _) = TestContext::scoped(client, config, |ctx| {
        async move { ctx.observe("does-not-exist").await.map(|_| ()) }.boxed()
    })
    .await;

    let err = result.expect_err("observe should fail");
    assert!(err.is_not_found(), "unexpected error: {}", err);
}
