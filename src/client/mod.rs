//! Narrow cluster interface used by the harness
//!
//! The harness never talks to the API server directly; everything goes
//! through [`ResourceClient`] so scenarios run unchanged against a real
//! cluster ([`KubeClient`]) or an in-memory stand-in in tests.

mod kube_client;

pub use kube_client::{KubeClient, KNATIVE_SERVICE_LABEL, TEST_NAMESPACE_LABEL};

use async_trait::async_trait;
use k8s_openapi::api::apps::v1::Deployment;

use crate::crd::{PullPolicy, RuntimeComponent, RuntimeComponentSpec};
use crate::error::Result;

/// Field-level edit applied to a freshly read spec during an update
pub type SpecMutation<'a> = &'a (dyn Fn(&mut RuntimeComponentSpec) + Send + Sync);

/// Realized state of a Deployment as far as the scenarios care
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DeploymentState {
    /// Desired replica count from the Deployment spec
    pub replicas: i32,
    pub ready_replicas: i32,
    pub available_replicas: i32,
    /// Pull policy of the first container, if one is set
    pub pull_policy: Option<PullPolicy>,
    pub container_count: usize,
}

impl DeploymentState {
    /// Project a Deployment into the fields the harness observes
    pub fn from_deployment(deployment: &Deployment) -> Result<Self> {
        let spec = deployment.spec.as_ref();
        let status = deployment.status.as_ref();
        let containers = spec
            .and_then(|s| s.template.spec.as_ref())
            .map(|p| p.containers.as_slice())
            .unwrap_or_default();

        let pull_policy = containers
            .first()
            .and_then(|c| c.image_pull_policy.as_deref())
            .map(str::parse::<PullPolicy>)
            .transpose()?;

        Ok(Self {
            replicas: spec.and_then(|s| s.replicas).unwrap_or(1),
            ready_replicas: status.and_then(|s| s.ready_replicas).unwrap_or(0),
            available_replicas: status.and_then(|s| s.available_replicas).unwrap_or(0),
            pull_policy,
            container_count: containers.len(),
        })
    }

    /// Check if at least `expected` replicas are ready and available
    pub fn is_ready(&self, expected: i32) -> bool {
        self.ready_replicas >= expected && self.available_replicas >= expected
    }
}

/// Derived state produced by the operator for one RuntimeComponent
///
/// Only ever read by the harness.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ObservedState {
    pub deployment: DeploymentState,
    /// Whether a Knative Service with the component's name exists
    pub knative_service: bool,
}

/// Create/read/update/delete for RuntimeComponents and reads of the objects
/// the operator derives from them, keyed by (namespace, name)
#[async_trait]
pub trait ResourceClient: Send + Sync {
    /// Create a component; `Error::AlreadyExists` if the name is taken
    async fn create(&self, namespace: &str, component: &RuntimeComponent) -> Result<()>;

    /// Read-modify-write of the component spec
    ///
    /// Fails with `Error::Conflict` if another writer raced us. No retry is
    /// attempted here.
    async fn update(&self, namespace: &str, name: &str, mutate: SpecMutation<'_>) -> Result<()>;

    /// Delete a component; `Error::NotFound` if it is already gone
    async fn delete(&self, namespace: &str, name: &str) -> Result<()>;

    /// Whether the component object itself exists
    async fn exists(&self, namespace: &str, name: &str) -> Result<bool>;

    /// Plain Deployment named after the component; `Error::NotFound` if absent
    async fn deployment(&self, namespace: &str, name: &str) -> Result<DeploymentState>;

    /// Deployment backing the component's Knative Service; `Error::NotFound` if absent
    async fn knative_deployment(&self, namespace: &str, name: &str) -> Result<DeploymentState>;

    async fn knative_service_exists(&self, namespace: &str, name: &str) -> Result<bool>;

    /// Number of Knative Services the operator created for the component
    ///
    /// Counts every Service owned by the component, whatever its name, so a
    /// duplicate created under another name shows up.
    async fn knative_service_count(&self, namespace: &str, name: &str) -> Result<usize>;

    async fn create_namespace(&self, name: &str) -> Result<()>;

    /// Delete a namespace; `Error::NotFound` if it is already gone
    async fn delete_namespace(&self, name: &str) -> Result<()>;

    async fn list_namespaces(&self) -> Result<Vec<String>>;

    /// Full derived state of a component
    async fn get(&self, namespace: &str, name: &str) -> Result<ObservedState> {
        let deployment = self.deployment(namespace, name).await?;
        let knative_service = self.knative_service_exists(namespace, name).await?;
        Ok(ObservedState {
            deployment,
            knative_service,
        })
    }
}
