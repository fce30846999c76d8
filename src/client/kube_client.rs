//! [`ResourceClient`] backed by a live cluster

use std::collections::BTreeMap;

use async_trait::async_trait;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::Namespace;
use kube::api::{ApiResource, DeleteParams, DynamicObject, ListParams, PostParams};
use kube::core::{GroupVersionKind, ObjectMeta};
use kube::{Api, Client, ResourceExt};
use tracing::{debug, info};

use super::{DeploymentState, ResourceClient, SpecMutation};
use crate::crd::RuntimeComponent;
use crate::error::{Error, Result};

/// Label put on every namespace the harness creates
pub const TEST_NAMESPACE_LABEL: &str = "runtime-e2e.test";

/// Label Knative puts on the Deployments of a service's revisions
pub const KNATIVE_SERVICE_LABEL: &str = "serving.knative.dev/service";

const RUNTIME_COMPONENT: &str = "RuntimeComponent";
const DEPLOYMENT: &str = "Deployment";
const KNATIVE_SERVICE: &str = "KnativeService";
const NAMESPACE: &str = "Namespace";

/// Kubernetes client wrapper implementing [`ResourceClient`]
#[derive(Clone)]
pub struct KubeClient {
    client: Client,
}

impl KubeClient {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// Connect using the ambient kubeconfig or in-cluster config
    pub async fn try_default() -> Result<Self> {
        Ok(Self::new(Client::try_default().await?))
    }

    /// Get a clone of the underlying client
    pub fn client(&self) -> Client {
        self.client.clone()
    }

    fn components(&self, namespace: &str) -> Api<RuntimeComponent> {
        Api::namespaced(self.client.clone(), namespace)
    }

    fn deployments(&self, namespace: &str) -> Api<Deployment> {
        Api::namespaced(self.client.clone(), namespace)
    }

    fn knative_services(&self, namespace: &str) -> Api<DynamicObject> {
        let gvk = GroupVersionKind::gvk("serving.knative.dev", "v1", "Service");
        let resource = ApiResource::from_gvk_with_plural(&gvk, "services");
        Api::namespaced_with(self.client.clone(), namespace, &resource)
    }

    fn namespaces(&self) -> Api<Namespace> {
        Api::all(self.client.clone())
    }
}

/// Map API status codes onto the harness taxonomy
fn classify(err: kube::Error, kind: &'static str, name: &str) -> Error {
    if let kube::Error::Api(resp) = &err {
        match resp.code {
            404 => return Error::not_found(kind, name),
            409 if resp.reason == "AlreadyExists" => {
                return Error::AlreadyExists {
                    kind,
                    name: name.to_string(),
                };
            }
            409 => {
                return Error::Conflict {
                    kind,
                    name: name.to_string(),
                };
            }
            _ => {}
        }
    }
    Error::KubeError(err)
}

/// Whether the operator created `svc` for the component `name`
fn owned_by_component(svc: &DynamicObject, name: &str) -> bool {
    svc.owner_references()
        .iter()
        .any(|owner| owner.kind == RUNTIME_COMPONENT && owner.name == name)
}

#[async_trait]
impl ResourceClient for KubeClient {
    async fn create(&self, namespace: &str, component: &RuntimeComponent) -> Result<()> {
        let name = component.name_any();
        let mut component = component.clone();
        component.metadata.namespace = Some(namespace.to_string());

        self.components(namespace)
            .create(&PostParams::default(), &component)
            .await
            .map_err(|e| classify(e, RUNTIME_COMPONENT, &name))?;

        info!(namespace, name = %name, "Created RuntimeComponent");
        Ok(())
    }

    async fn update(&self, namespace: &str, name: &str, mutate: SpecMutation<'_>) -> Result<()> {
        let api = self.components(namespace);
        let mut current = api
            .get(name)
            .await
            .map_err(|e| classify(e, RUNTIME_COMPONENT, name))?;

        mutate(&mut current.spec);

        // replace carries the resourceVersion we read, so a concurrent writer yields 409
        api.replace(name, &PostParams::default(), &current)
            .await
            .map_err(|e| classify(e, RUNTIME_COMPONENT, name))?;

        info!(namespace, name, "Updated RuntimeComponent");
        Ok(())
    }

    async fn delete(&self, namespace: &str, name: &str) -> Result<()> {
        self.components(namespace)
            .delete(name, &DeleteParams::background())
            .await
            .map_err(|e| classify(e, RUNTIME_COMPONENT, name))?;

        debug!(namespace, name, "Deleted RuntimeComponent");
        Ok(())
    }

    async fn exists(&self, namespace: &str, name: &str) -> Result<bool> {
        let found = self
            .components(namespace)
            .get_opt(name)
            .await
            .map_err(|e| classify(e, RUNTIME_COMPONENT, name))?;
        Ok(found.is_some())
    }

    async fn deployment(&self, namespace: &str, name: &str) -> Result<DeploymentState> {
        let deployment = self
            .deployments(namespace)
            .get(name)
            .await
            .map_err(|e| classify(e, DEPLOYMENT, name))?;
        DeploymentState::from_deployment(&deployment)
    }

    async fn knative_deployment(&self, namespace: &str, name: &str) -> Result<DeploymentState> {
        let selector = format!("{}={}", KNATIVE_SERVICE_LABEL, name);
        let list = self
            .deployments(namespace)
            .list(&ListParams::default().labels(&selector))
            .await
            .map_err(|e| classify(e, DEPLOYMENT, name))?;

        // Each revision gets its own Deployment; the newest one serves traffic
        let latest = list
            .items
            .into_iter()
            .max_by_key(|d| d.metadata.creation_timestamp.as_ref().map(|t| t.0))
            .ok_or_else(|| Error::not_found(DEPLOYMENT, format!("{} (knative)", name)))?;

        DeploymentState::from_deployment(&latest)
    }

    async fn knative_service_exists(&self, namespace: &str, name: &str) -> Result<bool> {
        let found = self
            .knative_services(namespace)
            .get_opt(name)
            .await
            .map_err(|e| classify(e, KNATIVE_SERVICE, name))?;
        Ok(found.is_some())
    }

    async fn knative_service_count(&self, namespace: &str, name: &str) -> Result<usize> {
        let list = self
            .knative_services(namespace)
            .list(&ListParams::default())
            .await
            .map_err(|e| classify(e, KNATIVE_SERVICE, name))?;

        Ok(list
            .items
            .iter()
            .filter(|svc| owned_by_component(svc, name))
            .count())
    }

    async fn create_namespace(&self, name: &str) -> Result<()> {
        let ns = Namespace {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                labels: Some(BTreeMap::from([(
                    TEST_NAMESPACE_LABEL.to_string(),
                    "true".to_string(),
                )])),
                ..Default::default()
            },
            ..Default::default()
        };

        self.namespaces()
            .create(&PostParams::default(), &ns)
            .await
            .map_err(|e| classify(e, NAMESPACE, name))?;

        info!("Created test namespace: {}", name);
        Ok(())
    }

    async fn delete_namespace(&self, name: &str) -> Result<()> {
        // Namespace deletion cascades; don't wait for it to finish
        self.namespaces()
            .delete(name, &DeleteParams::background())
            .await
            .map_err(|e| classify(e, NAMESPACE, name))?;

        debug!("Namespace {} deletion initiated", name);
        Ok(())
    }

    async fn list_namespaces(&self) -> Result<Vec<String>> {
        let list = self.namespaces().list(&ListParams::default()).await?;
        Ok(list.items.iter().map(|ns| ns.name_any()).collect())
    }
}
