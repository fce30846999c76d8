//! Builders for the RuntimeComponents the scenarios create
//!
//! ```rust,ignore
//! let component = RuntimeComponentBuilder::new("my-app", "my-namespace")
//!     .with_replicas(2)
//!     .with_pull_policy(PullPolicy::Always)
//!     .build();
//! ```

use kube::core::ObjectMeta;

use crate::config::DEFAULT_APPLICATION_IMAGE;
use crate::crd::{PullPolicy, RuntimeComponent, RuntimeComponentSpec, ServiceSpec};

/// Port the demo application listens on
pub const DEFAULT_SERVICE_PORT: i32 = 3000;

/// Create a component with the demo image, a service on port 3000 and
/// everything else left to the operator's defaults
pub fn basic_component(
    name: &str,
    namespace: &str,
    image: &str,
    replicas: i32,
) -> RuntimeComponent {
    RuntimeComponentBuilder::new(name, namespace)
        .with_image(image)
        .with_replicas(replicas)
        .build()
}

/// Builder for RuntimeComponent resources
#[derive(Clone, Debug)]
pub struct RuntimeComponentBuilder {
    name: String,
    namespace: String,
    image: String,
    replicas: i32,
    pull_policy: Option<PullPolicy>,
    knative: Option<bool>,
    service_port: Option<i32>,
}

impl RuntimeComponentBuilder {
    pub fn new(name: &str, namespace: &str) -> Self {
        Self {
            name: name.to_string(),
            namespace: namespace.to_string(),
            image: DEFAULT_APPLICATION_IMAGE.to_string(),
            replicas: 1,
            pull_policy: None,
            knative: None,
            service_port: Some(DEFAULT_SERVICE_PORT),
        }
    }

    pub fn with_image(mut self, image: &str) -> Self {
        self.image = image.to_string();
        self
    }

    pub fn with_replicas(mut self, replicas: i32) -> Self {
        self.replicas = replicas;
        self
    }

    pub fn with_pull_policy(mut self, policy: PullPolicy) -> Self {
        self.pull_policy = Some(policy);
        self
    }

    /// Set or clear `createKnativeService`
    pub fn with_knative(mut self, enabled: bool) -> Self {
        self.knative = Some(enabled);
        self
    }

    pub fn without_service(mut self) -> Self {
        self.service_port = None;
        self
    }

    pub fn build(self) -> RuntimeComponent {
        RuntimeComponent {
            metadata: ObjectMeta {
                name: Some(self.name),
                namespace: Some(self.namespace),
                ..Default::default()
            },
            spec: RuntimeComponentSpec {
                application_image: self.image,
                replicas: self.replicas,
                pull_policy: self.pull_policy,
                create_knative_service: self.knative,
                service: self.service_port.map(|port| ServiceSpec { port }),
            },
        }
    }
}
