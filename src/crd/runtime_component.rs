use std::fmt;
use std::str::FromStr;

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::error::Error;

/// RuntimeComponent is the Schema for the runtimecomponents API
///
/// Only the fields the harness mutates or reads are modelled here; the
/// operator owns the full schema.
#[derive(CustomResource, Serialize, Deserialize, Clone, Debug, PartialEq, JsonSchema)]
#[kube(
    group = "rc.app.stacks",
    version = "v1beta1",
    kind = "RuntimeComponent",
    plural = "runtimecomponents",
    shortname = "comp",
    namespaced,
    printcolumn = r#"{"name":"Image", "type":"string", "jsonPath":".spec.applicationImage"}"#,
    printcolumn = r#"{"name":"Age", "type":"date", "jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct RuntimeComponentSpec {
    /// Container image to run (e.g., "navidsh/demo-day")
    pub application_image: String,

    /// Number of pods for the managed Deployment
    #[serde(default = "default_replicas")]
    pub replicas: i32,

    /// Image pull policy for the application container.
    /// Unset means the platform default (`IfNotPresent` for tagged images).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pull_policy: Option<PullPolicy>,

    /// Serve the application through a Knative Service instead of a plain Deployment
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub create_knative_service: Option<bool>,

    /// Service exposure
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service: Option<ServiceSpec>,
}

fn default_replicas() -> i32 {
    1
}

impl RuntimeComponentSpec {
    /// Whether the alternate (Knative) serving mode is requested
    pub fn knative_enabled(&self) -> bool {
        self.create_knative_service.unwrap_or(false)
    }

    /// Pull policy the platform is expected to apply to the container
    pub fn effective_pull_policy(&self) -> PullPolicy {
        PullPolicy::effective(self.pull_policy)
    }
}

/// Service exposure for the component
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ServiceSpec {
    /// Port the application listens on
    pub port: i32,
}

/// Container image pull policy
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash, JsonSchema)]
pub enum PullPolicy {
    Always,
    Never,
    IfNotPresent,
}

impl PullPolicy {
    /// What Kubernetes applies when no policy is set on a tagged image
    pub const PLATFORM_DEFAULT: PullPolicy = PullPolicy::IfNotPresent;

    /// Resolve an optional declared policy to the one the platform applies
    pub fn effective(declared: Option<PullPolicy>) -> PullPolicy {
        declared.unwrap_or(Self::PLATFORM_DEFAULT)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PullPolicy::Always => "Always",
            PullPolicy::Never => "Never",
            PullPolicy::IfNotPresent => "IfNotPresent",
        }
    }
}

impl fmt::Display for PullPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PullPolicy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Always" => Ok(PullPolicy::Always),
            "Never" => Ok(PullPolicy::Never),
            "IfNotPresent" => Ok(PullPolicy::IfNotPresent),
            other => Err(Error::MalformedResponse(format!(
                "unknown image pull policy '{}'",
                other
            ))),
        }
    }
}
