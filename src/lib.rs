pub mod client;
pub mod config;
pub mod context;
pub mod crd;
pub mod error;
pub mod fixtures;
pub mod poll;
pub mod scenario;

pub use client::{DeploymentState, KubeClient, ObservedState, ResourceClient, SpecMutation};
pub use config::{HarnessConfig, PollConfig};
pub use context::{CleanupFailure, CleanupReport, CleanupTask, TestContext};
pub use crd::{PullPolicy, RuntimeComponent, RuntimeComponentSpec};
pub use error::{Error, ProbeError, Result};
pub use poll::{wait_for, wait_until};
pub use scenario::{
    KnativeToggleScenario, PullPolicyScenario, Scenario, ScenarioFailure, ScenarioOutcome,
    ScenarioReport, default_scenarios, run_all,
};
