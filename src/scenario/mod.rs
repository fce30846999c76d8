//! Scenario drivers and the steps they share
//!
//! A scenario acquires a [`TestContext`], applies a sequence of spec
//! mutations, and after each one waits for the operator to converge before
//! verifying the derived state. Any error ends the scenario; the context is
//! torn down on every exit path.

mod knative;
mod pull_policy;

pub use knative::{KnativeStep, KnativeToggleScenario};
pub use pull_policy::{PullPolicyScenario, PullPolicyStep};

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tracing::{error, info};

use crate::client::{DeploymentState, ResourceClient};
use crate::config::HarnessConfig;
use crate::context::{CleanupReport, TestContext};
use crate::error::{Error, ProbeError, Result};
use crate::poll;

/// How a scenario ended when it did not fail
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScenarioOutcome {
    Passed,
    /// The cluster lacks something the scenario needs; nothing was exercised
    Skipped { reason: String },
}

/// An error tagged with the step that produced it
#[derive(Error, Debug)]
#[error("step '{step}' failed: {source}")]
pub struct StepError {
    pub step: String,
    #[source]
    pub source: Error,
}

impl StepError {
    pub fn new(step: impl fmt::Display, source: Error) -> Self {
        Self {
            step: step.to_string(),
            source,
        }
    }
}

impl From<Error> for StepError {
    fn from(source: Error) -> Self {
        StepError::new("setup", source)
    }
}

/// A failed scenario: which scenario, which step, and why
#[derive(Error, Debug)]
#[error("scenario {scenario} failed at step '{step}': {source}")]
pub struct ScenarioFailure {
    pub scenario: &'static str,
    pub step: String,
    #[source]
    pub source: Error,
}

impl ScenarioFailure {
    pub fn new(scenario: &'static str, error: StepError) -> Self {
        Self {
            scenario,
            step: error.step,
            source: error.source,
        }
    }

    /// Convergence was never observed within the budget
    pub fn is_timeout(&self) -> bool {
        self.source.is_timeout()
    }

    /// Converged, but the observed state was wrong
    pub fn is_verification(&self) -> bool {
        self.source.is_verification()
    }
}

/// Result of running one scenario, including its teardown
#[derive(Debug)]
pub struct ScenarioReport {
    pub scenario: &'static str,
    pub result: std::result::Result<ScenarioOutcome, ScenarioFailure>,
    pub cleanup: CleanupReport,
}

impl ScenarioReport {
    pub fn passed(&self) -> bool {
        matches!(self.result, Ok(ScenarioOutcome::Passed))
    }

    pub fn skipped(&self) -> bool {
        matches!(self.result, Ok(ScenarioOutcome::Skipped { .. }))
    }

    pub fn failed(&self) -> bool {
        self.result.is_err()
    }

    pub(crate) fn from_scoped(
        scenario: &'static str,
        (result, cleanup): (
            std::result::Result<ScenarioOutcome, StepError>,
            CleanupReport,
        ),
    ) -> Self {
        let report = Self {
            scenario,
            result: result.map_err(|e| ScenarioFailure::new(scenario, e)),
            cleanup,
        };
        report.log();
        report
    }

    fn log(&self) {
        match &self.result {
            Ok(ScenarioOutcome::Passed) => info!(scenario = self.scenario, "Scenario passed"),
            Ok(ScenarioOutcome::Skipped { reason }) => {
                info!(scenario = self.scenario, reason = %reason, "Scenario skipped")
            }
            Err(failure) => error!(
                scenario = self.scenario,
                step = %failure.step,
                error = %failure.source,
                "Scenario failed"
            ),
        }
    }
}

/// A runnable end-to-end scenario
#[async_trait]
pub trait Scenario: Send + Sync {
    fn name(&self) -> &'static str;

    async fn run(&self, client: Arc<dyn ResourceClient>, config: HarnessConfig)
        -> ScenarioReport;
}

/// The scenarios shipped with the harness
pub fn default_scenarios() -> Vec<Box<dyn Scenario>> {
    vec![
        Box::new(PullPolicyScenario::default()),
        Box::new(KnativeToggleScenario::default()),
    ]
}

/// Run scenarios one after another, or all at once when `parallel` is set
///
/// Each scenario gets its own namespace, so running them side by side shares
/// nothing but the client.
pub async fn run_all(
    scenarios: &[Box<dyn Scenario>],
    client: Arc<dyn ResourceClient>,
    config: &HarnessConfig,
    parallel: bool,
) -> Vec<ScenarioReport> {
    if parallel {
        let runs = scenarios
            .iter()
            .map(|s| s.run(client.clone(), config.clone()));
        futures::future::join_all(runs).await
    } else {
        let mut reports = Vec::with_capacity(scenarios.len());
        for scenario in scenarios {
            info!(scenario = scenario.name(), "Running scenario");
            reports.push(scenario.run(client.clone(), config.clone()).await);
        }
        reports
    }
}

/// Wait for the operator Deployment to report the configured available replicas
///
/// Looks in the configured operator namespace, or in the test namespace when
/// none is configured.
pub async fn wait_for_operator(ctx: &TestContext) -> Result<()> {
    let cfg = ctx.config();
    let namespace = cfg.operator_namespace.as_deref().unwrap_or(ctx.namespace());
    let name = cfg.operator_name.as_str();
    let replicas = cfg.operator_replicas;
    let client = ctx.client();
    let client = &client;

    info!(namespace, name, replicas, "Waiting for operator deployment");

    let what = format!("operator deployment {}/{} available", namespace, name);
    poll::wait_until(&cfg.operator_poll(), &what, || async move {
        let state = client.deployment(namespace, name).await?;
        info!(
            "Waiting for full availability of {} deployment ({}/{})",
            name, state.available_replicas, replicas
        );
        Ok(state.available_replicas >= replicas)
    })
    .await
}

/// Capability probe: is the Knative Serving namespace present?
///
/// Returns `Error::PreconditionUnmet` when it is not; callers turn that into
/// a skip rather than a failure.
pub async fn require_knative(client: &dyn ResourceClient, config: &HarnessConfig) -> Result<()> {
    let namespaces = client.list_namespaces().await?;
    if namespaces.iter().any(|ns| ns == &config.knative_namespace) {
        Ok(())
    } else {
        Err(Error::PreconditionUnmet(format!(
            "namespace {} not found, Knative Serving is not installed",
            config.knative_namespace
        )))
    }
}

/// Which Deployment a readiness wait looks at
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeploymentKind {
    /// The Deployment named after the component
    Plain,
    /// The Deployment behind the component's Knative Service
    Knative,
}

/// Poll until the component's Deployment has `replicas` ready replicas
pub async fn wait_for_deployment(
    ctx: &TestContext,
    name: &str,
    kind: DeploymentKind,
    replicas: i32,
) -> Result<DeploymentState> {
    let client = ctx.client();
    let client = &client;
    let namespace = ctx.namespace();

    let what = match kind {
        DeploymentKind::Plain => format!("deployment {}/{} ready", namespace, name),
        DeploymentKind::Knative => format!("knative deployment {}/{} ready", namespace, name),
    };

    poll::wait_for(&ctx.config().poll(), &what, || async move {
        let state = match kind {
            DeploymentKind::Plain => client.deployment(namespace, name).await,
            DeploymentKind::Knative => client.knative_deployment(namespace, name).await,
        }
        .map_err(ProbeError::from)?;

        Ok(state.is_ready(replicas).then_some(state))
    })
    .await
}

/// Reads of the Knative Service count taken before it is considered settled
pub const KNATIVE_SETTLE_READS: u32 = 3;

/// Check that exactly one Knative Service backs the component
///
/// The count is read `KNATIVE_SETTLE_READS` times, one retry interval apart,
/// so a duplicate the operator creates shortly after a re-apply is still
/// seen. Any read other than one is a verification failure.
pub async fn verify_single_knative_service(ctx: &TestContext, name: &str) -> Result<()> {
    let client = ctx.client();
    let namespace = ctx.namespace();

    for read in 1..=KNATIVE_SETTLE_READS {
        let count = client.knative_service_count(namespace, name).await?;
        if count != 1 {
            return Err(Error::Verification(format!(
                "expected 1 knative service for {}/{}, found {}",
                namespace, name, count
            )));
        }
        if read < KNATIVE_SETTLE_READS {
            tokio::time::sleep(ctx.config().retry_interval).await;
        }
    }
    Ok(())
}
