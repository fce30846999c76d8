//! Pull-policy lifecycle: unset → Always → Never → unset
//!
//! Every step must end with the Deployment's container carrying the policy
//! the step declares (or the platform default when it declares none), so the
//! full cycle leaves the realized state where it started.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use futures::FutureExt;
use tracing::info;

use super::{Scenario, ScenarioOutcome, ScenarioReport, StepError, wait_for_operator};
use crate::client::ResourceClient;
use crate::config::HarnessConfig;
use crate::context::TestContext;
use crate::crd::{PullPolicy, RuntimeComponentSpec};
use crate::error::{Error, ProbeError, Result};
use crate::fixtures::basic_component;
use crate::poll;

const SCENARIO: &str = "pull-policy";

/// Name of the component the scenario creates
pub const DEFAULT_COMPONENT_NAME: &str = "example-runtime-pullpolicy";

/// Declared pull policy at each point of the lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PullPolicyStep {
    /// Component created without a pull policy
    Default,
    Always,
    Never,
    /// Pull policy removed again
    Unset,
}

impl PullPolicyStep {
    /// Steps in the order the scenario walks them
    pub const SEQUENCE: [PullPolicyStep; 4] = [
        PullPolicyStep::Default,
        PullPolicyStep::Always,
        PullPolicyStep::Never,
        PullPolicyStep::Unset,
    ];

    /// Policy written into the component spec at this step
    pub fn declared(&self) -> Option<PullPolicy> {
        match self {
            PullPolicyStep::Default | PullPolicyStep::Unset => None,
            PullPolicyStep::Always => Some(PullPolicy::Always),
            PullPolicyStep::Never => Some(PullPolicy::Never),
        }
    }

    /// Policy the Deployment must end up with
    pub fn expected(&self) -> PullPolicy {
        PullPolicy::effective(self.declared())
    }

    pub fn next(&self) -> Option<PullPolicyStep> {
        match self {
            PullPolicyStep::Default => Some(PullPolicyStep::Always),
            PullPolicyStep::Always => Some(PullPolicyStep::Never),
            PullPolicyStep::Never => Some(PullPolicyStep::Unset),
            PullPolicyStep::Unset => None,
        }
    }
}

impl fmt::Display for PullPolicyStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PullPolicyStep::Default => write!(f, "Default"),
            PullPolicyStep::Always => write!(f, "Always"),
            PullPolicyStep::Never => write!(f, "Never"),
            PullPolicyStep::Unset => write!(f, "Unset"),
        }
    }
}

/// Drives a component through the pull-policy lifecycle
#[derive(Clone, Debug)]
pub struct PullPolicyScenario {
    component_name: String,
    replicas: i32,
}

impl Default for PullPolicyScenario {
    fn default() -> Self {
        Self {
            component_name: DEFAULT_COMPONENT_NAME.to_string(),
            replicas: 1,
        }
    }
}

impl PullPolicyScenario {
    pub fn with_component_name(mut self, name: &str) -> Self {
        self.component_name = name.to_string();
        self
    }

    pub fn with_replicas(mut self, replicas: i32) -> Self {
        self.replicas = replicas;
        self
    }

    async fn steps(&self, ctx: &mut TestContext) -> Result<ScenarioOutcome, StepError> {
        wait_for_operator(ctx)
            .await
            .map_err(|e| StepError::new("operator ready", e))?;

        for step in PullPolicyStep::SEQUENCE {
            info!(
                namespace = ctx.namespace(),
                name = %self.component_name,
                step = %step,
                expected = %step.expected(),
                "Applying pull policy step"
            );

            self.apply(ctx, step)
                .await
                .map_err(|e| StepError::new(step, e))?;
            self.converge(ctx, step)
                .await
                .map_err(|e| StepError::new(step, e))?;
            self.verify(ctx, step)
                .await
                .map_err(|e| StepError::new(step, e))?;
        }

        Ok(ScenarioOutcome::Passed)
    }

    /// Create the component on the first step, update its spec afterwards
    async fn apply(&self, ctx: &mut TestContext, step: PullPolicyStep) -> Result<()> {
        let declared = step.declared();

        if step == PullPolicyStep::Default {
            let mut component = basic_component(
                &self.component_name,
                ctx.namespace(),
                &ctx.config().application_image,
                self.replicas,
            );
            component.spec.pull_policy = declared;
            return ctx.create(&component).await;
        }

        ctx.update(&self.component_name, &move |spec: &mut RuntimeComponentSpec| {
            spec.pull_policy = declared;
        })
        .await
    }

    /// Poll until the Deployment is ready and carries the expected policy
    async fn converge(&self, ctx: &TestContext, step: PullPolicyStep) -> Result<()> {
        let client = ctx.client();
        let client = &client;
        let namespace = ctx.namespace();
        let name = self.component_name.as_str();
        let replicas = self.replicas;
        let expected = step.expected();

        let what = format!(
            "deployment {}/{} ready with pull policy {}",
            namespace, name, expected
        );
        poll::wait_until(&ctx.config().poll(), &what, || async move {
            let state = client.deployment(namespace, name).await?;
            if state.container_count == 0 {
                return Err(ProbeError::fatal(Error::MalformedResponse(format!(
                    "deployment {}/{} has no containers",
                    namespace, name
                ))));
            }
            Ok(state.is_ready(replicas) && state.pull_policy == Some(expected))
        })
        .await
    }

    /// Re-read the converged state and check it still matches
    async fn verify(&self, ctx: &TestContext, step: PullPolicyStep) -> Result<()> {
        let observed = ctx.observe(&self.component_name).await?;
        let expected = step.expected();

        match observed.deployment.pull_policy {
            Some(actual) if actual == expected => {
                info!(
                    namespace = ctx.namespace(),
                    name = %self.component_name,
                    step = %step,
                    policy = %actual,
                    "Pull policy verified"
                );
                Ok(())
            }
            Some(actual) => Err(Error::Verification(format!(
                "pull policy of {} is {}, expected {}",
                self.component_name, actual, expected
            ))),
            None => Err(Error::Verification(format!(
                "pull policy of {} is unset, expected {}",
                self.component_name, expected
            ))),
        }
    }
}

#[async_trait]
impl Scenario for PullPolicyScenario {
    fn name(&self) -> &'static str {
        SCENARIO
    }

    async fn run(&self, client: Arc<dyn ResourceClient>, config: HarnessConfig) -> ScenarioReport {
        let this = self.clone();
        let scoped = TestContext::scoped(client, config, move |ctx| {
            async move { this.steps(ctx).await }.boxed()
        })
        .await;

        ScenarioReport::from_scoped(SCENARIO, scoped)
    }
}
