//! Knative toggle lifecycle: enabled → re-enabled → disabled
//!
//! Only runs where Knative Serving is installed. Applying the toggle again
//! while it is already on must leave exactly one Knative Service. After
//! switching the toggle off, the plain Deployment must come up and the
//! Knative Service must be gone by the time it does.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use futures::FutureExt;
use tracing::info;

use super::{
    DeploymentKind, Scenario, ScenarioOutcome, ScenarioReport, StepError, require_knative,
    verify_single_knative_service, wait_for_deployment, wait_for_operator,
};
use crate::client::ResourceClient;
use crate::config::HarnessConfig;
use crate::context::{CleanupReport, TestContext};
use crate::crd::RuntimeComponentSpec;
use crate::error::{Error, Result};
use crate::fixtures::RuntimeComponentBuilder;

const SCENARIO: &str = "knative-toggle";

/// Name of the component the scenario creates
pub const DEFAULT_COMPONENT_NAME: &str = "example-runtime-knative";

/// Toggle position at each point of the lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KnativeStep {
    /// Component created with `createKnativeService: true`
    Enable,
    /// Toggle applied as `true` again while already enabled
    Reenable,
    /// Toggle switched to `false`
    Disable,
}

impl KnativeStep {
    pub const SEQUENCE: [KnativeStep; 3] = [
        KnativeStep::Enable,
        KnativeStep::Reenable,
        KnativeStep::Disable,
    ];

    pub fn knative_enabled(&self) -> bool {
        matches!(self, KnativeStep::Enable | KnativeStep::Reenable)
    }
}

impl fmt::Display for KnativeStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KnativeStep::Enable => write!(f, "Enable"),
            KnativeStep::Reenable => write!(f, "Reenable"),
            KnativeStep::Disable => write!(f, "Disable"),
        }
    }
}

/// Drives a component from Knative serving back to a plain Deployment
#[derive(Clone, Debug)]
pub struct KnativeToggleScenario {
    component_name: String,
    replicas: i32,
}

impl Default for KnativeToggleScenario {
    fn default() -> Self {
        Self {
            component_name: DEFAULT_COMPONENT_NAME.to_string(),
            replicas: 1,
        }
    }
}

impl KnativeToggleScenario {
    pub fn with_component_name(mut self, name: &str) -> Self {
        self.component_name = name.to_string();
        self
    }

    async fn steps(&self, ctx: &mut TestContext) -> Result<ScenarioOutcome, StepError> {
        wait_for_operator(ctx)
            .await
            .map_err(|e| StepError::new("operator ready", e))?;

        for step in KnativeStep::SEQUENCE {
            info!(
                namespace = ctx.namespace(),
                name = %self.component_name,
                step = %step,
                "Applying knative toggle step"
            );

            let result = match step {
                KnativeStep::Enable => self.enable(ctx).await,
                KnativeStep::Reenable => self.reenable(ctx).await,
                KnativeStep::Disable => self.disable(ctx).await,
            };
            result.map_err(|e| StepError::new(step, e))?;
        }

        Ok(ScenarioOutcome::Passed)
    }

    async fn enable(&self, ctx: &mut TestContext) -> Result<()> {
        let component = RuntimeComponentBuilder::new(&self.component_name, ctx.namespace())
            .with_image(&ctx.config().application_image)
            .with_replicas(self.replicas)
            .with_knative(true)
            .build();
        ctx.create(&component).await?;

        wait_for_deployment(ctx, &self.component_name, DeploymentKind::Knative, 1).await?;
        verify_single_knative_service(ctx, &self.component_name).await
    }

    async fn reenable(&self, ctx: &mut TestContext) -> Result<()> {
        ctx.update(&self.component_name, &|spec: &mut RuntimeComponentSpec| {
            spec.create_knative_service = Some(true);
        })
        .await?;

        wait_for_deployment(ctx, &self.component_name, DeploymentKind::Knative, 1).await?;
        verify_single_knative_service(ctx, &self.component_name).await
    }

    async fn disable(&self, ctx: &mut TestContext) -> Result<()> {
        ctx.update(&self.component_name, &|spec: &mut RuntimeComponentSpec| {
            spec.create_knative_service = Some(false);
        })
        .await?;

        wait_for_deployment(
            ctx,
            &self.component_name,
            DeploymentKind::Plain,
            self.replicas,
        )
        .await?;

        // Checked once: the Service must already be gone when the plain
        // Deployment is ready
        if ctx
            .client()
            .knative_service_exists(ctx.namespace(), &self.component_name)
            .await?
        {
            return Err(Error::Verification("knative service not deleted".to_string()));
        }

        info!(
            namespace = ctx.namespace(),
            name = %self.component_name,
            "Knative service removed after disabling"
        );
        Ok(())
    }
}

#[async_trait]
impl Scenario for KnativeToggleScenario {
    fn name(&self) -> &'static str {
        SCENARIO
    }

    async fn run(&self, client: Arc<dyn ResourceClient>, config: HarnessConfig) -> ScenarioReport {
        // Capability probe happens before any namespace is created
        match require_knative(client.as_ref(), &config).await {
            Ok(()) => {}
            Err(Error::PreconditionUnmet(reason)) => {
                info!(
                    scenario = SCENARIO,
                    "Knative is not installed on this cluster, skipping"
                );
                return ScenarioReport::from_scoped(
                    SCENARIO,
                    (
                        Ok(ScenarioOutcome::Skipped { reason }),
                        CleanupReport::default(),
                    ),
                );
            }
            Err(e) => {
                return ScenarioReport::from_scoped(
                    SCENARIO,
                    (
                        Err(StepError::new("knative installed", e)),
                        CleanupReport::default(),
                    ),
                );
            }
        }

        let this = self.clone();
        let scoped = TestContext::scoped(client, config, move |ctx| {
            async move { this.steps(ctx).await }.boxed()
        })
        .await;

        ScenarioReport::from_scoped(SCENARIO, scoped)
    }
}
