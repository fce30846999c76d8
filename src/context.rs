//! Namespace-scoped test context with a LIFO cleanup stack
//!
//! A [`TestContext`] owns one freshly created namespace. Every resource
//! created through it registers a cleanup task; [`TestContext::cleanup`] runs
//! the tasks newest-first and keeps going past failures, so the namespace
//! deletion registered at construction always runs last.

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use futures::future::BoxFuture;
use kube::ResourceExt;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::client::{ObservedState, ResourceClient, SpecMutation};
use crate::config::HarnessConfig;
use crate::crd::RuntimeComponent;
use crate::error::{Error, Result};
use crate::poll;

/// One registered teardown action
pub struct CleanupTask {
    index: usize,
    label: String,
    action: Box<dyn FnOnce() -> BoxFuture<'static, Result<()>> + Send + Sync>,
}

impl CleanupTask {
    /// Registration order, starting at 0 for the namespace itself
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn label(&self) -> &str {
        &self.label
    }
}

impl std::fmt::Debug for CleanupTask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CleanupTask")
            .field("index", &self.index)
            .field("label", &self.label)
            .finish()
    }
}

/// A cleanup task that did not complete
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CleanupFailure {
    pub index: usize,
    pub label: String,
    pub message: String,
}

/// What happened during teardown, in execution order
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CleanupReport {
    /// Labels of tasks that completed (or found their target already gone)
    pub completed: Vec<String>,
    pub failures: Vec<CleanupFailure>,
}

impl CleanupReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Run tasks newest-first, collecting failures instead of stopping on them
async fn run_cleanup(namespace: &str, mut tasks: Vec<CleanupTask>) -> CleanupReport {
    let mut report = CleanupReport::default();

    while let Some(task) = tasks.pop() {
        let CleanupTask {
            index,
            label,
            action,
        } = task;

        // The factory runs inside the guard too, so a panic while building
        // the future is caught like one raised while polling it
        match AssertUnwindSafe(async move { action().await })
            .catch_unwind()
            .await
        {
            Ok(Ok(())) => {
                debug!(namespace, index, task = %label, "Cleanup task completed");
                report.completed.push(label);
            }
            Ok(Err(e)) if e.is_not_found() => {
                debug!(namespace, index, task = %label, "Cleanup target already gone");
                report.completed.push(label);
            }
            Ok(Err(e)) => {
                warn!(namespace, index, task = %label, error = %e, "Cleanup task failed");
                report.failures.push(CleanupFailure {
                    index,
                    label,
                    message: e.to_string(),
                });
            }
            Err(_) => {
                warn!(namespace, index, task = %label, "Cleanup task panicked");
                report.failures.push(CleanupFailure {
                    index,
                    label,
                    message: "cleanup task panicked".to_string(),
                });
            }
        }
    }

    report
}

/// Test-scoped namespace plus the cleanup stack for everything created in it
pub struct TestContext {
    client: Arc<dyn ResourceClient>,
    config: HarnessConfig,
    namespace: String,
    tasks: Vec<CleanupTask>,
    next_index: usize,
}

impl TestContext {
    /// Create a unique namespace `{prefix}-{uuid8}` and an empty cleanup stack
    ///
    /// Deleting the namespace is registered as the first task, so it runs last.
    pub async fn new(client: Arc<dyn ResourceClient>, config: HarnessConfig) -> Result<Self> {
        let suffix = &Uuid::new_v4().to_string()[..8];
        let namespace = format!("{}-{}", config.namespace_prefix, suffix);

        client.create_namespace(&namespace).await?;

        let mut ctx = Self {
            client,
            config,
            namespace,
            tasks: Vec::new(),
            next_index: 0,
        };

        let client = ctx.client.clone();
        let ns = ctx.namespace.clone();
        ctx.register_cleanup(format!("delete namespace {}", ns), move || async move {
            client.delete_namespace(&ns).await
        });

        Ok(ctx)
    }

    /// Run `body` inside a fresh context and always tear it down afterwards
    ///
    /// Cleanup runs on success, on error, and when `body` panics (the panic is
    /// resumed once teardown finishes). The cleanup report is returned next to
    /// the body's result.
    pub async fn scoped<T, E, F>(
        client: Arc<dyn ResourceClient>,
        config: HarnessConfig,
        body: F,
    ) -> (std::result::Result<T, E>, CleanupReport)
    where
        E: From<Error>,
        F: for<'a> FnOnce(&'a mut TestContext) -> BoxFuture<'a, std::result::Result<T, E>>,
    {
        let mut ctx = match TestContext::new(client, config).await {
            Ok(ctx) => ctx,
            Err(e) => return (Err(E::from(e)), CleanupReport::default()),
        };

        let outcome = AssertUnwindSafe(body(&mut ctx)).catch_unwind().await;
        let report = ctx.cleanup().await;

        match outcome {
            Ok(result) => (result, report),
            Err(panic) => std::panic::resume_unwind(panic),
        }
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn client(&self) -> Arc<dyn ResourceClient> {
        self.client.clone()
    }

    pub fn config(&self) -> &HarnessConfig {
        &self.config
    }

    /// Labels of pending cleanup tasks in registration order
    pub fn pending_cleanups(&self) -> Vec<&str> {
        self.tasks.iter().map(|t| t.label.as_str()).collect()
    }

    /// Push a teardown action; returns its registration index
    pub fn register_cleanup<F, Fut>(&mut self, label: impl Into<String>, action: F) -> usize
    where
        F: FnOnce() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        let index = self.next_index;
        self.next_index += 1;
        self.tasks.push(CleanupTask {
            index,
            label: label.into(),
            action: Box::new(move || action().boxed()),
        });
        index
    }

    /// Create a component in this namespace and register its deletion
    ///
    /// The cleanup deletes the component and waits (cleanup poll budget) until
    /// it is gone. A component that is already absent counts as cleaned up.
    pub async fn create(&mut self, component: &RuntimeComponent) -> Result<()> {
        let name = component.name_any();
        self.client.create(&self.namespace, component).await?;

        let client = self.client.clone();
        let ns = self.namespace.clone();
        let cfg = self.config.cleanup_poll();
        self.register_cleanup(
            format!("delete RuntimeComponent {}/{}", ns, name),
            move || async move {
                match client.delete(&ns, &name).await {
                    Ok(()) => {}
                    Err(e) if e.is_not_found() => return Ok(()),
                    Err(e) => return Err(e),
                }
                let what = format!("RuntimeComponent {}/{} to be deleted", ns, name);
                poll::wait_until(&cfg, &what, || {
                    let client = client.clone();
                    let ns = ns.clone();
                    let name = name.clone();
                    async move { Ok(!client.exists(&ns, &name).await?) }
                })
                .await
            },
        );

        Ok(())
    }

    /// Read-modify-write a component in this namespace
    pub async fn update(&self, name: &str, mutate: SpecMutation<'_>) -> Result<()> {
        self.client.update(&self.namespace, name, mutate).await
    }

    /// Read the derived state of a component in this namespace
    pub async fn observe(&self, name: &str) -> Result<ObservedState> {
        self.client.get(&self.namespace, name).await
    }

    /// Tear down everything registered so far, newest first
    ///
    /// Never fails: individual failures are logged and reported. Calling it
    /// again after it ran is a no-op.
    pub async fn cleanup(&mut self) -> CleanupReport {
        if self.tasks.is_empty() {
            return CleanupReport::default();
        }

        let tasks = std::mem::take(&mut self.tasks);
        info!(
            namespace = %self.namespace,
            tasks = tasks.len(),
            "Cleaning up test context"
        );

        let report = run_cleanup(&self.namespace, tasks).await;
        if !report.is_clean() {
            warn!(
                namespace = %self.namespace,
                failures = report.failures.len(),
                "Cleanup finished with failures"
            );
        }
        report
    }
}

impl Drop for TestContext {
    fn drop(&mut self) {
        if self.tasks.is_empty() {
            return;
        }

        let tasks = std::mem::take(&mut self.tasks);
        let namespace = self.namespace.clone();
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                warn!(
                    namespace = %namespace,
                    tasks = tasks.len(),
                    "TestContext dropped before cleanup, tearing down in background"
                );
                handle.spawn(async move {
                    run_cleanup(&namespace, tasks).await;
                });
            }
            Err(_) => {
                warn!(
                    namespace = %namespace,
                    tasks = tasks.len(),
                    "TestContext dropped outside a runtime, resources were not cleaned up"
                );
            }
        }
    }
}
