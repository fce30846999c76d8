// Test code is allowed to panic on failure
#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::indexing_slicing,
    clippy::panic,
    clippy::string_slice
)]

//! Property-based tests for the poller and the cleanup stack
//!
//! These tests use proptest to generate random budgets and task counts and
//! verify that:
//! 1. A condition that becomes true inside the budget is always detected, at
//!    exactly the evaluation where it became true
//! 2. A condition that never becomes true times out at the deadline, never
//!    before and never after, with the advertised number of evaluations
//! 3. Cleanup always runs in exact reverse registration order, with the
//!    namespace deletion last
//! 4. The effective pull policy is the declared one, or the platform default

#[path = "../common/mod.rs"]
mod common;

use std::future::Future;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use proptest::prelude::*;
use tokio::time::Instant;

use runtime_e2e::{Error, PollConfig, ProbeError, PullPolicy, ResourceClient, TestContext};

use common::*;

// =============================================================================
// Helpers
// =============================================================================

/// Run a future on a current-thread runtime with paused time
fn block_on_paused<F: Future>(future: F) -> F::Output {
    tokio::runtime::Builder::new_current_thread()
        .enable_time()
        .start_paused(true)
        .build()
        .unwrap()
        .block_on(future)
}

fn poll_config(interval_ms: u64, timeout_ms: u64) -> PollConfig {
    PollConfig::new(
        Duration::from_millis(interval_ms),
        Duration::from_millis(timeout_ms),
    )
    .unwrap()
}

fn pull_policy_strategy() -> impl Strategy<Value = Option<PullPolicy>> {
    prop_oneof![
        Just(None),
        Just(Some(PullPolicy::Always)),
        Just(Some(PullPolicy::Never)),
        Just(Some(PullPolicy::IfNotPresent)),
    ]
}

// =============================================================================
// Poller properties
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// Condition true at evaluation `n` is detected at evaluation `n`
    #[test]
    fn condition_detected_within_budget(
        interval_ms in 1u64..100,
        multiple in 2u64..20,
        true_at_seed in any::<u64>(),
    ) {
        let cfg = poll_config(interval_ms, interval_ms * multiple);
        let true_at = (true_at_seed % (multiple + 1)) as u32 + 1;

        let (result, calls, elapsed) = block_on_paused(async move {
            let calls = Arc::new(AtomicU32::new(0));
            let counter = calls.clone();
            let start = Instant::now();
            let result = runtime_e2e::wait_until(&cfg, "property", || {
                let counter = counter.clone();
                async move { Ok(counter.fetch_add(1, Ordering::SeqCst) + 1 >= true_at) }
            })
            .await;
            (result, calls.load(Ordering::SeqCst), start.elapsed())
        });

        prop_assert!(result.is_ok());
        prop_assert_eq!(calls, true_at);
        prop_assert_eq!(
            elapsed,
            Duration::from_millis(interval_ms * u64::from(true_at - 1))
        );
    }

    /// A condition that never holds times out exactly at the deadline
    #[test]
    fn never_true_times_out_at_deadline(
        interval_ms in 1u64..100,
        extra_ms in 1u64..2000,
    ) {
        let cfg = poll_config(interval_ms, interval_ms + extra_ms);

        let (result, elapsed) = block_on_paused(async move {
            let start = Instant::now();
            let result = runtime_e2e::wait_until(&cfg, "property", || async { Ok(false) }).await;
            (result, start.elapsed())
        });

        prop_assert_eq!(elapsed, cfg.timeout);
        match result {
            Err(Error::Timeout { attempts, last_error, .. }) => {
                prop_assert_eq!(attempts, cfg.max_attempts());
                prop_assert!(last_error.is_none());
            }
            other => prop_assert!(false, "expected timeout, got {:?}", other),
        }
    }

    /// The most recent transient error is attached to the timeout
    #[test]
    fn transient_errors_surface_in_timeout(
        interval_ms in 1u64..50,
        multiple in 2u64..10,
    ) {
        let cfg = poll_config(interval_ms, interval_ms * multiple);

        let result = block_on_paused(async move {
            runtime_e2e::wait_until(&cfg, "property", || async {
                Err::<bool, _>(ProbeError::transient(Error::not_found("Deployment", "missing")))
            })
            .await
        });

        match result {
            Err(Error::Timeout { last_error: Some(e), .. }) => prop_assert!(e.is_not_found()),
            other => prop_assert!(false, "expected timeout with last error, got {:?}", other),
        }
    }

    /// A fatal error ends the wait at the first evaluation
    #[test]
    fn fatal_error_stops_immediately(
        interval_ms in 1u64..100,
        multiple in 2u64..20,
    ) {
        let cfg = poll_config(interval_ms, interval_ms * multiple);

        let (result, elapsed) = block_on_paused(async move {
            let start = Instant::now();
            let result = runtime_e2e::wait_until(&cfg, "property", || async {
                Err::<bool, _>(ProbeError::fatal(Error::MalformedResponse("bad".to_string())))
            })
            .await;
            (result, start.elapsed())
        });

        prop_assert!(matches!(result, Err(Error::MalformedResponse(_))));
        prop_assert_eq!(elapsed, Duration::ZERO);
    }
}

// =============================================================================
// Cleanup ordering properties
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    /// Any number of tasks unwinds newest-first, the namespace last
    #[test]
    fn cleanup_is_reverse_registration_order(count in 0usize..20) {
        let (order, completed, namespaces_left) = block_on_paused(async move {
            let cluster = FakeCluster::new(Behavior::default());
            let client: Arc<dyn ResourceClient> = cluster.clone();
            let mut ctx = TestContext::new(client, test_config()).await.unwrap();
            let order = Arc::new(Mutex::new(Vec::new()));

            for i in 0..count {
                let order = order.clone();
                ctx.register_cleanup(format!("task-{}", i), move || async move {
                    order.lock().unwrap().push(i);
                    Ok(())
                });
            }

            let report = ctx.cleanup().await;
            let order = order.lock().unwrap().clone();
            (order, report.completed, cluster.namespaces().len())
        });

        let expected: Vec<usize> = (0..count).rev().collect();
        prop_assert_eq!(order, expected);
        prop_assert_eq!(completed.len(), count + 1);
        prop_assert!(completed[count].starts_with("delete namespace"));
        prop_assert_eq!(namespaces_left, 0);
    }

    /// Failing tasks never prevent the remaining ones from running
    #[test]
    fn cleanup_survives_failures(failing in proptest::collection::vec(any::<bool>(), 0..12)) {
        let expected_failures = failing.iter().filter(|f| **f).count();
        let total = failing.len();

        let (ran, failures, namespaces_left) = block_on_paused(async move {
            let cluster = FakeCluster::new(Behavior::default());
            let client: Arc<dyn ResourceClient> = cluster.clone();
            let mut ctx = TestContext::new(client, test_config()).await.unwrap();
            let ran = Arc::new(AtomicU32::new(0));

            for (i, fail) in failing.into_iter().enumerate() {
                let ran = ran.clone();
                ctx.register_cleanup(format!("task-{}", i), move || async move {
                    ran.fetch_add(1, Ordering::SeqCst);
                    if fail {
                        Err(Error::MalformedResponse(format!("task {} failed", i)))
                    } else {
                        Ok(())
                    }
                });
            }

            let report = ctx.cleanup().await;
            (
                ran.load(Ordering::SeqCst) as usize,
                report.failures.len(),
                cluster.namespaces().len(),
            )
        });

        prop_assert_eq!(ran, total);
        prop_assert_eq!(failures, expected_failures);
        prop_assert_eq!(namespaces_left, 0);
    }
}

// =============================================================================
// Pull policy properties
// =============================================================================

proptest! {
    #[test]
    fn effective_policy_defaults_only_when_unset(declared in pull_policy_strategy()) {
        let effective = PullPolicy::effective(declared);
        match declared {
            Some(policy) => prop_assert_eq!(effective, policy),
            None => prop_assert_eq!(effective, PullPolicy::PLATFORM_DEFAULT),
        }
    }
}
