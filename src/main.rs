use std::process::ExitCode;
use std::sync::Arc;

use tracing::{error, info, warn};

use runtime_e2e::{HarnessConfig, KubeClient, ResourceClient, default_scenarios, run_all};

#[tokio::main]
async fn main() -> Result<ExitCode, Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("runtime_e2e=info".parse()?)
                .add_directive("kube=warn".parse()?),
        )
        .init();

    info!("Starting runtime-component e2e run");

    let config = HarnessConfig::from_env();
    config.validate()?;

    let client: Arc<dyn ResourceClient> = Arc::new(KubeClient::try_default().await?);
    info!("Connected to Kubernetes cluster");

    // Optional filter: run only the named scenarios
    let selected: Vec<String> = std::env::args().skip(1).collect();
    let scenarios: Vec<_> = default_scenarios()
        .into_iter()
        .filter(|s| selected.is_empty() || selected.iter().any(|name| name == s.name()))
        .collect();

    if scenarios.is_empty() {
        warn!(requested = ?selected, "No matching scenarios");
        return Ok(ExitCode::FAILURE);
    }

    let reports = run_all(&scenarios, client, &config, config.parallel).await;

    let mut failed = 0;
    for report in &reports {
        match &report.result {
            Ok(outcome) => info!(scenario = report.scenario, outcome = ?outcome, "Finished"),
            Err(failure) => {
                failed += 1;
                error!(scenario = report.scenario, "{}", failure);
            }
        }
        for leak in &report.cleanup.failures {
            warn!(
                scenario = report.scenario,
                task = %leak.label,
                error = %leak.message,
                "Cleanup did not complete"
            );
        }
    }

    let skipped = reports.iter().filter(|r| r.skipped()).count();
    info!(
        total = reports.len(),
        failed,
        skipped,
        "e2e run complete"
    );

    Ok(if failed == 0 {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}
