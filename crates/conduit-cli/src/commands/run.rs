use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};

use conduit_engine::config::{load_config, RuntimeConfig};
use conduit_engine::{InMemoryMetrics, LocalRuntime, MetricsSink, ModuleCatalog, StageState};

/// Time allowed for agents to reach the requested state.
const SETTLE_TIMEOUT: Duration = Duration::from_secs(10);

/// Execute the `run` command: deploy on local agents, run, undeploy, report.
pub async fn execute(
    stream: &str,
    group: Option<&str>,
    config_path: Option<&Path>,
    duration_secs: u64,
) -> Result<()> {
    let config = match config_path {
        Some(path) => load_config(path)?,
        None => RuntimeConfig::default(),
    };

    let metrics = Arc::new(InMemoryMetrics::new());
    let runtime = LocalRuntime::start(
        &config,
        Arc::new(ModuleCatalog::builtin()),
        Arc::clone(&metrics) as Arc<dyn MetricsSink>,
    )?;

    let stages = runtime
        .deploy(stream, group)
        .await
        .context("Failed to deploy stream")?;
    let group = stages
        .first()
        .map(|d| d.group.clone())
        .unwrap_or_default();

    if !runtime
        .wait_for(&stages, StageState::Deployed, SETTLE_TIMEOUT)
        .await
    {
        for agent in runtime.agents() {
            for (key, record) in agent.stages() {
                if let Some(err) = record.last_error {
                    eprintln!("  {key} on {}: {err}", agent.id());
                }
            }
        }
        runtime.undeploy(&stages).await?;
        runtime.shutdown().await;
        anyhow::bail!("Stream '{group}' did not fully deploy");
    }

    println!("Stream '{group}' deployed ({} stages).", stages.len());
    tokio::select! {
        () = tokio::time::sleep(Duration::from_secs(duration_secs)) => {}
        res = tokio::signal::ctrl_c() => res.context("Failed to listen for ctrl-c")?,
    }

    runtime.undeploy(&stages).await?;
    if !runtime
        .wait_for(&stages, StageState::Undeployed, SETTLE_TIMEOUT)
        .await
    {
        tracing::warn!(group = %group, "Timed out waiting for undeploy");
    }
    runtime.shutdown().await;

    println!("Stream '{group}' undeployed.");
    for (name, value) in metrics.snapshot() {
        println!("  {name:<40} {value}");
    }
    Ok(())
}
