//! Single-process runtime: several container agents sharing one in-memory
//! deployment channel, wiring registry and claim store.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use conduit_state::{AgentId, ClaimStore, InMemoryClaimStore, SqliteClaimStore};
use conduit_types::{resolve, Action, StageDescriptor};

use crate::agent::{AgentResources, ContainerAgent, StageState};
use crate::catalog::ModuleCatalog;
use crate::channel::{publish_topology, DeploymentChannel, InMemoryDeploymentChannel};
use crate::config::{ClaimBackend, ClaimsConfig, RuntimeConfig};
use crate::error::DeploymentError;
use crate::metrics::MetricsSink;
use crate::retry::RetryPolicy;
use crate::wiring::WiringRegistry;

/// Open the claim store selected by `config`.
///
/// # Errors
///
/// Returns an error if the `SQLite` database cannot be opened.
pub fn create_claim_store(config: &ClaimsConfig) -> Result<Arc<dyn ClaimStore>> {
    match (config.backend, &config.path) {
        (ClaimBackend::Memory, _) => Ok(Arc::new(InMemoryClaimStore::new())),
        (ClaimBackend::Sqlite, Some(path)) => {
            let store = SqliteClaimStore::open(path)
                .with_context(|| format!("Failed to open claim store: {}", path.display()))?;
            Ok(Arc::new(store))
        }
        (ClaimBackend::Sqlite, None) => anyhow::bail!("claims.path is required for the sqlite backend"),
    }
}

/// Agents, channel and registry for running streams inside one process.
pub struct LocalRuntime {
    channel: Arc<InMemoryDeploymentChannel>,
    wiring: Arc<WiringRegistry>,
    agents: Vec<ContainerAgent>,
    retry: RetryPolicy,
}

impl LocalRuntime {
    /// Start `config.agents` agents. Must be called from within a Tokio
    /// runtime.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid or the claim store
    /// cannot be opened.
    pub fn start(
        config: &RuntimeConfig,
        catalog: Arc<ModuleCatalog>,
        metrics: Arc<dyn MetricsSink>,
    ) -> Result<Self> {
        crate::config::validate_config(config)?;
        let claims = create_claim_store(&config.claims)?;
        let channel = Arc::new(InMemoryDeploymentChannel::new());
        let wiring = Arc::new(WiringRegistry::new(config.data_channel_capacity));
        let retry = config.retry.policy();

        let resources = AgentResources {
            claims,
            catalog,
            wiring: Arc::clone(&wiring),
            metrics,
            retry,
        };
        let agents = (0..config.agents)
            .map(|_| {
                ContainerAgent::start(AgentId::generate(), resources.clone(), channel.subscribe())
            })
            .collect();

        tracing::info!(agents = config.agents, backend = ?config.claims.backend, "Local runtime started");
        Ok(Self {
            channel,
            wiring,
            agents,
            retry,
        })
    }

    #[must_use]
    pub fn agents(&self) -> &[ContainerAgent] {
        &self.agents
    }

    #[must_use]
    pub fn wiring(&self) -> &WiringRegistry {
        &self.wiring
    }

    #[must_use]
    pub fn channel(&self) -> &InMemoryDeploymentChannel {
        &self.channel
    }

    /// Resolve `stream` and publish a deploy request for each stage.
    ///
    /// # Errors
    ///
    /// [`DeploymentError::Topology`] for an invalid description, or a
    /// publish failure from [`publish_topology`].
    pub async fn deploy(
        &self,
        stream: &str,
        group: Option<&str>,
    ) -> Result<Vec<StageDescriptor>, DeploymentError> {
        let descriptors = resolve(stream, group)?;
        publish_topology(self.channel.as_ref(), &descriptors, Action::Deploy, &self.retry).await?;
        Ok(descriptors)
    }

    /// Publish an undeploy request for each stage.
    ///
    /// # Errors
    ///
    /// A publish failure from [`publish_topology`].
    pub async fn undeploy(&self, descriptors: &[StageDescriptor]) -> Result<(), DeploymentError> {
        publish_topology(self.channel.as_ref(), descriptors, Action::Undeploy, &self.retry).await?;
        Ok(())
    }

    /// Wait until every stage is in `state` on some agent (or, for
    /// [`StageState::Undeployed`], on all of them).
    pub async fn wait_for(
        &self,
        descriptors: &[StageDescriptor],
        state: StageState,
        timeout: Duration,
    ) -> bool {
        let check = || {
            descriptors.iter().all(|d| {
                let key = d.key();
                if state == StageState::Undeployed {
                    self.agents.iter().all(|a| a.stage_state(&key) == state)
                } else {
                    self.agents.iter().any(|a| a.stage_state(&key) == state)
                }
            })
        };
        tokio::time::timeout(timeout, async {
            while !check() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .is_ok()
    }

    /// Shut every agent down, undeploying whatever it still runs.
    pub async fn shutdown(self) {
        for agent in self.agents {
            agent.shutdown().await;
        }
        tracing::info!(
            published = self.channel.published(),
            "Local runtime stopped"
        );
    }
}
