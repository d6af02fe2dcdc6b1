//! Container agent: consumes deployment requests and runs the stages it wins.
//!
//! Every agent sees every request. For a deploy, the agent races the others
//! on the claim store; the winner instantiates the module, attaches its data
//! channel ends and spawns a stage driver. Losers drop the request without
//! touching local state.
//!
//! Per stage the agent moves through
//!
//! ```text
//! UNDEPLOYED -> DEPLOYING -> DEPLOYED -> UNDEPLOYING -> UNDEPLOYED
//!                   \-> FAILED
//! ```
//!
//! Requests for one group are handled by a single worker task, in arrival
//! order, so an undeploy received while a deploy is in flight waits for it.
//! Different groups progress independently. A worker retires once the agent
//! holds no stage of its group and nothing is queued for it.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use conduit_state::{AgentId, ClaimStore};
use conduit_types::{Action, DeploymentRequest, StageDescriptor, StageKey, StageType};
use dashmap::DashMap;
use serde::Serialize;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::catalog::{Module, ModuleCatalog};
use crate::channel::Subscription;
use crate::error::{DeploymentError, WiringError};
use crate::metrics::{stage_metric, MetricsSink};
use crate::retry::RetryPolicy;
use crate::wiring::{InboundEnd, OutboundEnd, WiringRegistry};

// ---------------------------------------------------------------------------
// Public model
// ---------------------------------------------------------------------------

/// Lifecycle state of one stage on one agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StageState {
    Undeployed,
    Deploying,
    Deployed,
    Undeploying,
    Failed,
}

impl fmt::Display for StageState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Undeployed => "UNDEPLOYED",
            Self::Deploying => "DEPLOYING",
            Self::Deployed => "DEPLOYED",
            Self::Undeploying => "UNDEPLOYING",
            Self::Failed => "FAILED",
        })
    }
}

/// Result of handling one deployment request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// The stage is now running on this agent.
    Deployed,
    /// The stage was already running here; nothing changed.
    AlreadyDeployed,
    /// Another agent owns the stage; the request was dropped.
    ClaimLost,
    /// The module could not be instantiated or wired. Carries the diagnostic.
    Failed(String),
    /// The stage was stopped and its claim released.
    Undeployed,
    /// Nothing to undeploy on this agent.
    NotDeployed,
}

/// What an agent knows about a stage it has claimed.
#[derive(Debug, Clone, Serialize)]
pub struct StageRecord {
    pub descriptor: StageDescriptor,
    pub state: StageState,
    pub last_error: Option<String>,
}

// ---------------------------------------------------------------------------
// Agent
// ---------------------------------------------------------------------------

/// Collaborators shared by every agent in a process.
#[derive(Clone)]
pub struct AgentResources {
    pub claims: Arc<dyn ClaimStore>,
    pub catalog: Arc<ModuleCatalog>,
    pub wiring: Arc<WiringRegistry>,
    pub metrics: Arc<dyn MetricsSink>,
    pub retry: RetryPolicy,
}

struct Command {
    request: DeploymentRequest,
    reply: Option<oneshot::Sender<Result<Outcome, DeploymentError>>>,
}

/// A running stage: its driver task and the channel ends it holds.
struct RunningStage {
    cancel: CancellationToken,
    driver: JoinHandle<()>,
    inbound: bool,
    /// Index of the downstream channel this stage produces into.
    outbound: Option<u32>,
}

struct AgentInner {
    id: AgentId,
    resources: AgentResources,
    stages: DashMap<StageKey, StageRecord>,
    running: DashMap<StageKey, RunningStage>,
    workers: DashMap<String, mpsc::UnboundedSender<Command>>,
    changes: watch::Sender<u64>,
    /// Parent of every stage driver token.
    drivers: CancellationToken,
}

/// Container agent handle.
pub struct ContainerAgent {
    inner: Arc<AgentInner>,
    stop_dispatch: CancellationToken,
    dispatcher: Option<JoinHandle<()>>,
}

impl fmt::Debug for ContainerAgent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContainerAgent")
            .field("id", &self.inner.id)
            .field("stages", &self.inner.stages.len())
            .finish_non_exhaustive()
    }
}

impl ContainerAgent {
    /// Create an agent that is only driven through [`apply`](Self::apply).
    #[must_use]
    pub fn new(id: AgentId, resources: AgentResources) -> Self {
        let (changes, _) = watch::channel(0);
        Self {
            inner: Arc::new(AgentInner {
                id,
                resources,
                stages: DashMap::new(),
                running: DashMap::new(),
                workers: DashMap::new(),
                changes,
                drivers: CancellationToken::new(),
            }),
            stop_dispatch: CancellationToken::new(),
            dispatcher: None,
        }
    }

    /// Create an agent and start consuming `subscription`.
    ///
    /// Must be called from within a Tokio runtime.
    #[must_use]
    pub fn start(id: AgentId, resources: AgentResources, subscription: Subscription) -> Self {
        let mut agent = Self::new(id, resources);
        let inner = Arc::clone(&agent.inner);
        let stop = agent.stop_dispatch.clone();
        agent.dispatcher = Some(tokio::spawn(dispatch(inner, subscription, stop)));
        tracing::info!(agent = %agent.inner.id, "Container agent started");
        agent
    }

    #[must_use]
    pub fn id(&self) -> &AgentId {
        &self.inner.id
    }

    /// Number of live per-group workers.
    #[must_use]
    pub fn worker_count(&self) -> usize {
        self.inner.workers.len()
    }

    /// Handle one request and wait for its outcome.
    ///
    /// The request goes through the same per-group worker as requests
    /// arriving on the deployment channel.
    ///
    /// # Errors
    ///
    /// [`DeploymentError::State`] when the claim store keeps failing and
    /// [`DeploymentError::AgentStopped`] after shutdown.
    pub async fn apply(&self, request: DeploymentRequest) -> Result<Outcome, DeploymentError> {
        let (reply, rx) = oneshot::channel();
        route(
            &self.inner,
            Command {
                request,
                reply: Some(reply),
            },
        )?;
        rx.await.map_err(|_| DeploymentError::AgentStopped)?
    }

    /// Current state of `key` on this agent.
    #[must_use]
    pub fn stage_state(&self, key: &StageKey) -> StageState {
        self.inner
            .stages
            .get(key)
            .map_or(StageState::Undeployed, |r| r.state)
    }

    #[must_use]
    pub fn stage(&self, key: &StageKey) -> Option<StageRecord> {
        self.inner.stages.get(key).map(|r| r.clone())
    }

    /// Every stage this agent holds, by key.
    #[must_use]
    pub fn stages(&self) -> BTreeMap<StageKey, StageRecord> {
        self.inner
            .stages
            .iter()
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect()
    }

    /// Wait until `key` reaches `state` on this agent. Returns `false` on
    /// timeout.
    pub async fn wait_for_state(&self, key: &StageKey, state: StageState, timeout: Duration) -> bool {
        let mut changes = self.inner.changes.subscribe();
        tokio::time::timeout(timeout, async {
            loop {
                if self.stage_state(key) == state {
                    return;
                }
                if changes.changed().await.is_err() {
                    return;
                }
            }
        })
        .await
        .is_ok()
            && self.stage_state(key) == state
    }

    /// Stop consuming requests, undeploy every held stage and release its
    /// claims.
    pub async fn shutdown(mut self) {
        self.stop_dispatch.cancel();
        if let Some(dispatcher) = self.dispatcher.take() {
            if let Err(e) = dispatcher.await {
                tracing::warn!(agent = %self.inner.id, error = %e, "Dispatcher task failed");
            }
        }

        let held: Vec<StageDescriptor> = self
            .inner
            .stages
            .iter()
            .map(|e| e.value().descriptor.clone())
            .collect();
        for descriptor in held {
            let key = descriptor.key();
            if let Err(e) = self.apply(DeploymentRequest::undeploy(descriptor)).await {
                tracing::warn!(agent = %self.inner.id, stage = %key, error = %e, "Undeploy during shutdown failed");
            }
        }

        self.inner.workers.clear();
        self.inner.drivers.cancel();
        tracing::info!(agent = %self.inner.id, "Container agent stopped");
    }
}

impl Drop for ContainerAgent {
    fn drop(&mut self) {
        self.stop_dispatch.cancel();
        self.inner.workers.clear();
        self.inner.drivers.cancel();
    }
}

// ---------------------------------------------------------------------------
// Dispatch and per-group workers
// ---------------------------------------------------------------------------

async fn dispatch(inner: Arc<AgentInner>, mut subscription: Subscription, stop: CancellationToken) {
    loop {
        let payload = tokio::select! {
            () = stop.cancelled() => break,
            payload = subscription.recv() => match payload {
                Some(payload) => payload,
                None => break,
            },
        };

        let request = match DeploymentRequest::decode(&payload) {
            Ok(request) => request,
            Err(e) => {
                tracing::warn!(agent = %inner.id, error = %e, "Dropping undecodable deployment request");
                inner.resources.metrics.increment("deploy.requests.malformed", 1);
                continue;
            }
        };
        if let Err(e) = route(&inner, Command { request, reply: None }) {
            tracing::warn!(agent = %inner.id, error = %e, "Could not route deployment request");
        }
    }
    tracing::debug!(agent = %inner.id, "Dispatcher stopped");
}

/// Hand `command` to its group's worker, spawning the worker on first use
/// and replacing one whose task has ended.
///
/// The send happens while the map entry is locked, which is what lets
/// [`retire_worker`] drop an idle worker without losing a queued command.
fn route(inner: &Arc<AgentInner>, command: Command) -> Result<(), DeploymentError> {
    let group = command.request.group.clone();
    let mut worker = inner
        .workers
        .entry(group.clone())
        .or_insert_with(|| spawn_worker(inner, &group));
    match worker.send(command) {
        Ok(()) => Ok(()),
        Err(mpsc::error::SendError(command)) => {
            tracing::warn!(agent = %inner.id, group = %group, "Group worker gone, restarting it");
            *worker = spawn_worker(inner, &group);
            worker
                .send(command)
                .map_err(|_| DeploymentError::AgentStopped)
        }
    }
}

fn spawn_worker(inner: &Arc<AgentInner>, group: &str) -> mpsc::UnboundedSender<Command> {
    let (tx, rx) = mpsc::unbounded_channel();
    tokio::spawn(group_worker(Arc::clone(inner), group.to_string(), rx));
    tx
}

async fn group_worker(
    inner: Arc<AgentInner>,
    group: String,
    mut rx: mpsc::UnboundedReceiver<Command>,
) {
    tracing::debug!(agent = %inner.id, group = %group, "Group worker started");
    while let Some(Command { request, reply }) = rx.recv().await {
        let result = handle(&inner, request).await;
        if let Some(reply) = reply {
            let _ = reply.send(result);
        }
        if retire_worker(&inner, &group, &rx) {
            break;
        }
    }
    tracing::debug!(agent = %inner.id, group = %group, "Group worker stopped");
}

/// Run one request on its own task so that a panic while deploying costs
/// the stage, not the group worker.
async fn handle(inner: &Arc<AgentInner>, request: DeploymentRequest) -> Result<Outcome, DeploymentError> {
    let descriptor = request.descriptor();
    let key = descriptor.key();
    let action = request.action;

    let task = {
        let inner = Arc::clone(inner);
        let key = key.clone();
        tokio::spawn(async move {
            match action {
                Action::Deploy => deploy(&inner, request).await,
                Action::Undeploy => undeploy(&inner, &key).await,
            }
        })
    };
    let result = match task.await {
        Ok(result) => result,
        Err(e)
            if action == Action::Deploy
                && inner.stages.get(&key).is_some_and(|r| r.state == StageState::Deploying) =>
        {
            Ok(fail(inner, &descriptor, format!("stage deployment aborted: {e}")))
        }
        Err(e) => Err(DeploymentError::Task(e)),
    };
    if let Err(ref e) = result {
        tracing::error!(agent = %inner.id, stage = %key, %action, error = %e, "Deployment request failed");
    }
    result
}

/// Remove the worker of `group` if this agent holds none of its stages and
/// nothing is queued. Returns `true` when the worker must exit.
fn retire_worker(inner: &AgentInner, group: &str, rx: &mpsc::UnboundedReceiver<Command>) -> bool {
    if inner.stages.iter().any(|r| r.key().group == group) {
        return false;
    }
    let retired = inner.workers.remove_if(group, |_, _| rx.is_empty()).is_some();
    if retired {
        tracing::debug!(agent = %inner.id, group, "Group worker retired");
    }
    retired
}

// ---------------------------------------------------------------------------
// Transitions
// ---------------------------------------------------------------------------

impl AgentInner {
    fn set_state(&self, descriptor: &StageDescriptor, state: StageState, last_error: Option<String>) {
        self.stages.insert(
            descriptor.key(),
            StageRecord {
                descriptor: descriptor.clone(),
                state,
                last_error,
            },
        );
        self.publish_change();
    }

    fn forget(&self, key: &StageKey) {
        self.stages.remove(key);
        self.publish_change();
    }

    fn publish_change(&self) {
        self.changes.send_modify(|v| *v = v.wrapping_add(1));
        #[allow(clippy::cast_possible_wrap)]
        let deployed = self
            .stages
            .iter()
            .filter(|r| r.state == StageState::Deployed)
            .count() as i64;
        self.resources
            .metrics
            .set_gauge(&format!("agent.{}.stages_deployed", self.id), deployed);
    }

    async fn claim(&self, key: &StageKey) -> Result<bool, DeploymentError> {
        self.resources
            .retry
            .retry_async("claim", || {
                let claims = Arc::clone(&self.resources.claims);
                let key = key.clone();
                let owner = self.id.clone();
                async move {
                    let won = tokio::task::spawn_blocking(move || claims.claim(&key, &owner)).await??;
                    Ok::<_, DeploymentError>(won)
                }
            })
            .await
    }

    async fn release(&self, key: &StageKey) -> Result<(), DeploymentError> {
        self.resources
            .retry
            .retry_async("release", || {
                let claims = Arc::clone(&self.resources.claims);
                let key = key.clone();
                async move {
                    tokio::task::spawn_blocking(move || claims.release(&key)).await??;
                    Ok::<_, DeploymentError>(())
                }
            })
            .await
    }
}

async fn deploy(inner: &Arc<AgentInner>, request: DeploymentRequest) -> Result<Outcome, DeploymentError> {
    let descriptor = request.descriptor();
    let key = descriptor.key();

    if inner
        .stages
        .get(&key)
        .is_some_and(|r| r.state == StageState::Deployed)
    {
        tracing::debug!(agent = %inner.id, stage = %key, "Stage already deployed");
        return Ok(Outcome::AlreadyDeployed);
    }

    if !inner.claim(&key).await? {
        tracing::debug!(agent = %inner.id, stage = %key, "Claim lost, dropping deploy request");
        return Ok(Outcome::ClaimLost);
    }

    inner.set_state(&descriptor, StageState::Deploying, None);
    tracing::info!(
        agent = %inner.id,
        group = %key.group,
        index = key.index,
        kind = %descriptor.kind,
        stage_type = %descriptor.stage_type,
        "Deploying stage"
    );

    let module = match inner.resources.catalog.resolve(&descriptor) {
        Ok(module) => module,
        Err(e) => return Ok(fail(inner, &descriptor, e.to_string())),
    };

    let (inbound, outbound) = match attach(&inner.resources.wiring, &descriptor) {
        Ok(ends) => ends,
        Err(e) => return Ok(fail(inner, &descriptor, e.to_string())),
    };

    let cancel = inner.drivers.child_token();
    let has_inbound = inbound.is_some();
    let outbound_index = outbound.as_ref().and(key.outbound_index());
    let driver = StageDriver {
        key: key.clone(),
        cancel: cancel.clone(),
        metrics: Arc::clone(&inner.resources.metrics),
        retry: inner.resources.retry,
    };
    let driver = tokio::spawn(driver.run(descriptor.stage_type, module, inbound, outbound));
    inner.running.insert(
        key.clone(),
        RunningStage {
            cancel,
            driver,
            inbound: has_inbound,
            outbound: outbound_index,
        },
    );

    inner.set_state(&descriptor, StageState::Deployed, None);
    tracing::info!(agent = %inner.id, group = %key.group, index = key.index, kind = %descriptor.kind, "Stage deployed");
    Ok(Outcome::Deployed)
}

/// Attach the channel ends `descriptor` needs, rolling back on failure.
fn attach(
    wiring: &WiringRegistry,
    descriptor: &StageDescriptor,
) -> Result<(Option<InboundEnd>, Option<OutboundEnd>), WiringError> {
    let group = descriptor.group.as_str();
    let index = descriptor.index;

    let inbound = if descriptor.stage_type.has_inbound() {
        Some(wiring.attach_inbound(group, index)?)
    } else {
        None
    };
    let outbound = if descriptor.stage_type.has_outbound() {
        let key = descriptor.key();
        let attached = key
            .outbound_index()
            .ok_or_else(|| WiringError::NoDownstreamIndex { stage: key.clone() })
            .and_then(|next| wiring.attach_outbound(group, next));
        match attached {
            Ok(end) => Some(end),
            Err(e) => {
                if inbound.is_some() {
                    wiring.detach_inbound(group, index);
                }
                return Err(e);
            }
        }
    } else {
        None
    };
    Ok((inbound, outbound))
}

fn fail(inner: &AgentInner, descriptor: &StageDescriptor, diagnostic: String) -> Outcome {
    tracing::error!(
        agent = %inner.id,
        group = %descriptor.group,
        index = descriptor.index,
        kind = %descriptor.kind,
        error = %diagnostic,
        "Stage deployment failed"
    );
    inner.resources.metrics.increment("deploy.failed", 1);
    inner.set_state(descriptor, StageState::Failed, Some(diagnostic.clone()));
    Outcome::Failed(diagnostic)
}

async fn undeploy(inner: &Arc<AgentInner>, key: &StageKey) -> Result<Outcome, DeploymentError> {
    let Some(record) = inner.stages.get(key).map(|r| r.clone()) else {
        tracing::debug!(agent = %inner.id, stage = %key, "Nothing to undeploy");
        return Ok(Outcome::NotDeployed);
    };

    inner.set_state(&record.descriptor, StageState::Undeploying, record.last_error.clone());
    tracing::info!(agent = %inner.id, group = %key.group, index = key.index, "Undeploying stage");

    if let Some((_, running)) = inner.running.remove(key) {
        running.cancel.cancel();
        if let Err(e) = running.driver.await {
            tracing::warn!(agent = %inner.id, stage = %key, error = %e, "Stage driver ended abnormally");
        }
        if running.inbound {
            inner.resources.wiring.detach_inbound(&key.group, key.index);
        }
        if let Some(next) = running.outbound {
            inner.resources.wiring.detach_outbound(&key.group, next);
        }
    }

    let released = inner.release(key).await;
    inner.forget(key);
    released?;

    tracing::info!(agent = %inner.id, group = %key.group, index = key.index, "Stage undeployed");
    Ok(Outcome::Undeployed)
}

// ---------------------------------------------------------------------------
// Stage driver
// ---------------------------------------------------------------------------

/// Floor for the pause between failed source reads.
const MIN_READ_BACKOFF: Duration = Duration::from_millis(10);

/// Task that moves envelopes through one deployed module until cancelled.
struct StageDriver {
    key: StageKey,
    cancel: CancellationToken,
    metrics: Arc<dyn MetricsSink>,
    retry: RetryPolicy,
}

impl StageDriver {
    async fn run(
        self,
        stage_type: StageType,
        mut module: Box<dyn Module>,
        inbound: Option<InboundEnd>,
        outbound: Option<OutboundEnd>,
    ) {
        match stage_type {
            StageType::Source => self.pump(module.as_mut(), outbound.as_ref()).await,
            StageType::Processor | StageType::Sink => {
                self.consume(module.as_mut(), inbound, outbound.as_ref()).await;
            }
            StageType::Job => self.run_job(module.as_mut(), inbound).await,
        }
        tracing::debug!(stage = %self.key, "Stage driver stopped");
    }

    async fn pump(&self, module: &mut dyn Module, outbound: Option<&OutboundEnd>) {
        let sent = stage_metric(&self.key, "envelopes_out");
        let errors = stage_metric(&self.key, "errors");
        let mut failures = 0u32;
        loop {
            let next = tokio::select! {
                () = self.cancel.cancelled() => return,
                next = module.next() => next,
            };
            match next {
                Ok(Some(envelope)) => {
                    failures = 0;
                    let Some(out) = outbound else { continue };
                    tokio::select! {
                        () = self.cancel.cancelled() => return,
                        res = out.sender.send(Arc::new(envelope)) => if res.is_err() { return },
                    }
                    self.metrics.increment(&sent, 1);
                }
                Ok(None) => {
                    tracing::info!(stage = %self.key, "Source exhausted");
                    return;
                }
                Err(e) => {
                    failures = failures.saturating_add(1);
                    let delay = self.retry.backoff(failures).max(MIN_READ_BACKOFF);
                    tracing::warn!(stage = %self.key, error = %e, failures, ?delay, "Source read failed");
                    self.metrics.increment(&errors, 1);
                    tokio::select! {
                        () = self.cancel.cancelled() => return,
                        () = tokio::time::sleep(delay) => {}
                    }
                }
            }
        }
    }

    async fn consume(
        &self,
        module: &mut dyn Module,
        inbound: Option<InboundEnd>,
        outbound: Option<&OutboundEnd>,
    ) {
        let received = stage_metric(&self.key, "envelopes_in");
        let sent = stage_metric(&self.key, "envelopes_out");
        let errors = stage_metric(&self.key, "errors");
        let Some(inbound) = inbound else { return };
        let mut rx = tokio::select! {
            () = self.cancel.cancelled() => return,
            rx = inbound.receiver.lock() => rx,
        };
        loop {
            let envelope = tokio::select! {
                () = self.cancel.cancelled() => return,
                envelope = rx.recv() => match envelope {
                    Some(envelope) => envelope,
                    None => return,
                },
            };
            self.metrics.increment(&received, 1);
            match module.process(envelope).await {
                Ok(Some(result)) => {
                    if let Some(out) = outbound {
                        tokio::select! {
                            () = self.cancel.cancelled() => return,
                            res = out.sender.send(result) => if res.is_err() { return },
                        }
                        self.metrics.increment(&sent, 1);
                    }
                }
                Ok(None) => {}
                Err(e) => {
                    tracing::warn!(stage = %self.key, error = %e, "Envelope processing failed");
                    self.metrics.increment(&errors, 1);
                }
            }
        }
    }

    /// A job runs once when deployed and again for every envelope that
    /// arrives on its inbound channel.
    async fn run_job(&self, module: &mut dyn Module, inbound: Option<InboundEnd>) {
        let received = stage_metric(&self.key, "envelopes_in");
        if !self.launch(module).await {
            return;
        }
        let Some(inbound) = inbound else { return };
        let mut rx = tokio::select! {
            () = self.cancel.cancelled() => return,
            rx = inbound.receiver.lock() => rx,
        };
        loop {
            tokio::select! {
                () = self.cancel.cancelled() => return,
                envelope = rx.recv() => if envelope.is_none() { return },
            }
            self.metrics.increment(&received, 1);
            if !self.launch(module).await {
                return;
            }
        }
    }

    /// One job run. `false` when cancelled before it finished.
    async fn launch(&self, module: &mut dyn Module) -> bool {
        tokio::select! {
            () = self.cancel.cancelled() => false,
            result = module.run() => {
                match result {
                    Ok(()) => tracing::info!(stage = %self.key, "Job run completed"),
                    Err(e) => {
                        tracing::warn!(stage = %self.key, error = %e, "Job run failed");
                        self.metrics.increment(&stage_metric(&self.key, "errors"), 1);
                    }
                }
                true
            }
        }
    }
}
