//! Engine error model and transient-failure classification.

use conduit_state::StateError;
use conduit_types::{EnvelopeError, ProtocolError, StageKey, StageType, TopologyError};

// ---------------------------------------------------------------------------
// Deployment channel
// ---------------------------------------------------------------------------

/// Errors produced by a [`DeploymentChannel`](crate::DeploymentChannel).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ChannelError {
    /// Publish failed but may succeed if retried.
    #[error("transient publish failure: {0}")]
    Transient(String),

    /// The channel no longer accepts messages.
    #[error("deployment channel closed")]
    Closed,
}

impl ChannelError {
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }
}

// ---------------------------------------------------------------------------
// Module resolution and execution
// ---------------------------------------------------------------------------

/// A stage kind could not be turned into a running module.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ResolutionError {
    #[error("unknown module kind '{0}'")]
    UnknownKind(String),

    #[error("module '{kind}' cannot run as a {stage_type}")]
    UnsupportedType { kind: String, stage_type: StageType },

    #[error("invalid parameter '{name}' for module '{kind}': {message}")]
    InvalidParameter {
        kind: String,
        name: String,
        message: String,
    },
}

impl ResolutionError {
    pub fn invalid_parameter(
        kind: impl Into<String>,
        name: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::InvalidParameter {
            kind: kind.into(),
            name: name.into(),
            message: message.into(),
        }
    }
}

/// Failure while a deployed module handles data. Logged and counted by the
/// stage driver; never fatal to the agent.
#[derive(Debug, thiserror::Error)]
pub enum ModuleError {
    #[error(transparent)]
    Envelope(#[from] EnvelopeError),

    #[error("{0}")]
    Processing(String),
}

impl ModuleError {
    pub fn processing(message: impl Into<String>) -> Self {
        Self::Processing(message.into())
    }
}

// ---------------------------------------------------------------------------
// Wiring
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WiringError {
    /// The requested end of a data channel already has a stage attached.
    #[error("{end} end of data channel '{channel}' is already attached")]
    EndInUse { channel: String, end: &'static str },

    /// A producing stage sits at the last representable index, so no
    /// downstream channel name exists for it.
    #[error("stage {stage} has no downstream channel index")]
    NoDownstreamIndex { stage: StageKey },
}

// ---------------------------------------------------------------------------
// Deployment
// ---------------------------------------------------------------------------

/// Errors surfaced by deployment operations.
#[derive(Debug, thiserror::Error)]
pub enum DeploymentError {
    #[error(transparent)]
    Topology(#[from] TopologyError),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// Publishing a request kept failing transiently until retries ran out.
    #[error("publishing {action} for {key} failed after {attempts} attempts: {source}")]
    Exhausted {
        key: StageKey,
        action: conduit_types::Action,
        attempts: u32,
        #[source]
        source: ChannelError,
    },

    #[error(transparent)]
    Channel(ChannelError),

    #[error("claim store failure: {0}")]
    State(#[from] StateError),

    #[error("blocking task failed: {0}")]
    Task(#[from] tokio::task::JoinError),

    /// The agent has shut down and no longer accepts requests.
    #[error("container agent stopped")]
    AgentStopped,
}

impl From<ChannelError> for DeploymentError {
    fn from(err: ChannelError) -> Self {
        Self::Channel(err)
    }
}

// ---------------------------------------------------------------------------
// Transient classification
// ---------------------------------------------------------------------------

/// Errors that can tell whether an identical retry may succeed.
pub trait Transient {
    fn is_transient(&self) -> bool;
}

impl Transient for ChannelError {
    fn is_transient(&self) -> bool {
        ChannelError::is_transient(self)
    }
}

impl Transient for StateError {
    fn is_transient(&self) -> bool {
        StateError::is_transient(self)
    }
}

impl Transient for DeploymentError {
    fn is_transient(&self) -> bool {
        match self {
            Self::Channel(e) => e.is_transient(),
            Self::State(e) => e.is_transient(),
            _ => false,
        }
    }
}
