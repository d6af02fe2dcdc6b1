//! Shared Conduit data model types.
//!
//! Holds everything that crosses a process or stage boundary: the immutable
//! [`Envelope`] record passed between wired stages, stage descriptors and
//! their identity keys, the topology resolver that turns a stream
//! description into descriptors, and the deployment request wire format.

#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod deploy;
pub mod envelope;
pub mod error;
pub mod stage;
pub mod topology;
pub mod value;

pub use deploy::{Action, DeploymentRequest, DEPLOY_TOPIC};
pub use envelope::{Envelope, EnvelopeBuilder, Field};
pub use error::{EnvelopeError, ProtocolError, TopologyError};
pub use stage::{channel_name, Parameters, StageDescriptor, StageKey, StageType};
pub use topology::resolve;
pub use value::{FromValue, Value, ValueKind};
