//! Deployment runtime for conduit streams.
//!
//! A stream description is resolved into stage descriptors, published as
//! deployment requests on a [`DeploymentChannel`], and picked up by every
//! [`ContainerAgent`]. The agent that wins the claim for a stage
//! instantiates it from the [`ModuleCatalog`] and wires it into the
//! [`WiringRegistry`], where it meets its neighbours by channel name.

#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod agent;
pub mod catalog;
pub mod channel;
pub mod config;
pub mod error;
pub mod metrics;
pub mod modules;
pub mod retry;
pub mod runtime;
pub mod wiring;

pub use agent::{ContainerAgent, Outcome, StageRecord, StageState};
pub use catalog::{Module, ModuleCatalog};
pub use channel::{publish_topology, DeploymentChannel, InMemoryDeploymentChannel, Subscription};
pub use error::{ChannelError, DeploymentError, ModuleError, ResolutionError, WiringError};
pub use metrics::{InMemoryMetrics, MetricsSink, NoopMetrics};
pub use retry::RetryPolicy;
pub use runtime::LocalRuntime;
pub use wiring::WiringRegistry;
