//! Stage ownership for conduit container agents.
//!
//! Provides the [`ClaimStore`] trait, which guarantees at most one owner per
//! `(group, index)`, with an in-memory implementation for single-process
//! deployments and tests and a [`SqliteClaimStore`] shared between
//! processes on one host.

#![warn(clippy::pedantic)]

pub mod claim;
pub mod error;
pub mod memory;
pub mod sqlite;

pub use claim::{AgentId, ClaimStore};
pub use error::{Result, StateError};
pub use memory::InMemoryClaimStore;
pub use sqlite::SqliteClaimStore;
