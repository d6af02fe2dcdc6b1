//! Module catalog: registered factories that turn a stage kind into a
//! running [`Module`].

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use conduit_types::{Envelope, Parameters, StageDescriptor, StageType};

use crate::error::{ModuleError, ResolutionError};

/// A deployed stage's behavior.
///
/// Sources implement [`next`](Self::next), processors and sinks implement
/// [`process`](Self::process) and jobs implement [`run`](Self::run). The
/// stage driver only calls the method matching the stage type.
#[async_trait]
pub trait Module: Send {
    /// Produce the next envelope. `Ok(None)` means the source is exhausted.
    ///
    /// # Errors
    ///
    /// A failed read; the driver logs it and keeps polling.
    async fn next(&mut self) -> Result<Option<Envelope>, ModuleError> {
        Ok(None)
    }

    /// Handle one inbound envelope, optionally emitting one downstream.
    ///
    /// # Errors
    ///
    /// A failed envelope; the driver logs it and moves on.
    async fn process(
        &mut self,
        _envelope: Arc<Envelope>,
    ) -> Result<Option<Arc<Envelope>>, ModuleError> {
        Ok(None)
    }

    /// Run a job to completion.
    ///
    /// # Errors
    ///
    /// A failed run, logged by the driver.
    async fn run(&mut self) -> Result<(), ModuleError> {
        Ok(())
    }
}

/// Constructor for a module kind.
pub type ModuleFactory =
    Arc<dyn Fn(&Parameters) -> Result<Box<dyn Module>, ResolutionError> + Send + Sync>;

struct Registration {
    types: Vec<StageType>,
    factory: ModuleFactory,
}

/// Table of module kinds known to an agent.
///
/// Built once at startup and shared read-only between agents.
#[derive(Default)]
pub struct ModuleCatalog {
    entries: BTreeMap<String, Registration>,
}

impl fmt::Debug for ModuleCatalog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModuleCatalog")
            .field("kinds", &self.entries.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl ModuleCatalog {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Catalog preloaded with the built-in modules.
    #[must_use]
    pub fn builtin() -> Self {
        let mut catalog = Self::new();
        crate::modules::register_builtin(&mut catalog);
        catalog
    }

    /// Register `kind` for the given stage types, replacing any previous
    /// registration of the same kind.
    pub fn register<F>(&mut self, kind: impl Into<String>, types: &[StageType], factory: F)
    where
        F: Fn(&Parameters) -> Result<Box<dyn Module>, ResolutionError> + Send + Sync + 'static,
    {
        self.entries.insert(
            kind.into(),
            Registration {
                types: types.to_vec(),
                factory: Arc::new(factory),
            },
        );
    }

    /// Builder-style [`register`](Self::register).
    #[must_use]
    pub fn with<F>(mut self, kind: impl Into<String>, types: &[StageType], factory: F) -> Self
    where
        F: Fn(&Parameters) -> Result<Box<dyn Module>, ResolutionError> + Send + Sync + 'static,
    {
        self.register(kind, types, factory);
        self
    }

    #[must_use]
    pub fn contains(&self, kind: &str) -> bool {
        self.entries.contains_key(kind)
    }

    /// Registered kinds in name order, with the stage types each supports.
    pub fn kinds(&self) -> impl Iterator<Item = (&str, &[StageType])> {
        self.entries
            .iter()
            .map(|(kind, reg)| (kind.as_str(), reg.types.as_slice()))
    }

    /// Instantiate the module for `descriptor`.
    ///
    /// # Errors
    ///
    /// [`ResolutionError::UnknownKind`] for an unregistered kind,
    /// [`ResolutionError::UnsupportedType`] when the kind cannot run as the
    /// descriptor's stage type, or whatever the factory reports for bad
    /// parameters.
    pub fn resolve(&self, descriptor: &StageDescriptor) -> Result<Box<dyn Module>, ResolutionError> {
        let registration = self
            .entries
            .get(&descriptor.kind)
            .ok_or_else(|| ResolutionError::UnknownKind(descriptor.kind.clone()))?;
        if !registration.types.contains(&descriptor.stage_type) {
            return Err(ResolutionError::UnsupportedType {
                kind: descriptor.kind.clone(),
                stage_type: descriptor.stage_type,
            });
        }
        (registration.factory)(&descriptor.parameters)
    }
}
