//! Deployment request wire format.
//!
//! A [`DeploymentRequest`] is a [`StageDescriptor`] plus an [`Action`]. The
//! JSON encoding emits fields in the fixed order `group, type, kind, index,
//! parameters, action` with parameters sorted by name, so equal requests
//! always produce identical bytes.

use serde::{Deserialize, Serialize};

use crate::error::ProtocolError;
use crate::stage::{Parameters, StageDescriptor, StageKey, StageType};

/// Shared topic carrying deployment requests.
pub const DEPLOY_TOPIC: &str = "deploy";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    Deploy,
    Undeploy,
}

impl std::fmt::Display for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Deploy => "deploy",
            Self::Undeploy => "undeploy",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DeploymentRequest {
    pub group: String,
    #[serde(rename = "type")]
    pub stage_type: StageType,
    pub kind: String,
    pub index: u32,
    #[serde(default)]
    pub parameters: Parameters,
    pub action: Action,
}

impl DeploymentRequest {
    #[must_use]
    pub fn new(descriptor: StageDescriptor, action: Action) -> Self {
        let StageDescriptor {
            group,
            stage_type,
            kind,
            index,
            parameters,
        } = descriptor;
        Self {
            group,
            stage_type,
            kind,
            index,
            parameters,
            action,
        }
    }

    #[must_use]
    pub fn deploy(descriptor: StageDescriptor) -> Self {
        Self::new(descriptor, Action::Deploy)
    }

    #[must_use]
    pub fn undeploy(descriptor: StageDescriptor) -> Self {
        Self::new(descriptor, Action::Undeploy)
    }

    #[must_use]
    pub fn key(&self) -> StageKey {
        StageKey::new(self.group.clone(), self.index)
    }

    /// Reconstruct the stage descriptor carried by this request.
    #[must_use]
    pub fn descriptor(&self) -> StageDescriptor {
        StageDescriptor {
            group: self.group.clone(),
            stage_type: self.stage_type,
            kind: self.kind.clone(),
            index: self.index,
            parameters: self.parameters.clone(),
        }
    }

    /// Serialize to the wire form.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::Codec`] if serialization fails.
    pub fn encode(&self) -> Result<Vec<u8>, ProtocolError> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Parse the wire form.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::Codec`] for anything that is not a
    /// complete deployment request.
    pub fn decode(bytes: &[u8]) -> Result<Self, ProtocolError> {
        Ok(serde_json::from_slice(bytes)?)
    }
}
