//! Stage descriptors and their durable deployment identity.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Inline stage parameters. Sorted so that serialization is deterministic.
pub type Parameters = BTreeMap<String, String>;

/// Role a stage plays in a linear stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageType {
    /// Produces envelopes; has no inbound channel.
    Source,
    /// Consumes and produces envelopes.
    Processor,
    /// Terminal consumer; has no outbound channel.
    Sink,
    /// Terminal stage with batch semantics; has no outbound channel.
    Job,
}

impl StageType {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Source => "source",
            Self::Processor => "processor",
            Self::Sink => "sink",
            Self::Job => "job",
        }
    }

    /// Parse the lowercase wire name.
    #[must_use]
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "source" => Some(Self::Source),
            "processor" => Some(Self::Processor),
            "sink" => Some(Self::Sink),
            "job" => Some(Self::Job),
            _ => None,
        }
    }

    /// Whether a stage of this type reads from an upstream channel.
    #[must_use]
    pub fn has_inbound(self) -> bool {
        !matches!(self, Self::Source)
    }

    /// Whether a stage of this type writes to a downstream channel.
    #[must_use]
    pub fn has_outbound(self) -> bool {
        matches!(self, Self::Source | Self::Processor)
    }
}

impl fmt::Display for StageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Durable deployment identity of a stage: `(group, index)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct StageKey {
    pub group: String,
    pub index: u32,
}

impl StageKey {
    #[must_use]
    pub fn new(group: impl Into<String>, index: u32) -> Self {
        Self {
            group: group.into(),
            index,
        }
    }

    /// Name of the data channel feeding this stage: `<group>.<index>`.
    #[must_use]
    pub fn inbound_channel(&self) -> String {
        channel_name(&self.group, self.index)
    }

    /// Index of the data channel this stage writes to, `None` for the last
    /// representable index.
    #[must_use]
    pub fn outbound_index(&self) -> Option<u32> {
        self.index.checked_add(1)
    }

    /// Name of the data channel this stage writes to: `<group>.<index + 1>`.
    #[must_use]
    pub fn outbound_channel(&self) -> Option<String> {
        self.outbound_index().map(|i| channel_name(&self.group, i))
    }
}

impl fmt::Display for StageKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.group, self.index)
    }
}

/// Data channel naming convention between adjacent stages.
#[must_use]
pub fn channel_name(group: &str, index: u32) -> String {
    format!("{group}.{index}")
}

/// One deployable stage of a resolved stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageDescriptor {
    pub group: String,
    #[serde(rename = "type")]
    pub stage_type: StageType,
    pub kind: String,
    pub index: u32,
    #[serde(default)]
    pub parameters: Parameters,
}

impl StageDescriptor {
    #[must_use]
    pub fn key(&self) -> StageKey {
        StageKey::new(self.group.clone(), self.index)
    }
}

impl fmt::Display for StageDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}[{}] {} ({})",
            self.group, self.index, self.kind, self.stage_type
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channel_names_follow_convention() {
        let key = StageKey::new("g1", 1);
        assert_eq!(key.inbound_channel(), "g1.1");
        assert_eq!(key.outbound_channel().as_deref(), Some("g1.2"));
        assert_eq!(StageKey::new("g1", u32::MAX).outbound_channel(), None);
    }

    #[test]
    fn stage_type_ends() {
        assert!(!StageType::Source.has_inbound());
        assert!(StageType::Source.has_outbound());
        assert!(StageType::Processor.has_inbound() && StageType::Processor.has_outbound());
        assert!(!StageType::Sink.has_outbound());
        assert!(!StageType::Job.has_outbound());
    }

    #[test]
    fn stage_type_parse_matches_as_str() {
        for t in [
            StageType::Source,
            StageType::Processor,
            StageType::Sink,
            StageType::Job,
        ] {
            assert_eq!(StageType::parse(t.as_str()), Some(t));
        }
        assert_eq!(StageType::parse("generic"), None);
    }

    #[test]
    fn stage_type_serde_snake_case() {
        assert_eq!(
            serde_json::to_string(&StageType::Processor).unwrap(),
            "\"processor\""
        );
    }
}
