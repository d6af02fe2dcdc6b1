//! Error types for envelope access, topology resolution and the
//! deployment wire protocol.

use crate::value::ValueKind;

/// Errors produced while building or reading an [`Envelope`](crate::Envelope).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EnvelopeError {
    /// Malformed construction input. Indicates a caller defect.
    #[error("invalid envelope arguments: {0}")]
    Argument(String),

    /// Stored value cannot be represented as the requested type.
    #[error("cannot convert {from} value '{value}' to {to}")]
    Conversion {
        from: ValueKind,
        to: &'static str,
        value: String,
    },
}

impl EnvelopeError {
    pub(crate) fn argument(message: impl Into<String>) -> Self {
        Self::Argument(message.into())
    }

    pub(crate) fn conversion(value: &crate::Value, to: &'static str) -> Self {
        Self::Conversion {
            from: value.kind(),
            to,
            value: value.to_string(),
        }
    }
}

/// Errors produced by [`resolve`](crate::topology::resolve).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TopologyError {
    /// A stage element could not be parsed.
    #[error("syntax error in element {element}: {message}")]
    Syntax { element: usize, message: String },

    /// Group names must be usable inside channel names (`<group>.<index>`).
    #[error("invalid group name '{0}'")]
    InvalidGroup(String),

    /// The description contained no stage elements.
    #[error("stream description contains no stages")]
    Empty,
}

impl TopologyError {
    pub(crate) fn syntax(element: usize, message: impl Into<String>) -> Self {
        Self::Syntax {
            element,
            message: message.into(),
        }
    }
}

/// Errors produced by the deployment request codec.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// Payload is not a well-formed deployment request.
    #[error("malformed deployment request: {0}")]
    Codec(#[from] serde_json::Error),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Value;

    #[test]
    fn conversion_error_names_both_types() {
        let err = EnvelopeError::conversion(&Value::Bytes(vec![1, 2]), "string");
        let msg = err.to_string();
        assert!(msg.contains("bytes"), "got: {msg}");
        assert!(msg.contains("string"), "got: {msg}");
    }

    #[test]
    fn syntax_error_reports_element() {
        let err = TopologyError::syntax(2, "empty stage");
        assert_eq!(err.to_string(), "syntax error in element 2: empty stage");
    }

    #[test]
    fn protocol_error_wraps_serde() {
        let inner = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        let err = ProtocolError::from(inner);
        assert!(err.to_string().starts_with("malformed deployment request"));
    }
}
