//! Error types for the network data protocol

use thiserror::Error;

use crate::{DataVersion, NodeId};

/// Core protocol errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MeshError {
    // Authority errors
    #[error("Not authority: node {0} cannot publish network data")]
    NotAuthority(NodeId),

    #[error("Context ids exhausted")]
    ExhaustedContexts,

    #[error("Unknown prefix: {0}")]
    UnknownPrefix(String),

    // Propagation errors (internal, drive the snapshot path)
    #[error("Stale delta: to {to:?} while holding {local:?}")]
    StaleDelta { to: DataVersion, local: DataVersion },

    #[error("Gap detected: delta starts at {from:?} while holding {local:?}")]
    GapDetected { from: DataVersion, local: DataVersion },

    // Parse errors
    #[error("Invalid prefix: {0}")]
    InvalidPrefix(String),

    #[error("Invalid prefix flags: {0}")]
    InvalidFlags(String),

    // Wire errors
    #[error("Invalid wire format: {0}")]
    InvalidWireFormat(String),

    #[error("Buffer too short: expected {expected}, got {actual}")]
    BufferTooShort { expected: usize, actual: usize },

    #[error("Unknown message kind: {0}")]
    UnknownMessageKind(u8),

    // Configuration errors
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // Runtime errors
    #[error("Node not found: {0}")]
    NodeNotFound(NodeId),

    #[error("Node service closed")]
    ServiceClosed,
}

impl MeshError {
    /// Errors that the propagation engine absorbs instead of surfacing
    pub fn is_internal(&self) -> bool {
        matches!(
            self,
            MeshError::StaleDelta { .. } | MeshError::GapDetected { .. }
        )
    }
}

/// Result type for protocol operations
pub type MeshResult<T> = Result<T, MeshError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_internal_kinds() {
        let stale = MeshError::StaleDelta {
            to: DataVersion::new(1),
            local: DataVersion::new(2),
        };
        assert!(stale.is_internal());
        assert!(!MeshError::ExhaustedContexts.is_internal());
        assert!(!MeshError::NotAuthority(NodeId::new(2)).is_internal());
    }
}
