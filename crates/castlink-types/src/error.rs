//! Caller-facing error kinds.
//!
//! These five kinds are the complete error surface of the engine.
//! Mechanism-internal discovery failures never appear here — they are
//! normalised to an empty candidate list at the adapter boundary.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum PresentError {
    /// No displays discovered, or an unknown reconnection id.
    #[error("not found: {0}")]
    NotFound(String),

    /// The user declined or made no selection.
    #[error("aborted: {0}")]
    Abort(String),

    /// Navigation or channel teardown failed at the transport layer.
    /// Carries the mechanism's own diagnostic as detail.
    #[error("operation failed: {0}")]
    Operation(String),

    /// Send or close attempted outside the required state.
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// Availability monitoring unavailable by deployment policy.
    #[error("not supported: {0}")]
    NotSupported(String),
}

impl PresentError {
    /// Normalise any error into the `Operation` kind, preserving the
    /// original diagnostic as detail. Used at the navigation boundary where
    /// mechanism failures must surface as operation errors regardless of
    /// how the adapter classified them.
    #[must_use]
    pub fn into_operation(self) -> Self {
        match self {
            Self::Operation(_) => self,
            other => Self::Operation(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn operation_normalisation_preserves_detail() {
        let err = PresentError::InvalidState("stream gone".to_string()).into_operation();
        match err {
            PresentError::Operation(detail) => assert!(detail.contains("stream gone")),
            other => panic!("expected Operation, got {other:?}"),
        }
    }

    #[test]
    fn operation_is_not_double_wrapped() {
        let err = PresentError::Operation("launch refused".to_string()).into_operation();
        assert_eq!(err.to_string(), "operation failed: launch refused");
    }
}
