// ── Core error types ──
//
// Errors surfaced by downlink views and links. Observer failures have their
// own type so callbacks can classify them as fatal or recoverable; the
// `From<ObserverError>` impl lets dispatch results flow out through `?`.

use thiserror::Error;

use crate::kind::DownlinkType;

/// Unified error type for the core crate.
#[derive(Debug, Error)]
pub enum DownlinkError {
    // ── Binding errors ───────────────────────────────────────────────
    #[error("Downlink type mismatch on {node}/{lane}: expected {expected}, found {actual}")]
    TypeMismatch {
        node: String,
        lane: String,
        expected: DownlinkType,
        actual: DownlinkType,
    },

    #[error("Downlink is not open")]
    NotOpen,

    #[error("Link closed before the frame was sent")]
    Closed,

    // ── Protocol errors ──────────────────────────────────────────────
    #[error("Cannot decode {operation} body: {message}")]
    Decode { operation: String, message: String },

    // ── Dispatch errors ──────────────────────────────────────────────
    #[error(transparent)]
    Observer(#[from] ObserverError),
}

/// Error returned by an observer callback.
///
/// `Failed` is delivered to the failing view's `did_fail` observers before it
/// unwinds the dispatch. `Fatal` models resource exhaustion and skips
/// `did_fail` entirely.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ObserverError {
    #[error("observer failed: {0}")]
    Failed(String),

    #[error("fatal observer error: {0}")]
    Fatal(String),
}

impl ObserverError {
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed(message.into())
    }

    pub fn fatal(message: impl Into<String>) -> Self {
        Self::Fatal(message.into())
    }

    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Fatal(_))
    }
}

/// Result type returned by every observer callback.
pub type ObserverResult = Result<(), ObserverError>;

impl DownlinkError {
    pub(crate) fn decode(operation: &str, err: &serde_json::Error) -> Self {
        Self::Decode {
            operation: operation.to_owned(),
            message: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fatal_classification() {
        assert!(ObserverError::fatal("out of memory").is_fatal());
        assert!(!ObserverError::failed("bad value").is_fatal());
    }

    #[test]
    fn observer_error_converts_transparently() {
        let err: DownlinkError = ObserverError::failed("boom").into();
        assert_eq!(err.to_string(), "observer failed: boom");
    }
}
