//! Error types for the matchwire session core.
//!
//! Connection failures are values that flow INTO the state machine (a failed
//! handshake becomes the `Error` state plus a retry), never errors returned to
//! callers. The errors returned to callers only describe misuse: operating on
//! a disposed session, starting twice, or sending an invalid draft.

use std::time::Duration;

use thiserror::Error;

use crate::session::Lifecycle;

/// Why a single connection attempt did not succeed.
///
/// The state machine only distinguishes success from failure; the variant is
/// carried for logging and for transports that want to report more detail.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConnectionError {
    /// The peer (or the simulated coin flip) refused the handshake
    #[error("connection rejected: {0}")]
    Rejected(String),

    /// Handshake did not complete in time
    #[error("handshake timeout after {elapsed:?}")]
    Timeout {
        /// How long we waited
        elapsed: Duration,
    },

    /// Underlying transport error
    #[error("transport error: {0}")]
    Transport(String),
}

impl ConnectionError {
    /// Returns true if this error is transient and may succeed on retry.
    ///
    /// Every failure is retried by the session up to the configured bound;
    /// this only tells transports whether escalating makes sense.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Rejected(_) | Self::Timeout { .. })
    }
}

/// Rejected message drafts.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DraftError {
    /// Draft is empty after trimming whitespace
    #[error("message is empty")]
    Empty,

    /// Draft exceeds the maximum length
    #[error("message is {len} characters, maximum is {max}")]
    TooLong {
        /// Length of the trimmed draft in characters
        len: usize,
        /// Maximum allowed length in characters
        max: usize,
    },
}

/// Message payload encoding or decoding failed.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PayloadError {
    /// CBOR serialization failed
    #[error("failed to encode message: {0}")]
    Encode(String),

    /// CBOR deserialization failed
    #[error("failed to decode message: {0}")]
    Decode(String),
}

/// Errors returned by session operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    /// Operation not valid in the current lifecycle phase
    #[error("invalid lifecycle: cannot {operation} while {lifecycle:?}")]
    InvalidState {
        /// Lifecycle phase when the operation was attempted
        lifecycle: Lifecycle,
        /// Operation that was attempted
        operation: &'static str,
    },

    /// Session was disposed; no further mutation is allowed
    #[error("session disposed")]
    Disposed,

    /// Draft failed validation
    #[error("invalid draft: {0}")]
    InvalidDraft(#[from] DraftError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejections_and_timeouts_are_transient() {
        assert!(ConnectionError::Rejected("coin flip".to_string()).is_transient());
        assert!(ConnectionError::Timeout { elapsed: Duration::from_secs(3) }.is_transient());
    }

    #[test]
    fn transport_errors_are_not_transient() {
        assert!(!ConnectionError::Transport("socket closed".to_string()).is_transient());
    }

    #[test]
    fn draft_error_converts_into_session_error() {
        let err: SessionError = DraftError::Empty.into();
        assert_eq!(err, SessionError::InvalidDraft(DraftError::Empty));
        assert_eq!(err.to_string(), "invalid draft: message is empty");
    }

    #[test]
    fn too_long_reports_lengths() {
        let err = DraftError::TooLong { len: 1001, max: 1000 };
        assert_eq!(err.to_string(), "message is 1001 characters, maximum is 1000");
    }
}
