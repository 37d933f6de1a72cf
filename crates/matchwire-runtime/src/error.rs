//! Runtime error types.

use matchwire_core::{PayloadError, SessionError};
use thiserror::Error;

/// Errors from [`crate::ConnectionManager`] operations.
#[derive(Debug, Error)]
pub enum ManagerError {
    /// `create` was called outside a tokio runtime.
    #[error("no tokio runtime available: {0}")]
    NoRuntime(#[from] tokio::runtime::TryCurrentError),

    /// The session rejected the operation.
    #[error(transparent)]
    Session(#[from] SessionError),
}

impl ManagerError {
    /// True if the manager has been disposed.
    pub fn is_disposed(&self) -> bool {
        matches!(self, Self::Session(SessionError::Disposed))
    }
}

/// Errors from [`crate::Transport::send`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    /// Message could not be encoded for the wire.
    #[error("encode failed: {0}")]
    Encode(#[from] PayloadError),

    /// The transport has no established link.
    #[error("link is down")]
    LinkDown,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disposed_is_recognized() {
        assert!(ManagerError::Session(SessionError::Disposed).is_disposed());
        assert!(!ManagerError::Session(SessionError::InvalidDraft(
            matchwire_core::DraftError::Empty
        ))
        .is_disposed());
    }

    #[test]
    fn transport_errors_render() {
        assert_eq!(TransportError::LinkDown.to_string(), "link is down");
        assert_eq!(
            TransportError::Encode(PayloadError::Encode("bad".into())).to_string(),
            format!("encode failed: {}", PayloadError::Encode("bad".into()))
        );
    }
}
