//! Observable state snapshots for invariant checking.
//!
//! Snapshots capture what the session reports about itself together with
//! what the driver actually has queued. Invariants compare the two, so a
//! timer the session forgot about (or one the driver failed to cancel) shows
//! up as a violation.

use matchwire_core::{ConnectionState, Environment, Lifecycle, Session};
use serde::Serialize;

/// Snapshot of one session and its driver.
#[derive(Debug, Clone, Serialize)]
pub struct SessionSnapshot {
    /// Connection state.
    pub state: ConnectionState,
    /// True after shutdown.
    pub disposed: bool,
    /// Automatic retries used.
    pub retry_attempts: u32,
    /// Retry bound.
    pub max_attempts: u32,
    /// Messages in the log.
    pub message_count: usize,
    /// Session believes a handshake is in flight.
    pub session_handshake: bool,
    /// Session believes a reconnect is scheduled.
    pub session_reconnect: bool,
    /// Session believes a disconnect check is scheduled.
    pub session_disconnect_check: bool,
    /// Session's count of pending peer replies.
    pub session_peer_replies: usize,
    /// Handshakes queued in the driver.
    pub queued_handshakes: usize,
    /// Reconnect timers queued in the driver.
    pub queued_reconnects: usize,
    /// Disconnect checks queued in the driver.
    pub queued_disconnect_checks: usize,
    /// Peer reply timers queued in the driver.
    pub queued_peer_replies: usize,
    /// Message timestamps in log order.
    #[serde(skip)]
    pub timestamps: Vec<u64>,
}

/// Driver-side queue counts.
#[derive(Debug, Clone, Copy, Default)]
pub struct QueueCounts {
    /// Queued handshakes.
    pub handshakes: usize,
    /// Queued reconnect timers.
    pub reconnects: usize,
    /// Queued disconnect checks.
    pub disconnect_checks: usize,
    /// Queued peer reply timers.
    pub peer_replies: usize,
}

impl SessionSnapshot {
    /// Capture a session and the driver's queue counts.
    pub fn capture<E: Environment>(session: &Session<E>, queued: QueueCounts) -> Self {
        let pending = session.pending_work();
        Self {
            state: session.state(),
            disposed: session.lifecycle() == Lifecycle::Disposed,
            retry_attempts: session.retry_attempts(),
            max_attempts: session.max_attempts(),
            message_count: session.messages().len(),
            session_handshake: pending.handshake.is_some(),
            session_reconnect: pending.reconnect.is_some(),
            session_disconnect_check: pending.disconnect_check.is_some(),
            session_peer_replies: pending.peer_replies,
            queued_handshakes: queued.handshakes,
            queued_reconnects: queued.reconnects,
            queued_disconnect_checks: queued.disconnect_checks,
            queued_peer_replies: queued.peer_replies,
            timestamps: session.messages().iter().map(|m| m.timestamp).collect(),
        }
    }
}
