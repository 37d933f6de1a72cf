//! Actions produced by the session and notifications published to consumers.
//!
//! The driver (production runtime or simulation harness) executes these
//! actions:
//! - `StartHandshake` / `AbortHandshake`: run or cancel a transport handshake
//! - `ScheduleTimer` / `CancelTimer`: arm or disarm a delayed callback
//! - `Transmit`: hand a locally-sent message to the transport
//! - `Notify`: publish a [`SessionEvent`] to subscribers

use std::{fmt, time::Duration};

use crate::{message::Message, session::ConnectionState};

/// Identifies one connection attempt.
///
/// Handshake results carrying a stale attempt id are ignored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AttemptId(pub u64);

impl fmt::Display for AttemptId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "attempt#{}", self.0)
    }
}

/// Identifies one scheduled timer.
///
/// Expirations carrying a stale token are ignored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimerToken(pub u64);

impl fmt::Display for TimerToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "timer#{}", self.0)
    }
}

/// Kinds of delayed callbacks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Timer {
    /// Scheduled `connect()`: retry backoff or post-disconnect reconnect.
    /// At most one pending.
    Reconnect,
    /// Periodic simulated disconnection check. At most one pending.
    DisconnectCheck,
    /// Simulated reply from a peer. Any number may be pending.
    PeerReply,
}

/// Instructions for the driver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionAction {
    /// Begin a connection attempt on the transport and report the result
    /// through `Session::handshake_completed`.
    StartHandshake {
        /// Attempt to report back
        attempt: AttemptId,
    },

    /// Cancel an in-flight connection attempt.
    AbortHandshake {
        /// Attempt to cancel
        attempt: AttemptId,
    },

    /// Call `Session::timer_fired(timer, token)` after `delay`.
    ScheduleTimer {
        /// Timer kind
        timer: Timer,
        /// Token to report back
        token: TimerToken,
        /// Delay from now
        delay: Duration,
    },

    /// Disarm a previously scheduled timer.
    CancelTimer {
        /// Timer kind
        timer: Timer,
        /// Token of the timer to disarm
        token: TimerToken,
    },

    /// Hand a message to the transport. Fire-and-forget.
    Transmit {
        /// Message to send
        message: Message,
        /// Intended recipient, if any
        recipient_id: Option<String>,
    },

    /// Publish an event to subscribers.
    Notify(SessionEvent),
}

/// Notifications published to session subscribers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// Connection state changed.
    StateChanged {
        /// Previous state
        from: ConnectionState,
        /// New state
        to: ConnectionState,
    },

    /// A message was appended to the log.
    MessageAppended(Message),

    /// A peer started composing a reply.
    PeerTyping {
        /// Peer composing
        peer_id: String,
    },

    /// Intent to join a room was recorded.
    RoomJoined {
        /// Room id
        room_id: String,
    },

    /// Intent to leave a room was recorded.
    RoomLeft {
        /// Room id
        room_id: String,
    },
}

impl SessionAction {
    /// The event carried by a `Notify` action.
    pub fn as_event(&self) -> Option<&SessionEvent> {
        match self {
            Self::Notify(event) => Some(event),
            _ => None,
        }
    }
}
