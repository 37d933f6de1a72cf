//! Standard invariant checks.
//!
//! These invariants capture behavioral properties that must always hold.
//! They verify WHAT must be true, not specific test scenarios.

use super::{Invariant, InvariantResult, SessionSnapshot, Violation};

/// At most one connection attempt is pending.
///
/// Counts both the in-flight handshake and the scheduled reconnect, which are
/// the two forms a pending `connect()` can take.
pub struct SingleAttemptTimer;

impl Invariant for SingleAttemptTimer {
    fn name(&self) -> &'static str {
        "single_attempt_timer"
    }

    fn check(&self, state: &SessionSnapshot) -> InvariantResult {
        if state.queued_handshakes > 1 || state.queued_reconnects > 1 {
            return Err(Violation {
                invariant: self.name(),
                message: format!(
                    "{} handshakes and {} reconnect timers queued",
                    state.queued_handshakes, state.queued_reconnects
                ),
            });
        }
        if state.queued_handshakes == 1 && state.queued_reconnects == 1 {
            return Err(Violation {
                invariant: self.name(),
                message: "handshake in flight while a reconnect is still scheduled".to_string(),
            });
        }
        Ok(())
    }
}

/// At most one disconnection check is pending.
pub struct SingleDisconnectCheck;

impl Invariant for SingleDisconnectCheck {
    fn name(&self) -> &'static str {
        "single_disconnect_check"
    }

    fn check(&self, state: &SessionSnapshot) -> InvariantResult {
        if state.queued_disconnect_checks > 1 {
            return Err(Violation {
                invariant: self.name(),
                message: format!("{} disconnect checks queued", state.queued_disconnect_checks),
            });
        }
        Ok(())
    }
}

/// The driver's queue matches what the session believes is pending.
///
/// A mismatch means a cancellation was lost or a schedule was dropped.
pub struct QueueMatchesSession;

impl Invariant for QueueMatchesSession {
    fn name(&self) -> &'static str {
        "queue_matches_session"
    }

    fn check(&self, state: &SessionSnapshot) -> InvariantResult {
        let pairs = [
            ("handshake", usize::from(state.session_handshake), state.queued_handshakes),
            ("reconnect", usize::from(state.session_reconnect), state.queued_reconnects),
            (
                "disconnect_check",
                usize::from(state.session_disconnect_check),
                state.queued_disconnect_checks,
            ),
            ("peer_reply", state.session_peer_replies, state.queued_peer_replies),
        ];

        for (what, session, queued) in pairs {
            if session != queued {
                return Err(Violation {
                    invariant: self.name(),
                    message: format!("{what}: session has {session}, driver queued {queued}"),
                });
            }
        }
        Ok(())
    }
}

/// Retry counter never exceeds its bound.
pub struct RetryBound;

impl Invariant for RetryBound {
    fn name(&self) -> &'static str {
        "retry_bound"
    }

    fn check(&self, state: &SessionSnapshot) -> InvariantResult {
        if state.retry_attempts > state.max_attempts {
            return Err(Violation {
                invariant: self.name(),
                message: format!("{} attempts > max {}", state.retry_attempts, state.max_attempts),
            });
        }
        Ok(())
    }
}

/// Nothing is queued after disposal.
pub struct DisposedIsQuiet;

impl Invariant for DisposedIsQuiet {
    fn name(&self) -> &'static str {
        "disposed_is_quiet"
    }

    fn check(&self, state: &SessionSnapshot) -> InvariantResult {
        if !state.disposed {
            return Ok(());
        }
        let queued = state.queued_handshakes
            + state.queued_reconnects
            + state.queued_disconnect_checks
            + state.queued_peer_replies;
        if queued > 0 {
            return Err(Violation {
                invariant: self.name(),
                message: format!("{queued} callbacks still queued after dispose"),
            });
        }
        Ok(())
    }
}

/// Message timestamps never decrease along the log.
pub struct TimestampsNonDecreasing;

impl Invariant for TimestampsNonDecreasing {
    fn name(&self) -> &'static str {
        "timestamps_non_decreasing"
    }

    fn check(&self, state: &SessionSnapshot) -> InvariantResult {
        for (i, pair) in state.timestamps.windows(2).enumerate() {
            if pair[1] < pair[0] {
                return Err(Violation {
                    invariant: self.name(),
                    message: format!(
                        "message {} at {} precedes message {} at {}",
                        i + 1,
                        pair[1],
                        i,
                        pair[0]
                    ),
                });
            }
        }
        Ok(())
    }
}
