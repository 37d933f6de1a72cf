//! Abort handles for every task the manager has in flight.
//!
//! Each pending timer and the in-flight handshake run as their own tokio task.
//! Their handles live here, next to the session, so cancelling a timer in the
//! session and aborting its task happen under the same lock. Dropping a
//! `Tasks` aborts everything it still tracks.

use std::collections::HashMap;

use matchwire_core::{AttemptId, TimerToken};
use tokio::task::{AbortHandle, JoinSet};

#[derive(Default)]
pub(crate) struct Tasks {
    handshake: Option<(AttemptId, AbortHandle)>,
    timers: HashMap<TimerToken, AbortHandle>,
    /// Fire-and-forget transmissions
    sends: JoinSet<()>,
}

impl Tasks {
    pub(crate) fn track_handshake(&mut self, attempt: AttemptId, handle: AbortHandle) {
        if let Some((stale, previous)) = self.handshake.replace((attempt, handle)) {
            tracing::debug!(attempt = %stale, "aborting superseded handshake task");
            previous.abort();
        }
    }

    pub(crate) fn abort_handshake(&mut self, attempt: AttemptId) {
        if let Some((current, handle)) = self.handshake.take_if(|(current, _)| *current == attempt)
        {
            tracing::debug!(attempt = %current, "handshake task aborted");
            handle.abort();
        }
    }

    /// Forget a handshake task that ran to completion.
    pub(crate) fn finish_handshake(&mut self, attempt: AttemptId) {
        self.handshake.take_if(|(current, _)| *current == attempt);
    }

    pub(crate) fn track_timer(&mut self, token: TimerToken, handle: AbortHandle) {
        self.timers.insert(token, handle);
    }

    pub(crate) fn cancel_timer(&mut self, token: TimerToken) {
        if let Some(handle) = self.timers.remove(&token) {
            handle.abort();
        }
    }

    /// Forget a timer task that fired.
    pub(crate) fn finish_timer(&mut self, token: TimerToken) {
        self.timers.remove(&token);
    }

    pub(crate) fn sends(&mut self) -> &mut JoinSet<()> {
        // Reap finished sends so the set does not grow without bound
        while self.sends.try_join_next().is_some() {}
        &mut self.sends
    }

    /// Timers and handshakes still tracked.
    pub(crate) fn pending(&self) -> usize {
        self.timers.len() + usize::from(self.handshake.is_some())
    }

    pub(crate) fn abort_all(&mut self) {
        if let Some((_, handle)) = self.handshake.take() {
            handle.abort();
        }
        for (_, handle) in self.timers.drain() {
            handle.abort();
        }
        self.sends.abort_all();
    }
}

impl Drop for Tasks {
    fn drop(&mut self) {
        self.abort_all();
    }
}
