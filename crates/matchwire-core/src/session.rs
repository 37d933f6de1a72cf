//! Session state machine.
//!
//! Owns the connection lifecycle, retry bookkeeping, the periodic simulated
//! disconnection check, and the append-only message log. Uses the action
//! pattern: methods take inputs (caller operations, timer expirations,
//! handshake results) and return [`SessionAction`]s for the driver to execute.
//! The session never sleeps and never touches a socket.
//!
//! # State Machine
//!
//! ```text
//!               handshake ok
//!  ┌────────────┐────────────>┌───────────┐
//!  │ Connecting │             │ Connected │
//!  └────────────┘<──┐         └───────────┘
//!     │    ^        │ reconnect     │ link lost / check
//!     │    │ retry  │ timer (3s)    ↓
//!     │    │        │         ┌──────────────┐
//!     │    │        └─────────│ Disconnected │
//!     │    │                  └──────────────┘
//!     │ handshake failed
//!     ↓    │ backoff timer or reconnect()
//!  ┌───────┐
//!  │ Error │  (stays here once retries are exhausted)
//!  └───────┘
//! ```
//!
//! # Pending work
//!
//! At any time there is at most one in-flight handshake, at most one pending
//! [`Timer::Reconnect`], and at most one pending [`Timer::DisconnectCheck`].
//! Every schedule is tagged with a fresh token, and expirations or handshake
//! results that do not match the current token are dropped. After
//! [`Session::shutdown`] nothing is pending and every input is ignored.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::{
    action::{AttemptId, SessionAction, SessionEvent, Timer, TimerToken},
    config::{SYSTEM_SENDER_ID, SYSTEM_SENDER_NAME, SessionConfig},
    env::Environment,
    error::{ConnectionError, SessionError},
    message::{Message, MessageDraft, MessageId, MessageKind},
    retry::RetryPolicy,
};

/// Connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ConnectionState {
    /// Handshake in progress
    Connecting,
    /// Handshake succeeded, link is up
    Connected,
    /// Link dropped, reconnect scheduled
    Disconnected,
    /// Handshake failed; retrying unless attempts are exhausted
    Error,
}

/// Lifecycle of the session object itself, independent of the connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifecycle {
    /// Created, [`Session::start`] not called yet
    Idle,
    /// Started; timers and handshakes may be pending
    Running,
    /// Shut down; all pending work cancelled
    Disposed,
}

/// Snapshot of pending timers and handshakes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PendingWork {
    /// In-flight handshake
    pub handshake: Option<AttemptId>,
    /// Pending scheduled `connect()`
    pub reconnect: Option<TimerToken>,
    /// Pending disconnection check
    pub disconnect_check: Option<TimerToken>,
    /// Pending simulated peer replies
    pub peer_replies: usize,
}

impl PendingWork {
    /// True if nothing is pending.
    pub fn is_idle(&self) -> bool {
        self.handshake.is_none()
            && self.reconnect.is_none()
            && self.disconnect_check.is_none()
            && self.peer_replies == 0
    }
}

/// Session state machine.
///
/// Generic over [`Environment`] so tests can substitute a seeded or scripted
/// source of randomness and time.
#[derive(Debug, Clone)]
pub struct Session<E: Environment> {
    env: E,
    config: SessionConfig,
    lifecycle: Lifecycle,
    state: ConnectionState,
    state_since: E::Instant,
    retry: RetryPolicy,
    /// Append-only; insertion order is creation order
    messages: Vec<Message>,
    /// Recorded intent only, never used to filter messages
    rooms: BTreeSet<String>,
    pending_attempt: Option<AttemptId>,
    reconnect_timer: Option<TimerToken>,
    disconnect_check: Option<TimerToken>,
    /// Pending reply timers, keyed by token, valued by peer id
    peer_replies: BTreeMap<TimerToken, String>,
    next_attempt: u64,
    next_token: u64,
    next_sequence: u64,
    /// Last stamped timestamp, keeps message timestamps non-decreasing
    last_timestamp: u64,
}

impl<E: Environment> Session<E> {
    /// Create a session in [`ConnectionState::Connecting`] with nothing
    /// pending. Call [`Session::start`] to issue the first attempt.
    pub fn new(env: E, config: SessionConfig) -> Self {
        let retry = RetryPolicy::new(config.max_attempts, config.retry_base_delay);
        let state_since = env.now();
        Self {
            env,
            config,
            lifecycle: Lifecycle::Idle,
            state: ConnectionState::Connecting,
            state_since,
            retry,
            messages: Vec::new(),
            rooms: BTreeSet::new(),
            pending_attempt: None,
            reconnect_timer: None,
            disconnect_check: None,
            peer_replies: BTreeMap::new(),
            next_attempt: 1,
            next_token: 1,
            next_sequence: 0,
            last_timestamp: 0,
        }
    }

    /// Issue the first connection attempt and arm the disconnection check.
    ///
    /// # Errors
    ///
    /// - `SessionError::Disposed` after shutdown
    /// - `SessionError::InvalidState` if already started
    pub fn start(&mut self) -> Result<Vec<SessionAction>, SessionError> {
        match self.lifecycle {
            Lifecycle::Idle => {},
            Lifecycle::Disposed => return Err(SessionError::Disposed),
            Lifecycle::Running => {
                return Err(SessionError::InvalidState {
                    lifecycle: self.lifecycle,
                    operation: "start",
                });
            },
        }

        self.lifecycle = Lifecycle::Running;

        let mut actions = Vec::new();
        self.begin_attempt(&mut actions);
        self.arm_disconnect_check(&mut actions);
        Ok(actions)
    }

    /// Start a new connection attempt.
    ///
    /// Supersedes any in-flight handshake and any scheduled reconnect, so at
    /// most one attempt is ever pending. Does not touch the retry counter.
    ///
    /// # Errors
    ///
    /// - `SessionError::Disposed` after shutdown
    /// - `SessionError::InvalidState` before [`Session::start`]
    pub fn connect(&mut self) -> Result<Vec<SessionAction>, SessionError> {
        self.ensure_running("connect")?;

        let mut actions = Vec::new();
        self.begin_attempt(&mut actions);
        Ok(actions)
    }

    /// Reset the retry counter and connect, regardless of current state.
    ///
    /// # Errors
    ///
    /// Same as [`Session::connect`].
    pub fn reconnect(&mut self) -> Result<Vec<SessionAction>, SessionError> {
        self.ensure_running("reconnect")?;

        tracing::info!(attempts = self.retry.attempts(), "manual reconnect, resetting backoff");
        self.retry.reset();

        let mut actions = Vec::new();
        self.begin_attempt(&mut actions);
        Ok(actions)
    }

    /// Feed back the result of a handshake started by `StartHandshake`.
    ///
    /// Results for superseded attempts, or arriving after shutdown, are
    /// ignored. A failure moves to [`ConnectionState::Error`] and schedules a
    /// retry unless the retry bound is reached.
    pub fn handshake_completed(
        &mut self,
        attempt: AttemptId,
        outcome: Result<(), ConnectionError>,
    ) -> Vec<SessionAction> {
        if self.lifecycle != Lifecycle::Running || self.pending_attempt != Some(attempt) {
            tracing::debug!(%attempt, "ignoring stale handshake result");
            return Vec::new();
        }
        self.pending_attempt = None;

        let mut actions = Vec::new();
        match outcome {
            Ok(()) => {
                self.retry.reset();
                self.transition(ConnectionState::Connected, &mut actions);
            },
            Err(err) => {
                tracing::info!(%attempt, error = %err, "connection attempt failed");
                self.transition(ConnectionState::Error, &mut actions);

                match self.retry.next_delay() {
                    Some(delay) => {
                        tracing::debug!(
                            attempt = self.retry.attempts(),
                            max = self.retry.max_attempts(),
                            ?delay,
                            "scheduling retry"
                        );
                        self.schedule_reconnect(delay, &mut actions);
                    },
                    None => {
                        tracing::warn!(
                            max = self.retry.max_attempts(),
                            "retries exhausted, waiting for manual reconnect"
                        );
                    },
                }
            },
        }
        actions
    }

    /// Feed back a timer expiration.
    ///
    /// Expirations with a token that is no longer current are ignored.
    pub fn timer_fired(&mut self, timer: Timer, token: TimerToken) -> Vec<SessionAction> {
        if self.lifecycle != Lifecycle::Running {
            return Vec::new();
        }

        let mut actions = Vec::new();
        match timer {
            Timer::Reconnect => {
                if self.reconnect_timer != Some(token) {
                    tracing::debug!(%token, "ignoring stale reconnect timer");
                    return actions;
                }
                self.reconnect_timer = None;
                self.begin_attempt(&mut actions);
            },
            Timer::DisconnectCheck => {
                if self.disconnect_check != Some(token) {
                    tracing::debug!(%token, "ignoring stale disconnect check");
                    return actions;
                }
                self.disconnect_check = None;
                self.arm_disconnect_check(&mut actions);

                if self.state == ConnectionState::Connected
                    && self.config.link.should_disconnect(&self.env)
                {
                    tracing::info!("simulated link drop");
                    self.drop_link(&mut actions);
                }
            },
            Timer::PeerReply => {
                let Some(peer_id) = self.peer_replies.remove(&token) else {
                    tracing::debug!(%token, "ignoring stale peer reply");
                    return actions;
                };
                self.append_peer_reply(peer_id, &mut actions);
            },
        }
        actions
    }

    /// Report that an established link dropped.
    ///
    /// Moves to [`ConnectionState::Disconnected`] and schedules a single
    /// reconnect after the configured delay. No-op unless connected.
    ///
    /// # Errors
    ///
    /// Same as [`Session::connect`].
    pub fn link_lost(&mut self) -> Result<Vec<SessionAction>, SessionError> {
        self.ensure_running("link_lost")?;

        let mut actions = Vec::new();
        if self.state == ConnectionState::Connected {
            self.drop_link(&mut actions);
        } else {
            tracing::debug!(state = ?self.state, "link lost while not connected, ignoring");
        }
        Ok(actions)
    }

    /// Append a locally sent text message.
    ///
    /// Content is not validated here; see [`Session::send_draft`]. The message
    /// is handed to the transport only while connected.
    ///
    /// # Errors
    ///
    /// `SessionError::Disposed` after shutdown.
    pub fn send_message(
        &mut self,
        content: impl Into<String>,
        recipient_id: Option<&str>,
    ) -> Result<(MessageId, Vec<SessionAction>), SessionError> {
        self.ensure_not_disposed()?;

        let mut actions = Vec::new();
        let message = self.append(
            self.config.local_sender_id.clone(),
            self.config.local_sender_name.clone(),
            content.into(),
            MessageKind::Text,
            &mut actions,
        );
        let id = message.id.clone();

        if self.state == ConnectionState::Connected {
            actions.push(SessionAction::Transmit {
                message,
                recipient_id: recipient_id.map(str::to_string),
            });
        } else {
            tracing::debug!(%id, state = ?self.state, "not connected, message kept local");
        }

        if let Some(peer_id) = recipient_id {
            self.schedule_peer_reply(peer_id, &mut actions);
        }

        Ok((id, actions))
    }

    /// Validate a draft, then send it.
    ///
    /// # Errors
    ///
    /// - `SessionError::InvalidDraft` if the draft is empty or too long
    /// - `SessionError::Disposed` after shutdown
    pub fn send_draft(
        &mut self,
        draft: &str,
        recipient_id: Option<&str>,
    ) -> Result<(MessageId, Vec<SessionAction>), SessionError> {
        self.ensure_not_disposed()?;
        let draft = MessageDraft::parse(draft)?;
        self.send_message(draft.into_inner(), recipient_id)
    }

    /// Append a system notice to the log.
    ///
    /// # Errors
    ///
    /// `SessionError::Disposed` after shutdown.
    pub fn post_system_notice(
        &mut self,
        content: impl Into<String>,
    ) -> Result<(MessageId, Vec<SessionAction>), SessionError> {
        self.ensure_not_disposed()?;

        let mut actions = Vec::new();
        let message = self.append(
            SYSTEM_SENDER_ID.to_string(),
            SYSTEM_SENDER_NAME.to_string(),
            content.into(),
            MessageKind::System,
            &mut actions,
        );
        Ok((message.id, actions))
    }

    /// Record intent to join a room. Messages are not scoped by room.
    ///
    /// # Errors
    ///
    /// `SessionError::Disposed` after shutdown.
    pub fn join_room(&mut self, room_id: &str) -> Result<Vec<SessionAction>, SessionError> {
        self.ensure_not_disposed()?;
        tracing::info!(room_id, "joined room");
        self.rooms.insert(room_id.to_string());
        Ok(vec![SessionAction::Notify(SessionEvent::RoomJoined { room_id: room_id.to_string() })])
    }

    /// Record intent to leave a room.
    ///
    /// # Errors
    ///
    /// `SessionError::Disposed` after shutdown.
    pub fn leave_room(&mut self, room_id: &str) -> Result<Vec<SessionAction>, SessionError> {
        self.ensure_not_disposed()?;
        tracing::info!(room_id, "left room");
        self.rooms.remove(room_id);
        Ok(vec![SessionAction::Notify(SessionEvent::RoomLeft { room_id: room_id.to_string() })])
    }

    /// Cancel all pending work and refuse further input.
    ///
    /// Idempotent: a second call returns no actions.
    pub fn shutdown(&mut self) -> Vec<SessionAction> {
        if self.lifecycle == Lifecycle::Disposed {
            return Vec::new();
        }
        self.lifecycle = Lifecycle::Disposed;

        let mut actions = Vec::new();
        if let Some(attempt) = self.pending_attempt.take() {
            actions.push(SessionAction::AbortHandshake { attempt });
        }
        if let Some(token) = self.reconnect_timer.take() {
            actions.push(SessionAction::CancelTimer { timer: Timer::Reconnect, token });
        }
        if let Some(token) = self.disconnect_check.take() {
            actions.push(SessionAction::CancelTimer { timer: Timer::DisconnectCheck, token });
        }
        for token in std::mem::take(&mut self.peer_replies).into_keys() {
            actions.push(SessionAction::CancelTimer { timer: Timer::PeerReply, token });
        }

        tracing::debug!(cancelled = actions.len(), "session shut down");
        actions
    }

    /// Current connection state.
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// True if the link is up.
    pub fn is_connected(&self) -> bool {
        self.state == ConnectionState::Connected
    }

    /// Time spent in the current connection state.
    pub fn time_in_state(&self) -> std::time::Duration {
        self.env.now() - self.state_since
    }

    /// Lifecycle phase of the session object.
    pub fn lifecycle(&self) -> Lifecycle {
        self.lifecycle
    }

    /// True after [`Session::shutdown`].
    pub fn is_disposed(&self) -> bool {
        self.lifecycle == Lifecycle::Disposed
    }

    /// Message log in creation order.
    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    /// Placeholder presence list.
    pub fn online_users(&self) -> &[String] {
        &self.config.online_users
    }

    /// Rooms joined and not yet left.
    pub fn joined_rooms(&self) -> impl Iterator<Item = &str> {
        self.rooms.iter().map(String::as_str)
    }

    /// Automatic retries scheduled since the last reset.
    pub fn retry_attempts(&self) -> u32 {
        self.retry.attempts()
    }

    /// Retry bound.
    pub fn max_attempts(&self) -> u32 {
        self.retry.max_attempts()
    }

    /// Pending timers and handshake.
    pub fn pending_work(&self) -> PendingWork {
        PendingWork {
            handshake: self.pending_attempt,
            reconnect: self.reconnect_timer,
            disconnect_check: self.disconnect_check,
            peer_replies: self.peer_replies.len(),
        }
    }

    /// Session configuration.
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Injected environment.
    pub fn env(&self) -> &E {
        &self.env
    }

    fn ensure_not_disposed(&self) -> Result<(), SessionError> {
        if self.lifecycle == Lifecycle::Disposed {
            return Err(SessionError::Disposed);
        }
        Ok(())
    }

    fn ensure_running(&self, operation: &'static str) -> Result<(), SessionError> {
        match self.lifecycle {
            Lifecycle::Running => Ok(()),
            Lifecycle::Disposed => Err(SessionError::Disposed),
            Lifecycle::Idle => Err(SessionError::InvalidState { lifecycle: self.lifecycle, operation }),
        }
    }

    fn transition(&mut self, to: ConnectionState, actions: &mut Vec<SessionAction>) {
        let from = self.state;
        if from == to {
            return;
        }

        tracing::info!(?from, ?to, "connection state changed");
        self.state = to;
        self.state_since = self.env.now();
        actions.push(SessionAction::Notify(SessionEvent::StateChanged { from, to }));
    }

    fn begin_attempt(&mut self, actions: &mut Vec<SessionAction>) {
        if let Some(attempt) = self.pending_attempt.take() {
            tracing::debug!(%attempt, "superseding in-flight handshake");
            actions.push(SessionAction::AbortHandshake { attempt });
        }
        if let Some(token) = self.reconnect_timer.take() {
            tracing::debug!(%token, "superseding scheduled reconnect");
            actions.push(SessionAction::CancelTimer { timer: Timer::Reconnect, token });
        }

        self.transition(ConnectionState::Connecting, actions);

        let attempt = AttemptId(self.next_attempt);
        self.next_attempt += 1;
        self.pending_attempt = Some(attempt);
        tracing::debug!(%attempt, retries = self.retry.attempts(), "starting handshake");
        actions.push(SessionAction::StartHandshake { attempt });
    }

    fn drop_link(&mut self, actions: &mut Vec<SessionAction>) {
        self.transition(ConnectionState::Disconnected, actions);
        self.schedule_reconnect(self.config.reconnect_delay, actions);
    }

    fn schedule_reconnect(
        &mut self,
        delay: std::time::Duration,
        actions: &mut Vec<SessionAction>,
    ) {
        if let Some(token) = self.reconnect_timer.take() {
            actions.push(SessionAction::CancelTimer { timer: Timer::Reconnect, token });
        }
        let token = self.fresh_token();
        self.reconnect_timer = Some(token);
        actions.push(SessionAction::ScheduleTimer { timer: Timer::Reconnect, token, delay });
    }

    fn arm_disconnect_check(&mut self, actions: &mut Vec<SessionAction>) {
        if let Some(token) = self.disconnect_check.take() {
            actions.push(SessionAction::CancelTimer { timer: Timer::DisconnectCheck, token });
        }
        let token = self.fresh_token();
        self.disconnect_check = Some(token);
        actions.push(SessionAction::ScheduleTimer {
            timer: Timer::DisconnectCheck,
            token,
            delay: self.config.disconnect_check_interval,
        });
    }

    fn schedule_peer_reply(&mut self, peer_id: &str, actions: &mut Vec<SessionAction>) {
        let Some(replies) = &self.config.peer_replies else {
            return;
        };
        let delay = self.env.random_delay(replies.delay_min, replies.delay_max);

        let token = self.fresh_token();
        self.peer_replies.insert(token, peer_id.to_string());
        actions.push(SessionAction::Notify(SessionEvent::PeerTyping {
            peer_id: peer_id.to_string(),
        }));
        actions.push(SessionAction::ScheduleTimer { timer: Timer::PeerReply, token, delay });
    }

    fn append_peer_reply(&mut self, peer_id: String, actions: &mut Vec<SessionAction>) {
        let Some(replies) = &self.config.peer_replies else {
            return;
        };
        let Some(content) = replies.responses.get(self.env.random_index(replies.responses.len()))
        else {
            return;
        };
        let content = content.clone();
        self.append(peer_id.clone(), peer_id, content, MessageKind::Text, actions);
    }

    fn append(
        &mut self,
        sender_id: String,
        sender_name: String,
        content: String,
        kind: MessageKind,
        actions: &mut Vec<SessionAction>,
    ) -> Message {
        let timestamp = self.env.wall_clock_millis().max(self.last_timestamp);
        self.last_timestamp = timestamp;

        let id = MessageId::new(timestamp, self.next_sequence);
        self.next_sequence += 1;

        let message = Message { id, sender_id, sender_name, content, timestamp, kind };
        self.messages.push(message.clone());
        actions.push(SessionAction::Notify(SessionEvent::MessageAppended(message.clone())));
        message
    }

    fn fresh_token(&mut self) -> TimerToken {
        let token = TimerToken(self.next_token);
        self.next_token += 1;
        token
    }
}
