//! Virtual-time driver for the session state machine.
//!
//! `SimDriver` executes [`SessionAction`]s against a virtual clock instead of
//! a runtime: scheduled timers and in-flight handshakes sit in one ordered
//! queue, and [`SimDriver::advance`] pops them in due order. Nothing sleeps,
//! so hours of simulated reconnect churn run in microseconds and every run
//! with the same [`SimEnv`] is identical.
//!
//! Handshakes follow the session's [`matchwire_core::SimulatedLink`]: the
//! latency is drawn when the handshake starts, the outcome when it completes.

use std::{collections::BTreeMap, fmt, time::Duration};

use matchwire_core::{
    AttemptId, Message, MessageId, Session, SessionAction, SessionConfig, SessionError,
    SessionEvent, Timer, TimerToken,
};

use crate::{
    invariants::{InvariantRegistry, QueueCounts, SessionSnapshot},
    sim_env::SimEnv,
};

/// Queued callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scheduled {
    /// Timer expiration.
    Timer {
        /// Timer kind
        timer: Timer,
        /// Token to report back
        token: TimerToken,
    },
    /// Handshake completion.
    Handshake {
        /// Attempt to report back
        attempt: AttemptId,
    },
}

/// Counters over everything the driver executed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DriverStats {
    /// Handshakes started
    pub handshakes_started: u64,
    /// Handshakes aborted before completing
    pub handshakes_aborted: u64,
    /// Handshakes that completed successfully
    pub handshakes_succeeded: u64,
    /// Handshakes that completed with an error
    pub handshakes_failed: u64,
    /// Timers scheduled
    pub timers_scheduled: u64,
    /// Timers cancelled before firing
    pub timers_cancelled: u64,
    /// Timers fired
    pub timers_fired: u64,
    /// Reconnect timers scheduled
    pub reconnects_scheduled: u64,
}

/// A message handed to the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transmitted {
    /// Virtual time of transmission
    pub at: Duration,
    /// Transmitted message
    pub message: Message,
    /// Intended recipient
    pub recipient_id: Option<String>,
}

/// One line of the human-readable trace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TraceEntry {
    /// Virtual time
    pub at: Duration,
    /// What happened
    pub what: String,
}

impl fmt::Display for TraceEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}ms {}", self.at.as_millis(), self.what)
    }
}

/// Deterministic driver over a [`Session`] and a virtual clock.
pub struct SimDriver {
    session: Session<SimEnv>,
    env: SimEnv,
    now: Duration,
    /// Keyed by due time, then insertion order for ties
    queue: BTreeMap<(Duration, u64), Scheduled>,
    next_seq: u64,
    stats: DriverStats,
    events: Vec<(Duration, SessionEvent)>,
    transmitted: Vec<Transmitted>,
    trace: Vec<TraceEntry>,
    invariants: Option<InvariantRegistry>,
}

impl SimDriver {
    /// Create a driver over a fresh session. Call [`SimDriver::start`] next.
    pub fn new(env: SimEnv, config: SessionConfig) -> Self {
        let session = Session::new(env.clone(), config);
        Self {
            session,
            env,
            now: Duration::ZERO,
            queue: BTreeMap::new(),
            next_seq: 0,
            stats: DriverStats::default(),
            events: Vec::new(),
            transmitted: Vec::new(),
            trace: Vec::new(),
            invariants: None,
        }
    }

    /// Enable invariant checking after every step.
    #[must_use]
    pub fn with_invariants(mut self, registry: InvariantRegistry) -> Self {
        self.invariants = Some(registry);
        self
    }

    /// Start the session.
    ///
    /// # Errors
    ///
    /// Propagates [`Session::start`] errors.
    pub fn start(&mut self) -> Result<(), SessionError> {
        let actions = self.session.start()?;
        self.execute(actions, "start");
        Ok(())
    }

    /// Manual connect.
    ///
    /// # Errors
    ///
    /// Propagates [`Session::connect`] errors.
    pub fn connect(&mut self) -> Result<(), SessionError> {
        let actions = self.session.connect()?;
        self.execute(actions, "connect");
        Ok(())
    }

    /// Manual reconnect, resetting the retry counter.
    ///
    /// # Errors
    ///
    /// Propagates [`Session::reconnect`] errors.
    pub fn reconnect(&mut self) -> Result<(), SessionError> {
        let actions = self.session.reconnect()?;
        self.execute(actions, "reconnect");
        Ok(())
    }

    /// Report a dropped link.
    ///
    /// # Errors
    ///
    /// Propagates [`Session::link_lost`] errors.
    pub fn link_lost(&mut self) -> Result<(), SessionError> {
        let actions = self.session.link_lost()?;
        self.execute(actions, "link_lost");
        Ok(())
    }

    /// Send a message.
    ///
    /// # Errors
    ///
    /// Propagates [`Session::send_message`] errors.
    pub fn send_message(
        &mut self,
        content: &str,
        recipient_id: Option<&str>,
    ) -> Result<MessageId, SessionError> {
        let (id, actions) = self.session.send_message(content, recipient_id)?;
        self.execute(actions, "send_message");
        Ok(id)
    }

    /// Validate and send a draft.
    ///
    /// # Errors
    ///
    /// Propagates [`Session::send_draft`] errors.
    pub fn send_draft(
        &mut self,
        draft: &str,
        recipient_id: Option<&str>,
    ) -> Result<MessageId, SessionError> {
        let (id, actions) = self.session.send_draft(draft, recipient_id)?;
        self.execute(actions, "send_draft");
        Ok(id)
    }

    /// Post a system notice.
    ///
    /// # Errors
    ///
    /// Propagates [`Session::post_system_notice`] errors.
    pub fn post_system_notice(&mut self, content: &str) -> Result<MessageId, SessionError> {
        let (id, actions) = self.session.post_system_notice(content)?;
        self.execute(actions, "post_system_notice");
        Ok(id)
    }

    /// Record a room join.
    ///
    /// # Errors
    ///
    /// Propagates [`Session::join_room`] errors.
    pub fn join_room(&mut self, room_id: &str) -> Result<(), SessionError> {
        let actions = self.session.join_room(room_id)?;
        self.execute(actions, "join_room");
        Ok(())
    }

    /// Record a room leave.
    ///
    /// # Errors
    ///
    /// Propagates [`Session::leave_room`] errors.
    pub fn leave_room(&mut self, room_id: &str) -> Result<(), SessionError> {
        let actions = self.session.leave_room(room_id)?;
        self.execute(actions, "leave_room");
        Ok(())
    }

    /// Shut the session down and cancel everything it had queued.
    pub fn dispose(&mut self) {
        let actions = self.session.shutdown();
        self.execute(actions, "dispose");
    }

    /// Advance virtual time, firing everything due on the way in order.
    ///
    /// Callbacks scheduled while advancing fire too if they fall due before
    /// the target.
    pub fn advance(&mut self, by: Duration) {
        let target = self.now + by;
        while let Some((&(due, seq), _)) = self.queue.first_key_value() {
            if due > target {
                break;
            }
            let Some(scheduled) = self.queue.remove(&(due, seq)) else {
                break;
            };
            self.move_clock(due);
            self.fire(scheduled);
        }
        self.move_clock(target);
    }

    /// Advance in `step` increments until `done` holds or `limit` elapses.
    ///
    /// Returns true if `done` held before the limit.
    pub fn run_until(
        &mut self,
        step: Duration,
        limit: Duration,
        mut done: impl FnMut(&Session<SimEnv>) -> bool,
    ) -> bool {
        let deadline = self.now + limit;
        while self.now < deadline {
            if done(&self.session) {
                return true;
            }
            self.advance(step.min(deadline - self.now));
        }
        done(&self.session)
    }

    /// Current virtual time since the driver was created.
    pub fn now(&self) -> Duration {
        self.now
    }

    /// The driven session.
    pub fn session(&self) -> &Session<SimEnv> {
        &self.session
    }

    /// The simulation environment.
    pub fn env(&self) -> &SimEnv {
        &self.env
    }

    /// Every published event with its virtual time.
    pub fn events(&self) -> &[(Duration, SessionEvent)] {
        &self.events
    }

    /// Every message handed to the transport.
    pub fn transmitted(&self) -> &[Transmitted] {
        &self.transmitted
    }

    /// Human-readable trace.
    pub fn trace(&self) -> &[TraceEntry] {
        &self.trace
    }

    /// Trace rendered one entry per line.
    pub fn render_trace(&self) -> String {
        self.trace.iter().map(ToString::to_string).collect::<Vec<_>>().join("\n")
    }

    /// Execution counters.
    pub fn stats(&self) -> &DriverStats {
        &self.stats
    }

    /// Handshakes currently in flight.
    pub fn pending_handshakes(&self) -> usize {
        self.queue.values().filter(|s| matches!(s, Scheduled::Handshake { .. })).count()
    }

    /// Timers of `kind` currently queued.
    pub fn pending_timers(&self, kind: Timer) -> usize {
        self.queue
            .values()
            .filter(|s| matches!(s, Scheduled::Timer { timer, .. } if *timer == kind))
            .count()
    }

    /// Total queued callbacks of any kind.
    pub fn pending_total(&self) -> usize {
        self.queue.len()
    }

    /// Virtual time of the earliest queued callback.
    pub fn next_due(&self) -> Option<Duration> {
        self.queue.first_key_value().map(|(&(due, _), _)| due)
    }

    /// Due time of the queued timer of `kind`, if exactly one is queued.
    pub fn due_of(&self, kind: Timer) -> Option<Duration> {
        let mut due = self.queue.iter().filter_map(|(&(at, _), s)| match s {
            Scheduled::Timer { timer, .. } if *timer == kind => Some(at),
            _ => None,
        });
        let first = due.next()?;
        if due.next().is_some() { None } else { Some(first) }
    }

    /// Snapshot of the session and the queue.
    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot::capture(&self.session, self.queue_counts())
    }

    /// Queue contents grouped by kind.
    pub fn queue_counts(&self) -> QueueCounts {
        QueueCounts {
            handshakes: self.pending_handshakes(),
            reconnects: self.pending_timers(Timer::Reconnect),
            disconnect_checks: self.pending_timers(Timer::DisconnectCheck),
            peer_replies: self.pending_timers(Timer::PeerReply),
        }
    }

    fn move_clock(&mut self, to: Duration) {
        if to > self.now {
            self.env.advance_wall_clock(to - self.now);
            self.now = to;
        }
    }

    fn fire(&mut self, scheduled: Scheduled) {
        match scheduled {
            Scheduled::Timer { timer, token } => {
                self.stats.timers_fired += 1;
                let actions = self.session.timer_fired(timer, token);
                self.execute(actions, "timer");
            },
            Scheduled::Handshake { attempt } => {
                let outcome = self.session.config().link.handshake_outcome(&self.env);
                match &outcome {
                    Ok(()) => {
                        self.stats.handshakes_succeeded += 1;
                        self.record(format!("handshake {attempt} ok"));
                    },
                    Err(_) => {
                        self.stats.handshakes_failed += 1;
                        self.record(format!("handshake {attempt} failed"));
                    },
                }
                let actions = self.session.handshake_completed(attempt, outcome);
                self.execute(actions, "handshake");
            },
        }
    }

    fn execute(&mut self, actions: Vec<SessionAction>, context: &str) {
        for action in actions {
            match action {
                SessionAction::StartHandshake { attempt } => {
                    self.stats.handshakes_started += 1;
                    let latency = self.session.config().link.handshake_latency(&self.env);
                    tracing::trace!(%attempt, ?latency, "sim handshake started");
                    self.enqueue(latency, Scheduled::Handshake { attempt });
                },
                SessionAction::AbortHandshake { attempt } => {
                    self.stats.handshakes_aborted += 1;
                    self.dequeue(Scheduled::Handshake { attempt });
                },
                SessionAction::ScheduleTimer { timer, token, delay } => {
                    self.stats.timers_scheduled += 1;
                    if timer == Timer::Reconnect {
                        self.stats.reconnects_scheduled += 1;
                    }
                    self.enqueue(delay, Scheduled::Timer { timer, token });
                },
                SessionAction::CancelTimer { timer, token } => {
                    self.stats.timers_cancelled += 1;
                    self.dequeue(Scheduled::Timer { timer, token });
                },
                SessionAction::Transmit { message, recipient_id } => {
                    self.transmitted.push(Transmitted { at: self.now, message, recipient_id });
                },
                SessionAction::Notify(event) => {
                    self.record(describe(&event));
                    self.events.push((self.now, event));
                },
            }
        }

        if let Some(registry) = &self.invariants {
            let snapshot = SessionSnapshot::capture(&self.session, self.queue_counts());
            registry.assert_all(&snapshot, &format!("after {context} at {:?}", self.now));
        }
    }

    fn enqueue(&mut self, delay: Duration, scheduled: Scheduled) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.queue.insert((self.now + delay, seq), scheduled);
    }

    fn dequeue(&mut self, target: Scheduled) {
        self.queue.retain(|_, scheduled| *scheduled != target);
    }

    fn record(&mut self, what: String) {
        self.trace.push(TraceEntry { at: self.now, what });
    }
}

fn describe(event: &SessionEvent) -> String {
    match event {
        SessionEvent::StateChanged { from, to } => format!("state {from:?} -> {to:?}"),
        SessionEvent::MessageAppended(message) => {
            format!("message {} from {}", message.id, message.sender_id)
        },
        SessionEvent::PeerTyping { peer_id } => format!("typing {peer_id}"),
        SessionEvent::RoomJoined { room_id } => format!("joined {room_id}"),
        SessionEvent::RoomLeft { room_id } => format!("left {room_id}"),
    }
}
