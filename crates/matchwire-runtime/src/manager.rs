//! Connection manager: the session state machine on a tokio runtime.
//!
//! [`ConnectionManager`] is a cheaply cloneable handle. Every clone drives the
//! same [`Session`]; the session and the abort handles of its tasks sit behind
//! one lock, so operations, timer expirations, and handshake results are
//! applied one at a time.
//!
//! # Task model
//!
//! - `ScheduleTimer` spawns a task that sleeps on the environment and then
//!   reports the expiration. `CancelTimer` aborts it.
//! - `StartHandshake` spawns a task running [`Transport::handshake`].
//!   `AbortHandshake` aborts it.
//! - `Transmit` spawns a fire-and-forget [`Transport::send`].
//!
//! Tasks hold only a weak reference to the manager. [`ConnectionManager::dispose`]
//! aborts all of them, and so does dropping the last handle.
//!
//! # Subscriptions
//!
//! [`ConnectionManager::subscribe_state`] returns a `watch` receiver that
//! always holds the latest state. [`ConnectionManager::subscribe`] returns a
//! `broadcast` receiver of every [`SessionEvent`].

use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use matchwire_core::{
    AttemptId, ConnectionError, ConnectionState, Environment, Message, MessageId, Session,
    SessionAction, SessionConfig, SessionError, SessionEvent, Timer, TimerToken,
};
use tokio::{
    runtime::Handle,
    sync::{broadcast, watch},
};

use crate::{error::ManagerError, tasks::Tasks, transport::Transport};

/// Events buffered per subscriber before the slowest one starts lagging.
pub const EVENT_CAPACITY: usize = 256;

struct Core<E: Environment> {
    session: Session<E>,
    tasks: Tasks,
}

struct Shared<E: Environment, T: Transport> {
    core: Mutex<Core<E>>,
    transport: Arc<T>,
    runtime: Handle,
    state_tx: watch::Sender<ConnectionState>,
    events_tx: broadcast::Sender<SessionEvent>,
}

/// Shared handle to a running connection session.
pub struct ConnectionManager<E: Environment, T: Transport> {
    shared: Arc<Shared<E, T>>,
}

impl<E: Environment, T: Transport> Clone for ConnectionManager<E, T> {
    fn clone(&self) -> Self {
        Self { shared: Arc::clone(&self.shared) }
    }
}

impl<E: Environment, T: Transport> std::fmt::Debug for ConnectionManager<E, T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let core = self.shared.lock();
        f.debug_struct("ConnectionManager")
            .field("state", &core.session.state())
            .field("lifecycle", &core.session.lifecycle())
            .field("messages", &core.session.messages().len())
            .field("pending_tasks", &core.tasks.pending())
            .finish()
    }
}

impl<E: Environment, T: Transport> ConnectionManager<E, T> {
    /// Create a manager on the current tokio runtime and issue the first
    /// connection attempt.
    ///
    /// # Errors
    ///
    /// - `ManagerError::NoRuntime` if called outside a tokio runtime
    pub fn create(env: E, config: SessionConfig, transport: T) -> Result<Self, ManagerError> {
        let runtime = Handle::try_current()?;

        let session = Session::new(env, config);
        let (state_tx, _) = watch::channel(session.state());
        let (events_tx, _) = broadcast::channel(EVENT_CAPACITY);

        let shared = Arc::new(Shared {
            core: Mutex::new(Core { session, tasks: Tasks::default() }),
            transport: Arc::new(transport),
            runtime,
            state_tx,
            events_tx,
        });

        {
            let mut core = shared.lock();
            let actions = core.session.start()?;
            shared.execute(&mut core, actions);
        }

        tracing::info!("connection manager created");
        Ok(Self { shared })
    }

    /// Cancel every pending timer, handshake, and send.
    ///
    /// Idempotent. Afterwards no state transition or log mutation happens and
    /// mutating operations fail with [`SessionError::Disposed`].
    pub fn dispose(&self) {
        let mut core = self.shared.lock();
        let actions = core.session.shutdown();
        if actions.is_empty() && core.tasks.pending() == 0 {
            return;
        }
        self.shared.execute(&mut core, actions);
        core.tasks.abort_all();
        tracing::info!("connection manager disposed");
    }

    /// Start a connection attempt, superseding any pending one.
    ///
    /// # Errors
    ///
    /// `ManagerError::Session` after dispose.
    pub fn connect(&self) -> Result<(), ManagerError> {
        self.apply(|session| session.connect())
    }

    /// Reset the retry counter and connect.
    ///
    /// # Errors
    ///
    /// `ManagerError::Session` after dispose.
    pub fn reconnect(&self) -> Result<(), ManagerError> {
        self.apply(|session| session.reconnect())
    }

    /// Report that the link dropped, for transports that detect it.
    ///
    /// # Errors
    ///
    /// `ManagerError::Session` after dispose.
    pub fn report_link_lost(&self) -> Result<(), ManagerError> {
        self.apply(|session| session.link_lost())
    }

    /// Append a message to the log and transmit it if connected.
    ///
    /// Returns as soon as the message is in the log.
    ///
    /// # Errors
    ///
    /// `ManagerError::Session` after dispose.
    pub fn send_message(
        &self,
        content: impl Into<String>,
        recipient_id: Option<&str>,
    ) -> Result<MessageId, ManagerError> {
        self.apply_with(|session| session.send_message(content, recipient_id))
    }

    /// Validate a draft, then send it.
    ///
    /// # Errors
    ///
    /// - `ManagerError::Session` wrapping `InvalidDraft` for empty or
    ///   oversized drafts
    /// - `ManagerError::Session` after dispose
    pub fn send_draft(
        &self,
        draft: &str,
        recipient_id: Option<&str>,
    ) -> Result<MessageId, ManagerError> {
        self.apply_with(|session| session.send_draft(draft, recipient_id))
    }

    /// Append a system notice to the log.
    ///
    /// # Errors
    ///
    /// `ManagerError::Session` after dispose.
    pub fn post_system_notice(&self, content: impl Into<String>) -> Result<MessageId, ManagerError> {
        self.apply_with(|session| session.post_system_notice(content))
    }

    /// Record intent to join a room.
    ///
    /// # Errors
    ///
    /// `ManagerError::Session` after dispose.
    pub fn join_room(&self, room_id: &str) -> Result<(), ManagerError> {
        self.apply(|session| session.join_room(room_id))
    }

    /// Record intent to leave a room.
    ///
    /// # Errors
    ///
    /// `ManagerError::Session` after dispose.
    pub fn leave_room(&self, room_id: &str) -> Result<(), ManagerError> {
        self.apply(|session| session.leave_room(room_id))
    }

    /// Current connection state.
    pub fn state(&self) -> ConnectionState {
        self.shared.lock().session.state()
    }

    /// True if the link is up.
    pub fn is_connected(&self) -> bool {
        self.shared.lock().session.is_connected()
    }

    /// Snapshot of the message log.
    pub fn messages(&self) -> Vec<Message> {
        self.shared.lock().session.messages().to_vec()
    }

    /// Placeholder presence list.
    pub fn online_users(&self) -> Vec<String> {
        self.shared.lock().session.online_users().to_vec()
    }

    /// Rooms joined and not yet left.
    pub fn joined_rooms(&self) -> Vec<String> {
        self.shared.lock().session.joined_rooms().map(str::to_string).collect()
    }

    /// Automatic retries used since the last reset.
    pub fn retry_attempts(&self) -> u32 {
        self.shared.lock().session.retry_attempts()
    }

    /// True after [`ConnectionManager::dispose`].
    pub fn is_disposed(&self) -> bool {
        self.shared.lock().session.is_disposed()
    }

    /// Timer and handshake tasks currently alive.
    pub fn pending_tasks(&self) -> usize {
        self.shared.lock().tasks.pending()
    }

    /// Receiver that always holds the latest connection state.
    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.shared.state_tx.subscribe()
    }

    /// Receiver of every event published from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.shared.events_tx.subscribe()
    }

    fn apply<F>(&self, op: F) -> Result<(), ManagerError>
    where
        F: FnOnce(&mut Session<E>) -> Result<Vec<SessionAction>, SessionError>,
    {
        let mut core = self.shared.lock();
        let actions = op(&mut core.session)?;
        self.shared.execute(&mut core, actions);
        Ok(())
    }

    fn apply_with<F>(&self, op: F) -> Result<MessageId, ManagerError>
    where
        F: FnOnce(&mut Session<E>) -> Result<(MessageId, Vec<SessionAction>), SessionError>,
    {
        let mut core = self.shared.lock();
        let (id, actions) = op(&mut core.session)?;
        self.shared.execute(&mut core, actions);
        Ok(id)
    }
}

impl<E: Environment, T: Transport> Shared<E, T> {
    fn lock(&self) -> MutexGuard<'_, Core<E>> {
        self.core.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn timer_fired(self: &Arc<Self>, timer: Timer, token: TimerToken) {
        let mut core = self.lock();
        core.tasks.finish_timer(token);
        let actions = core.session.timer_fired(timer, token);
        self.execute(&mut core, actions);
    }

    fn handshake_completed(
        self: &Arc<Self>,
        attempt: AttemptId,
        outcome: Result<(), ConnectionError>,
    ) {
        let mut core = self.lock();
        core.tasks.finish_handshake(attempt);
        let actions = core.session.handshake_completed(attempt, outcome);
        self.execute(&mut core, actions);
    }

    fn execute(self: &Arc<Self>, core: &mut Core<E>, actions: Vec<SessionAction>) {
        for action in actions {
            match action {
                SessionAction::StartHandshake { attempt } => {
                    let weak = Arc::downgrade(self);
                    let transport = Arc::clone(&self.transport);
                    let task = self.runtime.spawn(async move {
                        let outcome = transport.handshake().await;
                        if let Err(err) = &outcome
                            && !err.is_transient()
                        {
                            tracing::warn!(%attempt, error = %err, "transport handshake error");
                        }
                        with_shared(&weak, |shared| shared.handshake_completed(attempt, outcome));
                    });
                    core.tasks.track_handshake(attempt, task.abort_handle());
                },
                SessionAction::AbortHandshake { attempt } => {
                    core.tasks.abort_handshake(attempt);
                },
                SessionAction::ScheduleTimer { timer, token, delay } => {
                    tracing::debug!(?timer, %token, ?delay, "timer scheduled");
                    let weak = Arc::downgrade(self);
                    let env = core.session.env().clone();
                    let task = self.runtime.spawn(async move {
                        env.sleep(delay).await;
                        with_shared(&weak, |shared| shared.timer_fired(timer, token));
                    });
                    core.tasks.track_timer(token, task.abort_handle());
                },
                SessionAction::CancelTimer { timer, token } => {
                    tracing::debug!(?timer, %token, "timer cancelled");
                    core.tasks.cancel_timer(token);
                },
                SessionAction::Transmit { message, recipient_id } => {
                    let transport = Arc::clone(&self.transport);
                    core.tasks.sends().spawn_on(
                        async move {
                            if let Err(err) =
                                transport.send(&message, recipient_id.as_deref()).await
                            {
                                tracing::warn!(id = %message.id, error = %err, "send failed");
                            }
                        },
                        &self.runtime,
                    );
                },
                SessionAction::Notify(event) => self.publish(event),
            }
        }
    }

    fn publish(&self, event: SessionEvent) {
        if let SessionEvent::StateChanged { to, .. } = event {
            self.state_tx.send_replace(to);
        }
        // No subscribers is fine
        let _ = self.events_tx.send(event);
    }
}

fn with_shared<E: Environment, T: Transport>(
    weak: &Weak<Shared<E, T>>,
    f: impl FnOnce(&Arc<Shared<E, T>>),
) {
    match weak.upgrade() {
        Some(shared) => f(&shared),
        None => tracing::debug!("manager dropped, ignoring task completion"),
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use matchwire_core::SimulatedLink;
    use matchwire_harness::{DRAW_FAIL, DRAW_SUCCEED, SimEnv};

    use super::*;
    use crate::transport::SimulatedTransport;

    type SimManager = ConnectionManager<SimEnv, SimulatedTransport<SimEnv>>;

    fn manager(env: SimEnv) -> SimManager {
        let transport = SimulatedTransport::new(env.clone(), SimulatedLink::default());
        ConnectionManager::create(env, SessionConfig::default(), transport).unwrap()
    }

    #[test]
    fn create_outside_runtime_fails() {
        let env = SimEnv::new();
        let transport = SimulatedTransport::new(env.clone(), SimulatedLink::default());
        let result = ConnectionManager::create(env, SessionConfig::default(), transport);
        assert!(matches!(result, Err(ManagerError::NoRuntime(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn fresh_manager_is_connecting() {
        let manager = manager(SimEnv::fixed(DRAW_SUCCEED));

        assert_eq!(manager.state(), ConnectionState::Connecting);
        assert!(manager.messages().is_empty());
        assert_eq!(manager.retry_attempts(), 0);
        // Handshake plus disconnect check
        assert_eq!(manager.pending_tasks(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn connects_after_latency() {
        let manager = manager(SimEnv::fixed(DRAW_SUCCEED));
        let mut state = manager.subscribe_state();

        state.wait_for(|s| *s == ConnectionState::Connected).await.unwrap();
        assert!(manager.is_connected());
        assert_eq!(manager.pending_tasks(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn dispose_aborts_all_tasks() {
        let manager = manager(SimEnv::fixed(DRAW_SUCCEED));
        manager.dispose();

        assert_eq!(manager.pending_tasks(), 0);
        assert!(manager.is_disposed());
        assert!(manager.send_message("late", None).unwrap_err().is_disposed());
        assert!(matches!(
            manager.connect(),
            Err(ManagerError::Session(SessionError::Disposed))
        ));

        tokio::time::sleep(Duration::from_secs(3600)).await;
        assert_eq!(manager.state(), ConnectionState::Connecting);
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_retries_stop_scheduling() {
        let manager = manager(SimEnv::fixed(DRAW_FAIL));

        tokio::time::sleep(Duration::from_secs(120)).await;

        assert_eq!(manager.state(), ConnectionState::Error);
        assert_eq!(manager.retry_attempts(), 3);
        // Only the disconnect check is left
        assert_eq!(manager.pending_tasks(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn dropping_last_handle_aborts_tasks() {
        let manager = manager(SimEnv::fixed(DRAW_SUCCEED));
        let mut events = manager.subscribe();
        drop(manager);

        tokio::time::sleep(Duration::from_secs(120)).await;
        // Sender dropped with the manager; nothing was published
        assert!(matches!(events.recv().await, Err(broadcast::error::RecvError::Closed)));
    }
}
