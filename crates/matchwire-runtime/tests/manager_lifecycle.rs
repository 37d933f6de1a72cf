//! Connection manager behavior on a paused tokio clock.
//!
//! Tokio auto-advances a paused clock whenever every task is idle, so these
//! tests sleep through minutes of backoff and link checks instantly while the
//! real timer tasks fire in order.

use std::time::Duration;

use matchwire_core::{ConnectionState, MessageKind, SessionConfig, SessionEvent, SimulatedLink};
use matchwire_harness::{DRAW_DROP, DRAW_FAIL, DRAW_SUCCEED, SimEnv};
use matchwire_runtime::{ConnectionManager, ManagerError, SimulatedTransport};
use tokio::{
    sync::broadcast::{self, error::TryRecvError},
    time::Instant,
};

type SimManager = ConnectionManager<SimEnv, SimulatedTransport<SimEnv>>;

fn manager_with(env: &SimEnv, config: SessionConfig) -> SimManager {
    let transport = SimulatedTransport::new(env.clone(), config.link.clone());
    ConnectionManager::create(env.clone(), config, transport).unwrap()
}

fn manager(env: &SimEnv) -> SimManager {
    manager_with(env, SessionConfig::default())
}

async fn wait_for_state(manager: &SimManager, target: ConnectionState) {
    let mut state = manager.subscribe_state();
    state.wait_for(|s| *s == target).await.unwrap();
}

fn drain_states(events: &mut broadcast::Receiver<SessionEvent>) -> Vec<ConnectionState> {
    let mut states = Vec::new();
    while let Ok(event) = events.try_recv() {
        if let SessionEvent::StateChanged { to, .. } = event {
            states.push(to);
        }
    }
    states
}

#[tokio::test(start_paused = true)]
async fn failed_attempt_is_retried_after_backoff() {
    let env = SimEnv::fixed(DRAW_SUCCEED);
    // Attempt 1: 1000ms then fail. Attempt 2 uses the fixed draw: 2000ms, ok
    env.push_draws([0.0, DRAW_FAIL]);
    let start = Instant::now();
    let manager = manager(&env);
    let mut events = manager.subscribe();

    wait_for_state(&manager, ConnectionState::Connected).await;

    assert_eq!(start.elapsed(), Duration::from_secs(5));
    assert_eq!(manager.retry_attempts(), 0);
    assert_eq!(
        drain_states(&mut events),
        [ConnectionState::Error, ConnectionState::Connecting, ConnectionState::Connected]
    );
}

#[tokio::test(start_paused = true)]
async fn double_connect_keeps_one_attempt() {
    let manager = manager(&SimEnv::fixed(DRAW_SUCCEED));

    manager.connect().unwrap();
    manager.connect().unwrap();

    // One handshake plus the disconnect check
    assert_eq!(manager.pending_tasks(), 2);

    let start = Instant::now();
    wait_for_state(&manager, ConnectionState::Connected).await;
    assert_eq!(start.elapsed(), Duration::from_secs(2));
}

#[tokio::test(start_paused = true)]
async fn exhausted_retries_wait_for_manual_reconnect() {
    let env = SimEnv::fixed(DRAW_FAIL);
    let manager = manager(&env);

    tokio::time::sleep(Duration::from_secs(600)).await;
    assert_eq!(manager.state(), ConnectionState::Error);
    assert_eq!(manager.retry_attempts(), 3);

    env.push_draws([DRAW_SUCCEED, DRAW_SUCCEED]);
    manager.reconnect().unwrap();
    assert_eq!(manager.retry_attempts(), 0);
    assert_eq!(manager.state(), ConnectionState::Connecting);

    wait_for_state(&manager, ConnectionState::Connected).await;
}

#[tokio::test(start_paused = true)]
async fn link_drop_reconnects() {
    let env = SimEnv::fixed(DRAW_SUCCEED);
    // latency, outcome, then the first 30s check drops the link
    env.push_draws([DRAW_SUCCEED, DRAW_SUCCEED, DRAW_DROP]);
    let manager = manager(&env);
    let mut events = manager.subscribe();

    tokio::time::sleep(Duration::from_secs(31)).await;
    assert_eq!(manager.state(), ConnectionState::Disconnected);

    // 3s reconnect delay, 2s handshake
    tokio::time::sleep(Duration::from_secs(5)).await;
    assert!(manager.is_connected());
    assert_eq!(
        drain_states(&mut events),
        [
            ConnectionState::Connected,
            ConnectionState::Disconnected,
            ConnectionState::Connecting,
            ConnectionState::Connected,
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn reported_link_loss_reconnects() {
    let manager = manager(&SimEnv::fixed(DRAW_SUCCEED));
    wait_for_state(&manager, ConnectionState::Connected).await;

    manager.report_link_lost().unwrap();
    assert_eq!(manager.state(), ConnectionState::Disconnected);

    wait_for_state(&manager, ConnectionState::Connected).await;
}

#[tokio::test(start_paused = true)]
async fn send_appends_synchronously() {
    let manager = manager(&SimEnv::new());
    let mut events = manager.subscribe();

    let a = manager.send_message("a", None).unwrap();
    let b = manager.send_message("b", None).unwrap();

    let log = manager.messages();
    assert_eq!(log.len(), 2);
    assert_eq!((&log[0].id, &log[1].id), (&a, &b));
    assert!(log[0].timestamp <= log[1].timestamp);
    assert!(matches!(events.try_recv(), Ok(SessionEvent::MessageAppended(m)) if m.id == a));
}

#[tokio::test(start_paused = true)]
async fn dispose_stops_all_activity() {
    let manager = manager(&SimEnv::fixed(DRAW_SUCCEED));
    manager.send_message("before", None).unwrap();
    let mut events = manager.subscribe();

    manager.dispose();
    manager.dispose();
    tokio::time::sleep(Duration::from_secs(24 * 3600)).await;

    assert_eq!(events.try_recv(), Err(TryRecvError::Empty));
    assert_eq!(manager.state(), ConnectionState::Connecting);
    assert_eq!(manager.messages().len(), 1);
    assert_eq!(manager.pending_tasks(), 0);
    assert!(matches!(manager.reconnect(), Err(ManagerError::Session(_))));
}

#[tokio::test(start_paused = true)]
async fn clones_share_one_session() {
    let manager = manager(&SimEnv::new());
    let other = manager.clone();

    other.send_message("from a clone", None).unwrap();
    other.join_room("lobby").unwrap();

    assert_eq!(manager.messages().len(), 1);
    assert_eq!(manager.joined_rooms(), ["lobby"]);

    manager.dispose();
    assert!(other.is_disposed());
}

#[tokio::test(start_paused = true)]
async fn peer_reply_follows_typing() {
    let config = SessionConfig::default().with_peer_replies();
    let manager = manager_with(&SimEnv::fixed(DRAW_SUCCEED), config);
    let mut events = manager.subscribe();

    manager.send_message("hello", Some("user2")).unwrap();
    tokio::time::sleep(Duration::from_secs(3)).await;

    let log = manager.messages();
    assert_eq!(log.len(), 2);
    assert_eq!(log[1].sender_id, "user2");

    let mut saw_typing = false;
    while let Ok(event) = events.try_recv() {
        if let SessionEvent::PeerTyping { peer_id } = event {
            saw_typing = peer_id == "user2";
        }
    }
    assert!(saw_typing);
}

#[tokio::test(start_paused = true)]
async fn drafts_and_notices() {
    let manager = manager(&SimEnv::new());

    assert!(manager.send_draft("  ", None).is_err());
    manager.send_draft(" glhf ", None).unwrap();
    manager.post_system_notice("Loading chat history...").unwrap();

    let log = manager.messages();
    assert_eq!(log[0].content, "glhf");
    assert_eq!(log[1].kind, MessageKind::System);
    assert_eq!(manager.online_users(), ["user1", "user2", "user3"]);
}

#[tokio::test(start_paused = true)]
async fn unreachable_link_never_connects() {
    let config = SessionConfig::default().with_link(SimulatedLink::unreachable());
    let manager = manager_with(&SimEnv::with_seed(3), config);

    tokio::time::sleep(Duration::from_secs(600)).await;
    assert_eq!(manager.state(), ConnectionState::Error);
    assert_eq!(manager.pending_tasks(), 1);
}
