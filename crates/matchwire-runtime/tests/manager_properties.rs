//! Property-based tests for the connection manager.
//!
//! Each case builds its own paused current-thread runtime, so arbitrary
//! operation sequences interleaved with arbitrary sleeps stay deterministic.

use std::time::Duration;

use matchwire_core::{ConnectionState, SessionConfig, SessionEvent};
use matchwire_harness::SimEnv;
use matchwire_runtime::{ConnectionManager, SimulatedTransport};
use proptest::prelude::*;
use tokio::sync::broadcast::error::TryRecvError;

#[derive(Debug, Clone)]
enum Op {
    Connect,
    Reconnect,
    LinkLost,
    Send(String),
    Reply,
    Sleep(u64),
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        1 => Just(Op::Connect),
        1 => Just(Op::Reconnect),
        1 => Just(Op::LinkLost),
        2 => "[a-z]{1,10}".prop_map(Op::Send),
        1 => Just(Op::Reply),
        4 => (1u64..40_000).prop_map(Op::Sleep),
    ]
}

fn paused_runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_time()
        .start_paused(true)
        .build()
        .unwrap()
}

async fn apply(manager: &ConnectionManager<SimEnv, SimulatedTransport<SimEnv>>, op: &Op) {
    let _ = match op {
        Op::Connect => manager.connect(),
        Op::Reconnect => manager.reconnect(),
        Op::LinkLost => manager.report_link_lost(),
        Op::Send(text) => manager.send_message(text.as_str(), None).map(drop),
        Op::Reply => manager.send_message("ping", Some("user2")).map(drop),
        Op::Sleep(ms) => {
            tokio::time::sleep(Duration::from_millis(*ms)).await;
            Ok(())
        },
    };
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// Property: nothing happens after dispose, whatever ran before
    #[test]
    fn prop_dispose_is_final(
        seed in any::<u64>(),
        before in prop::collection::vec(op_strategy(), 0..20),
        idle_secs in 0u64..7200
    ) {
        let rt = paused_runtime();
        rt.block_on(async {
            let env = SimEnv::with_seed(seed);
            let config = SessionConfig::default().with_peer_replies();
            let transport = SimulatedTransport::new(env.clone(), config.link.clone());
            let manager = ConnectionManager::create(env, config, transport).unwrap();

            for op in &before {
                apply(&manager, op).await;
            }

            manager.dispose();
            let state = manager.state();
            let log_len = manager.messages().len();
            let mut events = manager.subscribe();

            tokio::time::sleep(Duration::from_secs(idle_secs)).await;

            prop_assert_eq!(manager.pending_tasks(), 0);
            prop_assert_eq!(manager.state(), state);
            prop_assert_eq!(manager.messages().len(), log_len);
            prop_assert_eq!(events.try_recv(), Err(TryRecvError::Empty));
            Ok(())
        })?;
    }

    /// Property: retries never exceed the bound and the task count matches
    /// the state
    #[test]
    fn prop_task_count_matches_state(
        seed in any::<u64>(),
        ops in prop::collection::vec(op_strategy(), 0..30)
    ) {
        let rt = paused_runtime();
        rt.block_on(async {
            let env = SimEnv::with_seed(seed);
            let config = SessionConfig::default();
            let transport = SimulatedTransport::new(env.clone(), config.link.clone());
            let manager = ConnectionManager::create(env, config, transport).unwrap();

            for op in &ops {
                apply(&manager, op).await;

                prop_assert!(manager.retry_attempts() <= 3);
                // Disconnect check, plus one handshake or reconnect timer
                // unless connected or out of retries
                let expected: std::ops::RangeInclusive<usize> = match manager.state() {
                    ConnectionState::Connected => 1..=1,
                    ConnectionState::Error if manager.retry_attempts() == 3 => 1..=2,
                    _ => 2..=2,
                };
                prop_assert!(expected.contains(&manager.pending_tasks()));
            }
            Ok(())
        })?;
    }
}

/// Events carry the manager's messages in log order.
#[test]
fn appended_events_mirror_the_log() {
    let rt = paused_runtime();
    rt.block_on(async {
        let env = SimEnv::new();
        let transport = SimulatedTransport::new(env.clone(), SessionConfig::default().link);
        let manager =
            ConnectionManager::create(env, SessionConfig::default(), transport).unwrap();
        let mut events = manager.subscribe();

        for text in ["one", "two", "three"] {
            manager.send_message(text, None).unwrap();
        }

        let mut appended = Vec::new();
        while let Ok(event) = events.try_recv() {
            if let SessionEvent::MessageAppended(message) = event {
                appended.push(message);
            }
        }
        assert_eq!(appended, manager.messages());
    });
}
