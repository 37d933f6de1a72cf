//! End-to-end manager run inside a turmoil simulation.
//!
//! Turmoil owns the clock, so the full connect, drop, reconnect, and reply
//! cycle runs in simulated time with the production task model.

use std::time::Duration;

use matchwire_core::{ConnectionState, SessionConfig};
use matchwire_harness::{DRAW_DROP, DRAW_SUCCEED, SimEnv};
use matchwire_runtime::{ConnectionManager, SimulatedTransport};

#[test]
fn manager_recovers_from_link_drop() {
    let mut sim = turmoil::Builder::new().simulation_duration(Duration::from_secs(300)).build();

    sim.client("player", async {
        let env = SimEnv::fixed(DRAW_SUCCEED);
        // latency, outcome, reply delay, reply pick, then the first link
        // check drops the link
        env.push_draws([DRAW_SUCCEED, DRAW_SUCCEED, DRAW_SUCCEED, DRAW_SUCCEED, DRAW_DROP]);

        let config = SessionConfig::default().with_peer_replies();
        let transport = SimulatedTransport::new(env.clone(), config.link.clone());
        let manager = ConnectionManager::create(env, config, transport)?;
        let mut state = manager.subscribe_state();

        state.wait_for(|s| *s == ConnectionState::Connected).await?;
        manager.send_message("glhf", Some("user2"))?;

        state.wait_for(|s| *s == ConnectionState::Disconnected).await?;
        state.wait_for(|s| *s == ConnectionState::Connected).await?;

        let log = manager.messages();
        assert_eq!(log.len(), 2);
        assert_eq!(log[0].content, "glhf");
        assert_eq!(log[1].sender_id, "user2");

        manager.dispose();
        tokio::time::sleep(Duration::from_secs(120)).await;
        assert_eq!(manager.state(), ConnectionState::Connected);
        assert_eq!(manager.pending_tasks(), 0);

        Ok(())
    });

    sim.run().expect("simulation failed");
}
