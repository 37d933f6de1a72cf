//! matchwire demo binary.
//!
//! Runs a connection manager over the simulated transport, logs every event,
//! sends the given messages once connected, and disposes the manager on exit.
//!
//! # Usage
//!
//! ```bash
//! # Default link (90% handshake success, 5% drop per 30s check)
//! matchwire-demo --run-for 120 --message "gg" --message "rematch?"
//!
//! # Flaky link with simulated replies from user2
//! matchwire-demo --success-rate 0.3 --recipient user2 --peer-replies --message "hi"
//! ```

use std::time::Duration;

use clap::Parser;
use matchwire_core::{ConnectionState, SessionConfig, SessionEvent, SimulatedLink};
use matchwire_runtime::{ConnectionManager, SimulatedTransport, SystemEnv};
use tokio::sync::broadcast::error::RecvError;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// matchwire connection demo
#[derive(Parser, Debug)]
#[command(name = "matchwire-demo")]
#[command(about = "Simulated real-time connection for the matchmaking chat")]
#[command(version)]
struct Args {
    /// Probability that a handshake succeeds
    #[arg(long, default_value = "0.9", value_parser = parse_probability)]
    success_rate: f64,

    /// Probability that a connected link drops at each check
    #[arg(long, default_value = "0.05", value_parser = parse_probability)]
    disconnect_probability: f64,

    /// Seconds to run before disposing the manager
    #[arg(long, default_value = "60")]
    run_for: u64,

    /// Message to send once connected (repeatable)
    #[arg(short, long)]
    message: Vec<String>,

    /// Recipient of the sent messages
    #[arg(short, long)]
    recipient: Option<String>,

    /// Simulate replies from the recipient
    #[arg(long)]
    peer_replies: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

fn parse_probability(s: &str) -> Result<f64, String> {
    let value: f64 = s.parse().map_err(|e| format!("not a number: {e}"))?;
    if (0.0..=1.0).contains(&value) {
        Ok(value)
    } else {
        Err(format!("{value} is not in [0, 1]"))
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));

    tracing_subscriber::registry().with(fmt::layer()).with(filter).init();

    let link = SimulatedLink {
        success_rate: args.success_rate,
        disconnect_probability: args.disconnect_probability,
        ..SimulatedLink::default()
    };
    let mut config = SessionConfig::default().with_link(link.clone());
    if args.peer_replies {
        config = config.with_peer_replies();
    }

    let env = SystemEnv::new();
    let manager = ConnectionManager::create(env, config, SimulatedTransport::new(env, link))?;
    let mut events = manager.subscribe();
    let mut state = manager.subscribe_state();

    let logger = tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => log_event(&event),
                Err(RecvError::Lagged(skipped)) => tracing::warn!(skipped, "event log lagged"),
                Err(RecvError::Closed) => break,
            }
        }
    });

    manager.post_system_notice("Loading chat history...")?;
    tracing::info!(users = ?manager.online_users(), "online");

    let deadline = tokio::time::sleep(Duration::from_secs(args.run_for));
    tokio::pin!(deadline);

    let connected = tokio::select! {
        result = state.wait_for(|s| *s == ConnectionState::Connected) => result.is_ok(),
        () = &mut deadline => false,
    };

    if connected {
        for message in &args.message {
            manager.send_draft(message, args.recipient.as_deref())?;
        }
        tokio::select! {
            () = &mut deadline => {},
            _ = tokio::signal::ctrl_c() => tracing::info!("interrupted"),
        }
    } else {
        tracing::warn!(state = ?manager.state(), "never connected");
    }

    tracing::info!(
        state = ?manager.state(),
        messages = manager.messages().len(),
        retries = manager.retry_attempts(),
        "shutting down"
    );
    manager.dispose();
    drop(manager);

    // The event channel closes with the last manager handle
    logger.await?;
    Ok(())
}

fn log_event(event: &SessionEvent) {
    match event {
        SessionEvent::StateChanged { from, to } => {
            tracing::info!(?from, ?to, "connection state");
        },
        SessionEvent::MessageAppended(message) => {
            tracing::info!(
                id = %message.id,
                from = %message.sender_name,
                kind = ?message.kind,
                "{}",
                message.content
            );
        },
        SessionEvent::PeerTyping { peer_id } => tracing::info!(%peer_id, "typing..."),
        SessionEvent::RoomJoined { room_id } => tracing::info!(%room_id, "room joined"),
        SessionEvent::RoomLeft { room_id } => tracing::info!(%room_id, "room left"),
    }
}
