//! Transport seam between the connection manager and the network.
//!
//! The manager never talks to a socket. It asks a [`Transport`] to perform a
//! handshake when the session starts an attempt, and hands it messages to
//! deliver while connected. [`SimulatedTransport`] stands in for a real
//! network using the session's [`SimulatedLink`].

use std::{
    future::Future,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
};

use matchwire_core::{ConnectionError, Environment, Message, SimulatedLink};

use crate::error::TransportError;

/// Connection-level operations a network backend provides.
///
/// Implementations must be cancel-safe: the manager drops an in-flight
/// handshake future when the attempt is superseded or the manager is
/// disposed.
pub trait Transport: Send + Sync + 'static {
    /// Attempt to establish the link.
    fn handshake(&self) -> impl Future<Output = Result<(), ConnectionError>> + Send;

    /// Deliver a message. Fire-and-forget: the manager logs failures and
    /// does not retry.
    fn send(
        &self,
        message: &Message,
        recipient_id: Option<&str>,
    ) -> impl Future<Output = Result<(), TransportError>> + Send;
}

/// Transport that simulates an unreliable network.
///
/// Handshakes sleep for a random latency and then succeed or fail according
/// to the link's success rate. Sends only encode the message, and fail with
/// [`TransportError::LinkDown`] unless the last completed handshake succeeded.
#[derive(Debug, Clone)]
pub struct SimulatedTransport<E: Environment> {
    env: E,
    link: SimulatedLink,
    /// Outcome of the last completed handshake
    up: Arc<AtomicBool>,
}

impl<E: Environment> SimulatedTransport<E> {
    /// Create a simulated transport drawing from `env`.
    pub fn new(env: E, link: SimulatedLink) -> Self {
        Self { env, link, up: Arc::new(AtomicBool::new(false)) }
    }

    /// Link characteristics.
    pub fn link(&self) -> &SimulatedLink {
        &self.link
    }

    /// True if the last completed handshake succeeded.
    pub fn is_up(&self) -> bool {
        self.up.load(Ordering::Acquire)
    }
}

impl<E: Environment> Transport for SimulatedTransport<E> {
    fn handshake(&self) -> impl Future<Output = Result<(), ConnectionError>> + Send {
        let env = self.env.clone();
        let link = self.link.clone();
        let up = Arc::clone(&self.up);
        async move {
            let latency = link.handshake_latency(&env);
            tracing::debug!(?latency, "simulated handshake in progress");
            env.sleep(latency).await;
            let outcome = link.handshake_outcome(&env);
            up.store(outcome.is_ok(), Ordering::Release);
            outcome
        }
    }

    fn send(
        &self,
        message: &Message,
        recipient_id: Option<&str>,
    ) -> impl Future<Output = Result<(), TransportError>> + Send {
        let encoded = message.to_cbor();
        let id = message.id.clone();
        let recipient = recipient_id.map(str::to_string);
        let up = self.is_up();
        async move {
            if !up {
                return Err(TransportError::LinkDown);
            }
            let bytes = encoded?;
            tracing::debug!(%id, recipient = ?recipient, size = bytes.len(), "message sent");
            Ok(())
        }
    }
}
