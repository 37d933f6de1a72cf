//! matchwire production runtime.
//!
//! Drives the sans-IO [`matchwire_core::Session`] on a tokio runtime with real
//! timers, a pluggable transport, and system time and randomness.
//!
//! # Architecture
//!
//! This crate provides production "glue" that wraps [`matchwire_core`]'s
//! action-based logic with real I/O. The session decides what should happen;
//! [`ConnectionManager`] executes the resulting actions as tokio tasks and
//! publishes state changes and log appends to subscribers.
//!
//! # Components
//!
//! - [`ConnectionManager`]: shared handle owning the session and its tasks
//! - [`Transport`]: handshake and send seam for a network backend
//! - [`SimulatedTransport`]: randomized stand-in network
//! - [`SystemEnv`]: production environment (real time, OS RNG)

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod error;
mod manager;
mod system_env;
mod tasks;
mod transport;

pub use error::{ManagerError, TransportError};
pub use manager::{ConnectionManager, EVENT_CAPACITY};
pub use system_env::SystemEnv;
pub use transport::{SimulatedTransport, Transport};
