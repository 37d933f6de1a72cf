//! Core logic for matchwire
//!
//! Sans-IO connection and messaging state machine for the real-time layer of
//! the matchmaking platform. Models an unreliable connection (randomized
//! handshakes, bounded linear backoff, simulated link drops) and an
//! append-only message log, without owning any timer, socket, or thread.
//!
//! # Architecture
//!
//! Action-based: callers feed operations and expirations into [`Session`] and
//! execute the returned [`SessionAction`]s. A production driver maps
//! `ScheduleTimer` to a runtime timer and `StartHandshake` to a transport
//! call; a simulation driver maps both onto a virtual clock. The same session
//! code runs in both.
//!
//! # Components
//!
//! - [`Session`]: connection lifecycle, retries, message log
//! - [`Environment`]: time and randomness injection
//! - [`SimulatedLink`]: latency and probabilities of the simulated network
//! - [`RetryPolicy`]: bounded linear backoff
//! - [`Message`] / [`MessageDraft`]: log entries and validated input

#![forbid(unsafe_code)]
#![deny(missing_docs)]

pub mod action;
pub mod config;
pub mod env;
pub mod error;
pub mod link;
pub mod message;
pub mod retry;
pub mod session;

pub use action::{AttemptId, SessionAction, SessionEvent, Timer, TimerToken};
pub use config::{PeerReplyConfig, SessionConfig};
pub use env::Environment;
pub use error::{ConnectionError, DraftError, PayloadError, SessionError};
pub use link::SimulatedLink;
pub use message::{MAX_DRAFT_CHARS, Message, MessageDraft, MessageId, MessageKind};
pub use retry::RetryPolicy;
pub use session::{ConnectionState, Lifecycle, PendingWork, Session};
