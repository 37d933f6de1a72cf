//! Deterministic simulation harness for matchwire.
//!
//! Seeded and scripted implementations of the Environment trait plus a
//! virtual-time driver, for reproducible testing of connection churn without
//! sleeping.
//!
//! # Invariant Testing
//!
//! The `invariants` module provides behavioral testing through invariant
//! checks. Invariants verify WHAT must be true across all execution paths, not
//! specific scenarios. Use [`InvariantRegistry::standard()`] to check the
//! session's pending-work bookkeeping against what the driver actually holds.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod invariants;
pub mod sim_driver;
pub mod sim_env;

pub use invariants::{
    DisposedIsQuiet, Invariant, InvariantRegistry, InvariantResult, QueueCounts,
    QueueMatchesSession, RetryBound, SessionSnapshot, SingleAttemptTimer, SingleDisconnectCheck,
    TimestampsNonDecreasing, Violation,
};
pub use sim_driver::{DriverStats, Scheduled, SimDriver, TraceEntry, Transmitted};
pub use sim_env::{DRAW_DROP, DRAW_FAIL, DRAW_SUCCEED, SIM_EPOCH_MILLIS, SimEnv};
