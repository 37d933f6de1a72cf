//! Simulated link characteristics.
//!
//! Stands in for a real network: how long a handshake takes, how often it
//! succeeds, and how often an established connection drops. All draws go
//! through the [`Environment`], so a seeded or scripted environment makes the
//! outcomes reproducible.

use std::time::Duration;

use crate::{env::Environment, error::ConnectionError};

/// Default probability that a handshake succeeds.
pub const DEFAULT_SUCCESS_RATE: f64 = 0.9;

/// Default probability that a connected link drops at each check.
pub const DEFAULT_DISCONNECT_PROBABILITY: f64 = 0.05;

/// Default lower bound of handshake latency (inclusive).
pub const DEFAULT_LATENCY_MIN: Duration = Duration::from_millis(1000);

/// Default upper bound of handshake latency (exclusive).
pub const DEFAULT_LATENCY_MAX: Duration = Duration::from_millis(3000);

/// Probabilities and latency of the simulated link.
#[derive(Debug, Clone, PartialEq)]
pub struct SimulatedLink {
    /// Probability in `[0.0, 1.0]` that a handshake succeeds.
    pub success_rate: f64,
    /// Probability in `[0.0, 1.0]` that a periodic check drops the link.
    pub disconnect_probability: f64,
    /// Handshake latency lower bound (inclusive).
    pub latency_min: Duration,
    /// Handshake latency upper bound (exclusive).
    pub latency_max: Duration,
}

impl Default for SimulatedLink {
    fn default() -> Self {
        Self {
            success_rate: DEFAULT_SUCCESS_RATE,
            disconnect_probability: DEFAULT_DISCONNECT_PROBABILITY,
            latency_min: DEFAULT_LATENCY_MIN,
            latency_max: DEFAULT_LATENCY_MAX,
        }
    }
}

impl SimulatedLink {
    /// A link whose handshakes always succeed and never drops.
    pub fn reliable() -> Self {
        Self { success_rate: 1.0, disconnect_probability: 0.0, ..Self::default() }
    }

    /// A link whose handshakes always fail.
    pub fn unreachable() -> Self {
        Self { success_rate: 0.0, ..Self::default() }
    }

    /// Draw how long the next handshake takes.
    pub fn handshake_latency<E: Environment>(&self, env: &E) -> Duration {
        env.random_delay(self.latency_min, self.latency_max)
    }

    /// Draw the outcome of a handshake.
    ///
    /// # Errors
    ///
    /// `ConnectionError::Rejected` with probability `1 - success_rate`.
    pub fn handshake_outcome<E: Environment>(&self, env: &E) -> Result<(), ConnectionError> {
        let draw = env.random_unit();
        if draw < self.success_rate {
            Ok(())
        } else {
            Err(ConnectionError::Rejected(format!(
                "simulated failure (draw {draw:.3} >= success rate {:.3})",
                self.success_rate
            )))
        }
    }

    /// Draw whether a connected link drops at this check.
    pub fn should_disconnect<E: Environment>(&self, env: &E) -> bool {
        env.random_unit() < self.disconnect_probability
    }
}
