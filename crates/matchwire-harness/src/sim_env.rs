//! Simulation environment with seeded or scripted randomness.
//!
//! `SimEnv` implements [`Environment`] for deterministic tests:
//!
//! - Seeded ChaCha8 RNG: same seed, same sequence of draws
//! - Scripted draws: exact values consumed in order before the RNG is used,
//!   so a test can force "this handshake fails, the next one succeeds"
//! - Fixed draw: every draw returns the same value
//! - Virtual wall clock: starts at a fixed epoch and only moves when the
//!   driver advances it
//!
//! Time uses `tokio::time::Instant` and `tokio::time::sleep`, which follow
//! tokio's paused clock and turmoil's simulated clock.

#![allow(clippy::disallowed_types, reason = "Synchronous locking of RNG state only")]

use std::{
    collections::VecDeque,
    sync::{Arc, Mutex},
    time::Duration,
};

use matchwire_core::Environment;
use rand::{RngCore, SeedableRng};
use rand_chacha::ChaCha8Rng;

/// Wall-clock origin of every simulation (2023-11-14T22:13:20Z).
pub const SIM_EPOCH_MILLIS: u64 = 1_700_000_000_000;

/// Draw that makes a default handshake succeed and a default disconnect
/// check keep the link.
pub const DRAW_SUCCEED: f64 = 0.5;

/// Draw that makes a default handshake fail.
pub const DRAW_FAIL: f64 = 0.99;

/// Draw that makes a default disconnect check drop the link.
pub const DRAW_DROP: f64 = 0.01;

struct SimState {
    rng: ChaCha8Rng,
    script: VecDeque<f64>,
    fixed: Option<f64>,
    wall_clock_offset: Duration,
    draws: u64,
}

/// Deterministic environment for simulation tests.
///
/// Cheap to clone; clones share the same RNG and clock.
#[derive(Clone)]
pub struct SimEnv {
    state: Arc<Mutex<SimState>>,
}

impl Default for SimEnv {
    fn default() -> Self {
        Self::new()
    }
}

impl SimEnv {
    /// Environment seeded with 0.
    pub fn new() -> Self {
        Self::with_seed(0)
    }

    /// Environment with an explicit seed.
    pub fn with_seed(seed: u64) -> Self {
        Self {
            state: Arc::new(Mutex::new(SimState {
                rng: ChaCha8Rng::seed_from_u64(seed),
                script: VecDeque::new(),
                fixed: None,
                wall_clock_offset: Duration::ZERO,
                draws: 0,
            })),
        }
    }

    /// Environment whose draws are consumed from `draws` first, then from a
    /// seed-0 RNG.
    pub fn scripted(draws: impl IntoIterator<Item = f64>) -> Self {
        let env = Self::new();
        env.push_draws(draws);
        env
    }

    /// Environment whose every draw returns `unit`.
    ///
    /// # Panics
    ///
    /// Panics if `unit` is outside `[0.0, 1.0)`.
    pub fn fixed(unit: f64) -> Self {
        assert!((0.0..1.0).contains(&unit), "draw must be in [0, 1), got {unit}");
        let env = Self::new();
        env.lock().fixed = Some(unit);
        env
    }

    /// Queue scripted draws. They take precedence over the fixed value and
    /// the RNG.
    ///
    /// # Panics
    ///
    /// Panics if any draw is outside `[0.0, 1.0)`.
    pub fn push_draws(&self, draws: impl IntoIterator<Item = f64>) {
        let draws: Vec<f64> = draws.into_iter().collect();
        for unit in &draws {
            assert!((0.0..1.0).contains(unit), "draw must be in [0, 1), got {unit}");
        }
        self.lock().script.extend(draws);
    }

    /// Scripted draws not consumed yet.
    pub fn remaining_script(&self) -> usize {
        self.lock().script.len()
    }

    /// Total draws taken so far.
    pub fn draw_count(&self) -> u64 {
        self.lock().draws
    }

    /// Move the virtual wall clock forward.
    pub fn advance_wall_clock(&self, by: Duration) {
        self.lock().wall_clock_offset += by;
    }

    #[allow(clippy::expect_used)]
    fn lock(&self) -> std::sync::MutexGuard<'_, SimState> {
        self.state.lock().expect("invariant: SimEnv mutex is never poisoned")
    }
}

impl Environment for SimEnv {
    type Instant = tokio::time::Instant;

    fn now(&self) -> Self::Instant {
        tokio::time::Instant::now()
    }

    fn sleep(&self, duration: Duration) -> impl std::future::Future<Output = ()> + Send {
        tokio::time::sleep(duration)
    }

    fn random_bytes(&self, buffer: &mut [u8]) {
        self.lock().rng.fill_bytes(buffer);
    }

    fn wall_clock_millis(&self) -> u64 {
        SIM_EPOCH_MILLIS + self.lock().wall_clock_offset.as_millis() as u64
    }

    fn random_unit(&self) -> f64 {
        let mut state = self.lock();
        state.draws += 1;
        if let Some(draw) = state.script.pop_front() {
            return draw;
        }
        if let Some(fixed) = state.fixed {
            return fixed;
        }
        (state.rng.next_u64() >> 11) as f64 / (1u64 << 53) as f64
    }
}
