//! Environment abstraction for deterministic testing.
//!
//! Decouples the session state machine from system resources (time,
//! randomness). Every random outcome the session simulates (handshake latency,
//! handshake success, forced disconnects, peer replies) is drawn through this
//! trait, so a seeded or scripted environment makes a whole run reproducible.

use std::time::Duration;

/// Abstract environment providing time, randomness, and async sleeping.
///
/// # Invariants
///
/// Implementations MUST guarantee:
///
/// - `now()` never goes backwards
/// - `random_unit()` returns values in `[0.0, 1.0)`
/// - Methods are infallible except in exceptional circumstances (e.g., OS
///   entropy exhaustion, incorrect simulation setup)
pub trait Environment: Clone + Send + Sync + 'static {
    /// The specific instant type used by this environment.
    ///
    /// Production environments use `std::time::Instant`, while simulation
    /// environments use virtual time.
    type Instant: Copy + Ord + Send + Sync + std::ops::Sub<Output = Duration>;

    /// Current time (monotonic).
    fn now(&self) -> Self::Instant;

    /// Sleeps for the specified duration.
    ///
    /// Only drivers call this. The session itself never awaits.
    fn sleep(&self, duration: Duration) -> impl std::future::Future<Output = ()> + Send;

    /// Fills the provided buffer with random bytes.
    ///
    /// Given the same seed, a simulation environment produces the same
    /// sequence of bytes.
    fn random_bytes(&self, buffer: &mut [u8]);

    /// Milliseconds since the Unix epoch, used for message timestamps.
    ///
    /// Wall-clock time may jump; callers needing monotonic timestamps must
    /// clamp the value themselves.
    fn wall_clock_millis(&self) -> u64;

    /// Generates a random `u64`.
    fn random_u64(&self) -> u64 {
        let mut bytes = [0u8; 8];
        self.random_bytes(&mut bytes);
        u64::from_be_bytes(bytes)
    }

    /// Generates a uniform `f64` in `[0.0, 1.0)`.
    ///
    /// Uses the top 53 bits of [`Environment::random_u64`]. Simulation
    /// environments override this to script exact outcomes.
    fn random_unit(&self) -> f64 {
        (self.random_u64() >> 11) as f64 / (1u64 << 53) as f64
    }

    /// Uniform delay in `[min, max)`. Returns `min` if the range is empty.
    fn random_delay(&self, min: Duration, max: Duration) -> Duration {
        if max <= min {
            return min;
        }
        let span = (max - min).as_secs_f64();
        let offset = Duration::from_secs_f64(span * self.random_unit());
        (min + offset).min(max.saturating_sub(Duration::from_nanos(1)))
    }

    /// Uniform index in `[0, len)`. Returns 0 for an empty range.
    fn random_index(&self, len: usize) -> usize {
        if len == 0 {
            return 0;
        }
        ((self.random_unit() * len as f64) as usize).min(len - 1)
    }
}

#[cfg(test)]
mod tests {
    use std::{
        sync::{
            Arc,
            atomic::{AtomicU64, Ordering},
        },
        time::Instant,
    };

    use super::*;

    /// Returns the scripted value on every draw.
    #[derive(Clone)]
    struct FixedEnv {
        unit_bits: Arc<AtomicU64>,
    }

    impl FixedEnv {
        fn new(unit: f64) -> Self {
            Self { unit_bits: Arc::new(AtomicU64::new(unit.to_bits())) }
        }
    }

    impl Environment for FixedEnv {
        type Instant = Instant;

        fn now(&self) -> Instant {
            Instant::now()
        }

        fn sleep(&self, _duration: Duration) -> impl std::future::Future<Output = ()> + Send {
            async {}
        }

        fn random_bytes(&self, buffer: &mut [u8]) {
            buffer.fill(0xAB);
        }

        fn wall_clock_millis(&self) -> u64 {
            0
        }

        fn random_unit(&self) -> f64 {
            f64::from_bits(self.unit_bits.load(Ordering::Relaxed))
        }
    }

    #[test]
    fn random_delay_stays_in_half_open_range() {
        let min = Duration::from_millis(1000);
        let max = Duration::from_millis(3000);

        assert_eq!(FixedEnv::new(0.0).random_delay(min, max), min);
        assert_eq!(FixedEnv::new(0.5).random_delay(min, max), Duration::from_millis(2000));
        assert!(FixedEnv::new(0.999_999_999_9).random_delay(min, max) < max);
    }

    #[test]
    fn random_delay_empty_range_returns_min() {
        let env = FixedEnv::new(0.7);
        let d = Duration::from_secs(3);
        assert_eq!(env.random_delay(d, d), d);
    }

    #[test]
    fn random_index_clamps_to_len() {
        assert_eq!(FixedEnv::new(0.0).random_index(8), 0);
        assert_eq!(FixedEnv::new(0.99).random_index(8), 7);
        assert_eq!(FixedEnv::new(0.5).random_index(0), 0);
    }

    #[test]
    fn default_random_unit_is_below_one() {
        #[derive(Clone)]
        struct MaxBytes;

        impl Environment for MaxBytes {
            type Instant = Instant;

            fn now(&self) -> Instant {
                Instant::now()
            }

            fn sleep(&self, _duration: Duration) -> impl std::future::Future<Output = ()> + Send {
                async {}
            }

            fn random_bytes(&self, buffer: &mut [u8]) {
                buffer.fill(0xFF);
            }

            fn wall_clock_millis(&self) -> u64 {
                0
            }
        }

        let unit = MaxBytes.random_unit();
        assert!(unit < 1.0);
        assert!(unit > 0.999);
    }
}
