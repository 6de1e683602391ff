use std::{fmt::Display, thread, time::Duration};

use log::warn;
use serde::{Deserialize, Serialize};

pub const DEFAULT_MAX_ATTEMPTS: u32 = 10;
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Backoff {
    Fixed,
    /// Doubles the delay after every failed attempt, capped at `max_delay_ms`.
    Exponential { max_delay_ms: u64 },
}

/// How many times to try opening a connection and how long to wait between
/// attempts.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    /// Wait after the first failed attempt, in milliseconds.
    pub delay_ms: u64,
    pub backoff: Backoff,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            delay_ms: duration_ms(DEFAULT_RETRY_DELAY),
            backoff: Backoff::Fixed,
        }
    }
}

fn duration_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

impl RetryPolicy {
    pub fn fixed(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            delay_ms: duration_ms(delay),
            backoff: Backoff::Fixed,
        }
    }

    pub fn exponential(max_attempts: u32, delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            delay_ms: duration_ms(delay),
            backoff: Backoff::Exponential {
                max_delay_ms: duration_ms(max_delay),
            },
        }
    }

    /// Delay to wait after the given 1-based failed attempt.
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let millis = match self.backoff {
            Backoff::Fixed => self.delay_ms,
            Backoff::Exponential { max_delay_ms } => {
                let shift = attempt.saturating_sub(1).min(32);
                self.delay_ms
                    .saturating_mul(1u64 << shift)
                    .min(max_delay_ms)
            }
        };
        Duration::from_millis(millis)
    }

    fn attempts(&self) -> u32 {
        self.max_attempts.max(1)
    }
}

/// Blocking wait between attempts. Swappable so tests can run instantly.
pub trait Sleeper: Send + Sync {
    fn sleep(&self, duration: Duration);
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ThreadSleeper;

impl Sleeper for ThreadSleeper {
    fn sleep(&self, duration: Duration) {
        thread::sleep(duration);
    }
}

#[derive(Debug)]
pub struct RetryExhausted<E> {
    pub attempts: u32,
    pub last_error: E,
}

/// Runs `operation` until it succeeds or the policy runs out of attempts.
/// The closure receives the 1-based attempt number. No wait follows the
/// final failure.
pub fn with_retry<T, E, F>(
    policy: &RetryPolicy,
    sleeper: &dyn Sleeper,
    mut operation: F,
) -> Result<T, RetryExhausted<E>>
where
    E: Display,
    F: FnMut(u32) -> Result<T, E>,
{
    let max_attempts = policy.attempts();
    let mut attempt = 1;
    loop {
        match operation(attempt) {
            Ok(value) => return Ok(value),
            Err(err) => {
                warn!("Database connection error: {err}");
                if attempt >= max_attempts {
                    warn!("Giving up after {attempt} connection attempt(s)");
                    return Err(RetryExhausted {
                        attempts: attempt,
                        last_error: err,
                    });
                }
                let delay = policy.delay_after(attempt);
                warn!(
                    "Network is unreachable. Retrying to connect to database in {} seconds... ({} attempt(s) left)",
                    delay.as_secs_f64(),
                    max_attempts - attempt
                );
                sleeper.sleep(delay);
                attempt += 1;
            }
        }
    }
}
