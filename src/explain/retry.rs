use std::time::Duration;
use tracing::{debug, warn};

use super::RateLimitSignal;
use crate::error::GenerationError;

/// Attempts and waits for one key's external call
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    /// Wait after failed attempt `n` is `backoff[n - 1]`; the last entry repeats
    pub backoff: Vec<Duration>,
}

/// The first call plus three retries, waiting 1s, 3s and 8s before them
impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            backoff: vec![
                Duration::from_secs(1),
                Duration::from_secs(3),
                Duration::from_secs(8),
            ],
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, backoff: Vec<Duration>) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            backoff,
        }
    }

    pub fn delay_after(&self, attempt: u32) -> Duration {
        let index = (attempt.max(1) - 1) as usize;
        self.backoff
            .get(index)
            .or_else(|| self.backoff.last())
            .copied()
            .unwrap_or(Duration::ZERO)
    }

    /// Upper bound on time spent waiting between attempts of one key
    pub fn worst_case_backoff(&self) -> Duration {
        (1..self.max_attempts).map(|n| self.delay_after(n)).sum()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NextStep {
    Retry(Duration),
    Exhausted,
}

/// Attempt counter plus the schedule it walks
#[derive(Debug)]
pub struct RetryState<'a> {
    policy: &'a RetryPolicy,
    attempt: u32,
}

impl<'a> RetryState<'a> {
    pub fn new(policy: &'a RetryPolicy) -> Self {
        Self { policy, attempt: 0 }
    }

    /// Number of the attempt about to be made
    pub fn begin_attempt(&mut self) -> u32 {
        self.attempt += 1;
        self.attempt
    }

    pub fn on_failure(&self) -> NextStep {
        if self.attempt >= self.policy.max_attempts {
            NextStep::Exhausted
        } else {
            NextStep::Retry(self.policy.delay_after(self.attempt))
        }
    }

    pub fn attempts(&self) -> u32 {
        self.attempt
    }
}

/// Blocking wait between attempts
pub trait Sleeper: Send + Sync {
    fn sleep(&self, duration: Duration);
}

#[derive(Debug, Default, Clone, Copy)]
pub struct ThreadSleeper;

impl Sleeper for ThreadSleeper {
    fn sleep(&self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum RetryOutcome<T> {
    Success { value: T, attempts: u32 },
    /// The run's rate-limit signal was already set before an attempt
    Skipped { attempts: u32 },
    Exhausted { attempts: u32, last_error: GenerationError },
    Rejected { attempts: u32, error: GenerationError },
}

/// Drive `call` through the policy. Exhaustion trips `signal`; a set signal stops
/// further attempts without waiting.
pub fn run_with_retry<T, F>(
    policy: &RetryPolicy,
    sleeper: &dyn Sleeper,
    signal: &RateLimitSignal,
    mut call: F,
) -> RetryOutcome<T>
where
    F: FnMut(u32) -> Result<T, GenerationError>,
{
    let mut state = RetryState::new(policy);

    loop {
        if signal.is_set() {
            debug!("rate limit signal set, skipping external call");
            return RetryOutcome::Skipped {
                attempts: state.attempts(),
            };
        }

        let attempt = state.begin_attempt();
        let error = match call(attempt) {
            Ok(value) => {
                return RetryOutcome::Success {
                    value,
                    attempts: attempt,
                }
            }
            Err(error) => error,
        };

        if !error.is_retryable() {
            warn!("attempt {} rejected: {}", attempt, error);
            return RetryOutcome::Rejected {
                attempts: attempt,
                error,
            };
        }

        match state.on_failure() {
            NextStep::Retry(delay) => {
                warn!("attempt {} failed ({}), retrying in {:?}", attempt, error, delay);
                sleeper.sleep(delay);
            }
            NextStep::Exhausted => {
                if signal.trip() {
                    warn!("retries exhausted after {} attempts, rate limit signal set", attempt);
                }
                return RetryOutcome::Exhausted {
                    attempts: attempt,
                    last_error: error,
                };
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::Sleeper;
    use parking_lot::Mutex;
    use std::time::Duration;

    /// Records requested waits instead of sleeping
    #[derive(Debug, Default)]
    pub struct RecordingSleeper {
        pub slept: Mutex<Vec<Duration>>,
    }

    impl RecordingSleeper {
        pub fn recorded(&self) -> Vec<Duration> {
            self.slept.lock().clone()
        }
    }

    impl Sleeper for RecordingSleeper {
        fn sleep(&self, duration: Duration) {
            self.slept.lock().push(duration);
        }
    }
}
