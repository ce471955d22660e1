//! Bounded worker pool for independent evaluation units.

use crossbeam::channel;
use serde::Serialize;
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::error::{BatchError, UnitError};

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", content = "value", rename_all = "snake_case")]
pub enum UnitOutcome<T> {
    Completed(T),
    Failed(#[serde(serialize_with = "serialize_error")] UnitError),
    TimedOut,
}

fn serialize_error<S: serde::Serializer>(error: &UnitError, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.collect_str(error)
}

impl<T> UnitOutcome<T> {
    pub fn completed(&self) -> Option<&T> {
        match self {
            UnitOutcome::Completed(value) => Some(value),
            _ => None,
        }
    }

    pub fn error(&self) -> Option<UnitError> {
        match self {
            UnitOutcome::Completed(_) => None,
            UnitOutcome::Failed(error) => Some(error.clone()),
            UnitOutcome::TimedOut => Some(UnitError::TimedOut),
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}

/// Runs units on a per-run pool and hands results back in input order.
///
/// Each unit is its own failure domain. A unit that misses the deadline is reported as
/// `TimedOut`, but its worker is left to finish so shared caches still get populated.
#[derive(Debug, Clone)]
pub struct BatchRunner {
    max_workers: usize,
    deadline: Option<Duration>,
}

impl Default for BatchRunner {
    fn default() -> Self {
        Self::new(num_cpus::get())
    }
}

impl BatchRunner {
    pub fn new(max_workers: usize) -> Self {
        Self {
            max_workers: max_workers.max(1),
            deadline: None,
        }
    }

    pub fn with_deadline(mut self, deadline: Option<Duration>) -> Self {
        self.deadline = deadline;
        self
    }

    pub fn pool_size(&self, units: usize) -> usize {
        units.min(self.max_workers).max(1)
    }

    pub fn run<I, T, F>(&self, units: Vec<I>, work: F) -> Result<Vec<UnitOutcome<T>>, BatchError>
    where
        I: Send + 'static,
        T: Send + 'static,
        F: Fn(usize, I) -> Result<T, UnitError> + Send + Sync + 'static,
    {
        let total = units.len();
        if total == 0 {
            return Ok(Vec::new());
        }

        let workers = self.pool_size(total);
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(workers)
            .thread_name(|i| format!("pgx-worker-{}", i))
            .panic_handler(|payload| warn!("worker panicked: {}", panic_message(payload.as_ref())))
            .build()?;
        info!("Running {} units on {} workers", total, workers);

        let started = Instant::now();
        let deadline_at = self.deadline.map(|d| started + d);
        let work = Arc::new(work);
        let (tx, rx) = channel::unbounded();

        for (index, unit) in units.into_iter().enumerate() {
            let tx = tx.clone();
            let work = Arc::clone(&work);
            pool.spawn(move || {
                let outcome = match panic::catch_unwind(AssertUnwindSafe(|| (*work)(index, unit))) {
                    Ok(Ok(value)) => UnitOutcome::Completed(value),
                    Ok(Err(error)) => {
                        warn!("unit {} failed: {}", index, error);
                        UnitOutcome::Failed(error)
                    }
                    Err(payload) => {
                        let message = panic_message(payload.as_ref());
                        warn!("unit {} panicked: {}", index, message);
                        UnitOutcome::Failed(UnitError::Panicked(message))
                    }
                };
                // The receiver is gone once the batch has given up on this unit
                if tx.send((index, outcome)).is_err() {
                    debug!("unit {} finished after the batch deadline", index);
                }
            });
        }
        drop(tx);

        let mut slots: Vec<Option<UnitOutcome<T>>> = (0..total).map(|_| None).collect();
        let mut remaining = total;
        while remaining > 0 {
            let received = match deadline_at {
                Some(at) => rx.recv_deadline(at).ok(),
                None => rx.recv().ok(),
            };
            let Some((index, outcome)) = received else {
                break;
            };
            slots[index] = Some(outcome);
            remaining -= 1;
        }

        if remaining > 0 {
            warn!(
                "{} of {} units missed the batch deadline after {:?}",
                remaining,
                total,
                started.elapsed()
            );
        }

        Ok(slots
            .into_iter()
            .map(|slot| slot.unwrap_or(UnitOutcome::TimedOut))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ConfigurationError;
    use std::thread;

    #[test]
    fn test_results_follow_input_order() {
        let runner = BatchRunner::new(4);
        let delays = vec![80u64, 10, 50, 0];
        let outcomes = runner
            .run(delays, |index, delay| {
                thread::sleep(Duration::from_millis(delay));
                Ok(index)
            })
            .unwrap();

        let indices: Vec<usize> = outcomes.iter().filter_map(|o| o.completed().copied()).collect();
        assert_eq!(indices, vec![0, 1, 2, 3]);
    }

    #[test]
    fn test_failures_are_isolated() {
        let outcomes = BatchRunner::new(3)
            .run(vec!["CODEINE", "ASPIRIN", "WARFARIN"], |_, drug| {
                if drug == "ASPIRIN" {
                    Err(ConfigurationError::UnsupportedDrug(drug.to_string()).into())
                } else {
                    Ok(drug.len())
                }
            })
            .unwrap();

        assert_eq!(outcomes[0], UnitOutcome::Completed(7));
        assert!(matches!(
            outcomes[1],
            UnitOutcome::Failed(UnitError::Configuration(_))
        ));
        assert_eq!(outcomes[2], UnitOutcome::Completed(8));
    }

    #[test]
    fn test_panics_are_caught_per_unit() {
        let outcomes = BatchRunner::new(2)
            .run(vec![1, 2], |_, n| {
                if n == 2 {
                    panic!("bad unit");
                }
                Ok(n)
            })
            .unwrap();

        assert_eq!(outcomes[0], UnitOutcome::Completed(1));
        assert_eq!(
            outcomes[1],
            UnitOutcome::Failed(UnitError::Panicked("bad unit".to_string()))
        );
    }

    #[test]
    fn test_deadline_reports_stragglers() {
        let outcomes = BatchRunner::new(2)
            .with_deadline(Some(Duration::from_millis(100)))
            .run(vec![0u64, 2000], |_, delay| {
                thread::sleep(Duration::from_millis(delay));
                Ok(delay)
            })
            .unwrap();

        assert_eq!(outcomes[0], UnitOutcome::Completed(0));
        assert_eq!(outcomes[1], UnitOutcome::TimedOut);
        assert_eq!(outcomes[1].error(), Some(UnitError::TimedOut));
    }

    #[test]
    fn test_pool_size_is_bounded() {
        let runner = BatchRunner::new(4);
        assert_eq!(runner.pool_size(2), 2);
        assert_eq!(runner.pool_size(10), 4);
        assert_eq!(runner.pool_size(0), 1);
        assert!(runner.run(Vec::<u8>::new(), |_, n| Ok(n)).unwrap().is_empty());
    }
}
