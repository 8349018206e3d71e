//! Waiter - Poll a remote object until it reaches a target state
//!
//! Asynchronous AWS operations (a service draining, a grant being revoked)
//! report progress through a status field. A [`StateChangeConf`] describes
//! which statuses mean "keep waiting" and which mean "done", and
//! [`StateChangeConf::wait_for_state`] polls a refresh function until one of
//! them is reached.

use std::future::Future;
use std::time::Duration;

use tokio::time::{Instant, sleep};

/// Failure while waiting for a state change
#[derive(Debug, thiserror::Error)]
pub enum WaitError<E> {
    #[error("timeout while waiting for state to become '{wanted}' (last state: '{last_state}', timeout: {timeout:?})", wanted = .target.join(", "))]
    Timeout {
        last_state: String,
        target: Vec<String>,
        timeout: Duration,
    },
    #[error("unexpected state '{state}', wanted target '{wanted}'", wanted = .expected.join(", "))]
    UnexpectedState { state: String, expected: Vec<String> },
    #[error("couldn't find resource ({checks} retries)")]
    NotFound { checks: u32 },
    #[error("{0}")]
    Refresh(E),
}

impl<E> WaitError<E> {
    pub fn is_timeout(&self) -> bool {
        matches!(self, WaitError::Timeout { .. })
    }
}

/// Description of a state transition to wait for
#[derive(Debug, Clone)]
pub struct StateChangeConf {
    /// States that mean the transition is still in progress
    pub pending: Vec<String>,
    /// States that end the wait. Empty means "wait until the object is gone".
    pub target: Vec<String>,
    pub timeout: Duration,
    /// Wait before the first refresh
    pub delay: Duration,
    pub poll_interval: Duration,
    /// How many consecutive "not found" refreshes are tolerated
    pub not_found_checks: u32,
    /// How many consecutive target observations are required
    pub continuous_target_occurrence: u32,
}

impl StateChangeConf {
    pub fn new(pending: &[&str], target: &[&str], timeout: Duration) -> Self {
        Self {
            pending: pending.iter().map(|s| s.to_string()).collect(),
            target: target.iter().map(|s| s.to_string()).collect(),
            timeout,
            delay: Duration::ZERO,
            poll_interval: Duration::from_secs(5),
            not_found_checks: 20,
            continuous_target_occurrence: 1,
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_not_found_checks(mut self, checks: u32) -> Self {
        self.not_found_checks = checks;
        self
    }

    pub fn with_continuous_target_occurrence(mut self, occurrences: u32) -> Self {
        self.continuous_target_occurrence = occurrences.max(1);
        self
    }

    /// Poll `refresh` until the object reaches a target state
    ///
    /// `refresh` returns `Ok(None)` when the object does not exist and
    /// `Ok(Some((object, state)))` otherwise. Returns the last observed
    /// object, or `None` when an empty target was satisfied by the object
    /// disappearing.
    pub async fn wait_for_state<T, E, F, Fut>(&self, mut refresh: F) -> Result<Option<T>, WaitError<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<Option<(T, String)>, E>>,
    {
        let deadline = Instant::now() + self.timeout;
        if !self.delay.is_zero() {
            sleep(self.delay).await;
        }

        let mut not_found = 0u32;
        let mut target_seen = 0u32;
        let mut last_state = String::new();

        loop {
            match refresh().await.map_err(WaitError::Refresh)? {
                None => {
                    if self.target.is_empty() {
                        return Ok(None);
                    }
                    target_seen = 0;
                    not_found += 1;
                    if not_found > self.not_found_checks {
                        return Err(WaitError::NotFound {
                            checks: self.not_found_checks,
                        });
                    }
                }
                Some((object, state)) => {
                    not_found = 0;
                    if self.target.contains(&state) {
                        target_seen += 1;
                        if target_seen >= self.continuous_target_occurrence {
                            return Ok(Some(object));
                        }
                    } else if self.pending.contains(&state) {
                        target_seen = 0;
                    } else {
                        return Err(WaitError::UnexpectedState {
                            state,
                            expected: self.target.clone(),
                        });
                    }
                    log::trace!("waiting for state {:?}, current: {}", self.target, state);
                    last_state = state;
                }
            }

            let now = Instant::now();
            if now >= deadline {
                return Err(WaitError::Timeout {
                    last_state,
                    target: self.target.clone(),
                    timeout: self.timeout,
                });
            }
            sleep(self.poll_interval.min(deadline - now)).await;
        }
    }
}
