//! Retry - Bounded retry of remote operations
//!
//! Many cloud APIs are eventually consistent: a principal created a moment ago
//! may not be visible yet, a cluster may still be propagating. Operations are
//! retried until they succeed, fail with a permanent error, or the timeout
//! elapses.

use std::future::Future;
use std::time::Duration;

use tokio::time::{Instant, sleep};

/// Outcome of one failed attempt
#[derive(Debug)]
pub enum Attempt<E> {
    /// Try again after a delay
    Retryable(E),
    /// Stop immediately
    Permanent(E),
}

impl<E> Attempt<E> {
    /// Classify an error with a predicate
    pub fn classify(err: E, retryable: impl FnOnce(&E) -> bool) -> Self {
        if retryable(&err) {
            Attempt::Retryable(err)
        } else {
            Attempt::Permanent(err)
        }
    }
}

/// Failure of a retried operation
#[derive(Debug, thiserror::Error)]
pub enum RetryError<E> {
    #[error("timeout while waiting after {timeout:?}")]
    TimedOut { last: Option<E>, timeout: Duration },
    #[error("{0}")]
    Failed(E),
}

impl<E> RetryError<E> {
    pub fn is_timeout(&self) -> bool {
        matches!(self, RetryError::TimedOut { .. })
    }

    /// The underlying error, if any attempt produced one
    pub fn into_inner(self) -> Option<E> {
        match self {
            RetryError::TimedOut { last, .. } => last,
            RetryError::Failed(e) => Some(e),
        }
    }
}

/// Retry policy with exponential backoff
#[derive(Debug, Clone)]
pub struct Retry {
    pub timeout: Duration,
    pub initial_delay: Duration,
    pub max_delay: Duration,
}

impl Retry {
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(10),
        }
    }

    pub fn with_delays(mut self, initial: Duration, max: Duration) -> Self {
        self.initial_delay = initial;
        self.max_delay = max;
        self
    }

    /// Run `op` until it succeeds, fails permanently, or the timeout elapses
    ///
    /// The operation always runs at least once.
    pub async fn run<T, E, F, Fut>(&self, mut op: F) -> Result<T, RetryError<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, Attempt<E>>>,
    {
        let deadline = Instant::now() + self.timeout;
        let mut delay = self.initial_delay;
        let mut attempt = 0u32;

        loop {
            attempt += 1;
            let last = match op().await {
                Ok(value) => return Ok(value),
                Err(Attempt::Permanent(e)) => return Err(RetryError::Failed(e)),
                Err(Attempt::Retryable(e)) => e,
            };

            let now = Instant::now();
            if now >= deadline {
                return Err(RetryError::TimedOut {
                    last: Some(last),
                    timeout: self.timeout,
                });
            }

            log::trace!("attempt {} failed, retrying in {:?}", attempt, delay);
            sleep(delay.min(deadline - now)).await;
            delay = (delay * 2).min(self.max_delay);
        }
    }

    /// Like [`Retry::run`], but after a timeout makes one final attempt whose
    /// result is returned as-is
    pub async fn run_with_final_attempt<T, E, F, Fut>(&self, mut op: F) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, Attempt<E>>>,
    {
        match self.run(&mut op).await {
            Ok(value) => Ok(value),
            Err(RetryError::Failed(e)) => Err(e),
            Err(RetryError::TimedOut { .. }) => match op().await {
                Ok(value) => Ok(value),
                Err(Attempt::Retryable(e) | Attempt::Permanent(e)) => Err(e),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast(timeout_ms: u64) -> Retry {
        Retry::new(Duration::from_millis(timeout_ms))
            .with_delays(Duration::from_millis(1), Duration::from_millis(5))
    }

    #[tokio::test]
    async fn succeeds_after_retryable_errors() {
        let calls = AtomicU32::new(0);
        let result: Result<u32, RetryError<String>> = fast(1_000)
            .run(|| async {
                let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
                if n < 3 {
                    Err(Attempt::Retryable(format!("not yet ({n})")))
                } else {
                    Ok(n)
                }
            })
            .await;

        assert_eq!(result.unwrap(), 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn permanent_error_stops_immediately() {
        let calls = AtomicU32::new(0);
        let result: Result<(), RetryError<&str>> = fast(1_000)
            .run(|| async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(Attempt::Permanent("access denied"))
            })
            .await;

        assert!(matches!(result, Err(RetryError::Failed("access denied"))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn timeout_keeps_last_error() {
        let result: Result<(), RetryError<&str>> = fast(20)
            .run(|| async { Err(Attempt::Retryable("still propagating")) })
            .await;

        let err = result.unwrap_err();
        assert!(err.is_timeout());
        assert_eq!(err.into_inner(), Some("still propagating"));
    }

    #[tokio::test]
    async fn final_attempt_after_timeout_surfaces_its_error() {
        let calls = AtomicU32::new(0);
        let result: Result<(), String> = fast(10)
            .run_with_final_attempt(|| async {
                let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
                Err(Attempt::Retryable(format!("attempt {n}")))
            })
            .await;

        let total = calls.load(Ordering::SeqCst);
        assert!(total >= 2);
        assert_eq!(result, Err(format!("attempt {total}")));
    }

    #[tokio::test]
    async fn final_attempt_not_made_for_permanent_error() {
        let calls = AtomicU32::new(0);
        let result: Result<(), &str> = fast(1_000)
            .run_with_final_attempt(|| async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(Attempt::Permanent("invalid parameter"))
            })
            .await;

        assert_eq!(result, Err("invalid parameter"));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn classify_uses_predicate() {
        assert!(matches!(
            Attempt::classify("NotFoundException", |e| e.starts_with("NotFound")),
            Attempt::Retryable(_)
        ));
        assert!(matches!(
            Attempt::classify("AccessDenied", |e| e.starts_with("NotFound")),
            Attempt::Permanent(_)
        ));
    }
}
