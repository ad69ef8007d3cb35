//! Bounded Polling
//!
//! Waits for a cloud resource to reach a desired state by polling it on a
//! constant interval until a deadline. Built on `backoff` with the
//! exponential growth and jitter disabled.

use crate::error::{Error, Result};
use backoff::ExponentialBackoffBuilder;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use tracing::debug;

/// Interval and deadline of a polling loop
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Time between two polls
    #[serde(with = "duration_secs")]
    pub interval: Duration,
    /// Give up after this much time has elapsed
    #[serde(with = "duration_secs")]
    pub timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(2),
            timeout: Duration::from_secs(60),
        }
    }
}

impl RetryPolicy {
    /// Create a policy
    pub fn new(interval: Duration, timeout: Duration) -> Self {
        Self { interval, timeout }
    }
}

/// Result of one poll
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Poll<T> {
    /// Desired state reached
    Ready(T),
    /// Not there yet, with the state observed
    Pending(String),
}

/// What to do when the poll itself fails
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OnError {
    /// Keep polling until the deadline
    Retry,
    /// Return the error immediately
    Fail,
}

/// Poll `op` until it reports `Ready` or the policy deadline passes.
///
/// Expiry returns [`Error::StateTimeout`] carrying the last observed state.
pub async fn poll_until<T, F, Fut>(
    policy: RetryPolicy,
    resource: &str,
    desired: &str,
    on_error: OnError,
    mut op: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<Poll<T>>>,
{
    let backoff = ExponentialBackoffBuilder::new()
        .with_initial_interval(policy.interval)
        .with_max_interval(policy.interval)
        .with_multiplier(1.0)
        .with_randomization_factor(0.0)
        .with_max_elapsed_time(Some(policy.timeout))
        .build();

    let timeout = |actual: String| Error::StateTimeout {
        resource: resource.to_string(),
        desired: desired.to_string(),
        actual,
        timeout: policy.timeout,
    };

    let timeout = &timeout;
    backoff::future::retry(backoff, || {
        let poll = op();
        async move {
            match poll.await {
                Ok(Poll::Ready(value)) => Ok(value),
                Ok(Poll::Pending(actual)) => {
                    debug!(resource, desired, actual = %actual, "Waiting for state");
                    Err(backoff::Error::transient(timeout(actual)))
                }
                Err(e) if on_error == OnError::Retry => {
                    debug!(resource, desired, error = %e, "Poll failed, retrying");
                    Err(backoff::Error::transient(timeout(format!("unknown ({})", e))))
                }
                Err(e) => Err(backoff::Error::permanent(e)),
            }
        }
    })
    .await
}

mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_f64(d.as_secs_f64())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(d)?;
        if !secs.is_finite() || secs < 0.0 {
            return Err(serde::de::Error::custom("duration must be a positive number of seconds"));
        }
        Ok(Duration::from_secs_f64(secs))
    }
}
