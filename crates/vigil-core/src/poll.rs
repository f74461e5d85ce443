//! Convergence polling.
//!
//! The only retry mechanism in vigil. A [`Probe`] observes some external state
//! and says whether it matches what is expected; [`poll_until`] re-observes at a
//! fixed interval until it does or the timeout runs out, and on timeout reports
//! the last observation next to the expectation.

use std::fmt;
use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;

use crate::error::{HarnessError, Result};

/// Interval and timeout for one polling run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollSettings {
    /// Delay between observations.
    pub interval: Duration,
    /// Budget measured from the start of the call.
    pub timeout: Duration,
}

impl PollSettings {
    /// Creates poll settings.
    #[must_use]
    pub const fn new(interval: Duration, timeout: Duration) -> Self {
        Self { interval, timeout }
    }
}

impl Default for PollSettings {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(1),
            timeout: Duration::from_secs(5),
        }
    }
}

/// Something that can be observed repeatedly until it converges.
#[async_trait]
pub trait Probe: Send {
    /// Shape of one observation.
    type Output: fmt::Debug + Send;

    /// Human-readable name of what is being waited for.
    fn describe(&self) -> String;

    /// Takes one fresh observation. Errors abort polling immediately.
    async fn observe(&mut self) -> Result<Self::Output>;

    /// Whether an observation is the expected one.
    fn satisfied(&self, observed: &Self::Output) -> bool;

    /// Expected value or state, rendered for diagnostics.
    fn expected(&self) -> String;

    /// Renders an observation for diagnostics.
    fn render(&self, observed: &Self::Output) -> String {
        format!("{observed:?}")
    }
}

/// Polls `probe` until it is satisfied or `settings.timeout` elapses.
///
/// The probe is observed at least once. Between observations the poller sleeps
/// for the full interval, so a cheap probe never spins faster than that.
pub async fn poll_until<P: Probe>(probe: &mut P, settings: PollSettings) -> Result<P::Output> {
    let start = Instant::now();
    let description = probe.describe();
    let mut attempts: u32 = 0;

    loop {
        attempts += 1;
        let observed = probe.observe().await?;
        if probe.satisfied(&observed) {
            tracing::debug!(
                probe = %description,
                attempts,
                elapsed = ?start.elapsed(),
                "converged"
            );
            return Ok(observed);
        }

        if start.elapsed() >= settings.timeout {
            let observed = probe.render(&observed);
            let expected = probe.expected();
            tracing::warn!(
                probe = %description,
                attempts,
                %expected,
                %observed,
                "convergence timed out"
            );
            return Err(HarnessError::ConvergenceTimeout {
                description,
                expected,
                observed,
                timeout: settings.timeout,
            });
        }

        tracing::debug!(probe = %description, attempt = attempts, observed = ?observed, "not yet converged");
        tokio::time::sleep(settings.interval).await;
    }
}

/// Boolean probe over a synchronous predicate.
pub struct Condition<F> {
    description: String,
    check: F,
}

impl<F> Condition<F>
where
    F: FnMut() -> bool + Send,
{
    /// Wraps a predicate.
    pub fn new(description: impl Into<String>, check: F) -> Self {
        Self {
            description: description.into(),
            check,
        }
    }
}

#[async_trait]
impl<F> Probe for Condition<F>
where
    F: FnMut() -> bool + Send,
{
    type Output = bool;

    fn describe(&self) -> String {
        self.description.clone()
    }

    async fn observe(&mut self) -> Result<bool> {
        Ok((self.check)())
    }

    fn satisfied(&self, observed: &bool) -> bool {
        *observed
    }

    fn expected(&self) -> String {
        "true".to_string()
    }
}

/// Value probe: an async observer compared for equality with an expected value.
pub struct Expect<T, F> {
    description: String,
    expected: T,
    observe: F,
}

impl<T, F, Fut> Expect<T, F>
where
    T: PartialEq + fmt::Debug + Send + Sync,
    F: FnMut() -> Fut + Send,
    Fut: Future<Output = Result<T>> + Send,
{
    /// Wraps an observer and the value it should converge to.
    pub fn new(description: impl Into<String>, expected: T, observe: F) -> Self {
        Self {
            description: description.into(),
            expected,
            observe,
        }
    }
}

#[async_trait]
impl<T, F, Fut> Probe for Expect<T, F>
where
    T: PartialEq + fmt::Debug + Send + Sync,
    F: FnMut() -> Fut + Send,
    Fut: Future<Output = Result<T>> + Send,
{
    type Output = T;

    fn describe(&self) -> String {
        self.description.clone()
    }

    async fn observe(&mut self) -> Result<T> {
        (self.observe)().await
    }

    fn satisfied(&self, observed: &T) -> bool {
        *observed == self.expected
    }

    fn expected(&self) -> String {
        format!("{:?}", self.expected)
    }
}
