//! Generic wait-until-terminal loop with capped exponential backoff.
//!
//! The engine knows nothing about what is being waited on. A call site hands
//! it a `check` closure that classifies the current remote state as
//! [`PollState::Pending`], [`PollState::Success`] or [`PollState::Failure`];
//! the engine decides only when to call it again and when to give up.
//!
//! All timing goes through `tokio::time`, so tests drive it with paused time.

use std::fmt;
use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;
use tracing::trace;

use crate::{Error, Result};

/// Backoff schedule for one poll loop
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PollConfig {
    pub initial_interval: Duration,
    pub max_interval: Duration,
    pub multiplier: f64,
    pub timeout: Duration,
}

impl PollConfig {
    /// Source readiness: 1s, growing 1.5x up to 10s, for two minutes.
    pub const SOURCES: Self = Self {
        initial_interval: Duration::from_secs(1),
        max_interval: Duration::from_secs(10),
        multiplier: 1.5,
        timeout: Duration::from_secs(120),
    };

    /// Artifact generation: 2s, doubling up to 10s, for five minutes.
    pub const GENERATION: Self = Self {
        initial_interval: Duration::from_secs(2),
        max_interval: Duration::from_secs(10),
        multiplier: 2.0,
        timeout: Duration::from_secs(300),
    };

    /// Research sessions: 5s, growing 1.5x up to 30s, for half an hour.
    pub const RESEARCH: Self = Self {
        initial_interval: Duration::from_secs(5),
        max_interval: Duration::from_secs(30),
        multiplier: 1.5,
        timeout: Duration::from_secs(1800),
    };

    #[must_use]
    pub const fn new(
        initial_interval: Duration,
        max_interval: Duration,
        multiplier: f64,
        timeout: Duration,
    ) -> Self {
        Self {
            initial_interval,
            max_interval,
            multiplier,
            timeout,
        }
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// # Errors
    ///
    /// Returns [`Error::Config`] for a zero initial interval, a max interval
    /// below the initial one, or a multiplier below 1 (or not finite).
    pub fn validate(&self) -> Result<()> {
        if self.initial_interval.is_zero() {
            return Err(Error::Config("poll initial interval must be positive".into()));
        }
        if self.max_interval < self.initial_interval {
            return Err(Error::Config(format!(
                "poll max interval {:?} is below initial interval {:?}",
                self.max_interval, self.initial_interval
            )));
        }
        if !self.multiplier.is_finite() || self.multiplier < 1.0 {
            return Err(Error::Config(format!(
                "poll multiplier must be >= 1, got {}",
                self.multiplier
            )));
        }
        Ok(())
    }

    /// Interval following `current`, never above `max_interval`.
    #[must_use]
    pub fn next_interval(&self, current: Duration) -> Duration {
        Duration::try_from_secs_f64(current.as_secs_f64() * self.multiplier)
            .map_or(self.max_interval, |next| next.min(self.max_interval))
    }
}

impl Default for PollConfig {
    fn default() -> Self {
        Self::SOURCES
    }
}

/// Outcome of one state check
#[derive(Debug, Clone, PartialEq)]
pub enum PollState<P, S, F> {
    Pending(P),
    Success(S),
    Failure(F),
}

/// Why a poll loop stopped without success
#[derive(Debug, Clone, PartialEq)]
pub enum PollError<P, F, E> {
    /// The check reported a terminal failure
    Failed(F),
    /// The deadline passed; `last` is the most recent pending observation
    Timeout { elapsed: Duration, last: Option<P> },
    /// The check itself errored
    Check(E),
}

impl<P: fmt::Debug, F: fmt::Debug, E: fmt::Display> fmt::Display for PollError<P, F, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PollError::Failed(reason) => write!(f, "terminal failure: {reason:?}"),
            PollError::Timeout { elapsed, last } => {
                write!(f, "timed out after {elapsed:?} (last: {last:?})")
            }
            PollError::Check(err) => write!(f, "state check failed: {err}"),
        }
    }
}

impl<P, F, E> std::error::Error for PollError<P, F, E>
where
    P: fmt::Debug,
    F: fmt::Debug,
    E: std::error::Error + 'static,
{
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            PollError::Check(err) => Some(err),
            _ => None,
        }
    }
}

/// Call `check` until it reports a terminal state or `config.timeout` passes.
///
/// Sleeps are clamped to the time remaining, so a timeout is reported at or
/// before the deadline. Errors from `check` end the loop immediately.
///
/// # Errors
///
/// [`PollError::Failed`] on a terminal failure, [`PollError::Timeout`] with
/// the last pending value, or [`PollError::Check`] if `check` errors.
pub async fn poll_until<P, S, F, E, C, Fut>(
    config: &PollConfig,
    mut check: C,
) -> std::result::Result<S, PollError<P, F, E>>
where
    C: FnMut() -> Fut,
    Fut: Future<Output = std::result::Result<PollState<P, S, F>, E>>,
{
    let start = Instant::now();
    let mut interval = config.initial_interval;
    let mut last = None;
    let mut attempt: u32 = 0;

    loop {
        let elapsed = start.elapsed();
        if elapsed >= config.timeout {
            trace!(attempt, ?elapsed, "Poll deadline reached");
            return Err(PollError::Timeout { elapsed, last });
        }

        attempt += 1;
        match check().await.map_err(PollError::Check)? {
            PollState::Success(value) => return Ok(value),
            PollState::Failure(reason) => return Err(PollError::Failed(reason)),
            PollState::Pending(state) => last = Some(state),
        }

        let remaining = config.timeout.saturating_sub(start.elapsed());
        if remaining.is_zero() {
            continue;
        }

        let sleep_for = interval.min(remaining);
        trace!(attempt, sleep_ms = sleep_for.as_millis(), "Poll pending, sleeping");
        tokio::time::sleep(sleep_for).await;
        interval = config.next_interval(interval);
    }
}
