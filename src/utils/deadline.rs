//! Cooperative deadline propagation.
//!
//! Every suspension point in the crate (network I/O, browser round-trips,
//! cache and broker calls, tab acquisition) takes a [`Deadline`] so that a
//! request-level budget bounds all downstream work. A `Deadline` is cheap to
//! copy and an absent deadline means "unbounded".

use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;

use crate::error::ScrapeError;

/// A point in time after which work on a request should stop.
#[derive(Debug, Clone, Copy, Default)]
pub struct Deadline(Option<Instant>);

impl Deadline {
    /// No deadline; operations run until their own ceilings.
    pub fn none() -> Self {
        Self(None)
    }

    /// Deadline `budget` from now.
    pub fn within(budget: Duration) -> Self {
        Self(Some(Instant::now() + budget))
    }

    /// Deadline at an absolute instant.
    pub fn at(instant: Instant) -> Self {
        Self(Some(instant))
    }

    /// Remaining budget, or `None` when unbounded. A fully elapsed deadline
    /// reports `Some(Duration::ZERO)`.
    pub fn remaining(&self) -> Option<Duration> {
        self.0.map(|at| at.saturating_duration_since(Instant::now()))
    }

    /// True once the deadline has passed.
    pub fn expired(&self) -> bool {
        matches!(self.remaining(), Some(rem) if rem.is_zero())
    }

    /// Effective budget for one operation: the smaller of `ceiling` and the
    /// remaining deadline.
    pub fn bounded(&self, ceiling: Duration) -> Duration {
        match self.remaining() {
            Some(rem) => rem.min(ceiling),
            None => ceiling,
        }
    }
}

/// Run `op` with the deadline-bounded timeout `ceiling`, mapping elapsed
/// timers to [`ScrapeError::Timeout`] tagged with `operation`.
pub async fn with_deadline<F, T>(
    deadline: Deadline,
    ceiling: Duration,
    operation: &str,
    op: F,
) -> Result<T, ScrapeError>
where
    F: Future<Output = Result<T, ScrapeError>>,
{
    let budget = deadline.bounded(ceiling);
    match tokio::time::timeout(budget, op).await {
        Ok(result) => result,
        Err(_) => Err(ScrapeError::Timeout(operation.to_string())),
    }
}
