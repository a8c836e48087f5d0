//! Startup retries and error-log throttling.

use std::future::Future;
use std::time::Duration;
use tracing::{info, warn};

/// Fixed-delay retry policy for dependencies that may start after the worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    /// Total attempts, including the first one
    pub attempts: u32,
    /// Pause between attempts
    pub delay: Duration,
}

impl Backoff {
    pub const fn fixed(attempts: u32, delay: Duration) -> Self {
        Self { attempts, delay }
    }
}

/// Run `connect` until it succeeds or `backoff.attempts` are used up.
///
/// On failure returns the last error and the number of attempts made.
pub async fn with_retries<F, Fut, T, E>(
    dependency: &str,
    backoff: Backoff,
    connect: F,
) -> Result<T, (E, u32)>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let attempts = backoff.attempts.max(1);
    let mut attempt = 1;

    loop {
        match connect().await {
            Ok(value) => return Ok(value),
            Err(e) if attempt < attempts => {
                warn!(
                    "{} unavailable (attempt {}/{}), retrying in {:?}: {}",
                    dependency, attempt, attempts, backoff.delay, e
                );
                attempt += 1;
                tokio::time::sleep(backoff.delay).await;
            }
            Err(e) => return Err((e, attempt)),
        }
    }
}

/// Lets the first few errors of a failing streak through and silences the rest.
#[derive(Debug)]
pub struct ErrorThrottle {
    limit: u32,
    streak: u32,
}

impl ErrorThrottle {
    pub fn new(limit: u32) -> Self {
        Self { limit, streak: 0 }
    }

    /// Count an error. Returns whether it should be logged.
    pub fn should_log(&mut self) -> bool {
        self.streak = self.streak.saturating_add(1);
        if self.streak == self.limit.saturating_add(1) {
            warn!("{} errors in a row, silencing until it recovers", self.limit);
        }
        self.streak <= self.limit
    }

    /// End the streak after a success.
    pub fn reset(&mut self) {
        if self.streak > self.limit {
            info!("Recovered after {} consecutive errors", self.streak);
        }
        self.streak = 0;
    }

    pub fn streak(&self) -> u32 {
        self.streak
    }
}
