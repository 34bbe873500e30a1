//! Deadline and cancellation for a single request.

use crate::error::{Error, Result};

use std::{future::Future, time::Duration};
use tokio::time::{self, Instant};
use tokio_util::sync::CancellationToken;

/// Deadline and cancellation carried by an entry point.
///
/// The context is checked before every store call and raced against every
/// in-flight call and retry sleep.
///
/// ```rust
/// use dynamodb_mapper::context::RequestContext;
/// use std::time::Duration;
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let context = RequestContext::new()
///     .with_timeout(Duration::from_secs(3))
///     .with_buffer(Duration::from_millis(250));
/// assert!(context.remaining().is_some());
/// # }
/// ```
#[derive(Clone, Debug, Default)]
pub struct RequestContext {
    deadline: Option<Instant>,
    buffer: Option<Duration>,
    cancellation: CancellationToken,
}

impl RequestContext {
    /// A context without deadline.
    pub fn new() -> Self {
        Self::default()
    }

    /// Fails requests once `deadline` has passed.
    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// Sets the deadline `timeout` from now.
    pub fn with_timeout(self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    /// Overrides the configured safety buffer before the deadline.
    pub fn with_buffer(mut self, buffer: Duration) -> Self {
        self.buffer = Some(buffer);
        self
    }

    /// Uses `token` to cancel the request.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = token;
        self
    }

    /// Token that cancels the request.
    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancellation
    }

    /// Time left before the deadline, if any.
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|deadline| deadline.saturating_duration_since(Instant::now()))
    }

    /// Fails when the request may not start another store call.
    pub(crate) fn check(&self, default_buffer: Duration) -> Result<()> {
        if self.cancellation.is_cancelled() {
            return Err(Error::Cancelled);
        }
        let Some(remaining) = self.remaining() else {
            return Ok(());
        };
        if remaining.is_zero() {
            return Err(Error::DeadlineExceeded);
        }
        if remaining < self.buffer.unwrap_or(default_buffer) {
            return Err(Error::DeadlineImminent { remaining });
        }
        Ok(())
    }

    async fn expired(&self) {
        match self.deadline {
            Some(deadline) => time::sleep_until(deadline).await,
            None => std::future::pending().await,
        }
    }

    /// Drives `future` unless the request is cancelled or expires first.
    pub(crate) async fn run<F, T>(&self, future: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        tokio::select! {
            biased;
            _ = self.cancellation.cancelled() => Err(Error::Cancelled),
            _ = self.expired() => Err(Error::DeadlineExceeded),
            result = future => result,
        }
    }

    /// Sleeps for `duration`, waking early on cancellation or expiry.
    pub(crate) async fn sleep(&self, duration: Duration) -> Result<()> {
        self.run(async {
            time::sleep(duration).await;
            Ok(())
        })
        .await
    }
}
