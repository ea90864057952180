//! Per-call cancellation and deadline.
//!
//! Every suspension point inside the gateway (limiter wait, provider call,
//! backoff sleep, stream read) runs through [`CallContext::guard`], which
//! races the future against the caller's cancellation token and deadline.

use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::error::{GatewayError, Result};

/// Cancellation token plus an optional deadline, supplied by the caller.
#[derive(Debug, Clone, Default)]
pub struct CallContext {
    token: CancellationToken,
    deadline: Option<Instant>,
}

impl CallContext {
    /// A context that is never cancelled and has no deadline.
    pub fn new() -> Self {
        Self::default()
    }

    /// A context whose deadline is `timeout` from now.
    pub fn with_timeout(timeout: Duration) -> Self {
        Self::new().deadline_in(timeout)
    }

    /// Use an existing cancellation token (e.g. a shutdown token's child).
    pub fn with_token(mut self, token: CancellationToken) -> Self {
        self.token = token;
        self
    }

    /// Set the deadline relative to now.
    pub fn deadline_in(mut self, timeout: Duration) -> Self {
        self.deadline = Some(Instant::now() + timeout);
        self
    }

    /// Set an absolute deadline.
    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// The token observed by this context.
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    /// The deadline, if any.
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Cancel the operation this context is attached to.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// Check the context without waiting.
    pub fn check(&self) -> Result<()> {
        if self.token.is_cancelled() {
            return Err(GatewayError::Cancelled);
        }
        if let Some(deadline) = self.deadline {
            if Instant::now() >= deadline {
                return Err(GatewayError::Timeout);
            }
        }
        Ok(())
    }

    /// Run `fut` until it completes, the token is cancelled, or the deadline passes.
    ///
    /// The future is dropped on cancellation, which aborts in-flight I/O.
    pub async fn guard<F, T>(&self, fut: F) -> Result<T>
    where
        F: Future<Output = T>,
    {
        self.check()?;
        let deadline = async {
            match self.deadline {
                Some(at) => tokio::time::sleep_until(at).await,
                None => std::future::pending::<()>().await,
            }
        };

        tokio::select! {
            biased;
            _ = self.token.cancelled() => Err(GatewayError::Cancelled),
            _ = deadline => Err(GatewayError::Timeout),
            out = fut => Ok(out),
        }
    }
}
