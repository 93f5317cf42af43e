//! External cancellation with a reason
//!
//! The binary cancels on Ctrl-C. Every network call, helper run and OTP wait
//! in the orchestrator is raced against the signal; a cancelled signal always
//! wins a tie.

use std::future::Future;
use std::sync::{Arc, OnceLock};

use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};

const DEFAULT_REASON: &str = "cancelled";

#[derive(Debug, Clone, Default)]
pub struct CancelSignal {
    token: CancellationToken,
    reason: Arc<OnceLock<String>>,
}

impl CancelSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cancel with `reason`. The first reason sticks.
    pub fn cancel(&self, reason: impl Into<String>) {
        let _ = self.reason.set(reason.into());
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    pub fn reason(&self) -> String {
        self.reason
            .get()
            .cloned()
            .unwrap_or_else(|| DEFAULT_REASON.to_string())
    }

    /// Resolves once the signal is cancelled.
    pub async fn cancelled(&self) {
        self.token.cancelled().await
    }

    /// Run `fut` unless the signal fires first, in which case `fut` is
    /// dropped and [`Error::Cancelled`] returned.
    pub async fn run<F: Future>(&self, fut: F) -> Result<F::Output> {
        tokio::select! {
            biased;
            _ = self.token.cancelled() => Err(Error::Cancelled(self.reason())),
            out = fut => Ok(out),
        }
    }
}
