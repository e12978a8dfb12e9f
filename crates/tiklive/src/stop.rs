//! Process-wide stop flag.
//!
//! Once triggered it stays triggered. Every wait in the watch loops and every
//! chunk read in the capture loop races against it, so a stop unwinds all
//! modes without waiting for the next tick of a long interval.

use std::time::Duration;

use tokio_util::sync::CancellationToken;

/// Result of a cancellable sleep.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pause {
    Elapsed,
    Stopped,
}

#[derive(Debug, Clone, Default)]
pub struct StopSignal {
    token: CancellationToken,
}

impl StopSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the flag and wake every waiter. Safe to call any number of times.
    pub fn trigger(&self) {
        self.token.cancel();
    }

    pub fn is_triggered(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Resolves once the flag is set.
    pub async fn triggered(&self) {
        self.token.cancelled().await
    }

    /// Sleep for `duration` unless stopped first.
    pub async fn sleep(&self, duration: Duration) -> Pause {
        if self.is_triggered() {
            return Pause::Stopped;
        }
        tokio::select! {
            _ = self.token.cancelled() => Pause::Stopped,
            _ = tokio::time::sleep(duration) => Pause::Elapsed,
        }
    }

    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }
}
