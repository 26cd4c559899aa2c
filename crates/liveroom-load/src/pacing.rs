//! Fixed waits between choreography steps.
//!
//! Waits go through a [`Pacer`] so scripts can run at simulated speed in
//! tests. Production uses [`TokioPacer`], which sleeps on the tokio clock
//! and therefore also honours paused time.

use crate::errors::LoadError;
use async_trait::async_trait;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Source of pacing waits.
#[async_trait]
pub trait Pacer: Send + Sync {
    async fn pause(&self, duration: Duration);
}

/// Sleeps on the tokio clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioPacer;

#[async_trait]
impl Pacer for TokioPacer {
    async fn pause(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// Whether a pacing wait observes cancellation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PacingMode {
    /// Waits always run to completion; cancellation is noticed at the next
    /// RPC or step boundary.
    #[default]
    Uninterruptible,
    /// Waits end early with `Cancelled` once the token fires.
    Abortable,
}

/// Wait `duration` according to `mode`.
pub async fn pace(
    pacer: &dyn Pacer,
    mode: PacingMode,
    duration: Duration,
    cancel: &CancellationToken,
    phase: &str,
) -> Result<(), LoadError> {
    if duration.is_zero() {
        return Ok(());
    }
    match mode {
        PacingMode::Uninterruptible => {
            pacer.pause(duration).await;
            Ok(())
        }
        PacingMode::Abortable => tokio::select! {
            biased;
            () = cancel.cancelled() => Err(LoadError::Cancelled {
                phase: phase.to_string(),
            }),
            () = pacer.pause(duration) => Ok(()),
        },
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use tokio::time::Instant;

    #[tokio::test(start_paused = true)]
    async fn test_uninterruptible_wait_ignores_cancellation() {
        let cancel = CancellationToken::new();
        let started = Instant::now();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            trigger.cancel();
        });

        pace(&TokioPacer, PacingMode::Uninterruptible, Duration::from_secs(9), &cancel, "wait")
            .await
            .unwrap();
        assert!(started.elapsed() >= Duration::from_secs(9));
    }

    #[tokio::test(start_paused = true)]
    async fn test_abortable_wait_ends_on_cancellation() {
        let cancel = CancellationToken::new();
        let started = Instant::now();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            trigger.cancel();
        });

        let err = pace(&TokioPacer, PacingMode::Abortable, Duration::from_secs(9), &cancel, "wait")
            .await
            .unwrap_err();
        assert!(err.is_cancellation());
        assert!(started.elapsed() < Duration::from_secs(2));
    }

    #[tokio::test]
    async fn test_zero_wait_returns_immediately() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        pace(&TokioPacer, PacingMode::Abortable, Duration::ZERO, &cancel, "wait")
            .await
            .unwrap();
    }
}
