//! Background state watchers.
//!
//! Once a participant has entered, a watcher polls the session state on its
//! behalf at a fixed delay until the watcher's lifetime token is cancelled.
//! Watchers are detached: they never block, fail or delay the run that
//! started them. A failed poll only increments a [`FailureCounter`].
//!
//! # Lifetime
//!
//! Under [`WatcherLifetime::Process`] watchers stop at process shutdown and
//! may outlive their run, so the counter a run reports is a snapshot that can
//! still grow afterwards. Under [`WatcherLifetime::Run`] they stop when their
//! run finishes.

use crate::clients::SessionClient;
use common::secret::SecretString;
use common::types::SessionId;
use rand::Rng;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, Instrument};

/// Default delay between two polls of one watcher.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);

/// Default upper bound of the per-participant start offset step.
pub const DEFAULT_JITTER_STEP: Duration = Duration::from_millis(10);

/// Shared count of failed state polls. Only ever increases.
#[derive(Debug, Clone, Default)]
pub struct FailureCounter(Arc<AtomicU64>);

impl FailureCounter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one failure and return the new total.
    pub fn increment(&self) -> u64 {
        self.0.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn get(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}

/// How long watchers keep polling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WatcherLifetime {
    /// Until process shutdown.
    #[default]
    Process,
    /// Until the run that started them finishes.
    Run,
}

/// Who to poll for and with which token.
#[derive(Debug, Clone)]
pub struct WatchTarget {
    pub label: String,
    pub session_id: SessionId,
    pub token: SecretString,
}

/// Spawns detached state pollers that share one failure counter.
#[derive(Clone)]
pub struct StateWatcher {
    client: Arc<dyn SessionClient>,
    interval: Duration,
    jitter_step: Duration,
    rpc_timeout: Duration,
    failures: FailureCounter,
    lifetime: CancellationToken,
}

impl StateWatcher {
    pub fn new(
        client: Arc<dyn SessionClient>,
        interval: Duration,
        rpc_timeout: Duration,
        failures: FailureCounter,
        lifetime: CancellationToken,
    ) -> Self {
        Self {
            client,
            interval,
            jitter_step: DEFAULT_JITTER_STEP,
            rpc_timeout,
            failures,
            lifetime,
        }
    }

    /// Bound the random start offset step. Zero starts every watcher at once.
    #[must_use]
    pub fn with_jitter_step(mut self, jitter_step: Duration) -> Self {
        self.jitter_step = jitter_step;
        self
    }

    pub fn failures(&self) -> &FailureCounter {
        &self.failures
    }

    /// Start one poller per target.
    ///
    /// Target `i` waits `i * step` before its first poll, with `step` drawn
    /// once below the jitter bound, so pollers do not fire in lockstep.
    pub fn spawn_all(&self, targets: Vec<WatchTarget>) -> Vec<JoinHandle<()>> {
        let step_ms = u64::try_from(self.jitter_step.as_millis()).unwrap_or(u64::MAX);
        let step = if step_ms == 0 {
            Duration::ZERO
        } else {
            Duration::from_millis(rand::thread_rng().gen_range(0..step_ms))
        };

        targets
            .into_iter()
            .zip(0u32..)
            .map(|(target, i)| self.spawn(target, step.saturating_mul(i)))
            .collect()
    }

    /// Start a poller for `target` after `initial_delay`.
    pub fn spawn(&self, target: WatchTarget, initial_delay: Duration) -> JoinHandle<()> {
        let watcher = self.clone();
        let span = tracing::debug_span!("state_watcher", participant = %target.label);
        tokio::spawn(
            async move {
                tokio::select! {
                    biased;
                    () = watcher.lifetime.cancelled() => return,
                    () = tokio::time::sleep(initial_delay) => {}
                }

                loop {
                    tokio::select! {
                        biased;
                        () = watcher.lifetime.cancelled() => break,
                        () = watcher.poll(&target) => {}
                    }
                    tokio::select! {
                        biased;
                        () = watcher.lifetime.cancelled() => break,
                        () = tokio::time::sleep(watcher.interval) => {}
                    }
                }
                debug!("State watcher stopped");
            }
            .instrument(span),
        )
    }

    /// Fire one detached poll for each target.
    pub fn poll_once_all(&self, targets: Vec<WatchTarget>) {
        for target in targets {
            let watcher = self.clone();
            tokio::spawn(async move {
                tokio::select! {
                    biased;
                    () = watcher.lifetime.cancelled() => {}
                    () = watcher.poll(&target) => {}
                }
            });
        }
    }

    async fn poll(&self, target: &WatchTarget) {
        let outcome = tokio::time::timeout(
            self.rpc_timeout,
            self.client.fetch_state(&target.token, &target.session_id),
        )
        .await;

        let error = match outcome {
            Ok(Ok(_)) => return,
            Ok(Err(e)) => e.to_string(),
            Err(_) => format!("timed out after {:?}", self.rpc_timeout),
        };
        let total = self.failures.increment();
        debug!(participant = %target.label, error = %error, total, "State poll failed");
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::errors::RpcError;
    use crate::mock::{token_for, MockSessionClient};
    use common::types::UserId;

    fn target(user: &str) -> WatchTarget {
        WatchTarget {
            label: format!("student ({user})"),
            session_id: SessionId::from("session-1"),
            token: token_for(&UserId::from(user)),
        }
    }

    fn watcher(client: Arc<MockSessionClient>, lifetime: &CancellationToken) -> StateWatcher {
        StateWatcher::new(
            client,
            Duration::from_secs(5),
            Duration::from_secs(1),
            FailureCounter::new(),
            lifetime.clone(),
        )
        .with_jitter_step(Duration::ZERO)
    }

    #[test]
    fn test_counter_shared_between_clones() {
        let counter = FailureCounter::new();
        let other = counter.clone();
        assert_eq!(counter.increment(), 1);
        assert_eq!(other.increment(), 2);
        assert_eq!(counter.get(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_polls_at_fixed_delay_until_cancelled() {
        let client = Arc::new(MockSessionClient::new());
        let lifetime = CancellationToken::new();
        let handles = watcher(Arc::clone(&client), &lifetime).spawn_all(vec![target("s0")]);

        // Polls at 0s, 5s, 10s.
        tokio::time::sleep(Duration::from_millis(10_500)).await;
        assert_eq!(client.calls("FetchState"), 3);

        lifetime.cancel();
        for handle in handles {
            handle.await.unwrap();
        }
        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(client.calls("FetchState"), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failures_counted_not_propagated() {
        let client = Arc::new(MockSessionClient::new().failing(
            "FetchState",
            RpcError::Transport("connection refused".to_string()),
        ));
        let lifetime = CancellationToken::new();
        let watcher = watcher(client, &lifetime);
        watcher.spawn_all(vec![target("s0"), target("s1")]);

        tokio::time::sleep(Duration::from_millis(5_500)).await;
        let seen = watcher.failures().get();
        assert_eq!(seen, 4);

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert!(watcher.failures().get() >= seen);
        lifetime.cancel();
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_poll_counts_as_failure() {
        let client = Arc::new(
            MockSessionClient::new().with_method_latency("FetchState", Duration::from_secs(3)),
        );
        let lifetime = CancellationToken::new();
        let watcher = watcher(client, &lifetime);
        watcher.spawn_all(vec![target("s0")]);

        tokio::time::sleep(Duration::from_millis(1_500)).await;
        assert_eq!(watcher.failures().get(), 1);
        lifetime.cancel();
    }

    #[tokio::test(start_paused = true)]
    async fn test_poll_once_all_is_detached() {
        let client = Arc::new(MockSessionClient::new());
        let lifetime = CancellationToken::new();
        watcher(Arc::clone(&client), &lifetime).poll_once_all(vec![target("s0"), target("s1")]);

        tokio::time::sleep(Duration::from_millis(1)).await;
        assert_eq!(client.calls("FetchState"), 2);
    }
}
