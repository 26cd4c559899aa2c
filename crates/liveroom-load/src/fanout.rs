//! Bounded fan-out with fail-fast cancellation.
//!
//! A [`TaskGroup`] spawns sibling tasks that share one cancellation token,
//! derived from the caller's token. The first sibling to fail cancels the
//! token; siblings observe it at their next suspension point and report
//! `Cancelled`. [`TaskGroup::wait`] joins every sibling before returning, so no
//! task outlives the group, and yields either all results (in spawn order) or
//! the first real failure.
//!
//! By default a cancelled sibling is dropped at its next await: an RPC
//! already in flight is abandoned, whatever it already sent is not undone.
//! [`TaskGroup::with_preemption`] turns that off for siblings that check the
//! token themselves and must not be cut short mid-wait.

use crate::errors::LoadError;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// A group of sibling tasks joined together.
pub struct TaskGroup<T> {
    name: String,
    tasks: JoinSet<Result<(usize, T), LoadError>>,
    cancel: CancellationToken,
    limit: Option<Arc<Semaphore>>,
    preemptive: bool,
    spawned: usize,
}

impl<T: Send + 'static> TaskGroup<T> {
    /// Create a group whose token is a child of `parent`.
    ///
    /// Cancelling `parent` cancels the group; a failure inside the group never
    /// cancels `parent`.
    pub fn new(name: impl Into<String>, parent: &CancellationToken) -> Self {
        Self {
            name: name.into(),
            tasks: JoinSet::new(),
            cancel: parent.child_token(),
            limit: None,
            preemptive: true,
            spawned: 0,
        }
    }

    /// Bound the number of siblings running at once. `None` means unbounded.
    #[must_use]
    pub fn with_limit(mut self, max_in_flight: Option<usize>) -> Self {
        self.limit = max_in_flight.map(|n| Arc::new(Semaphore::new(n.max(1))));
        self
    }

    /// Whether a cancelled group drops its running siblings.
    ///
    /// A preemptive group (the default) drops a sibling at its next await
    /// once the token fires. A cooperative group lets each sibling run until
    /// it observes the token itself, so a sibling in the middle of a wait
    /// finishes that wait first.
    #[must_use]
    pub fn with_preemption(mut self, preemptive: bool) -> Self {
        self.preemptive = preemptive;
        self
    }

    /// The group's cancellation token.
    pub fn token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Number of siblings spawned so far.
    pub fn len(&self) -> usize {
        self.spawned
    }

    /// True until the first sibling is spawned.
    pub fn is_empty(&self) -> bool {
        self.spawned == 0
    }

    /// Spawn a sibling. `task` receives the group token.
    pub fn spawn<F, Fut>(&mut self, task: F)
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = Result<T, LoadError>> + Send + 'static,
    {
        let index = self.spawned;
        self.spawned += 1;

        let token = self.cancel.clone();
        let limit = self.limit.clone();
        let phase = self.name.clone();
        let preemptive = self.preemptive;
        let work = task(token.clone());

        self.tasks.spawn(async move {
            let _permit = match limit {
                Some(semaphore) => tokio::select! {
                    biased;
                    () = token.cancelled() => return Err(LoadError::Cancelled { phase }),
                    permit = semaphore.acquire_owned() => Some(permit.map_err(|_| {
                        LoadError::TaskFailed(format!("{phase}: concurrency limiter closed"))
                    })?),
                },
                None => None,
            };

            let result = if preemptive {
                tokio::select! {
                    biased;
                    () = token.cancelled() => Err(LoadError::Cancelled { phase }),
                    result = work => result,
                }
            } else {
                work.await
            };

            if result.is_err() {
                token.cancel();
            }
            result.map(|value| (index, value))
        });
    }

    /// Join every sibling.
    ///
    /// Returns all results in spawn order, or the first failure. A
    /// `Cancelled` sibling result never masks the failure that triggered it.
    pub async fn wait(mut self) -> Result<Vec<T>, LoadError> {
        let mut results = Vec::with_capacity(self.spawned);
        let mut failure: Option<LoadError> = None;

        while let Some(joined) = self.tasks.join_next().await {
            let outcome = match joined {
                Ok(outcome) => outcome,
                Err(join_err) => Err(LoadError::TaskFailed(format!("{}: {join_err}", self.name))),
            };

            match outcome {
                Ok(indexed) => results.push(indexed),
                Err(err) => {
                    self.cancel.cancel();
                    let replace = match &failure {
                        None => true,
                        Some(current) => current.is_cancellation() && !err.is_cancellation(),
                    };
                    if replace {
                        failure = Some(err);
                    }
                }
            }
        }

        if let Some(err) = failure {
            debug!(group = %self.name, error = %err, "Fan-out group failed");
            return Err(err);
        }

        results.sort_by_key(|(index, _)| *index);
        Ok(results.into_iter().map(|(_, value)| value).collect())
    }
}
