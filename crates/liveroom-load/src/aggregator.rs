//! Drives repeated scenario runs and folds their reports.
//!
//! Every launched run is supervised in its own task and sends exactly one
//! [`RunReport`] on a shared channel, even when the run panics. A dedicated
//! collector counts reports up to the number of launches, so the fan-in never
//! loses, duplicates, or waits forever for a report.

use crate::errors::LoadError;
use crate::report::{AggregateReport, RunReport, DEFAULT_BUCKETS};
use chrono::Utc;
use common::types::RunId;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::{info, warn};

/// Launches `repeat` runs with at most `parallelism` in flight.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReportAggregator {
    repeat: usize,
    parallelism: usize,
    buckets: usize,
}

impl ReportAggregator {
    /// All runs concurrently, five histogram buckets.
    pub fn new(repeat: usize) -> Self {
        Self {
            repeat,
            parallelism: repeat.max(1),
            buckets: DEFAULT_BUCKETS,
        }
    }

    /// Runs in flight at once. `1` runs sequentially.
    #[must_use]
    pub fn with_parallelism(mut self, parallelism: usize) -> Self {
        self.parallelism = parallelism.max(1);
        self
    }

    #[must_use]
    pub fn with_buckets(mut self, buckets: usize) -> Self {
        self.buckets = buckets.max(1);
        self
    }

    /// Launch every run produced by `factory` and aggregate their reports.
    ///
    /// `factory(i)` is called once per iteration, right before iteration `i`
    /// starts, so every run owns fresh resources.
    pub async fn run<F, Fut>(&self, factory: F) -> AggregateReport
    where
        F: Fn(usize) -> Fut,
        Fut: Future<Output = RunReport> + Send + 'static,
    {
        let started = Instant::now();
        let (tx, mut rx) = mpsc::channel::<RunReport>(self.repeat.max(1));

        let expected = self.repeat;
        let collector = tokio::spawn(async move {
            let mut reports = Vec::with_capacity(expected);
            while reports.len() < expected {
                match rx.recv().await {
                    Some(report) => reports.push(report),
                    None => break,
                }
            }
            reports
        });

        if self.parallelism == 1 {
            for i in 0..self.repeat {
                let report = supervise(factory(i)).await;
                if tx.send(report).await.is_err() {
                    warn!(iteration = i, "Report collector stopped early");
                }
            }
        } else {
            let limit = Arc::new(Semaphore::new(self.parallelism));
            let mut launches = JoinSet::new();
            for i in 0..self.repeat {
                let permit = Arc::clone(&limit).acquire_owned().await.ok();
                let run = factory(i);
                let tx = tx.clone();
                launches.spawn(async move {
                    let report = supervise(run).await;
                    drop(permit);
                    if tx.send(report).await.is_err() {
                        warn!(iteration = i, "Report collector stopped early");
                    }
                });
            }
            while launches.join_next().await.is_some() {}
        }
        drop(tx);

        let reports = collector.await.unwrap_or_else(|e| {
            warn!(error = %e, "Report collector failed");
            Vec::new()
        });
        if reports.len() != self.repeat {
            warn!(
                expected = self.repeat,
                collected = reports.len(),
                "Collected report count differs from launches"
            );
        }

        let aggregate = AggregateReport::from_reports(&reports, started.elapsed(), self.buckets);
        info!(
            attempted = aggregate.attempted,
            succeeded = aggregate.succeeded,
            total_ms = aggregate.total_duration.as_millis(),
            "Load test finished"
        );
        aggregate
    }
}

/// Run `run` in its own task; a panic becomes a failed report.
async fn supervise<Fut>(run: Fut) -> RunReport
where
    Fut: Future<Output = RunReport> + Send + 'static,
{
    let started_at = Utc::now();
    let started = Instant::now();
    match tokio::spawn(run).await {
        Ok(report) => report,
        Err(e) => RunReport {
            run_id: RunId::new(),
            started_at,
            duration: started.elapsed(),
            error: Some(LoadError::TaskFailed(format!("run task failed: {e}"))),
            state_poll_failures: 0,
        },
    }
}
