//! One timed scenario run: bootstrap, entry, background watchers, then the
//! choreography.

use crate::bootstrap::SessionBootstrapper;
use crate::choreography::{Choreography, ChoreographyEngine};
use crate::entry::EntrySynchronizer;
use crate::errors::{phase_with_deadline, until_cancelled, LoadError};
use crate::report::RunReport;
use crate::watcher::{FailureCounter, StateWatcher, WatcherLifetime, DEFAULT_JITTER_STEP, DEFAULT_POLL_INTERVAL};
use chrono::Utc;
use common::types::RunId;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

/// Deadlines of the blocking phases of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PhaseDeadlines {
    pub bootstrap: Duration,
    pub entry: Duration,
    pub choreography: Duration,
}

impl Default for PhaseDeadlines {
    fn default() -> Self {
        Self {
            bootstrap: Duration::from_secs(30),
            entry: Duration::from_secs(60),
            choreography: Duration::from_secs(300),
        }
    }
}

/// How each run's state watchers poll.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WatchSettings {
    pub interval: Duration,
    pub jitter_step: Duration,
    pub lifetime: WatcherLifetime,
}

impl Default for WatchSettings {
    fn default() -> Self {
        Self {
            interval: DEFAULT_POLL_INTERVAL,
            jitter_step: DEFAULT_JITTER_STEP,
            lifetime: WatcherLifetime::default(),
        }
    }
}

/// Everything runs share. Immutable once built.
pub struct Harness {
    bootstrapper: SessionBootstrapper,
    entry: EntrySynchronizer,
    engine: ChoreographyEngine,
    script: Choreography,
    watch: WatchSettings,
    deadlines: PhaseDeadlines,
    rpc_timeout: Duration,
}

impl Harness {
    /// Check `script` against the bootstrapper's roster size.
    ///
    /// Fails with `Precondition` before any run starts when the script names a
    /// participant the roster will not have.
    pub fn new(
        bootstrapper: SessionBootstrapper,
        entry: EntrySynchronizer,
        engine: ChoreographyEngine,
        script: Choreography,
        rpc_timeout: Duration,
    ) -> Result<Self, LoadError> {
        let plan = bootstrapper.plan();
        script.validate(plan.num_teachers, plan.num_students)?;
        Ok(Self {
            bootstrapper,
            entry,
            engine,
            script,
            watch: WatchSettings::default(),
            deadlines: PhaseDeadlines::default(),
            rpc_timeout,
        })
    }

    #[must_use]
    pub fn with_watch(mut self, watch: WatchSettings) -> Self {
        self.watch = watch;
        self
    }

    #[must_use]
    pub fn with_deadlines(mut self, deadlines: PhaseDeadlines) -> Self {
        self.deadlines = deadlines;
        self
    }

    /// A fresh run. `process` is the process-wide shutdown token.
    pub fn runner(self: &Arc<Self>, process: &CancellationToken) -> ScenarioRunner {
        ScenarioRunner {
            harness: Arc::clone(self),
            run_id: RunId::new(),
            process: process.clone(),
        }
    }
}

/// A single run. Consumed by [`ScenarioRunner::run`].
pub struct ScenarioRunner {
    harness: Arc<Harness>,
    run_id: RunId,
    process: CancellationToken,
}

impl ScenarioRunner {
    pub fn run_id(&self) -> RunId {
        self.run_id
    }

    /// Execute the run and report its outcome.
    ///
    /// Always returns a report. A failing or timed-out phase ends the run with
    /// that error and the time spent so far. Every blocking task of the run
    /// has stopped by the time this returns; watchers follow their configured
    /// lifetime.
    ///
    /// Process shutdown ends the run with `Cancelled`. Bootstrap and entry
    /// abandon their RPCs at once; the choreography stops issuing RPCs and
    /// treats a wait in progress according to the engine's pacing mode.
    #[instrument(skip_all, fields(run_id = %self.run_id))]
    pub async fn run(self) -> RunReport {
        let started_at = Utc::now();
        let started = Instant::now();
        let failures = FailureCounter::new();
        let run_token = self.process.child_token();

        let result = match self.execute(&run_token, &failures).await {
            // Every step finished but shutdown arrived during the last one.
            Ok(()) if run_token.is_cancelled() => Err(LoadError::Cancelled {
                phase: "run".to_string(),
            }),
            result => result,
        };
        let duration = started.elapsed();
        run_token.cancel();

        match &result {
            Ok(()) => info!(duration_ms = duration.as_millis(), "Run succeeded"),
            Err(e) => warn!(
                duration_ms = duration.as_millis(),
                step = e.step().unwrap_or("-"),
                participant = e.participant().unwrap_or("-"),
                error = %e,
                "Run failed"
            ),
        }

        RunReport {
            run_id: self.run_id,
            started_at,
            duration,
            error: result.err(),
            state_poll_failures: failures.get(),
        }
    }

    async fn execute(
        &self,
        run_token: &CancellationToken,
        failures: &FailureCounter,
    ) -> Result<(), LoadError> {
        let h = &self.harness;

        let session = phase_with_deadline(
            "bootstrap",
            h.deadlines.bootstrap,
            until_cancelled("bootstrap", run_token, h.bootstrapper.bootstrap()),
        )
        .await?;

        let roster = phase_with_deadline(
            "entry",
            h.deadlines.entry,
            h.entry.enter(&session, run_token),
        )
        .await?;
        if run_token.is_cancelled() {
            return Err(LoadError::Cancelled {
                phase: "entry".to_string(),
            });
        }

        let lifetime = match h.watch.lifetime {
            WatcherLifetime::Process => self.process.clone(),
            WatcherLifetime::Run => run_token.clone(),
        };
        let watcher = StateWatcher::new(
            h.entry.client(),
            h.watch.interval,
            h.rpc_timeout,
            failures.clone(),
            lifetime,
        )
        .with_jitter_step(h.watch.jitter_step);
        watcher.spawn_all(roster.watch_targets());

        phase_with_deadline(
            "choreography",
            h.deadlines.choreography,
            h.engine.execute(&h.script, roster, &watcher, run_token),
        )
        .await?;
        Ok(())
    }
}
