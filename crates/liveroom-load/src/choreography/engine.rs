//! Executes a [`Choreography`] against an entered roster.

use super::{Actor, Choreography, Crowd, Slot, Step, StepKind};
use crate::clients::{RoomAction, SessionClient};
use crate::entry::{ParticipantContext, Roster};
use crate::errors::{call_with_deadline, until_cancelled, LoadError};
use crate::fanout::TaskGroup;
use crate::pacing::{pace, Pacer, PacingMode};
use crate::watcher::{StateWatcher, WatchTarget};
use common::types::UserId;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Runs choreography steps in order.
pub struct ChoreographyEngine {
    client: Arc<dyn SessionClient>,
    pacer: Arc<dyn Pacer>,
    mode: PacingMode,
    rpc_timeout: Duration,
    max_in_flight: Option<usize>,
}

impl ChoreographyEngine {
    pub fn new(client: Arc<dyn SessionClient>, pacer: Arc<dyn Pacer>, rpc_timeout: Duration) -> Self {
        Self {
            client,
            pacer,
            mode: PacingMode::default(),
            rpc_timeout,
            max_in_flight: None,
        }
    }

    #[must_use]
    pub fn with_pacing_mode(mut self, mode: PacingMode) -> Self {
        self.mode = mode;
        self
    }

    /// Cap concurrent lanes within one step. `None` runs every lane at once.
    #[must_use]
    pub fn with_max_in_flight(mut self, max_in_flight: Option<usize>) -> Self {
        self.max_in_flight = max_in_flight;
        self
    }

    /// Run every step of `script` in order.
    ///
    /// Step `k + 1` starts only after step `k` has returned. The first failing
    /// step ends the run with its error wrapped in the step's name. On success
    /// the roster is handed back with its scratch state updated.
    ///
    /// Once `cancel` fires no further RPC is issued. Under
    /// [`PacingMode::Uninterruptible`] a wait in progress, including a lane's
    /// wait inside a fan-out whose sibling failed, still runs to its end; under
    /// [`PacingMode::Abortable`] it ends at once.
    pub async fn execute(
        &self,
        script: &Choreography,
        roster: Roster,
        watcher: &StateWatcher,
        cancel: &CancellationToken,
    ) -> Result<Roster, LoadError> {
        let mut stage = Stage::new(roster);

        for step in script.steps() {
            if cancel.is_cancelled() {
                return Err(LoadError::Cancelled {
                    phase: "choreography".to_string(),
                }
                .in_step(step.name.clone()));
            }

            let started = Instant::now();
            self.run_step(step, &mut stage, watcher, cancel)
                .await
                .map_err(|e| e.in_step(step.name.clone()))?;
            debug!(
                step = %step.name,
                elapsed_ms = started.elapsed().as_millis(),
                "Step completed"
            );
        }

        stage.into_roster()
    }

    async fn run_step(
        &self,
        step: &Step,
        stage: &mut Stage,
        watcher: &StateWatcher,
        cancel: &CancellationToken,
    ) -> Result<(), LoadError> {
        match &step.kind {
            StepKind::Act { actor, cue } => {
                let action = cue.resolve(&stage.student_ids)?;
                let slot = stage.resolve(*actor)?;
                let ctx = stage.get_mut(slot)?;
                perform(self.client.as_ref(), ctx, &action, self.rpc_timeout, cancel).await
            }
            StepKind::Pause(duration) => {
                pace(self.pacer.as_ref(), self.mode, *duration, cancel, &step.name).await
            }
            StepKind::Burst {
                actor,
                cue,
                repeat,
                interval,
            } => {
                let slot = stage.resolve(*actor)?;
                let ctx = stage.take(slot)?;
                let lane = self.lane_run(cue.resolve(&stage.student_ids)?, *repeat, *interval);
                let ctx = lane.run(ctx, cancel.clone()).await?;
                stage.put(slot, ctx);
                Ok(())
            }
            StepKind::FanOut(lanes) => {
                let mut group = TaskGroup::new(step.name.clone(), cancel)
                    .with_limit(self.max_in_flight)
                    .with_preemption(self.mode == PacingMode::Abortable);
                let mut slots = Vec::new();

                for lane in lanes {
                    let action = lane.cue.resolve(&stage.student_ids)?;
                    for slot in stage.crowd(lane.crowd)? {
                        let ctx = stage.take(slot)?;
                        let run = self.lane_run(action.clone(), lane.repeat, lane.interval);
                        slots.push(slot);
                        group.spawn(move |token| run.run(ctx, token));
                    }
                }

                let returned = group.wait().await?;
                for (slot, ctx) in slots.into_iter().zip(returned) {
                    stage.put(slot, ctx);
                }
                Ok(())
            }
            StepKind::RefreshAll => {
                watcher.poll_once_all(stage.watch_targets());
                Ok(())
            }
        }
    }

    fn lane_run(&self, action: RoomAction, repeat: u32, interval: Duration) -> LaneRun {
        LaneRun {
            client: Arc::clone(&self.client),
            pacer: Arc::clone(&self.pacer),
            mode: self.mode,
            rpc_timeout: self.rpc_timeout,
            action,
            repeat,
            interval,
        }
    }
}

/// One participant repeating one action, owned so it can be spawned.
struct LaneRun {
    client: Arc<dyn SessionClient>,
    pacer: Arc<dyn Pacer>,
    mode: PacingMode,
    rpc_timeout: Duration,
    action: RoomAction,
    repeat: u32,
    interval: Duration,
}

impl LaneRun {
    async fn run(
        self,
        mut ctx: ParticipantContext,
        cancel: CancellationToken,
    ) -> Result<ParticipantContext, LoadError> {
        for i in 0..self.repeat {
            perform(
                self.client.as_ref(),
                &mut ctx,
                &self.action,
                self.rpc_timeout,
                &cancel,
            )
            .await?;
            if i + 1 < self.repeat {
                pace(
                    self.pacer.as_ref(),
                    self.mode,
                    self.interval,
                    &cancel,
                    self.action.name(),
                )
                .await
                .map_err(|e| e.for_participant(ctx.label.clone()))?;
            }
        }
        Ok(ctx)
    }
}

async fn perform(
    client: &dyn SessionClient,
    ctx: &mut ParticipantContext,
    action: &RoomAction,
    rpc_timeout: Duration,
    cancel: &CancellationToken,
) -> Result<(), LoadError> {
    until_cancelled(
        action.name(),
        cancel,
        call_with_deadline(
            action.name(),
            rpc_timeout,
            client.perform(ctx.token(), &ctx.session_id, action),
        ),
    )
    .await
    .map_err(|e| e.for_participant(ctx.label.clone()))?;
    ctx.scratch.rpc_count += 1;
    Ok(())
}

/// The roster during a run. A participant moved into a concurrent lane is
/// absent until the lane hands it back.
struct Stage {
    teachers: Vec<Option<ParticipantContext>>,
    students: Vec<Option<ParticipantContext>>,
    student_ids: Vec<UserId>,
}

impl Stage {
    fn new(roster: Roster) -> Self {
        let student_ids = roster.students.iter().map(|s| s.identity.id.clone()).collect();
        Self {
            teachers: roster.teachers.into_iter().map(Some).collect(),
            students: roster.students.into_iter().map(Some).collect(),
            student_ids,
        }
    }

    fn resolve(&self, actor: Actor) -> Result<Slot, LoadError> {
        actor
            .resolve(self.teachers.len(), self.students.len())
            .ok_or_else(|| LoadError::Precondition(format!("{actor:?} is not on the roster")))
    }

    fn crowd(&self, crowd: Crowd) -> Result<Vec<Slot>, LoadError> {
        crowd
            .resolve(self.teachers.len(), self.students.len())
            .map_err(LoadError::Precondition)
    }

    fn seat(&mut self, slot: Slot) -> Option<&mut Option<ParticipantContext>> {
        match slot {
            Slot::Teacher(i) => self.teachers.get_mut(i),
            Slot::Student(i) => self.students.get_mut(i),
        }
    }

    fn get_mut(&mut self, slot: Slot) -> Result<&mut ParticipantContext, LoadError> {
        self.seat(slot)
            .and_then(Option::as_mut)
            .ok_or_else(|| LoadError::Precondition(format!("{slot} is not on stage")))
    }

    fn take(&mut self, slot: Slot) -> Result<ParticipantContext, LoadError> {
        self.seat(slot)
            .and_then(Option::take)
            .ok_or_else(|| LoadError::Precondition(format!("{slot} is not on stage")))
    }

    fn put(&mut self, slot: Slot, ctx: ParticipantContext) {
        if let Some(seat) = self.seat(slot) {
            *seat = Some(ctx);
        }
    }

    fn watch_targets(&self) -> Vec<WatchTarget> {
        self.teachers
            .iter()
            .chain(&self.students)
            .flatten()
            .map(ParticipantContext::watch_target)
            .collect()
    }

    fn into_roster(self) -> Result<Roster, LoadError> {
        let collect = |seats: Vec<Option<ParticipantContext>>| {
            seats
                .into_iter()
                .collect::<Option<Vec<_>>>()
                .ok_or_else(|| LoadError::TaskFailed("participant lost during choreography".to_string()))
        };
        Ok(Roster {
            teachers: collect(self.teachers)?,
            students: collect(self.students)?,
        })
    }
}
