//! Scripted choreography of in-session actions.
//!
//! A [`Choreography`] is a strictly ordered list of named [`Step`]s. Steps
//! never branch and never retry: each one either completes before the next
//! begins, or the run aborts with that step's error. A step may be internally
//! concurrent ([`StepKind::FanOut`]).
//!
//! Scripts refer to participants by position ([`Actor`], [`Crowd`]) and are
//! checked against a roster size with [`Choreography::validate`] before any
//! run starts.

mod classroom;
mod engine;

pub use classroom::PacingPlan;
pub use engine::ChoreographyEngine;

use crate::clients::RoomAction;
use crate::errors::LoadError;
use common::types::UserId;
use std::collections::HashSet;
use std::fmt;
use std::time::Duration;

/// A participant named by position in the roster.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Actor {
    /// Zero-based teacher index.
    Teacher(usize),
    /// Zero-based student index.
    Student(usize),
    /// The student at the end of the roster.
    LastStudent,
}

impl Actor {
    fn resolve(self, teachers: usize, students: usize) -> Option<Slot> {
        match self {
            Actor::Teacher(i) if i < teachers => Some(Slot::Teacher(i)),
            Actor::Student(i) if i < students => Some(Slot::Student(i)),
            Actor::LastStudent => students.checked_sub(1).map(Slot::Student),
            Actor::Teacher(_) | Actor::Student(_) => None,
        }
    }
}

/// A resolved roster position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) enum Slot {
    Teacher(usize),
    Student(usize),
}

impl fmt::Display for Slot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Slot::Teacher(i) => write!(f, "teacher #{i}"),
            Slot::Student(i) => write!(f, "student #{i}"),
        }
    }
}

/// Who performs one lane of a concurrent step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Crowd {
    One(Actor),
    /// The first `n` students.
    FirstStudents(usize),
    AllStudents,
}

impl Crowd {
    fn resolve(self, teachers: usize, students: usize) -> Result<Vec<Slot>, String> {
        match self {
            Crowd::One(actor) => actor
                .resolve(teachers, students)
                .map(|slot| vec![slot])
                .ok_or_else(|| format!("{actor:?} is not on a roster of {teachers} teachers and {students} students")),
            Crowd::FirstStudents(n) if n <= students => Ok((0..n).map(Slot::Student).collect()),
            Crowd::FirstStudents(n) => Err(format!("needs {n} students, roster has {students}")),
            Crowd::AllStudents => Ok((0..students).map(Slot::Student).collect()),
        }
    }
}

/// Students an annotation toggle applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Learners {
    First(usize),
    All,
}

impl Learners {
    fn pick(self, students: &[UserId]) -> Result<Vec<UserId>, LoadError> {
        match self {
            Learners::All => Ok(students.to_vec()),
            Learners::First(n) => students.get(..n).map(<[UserId]>::to_vec).ok_or_else(|| {
                LoadError::Precondition(format!(
                    "annotation needs {n} students, roster has {}",
                    students.len()
                ))
            }),
        }
    }
}

/// What an actor does. Annotation toggles name their learners by position,
/// resolved to user ids when the step runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Cue {
    Do(RoomAction),
    EnableAnnotation(Learners),
    DisableAnnotation(Learners),
}

impl Cue {
    pub(crate) fn resolve(&self, students: &[UserId]) -> Result<RoomAction, LoadError> {
        match self {
            Cue::Do(action) => Ok(action.clone()),
            Cue::EnableAnnotation(learners) => Ok(RoomAction::EnableAnnotation {
                learners: learners.pick(students)?,
            }),
            Cue::DisableAnnotation(learners) => Ok(RoomAction::DisableAnnotation {
                learners: learners.pick(students)?,
            }),
        }
    }
}

impl From<RoomAction> for Cue {
    fn from(action: RoomAction) -> Self {
        Cue::Do(action)
    }
}

/// One lane of a concurrent step: every member of `crowd` performs `cue`
/// `repeat` times, `interval` apart, concurrently with the other members.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Lane {
    pub crowd: Crowd,
    pub cue: Cue,
    pub repeat: u32,
    pub interval: Duration,
}

impl Lane {
    pub fn new(crowd: Crowd, cue: impl Into<Cue>) -> Self {
        Self {
            crowd,
            cue: cue.into(),
            repeat: 1,
            interval: Duration::ZERO,
        }
    }

    #[must_use]
    pub fn repeated(mut self, repeat: u32, interval: Duration) -> Self {
        self.repeat = repeat;
        self.interval = interval;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepKind {
    /// A single action, blocking until the RPC completes.
    Act { actor: Actor, cue: Cue },
    /// A fixed pacing wait.
    Pause(Duration),
    /// Lanes run concurrently with fail-fast cancellation.
    FanOut(Vec<Lane>),
    /// One actor repeating an action in a tight loop.
    Burst {
        actor: Actor,
        cue: Cue,
        repeat: u32,
        interval: Duration,
    },
    /// Every attendee fires one detached state fetch.
    RefreshAll,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Step {
    pub name: String,
    pub kind: StepKind,
}

/// An ordered script of steps.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Choreography {
    steps: Vec<Step>,
}

impl Choreography {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    #[must_use]
    pub fn step(mut self, name: impl Into<String>, kind: StepKind) -> Self {
        self.steps.push(Step {
            name: name.into(),
            kind,
        });
        self
    }

    #[must_use]
    pub fn act(self, name: impl Into<String>, actor: Actor, cue: impl Into<Cue>) -> Self {
        self.step(
            name,
            StepKind::Act {
                actor,
                cue: cue.into(),
            },
        )
    }

    #[must_use]
    pub fn pause(self, name: impl Into<String>, duration: Duration) -> Self {
        self.step(name, StepKind::Pause(duration))
    }

    #[must_use]
    pub fn fan_out(self, name: impl Into<String>, lanes: Vec<Lane>) -> Self {
        self.step(name, StepKind::FanOut(lanes))
    }

    #[must_use]
    pub fn burst(
        self,
        name: impl Into<String>,
        actor: Actor,
        cue: impl Into<Cue>,
        repeat: u32,
        interval: Duration,
    ) -> Self {
        self.step(
            name,
            StepKind::Burst {
                actor,
                cue: cue.into(),
                repeat,
                interval,
            },
        )
    }

    #[must_use]
    pub fn refresh_all(self, name: impl Into<String>) -> Self {
        self.step(name, StepKind::RefreshAll)
    }

    /// Sum of all waits a run of this script performs.
    pub fn total_pacing(&self) -> Duration {
        self.steps
            .iter()
            .map(|step| match &step.kind {
                StepKind::Pause(d) => *d,
                StepKind::Burst {
                    repeat, interval, ..
                } => interval.saturating_mul(repeat.saturating_sub(1)),
                StepKind::FanOut(lanes) => lanes
                    .iter()
                    .map(|l| l.interval.saturating_mul(l.repeat.saturating_sub(1)))
                    .max()
                    .unwrap_or_default(),
                StepKind::Act { .. } | StepKind::RefreshAll => Duration::ZERO,
            })
            .sum()
    }

    /// Check the script against a roster of `teachers` and `students`.
    ///
    /// Every referenced participant must exist, every repeat count must be
    /// positive, and the lanes of one concurrent step must name distinct
    /// participants.
    pub fn validate(&self, teachers: usize, students: usize) -> Result<(), LoadError> {
        let fake_students: Vec<UserId> = (0..students).map(|i| UserId(i.to_string())).collect();

        for step in &self.steps {
            let problem = |detail: String| {
                LoadError::Precondition(format!("step '{}': {detail}", step.name))
            };
            match &step.kind {
                StepKind::Act { actor, cue } => {
                    Crowd::One(*actor)
                        .resolve(teachers, students)
                        .map_err(problem)?;
                    cue.resolve(&fake_students)
                        .map_err(|e| problem(e.to_string()))?;
                }
                StepKind::Burst {
                    actor, cue, repeat, ..
                } => {
                    Crowd::One(*actor)
                        .resolve(teachers, students)
                        .map_err(problem)?;
                    cue.resolve(&fake_students)
                        .map_err(|e| problem(e.to_string()))?;
                    if *repeat == 0 {
                        return Err(problem("burst repeat must be positive".to_string()));
                    }
                }
                StepKind::FanOut(lanes) => {
                    let mut seen = HashSet::new();
                    for lane in lanes {
                        if lane.repeat == 0 {
                            return Err(problem("lane repeat must be positive".to_string()));
                        }
                        lane.cue
                            .resolve(&fake_students)
                            .map_err(|e| problem(e.to_string()))?;
                        for slot in lane.crowd.resolve(teachers, students).map_err(problem)? {
                            if !seen.insert(slot) {
                                return Err(problem(format!("{slot} appears in two lanes")));
                            }
                        }
                    }
                }
                StepKind::Pause(_) | StepKind::RefreshAll => {}
            }
        }
        Ok(())
    }
}
