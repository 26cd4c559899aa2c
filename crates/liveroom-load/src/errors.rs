//! Load harness error types.
//!
//! `RpcError` is what a capability interface (identity provider, session
//! client) reports. `LoadError` is what a run reports: every RPC failure is
//! wrapped with the phase that issued it, and fan-out and choreography layers
//! add the participant or step they were executing.

use serde::Serialize;
use std::fmt;
use std::future::Future;
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

/// Failure reported by a capability interface call.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RpcError {
    /// The request never produced a response (connect, I/O, decode).
    #[error("Transport error: {0}")]
    Transport(String),

    /// The service answered with a non-success status.
    #[error("Request rejected with status {status}: {body}")]
    Rejected { status: u16, body: String },

    /// The service answered successfully but with content the harness cannot use.
    #[error("Unexpected response: {0}")]
    Unexpected(String),
}

/// Error produced by a bootstrap, entry or choreography phase of a run.
#[derive(Debug, Error)]
pub enum LoadError {
    /// Pool or roster too small for the requested scenario. Fatal before any run starts.
    #[error("Precondition failed: {0}")]
    Precondition(String),

    /// An RPC issued during `phase` failed.
    #[error("{phase}: {source}")]
    Upstream {
        phase: String,
        #[source]
        source: RpcError,
    },

    /// `phase` exceeded its deadline.
    #[error("{phase}: timed out after {after:?}")]
    Timeout { phase: String, after: Duration },

    /// `phase` was abandoned because its group or run was cancelled.
    #[error("{phase}: cancelled")]
    Cancelled { phase: String },

    /// Attributes an inner failure to one participant of a fan-out.
    #[error("{participant}: {source}")]
    Participant {
        participant: String,
        #[source]
        source: Box<LoadError>,
    },

    /// Attributes an inner failure to a named choreography step.
    #[error("step '{step}': {source}")]
    Step {
        step: String,
        #[source]
        source: Box<LoadError>,
    },

    /// A spawned task panicked or was aborted before producing a result.
    #[error("Task failed: {0}")]
    TaskFailed(String),
}

/// Flat classification of a `LoadError`, independent of wrapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Precondition,
    Upstream,
    Timeout,
    Cancelled,
    Internal,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::Precondition => "precondition",
            ErrorKind::Upstream => "upstream",
            ErrorKind::Timeout => "timeout",
            ErrorKind::Cancelled => "cancelled",
            ErrorKind::Internal => "internal",
        };
        f.write_str(name)
    }
}

impl LoadError {
    /// Wrap an RPC failure with the phase that issued it.
    pub fn upstream(phase: impl Into<String>, source: RpcError) -> Self {
        LoadError::Upstream {
            phase: phase.into(),
            source,
        }
    }

    /// Attribute this error to a participant.
    #[must_use]
    pub fn for_participant(self, participant: impl Into<String>) -> Self {
        LoadError::Participant {
            participant: participant.into(),
            source: Box::new(self),
        }
    }

    /// Attribute this error to a choreography step.
    #[must_use]
    pub fn in_step(self, step: impl Into<String>) -> Self {
        LoadError::Step {
            step: step.into(),
            source: Box::new(self),
        }
    }

    /// The innermost error, with participant and step wrappers removed.
    pub fn root(&self) -> &LoadError {
        match self {
            LoadError::Participant { source, .. } | LoadError::Step { source, .. } => {
                source.root()
            }
            other => other,
        }
    }

    /// Classification of the innermost error.
    pub fn kind(&self) -> ErrorKind {
        match self.root() {
            LoadError::Precondition(_) => ErrorKind::Precondition,
            LoadError::Upstream { .. } => ErrorKind::Upstream,
            LoadError::Timeout { .. } => ErrorKind::Timeout,
            LoadError::Cancelled { .. } => ErrorKind::Cancelled,
            LoadError::TaskFailed(_) | LoadError::Participant { .. } | LoadError::Step { .. } => {
                ErrorKind::Internal
            }
        }
    }

    /// Name of the outermost choreography step this error passed through.
    pub fn step(&self) -> Option<&str> {
        match self {
            LoadError::Step { step, .. } => Some(step),
            LoadError::Participant { source, .. } => source.step(),
            _ => None,
        }
    }

    /// Label of the outermost participant this error is attributed to.
    pub fn participant(&self) -> Option<&str> {
        match self {
            LoadError::Participant { participant, .. } => Some(participant),
            LoadError::Step { source, .. } => source.participant(),
            _ => None,
        }
    }

    /// Whether this error only reports that work was abandoned.
    pub fn is_cancellation(&self) -> bool {
        self.kind() == ErrorKind::Cancelled
    }
}

/// Await an RPC with a deadline, wrapping failures with `phase`.
pub async fn call_with_deadline<T, F>(phase: &str, after: Duration, call: F) -> Result<T, LoadError>
where
    F: Future<Output = Result<T, RpcError>>,
{
    match tokio::time::timeout(after, call).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(e)) => Err(LoadError::upstream(phase, e)),
        Err(_) => Err(LoadError::Timeout {
            phase: phase.to_string(),
            after,
        }),
    }
}

/// Await a whole phase with a deadline.
pub async fn phase_with_deadline<T, F>(phase: &str, after: Duration, work: F) -> Result<T, LoadError>
where
    F: Future<Output = Result<T, LoadError>>,
{
    tokio::time::timeout(after, work)
        .await
        .unwrap_or_else(|_| {
            Err(LoadError::Timeout {
                phase: phase.to_string(),
                after,
            })
        })
}

/// Await `work` unless `cancel` fires first.
///
/// An already-cancelled token returns `Cancelled` without polling `work`.
pub async fn until_cancelled<T, F>(
    phase: &str,
    cancel: &CancellationToken,
    work: F,
) -> Result<T, LoadError>
where
    F: Future<Output = Result<T, LoadError>>,
{
    tokio::select! {
        biased;
        () = cancel.cancelled() => Err(LoadError::Cancelled {
            phase: phase.to_string(),
        }),
        result = work => result,
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_sees_through_wrappers() {
        let err = LoadError::upstream("JoinSession", RpcError::Transport("reset".to_string()))
            .for_participant("student #2")
            .in_step("students raise hands");

        assert_eq!(err.kind(), ErrorKind::Upstream);
        assert_eq!(err.step(), Some("students raise hands"));
        assert_eq!(err.participant(), Some("student #2"));
        assert!(matches!(err.root(), LoadError::Upstream { phase, .. } if phase == "JoinSession"));
    }

    #[test]
    fn test_display_formatting() {
        let err = LoadError::upstream(
            "CreateSession",
            RpcError::Rejected {
                status: 503,
                body: "unavailable".to_string(),
            },
        );
        assert_eq!(
            err.to_string(),
            "CreateSession: Request rejected with status 503: unavailable"
        );

        let err = LoadError::Timeout {
            phase: "entry".to_string(),
            after: Duration::from_secs(3),
        }
        .in_step("enter");
        assert_eq!(err.to_string(), "step 'enter': entry: timed out after 3s");
    }

    #[test]
    fn test_precondition_and_task_failures_classify() {
        assert_eq!(
            LoadError::Precondition("too few students".to_string()).kind(),
            ErrorKind::Precondition
        );
        assert_eq!(
            LoadError::TaskFailed("panicked".to_string()).kind(),
            ErrorKind::Internal
        );
        assert!(LoadError::Cancelled {
            phase: "raise hand".to_string()
        }
        .for_participant("student #1")
        .is_cancellation());
    }

    #[tokio::test(start_paused = true)]
    async fn test_call_with_deadline_times_out() {
        let result: Result<(), LoadError> =
            call_with_deadline("FetchState", Duration::from_secs(1), async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok(())
            })
            .await;

        let err = result.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Timeout);
        assert_eq!(err.to_string(), "FetchState: timed out after 1s");
    }

    #[tokio::test]
    async fn test_call_with_deadline_wraps_rpc_error() {
        let result: Result<(), LoadError> =
            call_with_deadline("RaiseHand", Duration::from_secs(1), async {
                Err(RpcError::Unexpected("empty body".to_string()))
            })
            .await;

        assert!(matches!(
            result,
            Err(LoadError::Upstream { ref phase, .. }) if phase == "RaiseHand"
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_phase_with_deadline_passes_inner_error_through() {
        let result: Result<(), LoadError> =
            phase_with_deadline("bootstrap", Duration::from_secs(10), async {
                Err(LoadError::Precondition("no admin".to_string()))
            })
            .await;
        assert_eq!(result.unwrap_err().kind(), ErrorKind::Precondition);
    }

    #[tokio::test]
    async fn test_until_cancelled_skips_work_once_cancelled() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let mut polled = false;

        let result: Result<(), LoadError> = until_cancelled("EndSession", &cancel, async {
            polled = true;
            Ok(())
        })
        .await;

        assert!(!polled);
        assert!(matches!(
            result,
            Err(LoadError::Cancelled { ref phase }) if phase == "EndSession"
        ));
    }
}
