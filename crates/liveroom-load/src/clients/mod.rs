//! Capability interfaces consumed by the harness.
//!
//! The harness never talks to a transport directly: identities come from an
//! [`IdentityProvider`] and every session interaction goes through a
//! [`SessionClient`]. Each method is one blocking RPC. Implementations are
//! expected to be cheap to share behind an `Arc` and safe to call from many
//! tasks at once.
//!
//! - [`http`] - JSON/HTTP implementations used by the binary

pub mod http;

use crate::accounts::{Identity, Login, Role};
use crate::errors::RpcError;
use async_trait::async_trait;
use common::secret::SecretString;
use common::types::{SessionId, UserId};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Session-creation request issued by the bootstrapper.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CreateSessionRequest {
    pub teacher_ids: Vec<UserId>,
    pub student_ids: Vec<UserId>,
    pub course_id: String,
    pub location_id: String,
}

/// Profile returned for the calling participant.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Profile {
    pub user_id: UserId,
    #[serde(default)]
    pub display_name: Option<String>,
}

/// Point-in-time view of a live session. The harness discards most of it.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct StateSnapshot {
    pub session_id: SessionId,
    #[serde(default)]
    pub shared_material: Option<String>,
    #[serde(default)]
    pub raised_hands: Vec<UserId>,
    #[serde(default)]
    pub annotators: Vec<UserId>,
    #[serde(default)]
    pub poll_open: bool,
    #[serde(default)]
    pub recording: bool,
}

/// Kind of material a teacher shares.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MaterialKind {
    Pdf,
    Video,
}

/// One in-session action. Each is a single RPC returning success or an error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum RoomAction {
    ShareMaterial { kind: MaterialKind },
    StopSharing,
    PauseVideo,
    ResumeVideo,
    StopVideo,
    OpenPoll { options: u8 },
    SubmitPollAnswer { answer: String },
    StopPoll,
    EndPoll,
    RaiseHand,
    LowerHand,
    LowerAllHands,
    EnableAnnotation { learners: Vec<UserId> },
    DisableAnnotation { learners: Vec<UserId> },
    StartRecording,
    StopRecording,
    EndSession,
}

impl RoomAction {
    /// Stable name used as the RPC phase in errors and logs.
    pub fn name(&self) -> &'static str {
        match self {
            RoomAction::ShareMaterial { .. } => "ShareMaterial",
            RoomAction::StopSharing => "StopSharing",
            RoomAction::PauseVideo => "PauseVideo",
            RoomAction::ResumeVideo => "ResumeVideo",
            RoomAction::StopVideo => "StopVideo",
            RoomAction::OpenPoll { .. } => "OpenPoll",
            RoomAction::SubmitPollAnswer { .. } => "SubmitPollAnswer",
            RoomAction::StopPoll => "StopPoll",
            RoomAction::EndPoll => "EndPoll",
            RoomAction::RaiseHand => "RaiseHand",
            RoomAction::LowerHand => "LowerHand",
            RoomAction::LowerAllHands => "LowerAllHands",
            RoomAction::EnableAnnotation { .. } => "EnableAnnotation",
            RoomAction::DisableAnnotation { .. } => "DisableAnnotation",
            RoomAction::StartRecording => "StartRecording",
            RoomAction::StopRecording => "StopRecording",
            RoomAction::EndSession => "EndSession",
        }
    }
}

impl fmt::Display for RoomAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Signs accounts in and exchanges their credentials for session tokens.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Sign a persisted login in, resolving its user id and credential.
    async fn sign_in(&self, login: &Login, role: Role) -> Result<Identity, RpcError>;

    /// Exchange an identity's credential for a session-scoped bearer token.
    async fn exchange_token(&self, identity: &Identity) -> Result<SecretString, RpcError>;
}

/// Session-service RPC surface. `token` is always the caller's session-scoped token.
#[async_trait]
pub trait SessionClient: Send + Sync {
    /// Create a session bound to the given participants. Not idempotent.
    async fn create_session(
        &self,
        token: &SecretString,
        request: &CreateSessionRequest,
    ) -> Result<SessionId, RpcError>;

    async fn get_profile(&self, token: &SecretString) -> Result<Profile, RpcError>;

    async fn list_locations(&self, token: &SecretString) -> Result<Vec<String>, RpcError>;

    async fn list_courses(&self, token: &SecretString) -> Result<Vec<String>, RpcError>;

    /// Sessions scheduled for a course.
    async fn list_sessions(
        &self,
        token: &SecretString,
        course_id: &str,
    ) -> Result<Vec<SessionId>, RpcError>;

    async fn list_participants(
        &self,
        token: &SecretString,
        session: &SessionId,
    ) -> Result<Vec<UserId>, RpcError>;

    async fn list_materials(
        &self,
        token: &SecretString,
        session: &SessionId,
    ) -> Result<Vec<String>, RpcError>;

    async fn join(&self, token: &SecretString, session: &SessionId) -> Result<(), RpcError>;

    async fn fetch_state(
        &self,
        token: &SecretString,
        session: &SessionId,
    ) -> Result<StateSnapshot, RpcError>;

    /// Keep-alive for the caller's live session subscription.
    async fn refresh(&self, token: &SecretString, session: &SessionId) -> Result<(), RpcError>;

    async fn perform(
        &self,
        token: &SecretString,
        session: &SessionId,
        action: &RoomAction,
    ) -> Result<(), RpcError>;
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_room_action_json_is_tagged() {
        let json = serde_json::to_string(&RoomAction::OpenPoll { options: 5 }).unwrap();
        assert_eq!(json, r#"{"action":"open_poll","options":5}"#);

        let json = serde_json::to_string(&RoomAction::ShareMaterial {
            kind: MaterialKind::Pdf,
        })
        .unwrap();
        assert_eq!(json, r#"{"action":"share_material","kind":"pdf"}"#);

        let json = serde_json::to_string(&RoomAction::LowerAllHands).unwrap();
        assert_eq!(json, r#"{"action":"lower_all_hands"}"#);
    }

    #[test]
    fn test_state_snapshot_tolerates_missing_fields() {
        let state: StateSnapshot = serde_json::from_str(r#"{"session_id": "lesson-1"}"#).unwrap();
        assert_eq!(state.session_id.as_str(), "lesson-1");
        assert!(state.raised_hands.is_empty());
        assert!(!state.recording);
    }

    #[test]
    fn test_action_names() {
        assert_eq!(RoomAction::RaiseHand.to_string(), "RaiseHand");
        assert_eq!(
            RoomAction::EnableAnnotation { learners: vec![] }.name(),
            "EnableAnnotation"
        );
    }
}
