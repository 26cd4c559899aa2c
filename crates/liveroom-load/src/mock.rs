//! Scriptable in-memory capability implementations.
//!
//! Available to this crate's unit tests and, through the `test-utils`
//! feature, to other crates' tests. Tokens issued by [`MockIdentityProvider`]
//! have the form `token:<user id>`; [`MockSessionClient`] uses that to
//! attribute calls and failures to a participant.

use crate::accounts::{Identity, Login, Role};
use crate::clients::{
    CreateSessionRequest, IdentityProvider, Profile, RoomAction, SessionClient, StateSnapshot,
};
use crate::errors::RpcError;
use crate::pacing::Pacer;
use async_trait::async_trait;
use common::secret::{ExposeSecret, SecretString};
use common::types::{SessionId, UserId};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

const TOKEN_PREFIX: &str = "token:";

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn caller(token: &SecretString) -> UserId {
    let raw = token.expose_secret();
    UserId(raw.strip_prefix(TOKEN_PREFIX).unwrap_or(raw).to_string())
}

/// One recorded call against the mock session client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedCall {
    pub caller: UserId,
    pub method: String,
    pub action: Option<RoomAction>,
}

#[derive(Debug, Clone)]
struct FailureRule {
    method: String,
    caller: Option<UserId>,
    skip: usize,
    remaining: Option<usize>,
    error: RpcError,
}

/// In-memory session service.
#[derive(Debug, Default)]
pub struct MockSessionClient {
    latency: Duration,
    method_latency: HashMap<String, Duration>,
    rules: Mutex<Vec<FailureRule>>,
    calls: Mutex<Vec<RecordedCall>>,
    sessions: Mutex<Vec<SessionId>>,
    hide_sessions: bool,
    session_seq: AtomicUsize,
}

impl MockSessionClient {
    /// A client where every call succeeds immediately.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Delay every call by `latency`.
    #[must_use]
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Delay calls to `method` by `latency` instead of the default.
    #[must_use]
    pub fn with_method_latency(mut self, method: &str, latency: Duration) -> Self {
        self.method_latency.insert(method.to_string(), latency);
        self
    }

    /// Fail every call to `method`.
    #[must_use]
    pub fn failing(self, method: &str, error: RpcError) -> Self {
        self.push_rule(method, None, 0, None, error)
    }

    /// Fail every call to `method` made by `user`.
    #[must_use]
    pub fn failing_for(self, method: &str, user: &UserId, error: RpcError) -> Self {
        self.push_rule(method, Some(user.clone()), 0, None, error)
    }

    /// Fail the next `times` calls to `method`, then succeed.
    #[must_use]
    pub fn failing_times(self, method: &str, times: usize, error: RpcError) -> Self {
        self.push_rule(method, None, 0, Some(times), error)
    }

    /// Let the first `successes` calls to `method` through, then fail every
    /// later one.
    #[must_use]
    pub fn failing_after(self, method: &str, successes: usize, error: RpcError) -> Self {
        self.push_rule(method, None, successes, None, error)
    }

    /// Do not list created sessions under their course.
    #[must_use]
    pub fn hiding_sessions(mut self) -> Self {
        self.hide_sessions = true;
        self
    }

    fn push_rule(
        self,
        method: &str,
        caller: Option<UserId>,
        skip: usize,
        remaining: Option<usize>,
        error: RpcError,
    ) -> Self {
        lock(&self.rules).push(FailureRule {
            method: method.to_string(),
            caller,
            skip,
            remaining,
            error,
        });
        self
    }

    /// Number of calls to `method` from anyone.
    pub fn calls(&self, method: &str) -> usize {
        lock(&self.calls)
            .iter()
            .filter(|c| c.method == method)
            .count()
    }

    /// Number of calls to `method` from `user`.
    pub fn calls_by(&self, method: &str, user: &UserId) -> usize {
        lock(&self.calls)
            .iter()
            .filter(|c| c.method == method && &c.caller == user)
            .count()
    }

    /// Every recorded call, in arrival order.
    pub fn recorded(&self) -> Vec<RecordedCall> {
        lock(&self.calls).clone()
    }

    /// Names of performed room actions, in arrival order.
    pub fn performed(&self) -> Vec<String> {
        lock(&self.calls)
            .iter()
            .filter_map(|c| c.action.as_ref().map(|a| a.name().to_string()))
            .collect()
    }

    pub fn sessions_created(&self) -> usize {
        lock(&self.sessions).len()
    }

    async fn handle(
        &self,
        token: &SecretString,
        method: &str,
        action: Option<&RoomAction>,
    ) -> Result<(), RpcError> {
        let latency = self
            .method_latency
            .get(method)
            .copied()
            .unwrap_or(self.latency);
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }

        let who = caller(token);
        lock(&self.calls).push(RecordedCall {
            caller: who.clone(),
            method: method.to_string(),
            action: action.cloned(),
        });

        let mut rules = lock(&self.rules);
        for rule in rules.iter_mut() {
            let applies = rule.method == method
                && (rule.caller.is_none() || rule.caller.as_ref() == Some(&who))
                && rule.remaining != Some(0);
            if applies && rule.skip > 0 {
                rule.skip -= 1;
                continue;
            }
            if applies {
                if let Some(remaining) = rule.remaining.as_mut() {
                    *remaining -= 1;
                }
                return Err(rule.error.clone());
            }
        }
        Ok(())
    }
}

#[async_trait]
impl SessionClient for MockSessionClient {
    async fn create_session(
        &self,
        token: &SecretString,
        request: &CreateSessionRequest,
    ) -> Result<SessionId, RpcError> {
        self.handle(token, "CreateSession", None).await?;
        let seq = self.session_seq.fetch_add(1, Ordering::SeqCst);
        let id = SessionId(format!("{}-session-{seq}", request.course_id));
        lock(&self.sessions).push(id.clone());
        Ok(id)
    }

    async fn get_profile(&self, token: &SecretString) -> Result<Profile, RpcError> {
        self.handle(token, "GetProfile", None).await?;
        Ok(Profile {
            user_id: caller(token),
            display_name: None,
        })
    }

    async fn list_locations(&self, token: &SecretString) -> Result<Vec<String>, RpcError> {
        self.handle(token, "ListLocations", None).await?;
        Ok(vec!["location-1".to_string()])
    }

    async fn list_courses(&self, token: &SecretString) -> Result<Vec<String>, RpcError> {
        self.handle(token, "ListCourses", None).await?;
        Ok(vec!["course-1".to_string()])
    }

    async fn list_sessions(
        &self,
        token: &SecretString,
        _course_id: &str,
    ) -> Result<Vec<SessionId>, RpcError> {
        self.handle(token, "ListSessions", None).await?;
        if self.hide_sessions {
            return Ok(Vec::new());
        }
        Ok(lock(&self.sessions).clone())
    }

    async fn list_participants(
        &self,
        token: &SecretString,
        _session: &SessionId,
    ) -> Result<Vec<UserId>, RpcError> {
        self.handle(token, "ListParticipants", None).await?;
        Ok(Vec::new())
    }

    async fn list_materials(
        &self,
        token: &SecretString,
        _session: &SessionId,
    ) -> Result<Vec<String>, RpcError> {
        self.handle(token, "ListMaterials", None).await?;
        Ok(vec!["slides.pdf".to_string()])
    }

    async fn join(&self, token: &SecretString, _session: &SessionId) -> Result<(), RpcError> {
        self.handle(token, "JoinSession", None).await
    }

    async fn fetch_state(
        &self,
        token: &SecretString,
        session: &SessionId,
    ) -> Result<StateSnapshot, RpcError> {
        self.handle(token, "FetchState", None).await?;
        Ok(StateSnapshot {
            session_id: session.clone(),
            shared_material: None,
            raised_hands: Vec::new(),
            annotators: Vec::new(),
            poll_open: false,
            recording: false,
        })
    }

    async fn refresh(&self, token: &SecretString, _session: &SessionId) -> Result<(), RpcError> {
        self.handle(token, "RefreshSession", None).await
    }

    async fn perform(
        &self,
        token: &SecretString,
        _session: &SessionId,
        action: &RoomAction,
    ) -> Result<(), RpcError> {
        self.handle(token, action.name(), Some(action)).await
    }
}

/// In-memory identity service.
#[derive(Debug, Default)]
pub struct MockIdentityProvider {
    failing_exchange: Vec<UserId>,
    exchanges: AtomicUsize,
}

impl MockIdentityProvider {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Reject token exchange for `user`.
    #[must_use]
    pub fn failing_exchange_for(mut self, user: &UserId) -> Self {
        self.failing_exchange.push(user.clone());
        self
    }

    pub fn exchanges(&self) -> usize {
        self.exchanges.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl IdentityProvider for MockIdentityProvider {
    async fn sign_in(&self, login: &Login, role: Role) -> Result<Identity, RpcError> {
        Ok(Identity {
            id: UserId(login.login.clone()),
            credential: SecretString::from(format!("cred:{}", login.login)),
            role,
        })
    }

    async fn exchange_token(&self, identity: &Identity) -> Result<SecretString, RpcError> {
        self.exchanges.fetch_add(1, Ordering::SeqCst);
        if self.failing_exchange.contains(&identity.id) {
            return Err(RpcError::Rejected {
                status: 401,
                body: "credential expired".to_string(),
            });
        }
        Ok(SecretString::from(format!("{TOKEN_PREFIX}{}", identity.id)))
    }
}

/// Pacer that records requested waits and returns immediately.
#[derive(Debug, Default)]
pub struct RecordingPacer {
    waits: Mutex<Vec<Duration>>,
}

impl RecordingPacer {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn waits(&self) -> Vec<Duration> {
        lock(&self.waits).clone()
    }

    pub fn total(&self) -> Duration {
        lock(&self.waits).iter().sum()
    }
}

#[async_trait]
impl Pacer for RecordingPacer {
    async fn pause(&self, duration: Duration) {
        lock(&self.waits).push(duration);
    }
}

/// Identity with a mock credential.
pub fn identity(id: &str, role: Role) -> Identity {
    Identity {
        id: UserId::from(id),
        credential: SecretString::from(format!("cred:{id}")),
        role,
    }
}

/// Token the mock identity provider would issue to `user`.
pub fn token_for(user: &UserId) -> SecretString {
    SecretString::from(format!("{TOKEN_PREFIX}{user}"))
}
