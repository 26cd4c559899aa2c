//! Synchronized room entry.
//!
//! Every participant of a bootstrapped session enters concurrently: exchange
//! its credential for a session token, run the role's entry ritual, then join
//! and take a first state snapshot. Entry is all-or-nothing. The first
//! participant to fail cancels the rest and its error, attributed to that
//! participant, becomes the result.

use crate::accounts::{Identity, Role};
use crate::bootstrap::{Bootstrapped, SessionHandle};
use crate::clients::{IdentityProvider, Profile, SessionClient, StateSnapshot};
use crate::errors::{call_with_deadline, LoadError, RpcError};
use crate::fanout::TaskGroup;
use crate::watcher::WatchTarget;
use common::secret::SecretString;
use common::types::SessionId;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument};

/// Per-participant scratch state carried between choreography steps.
#[derive(Debug, Default, Clone)]
pub struct Scratch {
    pub profile: Option<Profile>,
    pub last_state: Option<StateSnapshot>,
    pub materials: Vec<String>,
    pub rpc_count: u64,
}

/// An identity that has entered a session.
///
/// Owned by exactly one task at a time.
#[derive(Debug)]
pub struct ParticipantContext {
    pub identity: Identity,
    pub label: String,
    pub session_id: SessionId,
    token: SecretString,
    pub scratch: Scratch,
}

impl ParticipantContext {
    pub fn token(&self) -> &SecretString {
        &self.token
    }

    /// What a state watcher needs to poll on this participant's behalf.
    pub fn watch_target(&self) -> WatchTarget {
        WatchTarget {
            label: self.label.clone(),
            session_id: self.session_id.clone(),
            token: self.token.clone(),
        }
    }
}

/// Every participant of a session after a successful entry.
#[derive(Debug)]
pub struct Roster {
    pub teachers: Vec<ParticipantContext>,
    pub students: Vec<ParticipantContext>,
}

impl Roster {
    /// Number of participants, teachers and students together.
    pub fn len(&self) -> usize {
        self.teachers.len() + self.students.len()
    }

    /// True when nobody entered.
    pub fn is_empty(&self) -> bool {
        self.teachers.is_empty() && self.students.is_empty()
    }

    /// Teachers first, then students, each in roster order.
    pub fn iter(&self) -> impl Iterator<Item = &ParticipantContext> {
        self.teachers.iter().chain(self.students.iter())
    }

    /// One polling target per participant.
    pub fn watch_targets(&self) -> Vec<WatchTarget> {
        self.iter().map(ParticipantContext::watch_target).collect()
    }
}

/// Label used to attribute errors and logs to one participant.
pub fn participant_label(role: Role, index: usize, identity: &Identity) -> String {
    format!("{role} #{index} ({})", identity.id)
}

/// Enters every participant of a session concurrently.
pub struct EntrySynchronizer {
    identity: Arc<dyn IdentityProvider>,
    client: Arc<dyn SessionClient>,
    rpc_timeout: Duration,
    max_in_flight: Option<usize>,
}

impl EntrySynchronizer {
    pub fn new(
        identity: Arc<dyn IdentityProvider>,
        client: Arc<dyn SessionClient>,
        rpc_timeout: Duration,
    ) -> Self {
        Self {
            identity,
            client,
            rpc_timeout,
            max_in_flight: None,
        }
    }

    /// Cap concurrent entries. `None` enters everyone at once.
    #[must_use]
    pub fn with_max_in_flight(mut self, max_in_flight: Option<usize>) -> Self {
        self.max_in_flight = max_in_flight;
        self
    }

    pub fn client(&self) -> Arc<dyn SessionClient> {
        Arc::clone(&self.client)
    }

    /// Enter every participant of `session`.
    ///
    /// Returns once all have entered, or with the first failure after every
    /// other entry task has stopped.
    #[instrument(skip_all, fields(session_id = %session.handle.session_id))]
    pub async fn enter(
        &self,
        session: &Bootstrapped,
        cancel: &CancellationToken,
    ) -> Result<Roster, LoadError> {
        let handle = Arc::new(session.handle.clone());
        let mut group = TaskGroup::new("entry", cancel).with_limit(self.max_in_flight);

        let members = session
            .teachers
            .iter()
            .enumerate()
            .map(|(i, identity)| (Role::Teacher, i, identity))
            .chain(
                session
                    .students
                    .iter()
                    .enumerate()
                    .map(|(i, identity)| (Role::Student, i, identity)),
            );

        for (role, index, identity) in members {
            let label = participant_label(role, index, identity);
            let entrant = Entrant {
                identity: Arc::clone(&self.identity),
                client: Arc::clone(&self.client),
                handle: Arc::clone(&handle),
                rpc_timeout: self.rpc_timeout,
            };
            let identity = identity.clone();
            group.spawn(move |_| async move {
                entrant
                    .enter(identity, label.clone())
                    .await
                    .map_err(|e| e.for_participant(label))
            });
        }

        let mut entered = group.wait().await?;
        let students = entered.split_off(session.teachers.len());
        info!(
            teachers = entered.len(),
            students = students.len(),
            "All participants entered"
        );

        Ok(Roster {
            teachers: entered,
            students,
        })
    }
}

/// Everything one entry task needs, owned.
struct Entrant {
    identity: Arc<dyn IdentityProvider>,
    client: Arc<dyn SessionClient>,
    handle: Arc<SessionHandle>,
    rpc_timeout: Duration,
}

impl Entrant {
    async fn enter(
        &self,
        identity: Identity,
        label: String,
    ) -> Result<ParticipantContext, LoadError> {
        let deadline = self.rpc_timeout;
        let session_id = &self.handle.session_id;
        let mut scratch = Scratch::default();

        let token = call_with_deadline(
            "ExchangeToken",
            deadline,
            self.identity.exchange_token(&identity),
        )
        .await?;
        scratch.rpc_count += 1;

        let profile =
            call_with_deadline("GetProfile", deadline, self.client.get_profile(&token)).await?;
        scratch.profile = Some(profile);
        scratch.rpc_count += 1;

        if identity.role == Role::Teacher {
            call_with_deadline("ListLocations", deadline, self.client.list_locations(&token))
                .await?;
            call_with_deadline("ListCourses", deadline, self.client.list_courses(&token)).await?;
            scratch.rpc_count += 2;
        }

        let listed = call_with_deadline(
            "ListSessions",
            deadline,
            self.client.list_sessions(&token, &self.handle.course_id),
        )
        .await?;
        scratch.rpc_count += 1;
        if !listed.contains(session_id) {
            return Err(LoadError::upstream(
                "ListSessions",
                RpcError::Unexpected(format!(
                    "session {session_id} not listed for course {}",
                    self.handle.course_id
                )),
            ));
        }

        if identity.role == Role::Teacher {
            call_with_deadline(
                "ListParticipants",
                deadline,
                self.client.list_participants(&token, session_id),
            )
            .await?;
            scratch.materials = call_with_deadline(
                "ListMaterials",
                deadline,
                self.client.list_materials(&token, session_id),
            )
            .await?;
            scratch.rpc_count += 2;
        }

        call_with_deadline("JoinSession", deadline, self.client.join(&token, session_id)).await?;
        let state = call_with_deadline(
            "FetchState",
            deadline,
            self.client.fetch_state(&token, session_id),
        )
        .await?;
        scratch.last_state = Some(state);
        call_with_deadline(
            "RefreshSession",
            deadline,
            self.client.refresh(&token, session_id),
        )
        .await?;
        scratch.rpc_count += 3;

        debug!(participant = %label, rpcs = scratch.rpc_count, "Participant entered");

        Ok(ParticipantContext {
            identity,
            label,
            session_id: session_id.clone(),
            token,
            scratch,
        })
    }
}
