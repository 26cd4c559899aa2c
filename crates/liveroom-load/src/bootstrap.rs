//! Session bootstrap: one shared session per run.
//!
//! The bootstrapper authenticates as the pool's admin and creates a session
//! bound to a roster drawn from the account pool. Every call creates a new
//! session server-side; nothing is torn down afterwards (sessions expire on
//! their own).

use crate::accounts::{AccountPool, AccountSelection, Identity, Role};
use crate::clients::{CreateSessionRequest, IdentityProvider, SessionClient};
use crate::errors::{call_with_deadline, LoadError};
use common::types::{SessionId, UserId};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// Fewest teachers a session may be created with.
pub const MIN_TEACHERS: usize = 2;

/// Fewest students a session may be created with.
pub const MIN_STUDENTS: usize = 2;

/// Roster size and placement of the sessions a bootstrapper creates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionPlan {
    pub num_teachers: usize,
    pub num_students: usize,
    pub course_id: String,
    pub location_id: String,
    pub selection: AccountSelection,
}

/// A created session. Read-only after creation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionHandle {
    pub session_id: SessionId,
    pub course_id: String,
    pub location_id: String,
    pub participant_ids: Vec<UserId>,
}

/// Output of a bootstrap: the session plus the roster bound to it.
#[derive(Debug, Clone)]
pub struct Bootstrapped {
    pub handle: SessionHandle,
    pub teachers: Vec<Identity>,
    pub students: Vec<Identity>,
}

/// Creates one session per call.
pub struct SessionBootstrapper {
    pool: Arc<AccountPool>,
    identity: Arc<dyn IdentityProvider>,
    client: Arc<dyn SessionClient>,
    plan: SessionPlan,
    rpc_timeout: Duration,
}

impl SessionBootstrapper {
    /// Validate `plan` against the pool.
    ///
    /// Fails with `Precondition` when the plan asks for fewer than the minimum
    /// roster or more accounts than the pool holds.
    pub fn new(
        pool: Arc<AccountPool>,
        identity: Arc<dyn IdentityProvider>,
        client: Arc<dyn SessionClient>,
        plan: SessionPlan,
        rpc_timeout: Duration,
    ) -> Result<Self, LoadError> {
        check_roster(&pool, Role::Teacher, plan.num_teachers, MIN_TEACHERS)?;
        check_roster(&pool, Role::Student, plan.num_students, MIN_STUDENTS)?;

        Ok(Self {
            pool,
            identity,
            client,
            plan,
            rpc_timeout,
        })
    }

    pub fn plan(&self) -> &SessionPlan {
        &self.plan
    }

    /// Draw a roster and create a session for it.
    pub async fn bootstrap(&self) -> Result<Bootstrapped, LoadError> {
        let teachers =
            self.pool
                .select(Role::Teacher, self.plan.num_teachers, self.plan.selection)?;
        let students =
            self.pool
                .select(Role::Student, self.plan.num_students, self.plan.selection)?;

        let admin_token = call_with_deadline(
            "ExchangeAdminToken",
            self.rpc_timeout,
            self.identity.exchange_token(self.pool.admin()),
        )
        .await?;

        let request = CreateSessionRequest {
            teacher_ids: teachers.iter().map(|t| t.id.clone()).collect(),
            student_ids: students.iter().map(|s| s.id.clone()).collect(),
            course_id: self.plan.course_id.clone(),
            location_id: self.plan.location_id.clone(),
        };

        let session_id = call_with_deadline(
            "CreateSession",
            self.rpc_timeout,
            self.client.create_session(&admin_token, &request),
        )
        .await?;

        info!(
            session_id = %session_id,
            teachers = teachers.len(),
            students = students.len(),
            "Session created"
        );

        let mut participant_ids = request.teacher_ids;
        participant_ids.extend(request.student_ids);

        Ok(Bootstrapped {
            handle: SessionHandle {
                session_id,
                course_id: request.course_id,
                location_id: request.location_id,
                participant_ids,
            },
            teachers,
            students,
        })
    }
}

fn check_roster(
    pool: &AccountPool,
    role: Role,
    requested: usize,
    minimum: usize,
) -> Result<(), LoadError> {
    let available = pool.all(role).len();
    if requested < minimum || requested > available {
        return Err(LoadError::Precondition(format!(
            "{role} count must be between {minimum} and {available}, got {requested}"
        )));
    }
    Ok(())
}
