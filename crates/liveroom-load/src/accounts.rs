//! Account pool of pre-authenticated participant identities.
//!
//! The pool is loaded once at startup from a JSON accounts file: every login
//! is signed in through the [`IdentityProvider`] and the resulting identities
//! are held for the lifetime of the process. After loading the pool is
//! read-only and shared across runs behind an `Arc`.

use crate::clients::IdentityProvider;
use crate::errors::{LoadError, RpcError};
use common::secret::SecretString;
use common::types::UserId;
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info};

/// Participant role within a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// Creates sessions; never joins one.
    Admin,
    Teacher,
    Student,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Role::Admin => "admin",
            Role::Teacher => "teacher",
            Role::Student => "student",
        };
        f.write_str(name)
    }
}

/// A signed-in account. Immutable once issued by the identity provider.
#[derive(Debug, Clone)]
pub struct Identity {
    pub id: UserId,
    /// Long-lived credential, exchanged for a session-scoped token on entry.
    pub credential: SecretString,
    pub role: Role,
}

/// Persisted login for one account. The password is redacted in `Debug`.
#[derive(Debug, Clone, Deserialize)]
pub struct Login {
    pub login: String,
    pub password: SecretString,
}

/// On-disk layout of the accounts file.
#[derive(Debug, Deserialize)]
pub struct AccountsFile {
    pub admin: Login,
    pub teachers: Vec<Login>,
    pub students: Vec<Login>,
}

/// How a roster is drawn from the pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AccountSelection {
    /// The first `n` accounts of the role, in file order.
    #[default]
    Leading,
    /// `n` distinct accounts sampled uniformly.
    Random,
}

/// Account pool loading errors.
#[derive(Debug, Error)]
pub enum AccountError {
    #[error("Failed to read accounts file: {0}")]
    Io(String),

    #[error("Invalid accounts file: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Sign-in failed for {login}: {source}")]
    SignIn {
        login: String,
        #[source]
        source: RpcError,
    },

    #[error("Sign-in timed out for {login}")]
    SignInTimeout { login: String },

    #[error("Accounts file has no {0} accounts")]
    Empty(Role),
}

/// Pre-authenticated identities, grouped by role.
#[derive(Debug, Clone)]
pub struct AccountPool {
    admin: Identity,
    teachers: Vec<Identity>,
    students: Vec<Identity>,
}

impl AccountPool {
    /// Build a pool from already signed-in identities.
    pub fn new(
        admin: Identity,
        teachers: Vec<Identity>,
        students: Vec<Identity>,
    ) -> Result<Self, AccountError> {
        if teachers.is_empty() {
            return Err(AccountError::Empty(Role::Teacher));
        }
        if students.is_empty() {
            return Err(AccountError::Empty(Role::Student));
        }
        Ok(Self {
            admin,
            teachers,
            students,
        })
    }

    /// Read the accounts file at `path` and sign every login in.
    pub async fn load(
        path: impl AsRef<Path>,
        provider: &dyn IdentityProvider,
        rpc_timeout: Duration,
    ) -> Result<Self, AccountError> {
        let raw = tokio::fs::read_to_string(path.as_ref())
            .await
            .map_err(|e| AccountError::Io(format!("{}: {e}", path.as_ref().display())))?;
        let file: AccountsFile = serde_json::from_str(&raw)?;
        Self::sign_in_all(file, provider, rpc_timeout).await
    }

    /// Sign in every login of a parsed accounts file.
    pub async fn sign_in_all(
        file: AccountsFile,
        provider: &dyn IdentityProvider,
        rpc_timeout: Duration,
    ) -> Result<Self, AccountError> {
        let admin = sign_in(provider, &file.admin, Role::Admin, rpc_timeout).await?;

        let mut teachers = Vec::with_capacity(file.teachers.len());
        for login in &file.teachers {
            teachers.push(sign_in(provider, login, Role::Teacher, rpc_timeout).await?);
        }

        let mut students = Vec::with_capacity(file.students.len());
        for login in &file.students {
            students.push(sign_in(provider, login, Role::Student, rpc_timeout).await?);
        }

        info!(
            teachers = teachers.len(),
            students = students.len(),
            "Account pool loaded"
        );
        Self::new(admin, teachers, students)
    }

    /// Identity used to create sessions.
    pub fn admin(&self) -> &Identity {
        &self.admin
    }

    /// All identities of a role. The admin role holds exactly one.
    pub fn all(&self, role: Role) -> &[Identity] {
        match role {
            Role::Admin => std::slice::from_ref(&self.admin),
            Role::Teacher => &self.teachers,
            Role::Student => &self.students,
        }
    }

    /// One identity of `role`, chosen uniformly.
    pub fn pick_random(&self, role: Role) -> Option<&Identity> {
        self.all(role).choose(&mut rand::thread_rng())
    }

    /// Draw `count` distinct identities of `role`.
    pub fn select(
        &self,
        role: Role,
        count: usize,
        selection: AccountSelection,
    ) -> Result<Vec<Identity>, LoadError> {
        let available = self.all(role);
        if count > available.len() {
            return Err(LoadError::Precondition(format!(
                "requested {count} {role} accounts but the pool holds {}",
                available.len()
            )));
        }

        let chosen = match selection {
            AccountSelection::Leading => available.iter().take(count).cloned().collect(),
            AccountSelection::Random => available
                .choose_multiple(&mut rand::thread_rng(), count)
                .cloned()
                .collect(),
        };
        Ok(chosen)
    }
}

async fn sign_in(
    provider: &dyn IdentityProvider,
    login: &Login,
    role: Role,
    rpc_timeout: Duration,
) -> Result<Identity, AccountError> {
    debug!(login = %login.login, role = %role, "Signing in account");
    match tokio::time::timeout(rpc_timeout, provider.sign_in(login, role)).await {
        Ok(Ok(identity)) => Ok(identity),
        Ok(Err(source)) => Err(AccountError::SignIn {
            login: login.login.clone(),
            source,
        }),
        Err(_) => Err(AccountError::SignInTimeout {
            login: login.login.clone(),
        }),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::indexing_slicing)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::HashSet;

    fn identity(id: &str, role: Role) -> Identity {
        Identity {
            id: UserId::from(id),
            credential: SecretString::from(format!("cred-{id}")),
            role,
        }
    }

    fn pool(teachers: usize, students: usize) -> AccountPool {
        AccountPool::new(
            identity("admin", Role::Admin),
            (0..teachers)
                .map(|i| identity(&format!("t{i}"), Role::Teacher))
                .collect(),
            (0..students)
                .map(|i| identity(&format!("s{i}"), Role::Student))
                .collect(),
        )
        .unwrap()
    }

    /// Signs in by echoing the login as the user id; fails for `"locked"`.
    struct EchoProvider;

    #[async_trait]
    impl IdentityProvider for EchoProvider {
        async fn sign_in(&self, login: &Login, role: Role) -> Result<Identity, RpcError> {
            if login.login == "locked" {
                return Err(RpcError::Rejected {
                    status: 401,
                    body: "account locked".to_string(),
                });
            }
            Ok(identity(&login.login, role))
        }

        async fn exchange_token(&self, identity: &Identity) -> Result<SecretString, RpcError> {
            Ok(SecretString::from(format!("token-{}", identity.id)))
        }
    }

    #[test]
    fn test_leading_selection_keeps_file_order() {
        let pool = pool(3, 5);
        let chosen = pool
            .select(Role::Student, 3, AccountSelection::Leading)
            .unwrap();
        let ids: Vec<_> = chosen.iter().map(|i| i.id.as_str().to_string()).collect();
        assert_eq!(ids, vec!["s0", "s1", "s2"]);
    }

    #[test]
    fn test_random_selection_is_distinct() {
        let pool = pool(3, 10);
        let chosen = pool
            .select(Role::Student, 6, AccountSelection::Random)
            .unwrap();
        let unique: HashSet<_> = chosen.iter().map(|i| i.id.clone()).collect();
        assert_eq!(unique.len(), 6);
        assert!(chosen.iter().all(|i| i.role == Role::Student));
    }

    #[test]
    fn test_selecting_more_than_pool_is_precondition_error() {
        let pool = pool(2, 2);
        let err = pool
            .select(Role::Teacher, 3, AccountSelection::Leading)
            .unwrap_err();
        assert!(matches!(err, LoadError::Precondition(_)));
    }

    #[test]
    fn test_pick_random_and_all() {
        let pool = pool(2, 4);
        assert_eq!(pool.all(Role::Teacher).len(), 2);
        assert_eq!(pool.all(Role::Admin).len(), 1);
        let picked = pool.pick_random(Role::Student).unwrap();
        assert_eq!(picked.role, Role::Student);
    }

    #[test]
    fn test_empty_role_is_rejected() {
        let result = AccountPool::new(identity("admin", Role::Admin), vec![], vec![]);
        assert!(matches!(result, Err(AccountError::Empty(Role::Teacher))));
    }

    #[tokio::test]
    async fn test_sign_in_all_assigns_roles() {
        let file: AccountsFile = serde_json::from_str(
            r#"{
                "admin": {"login": "root", "password": "pw"},
                "teachers": [{"login": "t-a", "password": "pw"}],
                "students": [{"login": "s-a", "password": "pw"}, {"login": "s-b", "password": "pw"}]
            }"#,
        )
        .unwrap();

        let pool = AccountPool::sign_in_all(file, &EchoProvider, Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(pool.admin().id.as_str(), "root");
        assert_eq!(pool.all(Role::Student)[1].id.as_str(), "s-b");
        assert_eq!(pool.all(Role::Teacher)[0].role, Role::Teacher);
    }

    #[tokio::test]
    async fn test_sign_in_failure_names_login() {
        let file: AccountsFile = serde_json::from_str(
            r#"{
                "admin": {"login": "root", "password": "pw"},
                "teachers": [{"login": "locked", "password": "pw"}],
                "students": []
            }"#,
        )
        .unwrap();

        let err = AccountPool::sign_in_all(file, &EchoProvider, Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(err, AccountError::SignIn { ref login, .. } if login == "locked"));
    }

    #[tokio::test]
    async fn test_load_reports_missing_file() {
        let err = AccountPool::load(
            "/nonexistent/accounts.json",
            &EchoProvider,
            Duration::from_secs(1),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, AccountError::Io(_)));
    }
}
