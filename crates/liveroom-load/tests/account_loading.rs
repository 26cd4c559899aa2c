//! Loading the account pool from an accounts file.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use liveroom_load::accounts::{AccountError, AccountPool, AccountSelection, Role};
use liveroom_test_utils::{accounts_file, MockIdentityProvider};
use std::io::Write;
use std::time::Duration;

const RPC_TIMEOUT: Duration = Duration::from_secs(1);

fn write_file(contents: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(contents.as_bytes()).unwrap();
    file
}

#[tokio::test]
async fn test_load_signs_in_every_login() {
    let file = write_file(&accounts_file(3, 12));
    let pool = AccountPool::load(file.path(), &MockIdentityProvider::new(), RPC_TIMEOUT)
        .await
        .unwrap();

    assert_eq!(pool.admin().id.as_str(), "admin");
    assert_eq!(pool.all(Role::Teacher).len(), 3);
    assert_eq!(pool.all(Role::Student).len(), 12);
    assert!(pool
        .all(Role::Student)
        .iter()
        .all(|s| s.role == Role::Student));

    let roster = pool.select(Role::Student, 10, AccountSelection::Random).unwrap();
    assert_eq!(roster.len(), 10);
}

#[tokio::test]
async fn test_missing_file_is_io_error() {
    let err = AccountPool::load(
        "/nonexistent/accounts.json",
        &MockIdentityProvider::new(),
        RPC_TIMEOUT,
    )
    .await
    .unwrap_err();
    assert!(matches!(err, AccountError::Io(_)));
}

#[tokio::test]
async fn test_malformed_file_is_parse_error() {
    let file = write_file(r#"{"admin": {"login": "admin"}}"#);
    let err = AccountPool::load(file.path(), &MockIdentityProvider::new(), RPC_TIMEOUT)
        .await
        .unwrap_err();
    assert!(matches!(err, AccountError::Parse(_)));
}

#[tokio::test]
async fn test_file_without_students_is_rejected() {
    let file = write_file(&accounts_file(2, 0));
    let err = AccountPool::load(file.path(), &MockIdentityProvider::new(), RPC_TIMEOUT)
        .await
        .unwrap_err();
    assert!(matches!(err, AccountError::Empty(Role::Student)));
}
