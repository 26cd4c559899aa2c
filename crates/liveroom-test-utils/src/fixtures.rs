//! Account fixtures.
//!
//! Teachers are named `t0..tN`, students `s0..sN` and the admin `admin`, so
//! tests can target a participant by user id.

use liveroom_load::accounts::{AccountPool, Role};
use liveroom_load::mock::identity;
use std::sync::Arc;

/// User id of teacher `i`.
#[must_use]
pub fn teacher_id(i: usize) -> String {
    format!("t{i}")
}

/// User id of student `i`.
#[must_use]
pub fn student_id(i: usize) -> String {
    format!("s{i}")
}

/// A signed-in pool with `teachers` teachers and `students` students.
///
/// # Panics
///
/// Panics when either count is zero.
#[must_use]
pub fn test_pool(teachers: usize, students: usize) -> Arc<AccountPool> {
    let pool = AccountPool::new(
        identity("admin", Role::Admin),
        (0..teachers)
            .map(|i| identity(&teacher_id(i), Role::Teacher))
            .collect(),
        (0..students)
            .map(|i| identity(&student_id(i), Role::Student))
            .collect(),
    )
    .expect("test pool needs at least one teacher and one student");
    Arc::new(pool)
}

/// Contents of an accounts file with the same naming as [`test_pool`].
#[must_use]
pub fn accounts_file(teachers: usize, students: usize) -> String {
    let login = |name: String| serde_json::json!({ "login": name, "password": "secret" });
    serde_json::json!({
        "admin": login("admin".to_string()),
        "teachers": (0..teachers).map(|i| login(teacher_id(i))).collect::<Vec<_>>(),
        "students": (0..students).map(|i| login(student_id(i))).collect::<Vec<_>>(),
    })
    .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use liveroom_load::accounts::AccountsFile;

    #[test]
    fn test_pool_sizes() {
        let pool = test_pool(2, 5);
        assert_eq!(pool.all(Role::Teacher).len(), 2);
        assert_eq!(pool.all(Role::Student).len(), 5);
        assert_eq!(pool.admin().id.as_str(), "admin");
    }

    #[test]
    fn test_accounts_file_parses() {
        let file: AccountsFile = serde_json::from_str(&accounts_file(2, 3)).unwrap();
        assert_eq!(file.teachers.len(), 2);
        assert_eq!(file.students[2].login, "s2");
    }
}
