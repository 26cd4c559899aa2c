//! Secret types for credentials handled by the load harness.
//!
//! Account passwords, identity credentials and session-scoped bearer tokens
//! all pass through the harness. They are wrapped in [`SecretString`] so that
//! `Debug` output and tracing fields redact them; reading the value requires an
//! explicit `expose_secret()` at the point of use (an HTTP header, a request
//! body).
//!
//! # Example
//!
//! ```rust
//! use common::secret::{ExposeSecret, SecretString};
//!
//! #[derive(Debug)]
//! struct Login {
//!     login: String,
//!     password: SecretString,
//! }
//!
//! let login = Login {
//!     login: "teacher-01@example.test".to_string(),
//!     password: SecretString::from("hunter2"),
//! };
//!
//! assert!(!format!("{login:?}").contains("hunter2"));
//! assert_eq!(login.password.expose_secret(), "hunter2");
//! ```

pub use secrecy::{ExposeSecret, SecretString};

/// Format a bearer authorization header value for a secret token.
#[must_use]
pub fn bearer(token: &SecretString) -> String {
    format!("Bearer {}", token.expose_secret())
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[test]
    fn test_debug_is_redacted() {
        let secret = SecretString::from("session-token-abc");
        let debug_str = format!("{secret:?}");

        assert!(debug_str.contains("REDACTED"));
        assert!(!debug_str.contains("session-token-abc"));
    }

    #[test]
    fn test_bearer_header() {
        let token = SecretString::from("abc.def.ghi");
        assert_eq!(bearer(&token), "Bearer abc.def.ghi");
    }

    #[test]
    fn test_deserialized_password_stays_redacted() {
        #[allow(dead_code)]
        #[derive(Debug, Deserialize)]
        struct AccountRecord {
            login: String,
            password: SecretString,
        }

        let json = r#"{"login": "student-03", "password": "correct-horse"}"#;
        let record: AccountRecord = serde_json::from_str(json).expect("deserialize");

        assert_eq!(record.password.expose_secret(), "correct-horse");
        let debug = format!("{record:?}");
        assert!(debug.contains("student-03"));
        assert!(!debug.contains("correct-horse"));
    }
}
