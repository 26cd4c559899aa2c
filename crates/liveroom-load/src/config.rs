//! Load test configuration.
//!
//! Configuration is loaded from environment variables. Malformed values are
//! rejected rather than replaced by defaults.

use crate::accounts::AccountSelection;
use crate::runner::{PhaseDeadlines, WatchSettings};
use crate::watcher::WatcherLifetime;
use std::collections::HashMap;
use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

/// Default number of teachers per session.
pub const DEFAULT_NUM_TEACHERS: usize = 2;

/// Default number of students per session.
pub const DEFAULT_NUM_STUDENTS: usize = 10;

/// Default state poll interval in milliseconds.
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 5_000;

/// Default upper bound of the watcher start offset step in milliseconds.
pub const DEFAULT_POLL_JITTER_MS: u64 = 10;

/// Default per-RPC deadline in seconds.
pub const DEFAULT_RPC_TIMEOUT_SECONDS: u64 = 10;

pub const DEFAULT_BOOTSTRAP_TIMEOUT_SECONDS: u64 = 30;
pub const DEFAULT_ENTRY_TIMEOUT_SECONDS: u64 = 60;
pub const DEFAULT_CHOREOGRAPHY_TIMEOUT_SECONDS: u64 = 300;

/// Default number of latency histogram buckets.
pub const DEFAULT_HISTOGRAM_BUCKETS: usize = 5;

/// Load test configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Base URL of the session service.
    pub session_service_url: String,

    /// Base URL of the identity service.
    pub identity_service_url: String,

    /// JSON file with the admin, teacher and student logins.
    pub accounts_file: PathBuf,

    pub course_id: String,
    pub location_id: String,
    pub num_teachers: usize,
    pub num_students: usize,
    pub account_selection: AccountSelection,

    /// Number of runs.
    pub repeat: usize,

    /// Runs in flight at once (default: `repeat`). 1 runs sequentially.
    pub parallelism: usize,

    pub poll_interval: Duration,
    pub poll_jitter: Duration,
    pub watcher_lifetime: WatcherLifetime,

    /// Whether pacing waits end early on cancellation.
    pub abortable_pacing: bool,

    /// Multiplier applied to every pacing wait.
    pub pacing_scale: f64,

    pub rpc_timeout: Duration,
    pub bootstrap_timeout: Duration,
    pub entry_timeout: Duration,
    pub choreography_timeout: Duration,

    /// Cap on concurrent tasks within one fan-out (default: unbounded).
    pub max_in_flight: Option<usize>,

    pub histogram_buckets: usize,

    /// Where to write the aggregate report as JSON, if anywhere.
    pub report_path: Option<PathBuf>,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),
}

fn required(vars: &HashMap<String, String>, key: &str) -> Result<String, ConfigError> {
    vars.get(key)
        .filter(|v| !v.trim().is_empty())
        .cloned()
        .ok_or_else(|| ConfigError::MissingEnvVar(key.to_string()))
}

fn parsed<T: FromStr>(
    vars: &HashMap<String, String>,
    key: &str,
    default: T,
) -> Result<T, ConfigError> {
    match vars.get(key) {
        None => Ok(default),
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| ConfigError::InvalidValue(format!("{key}={raw}"))),
    }
}

fn positive(key: &str, value: usize) -> Result<usize, ConfigError> {
    if value == 0 {
        return Err(ConfigError::InvalidValue(format!("{key} must be positive")));
    }
    Ok(value)
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(&env::vars().collect())
    }

    /// Load configuration from a `HashMap` (for testing).
    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let session_service_url = required(vars, "SESSION_SERVICE_URL")?;
        let identity_service_url = required(vars, "IDENTITY_SERVICE_URL")?;
        let accounts_file = PathBuf::from(required(vars, "LOAD_ACCOUNTS_FILE")?);
        let course_id = required(vars, "LOAD_COURSE_ID")?;
        let location_id = required(vars, "LOAD_LOCATION_ID")?;

        let num_teachers = parsed(vars, "LOAD_NUM_TEACHERS", DEFAULT_NUM_TEACHERS)?;
        let num_students = parsed(vars, "LOAD_NUM_STUDENTS", DEFAULT_NUM_STUDENTS)?;

        let account_selection = match vars.get("LOAD_ACCOUNT_SELECTION").map(String::as_str) {
            None | Some("leading") => AccountSelection::Leading,
            Some("random") => AccountSelection::Random,
            Some(other) => {
                return Err(ConfigError::InvalidValue(format!(
                    "LOAD_ACCOUNT_SELECTION={other} (expected leading or random)"
                )))
            }
        };

        let repeat = positive("LOAD_REPEAT", parsed(vars, "LOAD_REPEAT", 1)?)?;
        let parallelism = positive("LOAD_PARALLELISM", parsed(vars, "LOAD_PARALLELISM", repeat)?)?;

        let poll_interval = Duration::from_millis(parsed(
            vars,
            "LOAD_POLL_INTERVAL_MS",
            DEFAULT_POLL_INTERVAL_MS,
        )?);
        if poll_interval.is_zero() {
            return Err(ConfigError::InvalidValue(
                "LOAD_POLL_INTERVAL_MS must be positive".to_string(),
            ));
        }
        let poll_jitter =
            Duration::from_millis(parsed(vars, "LOAD_POLL_JITTER_MS", DEFAULT_POLL_JITTER_MS)?);

        let watcher_lifetime = match vars.get("LOAD_WATCHER_LIFETIME").map(String::as_str) {
            None | Some("process") => WatcherLifetime::Process,
            Some("run") => WatcherLifetime::Run,
            Some(other) => {
                return Err(ConfigError::InvalidValue(format!(
                    "LOAD_WATCHER_LIFETIME={other} (expected process or run)"
                )))
            }
        };

        let abortable_pacing = parsed(vars, "LOAD_ABORTABLE_PACING", false)?;

        let pacing_scale: f64 = parsed(vars, "LOAD_PACING_SCALE", 1.0)?;
        if !pacing_scale.is_finite() || pacing_scale < 0.0 {
            return Err(ConfigError::InvalidValue(format!(
                "LOAD_PACING_SCALE={pacing_scale} (expected a non-negative number)"
            )));
        }

        let rpc_timeout = Duration::from_secs(parsed(
            vars,
            "LOAD_RPC_TIMEOUT_SECS",
            DEFAULT_RPC_TIMEOUT_SECONDS,
        )?);
        let bootstrap_timeout = Duration::from_secs(parsed(
            vars,
            "LOAD_BOOTSTRAP_TIMEOUT_SECS",
            DEFAULT_BOOTSTRAP_TIMEOUT_SECONDS,
        )?);
        let entry_timeout = Duration::from_secs(parsed(
            vars,
            "LOAD_ENTRY_TIMEOUT_SECS",
            DEFAULT_ENTRY_TIMEOUT_SECONDS,
        )?);
        let choreography_timeout = Duration::from_secs(parsed(
            vars,
            "LOAD_CHOREOGRAPHY_TIMEOUT_SECS",
            DEFAULT_CHOREOGRAPHY_TIMEOUT_SECONDS,
        )?);

        let max_in_flight = match vars.get("LOAD_MAX_IN_FLIGHT") {
            None => None,
            Some(_) => Some(positive(
                "LOAD_MAX_IN_FLIGHT",
                parsed(vars, "LOAD_MAX_IN_FLIGHT", 0)?,
            )?),
        };

        let histogram_buckets = positive(
            "LOAD_HISTOGRAM_BUCKETS",
            parsed(vars, "LOAD_HISTOGRAM_BUCKETS", DEFAULT_HISTOGRAM_BUCKETS)?,
        )?;

        let report_path = vars
            .get("LOAD_REPORT_PATH")
            .filter(|v| !v.trim().is_empty())
            .map(PathBuf::from);

        Ok(Config {
            session_service_url,
            identity_service_url,
            accounts_file,
            course_id,
            location_id,
            num_teachers,
            num_students,
            account_selection,
            repeat,
            parallelism,
            poll_interval,
            poll_jitter,
            watcher_lifetime,
            abortable_pacing,
            pacing_scale,
            rpc_timeout,
            bootstrap_timeout,
            entry_timeout,
            choreography_timeout,
            max_in_flight,
            histogram_buckets,
            report_path,
        })
    }

    pub fn deadlines(&self) -> PhaseDeadlines {
        PhaseDeadlines {
            bootstrap: self.bootstrap_timeout,
            entry: self.entry_timeout,
            choreography: self.choreography_timeout,
        }
    }

    pub fn watch_settings(&self) -> WatchSettings {
        WatchSettings {
            interval: self.poll_interval,
            jitter_step: self.poll_jitter,
            lifetime: self.watcher_lifetime,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn base_vars() -> HashMap<String, String> {
        HashMap::from([
            (
                "SESSION_SERVICE_URL".to_string(),
                "http://sessions.local".to_string(),
            ),
            (
                "IDENTITY_SERVICE_URL".to_string(),
                "http://identity.local".to_string(),
            ),
            (
                "LOAD_ACCOUNTS_FILE".to_string(),
                "/etc/load/accounts.json".to_string(),
            ),
            ("LOAD_COURSE_ID".to_string(), "course-1".to_string()),
            ("LOAD_LOCATION_ID".to_string(), "location-1".to_string()),
        ])
    }

    #[test]
    fn test_from_vars_success_with_defaults() {
        let config = Config::from_vars(&base_vars()).unwrap();

        assert_eq!(config.session_service_url, "http://sessions.local");
        assert_eq!(config.accounts_file, PathBuf::from("/etc/load/accounts.json"));
        assert_eq!(config.num_teachers, DEFAULT_NUM_TEACHERS);
        assert_eq!(config.num_students, DEFAULT_NUM_STUDENTS);
        assert_eq!(config.account_selection, AccountSelection::Leading);
        assert_eq!(config.repeat, 1);
        assert_eq!(config.parallelism, 1);
        assert_eq!(config.poll_interval, Duration::from_secs(5));
        assert_eq!(config.watcher_lifetime, WatcherLifetime::Process);
        assert!(!config.abortable_pacing);
        assert!((config.pacing_scale - 1.0).abs() < f64::EPSILON);
        assert_eq!(config.rpc_timeout, Duration::from_secs(10));
        assert_eq!(config.max_in_flight, None);
        assert_eq!(config.histogram_buckets, 5);
        assert!(config.report_path.is_none());
    }

    #[test]
    fn test_from_vars_success_with_custom_values() {
        let mut vars = base_vars();
        vars.insert("LOAD_NUM_STUDENTS".to_string(), "25".to_string());
        vars.insert("LOAD_ACCOUNT_SELECTION".to_string(), "random".to_string());
        vars.insert("LOAD_REPEAT".to_string(), "20".to_string());
        vars.insert("LOAD_WATCHER_LIFETIME".to_string(), "run".to_string());
        vars.insert("LOAD_ABORTABLE_PACING".to_string(), "true".to_string());
        vars.insert("LOAD_PACING_SCALE".to_string(), "0.1".to_string());
        vars.insert("LOAD_MAX_IN_FLIGHT".to_string(), "8".to_string());
        vars.insert("LOAD_REPORT_PATH".to_string(), "report.json".to_string());

        let config = Config::from_vars(&vars).unwrap();

        assert_eq!(config.num_students, 25);
        assert_eq!(config.account_selection, AccountSelection::Random);
        assert_eq!(config.repeat, 20);
        // Parallelism follows the repeat count unless set.
        assert_eq!(config.parallelism, 20);
        assert_eq!(config.watcher_lifetime, WatcherLifetime::Run);
        assert!(config.abortable_pacing);
        assert_eq!(config.max_in_flight, Some(8));
        assert_eq!(config.report_path, Some(PathBuf::from("report.json")));
        assert_eq!(config.watch_settings().lifetime, WatcherLifetime::Run);
        assert_eq!(config.deadlines().entry, Duration::from_secs(60));
    }

    #[test]
    fn test_from_vars_missing_session_url() {
        let mut vars = base_vars();
        vars.remove("SESSION_SERVICE_URL");

        let result = Config::from_vars(&vars);
        assert!(
            matches!(result, Err(ConfigError::MissingEnvVar(v)) if v == "SESSION_SERVICE_URL")
        );
    }

    #[test]
    fn test_from_vars_rejects_malformed_numbers() {
        for (key, value) in [
            ("LOAD_REPEAT", "ten"),
            ("LOAD_REPEAT", "0"),
            ("LOAD_PARALLELISM", "-1"),
            ("LOAD_POLL_INTERVAL_MS", "0"),
            ("LOAD_PACING_SCALE", "-2"),
            ("LOAD_PACING_SCALE", "NaN"),
            ("LOAD_MAX_IN_FLIGHT", "0"),
            ("LOAD_HISTOGRAM_BUCKETS", "0"),
            ("LOAD_ABORTABLE_PACING", "maybe"),
        ] {
            let mut vars = base_vars();
            vars.insert(key.to_string(), value.to_string());
            let result = Config::from_vars(&vars);
            assert!(
                matches!(result, Err(ConfigError::InvalidValue(_))),
                "{key}={value} should be rejected"
            );
        }
    }

    #[test]
    fn test_from_vars_rejects_unknown_modes() {
        let mut vars = base_vars();
        vars.insert("LOAD_WATCHER_LIFETIME".to_string(), "forever".to_string());
        assert!(matches!(
            Config::from_vars(&vars),
            Err(ConfigError::InvalidValue(_))
        ));
    }
}
