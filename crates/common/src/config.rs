//! Observability configuration shared by the harness binaries.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Default log level when neither `RUST_LOG` nor `LOG_LEVEL` is set.
pub const DEFAULT_LOG_LEVEL: &str = "info";

/// Observability configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,
    /// Enable JSON-formatted logs
    pub json_logs: bool,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: DEFAULT_LOG_LEVEL.to_string(),
            json_logs: false,
        }
    }
}

impl ObservabilityConfig {
    /// Read `LOG_LEVEL` and `LOG_JSON` from a variable map.
    ///
    /// `LOG_JSON` accepts `true`/`1`; anything else means plain text.
    #[must_use]
    pub fn from_vars(vars: &HashMap<String, String>) -> Self {
        let log_level = vars
            .get("LOG_LEVEL")
            .cloned()
            .unwrap_or_else(|| DEFAULT_LOG_LEVEL.to_string());

        let json_logs = vars
            .get("LOG_JSON")
            .is_some_and(|v| v.eq_ignore_ascii_case("true") || v == "1");

        Self {
            log_level,
            json_logs,
        }
    }

    /// Filter directive applied to the given crate target.
    #[must_use]
    pub fn directive(&self, target: &str) -> String {
        format!("{target}={}", self.log_level)
    }

    /// Install the global tracing subscriber.
    ///
    /// `RUST_LOG` wins over the configured level when present.
    pub fn init_tracing(&self, target: &str) {
        let filter = tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| self.directive(target).into());

        if self.json_logs {
            tracing_subscriber::registry()
                .with(filter)
                .with(tracing_subscriber::fmt::layer().json())
                .init();
        } else {
            tracing_subscriber::registry()
                .with(filter)
                .with(tracing_subscriber::fmt::layer())
                .init();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_when_unset() {
        let config = ObservabilityConfig::from_vars(&HashMap::new());
        assert_eq!(config, ObservabilityConfig::default());
    }

    #[test]
    fn test_reads_level_and_json_flag() {
        let vars: HashMap<String, String> = [
            ("LOG_LEVEL".to_string(), "debug".to_string()),
            ("LOG_JSON".to_string(), "TRUE".to_string()),
        ]
        .into_iter()
        .collect();

        let config = ObservabilityConfig::from_vars(&vars);
        assert_eq!(config.log_level, "debug");
        assert!(config.json_logs);
        assert_eq!(config.directive("liveroom_load"), "liveroom_load=debug");
    }
}
