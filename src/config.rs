// Engine configuration loaded from the environment

//! # Engine Configuration
//!
//! Settings are read from `WAYPOINT_*` environment variables. The binary calls
//! `dotenv()` first, so a `.env` file in the working directory works too.
//!
//! | Variable                  | Values              | Default    |
//! |---------------------------|---------------------|------------|
//! | `WAYPOINT_MAX_PATH_DEPTH` | positive integer    | `64`       |
//! | `WAYPOINT_START_GUARDS`   | `defaults`/`reject` | `defaults` |
//! | `WAYPOINT_AUTO_FINISH`    | `true`/`false`      | `true`     |
//!
//! A value that does not parse is logged with `warn!` and replaced by the
//! default; configuration never aborts the engine.

use serde::{Deserialize, Serialize};
use tracing::warn;

pub const MAX_PATH_DEPTH_VAR: &str = "WAYPOINT_MAX_PATH_DEPTH";
pub const START_GUARDS_VAR: &str = "WAYPOINT_START_GUARDS";
pub const AUTO_FINISH_VAR: &str = "WAYPOINT_AUTO_FINISH";

/// How synchronous guards on a start path are evaluated before the process exists
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StartGuardPolicy {
    /// Evaluate against a provisional scope built from parameter defaults
    ParameterDefaults,
    /// Any synchronous transition on a start path fails validation
    Reject,
}

impl std::str::FromStr for StartGuardPolicy {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "defaults" | "parameter_defaults" => Ok(StartGuardPolicy::ParameterDefaults),
            "reject" => Ok(StartGuardPolicy::Reject),
            other => Err(format!("unknown start guard policy '{}'", other)),
        }
    }
}

/// Engine-wide settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Maximum number of gateways a decision path may cross
    pub max_path_depth: usize,
    pub start_guards: StartGuardPolicy,
    /// Replay decisions that only lead to end activities as soon as they validate
    pub auto_finish: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            max_path_depth: 64,
            start_guards: StartGuardPolicy::ParameterDefaults,
            auto_finish: true,
        }
    }
}

impl EngineConfig {
    /// Read the configuration from process environment variables
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read the configuration through an arbitrary key lookup
    ///
    /// ## Rust Learning Notes:
    ///
    /// ### Closures as Parameters
    /// Taking `impl Fn(&str) -> Option<String>` lets tests pass a closure over
    /// a `HashMap` instead of mutating the real process environment.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = EngineConfig::default();

        let max_path_depth = match lookup(MAX_PATH_DEPTH_VAR) {
            Some(raw) => match raw.trim().parse::<usize>() {
                Ok(depth) if depth > 0 => depth,
                _ => {
                    warn!(variable = MAX_PATH_DEPTH_VAR, value = %raw, "invalid value, using default");
                    defaults.max_path_depth
                }
            },
            None => defaults.max_path_depth,
        };

        let start_guards = match lookup(START_GUARDS_VAR) {
            Some(raw) => raw.parse().unwrap_or_else(|e: String| {
                warn!(variable = START_GUARDS_VAR, error = %e, "invalid value, using default");
                defaults.start_guards
            }),
            None => defaults.start_guards,
        };

        let auto_finish = match lookup(AUTO_FINISH_VAR) {
            Some(raw) => match raw.trim().to_ascii_lowercase().as_str() {
                "1" | "true" | "yes" | "on" => true,
                "0" | "false" | "no" | "off" => false,
                _ => {
                    warn!(variable = AUTO_FINISH_VAR, value = %raw, "invalid value, using default");
                    defaults.auto_finish
                }
            },
            None => defaults.auto_finish,
        };

        EngineConfig {
            max_path_depth,
            start_guards,
            auto_finish,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults_without_variables() {
        assert_eq!(EngineConfig::from_lookup(lookup(&[])), EngineConfig::default());
    }

    #[test]
    fn test_values_are_parsed() {
        let config = EngineConfig::from_lookup(lookup(&[
            (MAX_PATH_DEPTH_VAR, "8"),
            (START_GUARDS_VAR, "Reject"),
            (AUTO_FINISH_VAR, "off"),
        ]));
        assert_eq!(config.max_path_depth, 8);
        assert_eq!(config.start_guards, StartGuardPolicy::Reject);
        assert!(!config.auto_finish);
    }

    #[test]
    fn test_invalid_values_fall_back() {
        let config = EngineConfig::from_lookup(lookup(&[
            (MAX_PATH_DEPTH_VAR, "0"),
            (START_GUARDS_VAR, "sometimes"),
            (AUTO_FINISH_VAR, "maybe"),
        ]));
        assert_eq!(config, EngineConfig::default());
    }
}
