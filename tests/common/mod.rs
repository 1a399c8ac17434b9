//! Common test utilities and fixtures
//!
//! Fixture paths and a `fanout` command isolated from the caller's environment

#![allow(dead_code)]

use std::path::PathBuf;

/// Environment variables that would leak the developer's settings into tests
const FANOUT_ENV: &[&str] = &[
    "FANOUT_CONFIG",
    "FANOUT_BACKEND",
    "FANOUT_MAX_IN_FLIGHT",
    "FANOUT_MAX_RETRIES",
    "FANOUT_TASK_TIMEOUT_SECS",
    "FANOUT_JOB_TIMEOUT_SECS",
    "FANOUT_PARTIAL_RESULTS",
    "FANOUT_LOG_LEVEL",
    "FANOUT_LOG_FILE",
    "FANOUT_LOG_JSON",
];

/// Get the path to the test fixtures directory
pub fn fixtures_dir() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("fixtures")
}

/// Get a path to a specific fixture file
pub fn fixture_path(name: &str) -> PathBuf {
    fixtures_dir().join(name)
}

/// Config with fast polling and the mock backend
pub fn valid_config_fixture() -> PathBuf {
    fixture_path("valid_config.toml")
}

/// Config that parses but fails validation
pub fn invalid_config_fixture() -> PathBuf {
    fixture_path("invalid_config.toml")
}

/// The fanout binary with every `FANOUT_*` override cleared
pub fn fanout_cmd() -> assert_cmd::Command {
    let mut cmd = assert_cmd::Command::cargo_bin("fanout").unwrap();
    for name in FANOUT_ENV {
        cmd.env_remove(name);
    }
    cmd
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixtures_dir_exists() {
        assert!(fixtures_dir().exists(), "Fixtures directory should exist");
    }

    #[test]
    fn test_valid_config_exists() {
        assert!(
            valid_config_fixture().exists(),
            "Valid config fixture should exist"
        );
    }

    #[test]
    fn test_invalid_config_exists() {
        assert!(
            invalid_config_fixture().exists(),
            "Invalid config fixture should exist"
        );
    }
}
