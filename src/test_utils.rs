//! Test utilities for gclid-export
//!
//! Temporary directories, test files, a valid baseline config and an
//! assertion helper for anyhow-wrapped errors.

use crate::config::Config;
use std::path::PathBuf;
use tempfile::TempDir;

/// Create a temporary directory for testing
pub fn temp_dir() -> TempDir {
    TempDir::new().expect("Failed to create temporary directory")
}

/// Create a test file with the given content
///
/// # Panics
///
/// Panics if file creation or writing fails
pub fn create_test_file(dir: &TempDir, name: &str, content: &str) -> PathBuf {
    let path = dir.path().join(name);
    std::fs::write(&path, content).expect("Failed to write test file");
    path
}

/// Assert that an error contains the expected message
///
/// # Panics
///
/// Panics if the result is Ok or the message doesn't match
pub fn assert_error_contains<T>(result: anyhow::Result<T>, expected: &str) {
    match result {
        Ok(_) => panic!("Expected error containing '{}', got Ok", expected),
        Err(e) => {
            let message = format!("{:#}", e);
            assert!(
                message.contains(expected),
                "Expected error containing '{}', got '{}'",
                expected,
                message
            );
        }
    }
}

/// A configuration that passes validation, pointed at the given URLs
/// with its state stored in `dir`.
pub fn test_config(posthog_host: &str, webhook_url: &str, dir: &TempDir) -> Config {
    let mut config = Config::default();
    config.posthog.host = posthog_host.to_string();
    config.posthog.personal_api_key = Some("phx_test".to_string());
    config.webhook.url = Some(webhook_url.to_string());
    config.export.action_map = Some("12:Signup".to_string());
    config.export.state_path = Some(dir.path().join("state"));
    config.export.retry_backoff_ms = 0;
    config
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_temp_dir_creation() {
        let dir = temp_dir();
        assert!(dir.path().exists());
    }

    #[test]
    fn test_create_test_file() {
        let dir = temp_dir();
        let path = create_test_file(&dir, "actions.json", "[]");
        assert_eq!(std::fs::read_to_string(path).unwrap(), "[]");
    }

    #[test]
    fn test_config_is_valid() {
        let dir = temp_dir();
        let config = test_config("http://localhost:8000", "http://localhost:9000/hook", &dir);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_assert_error_contains() {
        let result: anyhow::Result<()> = Err(anyhow::anyhow!("webhook.url is required"));
        assert_error_contains(result, "webhook.url");
    }
}
