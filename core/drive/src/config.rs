//! Client configuration.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;

use photodrive_common::{Error, Result};

use crate::retry::{RetryConfig, RetryPolicy};

/// Google Drive API base URL.
pub const DRIVE_API_BASE: &str = "https://www.googleapis.com/drive/v3";
/// Google Drive upload API base URL.
pub const DRIVE_UPLOAD_BASE: &str = "https://www.googleapis.com/upload/drive/v3";
/// Application name used when none is configured.
pub const DEFAULT_APPLICATION_NAME: &str = "photodrive";

/// Configuration for a [`DriveClient`](crate::DriveClient).
///
/// Only `client_secret_path` is required in a config file; everything else
/// falls back to the Google endpoints and the default retry policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DriveConfig {
    /// Application name, also sent as the HTTP user agent.
    #[serde(default = "default_application_name")]
    pub application_name: String,
    /// Path to the OAuth2 client-secret JSON downloaded from Google Cloud Console.
    pub client_secret_path: PathBuf,
    /// Where OAuth2 tokens are cached between runs.
    #[serde(default)]
    pub token_cache_path: Option<PathBuf>,
    /// Drive metadata API base URL.
    #[serde(default = "default_api_base_url")]
    pub api_base_url: String,
    /// Drive upload API base URL.
    #[serde(default = "default_upload_base_url")]
    pub upload_base_url: String,
    /// Per-request timeout. No timeout when unset.
    #[serde(default)]
    pub request_timeout_secs: Option<u64>,
    /// Retry behaviour for batch uploads.
    #[serde(default)]
    pub retry: RetryConfig,
}

fn default_application_name() -> String {
    DEFAULT_APPLICATION_NAME.to_string()
}

fn default_api_base_url() -> String {
    DRIVE_API_BASE.to_string()
}

fn default_upload_base_url() -> String {
    DRIVE_UPLOAD_BASE.to_string()
}

impl DriveConfig {
    /// Create a configuration with defaults for everything but the secret file.
    pub fn new(application_name: impl Into<String>, client_secret_path: impl Into<PathBuf>) -> Self {
        Self {
            application_name: application_name.into(),
            client_secret_path: client_secret_path.into(),
            token_cache_path: None,
            api_base_url: default_api_base_url(),
            upload_base_url: default_upload_base_url(),
            request_timeout_secs: None,
            retry: RetryConfig::default(),
        }
    }

    /// Load configuration from a JSON file.
    ///
    /// # Errors
    /// - File cannot be read
    /// - File is not valid JSON for this structure
    /// - Values fail [`validate`](Self::validate)
    pub fn load(path: &Path) -> Result<Self> {
        let data = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&data).map_err(|e| {
            Error::Serialization(format!(
                "Invalid config file {}: {}",
                path.display(),
                e
            ))
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Check that the configuration is usable.
    pub fn validate(&self) -> Result<()> {
        if self.application_name.trim().is_empty() {
            return Err(Error::InvalidInput(
                "Application name cannot be empty".to_string(),
            ));
        }

        for (label, value) in [
            ("api_base_url", &self.api_base_url),
            ("upload_base_url", &self.upload_base_url),
        ] {
            Url::parse(value)
                .map_err(|e| Error::InvalidInput(format!("Invalid {}: {}", label, e)))?;
        }

        if self.retry.max_attempts == 0 {
            return Err(Error::InvalidInput(
                "retry.max_attempts must be at least 1".to_string(),
            ));
        }

        Ok(())
    }

    /// Token cache location, falling back to the user's config directory.
    pub fn token_cache_path(&self) -> PathBuf {
        self.token_cache_path.clone().unwrap_or_else(|| {
            dirs::config_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join(DEFAULT_APPLICATION_NAME)
                .join("token.json")
        })
    }

    /// Per-request timeout, if configured.
    pub fn request_timeout(&self) -> Option<Duration> {
        self.request_timeout_secs.map(Duration::from_secs)
    }

    /// Retry policy built from the `retry` section.
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::from(&self.retry)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_minimal_config_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"client_secret_path": "/etc/photodrive/secret.json"}}"#).unwrap();

        let config = DriveConfig::load(file.path()).unwrap();

        assert_eq!(config.application_name, "photodrive");
        assert_eq!(config.api_base_url, DRIVE_API_BASE);
        assert_eq!(config.upload_base_url, DRIVE_UPLOAD_BASE);
        assert_eq!(config.request_timeout(), None);
        assert_eq!(config.retry_policy().max_attempts(), 5);
    }

    #[test]
    fn test_full_config_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{
                "application_name": "Album Sync",
                "client_secret_path": "secret.json",
                "token_cache_path": "/tmp/tokens.json",
                "request_timeout_secs": 30,
                "retry": {{"max_attempts": 2}}
            }}"#
        )
        .unwrap();

        let config = DriveConfig::load(file.path()).unwrap();

        assert_eq!(config.application_name, "Album Sync");
        assert_eq!(config.token_cache_path(), PathBuf::from("/tmp/tokens.json"));
        assert_eq!(config.request_timeout(), Some(Duration::from_secs(30)));
        assert_eq!(config.retry_policy().max_attempts(), 2);
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let err = DriveConfig::load(Path::new("/nonexistent/photodrive.json")).unwrap_err();
        assert!(matches!(err, Error::Io(_)));
    }

    #[test]
    fn test_malformed_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "{{not json").unwrap();

        let err = DriveConfig::load(file.path()).unwrap_err();
        assert!(matches!(err, Error::Serialization(_)));
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = DriveConfig::new("app", "secret.json");
        assert!(config.validate().is_ok());

        config.api_base_url = "not a url".to_string();
        assert!(config.validate().is_err());

        let mut config = DriveConfig::new(" ", "secret.json");
        assert!(config.validate().is_err());

        config.application_name = "app".to_string();
        config.retry.max_attempts = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_default_token_cache_path() {
        let config = DriveConfig::new("app", "secret.json");
        assert!(config.token_cache_path().ends_with("photodrive/token.json"));
    }
}
