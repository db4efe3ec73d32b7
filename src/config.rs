//! Configuration loading via `ortho-config`.
//!
//! [`VolsnapConfig`] merges defaults, `volsnap.toml`, `VOLSNAP_*`
//! environment variables and CLI flags, then hands the backend its
//! string-keyed configuration map.

use std::ffi::OsString;
use std::time::Duration;

use camino::Utf8PathBuf;
use ortho_config::OrthoConfig;
use serde::Deserialize;
use thiserror::Error;

use crate::backend::BackendConfig;
use crate::cloud::{HttpSettings, PollPolicy};
use crate::ebs::{
    CONFIG_DEFAULT_KMS_KEY_ID, CONFIG_DEFAULT_VOLUME_SIZE, CONFIG_DEFAULT_VOLUME_TYPE,
    DEFAULT_VOLUME_SIZE,
};

/// Directory holding backend metadata when none is configured.
pub const DEFAULT_ROOT: &str = "/var/lib/volsnap";
/// Instance metadata service used when none is configured.
pub const DEFAULT_METADATA_ENDPOINT: &str = "http://169.254.169.254/latest";

/// Orchestrator configuration derived from environment variables,
/// configuration files, and CLI flags.
#[derive(Clone, Debug, Deserialize, OrthoConfig, PartialEq, Eq)]
#[ortho_config(
    prefix = "VOLSNAP",
    discovery(
        app_name = "volsnap",
        env_var = "VOLSNAP_CONFIG_PATH",
        config_file_name = "volsnap.toml",
        dotfile_name = ".volsnap.toml",
        project_file_name = "volsnap.toml"
    )
)]
pub struct VolsnapConfig {
    /// Directory under which each backend keeps its metadata.
    #[ortho_config(default = DEFAULT_ROOT.to_owned())]
    pub root: String,
    /// Base URL of the block-storage control plane. Required.
    pub endpoint: Option<String>,
    /// Base URL of the instance metadata service.
    #[ortho_config(default = DEFAULT_METADATA_ENDPOINT.to_owned())]
    pub metadata_endpoint: String,
    /// Region override; otherwise derived from the instance's zone.
    pub region: Option<String>,
    /// Bearer token for control-plane calls.
    pub token: Option<String>,
    /// Size of volumes created without an explicit size (for example `4G`).
    #[ortho_config(default = DEFAULT_VOLUME_SIZE.to_owned())]
    pub default_volume_size: String,
    /// Type of volumes created without an explicit type.
    #[ortho_config(default = "gp2".to_owned())]
    pub default_volume_type: String,
    /// Encryption key applied to fresh volumes.
    pub default_kms_key_id: Option<String>,
    /// Seconds between state checks while waiting on the provider.
    #[ortho_config(default = 5)]
    pub poll_interval_secs: u64,
    /// Upper bound in seconds on a single wait; unbounded when unset.
    pub poll_timeout_secs: Option<u64>,
    /// Default `tracing` filter when `RUST_LOG` is unset.
    #[ortho_config(default = "info".to_owned())]
    pub log_level: String,
}

/// Errors raised during configuration loading and validation.
#[derive(Debug, Error, Eq, PartialEq)]
pub enum ConfigError {
    /// Indicates a required configuration field is empty or missing.
    #[error("missing configuration field: {0}")]
    MissingField(String),
    /// Surfaces errors from the `ortho-config` loader.
    #[error("configuration parsing failed: {0}")]
    Parse(String),
}

fn require_field(value: Option<&str>, field: &str, description: &str) -> Result<(), ConfigError> {
    match value {
        Some(text) if !text.trim().is_empty() => Ok(()),
        _ => Err(ConfigError::MissingField(format!(
            "missing {description}: set VOLSNAP_{} or add {field} to volsnap.toml",
            field.to_uppercase()
        ))),
    }
}

fn non_empty(value: Option<&String>) -> Option<String> {
    value
        .map(|text| text.trim())
        .filter(|text| !text.is_empty())
        .map(str::to_owned)
}

impl VolsnapConfig {
    /// Loads configuration using the `ortho-config` derive. Values merge
    /// defaults, configuration files, environment variables, and CLI flags in
    /// that order of precedence.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] when the loader fails to merge sources.
    pub fn load_from_sources() -> Result<Self, ConfigError> {
        Self::load().map_err(|err| ConfigError::Parse(err.to_string()))
    }

    /// Loads configuration without attempting to parse CLI arguments. Values
    /// still merge defaults, configuration files, and environment variables.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] when the merge fails.
    pub fn load_without_cli_args() -> Result<Self, ConfigError> {
        Self::load_from_iter([OsString::from("volsnap")])
            .map_err(|err| ConfigError::Parse(err.to_string()))
    }

    /// Checks the fields needed to reach the provider.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingField`] naming the environment variable
    /// and file key that supply the value.
    pub fn validate(&self) -> Result<(), ConfigError> {
        require_field(self.endpoint.as_deref(), "endpoint", "control-plane endpoint")?;
        require_field(
            Some(self.metadata_endpoint.as_str()),
            "metadata_endpoint",
            "metadata service endpoint",
        )?;
        require_field(Some(self.root.as_str()), "root", "metadata root directory")?;
        Ok(())
    }

    /// Root directory for backend metadata.
    #[must_use]
    pub fn root(&self) -> Utf8PathBuf {
        Utf8PathBuf::from(&self.root)
    }

    /// The string-keyed configuration map handed to the backend.
    #[must_use]
    pub fn backend_config(&self) -> BackendConfig {
        let mut config = BackendConfig::from([
            (
                CONFIG_DEFAULT_VOLUME_SIZE.to_owned(),
                self.default_volume_size.clone(),
            ),
            (
                CONFIG_DEFAULT_VOLUME_TYPE.to_owned(),
                self.default_volume_type.clone(),
            ),
        ]);
        if let Some(key) = non_empty(self.default_kms_key_id.as_ref()) {
            config.insert(CONFIG_DEFAULT_KMS_KEY_ID.to_owned(), key);
        }
        config
    }

    /// Connection settings for the HTTP control plane.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingField`] when no endpoint is configured.
    pub fn http_settings(&self) -> Result<HttpSettings, ConfigError> {
        self.validate()?;
        Ok(HttpSettings {
            endpoint: non_empty(self.endpoint.as_ref()).unwrap_or_default(),
            metadata_endpoint: self.metadata_endpoint.trim().to_owned(),
            region: non_empty(self.region.as_ref()),
            token: non_empty(self.token.as_ref()),
        })
    }

    /// Polling behaviour for provider state waits.
    #[must_use]
    pub fn poll_policy(&self) -> PollPolicy {
        PollPolicy {
            interval: Duration::from_secs(self.poll_interval_secs),
            timeout: self.poll_timeout_secs.map(Duration::from_secs),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::EnvGuard;
    use rstest::{fixture, rstest};

    #[fixture]
    fn config() -> VolsnapConfig {
        VolsnapConfig {
            root: String::from("/srv/volsnap"),
            endpoint: Some(String::from("http://storage.test")),
            metadata_endpoint: String::from(DEFAULT_METADATA_ENDPOINT),
            region: None,
            token: None,
            default_volume_size: String::from("4G"),
            default_volume_type: String::from("gp2"),
            default_kms_key_id: None,
            poll_interval_secs: 5,
            poll_timeout_secs: None,
            log_level: String::from("info"),
        }
    }

    #[rstest]
    fn validate_requires_endpoint_with_actionable_message(config: VolsnapConfig) {
        for endpoint in [None, Some(String::from("  "))] {
            let cfg = VolsnapConfig {
                endpoint,
                ..config.clone()
            };
            let Err(ConfigError::MissingField(message)) = cfg.validate() else {
                panic!("endpoint should be required");
            };
            assert!(message.contains("VOLSNAP_ENDPOINT"), "message: {message}");
            assert!(message.contains("volsnap.toml"), "message: {message}");
        }
    }

    #[rstest]
    fn backend_config_carries_defaults_and_optional_key(config: VolsnapConfig) {
        let without_key = config.backend_config();
        assert_eq!(
            without_key.get(CONFIG_DEFAULT_VOLUME_SIZE).map(String::as_str),
            Some("4G")
        );
        assert!(!without_key.contains_key(CONFIG_DEFAULT_KMS_KEY_ID));

        let with_key = VolsnapConfig {
            default_kms_key_id: Some(String::from("key-1")),
            ..config
        }
        .backend_config();
        assert_eq!(
            with_key.get(CONFIG_DEFAULT_KMS_KEY_ID).map(String::as_str),
            Some("key-1")
        );
    }

    #[rstest]
    fn poll_policy_is_unbounded_unless_configured(config: VolsnapConfig) {
        assert_eq!(config.poll_policy().timeout, None);
        let bounded = VolsnapConfig {
            poll_timeout_secs: Some(60),
            ..config
        };
        assert_eq!(
            bounded.poll_policy().timeout,
            Some(Duration::from_secs(60))
        );
    }

    #[rstest]
    fn http_settings_drop_blank_optionals(config: VolsnapConfig) {
        let settings = VolsnapConfig {
            region: Some(String::new()),
            token: Some(String::from("secret")),
            ..config
        }
        .http_settings()
        .expect("endpoint is configured");
        assert_eq!(settings.endpoint, "http://storage.test");
        assert_eq!(settings.region, None);
        assert_eq!(settings.token.as_deref(), Some("secret"));
    }

    #[tokio::test]
    async fn environment_overrides_defaults() {
        let _guard = EnvGuard::set_vars(&[
            ("VOLSNAP_ENDPOINT", "http://env.test"),
            ("VOLSNAP_DEFAULT_VOLUME_SIZE", "10G"),
        ])
        .await;

        let cfg = VolsnapConfig::load_without_cli_args().expect("environment should load");

        assert_eq!(cfg.endpoint.as_deref(), Some("http://env.test"));
        assert_eq!(cfg.default_volume_size, "10G");
        assert_eq!(cfg.default_volume_type, "gp2");
        assert_eq!(cfg.root, DEFAULT_ROOT);
    }

    #[tokio::test]
    async fn malformed_environment_value_is_a_parse_error() {
        let _guard = EnvGuard::set_vars(&[
            ("VOLSNAP_ENDPOINT", "http://env.test"),
            ("VOLSNAP_POLL_INTERVAL_SECS", "soon"),
        ])
        .await;

        let Err(err) = VolsnapConfig::load_without_cli_args() else {
            panic!("a non-numeric interval should not load");
        };
        assert!(matches!(err, ConfigError::Parse(_)), "{err:?}");
    }
}
