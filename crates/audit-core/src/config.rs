//! Run configuration
//!
//! Loaded from TOML or built in code; every field has a default.

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// What the supervisor does with a worker whose deadline elapsed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeoutAction {
    /// Stop waiting; leave the worker running
    #[default]
    Detach,
    /// Stop waiting and abort the worker task
    Abort,
}

/// What `start_run` does when the run id already exists
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RerunPolicy {
    /// Fail with a duplicate run error
    #[default]
    Reject,
    /// Archive a finished prior run and start over
    Archive,
}

/// Orchestration configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AuditConfig {
    /// Per-role deadline in milliseconds
    pub role_timeout_ms: u64,
    /// Run-wide deadline in milliseconds
    pub global_timeout_ms: u64,
    /// Ledger polling period in milliseconds
    pub poll_interval_ms: u64,
    /// Root directory for run workspaces; in-memory only when unset
    pub workspace_root: Option<PathBuf>,
    /// Deadline handling
    pub on_timeout: TimeoutAction,
    /// Duplicate run handling
    pub rerun_policy: RerunPolicy,
}

impl AuditConfig {
    /// Create default configuration
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse from TOML text and validate
    ///
    /// # Errors
    /// `ConfigError::Parse` or `ConfigError::Invalid`.
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Load from a TOML file
    ///
    /// # Errors
    /// `ConfigError::Read` if the file cannot be read, otherwise as
    /// [`AuditConfig::from_toml_str`].
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    /// Check value ranges
    ///
    /// # Errors
    /// `ConfigError::Invalid` describing the first bad value.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (name, value) in [
            ("role_timeout_ms", self.role_timeout_ms),
            ("global_timeout_ms", self.global_timeout_ms),
            ("poll_interval_ms", self.poll_interval_ms),
        ] {
            if value == 0 {
                return Err(ConfigError::Invalid(format!("{name} must be greater than zero")));
            }
        }
        if self.poll_interval_ms > self.global_timeout_ms {
            return Err(ConfigError::Invalid(
                "poll_interval_ms must not exceed global_timeout_ms".to_string(),
            ));
        }
        Ok(())
    }

    /// With per-role deadline
    #[inline]
    #[must_use]
    pub fn with_role_timeout(mut self, timeout: Duration) -> Self {
        self.role_timeout_ms = duration_ms(timeout);
        self
    }

    /// With run-wide deadline
    #[inline]
    #[must_use]
    pub fn with_global_timeout(mut self, timeout: Duration) -> Self {
        self.global_timeout_ms = duration_ms(timeout);
        self
    }

    /// With polling period
    #[inline]
    #[must_use]
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval_ms = duration_ms(interval);
        self
    }

    /// With on-disk workspace root
    #[inline]
    #[must_use]
    pub fn with_workspace_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.workspace_root = Some(root.into());
        self
    }

    /// With deadline handling
    #[inline]
    #[must_use]
    pub fn with_timeout_action(mut self, action: TimeoutAction) -> Self {
        self.on_timeout = action;
        self
    }

    /// With duplicate run handling
    #[inline]
    #[must_use]
    pub fn with_rerun_policy(mut self, policy: RerunPolicy) -> Self {
        self.rerun_policy = policy;
        self
    }

    /// Per-role deadline
    #[inline]
    #[must_use]
    pub fn role_timeout(&self) -> Duration {
        Duration::from_millis(self.role_timeout_ms)
    }

    /// Run-wide deadline
    #[inline]
    #[must_use]
    pub fn global_timeout(&self) -> Duration {
        Duration::from_millis(self.global_timeout_ms)
    }

    /// Polling period
    #[inline]
    #[must_use]
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            role_timeout_ms: 300_000,
            global_timeout_ms: 900_000,
            poll_interval_ms: 250,
            workspace_root: None,
            on_timeout: TimeoutAction::Detach,
            rerun_policy: RerunPolicy::Reject,
        }
    }
}

fn duration_ms(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_are_valid() {
        let config = AuditConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.role_timeout(), Duration::from_secs(300));
        assert_eq!(config.on_timeout, TimeoutAction::Detach);
        assert_eq!(config.rerun_policy, RerunPolicy::Reject);
    }

    #[test]
    fn partial_toml_keeps_defaults() {
        let config = AuditConfig::from_toml_str(
            r#"
            role_timeout_ms = 1500
            on_timeout = "abort"
            rerun_policy = "archive"
            "#,
        )
        .unwrap();
        assert_eq!(config.role_timeout_ms, 1500);
        assert_eq!(config.global_timeout_ms, 900_000);
        assert_eq!(config.on_timeout, TimeoutAction::Abort);
        assert_eq!(config.rerun_policy, RerunPolicy::Archive);
    }

    #[test]
    fn zero_timeout_is_rejected() {
        let err = AuditConfig::from_toml_str("global_timeout_ms = 0").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn poll_longer_than_deadline_is_rejected() {
        let config = AuditConfig::new()
            .with_global_timeout(Duration::from_millis(100))
            .with_poll_interval(Duration::from_millis(500));
        assert!(config.validate().is_err());
    }

    #[test]
    fn load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "poll_interval_ms = 20").unwrap();
        writeln!(file, "workspace_root = \"/tmp/audits\"").unwrap();

        let config = AuditConfig::load(file.path()).unwrap();
        assert_eq!(config.poll_interval(), Duration::from_millis(20));
        assert_eq!(config.workspace_root, Some(PathBuf::from("/tmp/audits")));
    }

    #[test]
    fn missing_file_reports_path() {
        let err = AuditConfig::load("/definitely/not/here.toml").unwrap_err();
        assert!(err.to_string().contains("/definitely/not/here.toml"));
    }
}
