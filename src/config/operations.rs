//! Config loading, validation, and path resolution.

use super::model::Config;
use crate::error::{QmasterError, Result};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Config file used when `--config` is not given and the file exists.
pub const DEFAULT_CONFIG_PATH: &str = "/etc/qmaster.yaml";

/// Longest accepted lock lifetime: ten years.
pub const MAX_LOCK_LIFETIME_SECS: u64 = 10 * 365 * 24 * 60 * 60;

/// Longest accepted wait for the master lock: one day.
pub const MAX_LOCK_TIMEOUT_MS: u64 = 24 * 60 * 60 * 1000;

impl Config {
    /// Load config from a YAML file.
    ///
    /// Unknown fields in the YAML are silently ignored for forward compatibility.
    ///
    /// # Returns
    ///
    /// * `Ok(Config)` - Successfully loaded and validated config
    /// * `Err(QmasterError::Config)` - Read error, parse error, or validation failure
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        let content = std::fs::read_to_string(path).map_err(|e| {
            QmasterError::Config(format!(
                "failed to read config file '{}': {}",
                path.display(),
                e
            ))
        })?;

        Self::from_yaml(&content)
    }

    /// Load the config named on the command line, the default file, or defaults.
    pub fn resolve(explicit: Option<&Path>) -> Result<Self> {
        match explicit {
            Some(path) => Self::load(path),
            None if Path::new(DEFAULT_CONFIG_PATH).exists() => Self::load(DEFAULT_CONFIG_PATH),
            None => {
                let config = Self::default();
                config.validate()?;
                Ok(config)
            }
        }
    }

    /// Parse config from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: Config = serde_yaml::from_str(yaml)
            .map_err(|e| QmasterError::Config(format!("failed to parse config YAML: {}", e)))?;

        config.validate()?;
        Ok(config)
    }

    /// Validate config values and return error on invalid values.
    ///
    /// Validation rules:
    /// - the prefix is an absolute path
    /// - runner names are non-empty and contain no `:` or whitespace
    /// - runner counts are positive
    /// - the runner command parses and is non-empty
    /// - the refresh interval is positive and shorter than the lock lifetime
    /// - the lock lifetime and lock timeout stay within their maximums
    pub fn validate(&self) -> Result<()> {
        if !self.prefix.is_absolute() {
            return Err(QmasterError::Config(format!(
                "config validation failed: prefix '{}' must be an absolute path",
                self.prefix.display()
            )));
        }

        for runner in &self.runners {
            if runner.name.is_empty() {
                return Err(QmasterError::Config(
                    "config validation failed: runner names must be non-empty".to_string(),
                ));
            }
            if runner.name.contains(':') || runner.name.contains(char::is_whitespace) {
                return Err(QmasterError::Config(format!(
                    "config validation failed: runner name '{}' must not contain ':' or whitespace",
                    runner.name
                )));
            }
            if runner.count == 0 {
                return Err(QmasterError::Config(format!(
                    "config validation failed: runner '{}' count must be greater than 0",
                    runner.name
                )));
            }
        }

        self.runner_argv()?;

        if self.lock_refresh_secs == 0 {
            return Err(QmasterError::Config(
                "config validation failed: lock_refresh_secs must be greater than 0".to_string(),
            ));
        }

        if self.lock_refresh_secs >= self.lock_lifetime_secs {
            return Err(QmasterError::Config(format!(
                "config validation failed: lock_refresh_secs ({}) must be less than \
                 lock_lifetime_secs ({})",
                self.lock_refresh_secs, self.lock_lifetime_secs
            )));
        }

        if self.lock_lifetime_secs > MAX_LOCK_LIFETIME_SECS {
            return Err(QmasterError::Config(format!(
                "config validation failed: lock_lifetime_secs ({}) must not exceed {}",
                self.lock_lifetime_secs, MAX_LOCK_LIFETIME_SECS
            )));
        }

        if self.lock_timeout_ms > MAX_LOCK_TIMEOUT_MS {
            return Err(QmasterError::Config(format!(
                "config validation failed: lock_timeout_ms ({}) must not exceed {}",
                self.lock_timeout_ms, MAX_LOCK_TIMEOUT_MS
            )));
        }

        Ok(())
    }

    /// Split `runner_command` into program and arguments.
    ///
    /// A relative program path is resolved against `prefix`.
    pub fn runner_argv(&self) -> Result<Vec<String>> {
        let mut argv = shell_words::split(&self.runner_command).map_err(|e| {
            QmasterError::Config(format!(
                "failed to parse runner_command '{}': {}\n\
                 Fix: check for unmatched quotes or invalid escape sequences.",
                self.runner_command, e
            ))
        })?;

        let Some(program) = argv.first_mut() else {
            return Err(QmasterError::Config(
                "config validation failed: runner_command must not be empty".to_string(),
            ));
        };

        if program.contains('/') {
            let resolved = self.resolve_path(program.as_str()).to_string_lossy().to_string();
            *program = resolved;
        }

        Ok(argv)
    }

    /// Resolve a possibly relative path against the installation prefix.
    pub fn resolve_path<P: AsRef<Path>>(&self, path: P) -> PathBuf {
        let path = path.as_ref();
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.prefix.join(path)
        }
    }

    pub fn lock_path(&self) -> PathBuf {
        self.resolve_path(&self.lock_file)
    }

    pub fn pid_path(&self) -> PathBuf {
        self.resolve_path(&self.pid_file)
    }

    pub fn log_path(&self) -> PathBuf {
        self.resolve_path(&self.log_file)
    }

    pub fn lock_lifetime(&self) -> Duration {
        Duration::from_secs(self.lock_lifetime_secs)
    }

    pub fn lock_refresh(&self) -> Duration {
        Duration::from_secs(self.lock_refresh_secs)
    }

    pub fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_timeout_ms)
    }
}
