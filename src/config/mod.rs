use serde::{Deserialize, Serialize};
use std::env;
use std::path::Path;
use thiserror::Error;

/// Smallest memory cost the argon2 KDF accepts (8 KiB)
pub const MIN_PASSWORD_MEMORY_LIMIT_BYTES: u32 = 8 * 1024;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid configuration: {0}")]
    Invalid(String),

    #[error("failed to read configuration file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse configuration: {0}")]
    Parse(#[from] serde_yaml::Error),
}

/// Runtime options recognized by the toolkit.
///
/// Every field has a default, so partial YAML documents merge over
/// [`GateConfig::default`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GateConfig {
    // logging
    pub is_log_handled_errors: bool,

    // sessions
    pub crypto_token_length: usize,
    pub user_token_expires_in_minutes: u64,
    pub sliding_session_expiry: bool,
    pub serialize_session_updates: bool,

    // password hashing
    pub password_check_memory_limit_bytes: u32,
    pub password_check_operations_limit: u32,
    pub password_hash_worker_amount_minimum: usize,
    pub password_hash_worker_amount_maximum: usize,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            is_log_handled_errors: true,
            crypto_token_length: 256,
            user_token_expires_in_minutes: 30,
            sliding_session_expiry: true,
            serialize_session_updates: true,
            password_check_memory_limit_bytes: 64 * 1024 * 1024,
            password_check_operations_limit: 3,
            password_hash_worker_amount_minimum: 2,
            password_hash_worker_amount_maximum: default_worker_maximum(),
        }
    }
}

/// Half of the available cores, never less than one worker
fn default_worker_maximum() -> usize {
    let cores = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(2);
    (cores / 2).max(1)
}

impl GateConfig {
    pub fn from_env() -> Self {
        Self::default().with_env_overrides()
    }

    pub fn from_yaml_str(source: &str) -> Result<Self, ConfigError> {
        let config: GateConfig = serde_yaml::from_str(source)?;
        Ok(config)
    }

    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let source = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&source)
    }

    pub fn with_env_overrides(mut self) -> Self {
        // Logging overrides
        if let Ok(v) = env::var("GATEHOUSE_LOG_HANDLED_ERRORS") {
            self.is_log_handled_errors = v.parse().unwrap_or(self.is_log_handled_errors);
        }

        // Session overrides
        if let Ok(v) = env::var("GATEHOUSE_TOKEN_LENGTH") {
            self.crypto_token_length = v.parse().unwrap_or(self.crypto_token_length);
        }
        if let Ok(v) = env::var("GATEHOUSE_TOKEN_EXPIRES_IN_MINUTES") {
            self.user_token_expires_in_minutes = v.parse().unwrap_or(self.user_token_expires_in_minutes);
        }
        if let Ok(v) = env::var("GATEHOUSE_SLIDING_SESSION_EXPIRY") {
            self.sliding_session_expiry = v.parse().unwrap_or(self.sliding_session_expiry);
        }
        if let Ok(v) = env::var("GATEHOUSE_SERIALIZE_SESSION_UPDATES") {
            self.serialize_session_updates = v.parse().unwrap_or(self.serialize_session_updates);
        }

        // Password hashing overrides
        if let Ok(v) = env::var("GATEHOUSE_PASSWORD_MEMORY_LIMIT_BYTES") {
            self.password_check_memory_limit_bytes = v.parse().unwrap_or(self.password_check_memory_limit_bytes);
        }
        if let Ok(v) = env::var("GATEHOUSE_PASSWORD_OPERATIONS_LIMIT") {
            self.password_check_operations_limit = v.parse().unwrap_or(self.password_check_operations_limit);
        }
        if let Ok(v) = env::var("GATEHOUSE_HASH_WORKERS_MIN") {
            self.password_hash_worker_amount_minimum = v.parse().unwrap_or(self.password_hash_worker_amount_minimum);
        }
        if let Ok(v) = env::var("GATEHOUSE_HASH_WORKERS_MAX") {
            self.password_hash_worker_amount_maximum = v.parse().unwrap_or(self.password_hash_worker_amount_maximum);
        }

        self
    }

    /// Check that the configuration is complete and internally consistent
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.crypto_token_length == 0 {
            return Err(ConfigError::Invalid("crypto_token_length must be greater than 0".into()));
        }
        if self.user_token_expires_in_minutes == 0 {
            return Err(ConfigError::Invalid(
                "user_token_expires_in_minutes must be greater than 0".into(),
            ));
        }
        if self.password_check_operations_limit == 0 {
            return Err(ConfigError::Invalid(
                "password_check_operations_limit must be greater than 0".into(),
            ));
        }
        if self.password_check_memory_limit_bytes < MIN_PASSWORD_MEMORY_LIMIT_BYTES {
            return Err(ConfigError::Invalid(format!(
                "password_check_memory_limit_bytes must be at least {}",
                MIN_PASSWORD_MEMORY_LIMIT_BYTES
            )));
        }
        if self.password_hash_worker_amount_maximum == 0 {
            return Err(ConfigError::Invalid(
                "password_hash_worker_amount_maximum must be greater than 0".into(),
            ));
        }
        Ok(())
    }

    /// Worker floor actually used by the pool.
    ///
    /// The default maximum depends on the host, so a minimum above it is
    /// clamped rather than rejected.
    pub fn effective_worker_minimum(&self) -> usize {
        self.password_hash_worker_amount_minimum
            .min(self.password_hash_worker_amount_maximum)
    }

    /// Expiry passed on cache reads; `None` disables sliding expiration
    pub fn read_ttl_minutes(&self) -> Option<u64> {
        self.sliding_session_expiry
            .then_some(self.user_token_expires_in_minutes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = GateConfig::default();
        assert_eq!(config.crypto_token_length, 256);
        assert_eq!(config.user_token_expires_in_minutes, 30);
        assert_eq!(config.password_hash_worker_amount_minimum, 2);
        assert!(config.password_hash_worker_amount_maximum >= 1);
        assert!(config.is_log_handled_errors);
    }

    #[test]
    fn test_partial_yaml_merges_defaults() {
        let config = GateConfig::from_yaml_str(
            "user_token_expires_in_minutes: 5\npassword_hash_worker_amount_maximum: 4\n",
        )
        .unwrap();
        assert_eq!(config.user_token_expires_in_minutes, 5);
        assert_eq!(config.password_hash_worker_amount_maximum, 4);
        assert_eq!(config.crypto_token_length, 256);
        assert!(config.sliding_session_expiry);
    }

    #[test]
    fn test_worker_minimum_is_clamped_to_maximum() {
        let config = GateConfig {
            password_hash_worker_amount_minimum: 3,
            password_hash_worker_amount_maximum: 1,
            ..GateConfig::default()
        };
        assert!(config.validate().is_ok());
        assert_eq!(config.effective_worker_minimum(), 1);
    }

    #[test]
    fn test_validate_rejects_zero_workers() {
        let config = GateConfig {
            password_hash_worker_amount_maximum: 0,
            ..GateConfig::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_validate_rejects_tiny_memory_limit() {
        let config = GateConfig {
            password_check_memory_limit_bytes: 1024,
            ..GateConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_read_ttl_follows_sliding_flag() {
        let mut config = GateConfig::default();
        assert_eq!(config.read_ttl_minutes(), Some(30));
        config.sliding_session_expiry = false;
        assert_eq!(config.read_ttl_minutes(), None);
    }
}
