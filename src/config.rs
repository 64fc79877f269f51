//! Configuration management for pubgate.
//!
//! Settings come from an optional YAML file overlaid with `PUBGATE__*`
//! environment variables, e.g. `PUBGATE__SERVER__GRPC_ADDR=0.0.0.0:8081`.

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use crate::error::{PubgateError, Result};
use crate::ratelimit::{Consistency, FailurePolicy, LimiterOptions, RateLimitPolicies};

/// Salt used when none is configured. Fine for development only.
pub const DEV_IDENTITY_SALT: &str = "pubgate-dev-salt";

const ENV_PREFIX: &str = "PUBGATE";
const ENV_SEPARATOR: &str = "__";

/// Main configuration for the pubgate service.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PubgateConfig {
    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Counter store configuration
    #[serde(default)]
    pub store: StoreConfig,

    /// Rate limiting configuration
    #[serde(default)]
    pub rate_limiting: RateLimitingConfig,

    /// Anonymous identity derivation
    #[serde(default)]
    pub identity: IdentityConfig,
}

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// gRPC server address
    #[serde(default = "default_grpc_addr")]
    pub grpc_addr: SocketAddr,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            grpc_addr: default_grpc_addr(),
        }
    }
}

fn default_grpc_addr() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 8081))
}

/// Which store keeps the counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    /// Process-local, lost on restart
    Memory,
    /// SQLite file shared by every process that opens it
    #[default]
    Sqlite,
}

/// Counter store configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default)]
    pub backend: StoreBackend,

    /// Database file for the sqlite backend
    #[serde(default = "default_sqlite_path")]
    pub sqlite_path: PathBuf,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::default(),
            sqlite_path: default_sqlite_path(),
        }
    }
}

fn default_sqlite_path() -> PathBuf {
    PathBuf::from("pubgate-ratelimit.db")
}

/// Rate limiting configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitingConfig {
    /// YAML file of action policies, merged over the built-in table
    #[serde(default)]
    pub policies_path: Option<PathBuf>,

    /// Conditional writes or plain upserts
    #[serde(default)]
    pub consistency: Consistency,

    /// Admit or reject when the store is unreachable
    #[serde(default)]
    pub failure_policy: FailurePolicy,

    /// How often dead windows are swept
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,

    /// Age after which a window's record may be deleted
    #[serde(default = "default_retention")]
    pub retention_secs: u64,
}

impl Default for RateLimitingConfig {
    fn default() -> Self {
        Self {
            policies_path: None,
            consistency: Consistency::default(),
            failure_policy: FailurePolicy::default(),
            sweep_interval_secs: default_sweep_interval(),
            retention_secs: default_retention(),
        }
    }
}

fn default_sweep_interval() -> u64 {
    300
}

fn default_retention() -> u64 {
    2 * 86400
}

impl RateLimitingConfig {
    pub fn limiter_options(&self) -> LimiterOptions {
        LimiterOptions {
            consistency: self.consistency,
            failure_policy: self.failure_policy,
        }
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }

    pub fn retention(&self) -> Duration {
        Duration::from_secs(self.retention_secs)
    }
}

/// Anonymous identity configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdentityConfig {
    /// Salt mixed into hashed identities
    #[serde(default = "default_salt")]
    pub salt: String,
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            salt: default_salt(),
        }
    }
}

fn default_salt() -> String {
    DEV_IDENTITY_SALT.to_string()
}

impl PubgateConfig {
    /// Load configuration from an optional YAML file and the environment.
    pub fn load(path: Option<&str>) -> Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::new(path, config::FileFormat::Yaml));
        }
        builder = builder.add_source(
            config::Environment::with_prefix(ENV_PREFIX)
                .prefix_separator(ENV_SEPARATOR)
                .separator(ENV_SEPARATOR)
                .try_parsing(true),
        );

        let config: PubgateConfig = builder.build()?.try_deserialize()?;
        Ok(config)
    }

    /// Load configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml).map_err(|e| PubgateError::Config(e.to_string()))
    }

    /// Built-in policies, overridden by the policy file if one is configured.
    pub fn policies(&self) -> Result<RateLimitPolicies> {
        let builtin = RateLimitPolicies::builtin();
        match &self.rate_limiting.policies_path {
            Some(path) => Ok(builtin.merge(RateLimitPolicies::from_file(path)?)),
            None => Ok(builtin),
        }
    }

    /// Check settings that serde cannot.
    pub fn validate(&self, policies: &RateLimitPolicies) -> Result<()> {
        if self.rate_limiting.sweep_interval_secs == 0 {
            return Err(PubgateError::Config(
                "rate_limiting.sweep_interval_secs must be positive".into(),
            ));
        }

        if self.rate_limiting.retention_secs.checked_mul(1000).is_none() {
            return Err(PubgateError::Config(format!(
                "rate_limiting.retention_secs ({}) is too large",
                self.rate_limiting.retention_secs
            )));
        }

        let longest = policies.longest_window_secs();
        if self.rate_limiting.retention_secs < longest {
            return Err(PubgateError::Config(format!(
                "rate_limiting.retention_secs ({}) is shorter than the longest window ({}s)",
                self.rate_limiting.retention_secs, longest
            )));
        }

        if self.identity.salt.is_empty() {
            return Err(PubgateError::Config("identity.salt must not be empty".into()));
        }

        if self.store.backend == StoreBackend::Sqlite
            && self.store.sqlite_path.as_os_str().is_empty()
        {
            return Err(PubgateError::Config(
                "store.sqlite_path is required for the sqlite backend".into(),
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = PubgateConfig::default();
        assert_eq!(config.server.grpc_addr, "127.0.0.1:8081".parse::<SocketAddr>().unwrap());
        assert_eq!(config.store.backend, StoreBackend::Sqlite);
        assert_eq!(config.rate_limiting.limiter_options(), LimiterOptions::default());
        assert_eq!(config.rate_limiting.retention(), Duration::from_secs(172_800));

        let policies = config.policies().unwrap();
        assert!(config.validate(&policies).is_ok());
    }

    #[test]
    fn test_parse_yaml() {
        let yaml = r#"
server:
  grpc_addr: 0.0.0.0:9000
store:
  backend: memory
rate_limiting:
  consistency: read_upsert
  failure_policy: closed
  sweep_interval_secs: 60
identity:
  salt: s3cret
"#;
        let config = PubgateConfig::from_yaml(yaml).unwrap();
        assert_eq!(config.server.grpc_addr.port(), 9000);
        assert_eq!(config.store.backend, StoreBackend::Memory);
        assert_eq!(config.rate_limiting.consistency, Consistency::ReadUpsert);
        assert_eq!(config.rate_limiting.failure_policy, FailurePolicy::Closed);
        assert_eq!(config.rate_limiting.sweep_interval_secs, 60);
        assert_eq!(config.rate_limiting.retention_secs, 172_800);
        assert_eq!(config.identity.salt, "s3cret");
    }

    #[test]
    fn test_load_without_file_uses_defaults() {
        let config = PubgateConfig::load(None).unwrap();
        assert_eq!(config.rate_limiting.sweep_interval_secs, 300);
    }

    #[test]
    fn test_retention_shorter_than_window_rejected() {
        let mut config = PubgateConfig::default();
        config.rate_limiting.retention_secs = 3600;

        let policies = RateLimitPolicies::builtin();
        assert!(matches!(
            config.validate(&policies),
            Err(PubgateError::Config(_))
        ));
    }

    #[test]
    fn test_oversized_retention_rejected() {
        let mut config = PubgateConfig::default();
        config.rate_limiting.retention_secs = u64::MAX / 1000 + 1;
        assert!(matches!(
            config.validate(&RateLimitPolicies::builtin()),
            Err(PubgateError::Config(_))
        ));

        config.rate_limiting.retention_secs = u64::MAX / 1000;
        assert!(config.validate(&RateLimitPolicies::builtin()).is_ok());
    }

    #[test]
    fn test_zero_sweep_interval_rejected() {
        let mut config = PubgateConfig::default();
        config.rate_limiting.sweep_interval_secs = 0;
        assert!(config.validate(&RateLimitPolicies::builtin()).is_err());
    }

    #[test]
    fn test_missing_policy_file() {
        let mut config = PubgateConfig::default();
        config.rate_limiting.policies_path = Some(PathBuf::from("/nonexistent/pubgate/policies.yaml"));
        assert!(matches!(config.policies(), Err(PubgateError::Io(_))));
    }
}
