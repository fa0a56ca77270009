//! tugboat.toml configuration parser.
//!
//! Every section and field is optional; missing values fall back to the
//! defaults below. Durations are strings understood by
//! [`parse_duration`](crate::duration::parse_duration).

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tugboat_resilience::{BreakerConfig, RetryPolicy};

use crate::duration::parse_duration;
use crate::naming::NamingStrategy;

/// Errors raised while loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Read(#[from] std::io::Error),

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid value for {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TugboatConfig {
    pub cluster: ClusterSettings,
    pub resilience: ResilienceSettings,
    pub infra: InfraSettings,
    pub pipeline: PipelineSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusterSettings {
    /// Prepended to the project ID to form the namespace name.
    pub namespace_prefix: String,
    /// Default ingress hosts are `<service>-<environment>.<base_domain>`.
    pub base_domain: String,
    pub ingress_class: String,
    /// cert-manager issuer annotated onto every ingress.
    pub cluster_issuer: String,
    /// Storage class used when a volume or database does not name one.
    pub storage_class: String,
    pub naming: NamingStrategy,
}

impl Default for ClusterSettings {
    fn default() -> Self {
        Self {
            namespace_prefix: "proj-".to_string(),
            base_domain: "apps.tugboat.local".to_string(),
            ingress_class: "nginx".to_string(),
            cluster_issuer: "letsencrypt-prod".to_string(),
            storage_class: "standard".to_string(),
            naming: NamingStrategy::IdPrefix,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ResilienceSettings {
    pub retry: RetrySettings,
    pub breaker: BreakerSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    pub max_attempts: u32,
    pub initial_delay: String,
    pub max_delay: String,
    pub multiplier: f64,
    pub jitter: bool,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: "100ms".to_string(),
            max_delay: "5s".to_string(),
            multiplier: 2.0,
            jitter: true,
        }
    }
}

/// Whether the resilient infra client shares one breaker across all
/// operations or keeps one per operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BreakerScope {
    #[default]
    Shared,
    PerOperation,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BreakerSettings {
    pub failure_threshold: u32,
    pub success_threshold: u32,
    pub timeout: String,
    pub reset_timeout: String,
    pub scope: BreakerScope,
}

impl Default for BreakerSettings {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            success_threshold: 2,
            timeout: "30s".to_string(),
            reset_timeout: "60s".to_string(),
            scope: BreakerScope::Shared,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum InfraBackend {
    #[default]
    Mock,
    Http,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct InfraSettings {
    pub backend: InfraBackend,
    /// Base URL of the legacy infrastructure API (http backend only).
    pub base_url: Option<String>,
    pub api_token: Option<String>,
    pub request_timeout: String,
    /// Status polling cadence for `wait_for_*_status`.
    pub poll_interval: String,
    pub poll_attempts: u32,
    /// How long mock resources stay in their transitional status.
    pub mock_completion_delay: String,
}

impl Default for InfraSettings {
    fn default() -> Self {
        Self {
            backend: InfraBackend::Mock,
            base_url: None,
            api_token: None,
            request_timeout: "30s".to_string(),
            poll_interval: "2s".to_string(),
            poll_attempts: 30,
            mock_completion_delay: "2s".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineSettings {
    pub readiness_interval: String,
    pub readiness_attempts: u32,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            readiness_interval: "5s".to_string(),
            readiness_attempts: 60,
        }
    }
}

fn duration_field(field: &'static str, value: &str) -> Result<Duration, ConfigError> {
    parse_duration(value).ok_or_else(|| ConfigError::Invalid {
        field,
        reason: format!("'{value}' is not a duration"),
    })
}

fn non_zero(field: &'static str, value: u32) -> Result<(), ConfigError> {
    if value == 0 {
        return Err(ConfigError::Invalid {
            field,
            reason: "must be at least 1".to_string(),
        });
    }
    Ok(())
}

impl TugboatConfig {
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Parse and validate.
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: TugboatConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.retry_policy()?;
        self.breaker_config()?;
        self.infra.request_timeout()?;
        self.infra.poll_interval()?;
        self.infra.mock_completion_delay()?;
        non_zero("infra.poll_attempts", self.infra.poll_attempts)?;
        self.pipeline.readiness_interval()?;
        non_zero("pipeline.readiness_attempts", self.pipeline.readiness_attempts)?;

        if self.infra.backend == InfraBackend::Http && self.infra.base_url.is_none() {
            return Err(ConfigError::Invalid {
                field: "infra.base_url",
                reason: "required when infra.backend = \"http\"".to_string(),
            });
        }
        if self.cluster.base_domain.trim().is_empty() {
            return Err(ConfigError::Invalid {
                field: "cluster.base_domain",
                reason: "must not be empty".to_string(),
            });
        }
        Ok(())
    }

    pub fn retry_policy(&self) -> Result<RetryPolicy, ConfigError> {
        let retry = &self.resilience.retry;
        non_zero("resilience.retry.max_attempts", retry.max_attempts)?;
        if !(retry.multiplier >= 1.0) {
            return Err(ConfigError::Invalid {
                field: "resilience.retry.multiplier",
                reason: format!("{} is below 1.0", retry.multiplier),
            });
        }
        Ok(RetryPolicy {
            max_attempts: retry.max_attempts,
            initial_delay: duration_field("resilience.retry.initial_delay", &retry.initial_delay)?,
            max_delay: duration_field("resilience.retry.max_delay", &retry.max_delay)?,
            multiplier: retry.multiplier,
            jitter: retry.jitter,
        })
    }

    pub fn breaker_config(&self) -> Result<BreakerConfig, ConfigError> {
        let breaker = &self.resilience.breaker;
        non_zero("resilience.breaker.failure_threshold", breaker.failure_threshold)?;
        non_zero("resilience.breaker.success_threshold", breaker.success_threshold)?;
        Ok(BreakerConfig {
            failure_threshold: breaker.failure_threshold,
            success_threshold: breaker.success_threshold,
            timeout: duration_field("resilience.breaker.timeout", &breaker.timeout)?,
            reset_timeout: duration_field("resilience.breaker.reset_timeout", &breaker.reset_timeout)?,
        })
    }
}

impl InfraSettings {
    pub fn request_timeout(&self) -> Result<Duration, ConfigError> {
        duration_field("infra.request_timeout", &self.request_timeout)
    }

    pub fn poll_interval(&self) -> Result<Duration, ConfigError> {
        duration_field("infra.poll_interval", &self.poll_interval)
    }

    pub fn mock_completion_delay(&self) -> Result<Duration, ConfigError> {
        duration_field("infra.mock_completion_delay", &self.mock_completion_delay)
    }
}

impl PipelineSettings {
    pub fn readiness_interval(&self) -> Result<Duration, ConfigError> {
        duration_field("pipeline.readiness_interval", &self.readiness_interval)
    }
}
