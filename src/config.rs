//! Configuration for the GraphQL server core.
//!
//! Loaded from YAML by the binary, or pushed as JSON through
//! [`GraphQLGateway::reconfigure`](crate::gateway::GraphQLGateway::reconfigure).

use crate::error::GatewayError;
use crate::policy::SchemaElement;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

/// Root configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// Request handling settings
    pub settings: SettingsConfig,
    /// Outbound delivery pipeline settings
    pub pipeline: PipelineConfig,
    /// Named authorization policies
    pub policies: HashMap<String, PolicyDefinition>,
    /// Policy bindings in addition to `@authorize` directives in the schema
    pub bindings: Vec<PolicyBinding>,
    /// Configuration version
    pub version: String,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            settings: SettingsConfig::default(),
            pipeline: PipelineConfig::default(),
            policies: HashMap::new(),
            bindings: Vec::new(),
            version: "1".to_string(),
        }
    }
}

impl GatewayConfig {
    /// Read a YAML configuration file.
    pub async fn load(path: &Path) -> Result<Self, GatewayError> {
        let content = tokio::fs::read_to_string(path).await?;
        Self::from_yaml(&content)
    }

    pub fn from_yaml(content: &str) -> Result<Self, GatewayError> {
        let config: Self = serde_yaml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject bindings that reference undeclared policies.
    pub fn validate(&self) -> Result<(), GatewayError> {
        if self.pipeline.capacity == 0 {
            return Err(GatewayError::Config(
                "pipeline.capacity must be greater than zero".to_string(),
            ));
        }
        for binding in &self.bindings {
            for policy in &binding.policies {
                if !self.policies.contains_key(policy) {
                    return Err(GatewayError::Config(format!(
                        "binding for '{}' references unknown policy '{}'",
                        binding.element, policy
                    )));
                }
            }
        }
        Ok(())
    }
}

/// Request handling settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SettingsConfig {
    /// Maximum accepted request body size in bytes
    pub max_body_size: usize,
    /// Maximum number of operations in a batched request
    pub max_batch_size: usize,
    /// What to do when validation fails
    pub fail_action: FailAction,
}

impl Default for SettingsConfig {
    fn default() -> Self {
        Self {
            max_body_size: 1_048_576,
            max_batch_size: 10,
            fail_action: FailAction::Block,
        }
    }
}

/// Action taken when a request fails validation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailAction {
    /// Reject the request with GraphQL errors
    #[default]
    Block,
    /// Log the errors and let the request through
    Allow,
}

/// Delivery pipeline settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Number of messages that may wait in the queue
    pub capacity: usize,
    /// Keep-alive interval in milliseconds, disabled when absent
    pub keep_alive_ms: Option<u64>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            capacity: 256,
            keep_alive_ms: None,
        }
    }
}

impl PipelineConfig {
    pub fn keep_alive_interval(&self) -> Option<Duration> {
        self.keep_alive_ms.map(Duration::from_millis)
    }
}

/// Requirements of a named policy. Every listed requirement must hold.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PolicyDefinition {
    /// Caller must be authenticated
    pub require_authenticated: bool,
    /// Caller must hold at least one of these roles
    pub roles: Vec<String>,
    /// Claims the caller must carry
    pub claims: Vec<ClaimRequirement>,
    /// Caller's user name must match exactly
    pub user_name: Option<String>,
}

/// A required claim, optionally restricted to a set of values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClaimRequirement {
    #[serde(rename = "type")]
    pub claim_type: String,
    #[serde(default)]
    pub values: Vec<String>,
}

/// Policies attached to one schema element from configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolicyBinding {
    pub element: SchemaElement,
    pub policies: Vec<String>,
}
