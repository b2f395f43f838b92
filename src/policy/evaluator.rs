use super::Identity;
use crate::config::PolicyDefinition;
use crate::error::EvaluatorError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::trace;

/// Result of evaluating one policy for one identity.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthorizationOutcome {
    pub succeeded: bool,
    /// Why the policy failed, in requirement order
    #[serde(default)]
    pub failure_reasons: Vec<String>,
}

impl AuthorizationOutcome {
    pub fn success() -> Self {
        Self {
            succeeded: true,
            failure_reasons: Vec::new(),
        }
    }

    pub fn failed<I, S>(reasons: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            succeeded: false,
            failure_reasons: reasons.into_iter().map(Into::into).collect(),
        }
    }
}

/// Evaluates named policies against an identity.
///
/// Implementations are called concurrently for the policies of one schema
/// element and must not rely on call order. Errors are propagated to the
/// caller of the validation pass, never treated as allow or deny.
#[async_trait]
pub trait PolicyEvaluator: Send + Sync {
    async fn evaluate(
        &self,
        identity: &Identity,
        policy: &str,
    ) -> Result<AuthorizationOutcome, EvaluatorError>;
}

/// Evaluates policies declared in configuration against the identity's
/// authentication state, roles, claims and user name.
#[derive(Debug, Clone, Default)]
pub struct ClaimsPolicyEvaluator {
    policies: HashMap<String, PolicyDefinition>,
}

impl ClaimsPolicyEvaluator {
    pub fn new(policies: HashMap<String, PolicyDefinition>) -> Self {
        Self { policies }
    }

    pub fn with_policy(mut self, name: impl Into<String>, definition: PolicyDefinition) -> Self {
        self.policies.insert(name.into(), definition);
        self
    }

    fn check(definition: &PolicyDefinition, identity: &Identity) -> AuthorizationOutcome {
        let mut reasons = Vec::new();

        if definition.require_authenticated && !identity.authenticated {
            reasons.push("The current user must be authenticated.".to_string());
        }

        if !definition.roles.is_empty() && !definition.roles.iter().any(|r| identity.has_role(r)) {
            reasons.push(format!(
                "Required one of roles '{}' is not present.",
                definition.roles.join(", ")
            ));
        }

        for claim in &definition.claims {
            if identity.has_claim(&claim.claim_type, &claim.values) {
                continue;
            }
            if claim.values.is_empty() {
                reasons.push(format!(
                    "Required claim '{}' is not present.",
                    claim.claim_type
                ));
            } else {
                reasons.push(format!(
                    "Required claim '{}' with any value of '{}' is not present.",
                    claim.claim_type,
                    claim.values.join(", ")
                ));
            }
        }

        if let Some(expected) = &definition.user_name {
            if identity.name.as_deref() != Some(expected.as_str()) {
                reasons.push(format!(
                    "The current user name must match the name '{}'.",
                    expected
                ));
            }
        }

        if reasons.is_empty() {
            AuthorizationOutcome::success()
        } else {
            AuthorizationOutcome::failed(reasons)
        }
    }
}

#[async_trait]
impl PolicyEvaluator for ClaimsPolicyEvaluator {
    async fn evaluate(
        &self,
        identity: &Identity,
        policy: &str,
    ) -> Result<AuthorizationOutcome, EvaluatorError> {
        let definition = self
            .policies
            .get(policy)
            .ok_or_else(|| EvaluatorError::UnknownPolicy(policy.to_string()))?;

        let outcome = Self::check(definition, identity);
        trace!(policy, succeeded = outcome.succeeded, "Evaluated policy");
        Ok(outcome)
    }
}
