use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// The principal a request is authorized for.
///
/// Supplied once per request; the authorization gate only reads it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Identity {
    /// User name, if known
    pub name: Option<String>,
    /// Whether the caller presented valid credentials
    pub authenticated: bool,
    /// Granted roles
    pub roles: Vec<String>,
    /// Claims keyed by claim type
    pub claims: HashMap<String, Vec<String>>,
}

impl Identity {
    /// An unauthenticated caller.
    pub fn anonymous() -> Self {
        Self::default()
    }

    /// An authenticated caller with the given user name.
    pub fn authenticated(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            authenticated: true,
            ..Self::default()
        }
    }

    pub fn with_role(mut self, role: impl Into<String>) -> Self {
        self.roles.push(role.into());
        self
    }

    pub fn with_claim(mut self, claim_type: impl Into<String>, value: impl Into<String>) -> Self {
        self.claims
            .entry(claim_type.into())
            .or_default()
            .push(value.into());
        self
    }

    pub fn has_role(&self, role: &str) -> bool {
        self.roles.iter().any(|r| r == role)
    }

    /// True when the claim is present and, if `allowed` is non-empty, carries
    /// at least one of the allowed values.
    pub fn has_claim(&self, claim_type: &str, allowed: &[String]) -> bool {
        match self.claims.get(claim_type) {
            Some(values) if allowed.is_empty() => !values.is_empty(),
            Some(values) => values.iter().any(|v| allowed.contains(v)),
            None => false,
        }
    }
}
