//! Document validation rules.
//!
//! Rules share a [`ValidationContext`] whose error list is append-only: a
//! rule may report errors but never removes or reorders what earlier rules
//! recorded.

pub mod authorization;

pub use authorization::AuthorizationGate;

use crate::error::{GatewayError, ValidationError};
use crate::policy::Identity;
use crate::schema::Schema;
use async_graphql_parser::types::ExecutableDocument;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;

/// State shared by the rules validating one document.
pub struct ValidationContext<'a> {
    pub schema: &'a Schema,
    pub document: &'a ExecutableDocument,
    pub identity: &'a Identity,
    errors: Vec<ValidationError>,
}

impl<'a> ValidationContext<'a> {
    pub fn new(schema: &'a Schema, document: &'a ExecutableDocument, identity: &'a Identity) -> Self {
        Self {
            schema,
            document,
            identity,
            errors: Vec::new(),
        }
    }

    pub fn report_error(&mut self, error: ValidationError) {
        self.errors.push(error);
    }

    pub fn errors(&self) -> &[ValidationError] {
        &self.errors
    }

    pub fn into_errors(self) -> Vec<ValidationError> {
        self.errors
    }
}

/// A validation rule run before execution.
#[async_trait]
pub trait ValidationRule: Send + Sync {
    /// Rule name for logging.
    fn name(&self) -> &'static str;

    /// Inspect the document and report errors into `ctx`.
    async fn validate(&self, ctx: &mut ValidationContext<'_>) -> Result<(), GatewayError>;
}

/// Runs rules in order over one document.
#[derive(Clone, Default)]
pub struct Validator {
    rules: Vec<Arc<dyn ValidationRule>>,
}

impl Validator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_rule(mut self, rule: Arc<dyn ValidationRule>) -> Self {
        self.rules.push(rule);
        self
    }

    pub fn rule_count(&self) -> usize {
        self.rules.len()
    }

    /// Validate `document`, returning every reported error in rule order.
    pub async fn validate(
        &self,
        schema: &Schema,
        document: &ExecutableDocument,
        identity: &Identity,
    ) -> Result<Vec<ValidationError>, GatewayError> {
        let mut ctx = ValidationContext::new(schema, document, identity);
        for rule in &self.rules {
            let before = ctx.errors().len();
            rule.validate(&mut ctx).await?;
            debug!(
                rule = rule.name(),
                errors = ctx.errors().len() - before,
                "Validation rule finished"
            );
        }
        Ok(ctx.into_errors())
    }
}
