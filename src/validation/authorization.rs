//! Validation-time authorization.
//!
//! The document is walked once, synchronously, collecting one
//! [`AuthorizationCheck`] per (node, schema element) pair that carries
//! policies. The checks are then driven in walk order: every policy of a
//! check is evaluated concurrently and all of them complete before the next
//! check starts, so errors land in document order.
//!
//! Visited pairs, depth first:
//! - the document against schema-wide policies (no anchor node),
//! - each operation against its root type,
//! - each field selection against its field definition and, separately,
//!   against the field's named return type,
//! - each field argument against its argument definition,
//! - each object literal field in an argument value against the input
//!   object field it resolves to.
//!
//! Nodes that do not resolve against the schema are skipped.

use super::{ValidationContext, ValidationRule};
use crate::error::{AuthorizationError, GatewayError, ValidationError};
use crate::policy::{
    AuthorizationOutcome, DefaultFailureDescriptionGenerator, FailureDescriptionGenerator,
    Identity, PolicyEvaluator, SchemaElement,
};
use crate::schema::{Schema, TypeDef};
use async_graphql_parser::types::{
    DocumentOperations, ExecutableDocument, Field, FragmentDefinition, OperationDefinition,
    OperationType, Selection, SelectionSet,
};
use async_graphql_parser::{Pos, Positioned};
use async_graphql_value::Value;
use async_trait::async_trait;
use futures::future::try_join_all;
use std::sync::Arc;
use tracing::debug;

/// One schema element to authorize, anchored at a document node.
#[derive(Debug, Clone, PartialEq)]
pub struct AuthorizationCheck<'a> {
    pub element: SchemaElement,
    pub policies: &'a [String],
    /// Anchor node; `None` for schema-wide checks
    pub node: Option<Pos>,
    /// Operation type in effect when the node was visited
    pub operation: Option<OperationType>,
}

/// Validation rule enforcing policies attached to schema elements.
pub struct AuthorizationGate {
    evaluator: Arc<dyn PolicyEvaluator>,
    describer: Arc<dyn FailureDescriptionGenerator>,
}

impl AuthorizationGate {
    pub fn new(evaluator: Arc<dyn PolicyEvaluator>) -> Self {
        Self {
            evaluator,
            describer: Arc::new(DefaultFailureDescriptionGenerator),
        }
    }

    pub fn with_describer(mut self, describer: Arc<dyn FailureDescriptionGenerator>) -> Self {
        self.describer = describer;
        self
    }

    /// Walk `document` and return the checks to run, in visitation order.
    pub fn collect_checks<'a>(
        schema: &'a Schema,
        document: &'a ExecutableDocument,
    ) -> Vec<AuthorizationCheck<'a>> {
        let mut walker = CheckCollector {
            schema,
            checks: Vec::new(),
            operation: None,
        };
        walker.walk_document(document);
        walker.checks
    }

    /// Evaluate `checks` in order, reporting one error per failed policy.
    pub async fn authorize(
        &self,
        checks: &[AuthorizationCheck<'_>],
        identity: &Identity,
        ctx: &mut ValidationContext<'_>,
    ) -> Result<(), AuthorizationError> {
        for check in checks {
            match check.policies {
                [] => {}
                [policy] => {
                    let outcome = self.evaluate(identity, policy).await?;
                    self.report(ctx, check, &outcome);
                }
                policies => {
                    let outcomes = try_join_all(
                        policies
                            .iter()
                            .map(|policy| self.evaluate(identity, policy)),
                    )
                    .await?;
                    for outcome in &outcomes {
                        self.report(ctx, check, outcome);
                    }
                }
            }
        }
        Ok(())
    }

    async fn evaluate(
        &self,
        identity: &Identity,
        policy: &str,
    ) -> Result<AuthorizationOutcome, AuthorizationError> {
        self.evaluator
            .evaluate(identity, policy)
            .await
            .map_err(|source| AuthorizationError::Evaluator {
                policy: policy.to_string(),
                source,
            })
    }

    fn report(
        &self,
        ctx: &mut ValidationContext<'_>,
        check: &AuthorizationCheck<'_>,
        outcome: &AuthorizationOutcome,
    ) {
        if outcome.succeeded {
            return;
        }
        debug!(
            element = %check.element,
            reasons = outcome.failure_reasons.len(),
            "Authorization policy failed"
        );
        let message = self.describer.describe(outcome, check.operation);
        ctx.report_error(ValidationError::authorization(message, check.node));
    }
}

#[async_trait]
impl ValidationRule for AuthorizationGate {
    fn name(&self) -> &'static str {
        "authorization"
    }

    async fn validate(&self, ctx: &mut ValidationContext<'_>) -> Result<(), GatewayError> {
        let schema = ctx.schema;
        let identity = ctx.identity;
        let checks = Self::collect_checks(schema, ctx.document);
        debug!(checks = checks.len(), "Collected authorization checks");

        self.authorize(&checks, identity, ctx).await?;
        Ok(())
    }
}

struct CheckCollector<'a> {
    schema: &'a Schema,
    checks: Vec<AuthorizationCheck<'a>>,
    operation: Option<OperationType>,
}

enum Definition<'a> {
    Operation(&'a Positioned<OperationDefinition>),
    Fragment(&'a Positioned<FragmentDefinition>),
}

impl<'a> CheckCollector<'a> {
    fn push(&mut self, element: SchemaElement, node: Option<Pos>) {
        let policies = self.schema.policies().policies(&element);
        if policies.is_empty() {
            return;
        }
        self.checks.push(AuthorizationCheck {
            element,
            policies,
            node,
            operation: self.operation,
        });
    }

    fn walk_document(&mut self, document: &'a ExecutableDocument) {
        let schema = self.schema;
        self.push(SchemaElement::Schema, None);

        let mut definitions: Vec<(Pos, Definition<'a>)> = match &document.operations {
            DocumentOperations::Single(operation) => {
                vec![(operation.pos, Definition::Operation(operation))]
            }
            DocumentOperations::Multiple(operations) => operations
                .values()
                .map(|operation| (operation.pos, Definition::Operation(operation)))
                .collect(),
        };
        definitions.extend(
            document
                .fragments
                .values()
                .map(|fragment| (fragment.pos, Definition::Fragment(fragment))),
        );
        definitions.sort_by_key(|(pos, _)| (pos.line, pos.column));

        for (_, definition) in definitions {
            match definition {
                Definition::Operation(operation) => {
                    self.operation = Some(operation.node.ty);
                    let Some(root) = schema.root_type(operation.node.ty) else {
                        continue;
                    };
                    self.push(SchemaElement::type_named(&root.name), Some(operation.pos));
                    self.walk_selection_set(&operation.node.selection_set.node, root);
                }
                Definition::Fragment(fragment) => {
                    let condition = fragment.node.type_condition.node.on.node.as_str();
                    if let Some(parent) = schema.type_def(condition) {
                        self.walk_selection_set(&fragment.node.selection_set.node, parent);
                    }
                }
            }
        }
    }

    fn walk_selection_set(&mut self, selection_set: &'a SelectionSet, parent: &'a TypeDef) {
        let schema = self.schema;
        for selection in &selection_set.items {
            match &selection.node {
                Selection::Field(field) => self.visit_field(field, parent),
                // fragment definitions are walked on their own
                Selection::FragmentSpread(_) => {}
                Selection::InlineFragment(fragment) => {
                    let target = match &fragment.node.type_condition {
                        Some(condition) => schema.type_def(condition.node.on.node.as_str()),
                        None => Some(parent),
                    };
                    if let Some(target) = target {
                        self.walk_selection_set(&fragment.node.selection_set.node, target);
                    }
                }
            }
        }
    }

    fn visit_field(&mut self, field: &'a Positioned<Field>, parent: &'a TypeDef) {
        let schema = self.schema;
        let Some(definition) = parent.field(field.node.name.node.as_str()) else {
            return;
        };

        self.push(
            SchemaElement::field(&parent.name, &definition.name),
            Some(field.pos),
        );
        self.push(
            SchemaElement::type_named(&definition.return_type),
            Some(field.pos),
        );

        for (name, value) in &field.node.arguments {
            let Some(argument) = definition.argument(name.node.as_str()) else {
                continue;
            };
            self.push(
                SchemaElement::argument(&parent.name, &definition.name, &argument.name),
                Some(name.pos),
            );
            self.visit_value(&value.node, &argument.value_type, value.pos);
        }

        if let Some(return_type) = schema.type_def(&definition.return_type) {
            self.walk_selection_set(&field.node.selection_set.node, return_type);
        }
    }

    fn visit_value(&mut self, value: &Value, type_name: &str, pos: Pos) {
        let schema = self.schema;
        match value {
            Value::Object(fields) => {
                let Some(input) = schema.type_def(type_name) else {
                    return;
                };
                for (name, field_value) in fields {
                    let Some(input_field) = input.input_field(name.as_str()) else {
                        continue;
                    };
                    // object literal fields carry no position of their own in
                    // the parsed value, so nested checks share the argument
                    // value's position
                    self.push(
                        SchemaElement::input_field(&input.name, &input_field.name),
                        Some(pos),
                    );
                    self.visit_value(field_value, &input_field.value_type, pos);
                }
            }
            Value::List(items) => {
                for item in items {
                    self.visit_value(item, type_name, pos);
                }
            }
            _ => {}
        }
    }
}
