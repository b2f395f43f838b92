//! Lightweight schema type model used to resolve query nodes during validation.
//!
//! Built once from SDL. `@authorize(policy: "...")` or
//! `@authorize(policies: ["...", "..."])` directives on the schema, types,
//! fields, arguments and input fields are collected into the schema's
//! [`PolicyCatalog`] while building; nothing is mutated afterwards.

use crate::config::PolicyBinding;
use crate::error::GatewayError;
use crate::policy::{PolicyCatalog, SchemaElement};
use async_graphql_parser::types::{
    BaseType, ConstDirective, FieldDefinition, InputValueDefinition, OperationType, Type,
    TypeDefinition, TypeKind as AstTypeKind, TypeSystemDefinition,
};
use async_graphql_parser::{parse_schema, Positioned};
use async_graphql_value::ConstValue;
use std::collections::HashMap;
use tracing::debug;

/// Directive carrying policy names in SDL.
pub const AUTHORIZE_DIRECTIVE: &str = "authorize";

const BUILTIN_SCALARS: [&str; 5] = ["Int", "Float", "String", "Boolean", "ID"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeKind {
    Scalar,
    Object,
    Interface,
    Union,
    Enum,
    InputObject,
}

/// A named type.
#[derive(Debug, Clone)]
pub struct TypeDef {
    pub name: String,
    pub kind: TypeKind,
    /// Output fields (objects and interfaces)
    pub fields: Vec<FieldDef>,
    /// Input fields (input objects)
    pub input_fields: Vec<InputValueDef>,
}

impl TypeDef {
    fn new(name: String, kind: TypeKind) -> Self {
        Self {
            name,
            kind,
            fields: Vec::new(),
            input_fields: Vec::new(),
        }
    }

    pub fn field(&self, name: &str) -> Option<&FieldDef> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn input_field(&self, name: &str) -> Option<&InputValueDef> {
        self.input_fields.iter().find(|f| f.name == name)
    }
}

/// An output field definition.
#[derive(Debug, Clone)]
pub struct FieldDef {
    pub name: String,
    /// Named return type with list and non-null wrappers removed
    pub return_type: String,
    pub arguments: Vec<InputValueDef>,
}

impl FieldDef {
    pub fn argument(&self, name: &str) -> Option<&InputValueDef> {
        self.arguments.iter().find(|a| a.name == name)
    }
}

/// An argument or input object field.
#[derive(Debug, Clone)]
pub struct InputValueDef {
    pub name: String,
    /// Named type with list and non-null wrappers removed
    pub value_type: String,
}

/// The schema: types, root operation types and the policy side-table.
#[derive(Debug, Clone)]
pub struct Schema {
    types: HashMap<String, TypeDef>,
    query: Option<String>,
    mutation: Option<String>,
    subscription: Option<String>,
    policies: PolicyCatalog,
}

impl Schema {
    /// Build a schema from SDL.
    pub fn from_sdl(sdl: &str) -> Result<Self, GatewayError> {
        let document = parse_schema(sdl).map_err(|e| GatewayError::Schema(e.to_string()))?;

        let mut schema = Self {
            types: BUILTIN_SCALARS
                .iter()
                .map(|name| (name.to_string(), TypeDef::new(name.to_string(), TypeKind::Scalar)))
                .collect(),
            query: None,
            mutation: None,
            subscription: None,
            policies: PolicyCatalog::new(),
        };

        for definition in document.definitions {
            match definition {
                TypeSystemDefinition::Schema(definition) => {
                    let definition = definition.node;
                    if let Some(query) = definition.query {
                        schema.query = Some(query.node.to_string());
                    }
                    if let Some(mutation) = definition.mutation {
                        schema.mutation = Some(mutation.node.to_string());
                    }
                    if let Some(subscription) = definition.subscription {
                        schema.subscription = Some(subscription.node.to_string());
                    }
                    schema.collect_policies(SchemaElement::Schema, &definition.directives);
                }
                TypeSystemDefinition::Type(definition) => schema.add_type(definition.node),
                TypeSystemDefinition::Directive(_) => {}
            }
        }

        for (root, default_name) in [
            (&mut schema.query, "Query"),
            (&mut schema.mutation, "Mutation"),
            (&mut schema.subscription, "Subscription"),
        ] {
            if root.is_none() && schema.types.contains_key(default_name) {
                *root = Some(default_name.to_string());
            }
        }

        if schema.query.is_none() {
            return Err(GatewayError::Schema(
                "schema does not define a query root type".to_string(),
            ));
        }

        debug!(
            types = schema.types.len(),
            secured_elements = schema.policies.len(),
            "Schema built"
        );
        Ok(schema)
    }

    /// Attach policies declared in configuration.
    pub fn apply_bindings(&mut self, bindings: &[PolicyBinding]) {
        for binding in bindings {
            for policy in &binding.policies {
                self.policies.add_policy(binding.element.clone(), policy.clone());
            }
        }
    }

    pub fn policies(&self) -> &PolicyCatalog {
        &self.policies
    }

    pub fn type_def(&self, name: &str) -> Option<&TypeDef> {
        self.types.get(name)
    }

    /// Root type for an operation, if the schema declares one.
    pub fn root_type(&self, operation: OperationType) -> Option<&TypeDef> {
        let name = match operation {
            OperationType::Query => self.query.as_deref(),
            OperationType::Mutation => self.mutation.as_deref(),
            OperationType::Subscription => self.subscription.as_deref(),
        }?;
        self.types.get(name)
    }

    fn add_type(&mut self, definition: TypeDefinition) {
        let name = definition.name.node.to_string();
        self.collect_policies(SchemaElement::type_named(&name), &definition.directives);

        let mut fields = Vec::new();
        let mut input_fields = Vec::new();
        let kind = match definition.kind {
            AstTypeKind::Scalar => TypeKind::Scalar,
            AstTypeKind::Object(object) => {
                for field in object.fields {
                    fields.push(self.field_def(&name, field.node));
                }
                TypeKind::Object
            }
            AstTypeKind::Interface(interface) => {
                for field in interface.fields {
                    fields.push(self.field_def(&name, field.node));
                }
                TypeKind::Interface
            }
            AstTypeKind::Union(_) => TypeKind::Union,
            AstTypeKind::Enum(_) => TypeKind::Enum,
            AstTypeKind::InputObject(input) => {
                for field in input.fields {
                    let field = field.node;
                    let element = SchemaElement::input_field(&name, field.name.node.as_str());
                    input_fields.push(self.input_value_def(element, field));
                }
                TypeKind::InputObject
            }
        };

        // `extend type` merges into an existing definition
        let entry = self
            .types
            .entry(name.clone())
            .or_insert_with(|| TypeDef::new(name, kind));
        entry.fields.extend(fields);
        entry.input_fields.extend(input_fields);
    }

    fn field_def(&mut self, parent: &str, field: FieldDefinition) -> FieldDef {
        let name = field.name.node.to_string();
        self.collect_policies(SchemaElement::field(parent, &name), &field.directives);

        let mut arguments = Vec::with_capacity(field.arguments.len());
        for argument in field.arguments {
            let argument = argument.node;
            let element = SchemaElement::argument(parent, &name, argument.name.node.as_str());
            arguments.push(self.input_value_def(element, argument));
        }

        FieldDef {
            name,
            return_type: named_type(&field.ty.node),
            arguments,
        }
    }

    fn input_value_def(
        &mut self,
        element: SchemaElement,
        value: InputValueDefinition,
    ) -> InputValueDef {
        self.collect_policies(element, &value.directives);
        InputValueDef {
            name: value.name.node.to_string(),
            value_type: named_type(&value.ty.node),
        }
    }

    fn collect_policies(
        &mut self,
        element: SchemaElement,
        directives: &[Positioned<ConstDirective>],
    ) {
        let authorize = directives
            .iter()
            .filter(|d| d.node.name.node.as_str() == AUTHORIZE_DIRECTIVE);

        for directive in authorize {
            for (argument, value) in &directive.node.arguments {
                match (argument.node.as_str(), &value.node) {
                    ("policy" | "policies", ConstValue::String(policy)) => {
                        self.policies.add_policy(element.clone(), policy.clone());
                    }
                    ("policies", ConstValue::List(items)) => {
                        for item in items {
                            if let ConstValue::String(policy) = item {
                                self.policies.add_policy(element.clone(), policy.clone());
                            }
                        }
                    }
                    _ => {}
                }
            }
        }
    }
}

/// Strip list and non-null wrappers from a type reference.
fn named_type(ty: &Type) -> String {
    match &ty.base {
        BaseType::Named(name) => name.to_string(),
        BaseType::List(inner) => named_type(inner),
    }
}
