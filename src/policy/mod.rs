//! Authorization policies: catalog, identities, evaluation and failure messages.
//!
//! The catalog is a side-table keyed by [`SchemaElement`], populated while the
//! schema is built and only read afterwards. Evaluation is delegated to a
//! [`PolicyEvaluator`], which is the seam for plugging in an external
//! authorization service.

mod description;
mod evaluator;
mod identity;

pub use description::{DefaultFailureDescriptionGenerator, FailureDescriptionGenerator};
pub use evaluator::{AuthorizationOutcome, ClaimsPolicyEvaluator, PolicyEvaluator};
pub use identity::Identity;

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// A schema member that may carry authorization policies.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SchemaElement {
    /// The schema as a whole; checked once per document.
    Schema,
    /// A named type (object, interface, input object, enum, scalar, union).
    Type { name: String },
    /// An output field on an object or interface type.
    Field { parent: String, name: String },
    /// An argument declared on an output field.
    Argument {
        parent: String,
        field: String,
        name: String,
    },
    /// A field of an input object type.
    InputField { parent: String, name: String },
}

impl SchemaElement {
    pub fn type_named(name: impl Into<String>) -> Self {
        Self::Type { name: name.into() }
    }

    pub fn field(parent: impl Into<String>, name: impl Into<String>) -> Self {
        Self::Field {
            parent: parent.into(),
            name: name.into(),
        }
    }

    pub fn argument(
        parent: impl Into<String>,
        field: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        Self::Argument {
            parent: parent.into(),
            field: field.into(),
            name: name.into(),
        }
    }

    pub fn input_field(parent: impl Into<String>, name: impl Into<String>) -> Self {
        Self::InputField {
            parent: parent.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for SchemaElement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Schema => f.write_str("schema"),
            Self::Type { name } => f.write_str(name),
            Self::Field { parent, name } | Self::InputField { parent, name } => {
                write!(f, "{}.{}", parent, name)
            }
            Self::Argument {
                parent,
                field,
                name,
            } => write!(f, "{}.{}({})", parent, field, name),
        }
    }
}

/// Side-table of policy names attached to schema elements.
#[derive(Debug, Clone, Default)]
pub struct PolicyCatalog {
    entries: HashMap<SchemaElement, Vec<String>>,
}

impl PolicyCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach `policy` to `element`. Declaration order is kept and duplicates
    /// are ignored.
    pub fn add_policy(&mut self, element: SchemaElement, policy: impl Into<String>) {
        let policy = policy.into();
        let policies = self.entries.entry(element).or_default();
        if !policies.contains(&policy) {
            policies.push(policy);
        }
    }

    /// Builder-style variant of [`PolicyCatalog::add_policy`].
    pub fn with_policy(mut self, element: SchemaElement, policy: impl Into<String>) -> Self {
        self.add_policy(element, policy);
        self
    }

    /// Policies attached to `element`, empty when none were declared.
    pub fn policies(&self, element: &SchemaElement) -> &[String] {
        self.entries
            .get(element)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    /// Number of elements carrying at least one policy.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
