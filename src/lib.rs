//! GraphQL Server Core for Zentinel
//!
//! Enforces policy-based authorization while a GraphQL document is validated,
//! and delivers subscription messages over long-lived connections in order.
//!
//! # Features
//!
//! - `@authorize` policies on the schema, its types, fields, arguments and
//!   input fields
//! - Authorization errors reported at validation time, in document order
//! - Concurrent evaluation of the policies attached to one element
//! - Single-writer delivery pipeline with backpressure and graceful drain
//! - Connection close that aborts on abnormal close statuses
//!
//! # Example
//!
//! ```ignore
//! use zentinel_graphql_server::{GatewayConfig, GraphQLGateway, Identity};
//!
//! let gateway = GraphQLGateway::new(sdl, GatewayConfig::default())?;
//! let decision = gateway
//!     .check_request(br#"{"query": "{ users { id } }"}"#, &Identity::anonymous())
//!     .await?;
//! ```

pub mod config;
pub mod error;
pub mod gateway;
pub mod parser;
pub mod policy;
pub mod schema;
pub mod transport;
pub mod validation;

pub use config::GatewayConfig;
pub use error::{GatewayError, ValidationError};
pub use gateway::{GraphQLGateway, RequestDecision};
pub use policy::{Identity, PolicyCatalog, PolicyEvaluator, SchemaElement};
pub use schema::Schema;
