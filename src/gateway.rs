//! Request gateway.
//!
//! Parses GraphQL requests, runs the validator over every operation and turns
//! the result into an allow or block decision. Also owns the active
//! configuration and opens transports for subscription connections.

use crate::config::{FailAction, GatewayConfig};
use crate::error::{graphql_error_response, GatewayError, ValidationError};
use crate::parser::{parse_query, parse_request, select_operation};
use crate::policy::{ClaimsPolicyEvaluator, Identity, PolicyEvaluator};
use crate::schema::Schema;
use crate::transport::{Connection, JsonDocumentWriter, Transport};
use crate::validation::{AuthorizationGate, Validator};
use async_graphql_parser::types::ExecutableDocument;
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

/// Outcome of checking one request body.
#[derive(Debug, Clone, PartialEq)]
pub enum RequestDecision {
    Allow,
    Block(Vec<ValidationError>),
}

impl RequestDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allow)
    }

    /// GraphQL error body for a blocked request.
    pub fn response_body(&self) -> Option<Value> {
        match self {
            Self::Allow => None,
            Self::Block(errors) => Some(graphql_error_response(errors)),
        }
    }
}

type ParsedOperation = Result<ExecutableDocument, ValidationError>;

/// Everything derived from one configuration.
struct Active {
    config: GatewayConfig,
    schema: Arc<Schema>,
    validator: Arc<Validator>,
}

/// GraphQL request gateway.
pub struct GraphQLGateway {
    /// Schema SDL the gateway was started with
    sdl: String,
    /// Evaluator used instead of the configured policies
    evaluator: Option<Arc<dyn PolicyEvaluator>>,
    active: RwLock<Active>,
    /// Request counters
    requests_total: AtomicU64,
    requests_blocked: AtomicU64,
    /// Configuration version
    config_version: RwLock<Option<String>>,
}

impl GraphQLGateway {
    /// Create a gateway whose policies come from `config`.
    pub fn new(sdl: impl Into<String>, config: GatewayConfig) -> Result<Self, GatewayError> {
        Self::build(sdl.into(), config, None)
    }

    /// Create a gateway that evaluates every policy with `evaluator`.
    pub fn with_evaluator(
        sdl: impl Into<String>,
        config: GatewayConfig,
        evaluator: Arc<dyn PolicyEvaluator>,
    ) -> Result<Self, GatewayError> {
        Self::build(sdl.into(), config, Some(evaluator))
    }

    fn build(
        sdl: String,
        config: GatewayConfig,
        evaluator: Option<Arc<dyn PolicyEvaluator>>,
    ) -> Result<Self, GatewayError> {
        let active = Self::activate(&sdl, config, evaluator.clone())?;
        Ok(Self {
            sdl,
            evaluator,
            active: RwLock::new(active),
            requests_total: AtomicU64::new(0),
            requests_blocked: AtomicU64::new(0),
            config_version: RwLock::new(None),
        })
    }

    /// Build the schema and validator for `config`.
    fn activate(
        sdl: &str,
        config: GatewayConfig,
        evaluator: Option<Arc<dyn PolicyEvaluator>>,
    ) -> Result<Active, GatewayError> {
        config.validate()?;

        let mut schema = Schema::from_sdl(sdl)?;
        schema.apply_bindings(&config.bindings);

        let evaluator: Arc<dyn PolicyEvaluator> = match evaluator {
            Some(evaluator) => evaluator,
            None => Arc::new(ClaimsPolicyEvaluator::new(config.policies.clone())),
        };
        let validator = Validator::new().with_rule(Arc::new(AuthorizationGate::new(evaluator)));

        Ok(Active {
            config,
            schema: Arc::new(schema),
            validator: Arc::new(validator),
        })
    }

    /// Check a request body for `identity`.
    ///
    /// Malformed requests and failed validation produce a block decision
    /// (or an allow when `fail_action` is `allow`). Evaluator failures are
    /// returned as errors.
    pub async fn check_request(
        &self,
        body: &[u8],
        identity: &Identity,
    ) -> Result<RequestDecision, GatewayError> {
        self.requests_total.fetch_add(1, Ordering::Relaxed);

        // Snapshot the active configuration so a reload can't block on us
        let (settings, schema, validator) = {
            let active = self.active.read().await;
            (
                active.config.settings.clone(),
                active.schema.clone(),
                active.validator.clone(),
            )
        };

        let errors = match Self::prepare(body, settings.max_body_size, settings.max_batch_size) {
            Ok(documents) => {
                let mut errors = Vec::new();
                for (idx, document) in documents.into_iter().enumerate() {
                    match document {
                        Ok(document) => {
                            let found = validator.validate(&schema, &document, identity).await?;
                            debug!(operation = idx, errors = found.len(), "Validated operation");
                            errors.extend(found);
                        }
                        Err(error) => errors.push(error),
                    }
                }
                errors
            }
            Err(error) => vec![error],
        };

        if errors.is_empty() {
            debug!("GraphQL request passed validation");
            return Ok(RequestDecision::Allow);
        }

        self.requests_blocked.fetch_add(1, Ordering::Relaxed);
        warn!(error_count = errors.len(), "GraphQL request failed validation");

        match settings.fail_action {
            FailAction::Block => Ok(RequestDecision::Block(errors)),
            FailAction::Allow => {
                info!("Validation failed but allowing request (fail_action=allow)");
                Ok(RequestDecision::Allow)
            }
        }
    }

    /// Parse the body and every query in it, keeping only the requested
    /// operation when the request names one. A query that fails to parse
    /// yields its error in place of a document.
    fn prepare(
        body: &[u8],
        max_body_size: usize,
        max_batch_size: usize,
    ) -> Result<Vec<ParsedOperation>, ValidationError> {
        if body.len() > max_body_size {
            return Err(ValidationError::invalid_request(&format!(
                "Request body too large: {} bytes (max: {})",
                body.len(),
                max_body_size
            )));
        }

        let requests = parse_request(body)?;
        if requests.len() > max_batch_size {
            return Err(ValidationError::invalid_request(&format!(
                "Too many operations in batch: {} (max: {})",
                requests.len(),
                max_batch_size
            )));
        }

        Ok(requests
            .iter()
            .map(|request| {
                let document = parse_query(&request.query)?;
                select_operation(document, request.operation_name.as_deref())
            })
            .collect())
    }

    /// Replace the configuration. Returns `false` and keeps the current one
    /// when the new configuration is rejected.
    pub async fn reconfigure(&self, config: Value, version: Option<String>) -> bool {
        info!("Received configuration update, version: {:?}", version);

        let config = match serde_json::from_value::<GatewayConfig>(config) {
            Ok(config) => config,
            Err(e) => {
                warn!("Failed to parse configuration: {}", e);
                return false;
            }
        };

        match Self::activate(&self.sdl, config, self.evaluator.clone()) {
            Ok(active) => {
                *self.active.write().await = active;
                *self.config_version.write().await = version;
                info!("Configuration updated successfully");
                true
            }
            Err(e) => {
                warn!("Rejected configuration: {}", e);
                false
            }
        }
    }

    /// Open a transport for a subscription connection using the configured
    /// pipeline settings.
    pub async fn open_transport(&self, connection: Arc<dyn Connection>) -> Transport {
        let pipeline = self.active.read().await.config.pipeline.clone();
        Transport::new(connection, Arc::new(JsonDocumentWriter), &pipeline)
    }

    pub async fn schema(&self) -> Arc<Schema> {
        self.active.read().await.schema.clone()
    }

    pub async fn config(&self) -> GatewayConfig {
        self.active.read().await.config.clone()
    }

    pub async fn config_version(&self) -> Option<String> {
        self.config_version.read().await.clone()
    }

    pub fn requests_total(&self) -> u64 {
        self.requests_total.load(Ordering::Relaxed)
    }

    pub fn requests_blocked(&self) -> u64 {
        self.requests_blocked.load(Ordering::Relaxed)
    }
}
