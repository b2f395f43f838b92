//! Error types and GraphQL-compliant error responses.

use async_graphql_parser::Pos;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::fmt;

/// Error number attached to every authorization failure.
pub const AUTHORIZATION_ERROR_NUMBER: &str = "6.1.1";

/// Validation error classification codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    /// Caller is not authorized for an operation, field, argument or type
    Authorization,
    /// GraphQL parse error
    ParseError,
    /// Invalid request format
    InvalidRequest,
}

impl ErrorCode {
    /// Get the code as a string.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Authorization => "authorization",
            Self::ParseError => "parse_error",
            Self::InvalidRequest => "invalid_request",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A source location in the GraphQL document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Location {
    /// Line number (1-indexed)
    pub line: usize,
    /// Column number (1-indexed)
    pub column: usize,
}

impl From<Pos> for Location {
    fn from(pos: Pos) -> Self {
        Self {
            line: pos.line,
            column: pos.column,
        }
    }
}

/// An error reported while validating a GraphQL document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationError {
    /// Classification code
    pub code: ErrorCode,
    /// Rule number, e.g. `6.1.1` for authorization failures
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub number: Option<String>,
    /// Human-readable message
    pub message: String,
    /// Affected nodes (zero or one for authorization failures)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub locations: Vec<Location>,
}

impl ValidationError {
    /// Create a new validation error.
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            number: None,
            message: message.into(),
            locations: Vec::new(),
        }
    }

    /// Add source location.
    pub fn with_location(mut self, location: impl Into<Location>) -> Self {
        self.locations.push(location.into());
        self
    }

    /// Create an authorization failure anchored at `node`, or at the whole
    /// document when `node` is `None`.
    pub fn authorization(message: impl Into<String>, node: Option<Pos>) -> Self {
        let mut error = Self::new(ErrorCode::Authorization, message);
        error.number = Some(AUTHORIZATION_ERROR_NUMBER.to_string());
        if let Some(pos) = node {
            error.locations.push(pos.into());
        }
        error
    }

    /// Create a parse error.
    pub fn parse_error(message: &str) -> Self {
        Self::new(ErrorCode::ParseError, message)
    }

    /// Create an invalid request error.
    pub fn invalid_request(message: &str) -> Self {
        Self::new(ErrorCode::InvalidRequest, message)
    }
}

/// Errors raised by a policy evaluator.
#[derive(Debug, thiserror::Error)]
pub enum EvaluatorError {
    #[error("Unknown authorization policy: {0}")]
    UnknownPolicy(String),

    #[error("Policy evaluation failed: {0}")]
    Backend(String),
}

/// Errors that abort an authorization pass.
#[derive(Debug, thiserror::Error)]
pub enum AuthorizationError {
    #[error("Failed to evaluate policy '{policy}': {source}")]
    Evaluator {
        policy: String,
        #[source]
        source: EvaluatorError,
    },
}

/// Errors raised while delivering outbound messages.
#[derive(Debug, thiserror::Error)]
pub enum DeliveryError {
    #[error("Pipeline no longer accepts messages")]
    PipelineCompleted,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Gateway errors.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Schema error: {0}")]
    Schema(String),

    #[error(transparent)]
    Authorization(#[from] AuthorizationError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML parse error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Build a GraphQL-compliant error response.
///
/// Returns a JSON value in the standard GraphQL error format.
/// Note: GraphQL errors are returned with HTTP 200 status.
pub fn graphql_error_response(errors: &[ValidationError]) -> Value {
    json!({
        "errors": errors.iter().map(|e| {
            let mut error = json!({
                "message": e.message,
                "extensions": {
                    "code": e.code.as_str(),
                }
            });

            if let Some(number) = &e.number {
                error["extensions"]["number"] = json!(number);
            }

            if !e.locations.is_empty() {
                error["locations"] = json!(e.locations);
            }

            error
        }).collect::<Vec<_>>()
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_code_display() {
        assert_eq!(ErrorCode::Authorization.to_string(), "authorization");
        assert_eq!(ErrorCode::ParseError.to_string(), "parse_error");
    }

    #[test]
    fn test_authorization_error_carries_number_and_location() {
        let error = ValidationError::authorization("denied", Some(Pos { line: 2, column: 5 }));
        assert_eq!(error.code, ErrorCode::Authorization);
        assert_eq!(error.number.as_deref(), Some("6.1.1"));
        assert_eq!(error.locations, vec![Location { line: 2, column: 5 }]);

        let document_level = ValidationError::authorization("denied", None);
        assert!(document_level.locations.is_empty());
    }

    #[test]
    fn test_graphql_error_response() {
        let errors = vec![ValidationError::authorization(
            "You are not authorized to run this query.",
            Some(Pos { line: 1, column: 3 }),
        )];
        let response = graphql_error_response(&errors);

        let errors = response["errors"].as_array().unwrap();
        assert_eq!(errors.len(), 1);

        let error = &errors[0];
        assert!(error["message"].as_str().unwrap().contains("not authorized"));
        assert_eq!(error["extensions"]["code"], "authorization");
        assert_eq!(error["extensions"]["number"], "6.1.1");
        assert_eq!(error["locations"][0]["line"], 1);
        assert_eq!(error["locations"][0]["column"], 3);
    }

    #[test]
    fn test_multiple_errors() {
        let errors = vec![
            ValidationError::parse_error("unexpected token"),
            ValidationError::invalid_request("missing query"),
        ];
        let response = graphql_error_response(&errors);

        let errors = response["errors"].as_array().unwrap();
        assert_eq!(errors.len(), 2);
        assert_eq!(errors[0]["extensions"]["code"], "parse_error");
        assert_eq!(errors[1]["extensions"]["code"], "invalid_request");
        assert!(errors[0].get("locations").is_none());
    }
}
