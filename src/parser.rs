//! GraphQL request and query parsing.

use crate::error::ValidationError;
use async_graphql_parser::types::{DocumentOperations, ExecutableDocument};
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;

/// One GraphQL operation request as sent over HTTP.
///
/// Only the fields the gateway acts on are decoded; `variables` and
/// `extensions` are accepted and ignored.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GraphQLRequest {
    pub query: String,
    /// Operation to run when the document holds several
    #[serde(default)]
    pub operation_name: Option<String>,
}

/// Parse a request body holding either one request object or a batch array.
pub fn parse_request(body: &[u8]) -> Result<Vec<GraphQLRequest>, ValidationError> {
    let value: Value = serde_json::from_slice(body)
        .map_err(|e| ValidationError::invalid_request(&format!("Invalid JSON body: {}", e)))?;

    match value {
        Value::Array(items) => {
            if items.is_empty() {
                return Err(ValidationError::invalid_request("Empty batch request"));
            }
            items.into_iter().map(decode_request).collect()
        }
        Value::Object(_) => Ok(vec![decode_request(value)?]),
        _ => Err(ValidationError::invalid_request(
            "Request body must be a JSON object or array",
        )),
    }
}

fn decode_request(value: Value) -> Result<GraphQLRequest, ValidationError> {
    serde_json::from_value(value)
        .map_err(|e| ValidationError::invalid_request(&format!("Invalid GraphQL request: {}", e)))
}

/// Parse a query document.
pub fn parse_query(query: &str) -> Result<ExecutableDocument, ValidationError> {
    if query.trim().is_empty() {
        return Err(ValidationError::parse_error("Empty query"));
    }
    async_graphql_parser::parse_query(query)
        .map_err(|e| ValidationError::parse_error(&e.to_string()))
}

/// Narrow `document` to the operation named `operation_name`. Without a
/// name every operation is kept.
pub fn select_operation(
    mut document: ExecutableDocument,
    operation_name: Option<&str>,
) -> Result<ExecutableDocument, ValidationError> {
    let Some(name) = operation_name else {
        return Ok(document);
    };

    let selected = match &document.operations {
        DocumentOperations::Multiple(operations) => operations
            .iter()
            .find(|(key, _)| key.as_str() == name)
            .map(|(key, operation)| (key.clone(), operation.clone())),
        // a lone anonymous operation has no name to match
        DocumentOperations::Single(_) => None,
    };

    match selected {
        Some((key, operation)) => {
            document.operations = DocumentOperations::Multiple(HashMap::from([(key, operation)]));
            Ok(document)
        }
        None => Err(ValidationError::invalid_request(&format!(
            "Unknown operation named '{}'",
            name
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;
    use async_graphql_parser::types::OperationType;

    #[test]
    fn test_parse_single_request() {
        let body = br#"{"query": "query Users { users { id } }", "operationName": "Users", "variables": {"first": 3}}"#;
        let requests = parse_request(body).unwrap();

        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].operation_name.as_deref(), Some("Users"));
    }

    #[test]
    fn test_parse_batch_request() {
        let body = br#"[{"query": "{ a }"}, {"query": "{ b }", "operationName": null}]"#;
        let requests = parse_request(body).unwrap();

        assert_eq!(requests.len(), 2);
        assert_eq!(requests[1].query, "{ b }");
        assert!(requests[1].operation_name.is_none());
    }

    #[test]
    fn test_parse_request_errors() {
        assert_eq!(parse_request(b"not json").unwrap_err().code, ErrorCode::InvalidRequest);
        assert_eq!(parse_request(b"[]").unwrap_err().code, ErrorCode::InvalidRequest);
        assert_eq!(parse_request(b"42").unwrap_err().code, ErrorCode::InvalidRequest);
        assert_eq!(
            parse_request(br#"{"variables": {}}"#).unwrap_err().code,
            ErrorCode::InvalidRequest
        );
    }

    #[test]
    fn test_parse_query() {
        let document = parse_query("query A { users { id } } mutation B { reset }").unwrap();
        assert_eq!(document.operations.iter().count(), 2);

        assert_eq!(parse_query("   ").unwrap_err().code, ErrorCode::ParseError);
        assert_eq!(parse_query("{ users { ").unwrap_err().code, ErrorCode::ParseError);
        assert_eq!(
            parse_query("{ users { id } } mutation { reset }").unwrap_err().code,
            ErrorCode::ParseError
        );
    }

    #[test]
    fn test_select_operation() {
        let source = "query A { users { id } } mutation B { reset }";

        let document = select_operation(parse_query(source).unwrap(), Some("B")).unwrap();
        let operations: Vec<_> = document.operations.iter().collect();
        assert_eq!(operations.len(), 1);
        assert_eq!(operations[0].0.map(|n| n.as_str()), Some("B"));
        assert_eq!(operations[0].1.node.ty, OperationType::Mutation);

        let document = select_operation(parse_query(source).unwrap(), None).unwrap();
        assert_eq!(document.operations.iter().count(), 2);
    }

    #[test]
    fn test_select_unknown_operation() {
        let named = parse_query("query A { users { id } }").unwrap();
        assert_eq!(
            select_operation(named, Some("C")).unwrap_err().code,
            ErrorCode::InvalidRequest
        );

        let anonymous = parse_query("{ users { id } }").unwrap();
        assert_eq!(
            select_operation(anonymous, Some("A")).unwrap_err().code,
            ErrorCode::InvalidRequest
        );
    }
}
