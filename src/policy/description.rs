use super::AuthorizationOutcome;
use async_graphql_parser::types::OperationType;

/// Builds the user-visible message for a failed policy.
///
/// Messages must be derived from the outcome's failure reasons only, so that
/// schema structure hidden from the caller does not leak through them.
pub trait FailureDescriptionGenerator: Send + Sync {
    fn describe(&self, outcome: &AuthorizationOutcome, operation: Option<OperationType>) -> String;
}

/// `You are not authorized to run this query.` followed by one line per
/// failure reason.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultFailureDescriptionGenerator;

impl FailureDescriptionGenerator for DefaultFailureDescriptionGenerator {
    fn describe(&self, outcome: &AuthorizationOutcome, operation: Option<OperationType>) -> String {
        let operation = match operation {
            Some(OperationType::Query) => "query",
            Some(OperationType::Mutation) => "mutation",
            Some(OperationType::Subscription) => "subscription",
            None => "operation",
        };

        let mut message = format!("You are not authorized to run this {}.", operation);
        for reason in &outcome.failure_reasons {
            message.push('\n');
            message.push_str(reason);
        }
        message
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_describe_lists_reasons_after_header() {
        let outcome = AuthorizationOutcome::failed([
            "The current user must be authenticated.",
            "Required claim 'scope' is not present.",
        ]);
        let message =
            DefaultFailureDescriptionGenerator.describe(&outcome, Some(OperationType::Mutation));

        assert_eq!(
            message,
            "You are not authorized to run this mutation.\n\
             The current user must be authenticated.\n\
             Required claim 'scope' is not present."
        );
    }

    #[test]
    fn test_describe_without_operation() {
        let outcome = AuthorizationOutcome::failed(Vec::<String>::new());
        let message = DefaultFailureDescriptionGenerator.describe(&outcome, None);
        assert_eq!(message, "You are not authorized to run this operation.");
    }
}
