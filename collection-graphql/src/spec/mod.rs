//! Turns a GraphQL operation into data access calls.

#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::panic))]

pub(crate) mod arguments;
pub mod query_plan;
pub(crate) mod selection;

use displaydoc::Display;
use thiserror::Error;

use crate::graphql;
use crate::graphql::ErrorExtension;
use crate::json_ext::Object;

pub(crate) const TYPENAME: &str = "__typename";
/// Marker prefixed to the option keys of a deep query block.
pub(crate) const DEEP_OPTION_PREFIX: char = '_';

/// GraphQL request errors.
#[derive(Error, Debug, Display, Clone)]
#[non_exhaustive]
pub enum SpecError {
    /// parsing error: {0}
    ParsingError(String),
    /// validation error
    ValidationError(Vec<graphql::Error>),
    /// Unknown operation named "{0}"
    UnknownOperation(String),
    /// must provide operation name if query contains multiple operations
    OperationNameRequired,
    /// {0} operations are not supported
    OperationNotSupported(String),
    /// invalid value for argument '{argument}': {message}
    InvalidArgument { argument: String, message: String },
    /// selection processing recursion limit exceeded
    RecursionLimitExceeded,
}

impl SpecError {
    pub(crate) fn invalid_argument(argument: &str, message: impl Into<String>) -> Self {
        SpecError::InvalidArgument {
            argument: argument.to_string(),
            message: message.into(),
        }
    }

    /// Converts into the GraphQL errors reported to the client.
    ///
    /// Validation errors keep their own messages and locations.
    pub(crate) fn into_graphql_errors(self) -> Vec<graphql::Error> {
        match self {
            SpecError::ValidationError(errors) => errors
                .into_iter()
                .map(|mut error| {
                    error
                        .extensions
                        .entry("code")
                        .or_insert_with(|| "GRAPHQL_VALIDATION_FAILED".into());
                    error
                })
                .collect(),
            other => vec![other.to_graphql_error(None)],
        }
    }
}

impl ErrorExtension for SpecError {
    fn extension_code(&self) -> String {
        match self {
            SpecError::ParsingError(_) => "PARSING_ERROR",
            SpecError::ValidationError(_) => "GRAPHQL_VALIDATION_FAILED",
            SpecError::UnknownOperation(_) | SpecError::OperationNameRequired => {
                "UNKNOWN_OPERATION"
            }
            SpecError::OperationNotSupported(_) => "OPERATION_NOT_SUPPORTED",
            SpecError::InvalidArgument { .. } => "INVALID_QUERY",
            SpecError::RecursionLimitExceeded => "RECURSION_LIMIT_EXCEEDED",
        }
        .to_string()
    }

    fn custom_extension_details(&self) -> Option<Object> {
        let mut obj = Object::new();
        if let SpecError::InvalidArgument { argument, .. } = self {
            obj.insert("argument", argument.clone().into());
        }
        (!obj.is_empty()).then_some(obj)
    }
}

#[cfg(test)]
mod tests {
    use serde_json_bytes::json;

    use super::*;

    #[test]
    fn invalid_argument_reports_the_argument() {
        let error = SpecError::invalid_argument("limit", "expected an integer")
            .into_graphql_errors()
            .remove(0);
        assert_eq!(
            error.message,
            "invalid value for argument 'limit': expected an integer"
        );
        assert_eq!(error.extension_code().as_deref(), Some("INVALID_QUERY"));
        assert_eq!(error.extensions.get("argument"), Some(&json!("limit")));
    }

    #[test]
    fn validation_errors_keep_their_messages() {
        let errors = SpecError::ValidationError(vec![
            graphql::Error::builder().message("first").build(),
            graphql::Error::builder()
                .message("second")
                .extension_code("CUSTOM")
                .build(),
        ])
        .into_graphql_errors();
        assert_eq!(errors[0].message, "first");
        assert_eq!(
            errors[0].extension_code().as_deref(),
            Some("GRAPHQL_VALIDATION_FAILED")
        );
        assert_eq!(errors[1].extension_code().as_deref(), Some("CUSTOM"));
    }
}
