//! Error codes, error kinds and the errors raised while handling a request.

use apollo_compiler::validation::DiagnosticList;
use displaydoc::Display;
use http::StatusCode;
use thiserror::Error;

use crate::graphql;
use crate::graphql::Location;

/// The document could not be parsed.
pub const PARSE_FAILED: &str = "GRAPHQL_PARSE_FAILED";
/// The document, the operation selection or a variable was rejected.
pub const VALIDATION_FAILED: &str = "GRAPHQL_VALIDATION_FAILED";
/// The operation is too expensive to run.
pub const COMPLEXITY_LIMIT_EXCEEDED: &str = "COMPLEXITY_LIMIT_EXCEEDED";
/// The persisted query hash is unknown, the client should retry with the full query.
pub const PERSISTED_QUERY_NOT_FOUND: &str = "PERSISTED_QUERY_NOT_FOUND";
/// The request references a persisted query but persisted queries are not enabled.
pub const PERSISTED_QUERY_NOT_SUPPORTED: &str = "PERSISTED_QUERY_NOT_SUPPORTED";

/// How an error code maps onto the HTTP layer.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ErrorKind {
    /// Errors a client caused and can observe next to partial data.
    User,
    /// Errors in the request itself, reported with a 4xx status.
    Protocol,
}

impl ErrorKind {
    pub fn of(code: &str) -> Self {
        match code {
            PARSE_FAILED | VALIDATION_FAILED => ErrorKind::Protocol,
            _ => ErrorKind::User,
        }
    }
}

/// Status for a response that failed before execution.
///
/// Any protocol kind error makes the whole response a 422.
pub fn status_for(errors: &[graphql::Error]) -> StatusCode {
    if errors.iter().any(|error| error.kind() == ErrorKind::Protocol) {
        StatusCode::UNPROCESSABLE_ENTITY
    } else {
        StatusCode::OK
    }
}

pub(crate) fn validation_error(message: impl Into<String>) -> graphql::Error {
    graphql::Error::builder()
        .message(message)
        .extension_code(VALIDATION_FAILED)
        .build()
}

/// Failures to read GraphQL parameters out of a query string.
#[derive(Debug, Error, Display)]
#[non_exhaustive]
pub enum RequestDecodeError {
    /// query string could not be decoded
    QueryString(#[source] serde_urlencoded::de::Error),

    /// variables could not be decoded
    Variables(#[source] serde_json::Error),

    /// extensions could not be decoded
    Extensions(#[source] serde_json::Error),
}

/// Diagnostics reported by the compiler for a request document.
pub(crate) struct DocumentErrors<'a> {
    pub(crate) code: &'static str,
    pub(crate) diagnostics: &'a DiagnosticList,
}

impl DocumentErrors<'_> {
    pub(crate) fn parse(diagnostics: &DiagnosticList) -> DocumentErrors<'_> {
        DocumentErrors {
            code: PARSE_FAILED,
            diagnostics,
        }
    }

    pub(crate) fn validation(diagnostics: &DiagnosticList) -> DocumentErrors<'_> {
        DocumentErrors {
            code: VALIDATION_FAILED,
            diagnostics,
        }
    }

    pub(crate) fn into_errors(self) -> Vec<graphql::Error> {
        self.diagnostics
            .iter()
            .map(|diagnostic| {
                let locations = diagnostic
                    .line_column_range()
                    .map(|range| Location::new(range.start.line, range.start.column))
                    .into_iter()
                    .collect::<Vec<_>>();
                graphql::Error::builder()
                    .message(diagnostic.error.to_string())
                    .locations(locations)
                    .extension_code(self.code)
                    .build()
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn protocol_errors_map_to_422() {
        let errors = vec![validation_error("operation name required")];
        assert_eq!(status_for(&errors), StatusCode::UNPROCESSABLE_ENTITY);
    }

    #[test]
    fn user_errors_map_to_200() {
        let errors = vec![
            graphql::Error::builder()
                .message("operation has complexity 3, which exceeds the limit of 2")
                .extension_code(COMPLEXITY_LIMIT_EXCEEDED)
                .build(),
            graphql::Error::builder().message("no code").build(),
        ];
        assert_eq!(status_for(&errors), StatusCode::OK);
    }
}
