//! Search error types and the structured validation report.

use std::collections::BTreeMap;

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use thiserror::Error;

/// Errors raised while building, validating, compiling or executing a search.
#[derive(Debug, Error)]
pub enum SearchError {
    /// A resource declared a directive of the wrong capability, a duplicate
    /// name, or an unsafe internal name. Surfaced to the developer.
    #[error("invalid directive: {0}")]
    InvalidDirective(String),

    /// The resource references an entity that is missing or malformed.
    #[error("invalid resource model: {0}")]
    InvalidModel(String),

    #[error("max nested depth {max} is exceeded")]
    MaxDepthExceeded { max: usize },

    #[error("the '{0}' field is not whitelisted")]
    UnknownField(String),

    #[error("the '{field}' field is not filterable with the '{operator}' operator")]
    OperatorNotAllowed { field: String, operator: String },

    #[error("invalid value for '{field}': {reason}")]
    InvalidValue { field: String, reason: String },

    #[error("invalid relation '{path}': {reason}")]
    InvalidRelation { path: String, reason: String },

    #[error("the given cursor is invalid")]
    InvalidCursor,

    #[error("the given data was invalid")]
    Validation(ValidationReport),

    #[error("database error")]
    Database(#[from] sqlx::Error),
}

impl SearchError {
    /// Whether the error was caused by client input rather than configuration.
    pub fn is_client_error(&self) -> bool {
        !matches!(
            self,
            SearchError::InvalidDirective(_)
                | SearchError::InvalidModel(_)
                | SearchError::Database(_)
        )
    }

    /// Flatten the error into a field-keyed report.
    ///
    /// Client errors raised outside the validator (for example by the
    /// compiler's own allow-list checks) are keyed under the closest
    /// request key so the response shape stays the same.
    pub fn report(&self) -> ValidationReport {
        match self {
            SearchError::Validation(report) => report.clone(),
            SearchError::MaxDepthExceeded { .. } => {
                ValidationReport::single("filters", FieldErrorKind::MaxDepth, self.to_string())
            }
            SearchError::UnknownField(_) => {
                ValidationReport::single("filters", FieldErrorKind::UnknownField, self.to_string())
            }
            SearchError::OperatorNotAllowed { .. } => ValidationReport::single(
                "filters",
                FieldErrorKind::OperatorNotAllowed,
                self.to_string(),
            ),
            SearchError::InvalidValue { .. } => {
                ValidationReport::single("filters", FieldErrorKind::InvalidValue, self.to_string())
            }
            SearchError::InvalidRelation { .. } => ValidationReport::single(
                "filters",
                FieldErrorKind::InvalidRelation,
                self.to_string(),
            ),
            SearchError::InvalidCursor => {
                ValidationReport::single("page.cursor", FieldErrorKind::InvalidValue, self.to_string())
            }
            _ => ValidationReport::default(),
        }
    }
}

/// Category of a single field error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldErrorKind {
    MaxDepth,
    Required,
    UnknownField,
    OperatorNotAllowed,
    InvalidValue,
    InvalidRelation,
}

/// A single validation failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldError {
    pub kind: FieldErrorKind,
    pub message: String,
}

/// Validation failures keyed by payload path (e.g. `filters.0.nested.1.field`).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct ValidationReport {
    errors: BTreeMap<String, Vec<FieldError>>,
}

impl ValidationReport {
    /// Create a report holding exactly one error.
    pub fn single(path: impl Into<String>, kind: FieldErrorKind, message: impl Into<String>) -> Self {
        let mut report = Self::default();
        report.push(path, kind, message);
        report
    }

    /// Record an error for a path.
    pub fn push(&mut self, path: impl Into<String>, kind: FieldErrorKind, message: impl Into<String>) {
        self.errors.entry(path.into()).or_default().push(FieldError {
            kind,
            message: message.into(),
        });
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn len(&self) -> usize {
        self.errors.len()
    }

    /// Errors recorded for a path.
    pub fn get(&self, path: &str) -> Option<&[FieldError]> {
        self.errors.get(path).map(Vec::as_slice)
    }

    pub fn contains(&self, path: &str) -> bool {
        self.errors.contains_key(path)
    }

    /// Paths with at least one error, in sorted order.
    pub fn paths(&self) -> impl Iterator<Item = &str> {
        self.errors.keys().map(String::as_str)
    }

    /// Messages only, as sent to clients.
    pub fn messages(&self) -> BTreeMap<String, Vec<String>> {
        self.errors
            .iter()
            .map(|(path, errors)| {
                (
                    path.clone(),
                    errors.iter().map(|e| e.message.clone()).collect(),
                )
            })
            .collect()
    }

    /// Convert into a result: `Ok(value)` when no errors were recorded.
    pub fn into_result<T>(self, value: T) -> Result<T, SearchError> {
        if self.is_empty() {
            Ok(value)
        } else {
            Err(SearchError::Validation(self))
        }
    }
}

#[derive(Serialize)]
struct ErrorBody {
    message: String,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    errors: BTreeMap<String, Vec<String>>,
}

impl IntoResponse for SearchError {
    fn into_response(self) -> Response {
        if !self.is_client_error() {
            tracing::error!(error = %self, "search failed");
            let body = ErrorBody {
                message: "internal server error".to_string(),
                errors: BTreeMap::new(),
            };
            return (StatusCode::INTERNAL_SERVER_ERROR, Json(body)).into_response();
        }

        let body = ErrorBody {
            message: self.to_string(),
            errors: self.report().messages(),
        };

        (StatusCode::UNPROCESSABLE_ENTITY, Json(body)).into_response()
    }
}

/// Result type alias using SearchError.
pub type SearchResult<T> = Result<T, SearchError>;

#[cfg(test)]
// Tests are allowed to use unwrap/expect freely.
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn report_collects_errors_per_path() {
        let mut report = ValidationReport::default();
        report.push("filters.0.field", FieldErrorKind::UnknownField, "unknown");
        report.push("filters.0.field", FieldErrorKind::Required, "required");
        report.push("sort.1.direction", FieldErrorKind::InvalidValue, "bad");

        assert_eq!(report.len(), 2);
        assert_eq!(report.get("filters.0.field").unwrap().len(), 2);
        assert_eq!(
            report.paths().collect::<Vec<_>>(),
            vec!["filters.0.field", "sort.1.direction"]
        );
    }

    #[test]
    fn empty_report_is_ok() {
        assert_eq!(ValidationReport::default().into_result(5).unwrap(), 5);
    }

    #[test]
    fn configuration_errors_are_not_client_errors() {
        assert!(!SearchError::InvalidDirective("x".into()).is_client_error());
        assert!(!SearchError::InvalidModel("x".into()).is_client_error());
        assert!(SearchError::InvalidCursor.is_client_error());
        assert!(SearchError::MaxDepthExceeded { max: 2 }.is_client_error());
    }

    #[test]
    fn operator_error_is_reported_under_filters() {
        let err = SearchError::OperatorNotAllowed {
            field: "title".into(),
            operator: "like".into(),
        };
        let report = err.report();
        let messages = report.messages();
        assert_eq!(
            messages["filters"],
            vec!["the 'title' field is not filterable with the 'like' operator".to_string()]
        );
    }

    #[tokio::test]
    async fn validation_error_renders_unprocessable_entity() {
        let report = ValidationReport::single("page.size", FieldErrorKind::InvalidValue, "too big");
        let response = SearchError::Validation(report).into_response();
        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);

        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["errors"]["page.size"][0], "too big");
    }

    #[tokio::test]
    async fn configuration_error_renders_internal_error() {
        let response = SearchError::InvalidModel("Post".into()).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
