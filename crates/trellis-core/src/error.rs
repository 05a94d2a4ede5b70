//! HTTP error contract and the error-type registry.
//!
//! [`HttpError`] is the only error the dispatcher translates into a response.
//! Anything else returned from a handler or a middleware propagates to the
//! hosting runtime.
//!
//! [`ErrorRegistry`] is the vocabulary of named error types.  It starts with a
//! set of built-in HTTP errors; plugins add their own `custom_errors` while the
//! plugin manager initializes them.

use std::collections::HashMap;
use std::fmt;

use http::StatusCode;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::warn;

use crate::body::{Response, json_response};

// =============================================================================
// HttpError
// =============================================================================

/// An error carrying an HTTP status, a machine-readable code, and a message.
///
/// Handlers return it boxed (`Err(HttpError::not_found("…").into())`); the
/// dispatcher recognizes it with `downcast_ref::<HttpError>()` and answers
/// with [`HttpError::to_json`] as the body.
#[derive(Debug, Clone, Error)]
#[error("{code} ({status}): {message}")]
pub struct HttpError {
    status: StatusCode,
    code: String,
    message: String,
    details: Option<Value>,
}

impl HttpError {
    /// Creates a new error.
    pub fn new(status: StatusCode, code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            status,
            code: code.into(),
            message: message.into(),
            details: None,
        }
    }

    /// Attaches structured details (e.g. validation issues).
    pub fn with_details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "BAD_REQUEST", message)
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, "UNAUTHORIZED", message)
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::new(StatusCode::FORBIDDEN, "FORBIDDEN", message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, "NOT_FOUND", message)
    }

    pub fn method_not_allowed(message: impl Into<String>) -> Self {
        Self::new(StatusCode::METHOD_NOT_ALLOWED, "METHOD_NOT_ALLOWED", message)
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new(StatusCode::CONFLICT, "CONFLICT", message)
    }

    pub fn too_many_requests(message: impl Into<String>) -> Self {
        Self::new(StatusCode::TOO_MANY_REQUESTS, "TOO_MANY_REQUESTS", message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            "INTERNAL_SERVER_ERROR",
            message,
        )
    }

    /// The HTTP status.
    pub fn status(&self) -> StatusCode {
        self.status
    }

    /// The machine-readable code, e.g. `"NOT_FOUND"`.
    pub fn code(&self) -> &str {
        &self.code
    }

    /// The human-readable message.
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Structured details, if any.
    pub fn details(&self) -> Option<&Value> {
        self.details.as_ref()
    }

    /// Serializes the error as `{"error", "message", "details"?}`.
    pub fn to_json(&self) -> Value {
        let mut body = Map::new();
        body.insert("error".into(), Value::String(self.code.clone()));
        body.insert("message".into(), Value::String(self.message.clone()));
        if let Some(details) = &self.details {
            body.insert("details".into(), details.clone());
        }
        Value::Object(body)
    }

    /// Converts the error into a JSON response with the matching status.
    pub fn to_response(&self) -> Response {
        json_response(self.status, &self.to_json())
    }
}

// =============================================================================
// ErrorDefinition / ErrorRegistry
// =============================================================================

/// A named error type that can be instantiated through the [`ErrorRegistry`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorDefinition {
    /// HTTP status code.
    pub status: u16,
    /// Machine-readable code.
    pub code: String,
    /// Message used when the caller does not supply one.
    #[serde(default)]
    pub message: String,
}

impl ErrorDefinition {
    pub fn new(status: u16, code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            status,
            code: code.into(),
            message: message.into(),
        }
    }

    /// Instantiates the definition, optionally overriding the message.
    pub fn instantiate(&self, message: Option<&str>) -> HttpError {
        let status = StatusCode::from_u16(self.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        HttpError::new(status, &self.code, message.unwrap_or(&self.message))
    }
}

const BUILTIN_ERRORS: &[(&str, u16, &str, &str)] = &[
    ("BadRequest", 400, "BAD_REQUEST", "Bad request"),
    ("Unauthorized", 401, "UNAUTHORIZED", "Unauthorized"),
    ("Forbidden", 403, "FORBIDDEN", "Forbidden"),
    ("NotFound", 404, "NOT_FOUND", "Not found"),
    ("MethodNotAllowed", 405, "METHOD_NOT_ALLOWED", "Method not allowed"),
    ("Conflict", 409, "CONFLICT", "Conflict"),
    ("UnsupportedMediaType", 415, "UNSUPPORTED_MEDIA_TYPE", "Unsupported media type"),
    ("UnprocessableEntity", 422, "UNPROCESSABLE_ENTITY", "Unprocessable entity"),
    ("TooManyRequests", 429, "TOO_MANY_REQUESTS", "Too many requests"),
    ("InternalServer", 500, "INTERNAL_SERVER_ERROR", "Internal server error"),
    ("ServiceUnavailable", 503, "SERVICE_UNAVAILABLE", "Service unavailable"),
];

/// Registry of named error types.
///
/// Written only while plugins initialize; afterwards it is only read, from the
/// request-scoped server context.
pub struct ErrorRegistry {
    definitions: RwLock<HashMap<String, ErrorDefinition>>,
}

impl ErrorRegistry {
    /// Creates a registry holding the built-in HTTP errors.
    pub fn new() -> Self {
        let definitions = BUILTIN_ERRORS
            .iter()
            .map(|(name, status, code, message)| {
                (name.to_string(), ErrorDefinition::new(*status, *code, *message))
            })
            .collect();
        Self {
            definitions: RwLock::new(definitions),
        }
    }

    /// Registers a named error type.  A name that already exists is replaced.
    pub fn register(&self, name: impl Into<String>, definition: ErrorDefinition) {
        let name = name.into();
        if let Some(previous) = self.definitions.write().insert(name.clone(), definition) {
            warn!(
                error_type = %name,
                previous_code = %previous.code,
                "Error type redefined, last registration wins"
            );
        }
    }

    /// Returns a copy of the named definition.
    pub fn get(&self, name: &str) -> Option<ErrorDefinition> {
        self.definitions.read().get(name).cloned()
    }

    /// Returns `true` if the name is registered.
    pub fn contains(&self, name: &str) -> bool {
        self.definitions.read().contains_key(name)
    }

    /// Instantiates the named error type.
    ///
    /// Unknown names produce an internal error mentioning the missing type, so
    /// a typo in a handler still yields a well-formed response.
    pub fn create(&self, name: &str, message: Option<&str>) -> HttpError {
        match self.definitions.read().get(name) {
            Some(def) => def.instantiate(message),
            None => HttpError::internal(format!("unknown error type '{name}'")),
        }
    }

    /// Names of all registered error types, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.definitions.read().keys().cloned().collect();
        names.sort();
        names
    }
}

impl Default for ErrorRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ErrorRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ErrorRegistry")
            .field("count", &self.definitions.read().len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_http_error_json() {
        let err = HttpError::not_found("todo 7 does not exist")
            .with_details(serde_json::json!({"id": 7}));
        assert_eq!(err.status(), StatusCode::NOT_FOUND);
        assert_eq!(
            err.to_json(),
            serde_json::json!({
                "error": "NOT_FOUND",
                "message": "todo 7 does not exist",
                "details": {"id": 7},
            })
        );
    }

    #[test]
    fn test_registry_builtins_and_custom() {
        let registry = ErrorRegistry::new();
        assert_eq!(registry.create("Forbidden", None).status(), StatusCode::FORBIDDEN);

        registry.register(
            "QuotaExceeded",
            ErrorDefinition::new(402, "QUOTA_EXCEEDED", "Quota exceeded"),
        );
        let err = registry.create("QuotaExceeded", Some("10 of 10 used"));
        assert_eq!(err.status(), StatusCode::PAYMENT_REQUIRED);
        assert_eq!(err.code(), "QUOTA_EXCEEDED");
        assert_eq!(err.message(), "10 of 10 used");
    }

    #[test]
    fn test_unknown_error_type_is_internal() {
        let registry = ErrorRegistry::new();
        let err = registry.create("Nope", None);
        assert_eq!(err.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert!(err.message().contains("Nope"));
    }
}
