//! The schema-object contract.
//!
//! Trellis does not validate anything itself.  Routes carry opaque
//! [`Schema`] objects; handler kinds call [`Schema::parse`] on inputs and
//! outputs and turn a [`SchemaError`] into a `400`/`500` response.  Any
//! validation library can be plugged in by implementing the trait.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// One problem found while validating a value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaIssue {
    /// JSON-pointer-like path of the offending value (`""` for the root).
    pub path: String,
    pub message: String,
}

impl SchemaIssue {
    pub fn new(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            message: message.into(),
        }
    }
}

/// Validation failure.
#[derive(Debug, Clone, Error)]
#[error("validation failed with {} issue(s)", issues.len())]
pub struct SchemaError {
    pub issues: Vec<SchemaIssue>,
}

impl SchemaError {
    /// A failure with a single issue.
    pub fn single(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            issues: vec![SchemaIssue::new(path, message)],
        }
    }

    /// The issues as JSON, for error details.
    pub fn to_json(&self) -> Value {
        serde_json::to_value(&self.issues).unwrap_or(Value::Null)
    }
}

/// A schema object.
///
/// `parse` returns the (possibly coerced or defaulted) value on success.
pub trait Schema: Send + Sync {
    fn parse(&self, value: Value) -> Result<Value, SchemaError>;

    /// A machine-readable description used by route metadata (e.g. JSON Schema).
    fn describe(&self) -> Value {
        Value::Null
    }
}

/// Shared schema handle stored on routes.
pub type SchemaRef = Arc<dyn Schema>;

/// A [`Schema`] backed by a closure.
pub struct FnSchema<F> {
    parse: F,
    description: Value,
}

impl<F> FnSchema<F>
where
    F: Fn(Value) -> Result<Value, SchemaError> + Send + Sync,
{
    pub fn new(parse: F) -> Self {
        Self {
            parse,
            description: Value::Null,
        }
    }

    /// Sets the description returned by [`Schema::describe`].
    pub fn described(mut self, description: Value) -> Self {
        self.description = description;
        self
    }
}

impl<F> Schema for FnSchema<F>
where
    F: Fn(Value) -> Result<Value, SchemaError> + Send + Sync,
{
    fn parse(&self, value: Value) -> Result<Value, SchemaError> {
        (self.parse)(value)
    }

    fn describe(&self) -> Value {
        self.description.clone()
    }
}

impl<F> fmt::Debug for FnSchema<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnSchema")
            .field("description", &self.description)
            .finish_non_exhaustive()
    }
}

/// Shorthand for `Arc::new(FnSchema::new(f))`.
pub fn schema_fn<F>(parse: F) -> SchemaRef
where
    F: Fn(Value) -> Result<Value, SchemaError> + Send + Sync + 'static,
{
    Arc::new(FnSchema::new(parse))
}
