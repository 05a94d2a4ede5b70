//! Input decoding and validation shared by the handler kinds.
//!
//! Exposed so plugin-contributed kinds can decode input the same way the
//! built-ins do.

use http::{Method, StatusCode};
use serde_json::Value;
use url::form_urlencoded;

use trellis_core::{HttpError, Request, SchemaError};

use crate::router::RouteDefinition;

/// Name of the query parameter carrying JSON input on `GET` requests.
pub const INPUT_QUERY_PARAM: &str = "input";

/// Decodes the request's JSON input without validating it.
///
/// `GET` reads the URL-encoded `input` query parameter; every other method
/// reads the body.  Absent input is `null`.
pub fn decode(req: &Request) -> Result<Value, HttpError> {
    if *req.method() == Method::GET {
        let Some(query) = req.uri().query() else {
            return Ok(Value::Null);
        };
        return match form_urlencoded::parse(query.as_bytes()).find(|(key, _)| key == INPUT_QUERY_PARAM) {
            Some((_, raw)) => serde_json::from_str(&raw).map_err(|err| {
                HttpError::bad_request(format!("malformed '{INPUT_QUERY_PARAM}' query parameter: {err}"))
            }),
            None => Ok(Value::Null),
        };
    }

    let body = req.body();
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(Value::Null);
    }
    serde_json::from_slice(body)
        .map_err(|err| HttpError::bad_request(format!("malformed JSON body: {err}")))
}

/// `400 VALIDATION_ERROR` carrying the schema issues.
pub fn validation_error(err: &SchemaError) -> HttpError {
    HttpError::new(StatusCode::BAD_REQUEST, "VALIDATION_ERROR", "input failed validation")
        .with_details(err.to_json())
}

/// `500 OUTPUT_VALIDATION_ERROR` carrying the schema issues.
pub fn output_validation_error(err: &SchemaError) -> HttpError {
    HttpError::new(
        StatusCode::INTERNAL_SERVER_ERROR,
        "OUTPUT_VALIDATION_ERROR",
        "handler output failed validation",
    )
    .with_details(err.to_json())
}

/// Validates `value` against the route's input schema, if any.
pub fn validate_input(route: &RouteDefinition, value: Value) -> Result<Value, HttpError> {
    match route.input() {
        Some(schema) => schema.parse(value).map_err(|err| validation_error(&err)),
        None => Ok(value),
    }
}

/// Validates `value` against the route's output schema, if any.
pub fn validate_output(route: &RouteDefinition, value: Value) -> Result<Value, HttpError> {
    match route.output() {
        Some(schema) => schema.parse(value).map_err(|err| output_validation_error(&err)),
        None => Ok(value),
    }
}

/// Decodes and validates the request's input.
pub fn read_input(req: &Request, route: &RouteDefinition) -> Result<Value, HttpError> {
    validate_input(route, decode(req)?)
}
