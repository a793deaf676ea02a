//! Request extractors whose rejections render as `ApiError`, so malformed
//! bodies, query strings and path segments get the same envelope as every
//! other failure.

use axum::{
    extract::{
        rejection::{JsonRejection, PathRejection, QueryRejection},
        FromRequest, FromRequestParts,
    },
    response::{IntoResponse, Response},
};
use serde::Serialize;

use crate::{error::ApiError, validation::FieldError};

#[derive(Debug, FromRequest)]
#[from_request(via(axum::Json), rejection(ApiError))]
pub struct Json<T>(pub T);

impl<T: Serialize> IntoResponse for Json<T> {
    fn into_response(self) -> Response {
        axum::Json(self.0).into_response()
    }
}

#[derive(Debug, FromRequestParts)]
#[from_request(via(axum::extract::Query), rejection(ApiError))]
pub struct Query<T>(pub T);

#[derive(Debug, FromRequestParts)]
#[from_request(via(axum::extract::Path), rejection(ApiError))]
pub struct Path<T>(pub T);

/// Splits a rejection text of the form `<summary>: <field path>: <reason>`.
/// Texts without a field path are reported under `fallback`.
fn field_error(text: &str, fallback: &str) -> FieldError {
    let detail = text.split_once(": ").map_or(text, |(_, rest)| rest);
    match detail.split_once(": ") {
        Some((path, reason)) if !path.is_empty() && !path.contains(char::is_whitespace) => {
            FieldError::new(path, reason)
        }
        _ => FieldError::new(fallback, detail),
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        match rejection {
            JsonRejection::JsonDataError(e) => ApiError::Validation(vec![field_error(&e.body_text(), "body")]),
            JsonRejection::JsonSyntaxError(_) => {
                ApiError::BadRequest("INVALID_JSON", "Request body is not valid JSON".into())
            }
            JsonRejection::MissingJsonContentType(_) => ApiError::BadRequest(
                "INVALID_JSON",
                "Expected request with `Content-Type: application/json`".into(),
            ),
            other => ApiError::BadRequest("INVALID_BODY", other.body_text()),
        }
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        ApiError::Validation(vec![field_error(&rejection.body_text(), "query")])
    }
}

impl From<PathRejection> for ApiError {
    fn from(rejection: PathRejection) -> Self {
        match rejection {
            PathRejection::FailedToDeserializePathParams(e) => {
                ApiError::Validation(vec![field_error(&e.body_text(), "path")])
            }
            other => ApiError::Internal(format!("path extraction: {}", other.body_text())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn field_path_is_lifted_out_of_the_message() {
        let e = field_error(
            "Failed to deserialize the JSON body into the target type: patient_id: invalid type: string \"abc\", expected i64 at line 1 column 17",
            "body",
        );
        assert_eq!(e.field, "patient_id");
        assert!(e.message.starts_with("invalid type"));
    }

    #[test]
    fn messages_without_a_path_use_the_fallback() {
        let e = field_error("Invalid URL: Cannot parse `abc` to a `i64`", "path");
        assert_eq!(e.field, "path");
        assert_eq!(e.message, "Cannot parse `abc` to a `i64`");

        let e = field_error(
            "Failed to deserialize the JSON body into the target type: invalid type: sequence, expected struct",
            "body",
        );
        assert_eq!(e.field, "body");
    }
}
