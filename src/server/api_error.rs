//! Errors returned by our JSON API.
//!
//! Clients only ever see a short, fixed message. The real cause of a server
//! error is logged, and never sent over the wire.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use schemars::JsonSchema;

use crate::prelude::*;

/// The JSON body of an error response.
#[derive(Clone, Debug, Deserialize, JsonSchema, PartialEq, Serialize)]
pub struct ErrorBody {
    /// A human-readable error message.
    pub error: String,
}

/// An error which can be returned from an API handler.
#[derive(Debug)]
pub enum ApiError {
    /// The upload had no `image` file.
    NoImageProvided,

    /// We have no result with the requested ID.
    ResultNotFound,

    /// Anything else. Reported as a generic processing failure.
    Internal(anyhow::Error),
}

impl ApiError {
    /// The HTTP status for this error.
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::NoImageProvided => StatusCode::BAD_REQUEST,
            ApiError::ResultNotFound => StatusCode::NOT_FOUND,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// The message we show to clients.
    pub fn message(&self) -> &'static str {
        match self {
            ApiError::NoImageProvided => "No image provided",
            ApiError::ResultNotFound => "Result not found",
            ApiError::Internal(_) => "Failed to process image",
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if let ApiError::Internal(err) = &self {
            error!("OCR API error: {:?}", err);
        }
        let body = ErrorBody {
            error: self.message().to_owned(),
        };
        (self.status(), Json(body)).into_response()
    }
}

impl<E> From<E> for ApiError
where
    E: Into<anyhow::Error>,
{
    fn from(err: E) -> Self {
        ApiError::Internal(err.into())
    }
}
