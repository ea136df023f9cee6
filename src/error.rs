use std::time::Duration;

use axum::{http::StatusCode, response::{IntoResponse, Response}, Json};
use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GoalError {
    #[error("Your goal should be at least 10 characters long.")]
    TooShort { len: usize },
    #[error("Your goal should not exceed 200 characters. Keep it concise!")]
    TooLong { len: usize },
}

/// Failure of the text plan call. Nothing is retried; the caller sees this immediately.
#[derive(Debug, Error)]
pub enum GenerationError {
    #[error("request failed: {0}")]
    Request(String),
    #[error("request timed out after {0:?}")]
    Timeout(Duration),
    #[error("service returned status={status} body={body}")]
    Status { status: u16, body: String },
    #[error("could not decode response: {0}")]
    Decode(String),
    #[error("response contained no plan text")]
    NoContent,
    #[error("plan is missing required field '{0}'")]
    MissingField(&'static str),
    #[error("plan field '{field}' is invalid: {reason}")]
    InvalidField { field: &'static str, reason: String },
}

impl GenerationError {
    pub fn from_reqwest(err: reqwest::Error, timeout: Option<Duration>) -> Self {
        match timeout {
            Some(limit) if err.is_timeout() => Self::Timeout(limit),
            _ => Self::Request(err.to_string()),
        }
    }

    /// Short text for the notice shown to the user. The full error only goes to the log.
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::Request(_) | Self::Status { .. } => "The plan service is unavailable right now. Please try again.",
            Self::Timeout(_) => "The plan service took too long to respond. Please try again.",
            Self::Decode(_) | Self::NoContent | Self::MissingField(_) | Self::InvalidField { .. } => {
                "Received incomplete data from AI for the text plan. Please try again."
            }
        }
    }
}

#[derive(Debug, Error)]
pub enum SubmitError {
    #[error(transparent)]
    Invalid(#[from] GoalError),
    #[error("a plan is already being generated")]
    Busy,
}

#[derive(Debug, Error)]
pub enum ExportError {
    #[error("there is no plan to export")]
    NoPlan,
    #[error("infographic image is not available for download")]
    NoInfographic,
    #[error("infographic is not a valid data URI: {0}")]
    InvalidDataUri(String),
    #[error("could not encode image: {0}")]
    Encode(#[from] image::ImageError),
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub field: Option<&'static str>,
}

/// Everything a handler can fail with, mapped onto a status code and an `ErrorResponse` body.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    Submit(#[from] SubmitError),
    #[error(transparent)]
    Export(#[from] ExportError),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code, field) = match &self {
            ApiError::Submit(SubmitError::Invalid(GoalError::TooShort { .. })) => {
                (StatusCode::UNPROCESSABLE_ENTITY, "GOAL_TOO_SHORT", Some("goal"))
            }
            ApiError::Submit(SubmitError::Invalid(GoalError::TooLong { .. })) => {
                (StatusCode::UNPROCESSABLE_ENTITY, "GOAL_TOO_LONG", Some("goal"))
            }
            ApiError::Submit(SubmitError::Busy) => (StatusCode::CONFLICT, "GENERATION_IN_PROGRESS", None),
            ApiError::Export(ExportError::NoPlan) => (StatusCode::NOT_FOUND, "NO_PLAN", None),
            ApiError::Export(ExportError::NoInfographic) => (StatusCode::NOT_FOUND, "NO_INFOGRAPHIC", None),
            ApiError::Export(ExportError::InvalidDataUri(_)) | ApiError::Export(ExportError::Encode(_)) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "EXPORT_FAILED", None)
            }
        };
        let body = ErrorResponse { error: self.to_string(), code, field };
        (status, Json(body)).into_response()
    }
}
