use actix_web::error::BlockingError;
use actix_web::http::StatusCode;
use actix_web::{HttpResponse, ResponseError};
use thiserror::Error;

use crate::models::ErrorBody;

/// Failures while bringing the service up. All of them are fatal.
#[derive(Debug, Error)]
pub enum StartupError {
    #[error("invalid configuration: {0}")]
    Config(String),
    #[error("failed to load tokenizer from {path}: {reason}")]
    Tokenizer { path: String, reason: String },
    #[error("failed to load ONNX model from {path}: {reason}")]
    Model { path: String, reason: String },
    #[error("failed to read label table from {path}: {reason}")]
    Labels { path: String, reason: String },
}

/// Failures raised by a classifier while handling a batch.
#[derive(Debug, Error)]
pub enum InferenceError {
    #[error("tokenization failed: {0}")]
    Tokenization(String),
    #[error("model run failed: {0}")]
    Runtime(String),
    #[error("unexpected model output: {0}")]
    Output(String),
    #[error("classifier returned {actual} results for {expected} inputs")]
    LengthMismatch { expected: usize, actual: usize },
}

/// Errors that reach the HTTP boundary from the predict handler.
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error(transparent)]
    Inference(#[from] InferenceError),
    #[error("blocking worker failed")]
    Blocking(#[from] BlockingError),
}

impl ResponseError for ServiceError {
    fn status_code(&self) -> StatusCode {
        StatusCode::INTERNAL_SERVER_ERROR
    }

    fn error_response(&self) -> HttpResponse {
        tracing::error!(error = %self, "prediction failed");
        HttpResponse::build(self.status_code()).json(ErrorBody {
            detail: "Internal Server Error".to_string(),
        })
    }
}
