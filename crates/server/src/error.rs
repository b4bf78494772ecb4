use anyhow::Error;
use rocket::{
    Request,
    http::Status,
    response::{Responder, status::Custom},
    serde::json::Json,
};
use serde::Serialize;
use thiserror::Error;

pub const NO_MESSAGES: &str = "No messages provided";
pub const MISSING_INPUTS: &str = "Missing prompt or image";
pub const BODY_TOO_LARGE: &str = "Request body exceeds the configured limit";

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),
    #[error("{0}")]
    PayloadTooLarge(String),
    #[error("{0}")]
    Internal(String),
}

impl ApiError {
    pub fn status(&self) -> Status {
        match self {
            ApiError::BadRequest(_) => Status::BadRequest,
            ApiError::PayloadTooLarge(_) => Status::PayloadTooLarge,
            ApiError::Internal(_) => Status::InternalServerError,
        }
    }

    /// Rejections of the request itself, as opposed to processing failures.
    pub fn is_client_error(&self) -> bool {
        self.status().class().is_client_error()
    }
}

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        ApiError::Internal(format!("{err:#}"))
    }
}

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: String,
}

/// Rocket-level failures under `/v1` keep the `{"error": ...}` shape.
#[catch(default)]
pub fn json_catcher(status: Status, _request: &Request<'_>) -> Custom<Json<ErrorBody>> {
    let error = status.reason().unwrap_or("Unknown Error").to_string();
    Custom(status, Json(ErrorBody { error }))
}

impl<'r> Responder<'r, 'static> for ApiError {
    fn respond_to(self, request: &'r Request<'_>) -> rocket::response::Result<'static> {
        let status = self.status();
        let body = ErrorBody {
            error: self.to_string(),
        };
        Custom(status, Json(body)).respond_to(request)
    }
}
