use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use thiserror::Error;
use tracing::error;

pub const NO_ACCOUNT: &str = "No account exists with that email";
pub const RESET_INVALID: &str = "Password reset is invalid or has expired";

#[derive(Error, Debug)]
pub enum AppError {
    #[error("{field} {reason}")]
    Validation {
        field: &'static str,
        reason: &'static str,
    },

    #[error("{0} not found")]
    NotFound(&'static str),

    #[error("You must own a store to edit it")]
    OwnershipViolation,

    /// Deliberately coarse: never says which check failed.
    #[error("{0}")]
    AuthResetInvalid(&'static str),

    #[error("Passwords do not match")]
    PasswordMismatch,

    #[error("Invalid credentials")]
    InvalidCredentials,

    #[error("Email already registered")]
    EmailTaken,

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl AppError {
    pub fn required(field: &'static str) -> Self {
        AppError::Validation {
            field,
            reason: "is required",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            AppError::Validation { .. } => StatusCode::BAD_REQUEST,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::OwnershipViolation => StatusCode::FORBIDDEN,
            AppError::AuthResetInvalid(_) => StatusCode::BAD_REQUEST,
            AppError::PasswordMismatch => StatusCode::BAD_REQUEST,
            AppError::InvalidCredentials => StatusCode::UNAUTHORIZED,
            AppError::EmailTaken => StatusCode::CONFLICT,
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!(error = %self, "request failed");
        }
        (status, self.to_string()).into_response()
    }
}
