use std::fmt;

use axum::{
    extract::rejection::JsonRejection,
    http::StatusCode,
    response::{IntoResponse, Response},
};

use crate::chart::MountError;
use crate::models::{StatementId, VoterId};

/// Entity a lookup failed on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Entity {
    Statement(StatementId),
    Voter(VoterId),
}

impl fmt::Display for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Entity::Statement(id) => write!(f, "statement {id}"),
            Entity::Voter(id) => write!(f, "voter {id}"),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("{0} not found")]
    NotFound(Entity),

    #[error("invalid choice `{0}`, expected agree, skip or disagree")]
    InvalidChoice(String),

    #[error("statement text must not be empty")]
    EmptyStatement,

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error(transparent)]
    Mount(#[from] MountError),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

// ===== HTTP =====

#[derive(Debug)]
pub enum AppError {
    Unauthorized,
    BadRequest(String),
    NotFound(String),
    Internal(Error),
}

impl From<Error> for AppError {
    fn from(err: Error) -> Self {
        match err {
            Error::NotFound(entity) => AppError::NotFound(format!("{entity} not found")),
            err @ (Error::InvalidChoice(_) | Error::EmptyStatement) => {
                AppError::BadRequest(err.to_string())
            }
            err => AppError::Internal(err),
        }
    }
}

/// Malformed or mistyped JSON bodies are client errors like any other.
impl From<JsonRejection> for AppError {
    fn from(rejection: JsonRejection) -> Self {
        AppError::BadRequest(rejection.body_text())
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            AppError::Unauthorized => (
                StatusCode::UNAUTHORIZED,
                "Unauthorized - Invalid or missing credentials".to_string(),
            ),
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            AppError::Internal(err) => {
                tracing::error!("Internal error: {:?}", err);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error".to_string(),
                )
            }
        };

        (status, message).into_response()
    }
}
