use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use lingo_core::{AiError, AuthError, DatabaseError, PracticeError};
use log::error;
use thiserror::Error;

use crate::serialized::ErrorBody;

pub type ServerResult<T> = Result<T, ServerError>;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("Missing authorization")]
    MissingToken,
    #[error("Invalid token")]
    InvalidToken(String),
    #[error("Not authenticated")]
    Unauthenticated(String),
    #[error("You don't have access to this {0}")]
    Forbidden(&'static str),
    #[error("{resource}:{identifier} not found")]
    NotFound {
        resource: &'static str,
        identifier: &'static str,
    },
    #[error("Request is invalid")]
    Validation(String),
    #[error("Conflict")]
    Conflict(String),
    #[error("AI backend responded with an error")]
    Upstream { status: u16, body: String },
    #[error("AI backend is unavailable")]
    UpstreamUnavailable(String),
    #[error("Unknown internal error")]
    Unknown(String),
}

impl ServerError {
    fn as_status_code(&self) -> StatusCode {
        match self {
            Self::MissingToken | Self::Unauthenticated(_) => StatusCode::UNAUTHORIZED,
            Self::InvalidToken(_) | Self::Forbidden(_) => StatusCode::FORBIDDEN,
            Self::NotFound { .. } => StatusCode::NOT_FOUND,
            Self::Validation(_) => StatusCode::BAD_REQUEST,
            Self::Conflict(_) => StatusCode::CONFLICT,
            Self::Upstream { status, .. } => StatusCode::from_u16(*status)
                .ok()
                .filter(|s| s.is_client_error() || s.is_server_error())
                .unwrap_or(StatusCode::BAD_GATEWAY),
            Self::UpstreamUnavailable(_) => StatusCode::BAD_GATEWAY,
            Self::Unknown(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn details(&self) -> Option<String> {
        match self {
            Self::InvalidToken(details)
            | Self::Unauthenticated(details)
            | Self::Validation(details)
            | Self::Conflict(details)
            | Self::UpstreamUnavailable(details) => Some(details.clone()),
            Self::Upstream { body, .. } if !body.is_empty() => Some(body.clone()),
            _ => None,
        }
    }
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        if let Self::Unknown(details) = &self {
            error!("Request failed: {}", details);
        }

        let body = ErrorBody {
            error: self.to_string(),
            details: self.details(),
        };

        (self.as_status_code(), Json(body)).into_response()
    }
}

impl From<DatabaseError> for ServerError {
    fn from(value: DatabaseError) -> Self {
        match value {
            DatabaseError::NotFound {
                resource,
                identifier,
            } => Self::NotFound {
                resource,
                identifier,
            },
            e @ DatabaseError::Conflict { .. } => Self::Conflict(e.to_string()),
            e => Self::Unknown(e.to_string()),
        }
    }
}

impl From<AuthError> for ServerError {
    fn from(value: AuthError) -> Self {
        match value {
            AuthError::MissingToken => Self::MissingToken,
            AuthError::InvalidToken(details) => Self::InvalidToken(details),
            e @ (AuthError::UnknownIdentity | AuthError::InvalidCredentials) => {
                Self::Unauthenticated(e.to_string())
            }
            AuthError::ProviderUnavailable(details) => Self::UpstreamUnavailable(details),
            AuthError::Conflict(details) => Self::Conflict(details),
            AuthError::Db(e) => e.into(),
            e => Self::Unknown(e.to_string()),
        }
    }
}

impl From<PracticeError> for ServerError {
    fn from(value: PracticeError) -> Self {
        match value {
            PracticeError::Forbidden(resource) => Self::Forbidden(resource),
            PracticeError::Validation(details) => Self::Validation(details),
            PracticeError::Conflict(details) => Self::Conflict(details),
            PracticeError::Db(e) => e.into(),
        }
    }
}

impl From<AiError> for ServerError {
    fn from(value: AiError) -> Self {
        match value {
            AiError::Upstream { status, body } => Self::Upstream { status, body },
            AiError::Unavailable(details) | AiError::Decode(details) => {
                Self::UpstreamUnavailable(details)
            }
            e => Self::Unknown(e.to_string()),
        }
    }
}

impl From<std::io::Error> for ServerError {
    fn from(value: std::io::Error) -> Self {
        Self::Unknown(value.to_string())
    }
}
