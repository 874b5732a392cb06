//! Error taxonomy shared by every race operation

use axum::http::StatusCode;

pub type RaceResult<T> = Result<T, RaceError>;

/// Terminal, user-visible failures of race operations.
///
/// None of these are retried by the server; the client re-fetches state and
/// decides what to do next.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RaceError {
    #[error("Race not found")]
    NotFound,

    #[error("{0}")]
    InvalidState(String),

    #[error("{0}")]
    Forbidden(String),

    #[error("Authentication required")]
    Unauthenticated,

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
}

impl RaceError {
    /// Stable wire code sent in `ServerMessage::Error`
    pub fn code(&self) -> &'static str {
        match self {
            RaceError::NotFound => "NOT_FOUND",
            RaceError::InvalidState(_) => "INVALID_STATE",
            RaceError::Forbidden(_) => "FORBIDDEN",
            RaceError::Unauthenticated => "UNAUTHENTICATED",
            RaceError::InvalidArgument(_) => "INVALID_ARGUMENT",
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            RaceError::NotFound => StatusCode::NOT_FOUND,
            RaceError::InvalidState(_) => StatusCode::CONFLICT,
            RaceError::Forbidden(_) => StatusCode::FORBIDDEN,
            RaceError::Unauthenticated => StatusCode::UNAUTHORIZED,
            RaceError::InvalidArgument(_) => StatusCode::BAD_REQUEST,
        }
    }
}
