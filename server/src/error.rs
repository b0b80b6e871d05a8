use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("{0}")]
    NotFound(&'static str),

    #[error("{0}")]
    Invalid(&'static str),

    #[error("unauthorized")]
    Unauthorized,

    #[error("forbidden")]
    Forbidden,

    #[error("{0}")]
    Conflict(&'static str),

    #[error("rate_limited")]
    RateLimited,

    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("connection pool error: {0}")]
    Pool(#[from] r2d2::Error),

    #[error("token error: {0}")]
    Token(#[from] jsonwebtoken::errors::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    pub fn status(&self) -> StatusCode {
        match self {
            Error::NotFound(_) => StatusCode::NOT_FOUND,
            Error::Invalid(_) => StatusCode::BAD_REQUEST,
            Error::Unauthorized => StatusCode::UNAUTHORIZED,
            Error::Forbidden => StatusCode::FORBIDDEN,
            Error::Conflict(_) => StatusCode::CONFLICT,
            Error::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            Error::Database(_) | Error::Pool(_) | Error::Token(_) | Error::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Whether this wraps a SQLite constraint violation (UNIQUE, FOREIGN KEY, ...).
    pub fn is_constraint_violation(&self) -> bool {
        matches!(
            self,
            Error::Database(e) if e.sqlite_error_code() == Some(rusqlite::ErrorCode::ConstraintViolation)
        )
    }
}

#[derive(Serialize)]
struct ErrorResp {
    error: String,
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = self.status();
        let error = if status.is_server_error() {
            tracing::error!("request failed: {}", self);
            "internal".to_string()
        } else {
            self.to_string()
        };
        (status, Json(ErrorResp { error })).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_mapping() {
        assert_eq!(Error::NotFound("tweet_not_found").status(), StatusCode::NOT_FOUND);
        assert_eq!(Error::Invalid("empty_text").status(), StatusCode::BAD_REQUEST);
        assert_eq!(Error::Forbidden.status(), StatusCode::FORBIDDEN);
        assert_eq!(Error::Conflict("duplicate_user").status(), StatusCode::CONFLICT);
        assert_eq!(
            Error::Internal("boom".into()).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn codes_render_as_is() {
        assert_eq!(Error::NotFound("status_not_found").to_string(), "status_not_found");
        assert_eq!(Error::Unauthorized.to_string(), "unauthorized");
    }
}
