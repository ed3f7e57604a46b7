use actix_web::http::StatusCode;
use actix_web::{HttpResponse, ResponseError};
use rusqlite::ffi;
use thiserror::Error;

use crate::helper::response_helpers::ApiResponse;

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),
    #[error("Authentication required.")]
    Unauthorized,
    #[error("Invalid username or password.")]
    InvalidCredentials,
    #[error("You do not have permission to perform this action.")]
    Forbidden,
    #[error("{0} not found.")]
    NotFound(String),
    #[error("{0}")]
    Conflict(String),
    #[error("{0} timed out. Please narrow the query and try again.")]
    Timeout(String),
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),
    #[error("R2D2 Pool error: {0}")]
    Pool(#[from] r2d2::Error),
    #[error("Password hashing error: {0}")]
    Hash(#[from] bcrypt::BcryptError),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Serde JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
    #[error("Blocking task was cancelled")]
    Blocking(#[from] actix_web::error::BlockingError),
    #[error("{0}")]
    Internal(String),
}

pub type ApiResult<T> = Result<T, ApiError>;

impl ApiError {
    pub fn not_found(what: &str) -> Self {
        ApiError::NotFound(what.to_string())
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        ApiError::BadRequest(message.into())
    }

    /// Maps a failed INSERT/UPDATE into a user-facing error. Unique violations become 409
    /// with `conflict_message`, foreign key violations become 400.
    pub fn from_write(e: rusqlite::Error, conflict_message: &str) -> Self {
        if let rusqlite::Error::SqliteFailure(err, _) = &e {
            match err.extended_code {
                ffi::SQLITE_CONSTRAINT_UNIQUE | ffi::SQLITE_CONSTRAINT_PRIMARYKEY => {
                    return ApiError::Conflict(conflict_message.to_string());
                }
                ffi::SQLITE_CONSTRAINT_FOREIGNKEY => {
                    return ApiError::BadRequest("A referenced record does not exist.".to_string());
                }
                _ => {}
            }
        }
        ApiError::Database(e)
    }

    /// Maps a failed DELETE. A row still referenced elsewhere becomes 409 with `in_use_message`.
    pub fn from_delete(e: rusqlite::Error, in_use_message: &str) -> Self {
        if let rusqlite::Error::SqliteFailure(err, _) = &e {
            if err.extended_code == ffi::SQLITE_CONSTRAINT_FOREIGNKEY {
                return ApiError::Conflict(in_use_message.to_string());
            }
        }
        ApiError::Database(e)
    }

    fn is_internal(&self) -> bool {
        self.status_code().is_server_error() && !matches!(self, ApiError::Timeout(_))
    }
}

impl ResponseError for ApiError {
    fn status_code(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Unauthorized | ApiError::InvalidCredentials => StatusCode::UNAUTHORIZED,
            ApiError::Forbidden => StatusCode::FORBIDDEN,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        let message = if self.is_internal() {
            log::error!("Request failed: {}", self);
            "Internal server error".to_string()
        } else {
            self.to_string()
        };
        HttpResponse::build(self.status_code()).json(ApiResponse::<()>::failure(message))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rusqlite::Connection;

    fn status_of(err: ApiError) -> StatusCode {
        err.error_response().status()
    }

    #[test]
    fn client_errors_keep_their_status() {
        assert_eq!(status_of(ApiError::not_found("Tag")), StatusCode::NOT_FOUND);
        assert_eq!(status_of(ApiError::Unauthorized), StatusCode::UNAUTHORIZED);
        assert_eq!(status_of(ApiError::Forbidden), StatusCode::FORBIDDEN);
        assert_eq!(status_of(ApiError::bad_request("oops")), StatusCode::BAD_REQUEST);
        assert_eq!(status_of(ApiError::Conflict("dup".into())), StatusCode::CONFLICT);
        assert_eq!(status_of(ApiError::Timeout("Report".into())), StatusCode::GATEWAY_TIMEOUT);
    }

    #[test]
    fn internal_errors_return_500() {
        assert_eq!(
            status_of(ApiError::Internal("boom".into())),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn unique_violation_becomes_conflict() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch("CREATE TABLE t (name TEXT NOT NULL UNIQUE); INSERT INTO t VALUES ('a');")
            .unwrap();
        let err = conn.execute("INSERT INTO t VALUES ('a')", []).unwrap_err();
        match ApiError::from_write(err, "Name already exists.") {
            ApiError::Conflict(msg) => assert_eq!(msg, "Name already exists."),
            other => panic!("expected conflict, got {:?}", other),
        }
    }

    #[test]
    fn foreign_key_violation_becomes_bad_request() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(
            "PRAGMA foreign_keys = ON;
             CREATE TABLE parent (id INTEGER PRIMARY KEY);
             CREATE TABLE child (parent_id INTEGER NOT NULL REFERENCES parent(id));",
        )
        .unwrap();
        let err = conn.execute("INSERT INTO child VALUES (42)", []).unwrap_err();
        assert!(matches!(ApiError::from_write(err, "dup"), ApiError::BadRequest(_)));
    }
}
