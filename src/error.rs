use actix_web::{http::StatusCode, HttpResponse, ResponseError};
use std::fmt;

/// Coarse classification used for logging and status mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    BackendUnavailable,
    QueryFailed,
    /// A secondary query failed and the report went on without it. Never surfaced.
    PartialDegradation,
    BadRequest,
    Unauthenticated,
    Unauthorized,
    NotFound,
    Conflict,
    Internal,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::BackendUnavailable => "backend_unavailable",
            ErrorKind::QueryFailed => "query_failed",
            ErrorKind::PartialDegradation => "partial_degradation",
            ErrorKind::BadRequest => "bad_request",
            ErrorKind::Unauthenticated => "unauthenticated",
            ErrorKind::Unauthorized => "unauthorized",
            ErrorKind::NotFound => "not_found",
            ErrorKind::Conflict => "conflict",
            ErrorKind::Internal => "internal",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    MethodNotAllowed,
    NotFound(String),
    Unauthorized(String),
    Forbidden(String),
    Conflict(String),
    BackendUnavailable(String),
    QueryFailed(String),
    InternalServerError(String),
    ValidationError(String),
    DatabaseError(sqlx::Error),
}

pub type ApiResult<T> = Result<T, ApiError>;

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ApiError::BadRequest(msg) => write!(f, "{}", msg),
            ApiError::MethodNotAllowed => write!(f, "Metode tidak diizinkan"),
            ApiError::NotFound(msg) => write!(f, "{}", msg),
            ApiError::Unauthorized(msg) => write!(f, "{}", msg),
            ApiError::Forbidden(msg) => write!(f, "{}", msg),
            ApiError::Conflict(msg) => write!(f, "{}", msg),
            ApiError::BackendUnavailable(msg) => write!(f, "{}", msg),
            ApiError::QueryFailed(msg) => write!(f, "Query failed: {}", msg),
            ApiError::InternalServerError(msg) => write!(f, "{}", msg),
            ApiError::ValidationError(msg) => write!(f, "Validation error: {}", msg),
            ApiError::DatabaseError(err) => write!(f, "Database error: {}", err),
        }
    }
}

impl std::error::Error for ApiError {}

impl ApiError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ApiError::BadRequest(_) | ApiError::MethodNotAllowed | ApiError::ValidationError(_) => {
                ErrorKind::BadRequest
            }
            ApiError::NotFound(_) => ErrorKind::NotFound,
            ApiError::Unauthorized(_) => ErrorKind::Unauthenticated,
            ApiError::Forbidden(_) => ErrorKind::Unauthorized,
            ApiError::Conflict(_) => ErrorKind::Conflict,
            ApiError::BackendUnavailable(_) => ErrorKind::BackendUnavailable,
            ApiError::QueryFailed(_) | ApiError::DatabaseError(_) => ErrorKind::QueryFailed,
            ApiError::InternalServerError(_) => ErrorKind::Internal,
        }
    }

    pub fn bad_request(msg: &str) -> Self {
        ApiError::BadRequest(msg.to_string())
    }

    pub fn user_not_found() -> Self {
        ApiError::NotFound("Pengguna tidak ditemukan".to_string())
    }

    pub fn username_taken() -> Self {
        ApiError::Conflict("Username sudah digunakan".to_string())
    }

    pub fn invalid_user_id() -> Self {
        ApiError::BadRequest("ID pengguna tidak valid".to_string())
    }

    pub fn unauthenticated() -> Self {
        ApiError::Unauthorized("Tidak terautentikasi".to_string())
    }

    pub fn forbidden() -> Self {
        ApiError::Forbidden("Tidak memiliki izin".to_string())
    }

    pub fn admin_required() -> Self {
        ApiError::Forbidden("Akses ditolak: Memerlukan hak admin".to_string())
    }
}

// Error bodies are plain text; only successful responses use the JSON envelope.
impl ResponseError for ApiError {
    fn status_code(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) | ApiError::ValidationError(_) => StatusCode::BAD_REQUEST,
            ApiError::MethodNotAllowed => StatusCode::METHOD_NOT_ALLOWED,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ApiError::Forbidden(_) => StatusCode::FORBIDDEN,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::BackendUnavailable(_)
            | ApiError::QueryFailed(_)
            | ApiError::DatabaseError(_)
            | ApiError::InternalServerError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        HttpResponse::build(self.status_code())
            .content_type("text/plain; charset=utf-8")
            .body(self.to_string())
    }
}

/// Fallback for routes hit with an unsupported HTTP method.
pub async fn method_not_allowed() -> ApiResult<HttpResponse> {
    Err(ApiError::MethodNotAllowed)
}

impl From<sqlx::Error> for ApiError {
    fn from(err: sqlx::Error) -> Self {
        ApiError::DatabaseError(err)
    }
}

impl From<validator::ValidationErrors> for ApiError {
    fn from(err: validator::ValidationErrors) -> Self {
        ApiError::ValidationError(err.to_string())
    }
}
