//! Error types for the query engine and its connection handle.

use apikit_errors::{ErrorCode, Problem};
use thiserror::Error;

/// Result alias used by API-facing operations.
pub type ApiResult<T> = std::result::Result<T, ApiError>;

/// Errors raised while opening the database handle.
#[derive(Debug, Error)]
pub enum DbError {
    #[error("Unknown DSN: {0}")]
    UnknownDsn(String),

    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
}

/// Failure of a single API call.
///
/// Every variant maps onto one of the three client-visible error codes, see
/// [`ApiError::code`]. Storage failures keep their source error for logging but
/// are reported to clients as internal errors.
#[derive(Debug, Error)]
pub enum ApiError {
    /// Malformed, unknown or missing call parameters.
    #[error("{0}")]
    Parameters(String),

    /// The caller lacks access to a referenced object, or it does not exist.
    #[error("{0}")]
    Permissions(String),

    #[error("{0}")]
    Internal(String),

    #[error("database error: {0}")]
    Db(#[from] sqlx::Error),

    #[error("connection error: {0}")]
    Connect(#[from] DbError),

    #[error("configuration error: {0}")]
    Config(#[from] Box<figment::Error>),
}

impl From<figment::Error> for ApiError {
    fn from(value: figment::Error) -> Self {
        ApiError::Config(Box::new(value))
    }
}

impl ApiError {
    pub fn parameters(msg: impl Into<String>) -> Self {
        ApiError::Parameters(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        ApiError::Internal(msg.into())
    }

    /// The permission error returned by write paths for hidden or missing objects.
    #[must_use]
    pub fn no_permissions() -> Self {
        ApiError::Permissions("No permissions to referred object or it does not exist!".to_owned())
    }

    #[must_use]
    pub fn code(&self) -> ErrorCode {
        match self {
            ApiError::Parameters(_) => ErrorCode::Parameters,
            ApiError::Permissions(_) => ErrorCode::Permissions,
            ApiError::Internal(_) | ApiError::Db(_) | ApiError::Connect(_) | ApiError::Config(_) => {
                ErrorCode::Internal
            }
        }
    }

    /// Render the error for clients. Storage details are not leaked.
    pub fn to_problem(&self) -> Problem {
        let detail = match self {
            ApiError::Parameters(msg) | ApiError::Permissions(msg) | ApiError::Internal(msg) => {
                msg.clone()
            }
            ApiError::Db(_) | ApiError::Connect(_) => "Database error.".to_owned(),
            ApiError::Config(_) => "Configuration error.".to_owned(),
        };
        self.code().def().as_problem(detail)
    }
}
