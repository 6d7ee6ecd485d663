//! Error types for storefront-sync
//!
//! Every failure that can reach a consumer is classified into one [`ErrorKind`].
//! The kind decides how the failure is surfaced: whether it is retryable, whether it
//! is shown to the user, and whether it clears cached data.
//!
//! All error types are `Clone + PartialEq` so they can live inside cached results,
//! [`Snapshot`](crate::state::Snapshot)s and the shared output of a single-flight call.

use std::fmt;

use thiserror::Error;

/// Classification of a failed backend interaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// The request never reached the server.
    Network,
    /// The fetcher gave up waiting for a response.
    Timeout,
    /// 401: the session is no longer valid.
    Unauthorized,
    /// 403: the session is valid but lacks permission.
    Forbidden,
    /// 400: the request was rejected with field-level messages.
    Validation,
    /// 5xx: the server failed.
    ServerFault,
    /// The request conflicts with current server state (e.g. quantity above stock).
    Conflict,
    /// The response could not be decoded.
    Decode,
    /// Persisted client storage failed.
    Storage,
    /// The response arrived after its requester was torn down or re-keyed.
    Superseded,
}

impl ErrorKind {
    /// Whether the user may retry the operation as-is.
    pub fn is_retryable(self) -> bool {
        matches!(self, Self::Network | Self::Timeout | Self::ServerFault)
    }

    /// Whether the failure should be rendered as a user-facing error.
    ///
    /// Unauthorized is deliberately silent: the identity layer owns the redirect.
    pub fn is_user_facing(self) -> bool {
        !matches!(self, Self::Unauthorized | Self::Superseded)
    }

    /// Whether the failure invalidates cached data for the key.
    pub fn clears_cache(self) -> bool {
        matches!(self, Self::Unauthorized)
    }

    /// Whether authoritative state must be re-fetched before retrying.
    pub fn requires_refetch(self) -> bool {
        matches!(self, Self::Conflict)
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Network => "network",
            Self::Timeout => "timeout",
            Self::Unauthorized => "unauthorized",
            Self::Forbidden => "forbidden",
            Self::Validation => "validation",
            Self::ServerFault => "server fault",
            Self::Conflict => "conflict",
            Self::Decode => "decode",
            Self::Storage => "storage",
            Self::Superseded => "superseded",
        };
        f.write_str(label)
    }
}

/// A single field-level validation message returned with a 400.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldError {
    pub field: String,
    pub message: String,
}

/// Unified error for every fetch, mutation and cache operation.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SyncError {
    #[error("network error: {0}")]
    Network(String),
    #[error("request timed out")]
    Timeout,
    #[error("session expired or not authenticated")]
    Unauthorized,
    #[error("permission denied: {0}")]
    Forbidden(String),
    #[error("validation failed: {message}")]
    Validation {
        message: String,
        fields: Vec<FieldError>,
    },
    #[error("server error ({status}): {message}")]
    ServerFault { status: u16, message: String },
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("malformed response: {0}")]
    Decode(String),
    #[error("client storage error: {0}")]
    Storage(String),
    #[error("response discarded: requester was torn down or re-keyed")]
    Superseded,
}

impl SyncError {
    /// The classification of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Network(_) => ErrorKind::Network,
            Self::Timeout => ErrorKind::Timeout,
            Self::Unauthorized => ErrorKind::Unauthorized,
            Self::Forbidden(_) => ErrorKind::Forbidden,
            Self::Validation { .. } => ErrorKind::Validation,
            Self::ServerFault { .. } => ErrorKind::ServerFault,
            Self::Conflict(_) => ErrorKind::Conflict,
            Self::Decode(_) => ErrorKind::Decode,
            Self::Storage(_) => ErrorKind::Storage,
            Self::Superseded => ErrorKind::Superseded,
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.kind().is_retryable()
    }

    pub fn is_user_facing(&self) -> bool {
        self.kind().is_user_facing()
    }

    pub fn clears_cache(&self) -> bool {
        self.kind().clears_cache()
    }

    /// Classify a non-success HTTP status.
    ///
    /// `body` is the (possibly empty) response text; it becomes the error message.
    /// 404 and 409 are both treated as conflicts with server state.
    pub fn from_status(status: u16, body: impl Into<String>) -> Self {
        let message = body.into();
        match status {
            400 | 422 => Self::Validation {
                message,
                fields: Vec::new(),
            },
            401 => Self::Unauthorized,
            403 => Self::Forbidden(message),
            404 | 409 => Self::Conflict(message),
            408 | 504 => Self::Timeout,
            500..=599 => Self::ServerFault { status, message },
            _ => Self::Network(format!("unexpected status {status}: {message}")),
        }
    }

    /// Field-level messages for validation errors, empty otherwise.
    pub fn field_errors(&self) -> &[FieldError] {
        match self {
            Self::Validation { fields, .. } => fields,
            _ => &[],
        }
    }
}

impl From<serde_json::Error> for SyncError {
    fn from(err: serde_json::Error) -> Self {
        Self::Decode(err.to_string())
    }
}

/// Result alias for fetches and mutations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Errors raised by persisted client storage backends.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum StorageError {
    #[error("failed to serialize entry '{key}': {message}")]
    Serialize { key: String, message: String },
    #[error("failed to deserialize entry '{key}': {message}")]
    Deserialize { key: String, message: String },
    #[error("storage I/O failed: {0}")]
    Io(String),
}

impl From<StorageError> for SyncError {
    fn from(err: StorageError) -> Self {
        Self::Storage(err.to_string())
    }
}

impl From<std::io::Error> for StorageError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

/// One cart line that cannot be checked out as-is.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StockViolation {
    pub product_id: u64,
    pub name: Option<String>,
    pub requested: u32,
    pub available: u32,
}

impl fmt::Display for StockViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.name {
            Some(name) => write!(
                f,
                "{name} (#{}): requested {}, {} in stock",
                self.product_id, self.requested, self.available
            ),
            None => write!(
                f,
                "product #{}: requested {}, {} in stock",
                self.product_id, self.requested, self.available
            ),
        }
    }
}

/// Errors raised by the checkout lifecycle.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CheckoutError {
    #[error("cannot check out an empty cart")]
    EmptyCart,
    #[error("insufficient stock: {}", join_violations(.0))]
    InsufficientStock(Vec<StockViolation>),
    #[error("operation not allowed while checkout is {0}")]
    InvalidState(&'static str),
    #[error("provider return URL is not recognised: {0}")]
    UnrecognisedReturn(String),
    #[error(transparent)]
    Backend(#[from] SyncError),
}

impl CheckoutError {
    /// Whether a "try again" action makes sense for this failure.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Backend(err) => err.is_retryable(),
            _ => false,
        }
    }
}

impl From<StorageError> for CheckoutError {
    fn from(err: StorageError) -> Self {
        Self::Backend(err.into())
    }
}

fn join_violations(violations: &[StockViolation]) -> String {
    let listed = violations
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ");
    format!("{} item(s): {listed}", violations.len())
}
