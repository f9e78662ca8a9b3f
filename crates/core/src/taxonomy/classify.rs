//! Classification of raw adapter failures into [`ApiError`].

use std::io;
use std::time::Duration;

use super::{ApiError, ErrorContext, FieldError};

/// HTTP statuses that are worth another attempt.
pub const RETRYABLE_STATUS_CODES: [u16; 6] = [408, 429, 500, 502, 503, 504];

/// OS-level codes that indicate a transient connection problem.
const TRANSIENT_CODES: &[&str] =
    &["ECONNRESET", "ETIMEDOUT", "ECONNREFUSED", "ENOTFOUND", "EAI_AGAIN", "EPIPE", "ECONNABORTED", "ESOCKETTIMEDOUT"];

/// Codes that mean the call ran out of time rather than lost its connection.
const TIMEOUT_CODES: &[&str] = &["ETIMEDOUT", "ESOCKETTIMEDOUT"];

/// Unclassified failure as produced by a source adapter.
///
/// Adapters return this so they can use `?` on transport and I/O errors;
/// the aggregation pipeline normalizes it at the boundary.
#[derive(Debug, thiserror::Error)]
pub enum RawError {
    /// Non-success HTTP response.
    #[error("HTTP {status}: {message}")]
    Http { status: u16, message: String, retry_after: Option<Duration>, fields: Vec<FieldError> },

    /// I/O failure below HTTP.
    #[error("I/O error ({kind:?}): {message}")]
    Io { kind: io::ErrorKind, message: String },

    /// OS-style error code, e.g. `ECONNRESET`.
    #[error("system error {0}")]
    Code(String),

    /// Unstructured failure.
    #[error("{0}")]
    Message(String),

    /// Already classified; passed through unchanged.
    #[error(transparent)]
    Api(#[from] ApiError),
}

impl RawError {
    pub fn http(status: u16, message: impl Into<String>) -> Self {
        RawError::Http { status, message: message.into(), retry_after: None, fields: Vec::new() }
    }

    pub fn message(message: impl Into<String>) -> Self {
        RawError::Message(message.into())
    }
}

impl From<io::Error> for RawError {
    fn from(err: io::Error) -> Self {
        RawError::Io { kind: err.kind(), message: err.to_string() }
    }
}

impl From<reqwest::Error> for RawError {
    fn from(err: reqwest::Error) -> Self {
        let message = err.to_string();
        if err.is_timeout() {
            RawError::Io { kind: io::ErrorKind::TimedOut, message }
        } else if err.is_connect() {
            RawError::Io { kind: io::ErrorKind::ConnectionRefused, message }
        } else if let Some(status) = err.status() {
            RawError::Http { status: status.as_u16(), message, retry_after: None, fields: Vec::new() }
        } else if err.is_request() {
            RawError::Io { kind: io::ErrorKind::ConnectionAborted, message }
        } else {
            RawError::Message(message)
        }
    }
}

fn is_retryable_status(status: u16) -> bool {
    RETRYABLE_STATUS_CODES.contains(&status)
}

fn is_transient_io(kind: io::ErrorKind) -> bool {
    matches!(
        kind,
        io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionRefused
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::BrokenPipe
            | io::ErrorKind::TimedOut
            | io::ErrorKind::NotConnected
            | io::ErrorKind::UnexpectedEof
    )
}

fn is_transient_code(code: &str) -> bool {
    TRANSIENT_CODES.iter().any(|c| c.eq_ignore_ascii_case(code))
}

/// Whether a raw failure is worth retrying.
///
/// True if the failure is already typed and flagged retryable, is a known
/// transient network condition, or carries a status in
/// [`RETRYABLE_STATUS_CODES`].
pub fn is_retryable_error(err: &RawError) -> bool {
    match err {
        RawError::Api(api) => api.is_retryable() || api.status_code().is_some_and(is_retryable_status),
        RawError::Http { status, .. } => is_retryable_status(*status),
        RawError::Io { kind, .. } => is_transient_io(*kind),
        RawError::Code(code) => is_transient_code(code),
        RawError::Message(_) => false,
    }
}

/// Map an arbitrary adapter failure into exactly one [`ApiError`] kind.
pub fn normalize_error(raw: RawError, provider: &str, endpoint: &str) -> ApiError {
    let retryable = is_retryable_error(&raw);
    match raw {
        RawError::Api(err) => err,
        RawError::Http { status, message, retry_after, fields } => {
            let context = ErrorContext::new(provider, endpoint, message);
            match status {
                429 => ApiError::RateLimit { context, retry_after },
                401 | 403 => ApiError::Authentication { context, status },
                400 => ApiError::Validation { context, fields },
                408 => ApiError::Timeout { context },
                _ => ApiError::Api { context, status: Some(status), retryable },
            }
        }
        RawError::Io { kind, message } => {
            let context = ErrorContext::new(provider, endpoint, message);
            if kind == io::ErrorKind::TimedOut {
                ApiError::Timeout { context }
            } else if retryable {
                ApiError::Network { context, code: Some(format!("{kind:?}")) }
            } else {
                ApiError::Api { context, status: None, retryable: false }
            }
        }
        RawError::Code(code) => {
            let context = ErrorContext::new(provider, endpoint, format!("system error {code}"));
            if TIMEOUT_CODES.iter().any(|c| c.eq_ignore_ascii_case(&code)) {
                ApiError::Timeout { context }
            } else if retryable {
                ApiError::Network { context, code: Some(code) }
            } else {
                ApiError::Api { context, status: None, retryable: false }
            }
        }
        RawError::Message(message) => {
            ApiError::Api { context: ErrorContext::new(provider, endpoint, message), status: None, retryable: false }
        }
    }
}
