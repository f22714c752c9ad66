//! Classify transport failures for retry decisions and log fields.

use super::error::AttemptError;
use crate::transport::FetchError;

/// Coarse failure category, reported alongside each failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Connect or stall timeout.
    Timeout,
    /// Network-level failure (DNS, refused, reset).
    Connection,
    /// Non-2xx HTTP status.
    Http(u32),
    /// Local disk failure while writing the download.
    Storage,
    /// Transfer stopped by the cancellation signal.
    Cancelled,
    Other,
}

/// Classify a curl error.
pub fn classify_curl_error(e: &curl::Error) -> ErrorKind {
    if e.is_operation_timedout() {
        return ErrorKind::Timeout;
    }
    if e.is_aborted_by_callback() {
        return ErrorKind::Cancelled;
    }
    if e.is_couldnt_connect()
        || e.is_couldnt_resolve_host()
        || e.is_couldnt_resolve_proxy()
        || e.is_read_error()
        || e.is_recv_error()
        || e.is_send_error()
        || e.is_got_nothing()
        || e.is_partial_file()
    {
        return ErrorKind::Connection;
    }
    if e.is_write_error() {
        return ErrorKind::Storage;
    }
    ErrorKind::Other
}

/// Classify a transport error.
pub fn classify(e: &FetchError) -> ErrorKind {
    match e {
        FetchError::Curl(ce) => classify_curl_error(ce),
        FetchError::Http { code } => ErrorKind::Http(*code),
        FetchError::Io(_) => ErrorKind::Storage,
        FetchError::Aborted => ErrorKind::Cancelled,
    }
}

impl From<FetchError> for AttemptError {
    /// Every transport failure is retried except an aborted transfer,
    /// which is the cancellation signal surfacing through curl.
    fn from(e: FetchError) -> Self {
        match classify(&e) {
            ErrorKind::Cancelled => AttemptError::Cancelled,
            _ => AttemptError::Recoverable(e.into()),
        }
    }
}
