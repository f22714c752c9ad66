//! Transport collaborators: reachability ping, streaming fetch, and
//! declared-length lookup.
//!
//! The core only needs success/failure and byte counts from these calls, so
//! they sit behind the `Transport` trait. `CurlTransport` is the libcurl
//! implementation; tests substitute in-memory fakes. All methods block and
//! are called from `spawn_blocking`.

mod http;
mod parse;

#[cfg(test)]
pub(crate) mod fake;

use std::path::Path;
use std::time::Duration;

pub use http::CurlTransport;
pub use parse::content_length;

/// Failure of a single transport call.
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    /// Curl reported an error (timeout, connection, etc.).
    #[error("{0}")]
    Curl(#[from] curl::Error),
    /// HTTP response had a non-2xx status.
    #[error("HTTP {code}")]
    Http { code: u32 },
    /// Writing the download to disk failed.
    #[error("storage: {0}")]
    Io(#[from] std::io::Error),
    /// The progress callback asked to stop (cancellation).
    #[error("transfer aborted")]
    Aborted,
}

/// Progress callback: `(bytes_done, total_bytes_if_known)`. Returning
/// `false` aborts the transfer with `FetchError::Aborted`.
pub type ProgressFn<'a> = dyn FnMut(u64, Option<u64>) -> bool + 'a;

/// Polled while a request without a body is in flight; `false` aborts it
/// with `FetchError::Aborted`.
pub type KeepGoingFn<'a> = dyn Fn() -> bool + 'a;

pub trait Transport: Send + Sync {
    /// Lightweight reachability check. Any HTTP response counts as reachable.
    fn ping(&self, url: &str, timeout: Duration) -> Result<(), FetchError>;

    /// Stream `url` into `dest`, returning the number of bytes written.
    /// `dest` only appears once the transfer completed successfully.
    fn fetch(&self, url: &str, dest: &Path, on_progress: &mut ProgressFn<'_>)
        -> Result<u64, FetchError>;

    /// Declared `Content-Length` of `url`, if the server sends one.
    fn head_length(&self, url: &str, keep_going: &KeepGoingFn<'_>)
        -> Result<Option<u64>, FetchError>;
}
