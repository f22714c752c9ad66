//! In-memory transport for orchestrator and worker-loop tests.

use std::path::Path;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use super::{FetchError, KeepGoingFn, ProgressFn, Transport};

pub(crate) struct FakeTransport {
    pub(crate) body: Vec<u8>,
    pub(crate) declared_len: Option<u64>,
    /// Fetches that fail (HTTP 503) before one succeeds.
    pub(crate) fail_first: u32,
    pub(crate) reachable: bool,
    /// Cancelled from inside `fetch`, simulating an interrupt mid-transfer.
    pub(crate) cancel_during_fetch: Option<CancellationToken>,
    /// Cancelled from inside `head_length`, after the body has landed.
    pub(crate) cancel_during_head: Option<CancellationToken>,
    pub(crate) fetch_calls: AtomicU32,
    pub(crate) ping_calls: AtomicU32,
    pub(crate) fetched_urls: Mutex<Vec<String>>,
}

impl FakeTransport {
    pub(crate) fn serving(body: &[u8]) -> Self {
        Self {
            body: body.to_vec(),
            declared_len: Some(body.len() as u64),
            fail_first: 0,
            reachable: true,
            cancel_during_fetch: None,
            cancel_during_head: None,
            fetch_calls: AtomicU32::new(0),
            ping_calls: AtomicU32::new(0),
            fetched_urls: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn fetches(&self) -> u32 {
        self.fetch_calls.load(Ordering::SeqCst)
    }
}

impl Transport for FakeTransport {
    fn ping(&self, _url: &str, _timeout: Duration) -> Result<(), FetchError> {
        self.ping_calls.fetch_add(1, Ordering::SeqCst);
        if self.reachable {
            Ok(())
        } else {
            Err(FetchError::Http { code: 599 })
        }
    }

    fn fetch(
        &self,
        url: &str,
        dest: &Path,
        on_progress: &mut ProgressFn<'_>,
    ) -> Result<u64, FetchError> {
        let n = self.fetch_calls.fetch_add(1, Ordering::SeqCst);
        self.fetched_urls.lock().unwrap().push(url.to_string());
        if let Some(token) = &self.cancel_during_fetch {
            token.cancel();
        }
        if !on_progress(0, self.declared_len) {
            return Err(FetchError::Aborted);
        }
        if n < self.fail_first {
            return Err(FetchError::Http { code: 503 });
        }
        std::fs::write(dest, &self.body)?;
        let len = self.body.len() as u64;
        on_progress(len, self.declared_len);
        Ok(len)
    }

    fn head_length(
        &self,
        _url: &str,
        _keep_going: &KeepGoingFn<'_>,
    ) -> Result<Option<u64>, FetchError> {
        // The reply arrives even though the token fired while it was in flight.
        if let Some(token) = &self.cancel_during_head {
            token.cancel();
        }
        Ok(self.declared_len)
    }
}
