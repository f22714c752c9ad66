//! libcurl-backed transport.

use std::fs;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::str;
use std::time::Duration;

use super::parse::content_length;
use super::{FetchError, KeepGoingFn, ProgressFn, Transport};

/// Blocking HTTP transport built on `curl::easy`.
#[derive(Debug, Clone, Copy)]
pub struct CurlTransport {
    /// Connect timeout, and how long a transfer may stall before it fails.
    timeout: Duration,
}

impl CurlTransport {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

/// Temporary path a download is streamed into before the final rename.
fn part_path(dest: &Path) -> PathBuf {
    let mut s = dest.as_os_str().to_owned();
    s.push(".part");
    PathBuf::from(s)
}

/// Removes the `.part` file when dropped, unless `keep` was called after
/// the rename.
struct PartFile {
    path: PathBuf,
    armed: bool,
}

impl PartFile {
    fn new(path: PathBuf) -> Self {
        Self { path, armed: true }
    }

    fn keep(mut self) {
        self.armed = false;
    }
}

impl Drop for PartFile {
    fn drop(&mut self) {
        if self.armed {
            let _ = fs::remove_file(&self.path);
        }
    }
}

fn check_status(easy: &mut curl::easy::Easy) -> Result<(), FetchError> {
    let code = easy.response_code()?;
    if !(200..300).contains(&code) {
        return Err(FetchError::Http { code });
    }
    Ok(())
}

fn performed(result: Result<(), curl::Error>) -> Result<(), FetchError> {
    match result {
        Err(e) if e.is_aborted_by_callback() => Err(FetchError::Aborted),
        Err(e) => Err(FetchError::Curl(e)),
        Ok(()) => Ok(()),
    }
}

impl Transport for CurlTransport {
    fn ping(&self, url: &str, timeout: Duration) -> Result<(), FetchError> {
        let mut easy = curl::easy::Easy::new();
        easy.url(url)?;
        easy.nobody(true)?; // HEAD request
        easy.follow_location(true)?;
        easy.connect_timeout(timeout)?;
        easy.timeout(timeout)?;
        easy.perform()?;
        Ok(())
    }

    fn head_length(
        &self,
        url: &str,
        keep_going: &KeepGoingFn<'_>,
    ) -> Result<Option<u64>, FetchError> {
        let mut headers: Vec<String> = Vec::new();

        let mut easy = curl::easy::Easy::new();
        easy.url(url)?;
        easy.nobody(true)?;
        easy.follow_location(true)?;
        easy.connect_timeout(self.timeout)?;
        easy.timeout(self.timeout)?;
        easy.progress(true)?;
        {
            let mut transfer = easy.transfer();
            transfer.header_function(|data| {
                if let Ok(s) = str::from_utf8(data) {
                    headers.push(s.trim_end().to_string());
                }
                true
            })?;
            transfer.progress_function(|_, _, _, _| keep_going())?;
            performed(transfer.perform())?;
        }
        check_status(&mut easy)?;

        Ok(content_length(&headers))
    }

    fn fetch(
        &self,
        url: &str,
        dest: &Path,
        on_progress: &mut ProgressFn<'_>,
    ) -> Result<u64, FetchError> {
        let part = PartFile::new(part_path(dest));
        let mut writer = BufWriter::new(fs::File::create(&part.path)?);
        let mut written = 0u64;
        let mut write_err: Option<std::io::Error> = None;

        let mut easy = curl::easy::Easy::new();
        easy.url(url)?;
        easy.follow_location(true)?;
        easy.max_redirections(10)?;
        easy.connect_timeout(self.timeout)?;
        // Socket-timeout semantics: fail when nothing arrives for `timeout`.
        easy.low_speed_limit(1)?;
        easy.low_speed_time(self.timeout)?;
        easy.progress(true)?;

        let result = {
            let mut transfer = easy.transfer();
            transfer.write_function(|data| match writer.write_all(data) {
                Ok(()) => {
                    written += data.len() as u64;
                    Ok(data.len())
                }
                Err(e) => {
                    write_err = Some(e);
                    Ok(0) // abort transfer
                }
            })?;
            transfer.progress_function(|dltotal, dlnow, _, _| {
                let total = (dltotal > 0.0).then_some(dltotal as u64);
                on_progress(dlnow as u64, total)
            })?;
            transfer.perform()
        };

        if let Some(e) = write_err {
            return Err(FetchError::Io(e));
        }
        performed(result)?;
        check_status(&mut easy)?;

        writer.flush()?;
        let file = writer.into_inner().map_err(|e| e.into_error())?;
        file.sync_all()?;
        drop(file);
        fs::rename(&part.path, dest)?;
        part.keep();
        Ok(written)
    }
}
