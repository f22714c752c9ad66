//! Tracing setup for the `ccdl` binary.
//!
//! Workers usually run unattended for hours, so events are appended to a
//! file under the XDG state dir. `--stderr`, or a state dir that cannot be
//! written, sends them to the terminal instead. `RUST_LOG` overrides the
//! default filter either way.

use anyhow::{Context, Result};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::EnvFilter;

const DEFAULT_FILTER: &str = "info,ccdl=debug,ccdl_core=debug";

/// Where log events go.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogTarget {
    File(PathBuf),
    Stderr,
}

impl LogTarget {
    /// The per-user worker log, see [`log_file_path`].
    pub fn default_file() -> Result<Self> {
        Ok(Self::File(log_file_path()?))
    }
}

/// `~/.local/state/ccdl/ccdl.log`.
pub fn log_file_path() -> Result<PathBuf> {
    let xdg_dirs = xdg::BaseDirectories::with_prefix("ccdl")?;
    Ok(xdg_dirs.get_state_home().join("ccdl").join("ccdl.log"))
}

/// Every event borrows the one open handle; appends from concurrent
/// workers sharing the file stay line-atomic.
struct AppendLog(fs::File);

impl<'a> MakeWriter<'a> for AppendLog {
    type Writer = &'a fs::File;

    fn make_writer(&'a self) -> Self::Writer {
        &self.0
    }
}

fn open_append(path: &Path) -> Result<fs::File> {
    if let Some(dir) = path.parent() {
        fs::create_dir_all(dir).with_context(|| format!("create {}", dir.display()))?;
    }
    fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("open {}", path.display()))
}

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER))
}

/// Install the global subscriber. Errors if the log file cannot be opened
/// or a subscriber is already set; the caller decides whether to fall back.
pub fn init(target: &LogTarget) -> Result<()> {
    let builder = tracing_subscriber::fmt()
        .with_env_filter(env_filter())
        .with_ansi(false);
    match target {
        LogTarget::File(path) => {
            let file = open_append(path)?;
            builder
                .with_writer(AppendLog(file))
                .try_init()
                .map_err(|e| anyhow::anyhow!("install subscriber: {e}"))?;
            tracing::info!(path = %path.display(), "ccdl logging to file");
        }
        LogTarget::Stderr => builder
            .with_writer(io::stderr)
            .try_init()
            .map_err(|e| anyhow::anyhow!("install subscriber: {e}"))?,
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::tempdir;

    #[test]
    fn default_filter_parses() {
        assert!(EnvFilter::try_new(DEFAULT_FILTER).is_ok());
    }

    #[test]
    fn log_file_creates_missing_dirs_and_appends() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("state").join("ccdl").join("ccdl.log");
        for line in ["first\n", "second\n"] {
            let writer = AppendLog(open_append(&path).unwrap());
            writer.make_writer().write_all(line.as_bytes()).unwrap();
        }
        assert_eq!(fs::read_to_string(&path).unwrap(), "first\nsecond\n");
    }
}
