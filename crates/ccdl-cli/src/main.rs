use ccdl_core::logging::{self, LogTarget};
use clap::Parser;

mod cli;

use crate::cli::Cli;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Logging first; a worker that cannot write its log file still runs.
    let target = if cli.stderr {
        Ok(LogTarget::Stderr)
    } else {
        LogTarget::default_file()
    };
    if let Err(e) = target.and_then(|t| logging::init(&t)) {
        let _ = logging::init(&LogTarget::Stderr);
        tracing::warn!("log file unavailable ({:#}); logging to stderr", e);
    }

    if let Err(err) = cli.run().await {
        tracing::error!("fatal: {:#}", err);
        eprintln!("ccdl error: {:#}", err);
        std::process::exit(1);
    }
}
