//! `ccdl status` – job counts per download state.

use anyhow::Result;
use ccdl_core::store::{JobState, JobStore};

pub async fn run_status(db: &dyn JobStore) -> Result<()> {
    let counts = db.count_by_state().await?;
    if counts.total() == 0 {
        println!("No jobs in backlog.");
        return Ok(());
    }
    println!("{:<12} {:>10}", "STATE", "JOBS");
    for state in JobState::ALL {
        println!("{:<12} {:>10}", state.as_str(), counts.get(state));
    }
    println!("{:<12} {:>10}", "total", counts.total());
    Ok(())
}
