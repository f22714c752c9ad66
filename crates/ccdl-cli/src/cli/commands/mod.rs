//! CLI command handlers. Each command is in its own file.

mod check_schedule;
mod import;
mod reclaim;
mod run;
mod status;

pub use check_schedule::run_check_schedule;
pub use import::run_import;
pub use reclaim::run_reclaim;
pub use run::run_worker;
pub use status::run_status;

#[cfg(test)]
pub(crate) use import::parse_uri_list;
#[cfg(test)]
pub(crate) use run::escalate;
