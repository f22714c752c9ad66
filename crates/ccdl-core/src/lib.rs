pub mod clock;
pub mod config;
pub mod logging;

pub mod download;
pub mod gate;
pub mod lease;
pub mod progress;
pub mod retry;
pub mod store;
pub mod transport;
pub mod worker;
