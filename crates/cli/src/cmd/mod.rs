//! CLI command implementations

pub mod arrive;
pub mod config;
pub mod serve;
pub mod status;
pub mod watch;
