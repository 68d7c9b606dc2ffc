//! Command-line front end for live monitoring.

pub mod args;
pub mod logging;
pub mod utils;
