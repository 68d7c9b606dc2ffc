#![deny(nonstandard_style, future_incompatible)]

//! Live monitoring of a sequencing run: each new alignment file is classified,
//! folded into the confidence history, and periodically merged for CNV plotting.

pub mod aggregate;
pub mod composite;
pub mod config;
pub mod controller;
pub mod discover;
pub mod layout;
pub mod ledger;
pub mod live;
pub mod lock;
pub mod plot;
pub mod queue;
pub mod shutdown;
pub mod simulate;
pub mod tools;
pub mod watch;

use std::path::{Path, PathBuf};

/// `iteration_<n>`, used for directory names, table columns and file names.
pub fn iteration_name(iteration: u32) -> String {
    format!("iteration_{iteration}")
}

/// The per-iteration results directory.
pub fn iteration_dir(output_dir: &Path, iteration: u32) -> PathBuf {
    output_dir.join(iteration_name(iteration))
}
