//! sl_bam
//!
//! BAM helpers for building the composite and cumulative alignment files that
//! feed CNV plotting.

pub mod merge;

pub use merge::{merge_bams, MergeSummary};
