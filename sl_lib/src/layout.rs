//! Resolving the directory to watch from the run root the operator passes in.
use serde::{Deserialize, Serialize};
use std::ffi::OsStr;
use std::fmt;
use std::path::{Path, PathBuf};

const BAM_PASS: &str = "bam_pass";
const BARCODE_PREFIX: &str = "barcode";
pub const UNCLASSIFIED: &str = "unclassified";

/// How the instrument lays out its output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstrumentMode {
    /// `<run>/bam_pass/barcodeNN/*.bam`, one file per batch.
    #[default]
    Standard,
    /// GridION-style verification runs: files are pre-split and carry their
    /// iteration index in the file name, and the run root is the watch directory.
    Alternate,
}

impl InstrumentMode {
    pub fn from_gridion_flag(gridion: bool) -> InstrumentMode {
        if gridion {
            InstrumentMode::Alternate
        } else {
            InstrumentMode::Standard
        }
    }
}

impl fmt::Display for InstrumentMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InstrumentMode::Standard => write!(f, "standard"),
            InstrumentMode::Alternate => write!(f, "alternate"),
        }
    }
}

/// The directory being watched for a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchTarget {
    pub directory: PathBuf,
    pub mode: InstrumentMode,
    pub barcode: String,
}

/// Zero-pad a one-character barcode, so `5` becomes `05`.
pub fn normalize_barcode(barcode: &str) -> String {
    if barcode.chars().count() == 1 {
        format!("0{barcode}")
    } else {
        barcode.to_string()
    }
}

/// The subdirectory name for a barcode: `barcodeNN`, or `unclassified`.
pub fn barcode_label(barcode: &str) -> String {
    let barcode = normalize_barcode(barcode);
    if barcode == UNCLASSIFIED {
        barcode
    } else {
        format!("{BARCODE_PREFIX}{barcode}")
    }
}

/// Work out the watch directory. Only path components are inspected, nothing
/// is read from disk.
pub fn resolve(run_root: &Path, barcode: &str, mode: InstrumentMode) -> WatchTarget {
    let label = barcode_label(barcode);
    let directory = match mode {
        InstrumentMode::Alternate => run_root.to_path_buf(),
        InstrumentMode::Standard => {
            let name = run_root.file_name();
            let parent_name = run_root.parent().and_then(Path::file_name);
            if name == Some(OsStr::new(&label)) && parent_name == Some(OsStr::new(BAM_PASS)) {
                run_root.to_path_buf()
            } else if name == Some(OsStr::new(BAM_PASS)) {
                run_root.join(&label)
            } else {
                run_root.join(BAM_PASS).join(&label)
            }
        }
    };
    WatchTarget {
        directory,
        mode,
        barcode: label,
    }
}
