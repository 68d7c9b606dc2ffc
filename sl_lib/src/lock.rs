//! Single-instance lock backed by a marker file.
use log::{info, warn};
use std::path::{Path, PathBuf};

const LOCK_SENTINEL: &str = "Lock file to prevent multiple instances of sturgeon.";

#[derive(Debug, thiserror::Error)]
pub enum LockError {
    #[error(
        "A different instance of Sturgeon is already running (lock file {path:?} exists). \
         Remove the lock file if no other instance is running."
    )]
    AlreadyRunning { path: PathBuf },

    #[error("Could not create lock file {path:?}")]
    Create {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// Handle on an acquired lock. The marker file exists for as long as the
/// token is held and has not been released.
#[derive(Debug)]
pub struct LockToken {
    path: PathBuf,
    released: bool,
}

impl LockToken {
    /// Create the marker file at `path`, failing if it is already present.
    ///
    /// Check-then-create is not atomic; two instances racing on the same path
    /// at the same instant are not guarded against.
    pub fn acquire(path: &Path) -> Result<LockToken, LockError> {
        if path.exists() {
            return Err(LockError::AlreadyRunning {
                path: path.to_path_buf(),
            });
        }
        std::fs::write(path, LOCK_SENTINEL).map_err(|source| LockError::Create {
            path: path.to_path_buf(),
            source,
        })?;
        info!("Lock file created. Proceeding with live processing...");
        Ok(LockToken {
            path: path.to_path_buf(),
            released: false,
        })
    }

    /// Remove the marker file. Calling this more than once, or after the file
    /// was removed by someone else, is a no-op.
    pub fn release(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        match std::fs::remove_file(&self.path) {
            Ok(()) => info!("Lock file removed."),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => (),
            Err(e) => warn!("could not remove lock file {}: {e}", self.path.display()),
        }
    }
}

impl Drop for LockToken {
    fn drop(&mut self) {
        self.release();
    }
}
