//! Cooperative shutdown: termination signals and an external marker file both
//! flip one process-wide cancellation token.
use anyhow::{Context, Result};
use log::{debug, info, warn};
use signal_hook::consts::signal::{SIGINT, SIGTERM};
use signal_hook::iterator::{Handle, Signals};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock};
use std::thread;
use std::time::{Duration, Instant};

/// Shared cancellation flag. Once cancelled it stays cancelled.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the flag. Returns true for the call that actually flipped it.
    pub fn cancel(&self) -> bool {
        self.flag
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Acquire)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShutdownReason {
    Signal(i32),
    MarkerFile(PathBuf),
}

/// Turns SIGINT/SIGTERM and the presence of the shutdown marker file into a
/// single cancellation.
pub struct ShutdownCoordinator {
    marker: PathBuf,
    token: CancelToken,
    reason: OnceLock<ShutdownReason>,
    signal_handle: Mutex<Option<Handle>>,
    listener: Mutex<Option<thread::JoinHandle<()>>>,
}

impl ShutdownCoordinator {
    pub fn new(marker: impl Into<PathBuf>) -> Self {
        ShutdownCoordinator {
            marker: marker.into(),
            token: CancelToken::new(),
            reason: OnceLock::new(),
            signal_handle: Mutex::new(None),
            listener: Mutex::new(None),
        }
    }

    pub fn token(&self) -> CancelToken {
        self.token.clone()
    }

    /// Listen for SIGINT and SIGTERM on a dedicated thread.
    pub fn register_signals(self: &Arc<Self>) -> Result<()> {
        let mut signals =
            Signals::new([SIGINT, SIGTERM]).context("registering termination signal handlers")?;
        *lock_or_recover(&self.signal_handle) = Some(signals.handle());

        let coordinator = Arc::clone(self);
        let listener = thread::Builder::new()
            .name("sl-signals".to_owned())
            .spawn(move || {
                for signal in signals.forever() {
                    coordinator.handle_signal(signal);
                }
            })
            .context("starting signal listener thread")?;
        *lock_or_recover(&self.listener) = Some(listener);
        Ok(())
    }

    fn handle_signal(&self, signal: i32) {
        info!("Received termination signal ({signal}), shutting down...");
        self.request(ShutdownReason::Signal(signal));
    }

    /// Request shutdown. Only the first request is recorded.
    pub fn request(&self, reason: ShutdownReason) {
        if self.token.cancel() {
            let _ = self.reason.set(reason);
        } else {
            debug!("shutdown already requested, ignoring {reason:?}");
        }
    }

    /// Check for the marker file, requesting shutdown if it exists.
    /// Returns whether shutdown has been requested by any source.
    pub fn poll(&self) -> bool {
        if !self.is_shutting_down() && self.marker.exists() {
            info!("Shutdown file detected. Initiating shutdown...");
            self.request(ShutdownReason::MarkerFile(self.marker.clone()));
        }
        self.is_shutting_down()
    }

    pub fn is_shutting_down(&self) -> bool {
        self.token.is_cancelled()
    }

    pub fn reason(&self) -> Option<&ShutdownReason> {
        self.reason.get()
    }

    /// Sleep for `total`, polling every `poll`. Returns false as soon as
    /// shutdown is requested, true if the full duration passed.
    pub fn sleep(&self, total: Duration, poll: Duration) -> bool {
        let deadline = Instant::now() + total;
        loop {
            if self.poll() {
                return false;
            }
            let left = deadline.saturating_duration_since(Instant::now());
            if left.is_zero() {
                return true;
            }
            thread::sleep(poll.min(left));
        }
    }

    /// Delete the marker file; a no-op when it is absent.
    pub fn remove_marker(&self) {
        match std::fs::remove_file(&self.marker) {
            Ok(()) => info!("Removed shutdown flag"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!("No shutdown flag found to remove")
            }
            Err(e) => warn!(
                "could not remove shutdown flag {}: {e}",
                self.marker.display()
            ),
        }
    }

    /// Close the signal iterator and join its thread.
    pub fn stop_signal_listener(&self) {
        if let Some(handle) = lock_or_recover(&self.signal_handle).take() {
            handle.close();
        }
        if let Some(listener) = lock_or_recover(&self.listener).take() {
            if listener.join().is_err() {
                warn!("signal listener thread panicked");
            }
        }
    }
}

fn lock_or_recover<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}
