//! Orchestration of one live run: locking, discovery, the worker thread, the
//! watcher and an orderly shutdown.
use crate::aggregate::CumulativeAggregator;
use crate::composite::CompositeMerger;
use crate::config::LiveConfig;
use crate::controller::{ControllerSettings, IterationState, PipelineController};
use crate::discover::discover;
use crate::layout::{self, WatchTarget};
use crate::lock::LockToken;
use crate::queue;
use crate::shutdown::{ShutdownCoordinator, ShutdownReason};
use crate::tools::{
    BamMerger, Classifier, CnvPlotter, HtslibMerger, RscriptCnvPlotter, ScriptClassifier,
};
use crate::watch::{ArrivalFilter, FileWatcher};
use anyhow::{Context, Result};
use crossbeam_channel::RecvTimeoutError;
use log::{error, info, warn};
use std::path::Path;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

/// The external tools a run uses.
pub struct Collaborators {
    pub classifier: Box<dyn Classifier>,
    pub plotter: Box<dyn CnvPlotter>,
    pub composite_merger: Box<dyn BamMerger>,
    pub cumulative_merger: Box<dyn BamMerger>,
}

impl Collaborators {
    pub fn from_config(config: &LiveConfig) -> Collaborators {
        Collaborators {
            classifier: Box::new(ScriptClassifier::new(&config.sturgeon_script)),
            plotter: Box::new(RscriptCnvPlotter::new(
                &config.r_script,
                config.cnv_utils.clone(),
            )),
            composite_merger: Box::new(HtslibMerger),
            cumulative_merger: Box::new(HtslibMerger),
        }
    }
}

/// How a run ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunSummary {
    pub target: WatchTarget,
    pub reason: Option<ShutdownReason>,
    /// `None` when shutdown came before monitoring started, or the worker
    /// did not finish in time.
    pub final_state: Option<IterationState>,
}

/// Wait for `dir` to appear, checking for shutdown every `poll`.
/// Returns false if shutdown was requested first.
pub fn wait_for_directory(
    dir: &Path,
    shutdown: &ShutdownCoordinator,
    wait_interval: Duration,
    poll: Duration,
) -> bool {
    loop {
        if shutdown.poll() {
            return false;
        }
        if dir.is_dir() {
            info!("Results directory {} found, proceeding", dir.display());
            return true;
        }
        info!("Waiting for results directory {} to be created", dir.display());
        if !shutdown.sleep(wait_interval, poll) {
            return false;
        }
    }
}

/// Monitor a run until a termination signal or the shutdown file stops it.
pub fn run_live(config: &LiveConfig, collaborators: Collaborators) -> Result<RunSummary> {
    let target = layout::resolve(&config.input, &config.barcode, config.mode);
    info!(
        "Monitoring {} in {} mode (barcode {}, aggregation every {} iterations)",
        target.directory.display(),
        target.mode,
        target.barcode,
        config.freq
    );

    if let Some(parent) = config.lock_file.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("creating lock directory {}", parent.display()))?;
    }
    let mut lock = LockToken::acquire(&config.lock_file)?;
    let shutdown = Arc::new(ShutdownCoordinator::new(&config.shutdown_file));
    let result = shutdown
        .register_signals()
        .and_then(|()| monitor(config, collaborators, &target, &shutdown));

    lock.release();
    shutdown.remove_marker();
    shutdown.stop_signal_listener();

    let final_state = result?;
    Ok(RunSummary {
        target,
        reason: shutdown.reason().cloned(),
        final_state,
    })
}

fn monitor(
    config: &LiveConfig,
    collaborators: Collaborators,
    target: &WatchTarget,
    shutdown: &ShutdownCoordinator,
) -> Result<Option<IterationState>> {
    std::fs::create_dir_all(&config.output)
        .with_context(|| format!("creating output directory {}", config.output.display()))?;

    if !wait_for_directory(
        &target.directory,
        shutdown,
        config.wait_interval,
        config.poll_interval,
    ) {
        info!("Terminated while waiting for the results directory");
        return Ok(None);
    }

    let Collaborators {
        classifier,
        plotter,
        composite_merger,
        cumulative_merger,
    } = collaborators;
    let mut composites = CompositeMerger::new(&config.output, target.mode, composite_merger);
    let backlog = discover(target, &config.suffix, &mut composites)?;

    let aggregator = CumulativeAggregator::new(
        config.freq,
        composites.cnv_dir().to_path_buf(),
        cumulative_merger,
        plotter,
    )?;
    let controller = PipelineController::new(
        ControllerSettings {
            output_dir: config.output.clone(),
            model: config.model.clone(),
            model_name: config.model_name()?,
            color_table: config.color_table.clone(),
        },
        classifier,
        composites,
        aggregator,
    );

    let token = shutdown.token();
    let (send, recv) = queue::channel();
    let queued = send.extend(backlog);
    info!("Queued {queued} existing files");

    let mut watcher = FileWatcher::start(
        &target.directory,
        ArrivalFilter::new(&config.suffix, target.mode),
        send,
        token.clone(),
    )?;

    let (done_send, done_recv) = crossbeam_channel::bounded(1);
    let poll = config.poll_interval;
    let worker_token = token.clone();
    let worker = thread::Builder::new()
        .name("sl-pipeline".to_owned())
        .spawn(move || {
            let state = controller.run(&recv, &worker_token, poll);
            let _ = done_send.send(state);
        })
        .context("starting pipeline thread")?;

    let mut finished = None;
    while !shutdown.poll() {
        match done_recv.recv_timeout(poll) {
            Ok(state) => {
                warn!("pipeline stopped before shutdown was requested");
                finished = Some(state);
                break;
            }
            Err(RecvTimeoutError::Timeout) => (),
            Err(RecvTimeoutError::Disconnected) => {
                error!("pipeline thread exited unexpectedly");
                break;
            }
        }
    }

    info!("Shutdown requested. Cleaning up...");
    token.cancel();
    watcher.stop();

    if finished.is_none() {
        finished = match done_recv.recv_timeout(config.worker_join_timeout) {
            Ok(state) => Some(state),
            Err(RecvTimeoutError::Timeout) => {
                warn!(
                    "pipeline still busy after {:?}, abandoning it and any running tool",
                    config.worker_join_timeout
                );
                return Ok(None);
            }
            Err(RecvTimeoutError::Disconnected) => None,
        };
    }
    if worker.join().is_err() {
        error!("pipeline thread panicked");
    }
    Ok(finished)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    #[test]
    fn test_wait_for_existing_directory() {
        let dir = tempfile::tempdir().unwrap();
        let shutdown = ShutdownCoordinator::new(dir.path().join("stop"));
        assert!(wait_for_directory(
            dir.path(),
            &shutdown,
            Duration::from_secs(20),
            Duration::from_millis(10)
        ));
    }

    #[test]
    fn test_wait_interrupted_by_marker() {
        let dir = tempfile::tempdir().unwrap();
        let marker = dir.path().join("stop");
        let shutdown = ShutdownCoordinator::new(&marker);
        let creator = {
            let marker = marker.clone();
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(50));
                std::fs::write(marker, "").unwrap();
            })
        };
        let start = Instant::now();
        assert!(!wait_for_directory(
            &dir.path().join("never"),
            &shutdown,
            Duration::from_secs(20),
            Duration::from_millis(10)
        ));
        assert!(start.elapsed() < Duration::from_secs(5));
        creator.join().unwrap();
    }

    #[test]
    fn test_directory_appears_later() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("bam_pass/barcode01");
        let shutdown = ShutdownCoordinator::new(dir.path().join("stop"));
        let creator = {
            let target = target.clone();
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(50));
                std::fs::create_dir_all(target).unwrap();
            })
        };
        assert!(wait_for_directory(
            &target,
            &shutdown,
            Duration::from_millis(20),
            Duration::from_millis(5)
        ));
        creator.join().unwrap();
    }

    #[test]
    fn test_second_instance_is_refused() {
        let dir = tempfile::tempdir().unwrap();
        let lock = dir.path().join("sturgeon.lock");
        std::fs::write(&lock, "held").unwrap();
        let config = LiveConfig::resolve(
            crate::config::ConfigFile::default(),
            crate::config::Overrides {
                input: Some(dir.path().to_path_buf()),
                output: Some(dir.path().join("out")),
                lock: Some(lock.clone()),
                sturgeon_script: Some("classify.sh".into()),
                model: Some("general.zip".into()),
                r_script: Some("plot.R".into()),
                barcode: Some("1".into()),
                ..Default::default()
            },
        )
        .unwrap();
        let err = run_live(&config, Collaborators::from_config(&config)).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<crate::lock::LockError>(),
            Some(crate::lock::LockError::AlreadyRunning { .. })
        ));
        // the running instance's lock is left alone
        assert!(lock.exists());
        assert!(!dir.path().join("out").exists());
    }
}
