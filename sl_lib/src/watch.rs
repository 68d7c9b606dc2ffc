//! Live detection of new alignment files.
use crate::discover::is_unclassified;
use crate::layout::InstrumentMode;
use crate::queue::{QueueOrigin, QueueSender, QueuedFile};
use crate::shutdown::CancelToken;
use anyhow::{Context, Result};
use crossbeam_channel::{bounded, Receiver};
use log::{debug, info, warn};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::path::{Path, PathBuf};
use std::thread;
use std::time::SystemTime;

const RAW_EVENT_CAPACITY: usize = 1024;

/// Which created files are worth queueing.
#[derive(Debug, Clone)]
pub struct ArrivalFilter {
    suffix: String,
    mode: InstrumentMode,
}

impl ArrivalFilter {
    pub fn new(suffix: impl Into<String>, mode: InstrumentMode) -> Self {
        ArrivalFilter {
            suffix: suffix.into(),
            mode,
        }
    }

    pub fn accepts(&self, path: &Path) -> bool {
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            return false;
        };
        if !name.ends_with(&self.suffix) {
            return false;
        }
        // complements were merged in at startup or are not classified alone
        !(self.mode == InstrumentMode::Alternate && is_unclassified(path))
    }

    /// Paths of a raw notify event to enqueue.
    fn arrivals(&self, event: Event) -> Vec<PathBuf> {
        if !matches!(event.kind, EventKind::Create(_)) {
            return Vec::new();
        }
        event
            .paths
            .into_iter()
            .filter(|path| self.accepts(path))
            .collect()
    }
}

/// A non-recursive subscription on the watch directory feeding the queue.
pub struct FileWatcher {
    watcher: Option<RecommendedWatcher>,
    forwarder: Option<thread::JoinHandle<usize>>,
}

impl FileWatcher {
    pub fn start(
        dir: &Path,
        filter: ArrivalFilter,
        queue: QueueSender,
        cancel: CancelToken,
    ) -> Result<FileWatcher> {
        let (raw_send, raw_recv) = bounded(RAW_EVENT_CAPACITY);
        let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| {
            let _ = raw_send.send(res);
        })
        .context("creating file watcher")?;
        watcher
            .watch(dir, RecursiveMode::NonRecursive)
            .with_context(|| format!("watching {}", dir.display()))?;

        let forwarder = thread::Builder::new()
            .name("sl-watch".to_owned())
            .spawn(move || forward(raw_recv, filter, queue, cancel))
            .context("starting watch forwarder thread")?;
        info!("Starting to monitor for new files in: {}", dir.display());
        Ok(FileWatcher {
            watcher: Some(watcher),
            forwarder: Some(forwarder),
        })
    }

    /// Drop the subscription and wait for the forwarder to drain.
    pub fn stop(&mut self) {
        // dropping the watcher closes the raw channel, which ends the forwarder
        self.watcher.take();
        if let Some(forwarder) = self.forwarder.take() {
            match forwarder.join() {
                Ok(n) => debug!("watcher forwarded {n} files"),
                Err(_) => warn!("watch forwarder thread panicked"),
            }
        }
    }
}

impl Drop for FileWatcher {
    fn drop(&mut self) {
        self.stop();
    }
}

fn forward(
    raw: Receiver<notify::Result<Event>>,
    filter: ArrivalFilter,
    queue: QueueSender,
    cancel: CancelToken,
) -> usize {
    let mut forwarded = 0;
    for res in raw {
        let event = match res {
            Ok(event) => event,
            Err(e) => {
                warn!("file watcher error: {e}");
                continue;
            }
        };
        if cancel.is_cancelled() {
            continue;
        }
        for path in filter.arrivals(event) {
            info!("New file detected: {}", path.display());
            let file = QueuedFile::new(
                path,
                QueueOrigin::Arrived {
                    at: SystemTime::now(),
                },
            );
            if queue.push(file) {
                forwarded += 1;
            }
        }
    }
    forwarded
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue;
    use notify::event::{CreateKind, ModifyKind};
    use std::time::Duration;

    fn event(kind: EventKind, path: &str) -> Event {
        Event::new(kind).add_path(PathBuf::from(path))
    }

    #[test]
    fn test_filter() {
        let standard = ArrivalFilter::new(".bam", InstrumentMode::Standard);
        assert_eq!(
            standard.arrivals(event(EventKind::Create(CreateKind::File), "/w/a.bam")),
            vec![PathBuf::from("/w/a.bam")]
        );
        assert!(standard
            .arrivals(event(EventKind::Create(CreateKind::File), "/w/a.bam.tmp"))
            .is_empty());
        assert!(standard
            .arrivals(event(EventKind::Modify(ModifyKind::Any), "/w/a.bam"))
            .is_empty());
        assert!(standard.accepts(Path::new("/w/run_it1_unclassified.bam")));

        let alternate = ArrivalFilter::new(".bam", InstrumentMode::Alternate);
        assert!(!alternate.accepts(Path::new("/w/run_it1_unclassified.bam")));
        assert!(alternate.accepts(Path::new("/w/run_it1.bam")));
    }

    #[test]
    fn test_created_file_is_queued() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let (send, recv) = queue::channel();
        let cancel = CancelToken::new();
        let mut watcher = FileWatcher::start(
            dir.path(),
            ArrivalFilter::new(".bam", InstrumentMode::Standard),
            send,
            cancel.clone(),
        )?;

        std::fs::write(dir.path().join("ignored.txt"), "x")?;
        std::fs::write(dir.path().join("new.bam"), "x")?;

        let timeout = cancel.clone();
        thread::spawn(move || {
            thread::sleep(Duration::from_secs(10));
            timeout.cancel();
        });
        let file = recv
            .next(&cancel, Duration::from_millis(50))
            .expect("watcher did not report the new file");
        assert_eq!(file.path.file_name().unwrap(), "new.bam");
        assert!(matches!(file.origin, QueueOrigin::Arrived { .. }));

        watcher.stop();
        // the watcher held the only sender, so the queue is now closed
        let rest: Vec<_> = std::iter::from_fn(|| recv.next(&CancelToken::new(), Duration::from_millis(10)))
            .map(|f| f.path)
            .collect();
        assert!(rest.iter().all(|p| p.extension().unwrap() == "bam"));
        Ok(())
    }
}
