//! FIFO hand-off between the file producers (startup discovery and the live
//! watcher) and the single pipeline consumer.
use crate::shutdown::CancelToken;
use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

/// Where a queued file came from, and the key it was ordered by.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueOrigin {
    /// Present at startup; ordered by modification time.
    Discovered { modified: SystemTime },
    /// Present at startup in alternate mode; ordered by the index in its name.
    Sequenced { index: u32 },
    /// Reported by the watcher after startup.
    Arrived { at: SystemTime },
}

/// One alignment file waiting to be classified.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueuedFile {
    pub path: PathBuf,
    pub origin: QueueOrigin,
}

impl QueuedFile {
    pub fn new(path: impl Into<PathBuf>, origin: QueueOrigin) -> Self {
        QueuedFile {
            path: path.into(),
            origin,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Create a connected sender/receiver pair.
pub fn channel() -> (QueueSender, QueueReceiver) {
    let (send, recv) = unbounded();
    (QueueSender { send }, QueueReceiver { recv })
}

/// Producer half. Clone it for each producer; the queue closes once every
/// clone is dropped.
#[derive(Debug, Clone)]
pub struct QueueSender {
    send: Sender<QueuedFile>,
}

impl QueueSender {
    /// Enqueue a file. Returns false if the consumer has gone away.
    pub fn push(&self, file: QueuedFile) -> bool {
        self.send.send(file).is_ok()
    }

    /// Enqueue a batch, preserving its order.
    pub fn extend(&self, files: impl IntoIterator<Item = QueuedFile>) -> usize {
        let mut n = 0;
        for file in files {
            if !self.push(file) {
                break;
            }
            n += 1;
        }
        n
    }
}

/// Consumer half; there is exactly one.
#[derive(Debug)]
pub struct QueueReceiver {
    recv: Receiver<QueuedFile>,
}

impl QueueReceiver {
    /// Block until the next file is available.
    ///
    /// Returns `None` once `cancel` is set or every sender has been dropped.
    /// The token is checked every `poll`, so cancellation is seen within one
    /// poll interval even when the queue is idle.
    pub fn next(&self, cancel: &CancelToken, poll: Duration) -> Option<QueuedFile> {
        loop {
            if cancel.is_cancelled() {
                return None;
            }
            match self.recv.recv_timeout(poll) {
                Ok(file) => return Some(file),
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => return None,
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.recv.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    const POLL: Duration = Duration::from_millis(10);

    fn arrived(name: &str) -> QueuedFile {
        QueuedFile::new(name, QueueOrigin::Arrived { at: SystemTime::now() })
    }

    #[test]
    fn test_fifo_across_producers() {
        let (send, recv) = channel();
        let cancel = CancelToken::new();
        let watcher = send.clone();
        assert_eq!(send.extend(vec![arrived("a.bam"), arrived("b.bam")]), 2);
        watcher.push(arrived("c.bam"));
        drop(send);
        drop(watcher);

        let names: Vec<_> = std::iter::from_fn(|| recv.next(&cancel, POLL))
            .map(|f| f.path)
            .collect();
        assert_eq!(
            names,
            vec![
                PathBuf::from("a.bam"),
                PathBuf::from("b.bam"),
                PathBuf::from("c.bam")
            ]
        );
    }

    #[test]
    fn test_next_blocks_until_push() {
        let (send, recv) = channel();
        let cancel = CancelToken::new();
        let producer = thread::spawn(move || {
            thread::sleep(Duration::from_millis(50));
            send.push(arrived("late.bam"));
        });
        let file = recv.next(&cancel, POLL).unwrap();
        assert_eq!(file.path, PathBuf::from("late.bam"));
        producer.join().unwrap();
    }

    #[test]
    fn test_cancel_stops_idle_consumer() {
        let (_send, recv) = channel();
        let cancel = CancelToken::new();
        let trigger = cancel.clone();
        let canceller = thread::spawn(move || {
            thread::sleep(Duration::from_millis(30));
            trigger.cancel();
        });
        assert!(recv.next(&cancel, POLL).is_none());
        canceller.join().unwrap();
    }

    #[test]
    fn test_push_after_consumer_dropped() {
        let (send, recv) = channel();
        drop(recv);
        assert!(!send.push(arrived("orphan.bam")));
    }
}
