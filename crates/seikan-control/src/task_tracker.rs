//! Per-tunnel background tasks
//!
//! Each joined tunnel runs its handshake on a spawned task. Teardown aborts
//! it, which drops any bounded wait still pending on either side. Tasks are
//! keyed by the tunnel's serial, so a tunnel id drawn again for a new tunnel
//! can never reach the task of an old one.

use dashmap::DashMap;
use tokio::task::{AbortHandle, JoinHandle};

#[derive(Default)]
pub struct TaskTracker {
    tasks: DashMap<u64, AbortHandle>,
}

impl TaskTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Track the task of tunnel `serial`, aborting one already tracked under it
    pub fn track(&self, serial: u64, handle: &JoinHandle<()>) {
        if let Some(previous) = self.tasks.insert(serial, handle.abort_handle()) {
            previous.abort();
        }
    }

    /// Abort the task of tunnel `serial`. Returns whether one was tracked.
    pub fn abort(&self, serial: u64) -> bool {
        match self.tasks.remove(&serial) {
            Some((_, handle)) => {
                handle.abort();
                true
            }
            None => false,
        }
    }

    /// Stop tracking a task that ran to completion
    pub fn finished(&self, serial: u64) {
        self.tasks.remove(&serial);
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn sleeper() -> JoinHandle<()> {
        tokio::spawn(async { tokio::time::sleep(Duration::from_secs(10)).await })
    }

    #[tokio::test]
    async fn test_abort_removes_and_cancels() {
        let tracker = TaskTracker::new();
        let id = 1;
        let handle = sleeper();

        tracker.track(id, &handle);
        assert_eq!(tracker.len(), 1);

        assert!(tracker.abort(id));
        assert!(tracker.is_empty());
        assert!(handle.await.unwrap_err().is_cancelled());
    }

    #[tokio::test]
    async fn test_tracking_again_aborts_previous() {
        let tracker = TaskTracker::new();
        let id = 2;
        let first = sleeper();
        let second = sleeper();

        tracker.track(id, &first);
        tracker.track(id, &second);

        assert_eq!(tracker.len(), 1);
        assert!(first.await.unwrap_err().is_cancelled());
        assert!(!second.is_finished());
    }

    #[tokio::test]
    async fn test_finished_does_not_abort() {
        let tracker = TaskTracker::new();
        let id = 3;
        let (tx, rx) = tokio::sync::oneshot::channel();
        let handle = tokio::spawn(async move {
            let _ = rx.await;
        });

        tracker.track(id, &handle);
        tracker.finished(id);
        assert!(!tracker.abort(id));

        tx.send(()).unwrap();
        assert!(handle.await.is_ok());
    }
}
