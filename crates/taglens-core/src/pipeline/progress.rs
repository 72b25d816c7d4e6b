//! Run progress published to presentation layers.

use std::sync::Arc;

use serde::Serialize;
use tokio::sync::watch;

/// Snapshot of a run's counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Progress {
    /// Media items yielded by the locator so far (including skipped files)
    pub discovered: usize,
    pub tagged: usize,
    pub skipped: usize,
    pub failed: usize,
    /// Engine calls made so far
    pub batches: usize,
    /// The run has finished, by completion, cancellation or abort
    pub done: bool,
}

impl Progress {
    /// Items with a final outcome.
    pub fn processed(&self) -> usize {
        self.tagged + self.skipped + self.failed
    }
}

/// Shared handle for updating progress from any stage.
#[derive(Clone)]
pub struct ProgressReporter {
    tx: Arc<watch::Sender<Progress>>,
}

impl Default for ProgressReporter {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressReporter {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(Progress::default());
        Self { tx: Arc::new(tx) }
    }

    pub fn subscribe(&self) -> watch::Receiver<Progress> {
        self.tx.subscribe()
    }

    pub fn snapshot(&self) -> Progress {
        self.tx.borrow().clone()
    }

    pub fn update(&self, f: impl FnOnce(&mut Progress)) {
        self.tx.send_modify(f);
    }

    pub fn reset(&self) {
        self.tx.send_replace(Progress::default());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_subscribers_see_updates() {
        let reporter = ProgressReporter::new();
        let mut rx = reporter.subscribe();

        reporter.update(|p| {
            p.tagged += 2;
            p.skipped += 1;
        });
        rx.changed().await.unwrap();
        assert_eq!(rx.borrow().processed(), 3);

        reporter.update(|p| p.done = true);
        rx.changed().await.unwrap();
        assert!(rx.borrow().done);
    }

    #[test]
    fn test_update_without_subscribers() {
        let reporter = ProgressReporter::new();
        reporter.update(|p| p.failed += 1);
        assert_eq!(reporter.snapshot().failed, 1);
    }
}
