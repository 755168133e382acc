use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::watch;

/// Shared snapshot of one indexer's cursor. The owning indexer is the
/// only writer; children read it at the start of a cycle. A stale but
/// lower reading is always safe, so no locking is needed.
#[derive(Debug, Clone)]
pub struct CursorCell {
    tx: Arc<watch::Sender<DateTime<Utc>>>,
}

impl CursorCell {
    pub fn new(initial: DateTime<Utc>) -> CursorCell {
        let (tx, _rx) = watch::channel(initial);
        CursorCell { tx: Arc::new(tx) }
    }

    pub fn get(&self) -> DateTime<Utc> {
        *self.tx.borrow()
    }

    /// Published only after the matching record and cursor row are
    /// durably written.
    pub fn publish(&self, cursor: DateTime<Utc>) {
        self.tx.send_replace(cursor);
    }
}

/// Graph-wide cooperative stop. Loops check it between hour
/// boundaries, never mid-write.
#[derive(Debug)]
pub struct StopHandle {
    tx: watch::Sender<bool>,
}

impl StopHandle {
    pub fn new() -> StopHandle {
        let (tx, _rx) = watch::channel(false);
        StopHandle { tx }
    }

    pub fn subscribe(&self) -> StopSignal {
        StopSignal {
            rx: self.tx.subscribe(),
        }
    }

    pub fn stop(&self) {
        self.tx.send_replace(true);
    }
}

impl Default for StopHandle {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone)]
pub struct StopSignal {
    rx: watch::Receiver<bool>,
}

impl StopSignal {
    pub fn is_stopped(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once the graph-wide stop is requested.
    pub async fn wait(&mut self) {
        while !*self.rx.borrow() {
            if self.rx.changed().await.is_err() {
                break;
            }
        }
    }
}
