use std::sync::{Arc, RwLock};

use tokio::sync::broadcast;

use crate::limits::PUSH_CHANNEL_CAPACITY;
use crate::model::{Alarm, Snapshot};

/// Server → viewer pushes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Push {
    Snapshot(Arc<Snapshot>),
    Alarm(Alarm),
}

/// Fan-out of snapshots and alarms to every connected viewer.
///
/// The last published snapshot is cached so a new viewer can be synced
/// before the next tick.
pub struct NotifyHub {
    sender: broadcast::Sender<Push>,
    last: RwLock<Arc<Snapshot>>,
}

impl Default for NotifyHub {
    fn default() -> Self {
        Self::new()
    }
}

impl NotifyHub {
    pub fn new() -> Self {
        Self {
            sender: broadcast::channel(PUSH_CHANNEL_CAPACITY).0,
            last: RwLock::new(Arc::new(Snapshot::default())),
        }
    }

    /// Current snapshot plus a receiver for everything published after it.
    /// Taken under the cache lock, so nothing falls between the two.
    pub fn subscribe(&self) -> (Arc<Snapshot>, broadcast::Receiver<Push>) {
        let last = self.last.read().unwrap_or_else(|e| e.into_inner());
        (last.clone(), self.sender.subscribe())
    }

    pub fn latest(&self) -> Arc<Snapshot> {
        self.last.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Cache and push a snapshot. No-op on the channel if nobody is listening.
    pub fn publish(&self, snapshot: Snapshot) {
        let snapshot = Arc::new(snapshot);
        let mut last = self.last.write().unwrap_or_else(|e| e.into_inner());
        *last = snapshot.clone();
        let _ = self.sender.send(Push::Snapshot(snapshot));
    }

    pub fn alarm(&self, alarm: Alarm) {
        let _ = self.sender.send(Push::Alarm(alarm));
    }

    pub fn viewer_count(&self) -> usize {
        self.sender.receiver_count()
    }
}
