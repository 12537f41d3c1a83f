mod error;
mod mutations;
mod store;

pub use error::EngineError;
pub use store::TableStore;

use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::{mpsc, oneshot, Mutex, MutexGuard};
use tracing::{error, info};

use crate::limits::{PERSIST_QUEUE_CAPACITY, RESERVATION_DURATION_MS};
use crate::model::*;
use crate::notify::NotifyHub;
use crate::persist::SnapshotFile;

pub fn now_ms() -> Ms {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as Ms)
        .unwrap_or(0)
}

// ── Background persistence writer ────────────────────────

struct FlushRequest {
    records: Vec<Reservation>,
    response: oneshot::Sender<io::Result<()>>,
}

/// Background task that owns the registry file and coalesces flushes.
/// 1. Block until a request arrives.
/// 2. Drain every request already queued; only the newest registry matters.
/// 3. Write it once.
/// 4. Answer every requester with that one result.
async fn persist_writer_loop(file: SnapshotFile, mut rx: mpsc::Receiver<FlushRequest>) {
    while let Some(first) = rx.recv().await {
        let mut records = first.records;
        let mut waiters = vec![first.response];
        while let Ok(next) = rx.try_recv() {
            records = next.records;
            waiters.push(next.response);
        }

        metrics::histogram!(crate::observability::FLUSH_BATCH_SIZE).record(waiters.len() as f64);
        let flush_start = Instant::now();
        let result = file.write(&records);
        metrics::histogram!(crate::observability::FLUSH_DURATION_SECONDS)
            .record(flush_start.elapsed().as_secs_f64());

        for tx in waiters {
            let r = match &result {
                Ok(()) => Ok(()),
                Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
            };
            let _ = tx.send(r);
        }
    }
}

/// Outcome of one scheduler tick.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickReport {
    pub alarms: Vec<Alarm>,
    pub reservations: usize,
}

/// Owns the registry. Every operation runs under the store lock, so
/// mutations, ticks and the snapshots they publish never interleave.
pub struct Engine {
    store: Mutex<TableStore>,
    persist_tx: mpsc::Sender<FlushRequest>,
    pub notify: Arc<NotifyHub>,
    duration: Ms,
}

impl Engine {
    pub fn new(data_file: PathBuf, notify: Arc<NotifyHub>) -> Self {
        Self::with_duration(data_file, notify, RESERVATION_DURATION_MS)
    }

    /// Restore the registry from `data_file` and start the writer task.
    /// Must be called inside a tokio runtime.
    pub fn with_duration(data_file: PathBuf, notify: Arc<NotifyHub>, duration: Ms) -> Self {
        let file = SnapshotFile::new(data_file);
        let store = TableStore::from_records(file.load());
        info!("restored {} reservations from {}", store.len(), file.path().display());
        metrics::gauge!(crate::observability::RESERVATIONS_ACTIVE).set(store.len() as f64);
        notify.publish(store.snapshot(now_ms()));

        let (persist_tx, persist_rx) = mpsc::channel(PERSIST_QUEUE_CAPACITY);
        tokio::spawn(persist_writer_loop(file, persist_rx));

        Self {
            store: Mutex::new(store),
            persist_tx,
            notify,
            duration,
        }
    }

    pub async fn list(&self) -> Vec<Reservation> {
        self.store.lock().await.list()
    }

    pub async fn get(&self, id: &ReservationId) -> Option<Reservation> {
        self.store.lock().await.get(id).cloned()
    }

    pub async fn snapshot(&self, now: Ms) -> Snapshot {
        self.store.lock().await.snapshot(now)
    }

    // ── Persistence plumbing ─────────────────────────────────

    /// Queue `records` for the writer. Called with the store lock held so the
    /// writer receives registries in mutation order.
    async fn enqueue_flush(&self, records: Vec<Reservation>) -> Option<oneshot::Receiver<io::Result<()>>> {
        let (tx, rx) = oneshot::channel();
        let request = FlushRequest { records, response: tx };
        if self.persist_tx.send(request).await.is_err() {
            return None;
        }
        Some(rx)
    }

    async fn await_flush(pending: Option<oneshot::Receiver<io::Result<()>>>) -> Result<(), EngineError> {
        let rx = pending.ok_or_else(|| EngineError::Persistence("writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::Persistence("writer dropped response".into()))?
            .map_err(|e| EngineError::Persistence(e.to_string()))
    }

    /// Flush on the mutation/tick path: a failure is logged and counted only.
    async fn flush_logged(&self, pending: Option<oneshot::Receiver<io::Result<()>>>) {
        if let Err(e) = Self::await_flush(pending).await {
            error!("registry flush failed: {e}");
            metrics::counter!(crate::observability::FLUSH_FAILURES_TOTAL).increment(1);
        }
    }

    /// Write the current registry and report the outcome.
    pub async fn flush(&self) -> Result<(), EngineError> {
        let store = self.store.lock().await;
        let pending = self.enqueue_flush(store.list()).await;
        drop(store);
        Self::await_flush(pending).await
    }

    /// Tail of every successful mutation: push the new snapshot, queue the
    /// flush, release the lock, then wait for the write.
    pub(super) async fn commit(&self, store: MutexGuard<'_, TableStore>) {
        self.notify.publish(store.snapshot(now_ms()));
        metrics::gauge!(crate::observability::RESERVATIONS_ACTIVE).set(store.len() as f64);
        let pending = self.enqueue_flush(store.list()).await;
        drop(store);
        self.flush_logged(pending).await;
    }

    // ── Tick ─────────────────────────────────────────────────

    /// Recompute every reservation against `now`: fire due alarms, publish
    /// the snapshot, and flush if any latch flipped.
    pub async fn tick(&self, now: Ms) -> TickReport {
        let tick_start = Instant::now();
        let mut store = self.store.lock().await;

        let alarms = store.evaluate_alarms(now);
        for alarm in &alarms {
            info!(table = %alarm.table_number, threshold = alarm.threshold.label(), "{}", alarm.message);
            metrics::counter!(crate::observability::ALARMS_TOTAL, "threshold" => alarm.threshold.label())
                .increment(1);
            self.notify.alarm(alarm.clone());
        }
        self.notify.publish(store.snapshot(now));
        metrics::gauge!(crate::observability::VIEWERS_SUBSCRIBED).set(self.notify.viewer_count() as f64);

        let reservations = store.len();
        let latched = !alarms.is_empty();
        let pending = if latched {
            self.enqueue_flush(store.list()).await
        } else {
            None
        };
        drop(store);
        if latched {
            self.flush_logged(pending).await;
        }

        metrics::histogram!(crate::observability::TICK_DURATION_SECONDS)
            .record(tick_start.elapsed().as_secs_f64());
        TickReport { alarms, reservations }
    }
}
