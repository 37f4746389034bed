//! Per-shard publish worker
//!
//! Two cooperating tasks share one outbound connection. The accumulator owns
//! a private buffer: enqueued messages land there, and a coalesced check
//! signal wakes it to cut a batch whenever the executor is idle. The executor
//! publishes each batch in order and flushes once per batch, so a shard's
//! messages reach the fabric in FIFO enqueue order with at most one batch in
//! flight.

use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use contracts::{Connection, RelayError, RelayMessage, ShardId, DEFAULT_FLUSH_TIMEOUT};
use futures_util::FutureExt;
use tokio::sync::{mpsc, oneshot, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

use crate::metrics::RelayMetrics;

const STATE_READY: u8 = 0;
const STATE_BUSY: u8 = 1;

/// Clonable enqueue handle for one shard worker.
#[derive(Clone)]
pub struct WorkerQueue {
    shard_id: ShardId,
    items_tx: mpsc::UnboundedSender<RelayMessage>,
    check: Arc<Notify>,
}

impl WorkerQueue {
    pub fn shard_id(&self) -> &ShardId {
        &self.shard_id
    }

    /// Enqueue a message for ordered batched publish. Returns the message
    /// back if the worker has already stopped.
    pub fn publish(&self, msg: RelayMessage) -> Result<(), RelayMessage> {
        self.items_tx.send(msg).map_err(|e| e.0)?;
        // Coalesced wake-up: an already pending signal absorbs this one.
        self.check.notify_one();
        Ok(())
    }
}

/// One shard's actor: accumulator task, executor task, and the dedicated
/// outbound connection they share.
pub struct PublishWorker<C: Connection + 'static> {
    shard_id: ShardId,
    queue: WorkerQueue,
    conn: Arc<C>,
    stop_tx: oneshot::Sender<()>,
    accumulator: JoinHandle<()>,
    executor: JoinHandle<()>,
}

impl<C: Connection + 'static> PublishWorker<C> {
    pub fn spawn(shard_id: ShardId, conn: Arc<C>, metrics: Arc<RelayMetrics>) -> Self {
        let (items_tx, items_rx) = mpsc::unbounded_channel();
        let (batches_tx, batches_rx) = mpsc::channel(1);
        let (stop_tx, stop_rx) = oneshot::channel();
        let check = Arc::new(Notify::new());
        let state = Arc::new(AtomicU8::new(STATE_READY));

        let queue = WorkerQueue {
            shard_id: shard_id.clone(),
            items_tx,
            check: Arc::clone(&check),
        };

        let accumulator = tokio::spawn(accumulator_loop(
            items_rx,
            batches_tx,
            stop_rx,
            Arc::clone(&check),
            Arc::clone(&state),
        ));
        let executor = tokio::spawn(executor_loop(
            batches_rx,
            Arc::clone(&conn),
            check,
            state,
            shard_id.clone(),
            metrics,
        ));

        Self {
            shard_id,
            queue,
            conn,
            stop_tx,
            accumulator,
            executor,
        }
    }

    pub fn shard_id(&self) -> &ShardId {
        &self.shard_id
    }

    pub fn queue(&self) -> WorkerQueue {
        self.queue.clone()
    }

    /// Stop both loops, flush everything enqueued so far, then drain and
    /// close the shard connection.
    pub async fn stop(self) -> Result<(), RelayError> {
        let _ = self.stop_tx.send(());
        let _ = self.accumulator.await;
        let _ = self.executor.await;
        debug!(shard = %self.shard_id, "publish worker stopped");
        self.conn.drain().await?;
        self.conn.close().await
    }
}

async fn accumulator_loop(
    mut items_rx: mpsc::UnboundedReceiver<RelayMessage>,
    batches_tx: mpsc::Sender<Vec<RelayMessage>>,
    mut stop_rx: oneshot::Receiver<()>,
    check: Arc<Notify>,
    state: Arc<AtomicU8>,
) {
    let mut buffer: Vec<RelayMessage> = Vec::new();

    loop {
        tokio::select! {
            biased;
            _ = &mut stop_rx => break,
            item = items_rx.recv() => match item {
                Some(item) => buffer.push(item),
                None => break,
            },
            _ = check.notified() => {
                if buffer.is_empty() {
                    continue;
                }
                if try_claim(&state) {
                    // State gate guarantees the capacity-1 slot is free.
                    if batches_tx.send(std::mem::take(&mut buffer)).await.is_err() {
                        return;
                    }
                }
            }
        }
    }

    // Backlog already accepted by publish() still gets delivered.
    while let Ok(item) = items_rx.try_recv() {
        buffer.push(item);
    }
    loop {
        if try_claim(&state) {
            if buffer.is_empty() {
                state.store(STATE_READY, Ordering::Release);
                break;
            }
            if batches_tx.send(std::mem::take(&mut buffer)).await.is_err() {
                break;
            }
        } else {
            // Executor re-arms the check signal when the in-flight batch
            // completes.
            check.notified().await;
        }
    }
    // Dropping batches_tx ends the executor once its queue is empty.
}

fn try_claim(state: &AtomicU8) -> bool {
    state
        .compare_exchange(STATE_READY, STATE_BUSY, Ordering::AcqRel, Ordering::Acquire)
        .is_ok()
}

async fn executor_loop<C: Connection>(
    mut batches_rx: mpsc::Receiver<Vec<RelayMessage>>,
    conn: Arc<C>,
    check: Arc<Notify>,
    state: Arc<AtomicU8>,
    shard_id: ShardId,
    metrics: Arc<RelayMetrics>,
) {
    while let Some(batch) = batches_rx.recv().await {
        let len = batch.len();
        let outcome = AssertUnwindSafe(publish_batch(&*conn, batch, &shard_id, &metrics))
            .catch_unwind()
            .await;
        match outcome {
            Ok(()) => metrics.record_batch(len),
            Err(_) => {
                metrics.record_publish_error();
                error!(shard = %shard_id, batch_len = len, "batch handler panicked, recovering");
            }
        }
        state.store(STATE_READY, Ordering::Release);
        // Pick up anything buffered while this batch was in flight.
        check.notify_one();
    }
}

/// Publish every message in batch order, then flush once. Individual publish
/// failures are logged and skipped; there is no retry beyond the immediate
/// attempt.
async fn publish_batch<C: Connection>(
    conn: &C,
    batch: Vec<RelayMessage>,
    shard_id: &ShardId,
    metrics: &RelayMetrics,
) {
    for msg in batch {
        if let Err(e) = conn.publish(&msg.subject, msg.payload).await {
            metrics.record_publish_error();
            warn!(shard = %shard_id, subject = %msg.subject, error = %e, "publish failed");
        }
    }
    if let Err(e) = conn.flush_timeout(DEFAULT_FLUSH_TIMEOUT).await {
        metrics.record_publish_error();
        warn!(shard = %shard_id, error = %e, "batch flush failed");
    }
}
