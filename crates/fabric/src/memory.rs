//! In-process memory fabric
//!
//! A hub per URL routes published messages to matching queue-group
//! subscriptions. Delivery is immediate and per-subscription FIFO, which is
//! what the relay engine's ordering tests rely on. Connect failures can be
//! injected per URL for lifecycle tests.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;
use contracts::{Connection, Fabric, RelayError, RelayMessage, Subscription};
use tokio::sync::mpsc;
use tracing::debug;

use crate::subject::subject_matches;

/// In-process fabric: one hub per URL, shared by every connection opened
/// through the same `MemoryFabric` instance.
#[derive(Default)]
pub struct MemoryFabric {
    hubs: Mutex<HashMap<String, Arc<Hub>>>,
    fail_urls: Mutex<HashSet<String>>,
}

impl MemoryFabric {
    /// Create an empty fabric.
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every future `connect` to `url` fail. For lifecycle tests.
    pub fn fail_connections_to(&self, url: &str) {
        self.fail_urls.lock().unwrap().insert(url.to_string());
    }

    /// Tear down every subscription on `url`, closing their receive streams.
    /// Simulates a source-side outage.
    pub fn drop_subscriptions(&self, url: &str) {
        self.hub(url).state.lock().unwrap().subs.clear();
    }

    fn hub(&self, url: &str) -> Arc<Hub> {
        Arc::clone(
            self.hubs
                .lock()
                .unwrap()
                .entry(url.to_string())
                .or_default(),
        )
    }
}

impl Fabric for MemoryFabric {
    type Connection = MemoryConnection;

    async fn connect(&self, url: &str) -> Result<MemoryConnection, RelayError> {
        if self.fail_urls.lock().unwrap().contains(url) {
            return Err(RelayError::connection(url, "connect refused"));
        }
        let hub = self.hub(url);
        let conn_id = hub.next_id();
        debug!(url = %url, conn_id, "memory fabric connect");
        Ok(MemoryConnection {
            url: url.to_string(),
            hub,
            conn_id,
            closed: AtomicBool::new(false),
        })
    }
}

/// Routing table for one URL.
#[derive(Default)]
struct Hub {
    ids: AtomicU64,
    state: Mutex<HubState>,
}

#[derive(Default)]
struct HubState {
    subs: Vec<SubEntry>,
    /// Round-robin cursor per queue group
    group_cursors: HashMap<String, usize>,
}

struct SubEntry {
    id: u64,
    conn_id: u64,
    pattern: String,
    group: String,
    tx: mpsc::UnboundedSender<RelayMessage>,
}

impl Hub {
    fn next_id(&self) -> u64 {
        self.ids.fetch_add(1, Ordering::Relaxed)
    }

    /// Deliver `msg` to exactly one member of every matching queue group.
    fn publish(&self, msg: &RelayMessage) {
        let mut state = self.state.lock().unwrap();

        let mut matches: HashMap<String, Vec<usize>> = HashMap::new();
        for (i, entry) in state.subs.iter().enumerate() {
            if subject_matches(&entry.pattern, &msg.subject) {
                matches.entry(entry.group.clone()).or_default().push(i);
            }
        }

        for (group, members) in matches {
            let pick = {
                let cursor = state.group_cursors.entry(group).or_insert(0);
                let pick = *cursor % members.len();
                *cursor += 1;
                pick
            };
            // Receiver may already be gone; delivery is best-effort.
            let _ = state.subs[members[pick]].tx.send(msg.clone());
        }
    }

    fn remove_sub(&self, id: u64) {
        self.state.lock().unwrap().subs.retain(|e| e.id != id);
    }

    fn remove_conn(&self, conn_id: u64) {
        self.state
            .lock()
            .unwrap()
            .subs
            .retain(|e| e.conn_id != conn_id);
    }
}

/// One connection to a memory hub.
pub struct MemoryConnection {
    url: String,
    hub: Arc<Hub>,
    conn_id: u64,
    closed: AtomicBool,
}

impl MemoryConnection {
    fn ensure_open(&self) -> Result<(), RelayError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(RelayError::connection(&self.url, "connection closed"));
        }
        Ok(())
    }

    fn shutdown(&self) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            self.hub.remove_conn(self.conn_id);
        }
    }
}

impl Connection for MemoryConnection {
    type Subscription = MemorySubscription;

    async fn publish(&self, subject: &str, payload: Bytes) -> Result<(), RelayError> {
        self.ensure_open()?;
        self.hub.publish(&RelayMessage::new(subject, payload));
        Ok(())
    }

    async fn flush_timeout(&self, _timeout: Duration) -> Result<(), RelayError> {
        // In-process delivery happens inside publish; nothing is buffered.
        self.ensure_open()
    }

    async fn queue_subscribe(
        &self,
        topic: &str,
        group: &str,
    ) -> Result<MemorySubscription, RelayError> {
        self.ensure_open()
            .map_err(|e| RelayError::subscribe(topic, e.to_string()))?;
        let (tx, rx) = mpsc::unbounded_channel();
        let id = self.hub.next_id();
        self.hub.state.lock().unwrap().subs.push(SubEntry {
            id,
            conn_id: self.conn_id,
            pattern: topic.to_string(),
            group: group.to_string(),
            tx,
        });
        debug!(topic = %topic, group = %group, "memory fabric queue subscribe");
        Ok(MemorySubscription {
            hub: Arc::clone(&self.hub),
            id,
            rx,
        })
    }

    async fn drain(&self) -> Result<(), RelayError> {
        self.shutdown();
        Ok(())
    }

    async fn close(&self) -> Result<(), RelayError> {
        self.shutdown();
        Ok(())
    }
}

/// One queue-group subscription on a memory connection.
pub struct MemorySubscription {
    hub: Arc<Hub>,
    id: u64,
    rx: mpsc::UnboundedReceiver<RelayMessage>,
}

impl Subscription for MemorySubscription {
    async fn recv(&mut self) -> Option<RelayMessage> {
        self.rx.recv().await
    }

    async fn unsubscribe(&mut self) -> Result<(), RelayError> {
        self.hub.remove_sub(self.id);
        self.rx.close();
        Ok(())
    }
}

impl Drop for MemorySubscription {
    fn drop(&mut self) {
        self.hub.remove_sub(self.id);
    }
}
