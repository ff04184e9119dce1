//! Dissemination engine - accepting values and spreading them to neighbors.
//!
//! Each distinct value moves through three states on this node:
//!
//! ```text
//! Unknown ──ingest──▶ Seen ──gossip gate──▶ Seen + Broadcasted
//! ```
//!
//! The transition fires once per value no matter how many times, or from
//! how many neighbors, the value arrives. Client injections and neighbor
//! gossip take the same path; the sender is only used to avoid echoing the
//! value straight back.
//!
//! Gossip runs in background tasks, one per neighbor, so the caller can
//! acknowledge the sender as soon as [`Disseminator::ingest`] returns.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use rumor_store::{MessageStore, Value};
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

use crate::delivery::{Delivery, DeliveryMode, DeliveryReport, DeliveryState, RetryPolicy};
use crate::error::{Error, Result};
use crate::message::{NodeId, Topology};
use crate::transport::Transport;

/// Configuration for the dissemination engine.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GossipConfig {
    /// How each neighbor delivery is carried out.
    pub mode: DeliveryMode,
}

impl GossipConfig {
    /// Reliable delivery with the given retry policy.
    #[must_use]
    pub fn reliable(policy: RetryPolicy) -> Self {
        Self {
            mode: DeliveryMode::Reliable(policy),
        }
    }

    /// Send-once delivery with no acknowledgments.
    #[must_use]
    pub fn fire_and_forget() -> Self {
        Self {
            mode: DeliveryMode::FireAndForget,
        }
    }

    /// Set the delivery mode.
    #[must_use]
    pub fn with_mode(mut self, mode: DeliveryMode) -> Self {
        self.mode = mode;
        self
    }
}

/// Result of ingesting a value.
#[derive(Debug)]
pub enum Ingest {
    /// First time this node sees the value; gossip has been started.
    Accepted(Fanout),
    /// The value was already gossiped by this node; nothing was done.
    Duplicate,
}

impl Ingest {
    /// Check whether the value was already known.
    #[must_use]
    pub fn is_duplicate(&self) -> bool {
        matches!(self, Self::Duplicate)
    }

    /// Get the fanout started by this ingest, if any.
    #[must_use]
    pub fn into_fanout(self) -> Option<Fanout> {
        match self {
            Self::Accepted(fanout) => Some(fanout),
            Self::Duplicate => None,
        }
    }
}

/// In-flight deliveries of one value to its neighbors.
///
/// Dropping a `Fanout` detaches the deliveries; they keep running.
#[derive(Debug)]
pub struct Fanout {
    value: Value,
    targets: Vec<NodeId>,
    deliveries: Vec<JoinHandle<DeliveryReport>>,
}

impl Fanout {
    /// The value being spread.
    #[must_use]
    pub fn value(&self) -> Value {
        self.value
    }

    /// Neighbors a delivery was started for.
    #[must_use]
    pub fn targets(&self) -> &[NodeId] {
        &self.targets
    }

    /// Number of deliveries started.
    #[must_use]
    pub fn len(&self) -> usize {
        self.deliveries.len()
    }

    /// Whether no delivery was started (no topology yet, or no eligible neighbor).
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.deliveries.is_empty()
    }

    /// Wait for every delivery to finish.
    pub async fn join(self) -> Vec<DeliveryReport> {
        let mut reports = Vec::with_capacity(self.deliveries.len());
        for handle in self.deliveries {
            match handle.await {
                Ok(report) => reports.push(report),
                Err(e) => warn!(value = self.value, error = %e, "Delivery task failed"),
            }
        }
        reports
    }
}

/// Snapshot of engine counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GossipStats {
    /// Distinct values accepted into the seen-set.
    pub accepted: u64,
    /// Ingests short-circuited because the value was already gossiped.
    pub duplicates: u64,
    /// Neighbor deliveries started.
    pub deliveries: u64,
    /// Deliveries acknowledged by the neighbor.
    pub acked: u64,
    /// Deliveries given up at the deadline.
    pub abandoned: u64,
    /// Deliveries sent in fire-and-forget mode.
    pub sent: u64,
    /// Send attempts across all finished deliveries.
    pub attempts: u64,
}

#[derive(Debug, Default)]
struct Counters {
    accepted: AtomicU64,
    duplicates: AtomicU64,
    deliveries: AtomicU64,
    acked: AtomicU64,
    abandoned: AtomicU64,
    sent: AtomicU64,
    attempts: AtomicU64,
}

impl Counters {
    fn record(&self, report: &DeliveryReport) {
        self.attempts.fetch_add(u64::from(report.attempts), Ordering::Relaxed);
        let counter = match report.state {
            DeliveryState::Acked => &self.acked,
            DeliveryState::Abandoned => &self.abandoned,
            DeliveryState::Sent => &self.sent,
            DeliveryState::Pending => return,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self) -> GossipStats {
        GossipStats {
            accepted: self.accepted.load(Ordering::Relaxed),
            duplicates: self.duplicates.load(Ordering::Relaxed),
            deliveries: self.deliveries.load(Ordering::Relaxed),
            acked: self.acked.load(Ordering::Relaxed),
            abandoned: self.abandoned.load(Ordering::Relaxed),
            sent: self.sent.load(Ordering::Relaxed),
            attempts: self.attempts.load(Ordering::Relaxed),
        }
    }
}

/// Per-node broadcast dissemination engine.
///
/// Constructed once per node and shared by every message handler. Methods
/// that start gossip spawn Tokio tasks and must be called from within a
/// Tokio runtime.
pub struct Disseminator<T: Transport> {
    transport: Arc<T>,
    store: MessageStore,
    /// This node's neighbors; `None` until a topology arrives.
    neighbors: RwLock<Option<Vec<NodeId>>>,
    config: GossipConfig,
    counters: Arc<Counters>,
}

impl<T: Transport> Disseminator<T> {
    /// Create an engine with empty state and no topology.
    pub fn new(transport: Arc<T>, config: GossipConfig) -> Self {
        debug!(mode = %config.mode, "Created dissemination engine");
        Self {
            transport,
            store: MessageStore::new(),
            neighbors: RwLock::new(None),
            config,
            counters: Arc::new(Counters::default()),
        }
    }

    /// Get the engine configuration.
    pub fn config(&self) -> &GossipConfig {
        &self.config
    }

    /// Get the underlying message store.
    pub fn store(&self) -> &MessageStore {
        &self.store
    }

    /// Ingest a value delivered by `sender`.
    ///
    /// Values already gossiped are ignored. New values are recorded and
    /// gossiped to every neighbor except `sender`.
    pub fn ingest(&self, value: Value, sender: Option<&str>) -> Ingest {
        if self.store.is_broadcasted(value) {
            self.counters.duplicates.fetch_add(1, Ordering::Relaxed);
            trace!(value, sender, "Ignoring already gossiped value");
            return Ingest::Duplicate;
        }

        if self.store.record_seen(value) {
            self.counters.accepted.fetch_add(1, Ordering::Relaxed);
            debug!(value, sender, "Accepted new value");
        }

        match self.gossip(value, sender) {
            Some(fanout) => Ingest::Accepted(fanout),
            None => {
                // A concurrent ingest of the same value won the gossip gate.
                self.counters.duplicates.fetch_add(1, Ordering::Relaxed);
                Ingest::Duplicate
            }
        }
    }

    /// Gossip a value to every neighbor except `exclude`.
    ///
    /// Returns `None` if the value was already gossiped. Before a topology
    /// is set the value is still marked as gossiped, with an empty fanout.
    pub fn gossip(&self, value: Value, exclude: Option<&str>) -> Option<Fanout> {
        if !self.store.mark_broadcasted(value) {
            return None;
        }

        let targets: Vec<NodeId> = match &*self.neighbors.read().unwrap_or_else(PoisonError::into_inner) {
            Some(neighbors) => neighbors
                .iter()
                .filter(|n| Some(n.as_str()) != exclude)
                .cloned()
                .collect(),
            None => {
                debug!(value, "No topology yet, skipping gossip");
                Vec::new()
            }
        };

        let deliveries = targets
            .iter()
            .map(|neighbor| self.spawn_delivery(neighbor.clone(), value))
            .collect();

        trace!(value, ?targets, "Started gossip fanout");

        Some(Fanout {
            value,
            targets,
            deliveries,
        })
    }

    fn spawn_delivery(&self, neighbor: NodeId, value: Value) -> JoinHandle<DeliveryReport> {
        let transport = Arc::clone(&self.transport);
        let counters = Arc::clone(&self.counters);
        let delivery = Delivery::new(neighbor, value, self.config.mode);
        counters.deliveries.fetch_add(1, Ordering::Relaxed);

        tokio::spawn(async move {
            let report = delivery.run(transport.as_ref()).await;
            counters.record(&report);
            report
        })
    }

    /// All values seen so far.
    pub fn read(&self) -> Vec<Value> {
        self.store.all_seen()
    }

    /// Replace this node's neighbor list from a cluster topology.
    pub fn set_topology(&self, topology: &Topology) -> Result<()> {
        let node_id = self.transport.node_id().ok_or(Error::NotInitialized)?;

        let neighbors = match topology.get(node_id) {
            Some(neighbors) => neighbors.clone(),
            None => {
                warn!(node_id, "Topology has no entry for this node");
                Vec::new()
            }
        };

        info!(node_id, ?neighbors, "Topology updated");
        *self.neighbors.write().unwrap_or_else(PoisonError::into_inner) = Some(neighbors);
        Ok(())
    }

    /// This node's neighbors, if a topology has been set.
    pub fn neighbors(&self) -> Option<Vec<NodeId>> {
        self.neighbors
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Snapshot of the engine counters.
    pub fn stats(&self) -> GossipStats {
        self.counters.snapshot()
    }
}
