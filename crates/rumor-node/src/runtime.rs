//! Line-oriented message runtime.
//!
//! Owns everything the dissemination engine treats as external: the node
//! identity assigned by `init`, message ids, matching replies to pending
//! requests, and writing one JSON message per line. All outbound messages
//! go through a single queue drained by [`write_lines`], so lines written by
//! concurrent tasks never interleave.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, OnceLock, PoisonError};

use async_trait::async_trait;
use rumor_protocols::{Body, Message, NodeId, Payload, Transport};
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, trace};

use crate::error::Result;

#[derive(Debug)]
struct Identity {
    node_id: NodeId,
    node_ids: Vec<NodeId>,
}

/// Transport runtime backed by an outbound message queue.
#[derive(Debug)]
pub struct Runtime {
    identity: OnceLock<Identity>,
    next_msg_id: AtomicU64,
    pending: Mutex<HashMap<u64, oneshot::Sender<Payload>>>,
    outbound: mpsc::UnboundedSender<Message>,
}

impl Runtime {
    /// Create a runtime that queues outbound messages on `outbound`.
    pub fn new(outbound: mpsc::UnboundedSender<Message>) -> Self {
        Self {
            identity: OnceLock::new(),
            next_msg_id: AtomicU64::new(1),
            pending: Mutex::new(HashMap::new()),
            outbound,
        }
    }

    /// Assign this node's identity. Returns `false` if it was already set.
    pub fn init(&self, node_id: NodeId, node_ids: Vec<NodeId>) -> bool {
        self.identity.set(Identity { node_id, node_ids }).is_ok()
    }

    /// Every node id in the cluster, as announced by `init`.
    pub fn node_ids(&self) -> &[NodeId] {
        self.identity
            .get()
            .map(|identity| identity.node_ids.as_slice())
            .unwrap_or_default()
    }

    /// Reply to `request`, correlating by its `msg_id`.
    pub fn reply(&self, request: &Message, payload: Payload) -> rumor_protocols::Result<()> {
        self.enqueue(request.reply(payload))
    }

    /// Reply to a request known only by its addresses and `msg_id`.
    pub fn reply_to(
        &self,
        request_src: &str,
        request_dest: &str,
        msg_id: u64,
        payload: Payload,
    ) -> rumor_protocols::Result<()> {
        self.enqueue(Message {
            src: request_dest.to_string(),
            dest: request_src.to_string(),
            body: Body {
                msg_id: None,
                in_reply_to: Some(msg_id),
                payload,
            },
        })
    }

    /// Hand a reply to the request waiting for it.
    ///
    /// Returns `false` if nothing is waiting on `in_reply_to`, e.g. because
    /// the request already timed out.
    pub fn complete(&self, in_reply_to: u64, payload: Payload) -> bool {
        let waiter = self.pending_map().remove(&in_reply_to);
        match waiter {
            Some(tx) => tx.send(payload).is_ok(),
            None => false,
        }
    }

    /// Number of requests still waiting for a reply.
    pub fn pending_requests(&self) -> usize {
        self.pending_map().len()
    }

    fn pending_map(&self) -> std::sync::MutexGuard<'_, HashMap<u64, oneshot::Sender<Payload>>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn emit(&self, dest: &str, body: Body) -> rumor_protocols::Result<()> {
        let src = self.node_id().ok_or(rumor_protocols::Error::NotInitialized)?;
        self.enqueue(Message {
            src: src.to_string(),
            dest: dest.to_string(),
            body,
        })
    }

    fn enqueue(&self, message: Message) -> rumor_protocols::Result<()> {
        trace!(dest = %message.dest, kind = message.body.payload.type_name(), "Queueing message");
        self.outbound
            .send(message)
            .map_err(|_| rumor_protocols::Error::Closed)
    }
}

/// Removes a pending request when its `rpc` future finishes or is dropped.
struct PendingGuard<'a> {
    runtime: &'a Runtime,
    msg_id: u64,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.runtime.pending_map().remove(&self.msg_id);
    }
}

#[async_trait]
impl Transport for Runtime {
    fn node_id(&self) -> Option<&str> {
        self.identity.get().map(|identity| identity.node_id.as_str())
    }

    async fn send(&self, dest: &str, payload: Payload) -> rumor_protocols::Result<()> {
        self.emit(dest, Body::new(payload))
    }

    async fn rpc(&self, dest: &str, payload: Payload) -> rumor_protocols::Result<Payload> {
        let msg_id = self.next_msg_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        self.pending_map().insert(msg_id, tx);
        let _guard = PendingGuard {
            runtime: self,
            msg_id,
        };

        self.emit(dest, Body::request(msg_id, payload))?;
        rx.await.map_err(|_| rumor_protocols::Error::Closed)
    }
}

/// Write queued messages as newline-delimited JSON until the queue closes.
pub async fn write_lines<W>(mut outbound: mpsc::UnboundedReceiver<Message>, mut writer: W) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    while let Some(message) = outbound.recv().await {
        let line = serde_json::to_string(&message)? + "\n";
        writer.write_all(line.as_bytes()).await?;
        writer.flush().await?;
    }
    debug!("Outbound queue closed");
    Ok(())
}
