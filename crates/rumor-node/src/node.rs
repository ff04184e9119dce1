//! Broadcast node - dispatches inbound messages to the dissemination engine.
//!
//! A single read loop parses each line and either routes it to a waiting
//! request (replies) or handles it inline. Handlers never block: gossip
//! runs in tasks spawned by the engine.

use std::sync::Arc;

use rumor_protocols::{Body, Disseminator, Error as ProtocolError, ErrorCode, Message, Payload};
use serde::Deserialize;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tracing::{debug, info, trace, warn};

use crate::config::NodeConfig;
use crate::error::Result;
use crate::runtime::Runtime;

/// Envelope with a body that has not been interpreted yet.
#[derive(Debug, Deserialize)]
struct RawMessage {
    src: String,
    dest: String,
    body: serde_json::Value,
}

/// A broadcast cluster member.
pub struct BroadcastNode {
    runtime: Arc<Runtime>,
    engine: Disseminator<Runtime>,
}

impl BroadcastNode {
    /// Create a node around `runtime`.
    pub fn new(runtime: Arc<Runtime>, config: &NodeConfig) -> Self {
        let engine = Disseminator::new(Arc::clone(&runtime), config.gossip);
        Self { runtime, engine }
    }

    /// Get the dissemination engine.
    pub fn engine(&self) -> &Disseminator<Runtime> {
        &self.engine
    }

    /// Get the runtime.
    pub fn runtime(&self) -> &Arc<Runtime> {
        &self.runtime
    }

    /// Handle messages from `reader` until it reaches end of input.
    pub async fn serve<R>(&self, reader: R) -> Result<()>
    where
        R: AsyncBufRead + Unpin,
    {
        let mut lines = reader.lines();
        while let Some(line) = lines.next_line().await? {
            if line.trim().is_empty() {
                continue;
            }
            self.handle_line(&line)?;
        }

        info!(stats = ?self.engine.stats(), "Input closed, shutting down");
        Ok(())
    }

    /// Handle one line of input.
    ///
    /// Unparseable envelopes are logged and skipped. Bodies that fail to
    /// parse are answered with an error and change no state.
    pub fn handle_line(&self, line: &str) -> Result<()> {
        let raw: RawMessage = match serde_json::from_str(line) {
            Ok(raw) => raw,
            Err(e) => {
                warn!(error = %e, "Dropping unparseable message");
                return Ok(());
            }
        };

        let msg_id = raw.body.get("msg_id").and_then(serde_json::Value::as_u64);
        let kind = raw
            .body
            .get("type")
            .and_then(serde_json::Value::as_str)
            .unwrap_or_default()
            .to_string();

        let body: Body = match serde_json::from_value(raw.body) {
            Ok(body) => body,
            Err(e) => {
                let code = if Payload::is_known_type(&kind) {
                    ErrorCode::MalformedRequest
                } else {
                    ErrorCode::NotSupported
                };
                warn!(src = %raw.src, kind = %kind, %code, error = %e, "Rejecting message");
                if let Some(msg_id) = msg_id {
                    self.runtime
                        .reply_to(&raw.src, &raw.dest, msg_id, Payload::error(code, e.to_string()))?;
                }
                return Ok(());
            }
        };

        let message = Message {
            src: raw.src,
            dest: raw.dest,
            body,
        };

        if let Some(in_reply_to) = message.body.in_reply_to {
            if !self.runtime.complete(in_reply_to, message.body.payload) {
                debug!(src = %message.src, in_reply_to, "Reply with no waiting request");
            }
            return Ok(());
        }

        self.dispatch(&message)
    }

    fn dispatch(&self, message: &Message) -> Result<()> {
        trace!(src = %message.src, kind = message.body.payload.type_name(), "Dispatching message");

        match &message.body.payload {
            Payload::Init { node_id, node_ids } => {
                if self.runtime.init(node_id.clone(), node_ids.clone()) {
                    info!(node_id = %node_id, cluster_size = node_ids.len(), "Node initialized");
                } else {
                    warn!(node_id = %node_id, "Ignoring repeated init");
                }
                self.runtime.reply(message, Payload::InitOk)?;
            }

            Payload::Topology { topology } => match self.engine.set_topology(topology) {
                Ok(()) => self.runtime.reply(message, Payload::TopologyOk)?,
                Err(ProtocolError::NotInitialized) => {
                    warn!(src = %message.src, "Topology received before init");
                    self.runtime.reply(
                        message,
                        Payload::error(ErrorCode::TemporarilyUnavailable, "node not initialized"),
                    )?;
                }
                Err(e) => return Err(e.into()),
            },

            Payload::Broadcast { message: value } => {
                // Gossip keeps running in the background; the sender is acked now.
                let outcome = self.engine.ingest(*value, Some(message.src.as_str()));
                trace!(value, duplicate = outcome.is_duplicate(), "Ingested broadcast");
                if message.body.msg_id.is_some() {
                    self.runtime.reply(message, Payload::BroadcastOk)?;
                }
            }

            Payload::Read => {
                let messages = self.engine.read();
                self.runtime.reply(message, Payload::ReadOk { messages })?;
            }

            Payload::BroadcastOk => {
                trace!(src = %message.src, "Ignoring uncorrelated broadcast_ok");
            }

            other => {
                debug!(src = %message.src, kind = other.type_name(), "Unsupported message");
                if message.body.msg_id.is_some() {
                    self.runtime.reply(
                        message,
                        Payload::error(
                            ErrorCode::NotSupported,
                            format!("cannot handle {}", other.type_name()),
                        ),
                    )?;
                }
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rumor_protocols::{DeliveryMode, GossipConfig, RetryPolicy, Transport};
    use serde_json::json;
    use std::collections::HashSet;
    use std::time::Duration;
    use tokio::sync::mpsc;

    fn node(config: NodeConfig) -> (BroadcastNode, mpsc::UnboundedReceiver<Message>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let node = BroadcastNode::new(Arc::new(Runtime::new(tx)), &config);
        (node, rx)
    }

    fn feed(node: &BroadcastNode, value: serde_json::Value) {
        node.handle_line(&value.to_string()).unwrap();
    }

    fn init(node: &BroadcastNode, rx: &mut mpsc::UnboundedReceiver<Message>) {
        feed(
            node,
            json!({"src": "c0", "dest": "n1", "body": {"type": "init", "msg_id": 1, "node_id": "n1", "node_ids": ["n1", "n2", "n3"]}}),
        );
        let reply = rx.try_recv().unwrap();
        assert_eq!(reply.body.payload, Payload::InitOk);
        assert_eq!(reply.body.in_reply_to, Some(1));
    }

    fn set_topology(node: &BroadcastNode, rx: &mut mpsc::UnboundedReceiver<Message>) {
        feed(
            node,
            json!({"src": "c0", "dest": "n1", "body": {"type": "topology", "msg_id": 2, "topology": {"n1": ["n2", "n3"], "n2": ["n1"], "n3": ["n1"]}}}),
        );
        assert_eq!(rx.try_recv().unwrap().body.payload, Payload::TopologyOk);
    }

    #[tokio::test]
    async fn init_assigns_identity() {
        let (node, mut rx) = node(NodeConfig::default());
        init(&node, &mut rx);
        assert_eq!(node.runtime().node_id(), Some("n1"));
        assert_eq!(node.runtime().node_ids().len(), 3);
    }

    #[tokio::test]
    async fn topology_before_init_is_rejected() {
        let (node, mut rx) = node(NodeConfig::default());
        feed(
            &node,
            json!({"src": "c0", "dest": "n1", "body": {"type": "topology", "msg_id": 2, "topology": {"n1": ["n2"]}}}),
        );

        let reply = rx.try_recv().unwrap();
        assert_eq!(reply.dest, "c0");
        assert!(matches!(reply.body.payload, Payload::Error { code: 11, .. }));
        assert_eq!(node.engine().neighbors(), None);
    }

    #[tokio::test]
    async fn broadcast_is_acked_and_gossiped() {
        let (node, mut rx) = node(NodeConfig::default());
        init(&node, &mut rx);
        set_topology(&node, &mut rx);

        feed(
            &node,
            json!({"src": "c1", "dest": "n1", "body": {"type": "broadcast", "msg_id": 10, "message": 42}}),
        );

        let ack = rx.recv().await.unwrap();
        assert_eq!(ack.dest, "c1");
        assert_eq!(ack.body.payload, Payload::BroadcastOk);
        assert_eq!(ack.body.in_reply_to, Some(10));

        let mut gossip = Vec::new();
        for _ in 0..2 {
            gossip.push(rx.recv().await.unwrap());
        }
        let dests: HashSet<_> = gossip.iter().map(|m| m.dest.clone()).collect();
        assert_eq!(dests, HashSet::from(["n2".to_string(), "n3".to_string()]));

        for request in &gossip {
            assert_eq!(request.src, "n1");
            assert_eq!(request.body.payload, Payload::Broadcast { message: 42 });
            let msg_id = request.body.msg_id.expect("gossip expects an ack");
            feed(
                &node,
                json!({"src": request.dest, "dest": "n1", "body": {"type": "broadcast_ok", "in_reply_to": msg_id}}),
            );
        }

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(node.engine().stats().acked, 2);
        assert_eq!(node.runtime().pending_requests(), 0);
    }

    #[tokio::test]
    async fn gossip_from_neighbor_is_not_echoed() {
        let (node, mut rx) = node(NodeConfig::default());
        init(&node, &mut rx);
        set_topology(&node, &mut rx);

        feed(
            &node,
            json!({"src": "n2", "dest": "n1", "body": {"type": "broadcast", "msg_id": 5, "message": 8}}),
        );

        assert_eq!(rx.recv().await.unwrap().body.payload, Payload::BroadcastOk);
        let forwarded = rx.recv().await.unwrap();
        assert_eq!(forwarded.dest, "n3");

        // The same value again is acked but not forwarded.
        feed(
            &node,
            json!({"src": "n3", "dest": "n1", "body": {"type": "broadcast", "msg_id": 6, "message": 8}}),
        );
        assert_eq!(rx.recv().await.unwrap().body.payload, Payload::BroadcastOk);
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn broadcast_without_msg_id_is_not_acked() {
        let config = NodeConfig {
            gossip: GossipConfig::fire_and_forget(),
        };
        let (node, mut rx) = node(config);
        init(&node, &mut rx);

        feed(
            &node,
            json!({"src": "n2", "dest": "n1", "body": {"type": "broadcast", "message": 3}}),
        );
        assert!(rx.try_recv().is_err());
        assert_eq!(node.engine().read(), vec![3]);
    }

    #[tokio::test]
    async fn read_returns_distinct_values() {
        let (node, mut rx) = node(NodeConfig::default());
        init(&node, &mut rx);

        for (i, value) in [3, 7, 3, 9].into_iter().enumerate() {
            feed(
                &node,
                json!({"src": "c1", "dest": "n1", "body": {"type": "broadcast", "msg_id": 100 + i, "message": value}}),
            );
            assert_eq!(rx.try_recv().unwrap().body.payload, Payload::BroadcastOk);
        }

        feed(
            &node,
            json!({"src": "c1", "dest": "n1", "body": {"type": "read", "msg_id": 200}}),
        );
        let reply = rx.try_recv().unwrap();
        let Payload::ReadOk { messages } = reply.body.payload else {
            panic!("expected read_ok, got {:?}", reply.body.payload);
        };
        let seen: HashSet<_> = messages.into_iter().collect();
        assert_eq!(seen, HashSet::from([3, 7, 9]));
    }

    #[tokio::test]
    async fn malformed_broadcast_changes_nothing() {
        let (node, mut rx) = node(NodeConfig::default());
        init(&node, &mut rx);

        feed(
            &node,
            json!({"src": "c1", "dest": "n1", "body": {"type": "broadcast", "msg_id": 7, "message": "forty-two"}}),
        );

        let reply = rx.try_recv().unwrap();
        assert_eq!(reply.body.in_reply_to, Some(7));
        assert!(matches!(reply.body.payload, Payload::Error { code: 12, .. }));
        assert!(node.engine().read().is_empty());
    }

    #[tokio::test]
    async fn unknown_type_is_not_supported() {
        let (node, mut rx) = node(NodeConfig::default());
        init(&node, &mut rx);

        feed(
            &node,
            json!({"src": "c1", "dest": "n1", "body": {"type": "echo", "msg_id": 3, "echo": "hi"}}),
        );
        let reply = rx.try_recv().unwrap();
        assert!(matches!(reply.body.payload, Payload::Error { code: 10, .. }));
    }

    #[tokio::test]
    async fn garbage_is_skipped() {
        let (node, mut rx) = node(NodeConfig::default());
        node.handle_line("not json at all").unwrap();
        node.handle_line(r#"{"body": {}}"#).unwrap();
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn late_ack_is_ignored() {
        let (node, mut rx) = node(NodeConfig::default());
        init(&node, &mut rx);

        feed(
            &node,
            json!({"src": "n2", "dest": "n1", "body": {"type": "broadcast_ok", "in_reply_to": 999}}),
        );
        feed(
            &node,
            json!({"src": "n2", "dest": "n1", "body": {"type": "broadcast_ok"}}),
        );
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn unacked_gossip_is_retried_then_abandoned() {
        let policy = RetryPolicy::default()
            .with_deadline(Duration::from_secs(1))
            .with_backoff(Duration::from_millis(100))
            .with_attempt_timeout(Duration::from_millis(100));
        let config = NodeConfig {
            gossip: GossipConfig::default().with_mode(DeliveryMode::Reliable(policy)),
        };
        let (node, mut rx) = node(config);
        init(&node, &mut rx);
        feed(
            &node,
            json!({"src": "c0", "dest": "n1", "body": {"type": "topology", "msg_id": 2, "topology": {"n1": ["n2"]}}}),
        );
        rx.try_recv().unwrap();

        feed(
            &node,
            json!({"src": "c1", "dest": "n1", "body": {"type": "broadcast", "msg_id": 3, "message": 1}}),
        );
        assert_eq!(rx.recv().await.unwrap().body.payload, Payload::BroadcastOk);

        tokio::time::sleep(Duration::from_secs(2)).await;

        let mut attempts = 0;
        while let Ok(message) = rx.try_recv() {
            assert_eq!(message.dest, "n2");
            attempts += 1;
        }
        assert!(attempts > 1, "expected retries, saw {attempts}");

        let stats = node.engine().stats();
        assert_eq!(stats.abandoned, 1);
        assert_eq!(stats.attempts, attempts);
        assert_eq!(node.runtime().pending_requests(), 0);
    }
}
