//! The seam between the dissemination engine and whatever carries its messages.

use async_trait::async_trait;

use crate::error::Result;
use crate::message::Payload;

/// Message transport used by the engine.
///
/// The transport owns framing, node identity and request/reply correlation.
/// The engine only supplies payloads and destinations.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// This node's id, once assigned.
    fn node_id(&self) -> Option<&str>;

    /// Send a payload without expecting a reply.
    async fn send(&self, dest: &str, payload: Payload) -> Result<()>;

    /// Send a payload as a request and wait for the correlated reply.
    ///
    /// Dropping the returned future abandons the request; a reply arriving
    /// afterwards is discarded by the transport.
    async fn rpc(&self, dest: &str, payload: Payload) -> Result<Payload>;
}
