//! Rumor Protocols - broadcast dissemination over a gossip topology
//!
//! This crate provides the protocol side of a Rumor node: the messages nodes
//! exchange, the transport seam they travel through, and the engine that
//! decides what to spread and to whom.
//!
//! # Overview
//!
//! ## Dissemination
//!
//! The [`Disseminator`] accepts values injected by clients or gossiped by
//! neighbors and spreads each distinct value exactly once:
//!
//! - **Dedup**: a value already gossiped by this node is ignored on arrival
//! - **Fanout**: a new value goes to every topology neighbor except its sender
//! - **Independence**: each neighbor gets its own delivery task
//!
//! ## Delivery
//!
//! The [`delivery`] module drives one value to one neighbor, either
//! retrying until acknowledged within a deadline ([`DeliveryMode::Reliable`])
//! or sending once ([`DeliveryMode::FireAndForget`]).
//!
//! # Example
//!
//! ```rust,ignore
//! use rumor_protocols::{Disseminator, GossipConfig};
//!
//! let engine = Disseminator::new(transport, GossipConfig::default());
//! engine.set_topology(&topology)?;
//!
//! if let Some(fanout) = engine.ingest(42, Some("c1")).into_fanout() {
//!     for report in fanout.join().await {
//!         println!("{} -> {}", report.neighbor, report.state);
//!     }
//! }
//! assert_eq!(engine.read(), vec![42]);
//! ```

pub mod delivery;
pub mod engine;
pub mod error;
pub mod message;
pub mod transport;

pub use delivery::{Delivery, DeliveryMode, DeliveryReport, DeliveryState, RetryPolicy};
pub use engine::{Disseminator, Fanout, GossipConfig, GossipStats, Ingest};
pub use error::{Error, Result};
pub use message::{Body, ErrorCode, Message, NodeId, Payload, Topology};
pub use transport::Transport;

// Re-export store types for convenience
pub use rumor_store::{MessageStore, Value};
