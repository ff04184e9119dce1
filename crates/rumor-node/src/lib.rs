//! Rumor Node - a gossip broadcast node on stdin/stdout
//!
//! Runs one member of a broadcast cluster. Messages arrive as
//! newline-delimited JSON on stdin and leave the same way on stdout;
//! logs go to stderr.
//!
//! # Architecture
//!
//! - **Runtime**: line framing, node identity, request/reply correlation
//! - **Node**: dispatch of each message kind to the dissemination engine
//! - **Config**: delivery policy from environment variables
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use rumor_node::{BroadcastNode, NodeConfig, Runtime};
//! use tokio::io::BufReader;
//! use tokio::sync::mpsc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = NodeConfig::from_env()?;
//!     let (tx, rx) = mpsc::unbounded_channel();
//!     tokio::spawn(rumor_node::runtime::write_lines(rx, tokio::io::stdout()));
//!
//!     let node = BroadcastNode::new(Arc::new(Runtime::new(tx)), &config);
//!     node.serve(BufReader::new(tokio::io::stdin())).await?;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod error;
pub mod node;
pub mod runtime;

pub use config::NodeConfig;
pub use error::{Error, Result};
pub use node::BroadcastNode;
pub use runtime::Runtime;
