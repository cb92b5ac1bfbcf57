//! Peer-to-peer distributed shared-object runtime.
//!
//! A [`LocalNode`] mints [`collage_store::ObjectStore`] entries and wires
//! their master/slave decisions onto [`collage_net::Connection`]s as framed
//! [`collage_wire::Command`]s. The three crates it sits on top of split
//! cleanly: `collage-wire` owns the packet/command lifecycle, `collage-net`
//! owns connections and dispatch, `collage-store` owns the object table and
//! change-manager state machines — this crate is the glue that turns one
//! node's local decisions into wire traffic and back.
//!
//! # Example
//!
//! ```no_run
//! use collage::{LocalNode, NodeConfig};
//! use collage_wire::NodeId;
//!
//! # #[tokio::main]
//! # async fn main() {
//! let node = LocalNode::new(NodeId::generate(), NodeConfig::default());
//! assert_eq!(node.node_id().is_zero(), false);
//! # }
//! ```

mod config;
mod framing;
mod local_node;
mod payload;

pub use config::NodeConfig;
pub use local_node::{LocalNode, MapOutcome};

pub use collage_net::{Connection, ConnectionError, PipeConnection};
pub use collage_store::{ChangeType, Object, ObjectStoreError};
pub use collage_wire::{CommandId, InstanceId, NodeId, ObjectId, Version};
