//! Packet and `Command` lifecycle: pooled buffers and the multi-producer
//! command queue that feeds a node's command thread.
//!
//! This crate is the transport layer underneath the object store: every
//! inbound wire message becomes a [`Command`], allocated from a
//! [`CommandCache`] so the receiver thread never allocates on its hot path,
//! and handed to a [`CommandQueue`] for the command thread to drain.
//!
//! # Example
//!
//! ```
//! use collage_wire::{CommandCache, CommandId, DataType, NodeId, QueueConfig, CommandQueue};
//! use std::sync::Arc;
//!
//! let cache = Arc::new(CommandCache::new());
//! let queue = CommandQueue::new(QueueConfig::default());
//! let producer = queue.register().unwrap();
//!
//! let cmd = collage_wire::Command::alloc(
//!     &cache,
//!     NodeId::generate(),
//!     NodeId::ZERO,
//!     DataType::Object,
//!     CommandId::ObjectCommit,
//!     64,
//! );
//! producer.push(cmd);
//!
//! if let Some(cmd) = queue.pop() {
//!     let _ = cmd.header();
//! }
//! ```

mod backoff;
mod cache;
mod command;
mod config;
mod ids;
mod invariants;
mod metrics;
mod packet;
mod queue;
mod reservation;
mod ring;
mod spinlock;

pub use backoff::Backoff;
pub use cache::CommandCache;
pub use command::Command;
pub use config::{QueueConfig, MANY_PEERS_CONFIG, SINGLE_PEER_CONFIG};
pub use ids::{InstanceId, NodeId, ObjectId, Version};
pub use metrics::{QueueMetrics, QueueMetricsSnapshot};
pub use packet::{CommandId, DataType, ObjectHeader, Packet, PacketHeader};
pub use queue::{CommandProducer, CommandQueue, QueueError};
pub use reservation::Reservation;
pub use ring::Ring;
pub use spinlock::{SpinLock, SpinLockGuard};
