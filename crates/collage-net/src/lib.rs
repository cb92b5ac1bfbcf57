//! Connection abstraction, command dispatch, and the request registry that
//! backs the synchronous `*Sync` entry points above the wire.
//!
//! This crate sits between [`collage_wire`]'s `Command`/`CommandQueue` and
//! the object store: a [`Connection`] yields byte frames, a [`Dispatcher`]
//! turns them into routed commands, and a [`RequestRegistry`] lets a caller
//! block on a reply that arrives asynchronously on another task.
//!
//! # Example
//!
//! ```
//! use collage_net::{ConnectionConfig, PipeConnection, Connection};
//!
//! # #[tokio::main]
//! # async fn main() {
//! let (a, b) = PipeConnection::pair(ConnectionConfig::default().queue_depth);
//! a.write(b"hello").await.unwrap();
//! assert_eq!(b.read_sync().await.unwrap(), b"hello");
//! # }
//! ```

mod config;
mod connection;
mod dispatch;
mod error;
mod invariants;
mod request;
mod shutdown;

pub use config::ConnectionConfig;
pub use connection::{Connection, PipeConnection};
pub use dispatch::{Dispatcher, Handler};
pub use error::{ConnectionError, RequestError};
pub use request::{PendingRequest, RequestRegistry};
pub use shutdown::ShutdownSignal;
