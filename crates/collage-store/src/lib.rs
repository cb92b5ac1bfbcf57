//! Node-local half of the distributed shared-object protocol: the
//! `Object` trait user types implement, the `ChangeManager` family that
//! decides what a commit or a subscribe produces, the `InstanceCache` that
//! lets a late joiner skip a round trip, and the `ObjectStore` table tying
//! them together.
//!
//! Deliberately free of networking and async: everything here is plain
//! data and synchronous logic, so it is usable standalone and trivial to
//! unit test. Turning its decisions into wire traffic is `collage-net` and
//! the root crate's job.

mod change_manager;
mod instance_cache;
mod object;
mod object_store;

pub use change_manager::{ChangeManager, SlaveState, SubscribeReply};
pub use instance_cache::InstanceCache;
pub use object::{ChangeType, Object};
pub use object_store::{ObjectStore, ObjectStoreError};
