//! The user-facing trait distributed objects implement, and the distribution
//! policy each instance is registered with.

/// Selects which [`crate::ChangeManager`] variant backs an object once it is
/// attached to the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeType {
    /// No distribution; `ChangeManager::Null`. Local-only objects (e.g. ones
    /// only ever attached, never registered as a master).
    Static,
    /// Slave receives full instance snapshots on every subscribe, never
    /// deltas. `ChangeManager::Master { buffered: false, .. }` on the master
    /// side, always re-sent from `get_instance_data`.
    Instance,
    /// Master streams versioned deltas; no backlog is retained, so a slave
    /// subscribing at `Version::OLDEST` gets a fresh instance instead.
    UnbufferedDelta,
    /// As `UnbufferedDelta`, but the master retains a bounded backlog of
    /// past deltas so `Version::OLDEST` subscribers can replay history
    /// instead of re-snapshotting.
    BufferedDelta,
}

/// A distributed shared object.
///
/// Implementors provide instance snapshots (full state) and deltas
/// (incremental changes since the previous commit); the change manager
/// decides which one a given slave needs and when to produce one.
pub trait Object: Send {
    fn change_type(&self) -> ChangeType;

    /// Full serialized state, sent to a newly subscribing slave (or to every
    /// slave under `ChangeType::Instance`).
    fn get_instance_data(&self) -> Vec<u8>;

    /// Replaces this object's state from a full snapshot received on the
    /// slave side.
    fn apply_instance_data(&mut self, data: &[u8]);

    /// Packs the change since the last `pack` call into a delta. An empty
    /// result means nothing changed; the master will not advance its
    /// version for an empty delta.
    fn pack(&mut self) -> Vec<u8>;

    /// Applies a delta received on the slave side, in version order.
    fn unpack(&mut self, delta: &[u8]);
}
