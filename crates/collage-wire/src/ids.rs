use std::fmt;

/// 128-bit globally unique identifier, minted once per running node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(u128);

impl NodeId {
    /// Distinguished zero value: "no node" / "unknown master".
    pub const ZERO: NodeId = NodeId(0);

    /// Generates a fresh random id. Collisions are astronomically unlikely
    /// at 128 bits and are not otherwise guarded against, matching the
    /// "trust the random source" posture of UUID generation generally.
    pub fn generate() -> Self {
        Self(rand::random())
    }

    pub fn is_zero(&self) -> bool {
        *self == Self::ZERO
    }

    pub const fn from_u128(raw: u128) -> Self {
        Self(raw)
    }

    pub const fn as_u128(&self) -> u128 {
        self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:032x}", self.0)
    }
}

/// 128-bit identifier for a registered shared object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectId(u128);

impl ObjectId {
    /// Reserved: "no object".
    pub const NONE: ObjectId = ObjectId(0);

    pub fn generate() -> Self {
        Self(rand::random())
    }

    pub fn is_none(&self) -> bool {
        *self == Self::NONE
    }

    pub const fn from_u128(raw: u128) -> Self {
        Self(raw)
    }

    pub const fn as_u128(&self) -> u128 {
        self.0
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:032x}", self.0)
    }
}

/// 32-bit node-local counter distinguishing instances of the same object id
/// attached more than once on one node (a master plus its own slave proxy,
/// for example).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InstanceId(u32);

impl InstanceId {
    /// Sentinel: "not yet assigned" / "invalid".
    pub const INVALID: InstanceId = InstanceId(u32::MAX);

    pub const fn new(raw: u32) -> Self {
        Self(raw)
    }

    pub const fn as_u32(&self) -> u32 {
        self.0
    }

    pub fn is_valid(&self) -> bool {
        *self != Self::INVALID
    }
}

/// Monotonically increasing object version. Several values are reserved by
/// the subscribe/commit protocol rather than denoting real versions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Version(u64);

impl Version {
    /// No version has been committed yet.
    pub const NONE: Version = Version(0);
    /// The first real committed version.
    pub const FIRST: Version = Version(1);
    /// Sentinel meaning "give me whatever you still have, from the start".
    pub const OLDEST: Version = Version(u64::MAX - 1);
    /// Sentinel meaning "give me the latest, whatever it is".
    pub const HEAD: Version = Version(u64::MAX);
    /// Sentinel used where a version field is present but unused, or a
    /// lookup found nothing in cache.
    pub const INVALID: Version = Version(u64::MAX);

    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub const fn as_u64(&self) -> u64 {
        self.0
    }

    /// Returns the next version after this one. Only meaningful for real
    /// (non-sentinel) versions.
    pub fn next(self) -> Self {
        Self(self.0 + 1)
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Version::NONE => write!(f, "none"),
            Version::OLDEST => write!(f, "oldest"),
            Version::HEAD => write!(f, "head"),
            v => write!(f, "{}", v.0),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_node_id_zero_is_distinguished() {
        assert!(NodeId::ZERO.is_zero());
        assert!(!NodeId::generate().is_zero());
    }

    #[test]
    fn test_version_ordering() {
        assert!(Version::FIRST > Version::NONE);
        assert!(Version::new(5).next() == Version::new(6));
    }

    #[test]
    fn test_instance_id_invalid_sentinel() {
        assert!(!InstanceId::INVALID.is_valid());
        assert!(InstanceId::new(0).is_valid());
    }
}
