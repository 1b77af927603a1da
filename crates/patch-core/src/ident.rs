// SPDX-License-Identifier: Apache-2.0
//! Identifier and hashing utilities.
//!
//! Blocks, buses, publishers and listeners are addressed by stable,
//! content-derived ids so that a compiled [`crate::ir::Ir`] can be diffed and
//! tie-broken deterministically (spec §4.5: "the only permitted tie-break is
//! lexicographic by stable ID"). Transform ids are the one exception: they
//! are user-facing, author-chosen strings (`scale`, `mapRange`, ...) and are
//! interned as-is rather than hashed.

use std::fmt;
use std::sync::Arc;

/// Canonical 256-bit content hash used to address blocks, buses, publishers
/// and listeners.
pub type Hash = [u8; 32];

macro_rules! hash_id {
    ($name:ident, $prefix:literal, $make:ident) => {
        #[doc = concat!("Content-addressed identifier (domain `", $prefix, "`).")]
        #[repr(transparent)]
        #[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
        #[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
        pub struct $name(pub Hash);

        impl $name {
            /// Returns the canonical byte representation of this id.
            #[must_use]
            pub fn as_bytes(&self) -> &Hash {
                &self.0
            }
        }

        #[doc = concat!("Derives a stable `", stringify!($name), "` from a human-readable label via domain-separated BLAKE3.")]
        #[must_use]
        pub fn $make(label: &str) -> $name {
            let mut hasher = blake3::Hasher::new();
            hasher.update($prefix.as_bytes());
            hasher.update(label.as_bytes());
            $name(*hasher.finalize().as_bytes())
        }
    };
}

hash_id!(BlockId, "block:", make_block_id);
hash_id!(BusId, "bus:", make_bus_id);
hash_id!(PublisherId, "publisher:", make_publisher_id);
hash_id!(ListenerId, "listener:", make_listener_id);

/// Interned, user-facing transform identifier (e.g. `scale`, `mapRange`,
/// legacy `PhaseOffset`).
///
/// Unlike [`BlockId`]/[`BusId`], transform ids are not hashed: the registry
/// alias table and the IR's `debugIndex` both need the literal spelling, and
/// hashing would throw away the very thing callers need to read back.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TransformId(Arc<str>);

impl TransformId {
    /// Interns `s` as a transform id.
    #[must_use]
    pub fn new(s: impl AsRef<str>) -> Self {
        Self(Arc::from(s.as_ref()))
    }

    /// Returns the id as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for TransformId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Display for TransformId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TransformId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for TransformId {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}

#[cfg(feature = "serde")]
impl serde::Serialize for TransformId {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

#[cfg(feature = "serde")]
impl<'de> serde::Deserialize<'de> for TransformId {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        String::deserialize(deserializer).map(Self::new)
    }
}

/// A reference to a specific output slot of a block: `block.slot`.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct BlockSlot {
    /// Owning block.
    pub block: BlockId,
    /// Slot name, interned as a small index into the block's declared slots
    /// in the authoring layer; represented here as a plain string index for
    /// compiler-facing code.
    pub slot: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn domain_separation_prevents_cross_kind_collisions() {
        let label = "foo";
        let b = make_block_id(label).0;
        let bus = make_bus_id(label).0;
        let p = make_publisher_id(label).0;
        let l = make_listener_id(label).0;
        assert_ne!(b, bus);
        assert_ne!(b, p);
        assert_ne!(b, l);
        assert_ne!(bus, p);
        assert_ne!(bus, l);
        assert_ne!(p, l);
    }

    #[test]
    fn make_id_is_deterministic() {
        assert_eq!(make_block_id("x"), make_block_id("x"));
    }

    #[test]
    fn transform_id_is_cheap_to_clone_and_compare() {
        let a = TransformId::new("phaseOffset");
        let b = a.clone();
        assert_eq!(a, b);
        assert_eq!(a.as_str(), "phaseOffset");
    }
}
