// SPDX-License-Identifier: Apache-2.0
//! The `Patch` authoring model (spec §3): the user-authored graph of
//! blocks, wires and buses that [`crate::compiler::compile`] consumes.
//!
//! This is plain data — no behavior lives here. [`crate::bus`] and
//! [`crate::compiler`] interpret it; [`crate::resolver`] walks the
//! [`ParamBinding`] trees it contains.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::artifact::ArtifactKind;
use crate::ident::{BlockId, BlockSlot, BusId, TransformId};

/// A scalar literal, used both for authored parameter literals and for
/// lifted default-source values.
#[derive(Clone, PartialEq, Debug)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Literal {
    /// A floating-point literal.
    Float(f64),
    /// An integer literal.
    Int(i64),
    /// A boolean literal.
    Bool(bool),
    /// A string literal.
    String(String),
    /// A 2D vector literal.
    Vec2(crate::math::Vec2),
    /// A packed color literal.
    Color(crate::math::Color),
}

/// A typed node with input/output slots and a compile function looked up
/// by [`BlockTypeId`] in the registry of block kinds (distinct from the
/// transform registry: block kinds are things like `TimeRoot`, `Add`,
/// `Circle2D`, not adapters or lenses).
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct BlockTypeId(Arc<str>);

impl BlockTypeId {
    /// Interns a block type id.
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

impl From<&str> for BlockTypeId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

#[cfg(feature = "serde")]
impl serde::Serialize for BlockTypeId {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

#[cfg(feature = "serde")]
impl<'de> serde::Deserialize<'de> for BlockTypeId {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        String::deserialize(deserializer).map(Self::new)
    }
}

/// One node of the patch graph.
#[derive(Clone, Debug)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Block {
    /// Stable id.
    pub id: BlockId,
    /// Block kind, resolved against the block-kind registry (not the
    /// transform registry).
    pub block_type: BlockTypeId,
    /// Authored parameter bindings, by parameter name.
    pub params: BTreeMap<String, ParamBinding>,
}

/// A direct connection from one block's output slot to another's input
/// slot (spec §3: "wires (from-slot -> to-slot)").
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Wire {
    /// Producer slot.
    pub from: BlockSlot,
    /// Consumer slot.
    pub to: BlockSlot,
}

/// How a bus merges multiple enabled publishers into one effective value
/// (spec §4.3).
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum CombineMode {
    /// The publisher with the greatest `sortKey` wins; ties break
    /// lexicographically by publisher id.
    Last,
    /// Pointwise/vector sum.
    Sum,
    /// Sum divided by publisher count.
    Average,
    /// Pointwise minimum.
    Min,
    /// Pointwise maximum.
    Max,
}

/// A named, shared channel with multiple publishers and listeners (spec
/// §3: "Bus").
#[derive(Clone, Debug)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Bus {
    /// Stable id.
    pub id: BusId,
    /// The artifact kind every publisher/listener on this bus must
    /// ultimately produce/consume (after adapter insertion).
    pub value_type: ArtifactKind,
    /// Combine semantics.
    pub combine_mode: CombineMode,
    /// Default value, lifted through [`crate::resolver`] when no
    /// publisher is enabled (spec §4.3, invariant I3).
    pub default_value: Literal,
    /// Sort key; not used for combining directly, but available as a
    /// secondary ordering hint alongside publisher sort keys.
    pub sort_key: f64,
}

/// One entry of a publisher's or listener's transform stack (spec §3:
/// "Transform stack (unified adapters + lenses)").
#[derive(Clone, Debug)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct TransformStackEntry {
    /// Whether this entry is an adapter or a lens.
    pub kind: crate::registry::TransformKind,
    /// Whether this entry is active; disabled entries are skipped (spec
    /// §4.4 step 6: "Disabled lenses are skipped").
    pub enabled: bool,
    /// The transform to apply, resolved against the transform registry.
    pub transform: TransformId,
    /// Parameter bindings for this transform's declared params, by name.
    pub param_bindings: BTreeMap<String, ParamBinding>,
}

/// An ordered list of adapters/lenses applied to a value as it crosses a
/// wire or a bus publish/subscribe edge.
pub type TransformStack = Vec<TransformStackEntry>;

/// How a lens/adapter parameter obtains its value (spec §4.2). Binding
/// depth is bounded by 3 and cycles are forbidden; both are enforced by
/// [`crate::resolver`], not by this type.
#[derive(Clone, Debug)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ParamBinding {
    /// A constant, authored literal.
    Literal(Literal),
    /// Looked up from the patch's default-source store by id.
    Default(String),
    /// Read from a bus's effective value, itself passed through an inner
    /// transform stack before use as a parameter.
    Bus(BusId, TransformStack),
    /// Read from a wire's source slot, itself passed through an inner
    /// transform stack before use as a parameter.
    Wire(BlockSlot, TransformStack),
}

/// The publishing side of a bus edge (spec §3: "Publisher").
#[derive(Clone, Debug)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Publisher {
    /// Unique id, used as the tie-break key for `last` combine mode.
    pub id: crate::ident::PublisherId,
    /// Target bus.
    pub bus: BusId,
    /// Source slot providing the raw value before this publisher's
    /// transform stack runs.
    pub source: BlockSlot,
    /// Transform stack, applied with scope `publisher`.
    pub stack: TransformStack,
    /// Whether this publisher currently contributes to the bus.
    pub enabled: bool,
    /// Sole tie-break for `last` combine mode (spec §4.3, invariant I1).
    pub sort_key: f64,
}

/// The listening side of a bus edge (spec §3: "Listener").
#[derive(Clone, Debug)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Listener {
    /// Unique id.
    pub id: crate::ident::ListenerId,
    /// Source bus.
    pub bus: BusId,
    /// Target slot receiving the bus's effective value after this
    /// listener's transform stack runs.
    pub target: BlockSlot,
    /// Transform stack, applied with scope `listener`, to the
    /// *post-combine* bus value (spec §4.3).
    pub stack: TransformStack,
    /// Whether this listener is active.
    pub enabled: bool,
}

/// A named, typed literal a [`ParamBinding::Default`] resolves against
/// (spec §3: "default-source store (id -> { type, value })").
#[derive(Clone, Debug)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct DefaultSource {
    /// The artifact kind the resolver should lift this literal into (e.g.
    /// `Signal:float`).
    pub lift_to: ArtifactKind,
    /// The literal value.
    pub value: Literal,
}

/// The full compile input (spec §3: "Patch").
#[derive(Clone, Debug, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Patch {
    /// Blocks, keyed by id.
    pub blocks: BTreeMap<BlockId, Block>,
    /// Direct block-to-block wires.
    pub wires: Vec<Wire>,
    /// Buses, keyed by id.
    pub buses: BTreeMap<BusId, Bus>,
    /// Bus publishers.
    pub publishers: Vec<Publisher>,
    /// Bus listeners.
    pub listeners: Vec<Listener>,
    /// Default-source store, keyed by id.
    pub default_sources: BTreeMap<String, DefaultSource>,
    /// Terminal output blocks; each must compile to a `RenderTreeProgram`
    /// (spec §4.4 step 7: "Sink collection").
    pub sinks: Vec<BlockId>,
}

impl Patch {
    /// An empty patch.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Enabled publishers for `bus`, in patch-declaration order (the
    /// caller is responsible for any combine-mode-specific ordering, e.g.
    /// `last`'s sort-key-then-id total order).
    #[must_use]
    pub fn enabled_publishers(&self, bus: BusId) -> Vec<&Publisher> {
        self.publishers
            .iter()
            .filter(|p| p.bus == bus && p.enabled)
            .collect()
    }

    /// Enabled listeners for `bus`.
    #[must_use]
    pub fn enabled_listeners(&self, bus: BusId) -> Vec<&Listener> {
        self.listeners
            .iter()
            .filter(|l| l.bus == bus && l.enabled)
            .collect()
    }
}

/// Errors decoding/encoding a [`Patch`] as CBOR (spec §3: a patch is the
/// thing a caller loads from disk or across the wire; the IR it compiles
/// to is rebuilt per load, never serialized).
#[cfg(feature = "ciborium")]
#[derive(Debug, thiserror::Error)]
pub enum PatchCodecError {
    /// The byte stream was not a valid CBOR encoding of a [`Patch`].
    #[error("failed to decode patch: {0}")]
    Decode(String),
    /// The patch could not be written out as CBOR.
    #[error("failed to encode patch: {0}")]
    Encode(String),
}

#[cfg(feature = "ciborium")]
impl Patch {
    /// Decodes a patch previously written by [`Self::to_cbor_writer`].
    ///
    /// # Errors
    /// Returns [`PatchCodecError::Decode`] if `reader` does not contain a
    /// valid CBOR encoding of a [`Patch`].
    pub fn from_cbor_reader<R: std::io::Read>(reader: R) -> Result<Self, PatchCodecError> {
        ciborium::de::from_reader(reader).map_err(|e| PatchCodecError::Decode(e.to_string()))
    }

    /// Encodes this patch as CBOR.
    ///
    /// # Errors
    /// Returns [`PatchCodecError::Encode`] if the writer fails or the
    /// patch contains a value `ciborium` cannot represent.
    pub fn to_cbor_writer<W: std::io::Write>(&self, writer: W) -> Result<(), PatchCodecError> {
        ciborium::ser::into_writer(self, writer).map_err(|e| PatchCodecError::Encode(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[cfg(feature = "ciborium")]
    #[test]
    fn patch_roundtrips_through_cbor() {
        let bus = crate::ident::make_bus_id("b");
        let block = crate::ident::make_block_id("src");
        let mut patch = Patch::new();
        patch.buses.insert(
            bus,
            Bus {
                id: bus,
                value_type: ArtifactKind::SignalFloat,
                combine_mode: CombineMode::Sum,
                default_value: Literal::Float(0.0),
                sort_key: 0.0,
            },
        );
        patch.sinks.push(block);

        let mut bytes = Vec::new();
        patch.to_cbor_writer(&mut bytes).expect("encode");
        let decoded = Patch::from_cbor_reader(bytes.as_slice()).expect("decode");
        assert_eq!(decoded.sinks, patch.sinks);
        assert_eq!(decoded.buses.len(), patch.buses.len());
    }

    #[test]
    fn enabled_publishers_filters_disabled_and_other_buses() {
        let bus_a = crate::ident::make_bus_id("a");
        let bus_b = crate::ident::make_bus_id("b");
        let block = crate::ident::make_block_id("src");
        let mut patch = Patch::new();
        patch.publishers.push(Publisher {
            id: crate::ident::make_publisher_id("p1"),
            bus: bus_a,
            source: BlockSlot { block, slot: 0 },
            stack: Vec::new(),
            enabled: true,
            sort_key: 0.0,
        });
        patch.publishers.push(Publisher {
            id: crate::ident::make_publisher_id("p2"),
            bus: bus_a,
            source: BlockSlot { block, slot: 0 },
            stack: Vec::new(),
            enabled: false,
            sort_key: 0.0,
        });
        patch.publishers.push(Publisher {
            id: crate::ident::make_publisher_id("p3"),
            bus: bus_b,
            source: BlockSlot { block, slot: 0 },
            stack: Vec::new(),
            enabled: true,
            sort_key: 0.0,
        });
        assert_eq!(patch.enabled_publishers(bus_a).len(), 1);
    }
}
