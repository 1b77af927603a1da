// SPDX-License-Identifier: Apache-2.0
//! The IR Builder (C6): slot allocation, the typed constant pool, opcode
//! emission and the immutable [`Ir`] the graph compiler produces (spec
//! §3 "IR", §4.5).
//!
//! The IR is an arena of flat, indexed node arrays (spec §9, "arena +
//! indices instead of pointer graphs"): no back-references, no pointer
//! graph to walk on invalidation — a recompile just rebuilds the arenas.

use rustc_hash::FxHashMap;
use std::sync::Arc;

use crate::artifact::{ArtifactKind, RuntimeCtx};
use crate::ident::{BlockId, BusId, TransformId};

/// An index into one of the IR's flat expression arenas.
pub type Slot = u32;

/// An index into a typed bucket of the constant pool.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum ConstRef {
    /// Index into `constants.f64`.
    F64(u32),
    /// Index into `constants.f32`.
    F32(u32),
    /// Index into `constants.i32`.
    I32(u32),
    /// Index into `constants.json`.
    Json(u32),
}

/// An opaque constant value carried in the JSON bucket of the constant
/// pool, for parameters (strings, booleans, small structured literals)
/// that don't fit the numeric buckets.
#[derive(Clone, PartialEq, Debug)]
pub enum JsonConst {
    /// A string literal.
    String(String),
    /// A boolean literal.
    Bool(bool),
}

/// The typed constant pool (spec §3: "`constants`: typed pool: `f64[]`,
/// `f32[]`, `i32[]`, `json[]`, indirection table").
#[derive(Clone, Debug, Default)]
pub struct ConstantPool {
    /// `f64` constants.
    pub f64_pool: Vec<f64>,
    /// `f32` constants.
    pub f32_pool: Vec<f32>,
    /// `i32` constants.
    pub i32_pool: Vec<i32>,
    /// Structured/string constants.
    pub json_pool: Vec<JsonConst>,
}

impl ConstantPool {
    /// Interns an `f64`, returning its (possibly shared) slot.
    pub fn intern_f64(&mut self, v: f64) -> ConstRef {
        if let Some(i) = self.f64_pool.iter().position(|x| x.to_bits() == v.to_bits()) {
            return ConstRef::F64(u32::try_from(i).unwrap_or(u32::MAX));
        }
        self.f64_pool.push(v);
        ConstRef::F64(u32::try_from(self.f64_pool.len() - 1).unwrap_or(u32::MAX))
    }

    /// Interns an `i32`.
    pub fn intern_i32(&mut self, v: i32) -> ConstRef {
        if let Some(i) = self.i32_pool.iter().position(|x| *x == v) {
            return ConstRef::I32(u32::try_from(i).unwrap_or(u32::MAX));
        }
        self.i32_pool.push(v);
        ConstRef::I32(u32::try_from(self.i32_pool.len() - 1).unwrap_or(u32::MAX))
    }

    /// Interns a JSON-bucket constant.
    pub fn intern_json(&mut self, v: JsonConst) -> ConstRef {
        self.json_pool.push(v);
        ConstRef::Json(u32::try_from(self.json_pool.len() - 1).unwrap_or(u32::MAX))
    }
}

/// A pure closure kept opaque in the IR when a transform's `compileToIR`
/// returned `None` (spec §9, "IR fallback path"). The graph compiler falls
/// back to running the transform's `apply` closure at execution time.
pub type ClosureFallback = Arc<dyn Fn(f64, &RuntimeCtx) -> crate::artifact::Artifact + Send + Sync>;

/// One opcode in a flat expression arena.
#[derive(Clone)]
pub enum Opcode {
    /// Reads a pooled constant.
    Const(ConstRef),
    /// Reads a named runtime input slot (wire or bus read materialized
    /// earlier in the schedule).
    Input(Slot),
    /// `a + b`.
    Add(Slot, Slot),
    /// `a - b`.
    Sub(Slot, Slot),
    /// `a * b`.
    Mul(Slot, Slot),
    /// `a / b`.
    Div(Slot, Slot),
    /// `min(a, b)`.
    Min(Slot, Slot),
    /// `max(a, b)`.
    Max(Slot, Slot),
    /// `clamp(x, lo, hi)`.
    Clamp(Slot, Slot, Slot),
    /// A transform (adapter or lens) applied to `input` with resolved
    /// `params`, successfully lowered to IR.
    TransformApply {
        /// The transform being applied.
        transform: TransformId,
        /// The input value slot.
        input: Slot,
        /// Resolved parameter slots, in declaration order.
        params: Vec<Slot>,
    },
    /// A transform that could not be lowered to IR; falls back to its
    /// closure at execution time.
    ClosureFallback(ClosureFallback),
}

impl std::fmt::Debug for Opcode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Const(c) => write!(f, "Const({c:?})"),
            Self::Input(s) => write!(f, "Input({s})"),
            Self::Add(a, b) => write!(f, "Add({a}, {b})"),
            Self::Sub(a, b) => write!(f, "Sub({a}, {b})"),
            Self::Mul(a, b) => write!(f, "Mul({a}, {b})"),
            Self::Div(a, b) => write!(f, "Div({a}, {b})"),
            Self::Min(a, b) => write!(f, "Min({a}, {b})"),
            Self::Max(a, b) => write!(f, "Max({a}, {b})"),
            Self::Clamp(x, lo, hi) => write!(f, "Clamp({x}, {lo}, {hi})"),
            Self::TransformApply {
                transform, input, ..
            } => write!(f, "TransformApply({transform:?}, {input})"),
            Self::ClosureFallback(_) => write!(f, "ClosureFallback(<closure>)"),
        }
    }
}

/// One node in a flat expression arena: an opcode plus (for convenience)
/// the kind of value it produces.
#[derive(Debug, Clone)]
pub struct ExprNode {
    /// The opcode.
    pub op: Opcode,
    /// The artifact kind this node's result carries.
    pub kind: ArtifactKind,
}

/// A flat arena of expression nodes, indexed by [`Slot`].
#[derive(Debug, Clone, Default)]
pub struct ExprArena {
    nodes: Vec<ExprNode>,
}

impl ExprArena {
    /// Appends a node, returning its slot.
    pub fn push(&mut self, node: ExprNode) -> Slot {
        self.nodes.push(node);
        u32::try_from(self.nodes.len() - 1).unwrap_or(u32::MAX)
    }

    /// Looks up a node by slot.
    #[must_use]
    pub fn get(&self, slot: Slot) -> Option<&ExprNode> {
        self.nodes.get(slot as usize)
    }

    /// Number of nodes in the arena.
    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// `true` if the arena has no nodes.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

/// A tagged reference to a value produced somewhere in the IR, passed to a
/// transform's `compileToIR` for its input and each resolved parameter
/// (spec §4.5).
#[derive(Clone, Copy, Debug)]
pub enum ValueRefPacked {
    /// A pooled scalar constant.
    ScalarConst(ConstRef),
    /// A slot in `signalExprs`.
    Signal(Slot),
    /// A slot in `fieldExprs`.
    Field(Slot),
    /// A slot in `eventExprs`.
    Event(Slot),
}

/// Pre-allocated runtime state required by a slot (materialized field
/// buffers, `untilInvalidated` caches, accumulators).
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum StateCellKind {
    /// A cached scalar/signal sample.
    Sample,
    /// A materialized field buffer of the given element count.
    FieldBuffer,
    /// An upstream invalidation signature for `untilInvalidated` caching.
    Signature,
}

/// One entry of `stateLayout`: a pre-allocated runtime cell.
#[derive(Clone, Debug)]
pub struct StateCell {
    /// Human-readable id, also used as the `debugIndex` key.
    pub id: String,
    /// Cell kind.
    pub kind: StateCellKind,
    /// Size in elements (1 for scalars; field length for buffers).
    pub size: u32,
}

/// Caching hint for a schedule step (spec §4.6).
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum CacheHint {
    /// Re-evaluate every frame.
    PerFrame,
    /// Re-evaluate only when an upstream signature changes.
    UntilInvalidated,
}

/// One step of the executor's schedule.
#[derive(Clone, Debug)]
pub enum StepKind {
    /// Assembles the frame's `RenderFrameIR` from its render tree slot.
    RenderAssemble { render_slot: Slot },
    /// Evaluates a lazy field into a dense buffer.
    MaterializeField { field_slot: Slot, count: Slot, cell: u32 },
    /// Re-evaluates a bus's effective value if any publisher invalidated.
    CombineBus { bus: BusId, result_slot: Slot },
    /// Emits an instanced 2D draw pass.
    Instance2D { render_slot: Slot },
    /// Applies a post-effects pass.
    PostFx { render_slot: Slot },
    /// Pushes a clip region and recurses into its children.
    ClipGroup { render_slot: Slot },
}

/// A single scheduled step, with its caching policy and originating block
/// (for `debugIndex`).
#[derive(Clone, Debug)]
pub struct ScheduleStep {
    /// What this step does.
    pub kind: StepKind,
    /// Caching tier.
    pub cache: CacheHint,
    /// The block this step was emitted for, if any.
    pub block: Option<BlockId>,
}

/// The only ordering input the spec permits IR emission to depend on
/// (spec §4.5: "the only permitted tie-break is lexicographic by stable
/// ID").
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum OrderingInput {
    /// Lexicographic order by stable node/block id.
    NodeIdLex,
}

/// Declares which orderings influenced IR emission, so that a reviewer (or
/// a property test) can confirm no other ordering source leaked in.
#[derive(Clone, Debug, Default)]
pub struct DeterminismMeta {
    /// Ordering inputs used while building this IR.
    pub allowed_ordering_inputs: Vec<OrderingInput>,
}

/// Producer/consumer dependency maps over IR slots.
#[derive(Clone, Debug, Default)]
pub struct DepGraph {
    /// Maps a slot to the schedule step index that produces it.
    pub producer_of: FxHashMap<Slot, u32>,
    /// Maps a slot to the schedule step indices that read it.
    pub consumers_of: FxHashMap<Slot, Vec<u32>>,
}

/// The executor schedule (spec §3: `schedule`).
#[derive(Clone, Debug, Default)]
pub struct Schedule {
    /// Ordered step descriptors.
    pub steps: Vec<ScheduleStep>,
    /// Producer/consumer dependency maps.
    pub deps: DepGraph,
    /// Determinism metadata.
    pub determinism: DeterminismMeta,
}

/// An index-table entry for a camera-producing block (spec §3: "`cameras`
/// ... index tables"). Minimal by design: a camera block's own output
/// slot already carries its parameters as ordinary artifacts; this table
/// only tells an external 3D renderer which slot to read as "the active
/// camera" without walking the whole output list.
#[derive(Clone, Copy, Debug)]
pub struct CameraDescriptor {
    /// The block that produces this camera's parameters.
    pub id: BlockId,
    /// The artifact kind at `slot` (typically a `Scalar`/`Signal` carrying
    /// a camera transform).
    pub kind: ArtifactKind,
    /// The slot carrying the camera's value.
    pub slot: Slot,
}

/// An index-table entry for one extruded mesh (spec §3: "`meshes` ...
/// index tables"). The buffers are generated once by
/// [`crate::mesh::extrude`] during compilation and baked into the IR
/// (spec §3, "Caching": extruded mesh buffers use `untilInvalidated`,
/// which a fully immutable, recompile-to-invalidate IR satisfies
/// trivially).
#[derive(Clone, Debug)]
pub struct MeshDescriptor {
    /// The block that produced this mesh.
    pub id: BlockId,
    /// Generated vertex/index buffers.
    pub buffers: Arc<crate::mesh::MeshBuffers>,
}

/// An output terminal (spec §3: `outputs`).
#[derive(Clone, Debug)]
pub struct OutputDescriptor {
    /// Output id (the originating block id, typically).
    pub id: BlockId,
    /// The artifact kind produced.
    pub kind: ArtifactKind,
    /// The slot carrying the value.
    pub slot: Slot,
}

/// Human-readable labels for steps and slots, used by tooling and the
/// debug probe API (spec §3: `debugIndex`).
#[derive(Clone, Debug, Default)]
pub struct DebugIndex {
    /// Slot -> label.
    pub slot_labels: FxHashMap<Slot, String>,
    /// Schedule step index -> label.
    pub step_labels: FxHashMap<u32, String>,
}

/// The immutable compiled program (spec §3: "IR"). Produced once by
/// [`crate::compiler::compile`]; shared read-only across every frame
/// (spec §5).
#[derive(Debug, Default)]
pub struct Ir {
    /// Typed constant pool.
    pub constants: ConstantPool,
    /// Flat signal expression arena.
    pub signal_exprs: ExprArena,
    /// Flat field expression arena.
    pub field_exprs: ExprArena,
    /// Flat event expression arena.
    pub event_exprs: ExprArena,
    /// Pre-allocated runtime state layout.
    pub state_layout: Vec<StateCell>,
    /// Executor schedule.
    pub schedule: Schedule,
    /// Camera index table (spec §3: "`cameras` ... index tables").
    pub cameras: Vec<CameraDescriptor>,
    /// Extruded mesh index table (spec §3: "`meshes` ... index tables").
    pub meshes: Vec<MeshDescriptor>,
    /// Sink block index table (spec §3: "`render.sinks` ... index
    /// tables"), distinct from `outputs`: this is the raw block-id list a
    /// renderer walks to find every terminal `RenderTreeProgram`, without
    /// needing to filter `outputs` by kind.
    pub render_sinks: Vec<BlockId>,
    /// Output terminals.
    pub outputs: Vec<OutputDescriptor>,
    /// Debug labels.
    pub debug_index: DebugIndex,
}

/// Builds an [`Ir`] incrementally during compilation.
///
/// Mirrors the teacher's builder-style API (see
/// [`crate::registry::Registry`]'s sealed-builder pattern): mutable while
/// compiling, consumed by [`IrBuilder::finish`] into an immutable [`Ir`].
#[derive(Debug, Default)]
pub struct IrBuilder {
    ir: Ir,
}

impl IrBuilder {
    /// Starts a new, empty builder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Interns an `f64` constant.
    pub fn const_f64(&mut self, v: f64) -> ConstRef {
        self.ir.constants.intern_f64(v)
    }

    /// Pushes a signal-arena node, returning its slot.
    pub fn push_signal(&mut self, op: Opcode, kind: ArtifactKind) -> Slot {
        self.ir.signal_exprs.push(ExprNode { op, kind })
    }

    /// Pushes a field-arena node, returning its slot.
    pub fn push_field(&mut self, op: Opcode, kind: ArtifactKind) -> Slot {
        self.ir.field_exprs.push(ExprNode { op, kind })
    }

    /// Pushes an event-arena node, returning its slot.
    pub fn push_event(&mut self, op: Opcode, kind: ArtifactKind) -> Slot {
        self.ir.event_exprs.push(ExprNode { op, kind })
    }

    /// Allocates a pre-sized runtime state cell, returning its index.
    pub fn alloc_state_cell(&mut self, id: impl Into<String>, kind: StateCellKind, size: u32) -> u32 {
        self.ir.state_layout.push(StateCell {
            id: id.into(),
            kind,
            size,
        });
        u32::try_from(self.ir.state_layout.len() - 1).unwrap_or(u32::MAX)
    }

    /// Appends a schedule step, recording its dependency edges.
    pub fn push_step(&mut self, step: ScheduleStep, reads: &[Slot]) -> u32 {
        let index = u32::try_from(self.ir.schedule.steps.len()).unwrap_or(u32::MAX);
        for &slot in reads {
            self.ir
                .schedule
                .deps
                .consumers_of
                .entry(slot)
                .or_default()
                .push(index);
        }
        self.ir.schedule.steps.push(step);
        index
    }

    /// Records that `step` produces `slot`.
    pub fn record_producer(&mut self, slot: Slot, step: u32) {
        self.ir.schedule.deps.producer_of.insert(slot, step);
    }

    /// Declares an ordering input used during emission, if not already
    /// present.
    pub fn declare_ordering(&mut self, input: OrderingInput) {
        if !self
            .ir
            .schedule
            .determinism
            .allowed_ordering_inputs
            .contains(&input)
        {
            self.ir.schedule.determinism.allowed_ordering_inputs.push(input);
        }
    }

    /// Registers an output terminal.
    pub fn push_output(&mut self, output: OutputDescriptor) {
        self.ir.outputs.push(output);
    }

    /// Registers a camera index-table entry.
    pub fn push_camera(&mut self, camera: CameraDescriptor) {
        self.ir.cameras.push(camera);
    }

    /// Registers an extruded mesh index-table entry.
    pub fn push_mesh(&mut self, mesh: MeshDescriptor) {
        self.ir.meshes.push(mesh);
    }

    /// Registers a sink block in the `render.sinks` index table.
    pub fn push_render_sink(&mut self, block: BlockId) {
        self.ir.render_sinks.push(block);
    }

    /// Labels a slot for `debugIndex`.
    pub fn label_slot(&mut self, slot: Slot, label: impl Into<String>) {
        self.ir.debug_index.slot_labels.insert(slot, label.into());
    }

    /// Labels a schedule step for `debugIndex`.
    pub fn label_step(&mut self, step: u32, label: impl Into<String>) {
        self.ir.debug_index.step_labels.insert(step, label.into());
    }

    /// Consumes the builder, producing the immutable [`Ir`].
    #[must_use]
    pub fn finish(self) -> Ir {
        self.ir
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constant_pool_dedupes_f64() {
        let mut pool = ConstantPool::default();
        let a = pool.intern_f64(1.5);
        let b = pool.intern_f64(1.5);
        assert_eq!(a, b);
        assert_eq!(pool.f64_pool.len(), 1);
    }

    #[test]
    fn builder_tracks_dependency_edges() {
        let mut b = IrBuilder::new();
        let c = b.push_signal(Opcode::Const(ConstRef::F64(0)), ArtifactKind::SignalFloat);
        let step = b.push_step(
            ScheduleStep {
                kind: StepKind::RenderAssemble { render_slot: c },
                cache: CacheHint::PerFrame,
                block: None,
            },
            &[c],
        );
        b.record_producer(c, step);
        let ir = b.finish();
        assert_eq!(ir.schedule.deps.producer_of[&c], step);
        assert_eq!(ir.schedule.deps.consumers_of[&c], vec![step]);
    }
}
