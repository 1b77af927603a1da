// SPDX-License-Identifier: Apache-2.0
//! The Deterministic Runtime Executor (C7): walks a compiled [`Ir`]'s
//! schedule once per frame and produces a [`RenderFrameIR`] (spec §4.6).
//!
//! Mirrors the teacher's `EngineBuilder`/`Engine` split
//! (`warp-core::engine_impl`): [`RuntimeConfig`] is built once via
//! [`RuntimeConfigBuilder`], [`RuntimeState`] owns everything a frame
//! mutates, and [`execute_frame`] takes `&Ir` + `&mut RuntimeState` the way
//! the teacher's engine takes a shared program and a mutable session. State
//! mutation is batched at step boundaries (spec §4.6: "a dropped/failed
//! frame must not corrupt state") by only committing each step's cache
//! entry after that step succeeds.

use std::env;

use rustc_hash::FxHashMap;
use thiserror::Error;

use crate::artifact::{Artifact, ArtifactKind, RuntimeCtx, Viewport};
use crate::debug::{DebugRecorder, SpanKind, SpanRecord, DEFAULT_SPAN_CAPACITY, DEFAULT_VALUE_CAPACITY, NO_PARENT};
use crate::ident::TransformId;
use crate::ir::{ExprArena, Ir, Opcode, Slot, StepKind};
use crate::render::{assemble, ClipShape, RenderFrameIR, RenderNode, RenderTree};

/// Environment variable overriding the debug value-ring capacity (mirrors
/// the teacher's `ECHO_WORKERS`-style env override for engine tuning).
pub const DEBUG_CAPACITY_ENV: &str = "PATCH_DEBUG_CAPACITY";

/// Immutable runtime configuration, built once per session.
#[derive(Clone, Copy, Debug)]
pub struct RuntimeConfig {
    /// Viewport threaded into every `RuntimeCtx`.
    pub viewport: Viewport,
    /// Deterministic seed threaded into field materialization.
    pub seed: u64,
    /// Span-ring capacity.
    pub debug_span_capacity: usize,
    /// Value-ring capacity.
    pub debug_value_capacity: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            viewport: Viewport::default(),
            seed: 0,
            debug_span_capacity: DEFAULT_SPAN_CAPACITY,
            debug_value_capacity: DEFAULT_VALUE_CAPACITY,
        }
    }
}

impl RuntimeConfig {
    /// Starts a [`RuntimeConfigBuilder`].
    #[must_use]
    pub fn builder() -> RuntimeConfigBuilder {
        RuntimeConfigBuilder::default()
    }

    /// Builds a config from defaults, overriding the debug value-ring
    /// capacity from [`DEBUG_CAPACITY_ENV`] if set and parseable (mirrors
    /// the teacher's pattern of reading a single tuning knob from the
    /// environment rather than a full config file).
    #[must_use]
    pub fn from_env() -> Self {
        let mut builder = Self::builder();
        if let Ok(raw) = env::var(DEBUG_CAPACITY_ENV) {
            if let Ok(capacity) = raw.parse::<usize>() {
                builder = builder.debug_value_capacity(capacity);
            } else {
                log::warn!("{DEBUG_CAPACITY_ENV}={raw:?} is not a valid usize; ignoring");
            }
        }
        builder.build()
    }
}

/// Builder for [`RuntimeConfig`] (spec §4.10, mirroring the teacher's
/// `EngineBuilder`).
#[derive(Default, Debug)]
pub struct RuntimeConfigBuilder {
    config: RuntimeConfig,
}

impl RuntimeConfigBuilder {
    /// Sets the viewport.
    #[must_use]
    pub const fn viewport(mut self, viewport: Viewport) -> Self {
        self.config.viewport = viewport;
        self
    }

    /// Sets the deterministic seed.
    #[must_use]
    pub const fn seed(mut self, seed: u64) -> Self {
        self.config.seed = seed;
        self
    }

    /// Sets the span-ring capacity.
    #[must_use]
    pub const fn debug_span_capacity(mut self, capacity: usize) -> Self {
        self.config.debug_span_capacity = capacity;
        self
    }

    /// Sets the value-ring capacity.
    #[must_use]
    pub const fn debug_value_capacity(mut self, capacity: usize) -> Self {
        self.config.debug_value_capacity = capacity;
        self
    }

    /// Finishes the builder.
    #[must_use]
    pub fn build(self) -> RuntimeConfig {
        self.config
    }
}

/// Runtime-side failures (spec §7). Distinct from [`crate::compiler::CompileError`]:
/// these only ever arise while executing an already-compiled [`Ir`].
#[derive(Debug, Clone, Error)]
pub enum RuntimeError {
    /// A `MaterializeField` step's field function returned a different
    /// element count than requested (spec §3, invariant a).
    #[error("field materialization returned {found} elements, expected {expected}")]
    FieldLengthMismatch {
        /// Requested count.
        expected: usize,
        /// Actual count returned.
        found: usize,
    },
    /// A schedule step referenced a slot that the IR's builder never
    /// allocated.
    #[error("invalid IR slot {slot} referenced by the schedule")]
    InvalidSlot {
        /// The dangling slot.
        slot: Slot,
    },
    /// A step expected one artifact kind but found another.
    #[error("type mismatch during execution: expected {expected}, found {found}")]
    TypeMismatch {
        /// Expected kind.
        expected: ArtifactKind,
        /// Actual kind.
        found: ArtifactKind,
    },
    /// Path-based clip shapes are reserved and never implemented (spec §9,
    /// open question a).
    #[error("path-based clipping is not implemented")]
    PathClippingReserved,
    /// A frame was cancelled before it produced a result (spec §5,
    /// cancellation); surfaced for external export/driver layers, never
    /// raised internally by [`execute_frame`] itself.
    #[error("frame evaluation was cancelled")]
    Cancelled,
    /// An invariant that must never fail did fail.
    #[error("internal runtime error: {0}")]
    Internal(String),
}

#[derive(Clone, Debug)]
struct FieldCacheEntry {
    seed: u64,
    count: usize,
}

/// Owns everything a frame evaluation mutates: per-cell caches and the
/// debug recorder. Single-owner, `&mut self` throughout, like the
/// teacher's `Engine` session object.
#[derive(Debug)]
pub struct RuntimeState {
    config: RuntimeConfig,
    frame_id: u32,
    last_t: f64,
    field_cache: FxHashMap<u32, FieldCacheEntry>,
    last_good_frame: Option<RenderFrameIR>,
    /// Telemetry recorder (spec §4.7). Public so callers can drain it
    /// (`state.debug.span_range(...)`) without the runtime needing a
    /// dedicated accessor for every ring operation.
    pub debug: DebugRecorder,
}

impl RuntimeState {
    /// Builds a fresh runtime state for `config`.
    #[must_use]
    pub fn new(config: RuntimeConfig) -> Self {
        Self {
            debug: DebugRecorder::new(config.debug_span_capacity, config.debug_value_capacity),
            config,
            frame_id: 0,
            last_t: 0.0,
            field_cache: FxHashMap::default(),
            last_good_frame: None,
        }
    }

    /// The runtime context derived from this state's config.
    #[must_use]
    pub const fn ctx(&self) -> RuntimeCtx {
        RuntimeCtx {
            viewport: self.config.viewport,
        }
    }

    /// The last successfully produced frame, if any (spec §4.6: "the
    /// runtime continues presenting the last known-good frame until a
    /// successful recompile").
    #[must_use]
    pub const fn last_good_frame(&self) -> Option<&RenderFrameIR> {
        self.last_good_frame.as_ref()
    }
}

fn as_f64_now(artifact: &Artifact, t: f64, ctx: &RuntimeCtx) -> Option<f64> {
    use crate::artifact::{ScalarValue, SignalValue};
    match artifact {
        Artifact::Scalar(ScalarValue::Float(v)) => Some(*v),
        #[allow(clippy::cast_precision_loss)]
        Artifact::Scalar(ScalarValue::Int(v)) => Some(*v as f64),
        Artifact::Signal(SignalValue::Float(f) | SignalValue::Time(f) | SignalValue::Phase(f) | SignalValue::Unit(f)) => {
            Some(f(t, ctx))
        }
        #[allow(clippy::cast_precision_loss)]
        Artifact::Signal(SignalValue::Int(f)) => Some(f(t, ctx) as f64),
        _ => None,
    }
}

/// A small, fixed table of lens/adapter ids the executor knows how to apply
/// directly when a `TransformApply` node reaches runtime without having
/// been resolved to a closure at compile time. [`crate::compiler::compile`]
/// never currently emits `TransformApply` nodes (every transform is lowered
/// through the `ClosureFallback` path, spec §9's "IR fallback path"); this
/// exists so a future IR lowering pass has somewhere to land.
fn apply_builtin_numeric_transform(id: &TransformId, input: f64, params: &[f64]) -> Result<f64, RuntimeError> {
    match id.as_str() {
        "scale" => Ok(input * params.first().copied().unwrap_or(1.0)),
        "clamp" => {
            let lo = params.first().copied().unwrap_or(0.0);
            let hi = params.get(1).copied().unwrap_or(1.0);
            Ok(crate::math::clamp(input, lo, hi))
        }
        other => Err(RuntimeError::Internal(format!("no built-in numeric lowering for transform {other}"))),
    }
}

/// Evaluates one arena node to an [`Artifact`], recursing through operand
/// slots (spec §4.6). Arithmetic opcodes always yield a `Scalar:float`
/// carrying the value computed *for this frame*; only `ClosureFallback`
/// (the path every current compile emits, spec §9) can yield any other
/// artifact kind, since it runs the transform's own closure directly.
fn eval_node(
    arena: &ExprArena,
    constants: &crate::ir::ConstantPool,
    slot: Slot,
    t: f64,
    ctx: &RuntimeCtx,
) -> Result<Artifact, RuntimeError> {
    let node = arena.get(slot).ok_or(RuntimeError::InvalidSlot { slot })?;
    match &node.op {
        Opcode::Const(cref) => Ok(Artifact::Scalar(crate::artifact::ScalarValue::Float(const_f64(constants, cref)))),
        Opcode::Input(s) => eval_node(arena, constants, *s, t, ctx),
        Opcode::Add(a, b) => numeric_binop(arena, constants, *a, *b, t, ctx, |x, y| x + y),
        Opcode::Sub(a, b) => numeric_binop(arena, constants, *a, *b, t, ctx, |x, y| x - y),
        Opcode::Mul(a, b) => numeric_binop(arena, constants, *a, *b, t, ctx, |x, y| x * y),
        Opcode::Div(a, b) => numeric_binop(arena, constants, *a, *b, t, ctx, |x, y| x / y),
        Opcode::Min(a, b) => numeric_binop(arena, constants, *a, *b, t, ctx, f64::min),
        Opcode::Max(a, b) => numeric_binop(arena, constants, *a, *b, t, ctx, f64::max),
        Opcode::Clamp(x, lo, hi) => {
            let x = numeric_value(arena, constants, *x, t, ctx)?;
            let lo = numeric_value(arena, constants, *lo, t, ctx)?;
            let hi = numeric_value(arena, constants, *hi, t, ctx)?;
            Ok(Artifact::Scalar(crate::artifact::ScalarValue::Float(crate::math::clamp(x, lo, hi))))
        }
        Opcode::TransformApply { transform, input, params } => {
            let input_v = numeric_value(arena, constants, *input, t, ctx)?;
            let mut param_vs = Vec::with_capacity(params.len());
            for p in params {
                param_vs.push(numeric_value(arena, constants, *p, t, ctx)?);
            }
            let result = apply_builtin_numeric_transform(transform, input_v, &param_vs)?;
            Ok(Artifact::Scalar(crate::artifact::ScalarValue::Float(result)))
        }
        Opcode::ClosureFallback(f) => Ok(f(t, ctx)),
    }
}

fn numeric_value(
    arena: &ExprArena,
    constants: &crate::ir::ConstantPool,
    slot: Slot,
    t: f64,
    ctx: &RuntimeCtx,
) -> Result<f64, RuntimeError> {
    let artifact = eval_node(arena, constants, slot, t, ctx)?;
    as_f64_now(&artifact, t, ctx).ok_or_else(|| RuntimeError::TypeMismatch {
        expected: ArtifactKind::ScalarFloat,
        found: artifact.kind(),
    })
}

#[allow(clippy::too_many_arguments)]
fn numeric_binop(
    arena: &ExprArena,
    constants: &crate::ir::ConstantPool,
    a: Slot,
    b: Slot,
    t: f64,
    ctx: &RuntimeCtx,
    op: impl Fn(f64, f64) -> f64,
) -> Result<Artifact, RuntimeError> {
    let lhs = numeric_value(arena, constants, a, t, ctx)?;
    let rhs = numeric_value(arena, constants, b, t, ctx)?;
    Ok(Artifact::Scalar(crate::artifact::ScalarValue::Float(op(lhs, rhs))))
}

fn const_f64(constants: &crate::ir::ConstantPool, cref: &crate::ir::ConstRef) -> f64 {
    match *cref {
        crate::ir::ConstRef::F64(i) => constants.f64_pool.get(i as usize).copied().unwrap_or(0.0),
        crate::ir::ConstRef::F32(i) => f64::from(constants.f32_pool.get(i as usize).copied().unwrap_or(0.0)),
        crate::ir::ConstRef::I32(i) => f64::from(constants.i32_pool.get(i as usize).copied().unwrap_or(0)),
        // The JSON bucket holds strings/bools for transform params, not
        // bare numerics; arithmetic opcodes never reference it.
        crate::ir::ConstRef::Json(_) => 0.0,
    }
}

fn has_path_clip(tree: &RenderTree) -> bool {
    tree.iter().any(|node| match node {
        RenderNode::ClipGroup(g) => matches!(g.shape, ClipShape::Path) || has_path_clip(&g.children),
        RenderNode::Instances2D(_) | RenderNode::PostFx(_) => false,
    })
}

/// Executes one frame of `ir` against `state` at time `t_ms`, walking the
/// schedule in order and producing a [`RenderFrameIR`] (spec §4.6).
///
/// On error, `state` is left exactly as it was before this call: every
/// cache write only commits once the step that produced it has fully
/// succeeded, so a failed frame never corrupts subsequent evaluation (spec
/// §4.6).
pub fn execute_frame(ir: &Ir, state: &mut RuntimeState, t_ms: f64) -> Result<RenderFrameIR, RuntimeError> {
    let ctx = state.ctx();
    let frame_id = state.frame_id;
    let span_start = state.debug.record_span(SpanRecord::new(
        frame_id,
        0.0,
        SpanKind::FrameEval,
        0,
        NO_PARENT,
        0,
        0,
    ));

    let mut frame = RenderFrameIR::empty();
    let mut field_cache_writes: Vec<(u32, FieldCacheEntry)> = Vec::new();

    for step in &ir.schedule.steps {
        match &step.kind {
            StepKind::RenderAssemble { render_slot } => {
                let program_artifact = eval_node(&ir.signal_exprs, &ir.constants, *render_slot, t_ms, &ctx)?;
                let Artifact::RenderTreeProgram(program) = program_artifact else {
                    return Err(RuntimeError::TypeMismatch {
                        expected: ArtifactKind::RenderTreeProgram,
                        found: program_artifact.kind(),
                    });
                };
                let tree = (program.signal)(t_ms, &ctx);
                if has_path_clip(&tree) {
                    return Err(RuntimeError::PathClippingReserved);
                }
                let fired = (program.event)(t_ms, state.last_t);
                for id in fired {
                    log::trace!("event fired: {id}");
                }
                frame.passes = assemble(&tree);
            }
            StepKind::MaterializeField { field_slot, count, cell } => {
                let count_artifact = eval_node(&ir.signal_exprs, &ir.constants, *count, t_ms, &ctx)?;
                let n = as_f64_now(&count_artifact, t_ms, &ctx)
                    .ok_or_else(|| RuntimeError::TypeMismatch {
                        expected: ArtifactKind::ScalarFloat,
                        found: count_artifact.kind(),
                    })?;
                #[allow(clippy::cast_sign_loss, clippy::cast_possible_truncation)]
                let n = n.max(0.0) as usize;

                let cached = state.field_cache.get(cell);
                let needs_recompute = step.cache == crate::ir::CacheHint::PerFrame
                    || cached.is_none_or(|c| c.seed != state.config.seed || c.count != n);

                if needs_recompute {
                    let field_artifact = eval_node(&ir.field_exprs, &ir.constants, *field_slot, t_ms, &ctx)?;
                    let Artifact::Field(field) = field_artifact else {
                        return Err(RuntimeError::TypeMismatch {
                            expected: ArtifactKind::FieldFloat,
                            found: field_artifact.kind(),
                        });
                    };
                    let len = match &field {
                        crate::artifact::FieldValue::Float(f) => f(state.config.seed, n, &ctx).len(),
                        crate::artifact::FieldValue::Vec2(f) => f(state.config.seed, n, &ctx).len(),
                        crate::artifact::FieldValue::Color(f) => f(state.config.seed, n, &ctx).len(),
                    };
                    if len != n {
                        return Err(RuntimeError::FieldLengthMismatch { expected: n, found: len });
                    }
                    field_cache_writes.push((*cell, FieldCacheEntry { seed: state.config.seed, count: n }));
                }
            }
            StepKind::CombineBus { bus: _, result_slot } => {
                eval_node(&ir.signal_exprs, &ir.constants, *result_slot, t_ms, &ctx)?;
            }
            StepKind::Instance2D { render_slot } | StepKind::PostFx { render_slot } | StepKind::ClipGroup { render_slot } => {
                // These step kinds describe passes a richer compiler would
                // schedule independently; today every pass already reaches
                // `frame.passes` via the single `RenderAssemble` step above,
                // so here they only validate that the referenced slot still
                // resolves (forward-compatible with a future compiler that
                // emits them standalone).
                eval_node(&ir.signal_exprs, &ir.constants, *render_slot, t_ms, &ctx)?;
            }
        }
    }

    for (cell, entry) in field_cache_writes {
        state.field_cache.insert(cell, entry);
    }
    state.last_t = t_ms;
    state.frame_id = state.frame_id.wrapping_add(1);
    state.last_good_frame = Some(frame.clone());

    state.debug.record_span(SpanRecord::new(
        frame_id,
        0.0,
        SpanKind::FrameEval,
        span_start,
        NO_PARENT,
        0,
        0,
    ));

    Ok(frame)
}

/// Executes a frame, falling back to the last known-good frame on error
/// instead of propagating it (spec §4.6: "the runtime continues presenting
/// the last known-good frame until a successful recompile").
pub fn execute_frame_resilient(ir: &Ir, state: &mut RuntimeState, t_ms: f64) -> RenderFrameIR {
    match execute_frame(ir, state, t_ms) {
        Ok(frame) => frame,
        Err(e) => {
            log::warn!("frame evaluation failed, presenting last known-good frame: {e}");
            state.last_good_frame.clone().unwrap_or_else(RenderFrameIR::empty)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifact::{RenderTreeProgramValue, ScalarValue};
    use crate::ir::{CacheHint, IrBuilder, OutputDescriptor, ScheduleStep};
    use crate::math::Color;
    use crate::render::{Glyph2D, IDENTITY_AFFINE, Instances2D, Material, PassHeader};
    use std::sync::Arc;

    fn constant_program_ir(tree: RenderTree) -> Ir {
        let mut builder = IrBuilder::new();
        let program = RenderTreeProgramValue {
            signal: Arc::new(move |_t, _ctx| tree.clone()),
            event: Arc::new(|_t, _last_t| Vec::new()),
        };
        let slot = builder.push_signal(
            Opcode::ClosureFallback(Arc::new(move |_t, _ctx| Artifact::RenderTreeProgram(program.clone()))),
            ArtifactKind::RenderTreeProgram,
        );
        let step = builder.push_step(
            ScheduleStep {
                kind: StepKind::RenderAssemble { render_slot: slot },
                cache: CacheHint::PerFrame,
                block: None,
            },
            &[slot],
        );
        builder.record_producer(slot, step);
        builder.push_output(OutputDescriptor {
            id: crate::ident::make_block_id("sink"),
            kind: ArtifactKind::RenderTreeProgram,
            slot,
        });
        builder.finish()
    }

    fn one_instance(z: i32) -> RenderNode {
        RenderNode::Instances2D(Instances2D {
            header: PassHeader { z, enabled: true },
            transforms: vec![IDENTITY_AFFINE],
            colors: vec![Color::BLACK],
            glyph: Glyph2D::Circle,
            material: Material::Solid(Color::BLACK),
        })
    }

    #[test]
    fn executes_a_single_render_assemble_step() {
        let ir = constant_program_ir(vec![one_instance(0)]);
        let mut state = RuntimeState::new(RuntimeConfig::default());
        let frame = execute_frame(&ir, &mut state, 0.0).expect("frame should evaluate");
        assert_eq!(frame.passes.len(), 1);
    }

    #[test]
    fn path_clipping_is_reported_not_silently_dropped() {
        use crate::render::{ClipGroup, ClipShape};
        let tree = vec![RenderNode::ClipGroup(ClipGroup {
            header: PassHeader { z: 0, enabled: true },
            shape: ClipShape::Path,
            transform: IDENTITY_AFFINE,
            children: Vec::new(),
        })];
        let ir = constant_program_ir(tree);
        let mut state = RuntimeState::new(RuntimeConfig::default());
        let err = execute_frame(&ir, &mut state, 0.0).unwrap_err();
        assert!(matches!(err, RuntimeError::PathClippingReserved));
    }

    #[test]
    fn resilient_execution_falls_back_to_last_good_frame() {
        let ir = constant_program_ir(vec![one_instance(0)]);
        let mut state = RuntimeState::new(RuntimeConfig::default());
        let good = execute_frame_resilient(&ir, &mut state, 0.0);
        assert_eq!(good.passes.len(), 1);

        // A second IR whose render slot is a dangling reference: execution
        // fails, but the resilient wrapper should still return the
        // previous good frame rather than an empty one.
        let mut builder = IrBuilder::new();
        let bogus_slot = 999;
        let step = builder.push_step(
            ScheduleStep {
                kind: StepKind::RenderAssemble { render_slot: bogus_slot },
                cache: CacheHint::PerFrame,
                block: None,
            },
            &[],
        );
        let _ = step;
        let bad_ir = builder.finish();
        let fallback = execute_frame_resilient(&bad_ir, &mut state, 1.0);
        assert_eq!(fallback.passes.len(), 1);
    }

    #[test]
    fn field_materialization_validates_length() {
        let mut builder = IrBuilder::new();
        let count_ref = builder.const_f64(5.0);
        let count_slot = builder.push_signal(Opcode::Const(count_ref), ArtifactKind::ScalarFloat);
        // A field function that lies about its length: always returns 1
        // element regardless of the requested count.
        let field_slot = builder.push_field(
            Opcode::ClosureFallback(Arc::new(|_t, _ctx| {
                Artifact::Field(crate::artifact::FieldValue::Float(Arc::new(|_seed, _n, _ctx| vec![1.0])))
            })),
            ArtifactKind::FieldFloat,
        );
        let cell = builder.alloc_state_cell("f", crate::ir::StateCellKind::FieldBuffer, 5);
        builder.push_step(
            ScheduleStep {
                kind: StepKind::MaterializeField {
                    field_slot,
                    count: count_slot,
                    cell,
                },
                cache: CacheHint::PerFrame,
                block: None,
            },
            &[field_slot, count_slot],
        );
        let ir = builder.finish();
        let mut state = RuntimeState::new(RuntimeConfig::default());
        let result = execute_frame(&ir, &mut state, 0.0);
        assert!(matches!(
            result,
            Err(RuntimeError::FieldLengthMismatch { expected: 5, found: 1 })
        ));
    }

    #[test]
    fn runtime_config_from_env_reads_override() {
        // SAFETY net for test isolation: scope the env var to this test
        // only; other tests never read it.
        env::set_var(DEBUG_CAPACITY_ENV, "42");
        let config = RuntimeConfig::from_env();
        assert_eq!(config.debug_value_capacity, 42);
        env::remove_var(DEBUG_CAPACITY_ENV);
    }
}
