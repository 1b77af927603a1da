// SPDX-License-Identifier: Apache-2.0
//! The Graph Compiler (C5): patch -> typed IR (spec §4.4).
//!
//! This is the largest component by design (spec §2 gives it 25% of the
//! implementation budget): it owns validation, topological scheduling,
//! adapter insertion, lens application and the glue that hands everything
//! to [`crate::ir::IrBuilder`].

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use rustc_hash::FxHashMap;
use thiserror::Error;

use crate::artifact::{Artifact, ArtifactKind, RuntimeCtx};
use crate::bus::{apply_listener_stack, effective_value};
use crate::ident::{BlockId, BlockSlot, BusId};
use crate::ir::{CacheHint, ClosureFallback, IrBuilder, Ir, Opcode, OrderingInput, OutputDescriptor, ScheduleStep, StepKind};
use crate::patch::{Block, BlockTypeId, Patch};
use crate::registry::Registry;
use crate::resolver::{resolve_param, ResolverEnv};

/// A block kind's declared input slot.
#[derive(Clone, Debug)]
pub struct BlockInputSlot {
    /// Slot name, for `debugIndex` and error messages.
    pub name: String,
    /// The artifact kind this slot expects after adapter insertion.
    pub expected: ArtifactKind,
}

/// A block kind's declared output slot.
#[derive(Clone, Debug)]
pub struct BlockOutputSlot {
    /// Slot name.
    pub name: String,
    /// The artifact kind this slot produces.
    pub kind: ArtifactKind,
}

/// The inputs (by declared name) and resolved params (by declared name)
/// handed to a [`BlockKindDef::compile`] closure.
pub type BlockInputs = BTreeMap<String, Artifact>;

/// A compile function for one block kind: given its resolved inputs and
/// parameters, produces its output artifacts in declared-output order.
pub type BlockCompileFn =
    Arc<dyn Fn(&BlockInputs, &BlockInputs, &RuntimeCtx) -> Vec<Artifact> + Send + Sync>;

/// The declaration of one block kind (`TimeRoot`, `Add`, `Circle2D`, ...).
/// Distinct from [`crate::registry::TransformDef`]: block kinds are graph
/// nodes with their own input/output slots, not value-to-value transforms.
pub struct BlockKindDef {
    /// Block type id, matched against [`Block::block_type`].
    pub id: BlockTypeId,
    /// Declared input slots, in slot-index order.
    pub inputs: Vec<BlockInputSlot>,
    /// Declared output slots, in slot-index order.
    pub outputs: Vec<BlockOutputSlot>,
    /// Compile-time implementation.
    pub compile: BlockCompileFn,
}

/// A catalog of block kinds (spec §4.4 step 1: "every block type exists in
/// the registry"). Analogous in spirit to [`Registry`] but for block
/// kinds rather than transforms.
#[derive(Default)]
pub struct BlockRegistry {
    kinds: FxHashMap<BlockTypeId, Arc<BlockKindDef>>,
}

impl BlockRegistry {
    /// An empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a block kind, overwriting any previous registration for
    /// the same id.
    pub fn register(&mut self, def: BlockKindDef) {
        self.kinds.insert(def.id.clone(), Arc::new(def));
    }

    /// Looks up a block kind by id.
    #[must_use]
    pub fn get(&self, id: &BlockTypeId) -> Option<Arc<BlockKindDef>> {
        self.kinds.get(id).cloned()
    }
}

/// Error taxonomy (spec §7).
#[derive(Debug, Clone, Error)]
pub enum CompileError {
    /// A wire cycle was detected during topological scheduling.
    #[error("cycle detected in block dependency graph: {path:?}")]
    Cycle {
        /// The cyclic path, for diagnostics.
        path: Vec<BlockId>,
    },
    /// No adapter path exists between two artifact kinds, or a domain/scope
    /// mismatch was found applying a lens.
    #[error("no adapter from {from} to {to}: {message}")]
    AdapterError {
        /// Producer kind.
        from: ArtifactKind,
        /// Required kind.
        to: ArtifactKind,
        /// Extra detail.
        message: String,
    },
    /// A block's declared input type does not match its producer's
    /// artifact kind, even after adapter insertion was attempted.
    #[error("type mismatch at {at:?}: expected {expected}, found {found}")]
    TypeMismatch {
        /// Expected kind.
        expected: ArtifactKind,
        /// Actual kind.
        found: ArtifactKind,
        /// The block where the mismatch was found.
        at: BlockId,
    },
    /// A block's declared type is not registered in the [`BlockRegistry`].
    #[error("block type not registered: {block_type:?} (at {at:?})")]
    MissingBlock {
        /// The unregistered block type.
        block_type: BlockTypeId,
        /// The offending block.
        at: BlockId,
    },
    /// A transform's IR lowering returned `None` and no closure fallback
    /// was available, or a reserved feature (path clipping) was used.
    #[error("not implemented: {message}")]
    NotImplemented {
        /// Detail message.
        message: String,
    },
    /// Lens parameter binding recursion formed a cycle.
    #[error("lens parameter cycle detected")]
    ParamCycle,
    /// Lens parameter binding recursion exceeded the depth bound.
    #[error("lens parameter nesting too deep")]
    ParamDepthExceeded,
    /// An invariant that must never fail did fail. Never constructed for
    /// expected domain errors — only for genuine internal bugs.
    #[error("internal compiler error: {0}")]
    Internal(String),
}

/// A non-fatal compile-time observation (spec §4.4 step 5: `SUGGEST`
/// adapter matches are "reported as warnings").
#[derive(Debug, Clone)]
pub struct CompileWarning {
    /// Human-readable message.
    pub message: String,
    /// The block the warning applies to, if any.
    pub at: Option<BlockId>,
}

/// The result of [`compile`] (spec §6).
pub struct CompileOutcome {
    /// `true` iff `errors` is empty.
    pub ok: bool,
    /// The compiled program, present even when `ok` is false if a partial
    /// result could still be produced (spec §4.4: "Error handling").
    pub program: Option<Ir>,
    /// Accumulated errors.
    pub errors: Vec<CompileError>,
    /// Accumulated warnings.
    pub warnings: Vec<CompileWarning>,
}

const TIME_ROOT_TYPE: &str = "TimeRoot";

fn synthesize_time_root(patch: &mut Patch) -> BlockId {
    let id = crate::ident::make_block_id("__synthetic_time_root__");
    patch.blocks.insert(
        id,
        Block {
            id,
            block_type: BlockTypeId::new(TIME_ROOT_TYPE),
            params: BTreeMap::new(),
        },
    );
    // Auto-publish canonical outputs to canonical buses (spec §4.4 step 1).
    // TimeRoot's declared output order is fixed by `stdlib::time_root_kind`:
    // 0=systemTime 1=cycleT 2=phase 3=wrap 4=cycleIndex 5=energy.
    let canonical: [(u32, &str, &str); 3] = [(2, "phaseA", "phase"), (3, "pulse", "wrap"), (5, "energy", "energy")];
    for (slot, bus_name, label) in canonical {
        let bus_id = crate::ident::make_bus_id(bus_name);
        patch.buses.entry(bus_id).or_insert_with(|| crate::patch::Bus {
            id: bus_id,
            value_type: if slot == 4 {
                ArtifactKind::SignalInt
            } else if slot == 2 {
                ArtifactKind::SignalPhase
            } else if slot == 3 {
                ArtifactKind::SignalUnit
            } else {
                ArtifactKind::SignalFloat
            },
            combine_mode: crate::patch::CombineMode::Last,
            default_value: crate::patch::Literal::Float(0.0),
            sort_key: 0.0,
        });
        patch.publishers.push(crate::patch::Publisher {
            id: crate::ident::make_publisher_id(&format!("__time_root_{label}")),
            bus: bus_id,
            source: BlockSlot { block: id, slot },
            stack: Vec::new(),
            enabled: true,
            sort_key: 0.0,
        });
    }
    id
}

fn has_time_root(patch: &Patch) -> bool {
    patch.blocks.values().any(|b| b.block_type.as_str() == TIME_ROOT_TYPE)
}

/// Topologically sorts `blocks`, honoring wire edges and the implicit
/// publisher-source -> listener-target edges a bus creates, tie-breaking
/// by lexicographic block id (spec §4.4 step 2).
fn topo_sort(patch: &Patch) -> Result<Vec<BlockId>, CompileError> {
    let mut deps: BTreeMap<BlockId, HashSet<BlockId>> = patch.blocks.keys().map(|id| (*id, HashSet::new())).collect();

    for wire in &patch.wires {
        deps.entry(wire.to.block).or_default().insert(wire.from.block);
    }
    for listener in patch.listeners.iter().filter(|l| l.enabled) {
        for publisher in patch.enabled_publishers(listener.bus) {
            deps.entry(listener.target.block)
                .or_default()
                .insert(publisher.source.block);
        }
    }

    let mut remaining = deps;
    let mut order = Vec::with_capacity(remaining.len());
    loop {
        let mut ready: Vec<BlockId> = remaining
            .iter()
            .filter(|(_, d)| d.is_empty())
            .map(|(id, _)| *id)
            .collect();
        if ready.is_empty() {
            break;
        }
        ready.sort();
        for id in &ready {
            remaining.remove(id);
        }
        for deps_of in remaining.values_mut() {
            for id in &ready {
                deps_of.remove(id);
            }
        }
        order.extend(ready);
    }

    if !remaining.is_empty() {
        let mut path: Vec<BlockId> = remaining.into_keys().collect();
        path.sort();
        return Err(CompileError::Cycle { path });
    }
    Ok(order)
}

/// Compiles a patch into an immutable [`Ir`] (spec §4.4, §6).
///
/// Errors are accumulated rather than thrown; `outcome.ok` reflects
/// whether any were found. The returned `program` may still be `Some`
/// when `ok` is false if a partial result could be salvaged, but callers
/// must not execute it in that case (spec §4.4, "Error handling").
#[must_use]
#[allow(clippy::too_many_lines)]
pub fn compile(
    patch: &Patch,
    block_registry: &BlockRegistry,
    registry: &Registry,
    _seed: u64,
    ctx: RuntimeCtx,
) -> CompileOutcome {
    let mut errors = Vec::new();
    let mut warnings = Vec::new();

    let mut patch = patch.clone();
    if !has_time_root(&patch) {
        log::info!("no TimeRoot found; synthesizing a default one");
        synthesize_time_root(&mut patch);
    }

    for block in patch.blocks.values() {
        if block_registry.get(&block.block_type).is_none() {
            errors.push(CompileError::MissingBlock {
                block_type: block.block_type.clone(),
                at: block.id,
            });
        }
    }
    for publisher in &patch.publishers {
        if !patch.buses.contains_key(&publisher.bus) {
            errors.push(CompileError::Internal(format!(
                "publisher references unknown bus {:?}",
                publisher.bus
            )));
        }
    }
    if !errors.is_empty() {
        return CompileOutcome {
            ok: false,
            program: None,
            errors,
            warnings,
        };
    }

    let order = match topo_sort(&patch) {
        Ok(order) => order,
        Err(e) => {
            return CompileOutcome {
                ok: false,
                program: None,
                errors: vec![e],
                warnings,
            }
        }
    };

    let mut builder = IrBuilder::new();
    builder.declare_ordering(OrderingInput::NodeIdLex);

    let mut block_outputs: BTreeMap<BlockId, Vec<Artifact>> = BTreeMap::new();
    let mut bus_cache: BTreeMap<BusId, Artifact> = BTreeMap::new();

    for block_id in order {
        let Some(block) = patch.blocks.get(&block_id) else {
            errors.push(CompileError::Internal(format!("scheduled block {block_id:?} vanished")));
            continue;
        };
        let Some(kind) = block_registry.get(&block.block_type) else {
            continue; // already reported above
        };

        // Ensure every bus this block listens to is cached, now that every
        // publisher source block for it has already been compiled (the
        // topo sort established that dependency).
        for listener in patch.listeners.iter().filter(|l| l.enabled && l.target.block == block_id) {
            if bus_cache.contains_key(&listener.bus) {
                continue;
            }
            let bus = &patch.buses[&listener.bus];
            let publishers = patch.enabled_publishers(listener.bus);
            let resolve_wire = |slot: BlockSlot| -> Artifact {
                block_outputs
                    .get(&slot.block)
                    .and_then(|outs| outs.get(slot.slot as usize))
                    .cloned()
                    .unwrap_or_else(|| Artifact::error("unbound wire source"))
            };
            let env = ResolverEnv {
                registry,
                ctx,
                resolve_bus: &|_| Artifact::error("nested bus reads not supported in precompute"),
                resolve_wire: &resolve_wire,
                default_sources: &patch.default_sources,
            };
            let value = effective_value(bus, &publishers, &env);
            if let Some(err) = param_resolution_error(&value) {
                errors.push(err);
            }
            bus_cache.insert(listener.bus, value);
        }

        let mut inputs: BlockInputs = BTreeMap::new();
        for (i, slot) in kind.inputs.iter().enumerate() {
            let i = u32::try_from(i).unwrap_or(u32::MAX);
            let raw = if let Some(wire) = patch.wires.iter().find(|w| w.to.block == block_id && w.to.slot == i) {
                block_outputs
                    .get(&wire.from.block)
                    .and_then(|outs| outs.get(wire.from.slot as usize))
                    .cloned()
                    .unwrap_or_else(|| Artifact::error("unbound wire source"))
            } else if let Some(listener) = patch
                .listeners
                .iter()
                .find(|l| l.enabled && l.target.block == block_id && l.target.slot == i)
            {
                let combined = bus_cache.get(&listener.bus).cloned().unwrap_or_else(|| Artifact::error("bus not cached"));
                let env = ResolverEnv {
                    registry,
                    ctx,
                    resolve_bus: &|id| bus_cache.get(&id).cloned().unwrap_or_else(|| Artifact::error("bus not cached")),
                    resolve_wire: &|slot: BlockSlot| {
                        block_outputs
                            .get(&slot.block)
                            .and_then(|outs| outs.get(slot.slot as usize))
                            .cloned()
                            .unwrap_or_else(|| Artifact::error("unbound wire source"))
                    },
                    default_sources: &patch.default_sources,
                };
                let applied = apply_listener_stack(&listener.stack, combined, &env);
                if let Some(err) = param_resolution_error(&applied) {
                    errors.push(err);
                }
                applied
            } else {
                Artifact::error(format!("unbound input slot '{}' on block {block_id:?}", slot.name))
            };

            let adapted = if raw.kind() == slot.expected || raw.is_error() {
                raw
            } else {
                match insert_adapter(registry, &raw, slot.expected, ctx, &mut warnings, block_id) {
                    Ok(v) => v,
                    Err(e) => {
                        errors.push(e);
                        Artifact::error("adapter insertion failed")
                    }
                }
            };
            if !adapted.is_error() && adapted.kind() != slot.expected {
                errors.push(CompileError::TypeMismatch {
                    expected: slot.expected,
                    found: adapted.kind(),
                    at: block_id,
                });
            }
            inputs.insert(slot.name.clone(), adapted);
        }

        let mut params: BlockInputs = BTreeMap::new();
        for (name, binding) in &block.params {
            let env = ResolverEnv {
                registry,
                ctx,
                resolve_bus: &|id| bus_cache.get(&id).cloned().unwrap_or_else(|| Artifact::error("bus not cached")),
                resolve_wire: &|slot: BlockSlot| {
                    block_outputs
                        .get(&slot.block)
                        .and_then(|outs| outs.get(slot.slot as usize))
                        .cloned()
                        .unwrap_or_else(|| Artifact::error("unbound wire source"))
                },
                default_sources: &patch.default_sources,
            };
            let mut visited = HashSet::new();
            let resolved = resolve_param(binding, &env, &mut visited, 0);
            if let Some(err) = param_resolution_error(&resolved) {
                errors.push(err);
            }
            params.insert(name.clone(), resolved);
        }

        if let Some(result) = crate::stdlib::try_build_mesh_descriptor(&block.block_type, block_id, &params) {
            match result {
                Ok(desc) => builder.push_mesh(desc),
                Err(e) => errors.push(CompileError::Internal(format!("mesh extrusion failed: {e}"))),
            }
        }

        let outs = (kind.compile)(&inputs, &params, &ctx);
        block_outputs.insert(block_id, outs);
    }

    for sink in &patch.sinks {
        builder.push_render_sink(*sink);
        let Some(outs) = block_outputs.get(sink) else {
            errors.push(CompileError::MissingBlock {
                block_type: BlockTypeId::new("<sink>"),
                at: *sink,
            });
            continue;
        };
        let Some(program) = outs.first() else {
            errors.push(CompileError::Internal(format!("sink block {sink:?} produced no outputs")));
            continue;
        };
        if program.kind() != ArtifactKind::RenderTreeProgram {
            errors.push(CompileError::TypeMismatch {
                expected: ArtifactKind::RenderTreeProgram,
                found: program.kind(),
                at: *sink,
            });
            continue;
        }
        let program = program.clone();
        let closure: ClosureFallback = Arc::new(move |_t, _ctx| program.clone());
        let slot = builder.push_signal(Opcode::ClosureFallback(closure), ArtifactKind::RenderTreeProgram);
        builder.label_slot(slot, format!("sink:{sink:?}"));
        let step = builder.push_step(
            ScheduleStep {
                kind: StepKind::RenderAssemble { render_slot: slot },
                cache: CacheHint::PerFrame,
                block: Some(*sink),
            },
            &[slot],
        );
        builder.record_producer(slot, step);
        builder.label_step(step, "renderAssemble");
        builder.push_output(OutputDescriptor {
            id: *sink,
            kind: ArtifactKind::RenderTreeProgram,
            slot,
        });
    }

    let program = builder.finish();
    // A parameter cycle/depth violation is unrecoverable, like a wire cycle
    // or an unregistered block (spec §8, concrete scenario "Param cycle":
    // "compile returns errors = [{ code: ParamCycle }] and no program").
    let unrecoverable = errors
        .iter()
        .any(|e| matches!(e, CompileError::ParamCycle | CompileError::ParamDepthExceeded));
    CompileOutcome {
        ok: errors.is_empty(),
        program: if unrecoverable { None } else { Some(program) },
        errors,
        warnings,
    }
}

/// Translates the resolver's sentinel error messages (spec §4.2) into
/// structured [`CompileError`] codes so that a parameter cycle or
/// depth-bound violation surfaces in `outcome.errors` rather than silently
/// riding along as an `Artifact::Error` value (spec §8, concrete scenario
/// "Param cycle").
fn param_resolution_error(value: &Artifact) -> Option<CompileError> {
    match value {
        Artifact::Error(msg) if msg == "Lens param cycle detected" => Some(CompileError::ParamCycle),
        Artifact::Error(msg) if msg == "Lens param nesting too deep" => Some(CompileError::ParamDepthExceeded),
        _ => None,
    }
}

/// Inserts an adapter converting `value` to `expected`, preferring
/// `AUTO`-policy adapters; `SUGGEST` matches are surfaced as warnings but
/// not inserted; `EXPLICIT`-only paths are refused silently (spec §4.4
/// step 5).
fn insert_adapter(
    registry: &Registry,
    value: &Artifact,
    expected: ArtifactKind,
    ctx: RuntimeCtx,
    warnings: &mut Vec<CompileWarning>,
    at: BlockId,
) -> Result<Artifact, CompileError> {
    let candidates = registry.find_adapters(value.kind(), expected);
    if let Some(auto) = candidates
        .iter()
        .find(|d| d.policy == Some(crate::registry::AdapterPolicy::Auto))
    {
        let params = crate::registry::ResolvedParams::new();
        return auto.apply.as_ref().map_or_else(
            || {
                Err(CompileError::NotImplemented {
                    message: format!("adapter {} has no apply implementation", auto.id),
                })
            },
            |apply| Ok(apply(value, &params, &ctx)),
        );
    }
    if let Some(suggested) = candidates
        .iter()
        .find(|d| d.policy == Some(crate::registry::AdapterPolicy::Suggest))
    {
        warnings.push(CompileWarning {
            message: format!("adapter {} from {} to {expected} is available but must be added explicitly", suggested.id, value.kind()),
            at: Some(at),
        });
    }
    Err(CompileError::AdapterError {
        from: value.kind(),
        to: expected,
        message: "no AUTO adapter path".to_owned(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifact::ScalarValue;
    use crate::patch::Literal;

    fn passthrough_kind(name: &str, out_kind: ArtifactKind) -> BlockKindDef {
        BlockKindDef {
            id: BlockTypeId::new(name),
            inputs: Vec::new(),
            outputs: vec![BlockOutputSlot {
                name: "out".to_owned(),
                kind: out_kind,
            }],
            compile: Arc::new(|_inputs, _params, _ctx| vec![Artifact::Scalar(ScalarValue::Float(1.0))]),
        }
    }

    #[test]
    fn cycle_is_detected() {
        let a = crate::ident::make_block_id("a");
        let b = crate::ident::make_block_id("b");
        let mut patch = Patch::new();
        patch.blocks.insert(
            a,
            Block {
                id: a,
                block_type: BlockTypeId::new("X"),
                params: BTreeMap::new(),
            },
        );
        patch.blocks.insert(
            b,
            Block {
                id: b,
                block_type: BlockTypeId::new("X"),
                params: BTreeMap::new(),
            },
        );
        patch.wires.push(crate::patch::Wire {
            from: BlockSlot { block: a, slot: 0 },
            to: BlockSlot { block: b, slot: 0 },
        });
        patch.wires.push(crate::patch::Wire {
            from: BlockSlot { block: b, slot: 0 },
            to: BlockSlot { block: a, slot: 0 },
        });
        let err = topo_sort(&patch).unwrap_err();
        assert!(matches!(err, CompileError::Cycle { .. }));
    }

    #[test]
    fn missing_block_type_is_reported() {
        let block_registry = BlockRegistry::new();
        let registry = crate::registry::RegistryBuilder::new().seal();
        let mut patch = Patch::new();
        let id = crate::ident::make_block_id("orphan");
        patch.blocks.insert(
            id,
            Block {
                id,
                block_type: BlockTypeId::new("Nonexistent"),
                params: BTreeMap::new(),
            },
        );
        let outcome = compile(&patch, &block_registry, &registry, 0, RuntimeCtx::default());
        assert!(!outcome.ok);
        assert!(outcome.errors.iter().any(|e| matches!(e, CompileError::MissingBlock { .. })));
    }

    #[test]
    fn empty_patch_synthesizes_time_root_and_compiles_clean() {
        let mut block_registry = BlockRegistry::new();
        block_registry.register(passthrough_kind(TIME_ROOT_TYPE, ArtifactKind::SignalFloat));
        let registry = crate::registry::RegistryBuilder::new().seal();
        let patch = Patch::new();
        let outcome = compile(&patch, &block_registry, &registry, 0, RuntimeCtx::default());
        assert!(outcome.ok, "errors: {:?}", outcome.errors);
    }
}
