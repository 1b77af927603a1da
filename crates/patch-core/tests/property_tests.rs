// SPDX-License-Identifier: Apache-2.0
//! Property-based coverage of the spec §8 testable properties that are
//! naturally property-based rather than single concrete scenarios: phase
//! range, field length, adapter cost monotonicity and idempotent compile
//! (see `SPEC_FULL.md` §4.11).

use std::collections::BTreeMap;
use std::sync::Arc;

use patch_core::artifact::{Artifact, ArtifactKind, FieldValue, RuntimeCtx, ScalarValue, SignalValue, Viewport};
use patch_core::compiler::{compile, BlockRegistry};
use patch_core::ident::{make_block_id, BlockSlot};
use patch_core::patch::{Block, Literal, ParamBinding, Patch, Wire};
use patch_core::registry::{AdapterPolicy, RegistryBuilder, TransformDef, TransformKind};
use patch_core::runtime::{execute_frame_resilient, RuntimeConfig, RuntimeState};
use patch_core::stdlib::{self, time_root_kind, CIRCLE_SCENE, TIME_ROOT};
use proptest::prelude::*;

fn adapter(id: &str, cost: f64) -> TransformDef {
    TransformDef {
        id: id.into(),
        kind: TransformKind::Adapter,
        input_type: Some(ArtifactKind::ScalarFloat),
        output_type: Some(ArtifactKind::ScalarInt),
        explicit_type: false,
        domain: None,
        allowed_scopes: Vec::new(),
        params: Vec::new(),
        cost_hint: None,
        stability_hint: None,
        policy: Some(AdapterPolicy::Auto),
        cost: Some(cost),
        apply: Some(Arc::new(|input, _params, _ctx| input.clone())),
        compile_to_ir: None,
    }
}

fn demo_patch() -> Patch {
    let time_root = make_block_id("prop-time-root");
    let circle = make_block_id("prop-circle");

    let mut patch = Patch::new();
    let mut time_params = BTreeMap::new();
    time_params.insert("cycleLength".to_owned(), ParamBinding::Literal(Literal::Float(1000.0)));
    patch.blocks.insert(
        time_root,
        Block {
            id: time_root,
            block_type: TIME_ROOT.into(),
            params: time_params,
        },
    );
    patch.blocks.insert(
        circle,
        Block {
            id: circle,
            block_type: CIRCLE_SCENE.into(),
            params: BTreeMap::new(),
        },
    );
    patch.wires.push(Wire {
        from: BlockSlot { block: time_root, slot: 2 },
        to: BlockSlot { block: circle, slot: 0 },
    });
    patch.sinks.push(circle);
    patch
}

proptest! {
    /// Spec §3 invariant b / §8 property 2: a `Signal:phase` output must
    /// always land in `[0, 1)`, for any finite `t` and any positive cycle
    /// length, not merely the handful of sample points a unit test picks.
    #[test]
    fn time_root_phase_stays_in_unit_interval(t in -1.0e7_f64..1.0e7, cycle_length in 1.0e-3_f64..1.0e6) {
        let kind = time_root_kind();
        let mut params: BTreeMap<String, Artifact> = BTreeMap::new();
        params.insert("cycleLength".to_owned(), Artifact::Scalar(ScalarValue::Float(cycle_length)));
        let outs = (kind.compile)(&BTreeMap::new(), &params, &RuntimeCtx::default());
        let Artifact::Signal(SignalValue::Phase(phase)) = &outs[2] else {
            unreachable!("slot 2 is always the phase output");
        };
        let v = phase(t, &RuntimeCtx::default());
        prop_assert!((0.0..1.0).contains(&v), "phase({t}) with cycleLength={cycle_length} = {v}");
    }

    /// Spec §8 property 3: a field materialized for a requested count `n`
    /// must return exactly `n` elements, for any `n` a listener might ask
    /// for, not just a handful of fixed sizes.
    #[test]
    fn constant_field_always_returns_requested_length(n in 0usize..2000, seed in any::<u64>()) {
        let field = FieldValue::Float(Arc::new(|_seed, count, _ctx| vec![1.0; count]));
        let FieldValue::Float(f) = field else { unreachable!() };
        let values = f(seed, n, &RuntimeCtx::default());
        prop_assert_eq!(values.len(), n);
    }

    /// Spec §8 property 10: adapter candidates must always come back sorted
    /// by ascending cost, for any set of registered costs, with ties broken
    /// lexicographically by id (checked directly, since equal floats can
    /// repeat under arbitrary generation).
    #[test]
    fn find_adapters_is_always_cost_sorted(costs in prop::collection::vec(0.0f64..100.0, 1..12)) {
        let mut builder = RegistryBuilder::new();
        for (i, cost) in costs.iter().enumerate() {
            builder.register(adapter(&format!("adapter-{i}"), *cost)).unwrap();
        }
        let registry = builder.seal();
        let found = registry.find_adapters(ArtifactKind::ScalarFloat, ArtifactKind::ScalarInt);
        prop_assert_eq!(found.len(), costs.len());
        for pair in found.windows(2) {
            let a = pair[0].cost.unwrap_or(0.0);
            let b = pair[1].cost.unwrap_or(0.0);
            prop_assert!(a < b || (a == b && pair[0].id <= pair[1].id));
        }
    }

    /// Spec §8 property 9: compiling the same patch twice, against fresh
    /// registries built the same way, must be idempotent — the resulting
    /// programs must execute to identical frames at any shared `t`, for any
    /// `t` and seed, not just one hardcoded sample.
    #[test]
    fn recompiling_the_same_patch_is_idempotent(t_ms in -5000.0f64..5000.0, seed in any::<u64>()) {
        let patch = demo_patch();

        let outcome_a = compile_demo(&patch, seed);
        let outcome_b = compile_demo(&patch, seed);
        prop_assert!(outcome_a.ok && outcome_b.ok);

        let config = RuntimeConfig::builder().viewport(Viewport::default()).seed(seed).build();
        let mut state_a = RuntimeState::new(config);
        let mut state_b = RuntimeState::new(config);
        let frame_a = execute_frame_resilient(&outcome_a.program.unwrap(), &mut state_a, t_ms);
        let frame_b = execute_frame_resilient(&outcome_b.program.unwrap(), &mut state_b, t_ms);
        prop_assert_eq!(frame_a, frame_b);
    }
}

fn compile_demo(patch: &Patch, seed: u64) -> patch_core::compiler::CompileOutcome {
    let mut block_registry = BlockRegistry::new();
    stdlib::register_block_kinds(&mut block_registry);
    let mut registry_builder = RegistryBuilder::new();
    stdlib::register_defaults(&mut registry_builder).expect("built-in transforms must register cleanly");
    let registry = registry_builder.seal();
    let ctx = RuntimeCtx { viewport: Viewport::default() };
    compile(patch, &block_registry, &registry, seed, ctx)
}
