// SPDX-License-Identifier: Apache-2.0
//! Bus combine-mode properties exercised through the full compile/execute
//! pipeline (spec §4.3, §8 testable properties 4 and 5), rather than by
//! calling `bus::effective_value` directly as `bus.rs`'s unit tests do.

use patch_core::artifact::{Artifact, ArtifactKind, RuntimeCtx, SignalValue, Viewport};
use patch_core::compiler::{compile, BlockCompileFn, BlockKindDef, BlockOutputSlot, BlockRegistry};
use patch_core::ident::{make_block_id, make_bus_id, make_listener_id, make_publisher_id, BlockSlot};
use patch_core::patch::{Block, Bus, CombineMode, Listener, Literal, Patch, Publisher};
use patch_core::registry::RegistryBuilder;
use patch_core::render::PassIR;
use patch_core::runtime::{execute_frame_resilient, RuntimeConfig, RuntimeState};
use patch_core::stdlib::{self, CIRCLE_SCENE};
use std::collections::BTreeMap;
use std::sync::Arc;

const CONST_FLOAT: &str = "test:ConstFloat";

fn const_float_kind() -> BlockKindDef {
    let compile: BlockCompileFn = Arc::new(|_inputs, params, _ctx| {
        let v = match params.get("value") {
            Some(Artifact::Scalar(patch_core::artifact::ScalarValue::Float(v))) => *v,
            _ => 0.0,
        };
        vec![Artifact::Signal(SignalValue::Float(Arc::new(move |_t, _ctx| v)))]
    });
    BlockKindDef {
        id: CONST_FLOAT.into(),
        inputs: Vec::new(),
        outputs: vec![BlockOutputSlot { name: "value".to_owned(), kind: ArtifactKind::SignalFloat }],
        compile,
    }
}

fn const_float_block(label: &str, value: f64) -> (patch_core::ident::BlockId, Block) {
    let id = make_block_id(label);
    let mut params = BTreeMap::new();
    params.insert("value".to_owned(), patch_core::patch::ParamBinding::Literal(Literal::Float(value)));
    (id, Block { id, block_type: CONST_FLOAT.into(), params })
}

/// Builds a patch wiring two constant publishers onto one bus, combined
/// under `mode`, listened to by `CircleScene`'s radius input and sunk
/// there. Returns the two publisher ids alongside the compiled radius.
fn radius_from_combine(mode: CombineMode, a_value: f64, b_value: f64, a_sort_key: f64, b_sort_key: f64) -> f64 {
    let (a_id, a_block) = const_float_block("combine-a", a_value);
    let (b_id, b_block) = const_float_block("combine-b", b_value);
    let circle = make_block_id("combine-sink");
    let bus_id = make_bus_id("combine-test-bus");

    let mut patch = Patch::new();
    patch.blocks.insert(a_id, a_block);
    patch.blocks.insert(b_id, b_block);
    patch.blocks.insert(
        circle,
        Block { id: circle, block_type: CIRCLE_SCENE.into(), params: BTreeMap::new() },
    );
    patch.buses.insert(
        bus_id,
        Bus {
            id: bus_id,
            value_type: ArtifactKind::SignalFloat,
            combine_mode: mode,
            default_value: Literal::Float(0.0),
            sort_key: 0.0,
        },
    );
    let publisher_a_id = make_publisher_id("combine-pub-a");
    let publisher_b_id = make_publisher_id("combine-pub-b");
    patch.publishers.push(Publisher {
        id: publisher_a_id,
        bus: bus_id,
        source: BlockSlot { block: a_id, slot: 0 },
        stack: Vec::new(),
        enabled: true,
        sort_key: a_sort_key,
    });
    patch.publishers.push(Publisher {
        id: publisher_b_id,
        bus: bus_id,
        source: BlockSlot { block: b_id, slot: 0 },
        stack: Vec::new(),
        enabled: true,
        sort_key: b_sort_key,
    });
    patch.listeners.push(Listener {
        id: make_listener_id("combine-listener"),
        bus: bus_id,
        target: BlockSlot { block: circle, slot: 0 },
        stack: Vec::new(),
        enabled: true,
    });
    patch.sinks.push(circle);

    let mut block_registry = BlockRegistry::new();
    stdlib::register_block_kinds(&mut block_registry);
    block_registry.register(const_float_kind());
    let registry = RegistryBuilder::new().seal();

    let ctx = RuntimeCtx { viewport: Viewport::default() };
    let outcome = compile(&patch, &block_registry, &registry, 1, ctx);
    assert!(outcome.ok, "combine test patch must compile: {:?}", outcome.errors);
    let ir = outcome.program.expect("ok compile must produce a program");

    let config = RuntimeConfig::builder().viewport(Viewport::default()).seed(1).build();
    let mut state = RuntimeState::new(config);
    let frame = execute_frame_resilient(&ir, &mut state, 0.0);

    match frame.passes.first() {
        Some(PassIR::Instances2D(inst)) => {
            // CircleScene's default baseRadius is 40; undo that scale to
            // recover the bus's effective (pre-baseRadius) value.
            f64::from(inst.transforms[0][0]) / 40.0
        }
        other => panic!("expected a single Instances2D pass, got {other:?}"),
    }
}

#[test]
fn sum_combine_adds_every_enabled_publisher() {
    let radius = radius_from_combine(CombineMode::Sum, 0.2, 0.35, 0.0, 0.0);
    assert!((radius - 0.55).abs() < 1e-6, "expected 0.2 + 0.35 = 0.55, got {radius}");
}

#[test]
fn average_combine_divides_by_publisher_count() {
    let radius = radius_from_combine(CombineMode::Average, 0.2, 0.6, 0.0, 0.0);
    assert!((radius - 0.4).abs() < 1e-6, "expected (0.2 + 0.6) / 2 = 0.4, got {radius}");
}

#[test]
fn last_combine_breaks_sort_key_ties_by_greater_publisher_id() {
    let a_id = make_publisher_id("combine-pub-a");
    let b_id = make_publisher_id("combine-pub-b");
    let expected = if a_id > b_id { 0.1 } else { 0.9 };

    let radius = radius_from_combine(CombineMode::Last, 0.1, 0.9, 0.0, 0.0);
    assert!(
        (radius - expected).abs() < 1e-6,
        "tie must break toward the greater publisher id, expected {expected}, got {radius}"
    );
}

#[test]
fn last_combine_prefers_greater_sort_key_over_id() {
    let radius = radius_from_combine(CombineMode::Last, 0.1, 0.9, 0.0, 1.0);
    assert!((radius - 0.9).abs() < 1e-6, "greater sort_key must win outright, got {radius}");
}
