// SPDX-License-Identifier: Apache-2.0
//! Built-in adapters, lenses and block kinds registered by default (spec
//! §4.1, §6 "Transform ID surface").
//!
//! This is the one module in the crate that is not named directly by a
//! component letter in spec §2 — it is the concrete catalog [`registry`]
//! and [`compiler::BlockRegistry`] need populated before a real patch can
//! compile. Grounded in the teacher's pattern of a small, explicit
//! `register_defaults`-style bootstrap function (see `warp-core`'s
//! `engine_impl::default_worker_count` callers) rather than `inventory`-style
//! link-time registration: the spec requires the registry's "enumeration
//! orders ... must be stable" (§4.1), which is easiest to reason about when
//! every registration call site is visible in one place, in one order.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::artifact::{Artifact, ArtifactKind, FieldValue, RuntimeCtx, ScalarValue, SignalValue};
use crate::compiler::{BlockCompileFn, BlockInputSlot, BlockKindDef, BlockOutputSlot, BlockRegistry};
use crate::ident::TransformId;
use crate::math::{self, Color, Vec2};
use crate::patch::BlockTypeId;
use crate::registry::{
    AdapterPolicy, ParamSpec, RegistryBuilder, RegistryError, ResolvedParams, Scope, StabilityHint, TransformDef,
    TransformKind,
};

fn param_f64(params: &ResolvedParams, name: &str, default: f64) -> f64 {
    match params.get(name) {
        Some(Artifact::Scalar(ScalarValue::Float(v))) => *v,
        Some(Artifact::Scalar(ScalarValue::Int(v))) => {
            #[allow(clippy::cast_precision_loss)]
            let v = *v as f64;
            v
        }
        Some(Artifact::Signal(SignalValue::Float(f) | SignalValue::Time(f) | SignalValue::Phase(f) | SignalValue::Unit(f))) => {
            f(0.0, &RuntimeCtx::default())
        }
        _ => default,
    }
}

fn param_string(params: &ResolvedParams, name: &str, default: &str) -> String {
    match params.get(name) {
        Some(Artifact::Scalar(ScalarValue::String(s))) => s.clone(),
        _ => default.to_owned(),
    }
}

/// Applies a pure `f64 -> f64` transform to every numeric/signal/phase/unit
/// shape a lens might see, preserving the input's concrete variant (spec
/// §4.1: a lens "preserves type"). `Scalar:int` and `Signal:int` are passed
/// through unmodified — the float-domain lenses below never declare `int`
/// as their domain, so the registry's domain check keeps them from ever
/// reaching an `int` input in practice; this arm only guards against a
/// malformed patch bypassing that check via a raw `apply` call in a test.
fn map_float_preserving(input: &Artifact, f: impl Fn(f64) -> f64 + Send + Sync + 'static) -> Artifact {
    match input {
        Artifact::Scalar(ScalarValue::Float(v)) => Artifact::Scalar(ScalarValue::Float(f(*v))),
        Artifact::Signal(SignalValue::Float(sig)) => {
            let sig = sig.clone();
            Artifact::Signal(SignalValue::Float(Arc::new(move |t, ctx| f(sig(t, ctx)))))
        }
        Artifact::Signal(SignalValue::Phase(sig)) => {
            let sig = sig.clone();
            Artifact::Signal(SignalValue::phase(move |t, ctx| f(sig(t, ctx))))
        }
        Artifact::Signal(SignalValue::Unit(sig)) => {
            let sig = sig.clone();
            Artifact::Signal(SignalValue::unit(move |t, ctx| f(sig(t, ctx))))
        }
        Artifact::Signal(SignalValue::Time(sig)) => {
            let sig = sig.clone();
            Artifact::Signal(SignalValue::Time(Arc::new(move |t, ctx| f(sig(t, ctx)))))
        }
        Artifact::Field(FieldValue::Float(field)) => {
            let field = field.clone();
            Artifact::Field(FieldValue::Float(Arc::new(move |seed, n, ctx| {
                field(seed, n, ctx).into_iter().map(&f).collect()
            })))
        }
        other => other.clone(),
    }
}

fn lens_param(name: &str, default: f64, ui_hint: &str, range: Option<(f64, f64)>) -> ParamSpec {
    ParamSpec {
        name: name.to_owned(),
        kind: ArtifactKind::ScalarFloat,
        default: ScalarValue::Float(default),
        ui_hint: Some(ui_hint.to_owned()),
        range_hint: range,
    }
}

const ALL_SCOPES: [Scope; 4] = [Scope::Wire, Scope::Publisher, Scope::Listener, Scope::LensParam];
const LISTENER_ONLY: [Scope; 1] = [Scope::Listener];

fn scale_lens() -> TransformDef {
    TransformDef {
        id: TransformId::new("scale"),
        kind: TransformKind::Lens,
        input_type: None,
        output_type: None,
        explicit_type: false,
        domain: Some(ArtifactKind::ScalarFloat),
        allowed_scopes: ALL_SCOPES.to_vec(),
        params: vec![lens_param("factor", 1.0, "slider", Some((-10.0, 10.0)))],
        cost_hint: Some(0.1),
        stability_hint: Some(StabilityHint::ScrubSafe),
        policy: None,
        cost: None,
        apply: Some(Arc::new(|input, params, _ctx| {
            let k = param_f64(params, "factor", 1.0);
            Artifact::absorb_errors([input], || map_float_preserving(input, move |v| v * k))
        })),
        compile_to_ir: None,
    }
}

fn clamp_lens() -> TransformDef {
    TransformDef {
        id: TransformId::new("clamp"),
        kind: TransformKind::Lens,
        input_type: None,
        output_type: None,
        explicit_type: false,
        domain: Some(ArtifactKind::ScalarFloat),
        allowed_scopes: ALL_SCOPES.to_vec(),
        params: vec![
            lens_param("min", 0.0, "slider", None),
            lens_param("max", 1.0, "slider", None),
        ],
        cost_hint: Some(0.1),
        stability_hint: Some(StabilityHint::ScrubSafe),
        policy: None,
        cost: None,
        apply: Some(Arc::new(|input, params, _ctx| {
            let lo = param_f64(params, "min", 0.0);
            let hi = param_f64(params, "max", 1.0);
            Artifact::absorb_errors([input], || map_float_preserving(input, move |v| math::clamp(v, lo, hi)))
        })),
        compile_to_ir: None,
    }
}

/// `ease` (spec §4.3: listener-scope-restricted; it must see the
/// post-combine value). Implements the standard quad in/out/in-out family
/// by name rather than a curve asset, matching the spec's "uiHint, opaque
/// to the core" framing for anything heavier.
fn ease_lens() -> TransformDef {
    TransformDef {
        id: TransformId::new("ease"),
        kind: TransformKind::Lens,
        input_type: None,
        output_type: None,
        explicit_type: false,
        domain: Some(ArtifactKind::ScalarFloat),
        allowed_scopes: LISTENER_ONLY.to_vec(),
        params: vec![ParamSpec {
            name: "mode".to_owned(),
            kind: ArtifactKind::ScalarString,
            default: ScalarValue::String("inOutQuad".to_owned()),
            ui_hint: Some("dropdown".to_owned()),
            range_hint: None,
        }],
        cost_hint: Some(0.2),
        stability_hint: Some(StabilityHint::ScrubSafe),
        policy: None,
        cost: None,
        apply: Some(Arc::new(|input, params, _ctx| {
            let mode = param_string(params, "mode", "inOutQuad");
            Artifact::absorb_errors([input], || map_float_preserving(input, move |v| ease_curve(&mode, v)))
        })),
        compile_to_ir: None,
    }
}

fn ease_curve(mode: &str, t: f64) -> f64 {
    let t = math::clamp01(t);
    match mode {
        "inQuad" => t * t,
        "outQuad" => t * (2.0 - t),
        "inCubic" => t * t * t,
        "outCubic" => {
            let u = 1.0 - t;
            1.0 - u * u * u
        }
        // inOutQuad, and the fallback for any unrecognized mode name.
        _ => {
            if t < 0.5 {
                2.0 * t * t
            } else {
                let u = -2.0 * t + 2.0;
                1.0 - u * u / 2.0
            }
        }
    }
}

/// `mapRange` (spec §4.3: listener-scope-restricted for the same reason as
/// `ease`).
fn map_range_lens() -> TransformDef {
    TransformDef {
        id: TransformId::new("mapRange"),
        kind: TransformKind::Lens,
        input_type: None,
        output_type: None,
        explicit_type: false,
        domain: Some(ArtifactKind::ScalarFloat),
        allowed_scopes: LISTENER_ONLY.to_vec(),
        params: vec![
            lens_param("inMin", 0.0, "number", None),
            lens_param("inMax", 1.0, "number", None),
            lens_param("outMin", 0.0, "number", None),
            lens_param("outMax", 1.0, "number", None),
        ],
        cost_hint: Some(0.1),
        stability_hint: Some(StabilityHint::ScrubSafe),
        policy: None,
        cost: None,
        apply: Some(Arc::new(|input, params, _ctx| {
            let in_min = param_f64(params, "inMin", 0.0);
            let in_max = param_f64(params, "inMax", 1.0);
            let out_min = param_f64(params, "outMin", 0.0);
            let out_max = param_f64(params, "outMax", 1.0);
            Artifact::absorb_errors([input], || {
                map_float_preserving(input, move |v| {
                    let span = in_max - in_min;
                    let unit = if span.abs() < f64::EPSILON { 0.0 } else { (v - in_min) / span };
                    math::lerp(out_min, out_max, unit)
                })
            })
        })),
        compile_to_ir: None,
    }
}

/// `phaseOffset` (spec §6: the canonical spelling of legacy `PhaseOffset`).
/// Domain `phase`: shifts a `[0, 1)`-wrapped signal by a fractional offset,
/// re-wrapping the result.
fn phase_offset_lens() -> TransformDef {
    TransformDef {
        id: TransformId::new("phaseOffset"),
        kind: TransformKind::Lens,
        input_type: None,
        output_type: None,
        explicit_type: false,
        domain: Some(ArtifactKind::SignalPhase),
        allowed_scopes: ALL_SCOPES.to_vec(),
        params: vec![lens_param("offset", 0.0, "slider", Some((0.0, 1.0)))],
        cost_hint: Some(0.1),
        stability_hint: Some(StabilityHint::ScrubSafe),
        policy: None,
        cost: None,
        apply: Some(Arc::new(|input, params, _ctx| {
            let offset = param_f64(params, "offset", 0.0);
            Artifact::absorb_errors([input], || map_float_preserving(input, move |v| math::wrap01(v + offset)))
        })),
        compile_to_ir: None,
    }
}

/// `pingPong` (spec §8's oscillation family): folds a monotonically
/// increasing `[0, 1)` phase into a triangular `0 -> 1 -> 0` sweep.
fn ping_pong_lens() -> TransformDef {
    TransformDef {
        id: TransformId::new("pingPong"),
        kind: TransformKind::Lens,
        input_type: None,
        output_type: None,
        explicit_type: false,
        domain: Some(ArtifactKind::ScalarFloat),
        allowed_scopes: ALL_SCOPES.to_vec(),
        params: Vec::new(),
        cost_hint: Some(0.1),
        stability_hint: Some(StabilityHint::ScrubSafe),
        policy: None,
        cost: None,
        apply: Some(Arc::new(|input, _params, _ctx| {
            Artifact::absorb_errors([input], || {
                map_float_preserving(input, |v| {
                    let folded = math::wrap01(v * 0.5) * 2.0;
                    if folded > 1.0 {
                        2.0 - folded
                    } else {
                        folded
                    }
                })
            })
        })),
        compile_to_ir: None,
    }
}

/// `polarity` (spec §6's `Polarity` legacy id, lowercased). Flips sign;
/// the simplest possible "explicit type flagged" demonstration since it
/// could equally be read as domain `vec2` or `color`, but here is
/// registered once over `float`, matching what the alias table needs.
fn polarity_lens() -> TransformDef {
    TransformDef {
        id: TransformId::new("polarity"),
        kind: TransformKind::Lens,
        input_type: None,
        output_type: None,
        explicit_type: false,
        domain: Some(ArtifactKind::ScalarFloat),
        allowed_scopes: ALL_SCOPES.to_vec(),
        params: Vec::new(),
        cost_hint: Some(0.05),
        stability_hint: Some(StabilityHint::Either),
        policy: None,
        cost: None,
        apply: Some(Arc::new(|input, _params, _ctx| {
            Artifact::absorb_errors([input], || map_float_preserving(input, |v| -v))
        })),
        compile_to_ir: None,
    }
}

/// `hysteresis` (spec §4.3: listener-scope-restricted). Domain `Unit`; a
/// two-threshold Schmitt trigger that latches high at `onThreshold` and
/// only drops back to low at `offThreshold`, so a value oscillating
/// between the two thresholds does not chatter. The latch is per-signal
/// state (an `AtomicBool` closed over by the returned closure), which is
/// why this lens is `TransportOnly`: scrubbing time backward replays the
/// same latch instead of the value that was actually live at that `t`.
fn hysteresis_lens() -> TransformDef {
    TransformDef {
        id: TransformId::new("hysteresis"),
        kind: TransformKind::Lens,
        input_type: None,
        output_type: None,
        explicit_type: false,
        domain: Some(ArtifactKind::SignalUnit),
        allowed_scopes: LISTENER_ONLY.to_vec(),
        params: vec![
            lens_param("onThreshold", 0.6, "slider", Some((0.0, 1.0))),
            lens_param("offThreshold", 0.4, "slider", Some((0.0, 1.0))),
        ],
        cost_hint: Some(0.1),
        stability_hint: Some(StabilityHint::TransportOnly),
        policy: None,
        cost: None,
        apply: Some(Arc::new(|input, params, _ctx| {
            let on = param_f64(params, "onThreshold", 0.6);
            let off = param_f64(params, "offThreshold", 0.4);
            Artifact::absorb_errors([input], || {
                let latch = Arc::new(std::sync::atomic::AtomicBool::new(false));
                map_float_preserving(input, move |v| {
                    use std::sync::atomic::Ordering;
                    if v >= on {
                        latch.store(true, Ordering::Relaxed);
                    } else if v <= off {
                        latch.store(false, Ordering::Relaxed);
                    }
                    f64::from(u8::from(latch.load(Ordering::Relaxed)))
                })
            })
        })),
        compile_to_ir: None,
    }
}

fn scalar_to_signal_adapter(id: &str, kind: ArtifactKind, lift: impl Fn(&ScalarValue) -> Artifact + Send + Sync + 'static) -> TransformDef {
    TransformDef {
        id: TransformId::new(id),
        kind: TransformKind::Adapter,
        input_type: Some(match kind {
            ArtifactKind::SignalFloat | ArtifactKind::SignalPhase | ArtifactKind::SignalUnit | ArtifactKind::SignalTime => {
                ArtifactKind::ScalarFloat
            }
            ArtifactKind::SignalInt => ArtifactKind::ScalarInt,
            ArtifactKind::SignalVec2 => ArtifactKind::ScalarVec2,
            ArtifactKind::SignalColor => ArtifactKind::ScalarColor,
            other => other,
        }),
        output_type: Some(kind),
        explicit_type: false,
        domain: None,
        allowed_scopes: Vec::new(),
        params: Vec::new(),
        cost_hint: None,
        stability_hint: None,
        policy: Some(AdapterPolicy::Auto),
        cost: Some(0.0),
        apply: Some(Arc::new(move |input, _params, _ctx| match input {
            Artifact::Scalar(s) => lift(s),
            Artifact::Error(_) => input.clone(),
            _ => Artifact::error("scalar adapter received a non-scalar input"),
        })),
        compile_to_ir: None,
    }
}

fn scalar_float_to_field_adapter() -> TransformDef {
    TransformDef {
        id: TransformId::new("scalarFloatToFieldFloat"),
        kind: TransformKind::Adapter,
        input_type: Some(ArtifactKind::ScalarFloat),
        output_type: Some(ArtifactKind::FieldFloat),
        explicit_type: false,
        domain: None,
        allowed_scopes: Vec::new(),
        params: Vec::new(),
        cost_hint: None,
        stability_hint: None,
        policy: Some(AdapterPolicy::Auto),
        cost: Some(0.5),
        apply: Some(Arc::new(|input, _params, _ctx| match input {
            Artifact::Scalar(ScalarValue::Float(v)) => {
                let v = *v;
                Artifact::Field(FieldValue::Float(Arc::new(move |_seed, n, _ctx| vec![v; n])))
            }
            Artifact::Error(_) => input.clone(),
            _ => Artifact::error("scalarFloatToFieldFloat received a non-float scalar"),
        })),
        compile_to_ir: None,
    }
}

fn signal_unit_to_signal_float_adapter() -> TransformDef {
    TransformDef {
        id: TransformId::new("signalUnitToSignalFloat"),
        kind: TransformKind::Adapter,
        input_type: Some(ArtifactKind::SignalUnit),
        output_type: Some(ArtifactKind::SignalFloat),
        explicit_type: false,
        domain: None,
        allowed_scopes: Vec::new(),
        params: Vec::new(),
        cost_hint: None,
        stability_hint: None,
        policy: Some(AdapterPolicy::Auto),
        cost: Some(0.0),
        apply: Some(Arc::new(|input, _params, _ctx| match input {
            Artifact::Signal(SignalValue::Unit(f)) => Artifact::Signal(SignalValue::Float(f.clone())),
            Artifact::Error(_) => input.clone(),
            _ => Artifact::error("signalUnitToSignalFloat received an unexpected input"),
        })),
        compile_to_ir: None,
    }
}

fn signal_phase_to_signal_float_adapter() -> TransformDef {
    TransformDef {
        id: TransformId::new("signalPhaseToSignalFloat"),
        kind: TransformKind::Adapter,
        input_type: Some(ArtifactKind::SignalPhase),
        output_type: Some(ArtifactKind::SignalFloat),
        explicit_type: false,
        domain: None,
        allowed_scopes: Vec::new(),
        params: Vec::new(),
        cost_hint: None,
        stability_hint: None,
        policy: Some(AdapterPolicy::Auto),
        cost: Some(0.0),
        apply: Some(Arc::new(|input, _params, _ctx| match input {
            Artifact::Signal(SignalValue::Phase(f)) => Artifact::Signal(SignalValue::Float(f.clone())),
            Artifact::Error(_) => input.clone(),
            _ => Artifact::error("signalPhaseToSignalFloat received an unexpected input"),
        })),
        compile_to_ir: None,
    }
}

/// Registers every built-in adapter and lens, plus the legacy alias table
/// (spec §6: "Legacy PascalCase IDs ... resolve through the alias table").
///
/// # Errors
/// Propagates any [`RegistryError`] a registration or alias call produces;
/// since every id and alias target here is a compile-time constant, a
/// failure indicates a bug in this function, not in caller input.
pub fn register_defaults(builder: &mut RegistryBuilder) -> Result<(), RegistryError> {
    builder.register(scale_lens())?;
    builder.register(clamp_lens())?;
    builder.register(ease_lens())?;
    builder.register(map_range_lens())?;
    builder.register(phase_offset_lens())?;
    builder.register(ping_pong_lens())?;
    builder.register(polarity_lens())?;
    builder.register(hysteresis_lens())?;

    builder.register(scalar_to_signal_adapter("scalarFloatToSignalFloat", ArtifactKind::SignalFloat, |s| {
        Artifact::Signal(SignalValue::Float(Arc::new({
            let v = as_f64(s);
            move |_t, _ctx| v
        })))
    }))?;
    builder.register(scalar_to_signal_adapter("scalarIntToSignalInt", ArtifactKind::SignalInt, |s| {
        let v = as_i64(s);
        Artifact::Signal(SignalValue::Int(Arc::new(move |_t, _ctx| v)))
    }))?;
    builder.register(scalar_to_signal_adapter("scalarVec2ToSignalVec2", ArtifactKind::SignalVec2, |s| {
        let v = as_vec2(s);
        Artifact::Signal(SignalValue::Vec2(Arc::new(move |_t, _ctx| v)))
    }))?;
    builder.register(scalar_to_signal_adapter("scalarColorToSignalColor", ArtifactKind::SignalColor, |s| {
        let v = as_color(s);
        Artifact::Signal(SignalValue::Color(Arc::new(move |_t, _ctx| v)))
    }))?;
    builder.register(scalar_float_to_field_adapter())?;
    builder.register(signal_unit_to_signal_float_adapter())?;
    builder.register(signal_phase_to_signal_float_adapter())?;

    builder.alias(TransformId::new("PhaseOffset"), TransformId::new("phaseOffset"))?;
    builder.alias(TransformId::new("Polarity"), TransformId::new("polarity"))?;
    builder.alias(TransformId::new("PingPong"), TransformId::new("pingPong"))?;
    builder.alias(TransformId::new("MapRange"), TransformId::new("mapRange"))?;
    builder.alias(TransformId::new("Hysteresis"), TransformId::new("hysteresis"))?;
    builder.alias(TransformId::new("Ease"), TransformId::new("ease"))?;
    builder.alias(TransformId::new("Scale"), TransformId::new("scale"))?;
    builder.alias(TransformId::new("Clamp"), TransformId::new("clamp"))?;
    Ok(())
}

fn as_f64(v: &ScalarValue) -> f64 {
    match v {
        ScalarValue::Float(f) => *f,
        ScalarValue::Int(i) => {
            #[allow(clippy::cast_precision_loss)]
            let f = *i as f64;
            f
        }
        ScalarValue::Bool(b) => f64::from(u8::from(*b)),
        ScalarValue::Vec2(_) | ScalarValue::Color(_) | ScalarValue::String(_) => 0.0,
    }
}

fn as_i64(v: &ScalarValue) -> i64 {
    match v {
        ScalarValue::Int(i) => *i,
        #[allow(clippy::cast_possible_truncation)]
        ScalarValue::Float(f) => *f as i64,
        _ => 0,
    }
}

fn as_vec2(v: &ScalarValue) -> Vec2 {
    match v {
        ScalarValue::Vec2(v) => *v,
        _ => Vec2::ZERO,
    }
}

fn as_color(v: &ScalarValue) -> Color {
    match v {
        ScalarValue::Color(c) => *c,
        _ => Color::TRANSPARENT,
    }
}

/// Canonical `TimeRoot` block type id (spec §4.4 step 1).
pub const TIME_ROOT: &str = "TimeRoot";
/// `Circle2D` demo block, emitting a single-instance circle pass driven by
/// its inputs, wrapped directly into a `RenderTreeProgram` so it can sit at
/// a patch's sink (spec §4.4 step 7: "the terminal output slot must be
/// `RenderTreeProgram`").
pub const CIRCLE_SCENE: &str = "CircleScene";

fn time_root_compile(cycle_length: f64) -> Vec<Artifact> {
    let system_time = Artifact::Signal(SignalValue::Time(Arc::new(|t, _ctx| t)));
    let cycle_t = Artifact::Signal(SignalValue::Float(Arc::new(move |t, _ctx| t.rem_euclid(cycle_length.max(f64::EPSILON)))));
    let phase = Artifact::Signal(SignalValue::phase(move |t, _ctx| t / cycle_length.max(f64::EPSILON)));
    let wrap = Artifact::Signal(SignalValue::unit(move |t, _ctx| (t / cycle_length.max(f64::EPSILON)).fract().abs()));
    #[allow(clippy::cast_possible_truncation)]
    let cycle_index = Artifact::Signal(SignalValue::Int(Arc::new(move |t, _ctx| (t / cycle_length.max(f64::EPSILON)).floor() as i64)));
    let energy = Artifact::Signal(SignalValue::Float(Arc::new(move |t, _ctx| {
        let p = math::wrap01(t / cycle_length.max(f64::EPSILON));
        1.0 - (p - 0.5).abs() * 2.0
    })));
    vec![system_time, cycle_t, phase, wrap, cycle_index, energy]
}

/// Builds the default `TimeRoot` block kind (spec §4.4 step 1: "canonical
/// signals (`systemTime`, `cycleT`, `phase`, `wrap`, `cycleIndex`,
/// `energy`)"). Output slot order is load-bearing: [`crate::compiler`]'s
/// synthesized `TimeRoot` hardcodes these indices when auto-publishing to
/// the canonical buses.
#[must_use]
pub fn time_root_kind() -> BlockKindDef {
    let compile: BlockCompileFn = Arc::new(|_inputs, params, _ctx| {
        let cycle_length = param_f64(params, "cycleLength", 1000.0).max(f64::EPSILON);
        time_root_compile(cycle_length)
    });
    BlockKindDef {
        id: BlockTypeId::new(TIME_ROOT),
        inputs: Vec::new(),
        outputs: vec![
            BlockOutputSlot { name: "systemTime".to_owned(), kind: ArtifactKind::SignalTime },
            BlockOutputSlot { name: "cycleT".to_owned(), kind: ArtifactKind::SignalFloat },
            BlockOutputSlot { name: "phase".to_owned(), kind: ArtifactKind::SignalPhase },
            BlockOutputSlot { name: "wrap".to_owned(), kind: ArtifactKind::SignalUnit },
            BlockOutputSlot { name: "cycleIndex".to_owned(), kind: ArtifactKind::SignalInt },
            BlockOutputSlot { name: "energy".to_owned(), kind: ArtifactKind::SignalFloat },
        ],
        compile,
    }
}

/// Builds the `CircleScene` demo sink block kind: takes a phase-driven
/// radius and a color and produces a one-instance `RenderTreeProgram`
/// (spec §6's `instances2d` pass shape).
#[must_use]
pub fn circle_scene_kind() -> BlockKindDef {
    let compile: BlockCompileFn = Arc::new(|inputs, params, _ctx| {
        let radius_sig = match inputs.get("radius") {
            Some(Artifact::Signal(SignalValue::Float(f) | SignalValue::Unit(f) | SignalValue::Phase(f) | SignalValue::Time(f))) => f.clone(),
            _ => Arc::new(|_t, _ctx| 0.5_f64),
        };
        let base_radius = param_f64(params, "baseRadius", 40.0);
        let color = match inputs.get("color") {
            Some(Artifact::Scalar(ScalarValue::Color(c))) => *c,
            Some(Artifact::Signal(SignalValue::Color(f))) => f(0.0, &RuntimeCtx::default()),
            _ => Color::from_argb(255, 255, 255, 255),
        };

        let signal: Arc<dyn Fn(f64, &RuntimeCtx) -> crate::render::RenderTree + Send + Sync> = Arc::new(move |t, ctx| {
            let r = base_radius * radius_sig(t, ctx).max(0.0);
            #[allow(clippy::cast_possible_truncation)]
            let transform: crate::render::Affine2D = [r as f32, 0.0, 0.0, r as f32, 0.0, 0.0];
            vec![crate::render::RenderNode::Instances2D(crate::render::Instances2D {
                header: crate::render::PassHeader { z: 0, enabled: true },
                transforms: vec![transform],
                colors: vec![color],
                glyph: crate::render::Glyph2D::Circle,
                material: crate::render::Material::Solid(color),
            })]
        });
        let event: Arc<dyn Fn(f64, f64) -> Vec<String> + Send + Sync> = Arc::new(|_t, _last_t| Vec::new());
        vec![Artifact::RenderTreeProgram(crate::artifact::RenderTreeProgramValue { signal, event })]
    });
    BlockKindDef {
        id: BlockTypeId::new(CIRCLE_SCENE),
        inputs: vec![
            BlockInputSlot { name: "radius".to_owned(), expected: ArtifactKind::SignalFloat },
            BlockInputSlot { name: "color".to_owned(), expected: ArtifactKind::ScalarColor },
        ],
        outputs: vec![BlockOutputSlot { name: "program".to_owned(), kind: ArtifactKind::RenderTreeProgram }],
        compile,
    }
}

/// `ExtrudeMesh` block id: a parameter-only, output-less block whose sole
/// effect is an entry in the IR's `meshes` index table (spec §3: "`meshes`
/// ... index tables", §6 "Extrude recipe"). It produces no `Artifact`
/// because `Artifact` is a closed sum type with no mesh variant (spec §3);
/// [`try_build_mesh_descriptor`] is the side channel the graph compiler
/// calls once per block to populate the mesh table, the same way it
/// special-cases `TimeRoot` synthesis rather than routing it through a
/// generic mechanism.
pub const EXTRUDE_MESH: &str = "ExtrudeMesh";

fn extrude_mesh_kind() -> BlockKindDef {
    let compile: BlockCompileFn = Arc::new(|_inputs, _params, _ctx| Vec::new());
    BlockKindDef {
        id: BlockTypeId::new(EXTRUDE_MESH),
        inputs: Vec::new(),
        outputs: Vec::new(),
        compile,
    }
}

fn cap_from_param(s: &str) -> crate::mesh::Cap {
    match s {
        "front" => crate::mesh::Cap::Front,
        "back" => crate::mesh::Cap::Back,
        "none" => crate::mesh::Cap::None,
        _ => crate::mesh::Cap::Both,
    }
}

fn profile_from_params(params: &ResolvedParams) -> crate::mesh::Profile {
    match param_string(params, "profile", "circle").as_str() {
        "ngon" => crate::mesh::Profile::Ngon {
            #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
            sides: param_f64(params, "sides", 6.0) as u32,
            r: param_f64(params, "r", 1.0),
        },
        _ => crate::mesh::Profile::Circle {
            r: param_f64(params, "r", 1.0),
            #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
            segs: param_f64(params, "segs", 16.0) as u32,
        },
    }
}

fn extrude_from_params(params: &ResolvedParams) -> crate::mesh::Extrude {
    let depth = param_f64(params, "depth", 1.0);
    if param_string(params, "extrude", "linear") == "rounded" {
        crate::mesh::Extrude::Rounded {
            depth,
            #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
            round_segs: param_f64(params, "roundSegs", 4.0) as u32,
            r: param_f64(params, "roundR", 0.1),
        }
    } else {
        crate::mesh::Extrude::Linear {
            depth,
            cap: cap_from_param(&param_string(params, "cap", "both")),
        }
    }
}

/// Builds a [`crate::ir::MeshDescriptor`] for `block` if `block_type` is
/// [`EXTRUDE_MESH`], reading its extrude recipe from `params`. Returns
/// `None` for every other block type so the graph compiler can call this
/// unconditionally once per compiled block.
///
/// # Errors
/// Returns the [`crate::mesh::MeshError`] from [`crate::mesh::extrude`] if
/// the declared recipe is degenerate or overflows a declared `u16` index
/// buffer.
#[must_use]
pub fn try_build_mesh_descriptor(
    block_type: &BlockTypeId,
    block: crate::ident::BlockId,
    params: &ResolvedParams,
) -> Option<Result<crate::ir::MeshDescriptor, crate::mesh::MeshError>> {
    if block_type.as_str() != EXTRUDE_MESH {
        return None;
    }
    let recipe = crate::mesh::ExtrudeRecipe {
        profile: profile_from_params(params),
        extrude: extrude_from_params(params),
    };
    let declared = match param_string(params, "indexType", "auto").as_str() {
        "u16" => Some(crate::mesh::IndexType::U16),
        "u32" => Some(crate::mesh::IndexType::U32),
        _ => None,
    };
    Some(crate::mesh::extrude(&recipe, declared).map(|buffers| crate::ir::MeshDescriptor {
        id: block,
        buffers: Arc::new(buffers),
    }))
}

/// Registers every built-in block kind (`TimeRoot`, `CircleScene`,
/// `ExtrudeMesh`).
pub fn register_block_kinds(registry: &mut BlockRegistry) {
    registry.register(time_root_kind());
    registry.register(circle_scene_kind());
    registry.register(extrude_mesh_kind());
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::RegistryBuilder;

    #[test]
    fn defaults_register_without_error() {
        let mut builder = RegistryBuilder::new();
        register_defaults(&mut builder).expect("built-in transforms must register cleanly");
        let registry = builder.seal();
        assert!(registry.get(&TransformId::new("scale")).is_some());
        assert!(registry.get(&TransformId::new("Scale")).is_some());
    }

    #[test]
    fn legacy_alias_resolves_to_canonical_def() {
        let mut builder = RegistryBuilder::new();
        register_defaults(&mut builder).expect("built-ins register");
        let registry = builder.seal();
        let legacy = registry.get(&TransformId::new("PhaseOffset")).unwrap();
        let canonical = registry.get(&TransformId::new("phaseOffset")).unwrap();
        assert_eq!(legacy.id, canonical.id);
    }

    #[test]
    fn scale_lens_multiplies_scalar_float() {
        let mut builder = RegistryBuilder::new();
        register_defaults(&mut builder).expect("built-ins register");
        let registry = builder.seal();
        let def = registry.get(&TransformId::new("scale")).unwrap();
        let mut params = ResolvedParams::new();
        params.insert("factor".to_owned(), Artifact::Scalar(ScalarValue::Float(3.0)));
        let out = (def.apply.as_ref().unwrap())(&Artifact::Scalar(ScalarValue::Float(2.0)), &params, &RuntimeCtx::default());
        assert_eq!(out, Artifact::Scalar(ScalarValue::Float(6.0)));
    }

    #[test]
    fn phase_offset_rewraps_into_unit_interval() {
        let mut builder = RegistryBuilder::new();
        register_defaults(&mut builder).expect("built-ins register");
        let registry = builder.seal();
        let def = registry.get(&TransformId::new("phaseOffset")).unwrap();
        let mut params = ResolvedParams::new();
        params.insert("offset".to_owned(), Artifact::Scalar(ScalarValue::Float(0.25)));
        let input = Artifact::Signal(SignalValue::phase(|_t, _ctx| 0.9));
        let out = (def.apply.as_ref().unwrap())(&input, &params, &RuntimeCtx::default());
        let Artifact::Signal(SignalValue::Phase(f)) = out else {
            unreachable!("phaseOffset must preserve the Phase variant")
        };
        let v = f(0.0, &RuntimeCtx::default());
        assert!((0.0..1.0).contains(&v));
        assert!((v - 0.15).abs() < 1e-9);
    }

    #[test]
    fn error_input_short_circuits_every_lens() {
        let mut builder = RegistryBuilder::new();
        register_defaults(&mut builder).expect("built-ins register");
        let registry = builder.seal();
        let def = registry.get(&TransformId::new("clamp")).unwrap();
        let err = Artifact::error("upstream failure");
        let out = (def.apply.as_ref().unwrap())(&err, &ResolvedParams::new(), &RuntimeCtx::default());
        assert_eq!(out, err);
    }

    #[test]
    fn time_root_phase_output_stays_in_unit_interval() {
        let kind = time_root_kind();
        let outs = (kind.compile)(&BTreeMap::new(), &BTreeMap::new(), &RuntimeCtx::default());
        let Artifact::Signal(SignalValue::Phase(phase)) = &outs[2] else {
            unreachable!("slot 2 must be the phase output")
        };
        for t in [-500.0, 0.0, 1234.5, 999_999.0] {
            let v = phase(t, &RuntimeCtx::default());
            assert!((0.0..1.0).contains(&v), "phase({t}) = {v} escaped [0, 1)");
        }
    }

    #[test]
    fn circle_scene_compiles_to_a_single_instance() {
        let kind = circle_scene_kind();
        let mut inputs = BTreeMap::new();
        inputs.insert("radius".to_owned(), Artifact::Signal(SignalValue::Float(Arc::new(|_t, _ctx| 1.0))));
        inputs.insert("color".to_owned(), Artifact::Scalar(ScalarValue::Color(Color::BLACK)));
        let outs = (kind.compile)(&inputs, &BTreeMap::new(), &RuntimeCtx::default());
        let Artifact::RenderTreeProgram(program) = &outs[0] else {
            unreachable!("CircleScene must produce a RenderTreeProgram")
        };
        let tree = (program.signal)(0.0, &RuntimeCtx::default());
        assert_eq!(tree.len(), 1);
    }
}
