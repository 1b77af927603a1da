// SPDX-License-Identifier: Apache-2.0
//! The Parameter Resolver (C3): a depth-bounded, cycle-checked evaluator
//! for lens/adapter parameter bindings (spec §4.2).
//!
//! Lens parameters can themselves be bus reads or wire reads, each passed
//! through their own inner transform stack before use — which means
//! resolving one parameter can recursively resolve an entire sub-patch.
//! Spec §9 chose a recursion budget over fix-point iteration: cycles are
//! forbidden outright and depth is capped at [`MAX_DEPTH`], both checked
//! with a `visited` set and a counter, not a lazy fixed-point solver.

use std::collections::HashSet;

use crate::artifact::{Artifact, RuntimeCtx, ScalarValue};
use crate::ident::BlockSlot;
use crate::patch::{DefaultSource, Literal, ParamBinding, TransformStack};
use crate::registry::{Registry, Scope};

/// Maximum recursion depth for parameter binding resolution (spec §4.2).
pub const MAX_DEPTH: u32 = 3;

/// Environment a [`resolve_param`] call needs: ways to read a bus's
/// pre-listener effective value and a wire source's producer artifact,
/// plus the default-source store and the registry used to apply inner
/// transform stacks.
pub struct ResolverEnv<'a> {
    /// The sealed transform registry.
    pub registry: &'a Registry,
    /// Ambient runtime context (viewport, ...), threaded through to any
    /// `apply` closures invoked while resolving.
    pub ctx: RuntimeCtx,
    /// Resolves a bus to its effective artifact (pre-listener-transform).
    pub resolve_bus: &'a dyn Fn(crate::ident::BusId) -> Artifact,
    /// Resolves a wire source slot to its producer block's output
    /// artifact.
    pub resolve_wire: &'a dyn Fn(BlockSlot) -> Artifact,
    /// The patch's default-source store.
    pub default_sources: &'a std::collections::BTreeMap<String, DefaultSource>,
}

fn lift_literal(lit: &Literal) -> ScalarValue {
    match lit {
        Literal::Float(v) => ScalarValue::Float(*v),
        Literal::Int(v) => ScalarValue::Int(*v),
        Literal::Bool(v) => ScalarValue::Bool(*v),
        Literal::String(v) => ScalarValue::String(v.clone()),
        Literal::Vec2(v) => ScalarValue::Vec2(*v),
        Literal::Color(v) => ScalarValue::Color(*v),
    }
}

/// Lifts a [`DefaultSource`] into the matching `Artifact` variant (spec
/// §4.2: "default-source lifting"). A default source always carries a
/// plain literal; lifting to a `Signal` wraps it in a constant closure, and
/// lifting to a `Field` wraps it in a constant-filled closure.
#[must_use]
pub fn lift_default(source: &DefaultSource) -> Artifact {
    use crate::artifact::{ArtifactKind, FieldValue, SignalValue};
    use std::sync::Arc;

    let literal = lift_literal(&source.value);
    match source.lift_to {
        ArtifactKind::ScalarFloat
        | ArtifactKind::ScalarInt
        | ArtifactKind::ScalarBool
        | ArtifactKind::ScalarString
        | ArtifactKind::ScalarVec2
        | ArtifactKind::ScalarColor => Artifact::Scalar(literal),
        ArtifactKind::SignalFloat => {
            let v = as_f64(&literal);
            Artifact::Signal(SignalValue::Float(Arc::new(move |_t, _ctx| v)))
        }
        ArtifactKind::SignalPhase => {
            let v = as_f64(&literal);
            Artifact::Signal(SignalValue::phase(move |_t, _ctx| v))
        }
        ArtifactKind::SignalUnit => {
            let v = as_f64(&literal);
            Artifact::Signal(SignalValue::unit(move |_t, _ctx| v))
        }
        ArtifactKind::SignalTime => {
            let v = as_f64(&literal);
            Artifact::Signal(SignalValue::Time(Arc::new(move |_t, _ctx| v)))
        }
        ArtifactKind::SignalVec2 => {
            let v = as_vec2(&literal);
            Artifact::Signal(SignalValue::Vec2(Arc::new(move |_t, _ctx| v)))
        }
        ArtifactKind::SignalColor => {
            let v = as_color(&literal);
            Artifact::Signal(SignalValue::Color(Arc::new(move |_t, _ctx| v)))
        }
        ArtifactKind::SignalInt => {
            let v = as_i64(&literal);
            Artifact::Signal(SignalValue::Int(Arc::new(move |_t, _ctx| v)))
        }
        ArtifactKind::FieldFloat => {
            let v = as_f64(&literal);
            Artifact::Field(FieldValue::Float(Arc::new(move |_seed, n, _ctx| vec![v; n])))
        }
        ArtifactKind::FieldVec2 => {
            let v = as_vec2(&literal);
            Artifact::Field(FieldValue::Vec2(Arc::new(move |_seed, n, _ctx| vec![v; n])))
        }
        ArtifactKind::FieldColor => {
            let v = as_color(&literal);
            Artifact::Field(FieldValue::Color(Arc::new(move |_seed, n, _ctx| vec![v; n])))
        }
        ArtifactKind::Event | ArtifactKind::RenderTreeProgram | ArtifactKind::Error => {
            Artifact::error(format!("default source cannot lift to {}", source.lift_to))
        }
    }
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
        _ => 0.0,
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

fn as_vec2(v: &ScalarValue) -> crate::math::Vec2 {
    match v {
        ScalarValue::Vec2(v) => *v,
        _ => crate::math::Vec2::ZERO,
    }
}

fn as_color(v: &ScalarValue) -> crate::math::Color {
    match v {
        ScalarValue::Color(c) => *c,
        _ => crate::math::Color::TRANSPARENT,
    }
}

/// Resolves a single parameter binding, recursing into bus/wire bindings'
/// own transform stacks via [`apply_transform_stack`], bounded by
/// [`MAX_DEPTH`] and guarded against cycles via `visited`.
pub fn resolve_param(
    binding: &ParamBinding,
    env: &ResolverEnv<'_>,
    visited: &mut HashSet<String>,
    depth: u32,
) -> Artifact {
    if depth > MAX_DEPTH {
        return Artifact::error("Lens param nesting too deep");
    }
    match binding {
        ParamBinding::Literal(lit) => Artifact::Scalar(lift_literal(lit)),
        ParamBinding::Default(id) => env.default_sources.get(id).map_or_else(
            || Artifact::error(format!("unknown default source: {id}")),
            lift_default,
        ),
        ParamBinding::Bus(bus_id, stack) => {
            let key = format!("bus:{bus_id:?}");
            if !visited.insert(key.clone()) {
                return Artifact::error("Lens param cycle detected");
            }
            let raw = (env.resolve_bus)(*bus_id);
            let result = apply_transform_stack(stack, raw, Scope::LensParam, env, visited, depth + 1);
            visited.remove(&key);
            result
        }
        ParamBinding::Wire(slot, stack) => {
            let key = format!("wire:{:?}:{}", slot.block, slot.slot);
            if !visited.insert(key.clone()) {
                return Artifact::error("Lens param cycle detected");
            }
            let raw = (env.resolve_wire)(*slot);
            let result = apply_transform_stack(stack, raw, Scope::LensParam, env, visited, depth + 1);
            visited.remove(&key);
            result
        }
    }
}

/// Applies an ordered transform stack to `input`, scope-checking each
/// entry against `scope` and resolving its parameters (spec §4.1 "scope
/// restricted", §4.3 "apply each publisher's transform stack in order",
/// §4.4 step 6 "Lens application").
///
/// Disabled entries are skipped. An `Error` produced partway through the
/// stack short-circuits the remaining entries (spec §3, invariant d).
#[must_use]
pub fn apply_transform_stack(
    stack: &TransformStack,
    input: Artifact,
    scope: Scope,
    env: &ResolverEnv<'_>,
    visited: &mut HashSet<String>,
    depth: u32,
) -> Artifact {
    let mut value = input;
    for entry in stack.iter().filter(|e| e.enabled) {
        if value.is_error() {
            return value;
        }
        let Some(def) = env.registry.get(&entry.transform) else {
            return Artifact::error(format!("unknown transform: {}", entry.transform));
        };
        if !def.allowed_scopes.is_empty() && !def.allowed_scopes.contains(&scope) {
            return Artifact::error(format!(
                "transform {} is not allowed in scope {scope:?}",
                entry.transform
            ));
        }
        let mut resolved = crate::registry::ResolvedParams::new();
        let mut param_error = None;
        for (name, binding) in &entry.param_bindings {
            let v = resolve_param(binding, env, visited, depth + 1);
            if v.is_error() && param_error.is_none() {
                param_error = Some(v.clone());
            }
            resolved.insert(name.clone(), v);
        }
        for p in &def.params {
            resolved
                .entry(p.name.clone())
                .or_insert_with(|| Artifact::Scalar(p.default.clone()));
        }
        // A parameter that itself failed to resolve (e.g. a cycle or a
        // depth-bound violation, spec §4.2) short-circuits the transform
        // rather than being silently handed to `apply` (spec §3, invariant
        // d: any operation consuming an `Error` produces an `Error`).
        value = if let Some(err) = param_error {
            err
        } else {
            match &def.apply {
                Some(f) => f(&value, &resolved, &env.ctx),
                None => Artifact::error(format!("transform {} has no apply implementation", entry.transform)),
            }
        };
    }
    value
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ident::make_bus_id;
    use crate::patch::Literal;
    use crate::registry::RegistryBuilder;
    use std::collections::BTreeMap;

    #[test]
    fn literal_binding_resolves_directly() {
        let registry = RegistryBuilder::new().seal();
        let defaults = BTreeMap::new();
        let env = ResolverEnv {
            registry: &registry,
            ctx: RuntimeCtx::default(),
            resolve_bus: &|_| Artifact::error("unused"),
            resolve_wire: &|_| Artifact::error("unused"),
            default_sources: &defaults,
        };
        let mut visited = HashSet::new();
        let out = resolve_param(&ParamBinding::Literal(Literal::Float(4.0)), &env, &mut visited, 0);
        assert_eq!(out, Artifact::Scalar(ScalarValue::Float(4.0)));
    }

    #[test]
    fn depth_exceeded_yields_error() {
        let registry = RegistryBuilder::new().seal();
        let defaults = BTreeMap::new();
        let bus = make_bus_id("loop");
        let env = ResolverEnv {
            registry: &registry,
            ctx: RuntimeCtx::default(),
            resolve_bus: &|_| Artifact::Scalar(ScalarValue::Float(1.0)),
            resolve_wire: &|_| Artifact::error("unused"),
            default_sources: &defaults,
        };
        let mut visited = HashSet::new();
        let out = resolve_param(&ParamBinding::Bus(bus, Vec::new()), &env, &mut visited, MAX_DEPTH + 1);
        assert_eq!(out, Artifact::error("Lens param nesting too deep"));
    }

    #[test]
    fn bus_cycle_is_detected() {
        let registry = RegistryBuilder::new().seal();
        let defaults = BTreeMap::new();
        let bus = make_bus_id("self");
        let env = ResolverEnv {
            registry: &registry,
            ctx: RuntimeCtx::default(),
            resolve_bus: &|_| Artifact::Scalar(ScalarValue::Float(1.0)),
            resolve_wire: &|_| Artifact::error("unused"),
            default_sources: &defaults,
        };
        let mut visited = HashSet::new();
        visited.insert(format!("bus:{bus:?}"));
        let out = resolve_param(&ParamBinding::Bus(bus, Vec::new()), &env, &mut visited, 1);
        assert_eq!(out, Artifact::error("Lens param cycle detected"));
    }
}
