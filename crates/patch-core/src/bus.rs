// SPDX-License-Identifier: Apache-2.0
//! The Bus Compiler (C4): normalizes publishers into a single *effective
//! artifact* per bus (spec §4.3).
//!
//! Grounded in the teacher's [`MaterializationBus`]-style design (see
//! `materialization/bus.rs`): deterministic, order-independent collection
//! (here, publishers are gathered then sorted by an explicit key rather
//! than relying on insertion order) with policy-driven finalization. The
//! teacher reduces byte blobs by channel policy; here we reduce typed
//! [`Artifact`] values by [`CombineMode`].

use std::collections::HashSet;

use crate::artifact::{Artifact, FieldValue, RuntimeCtx, ScalarValue, SignalValue};
use crate::math::{Color, Vec2};
use crate::patch::{Bus, CombineMode, DefaultSource, Publisher};
use crate::registry::Scope;
use crate::resolver::{apply_transform_stack, lift_default, ResolverEnv};

/// Computes a bus's effective artifact from its currently-enabled
/// publishers (spec §4.3).
///
/// `publishers` must already be filtered to `enabled == true` (see
/// [`crate::patch::Patch::enabled_publishers`]); this function does not
/// re-check `enabled` so that callers can reuse an already-filtered,
/// already-sorted slice across repeated invalidation checks.
#[must_use]
pub fn effective_value(bus: &Bus, publishers: &[&Publisher], env: &ResolverEnv<'_>) -> Artifact {
    if publishers.is_empty() {
        // Invariant I3: an empty publisher set always yields the default,
        // never an error.
        return lift_default(&DefaultSource {
            lift_to: bus.value_type,
            value: bus.default_value.clone(),
        });
    }

    let mut per_publisher = Vec::with_capacity(publishers.len());
    for publisher in publishers {
        let raw = (env.resolve_wire)(publisher.source);
        let mut visited = HashSet::new();
        let value = apply_transform_stack(&publisher.stack, raw, Scope::Publisher, env, &mut visited, 0);
        per_publisher.push((*publisher, value));
    }

    if let Some((_, first_err)) = per_publisher.iter().find(|(_, v)| v.is_error()) {
        // Invariant I2: combining an Error publisher with anything yields
        // that Error. We report the first one found in publisher order,
        // matching Artifact's general left-to-right absorption rule.
        return first_err.clone();
    }

    match bus.combine_mode {
        CombineMode::Last => combine_last(&per_publisher),
        CombineMode::Sum => combine_reduce(&per_publisher, Reduce::Sum),
        CombineMode::Average => combine_reduce(&per_publisher, Reduce::Average),
        CombineMode::Min => combine_reduce(&per_publisher, Reduce::Min),
        CombineMode::Max => combine_reduce(&per_publisher, Reduce::Max),
    }
}

/// Applies a listener's transform stack to a bus's already-combined
/// effective value (spec §4.3: "Listener lenses see the *post-combine*
/// value").
#[must_use]
pub fn apply_listener_stack(
    stack: &crate::patch::TransformStack,
    effective: Artifact,
    env: &ResolverEnv<'_>,
) -> Artifact {
    let mut visited = HashSet::new();
    apply_transform_stack(stack, effective, Scope::Listener, env, &mut visited, 0)
}

/// `last` combine mode: the publisher with the greatest `sortKey` wins;
/// ties break by the greater lexicographic publisher id (spec §4.3;
/// invariant I1; §8 testable property 5).
fn combine_last(items: &[(&Publisher, Artifact)]) -> Artifact {
    items
        .iter()
        .max_by(|(a, _), (b, _)| a.sort_key.total_cmp(&b.sort_key).then_with(|| a.id.cmp(&b.id)))
        .map_or_else(|| Artifact::error("empty publisher set in combine_last"), |(_, v)| v.clone())
}

#[derive(Clone, Copy)]
enum Reduce {
    Sum,
    Average,
    Min,
    Max,
}

impl Reduce {
    fn f64(self, values: impl Iterator<Item = f64>) -> f64 {
        let values: Vec<f64> = values.collect();
        let n = values.len();
        match self {
            Self::Sum => values.iter().sum(),
            Self::Average => {
                if n == 0 {
                    0.0
                } else {
                    values.iter().sum::<f64>() / n as f64
                }
            }
            Self::Min => values.iter().copied().fold(f64::INFINITY, f64::min),
            Self::Max => values.iter().copied().fold(f64::NEG_INFINITY, f64::max),
        }
    }

    fn vec2(self, values: impl Iterator<Item = Vec2>) -> Vec2 {
        let values: Vec<Vec2> = values.collect();
        match self {
            Self::Sum => values.iter().fold(Vec2::ZERO, |acc, v| acc.add(*v)),
            Self::Average => {
                let n = values.len();
                if n == 0 {
                    Vec2::ZERO
                } else {
                    values.iter().fold(Vec2::ZERO, |acc, v| acc.add(*v)).scale(1.0 / n as f64)
                }
            }
            Self::Min => values
                .iter()
                .copied()
                .reduce(|a, b| a.min(b))
                .unwrap_or(Vec2::ZERO),
            Self::Max => values
                .iter()
                .copied()
                .reduce(|a, b| a.max(b))
                .unwrap_or(Vec2::ZERO),
        }
    }

    fn color(self, values: impl Iterator<Item = Color>) -> Color {
        let values: Vec<Color> = values.collect();
        match self {
            Self::Sum => values
                .iter()
                .copied()
                .reduce(Color::clamped_add)
                .unwrap_or(Color::TRANSPARENT),
            Self::Average => {
                let n = u32::try_from(values.len()).unwrap_or(0);
                values
                    .iter()
                    .copied()
                    .reduce(Color::clamped_add)
                    .unwrap_or(Color::TRANSPARENT)
                    .div_round(n)
            }
            Self::Min => values.iter().copied().reduce(Color::min).unwrap_or(Color::TRANSPARENT),
            Self::Max => values.iter().copied().reduce(Color::max).unwrap_or(Color::TRANSPARENT),
        }
    }
}

/// `sum`/`average`/`min`/`max` combine modes (spec §4.3 step 3; these four
/// are associative and commutative — invariant I1).
#[allow(clippy::too_many_lines)]
fn combine_reduce(items: &[(&Publisher, Artifact)], mode: Reduce) -> Artifact {
    let first_kind = items.first().map(|(_, v)| v.kind());
    let Some(kind) = first_kind else {
        return Artifact::error("empty publisher set in combine_reduce");
    };

    match kind {
        crate::artifact::ArtifactKind::ScalarFloat => {
            let vs: Vec<f64> = items
                .iter()
                .map(|(_, v)| match v {
                    Artifact::Scalar(ScalarValue::Float(f)) => *f,
                    _ => f64::NAN,
                })
                .collect();
            Artifact::Scalar(ScalarValue::Float(mode.f64(vs.into_iter())))
        }
        crate::artifact::ArtifactKind::ScalarVec2 => {
            let vs: Vec<Vec2> = items
                .iter()
                .map(|(_, v)| match v {
                    Artifact::Scalar(ScalarValue::Vec2(x)) => *x,
                    _ => Vec2::ZERO,
                })
                .collect();
            Artifact::Scalar(ScalarValue::Vec2(mode.vec2(vs.into_iter())))
        }
        crate::artifact::ArtifactKind::ScalarColor => {
            let vs: Vec<Color> = items
                .iter()
                .map(|(_, v)| match v {
                    Artifact::Scalar(ScalarValue::Color(c)) => *c,
                    _ => Color::TRANSPARENT,
                })
                .collect();
            Artifact::Scalar(ScalarValue::Color(mode.color(vs.into_iter())))
        }
        crate::artifact::ArtifactKind::SignalFloat
        | crate::artifact::ArtifactKind::SignalPhase
        | crate::artifact::ArtifactKind::SignalUnit
        | crate::artifact::ArtifactKind::SignalTime => {
            let fns: Vec<_> = items
                .iter()
                .filter_map(|(_, v)| signal_float_fn(v))
                .collect();
            let combined = std::sync::Arc::new(move |t: f64, ctx: &RuntimeCtx| {
                mode.f64(fns.iter().map(|f| f(t, ctx)))
            });
            match kind {
                crate::artifact::ArtifactKind::SignalPhase => Artifact::Signal(SignalValue::phase(move |t, ctx| combined(t, ctx))),
                crate::artifact::ArtifactKind::SignalUnit => Artifact::Signal(SignalValue::unit(move |t, ctx| combined(t, ctx))),
                crate::artifact::ArtifactKind::SignalTime => Artifact::Signal(SignalValue::Time(combined)),
                _ => Artifact::Signal(SignalValue::Float(combined)),
            }
        }
        crate::artifact::ArtifactKind::SignalVec2 => {
            let fns: Vec<_> = items
                .iter()
                .filter_map(|(_, v)| match v {
                    Artifact::Signal(SignalValue::Vec2(f)) => Some(f.clone()),
                    _ => None,
                })
                .collect();
            Artifact::Signal(SignalValue::Vec2(std::sync::Arc::new(move |t, ctx| {
                mode.vec2(fns.iter().map(|f| f(t, ctx)))
            })))
        }
        crate::artifact::ArtifactKind::SignalColor => {
            let fns: Vec<_> = items
                .iter()
                .filter_map(|(_, v)| match v {
                    Artifact::Signal(SignalValue::Color(f)) => Some(f.clone()),
                    _ => None,
                })
                .collect();
            Artifact::Signal(SignalValue::Color(std::sync::Arc::new(move |t, ctx| {
                mode.color(fns.iter().map(|f| f(t, ctx)))
            })))
        }
        crate::artifact::ArtifactKind::FieldFloat => {
            let fns: Vec<_> = items
                .iter()
                .filter_map(|(_, v)| match v {
                    Artifact::Field(FieldValue::Float(f)) => Some(f.clone()),
                    _ => None,
                })
                .collect();
            Artifact::Field(FieldValue::Float(std::sync::Arc::new(move |seed, n, ctx| {
                combine_field(&fns, seed, n, ctx, |vals| mode.f64(vals.into_iter()))
            })))
        }
        crate::artifact::ArtifactKind::FieldVec2 => {
            let fns: Vec<_> = items
                .iter()
                .filter_map(|(_, v)| match v {
                    Artifact::Field(FieldValue::Vec2(f)) => Some(f.clone()),
                    _ => None,
                })
                .collect();
            Artifact::Field(FieldValue::Vec2(std::sync::Arc::new(move |seed, n, ctx| {
                combine_field(&fns, seed, n, ctx, |vals| mode.vec2(vals.into_iter()))
            })))
        }
        crate::artifact::ArtifactKind::FieldColor => {
            let fns: Vec<_> = items
                .iter()
                .filter_map(|(_, v)| match v {
                    Artifact::Field(FieldValue::Color(f)) => Some(f.clone()),
                    _ => None,
                })
                .collect();
            Artifact::Field(FieldValue::Color(std::sync::Arc::new(move |seed, n, ctx| {
                combine_field(&fns, seed, n, ctx, |vals| mode.color(vals.into_iter()))
            })))
        }
        other => Artifact::error(format!("combine mode not supported for {other}")),
    }
}

fn signal_float_fn(v: &Artifact) -> Option<crate::artifact::SignalFn<f64>> {
    match v {
        Artifact::Signal(SignalValue::Float(f) | SignalValue::Phase(f) | SignalValue::Unit(f) | SignalValue::Time(f)) => {
            Some(f.clone())
        }
        _ => None,
    }
}

/// Combines `n` fields lazily: each publisher's field function is called
/// with the same `(seed, n, ctx)` and reduced element-by-element (spec
/// §4.3 step 4).
fn combine_field<T: Copy>(
    fns: &[crate::artifact::FieldFn<T>],
    seed: u64,
    n: usize,
    ctx: &RuntimeCtx,
    reduce_element: impl Fn(Vec<T>) -> T,
) -> Vec<T> {
    let buffers: Vec<Vec<T>> = fns.iter().map(|f| f(seed, n, ctx)).collect();
    (0..n)
        .map(|i| reduce_element(buffers.iter().map(|b| b[i]).collect()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ident::{make_bus_id, make_publisher_id};
    use crate::patch::Literal;
    use crate::registry::RegistryBuilder;
    use std::collections::BTreeMap;

    fn env<'a>(registry: &'a crate::registry::Registry, defaults: &'a BTreeMap<String, DefaultSource>) -> ResolverEnv<'a> {
        ResolverEnv {
            registry,
            ctx: RuntimeCtx::default(),
            resolve_bus: &|_| Artifact::error("unused"),
            resolve_wire: &|_| Artifact::error("unused"),
            default_sources: defaults,
        }
    }

    fn publisher(id: &str, bus: crate::ident::BusId, sort_key: f64) -> Publisher {
        Publisher {
            id: make_publisher_id(id),
            bus,
            source: crate::ident::BlockSlot {
                block: crate::ident::make_block_id(id),
                slot: 0,
            },
            stack: Vec::new(),
            enabled: true,
            sort_key,
        }
    }

    #[test]
    fn empty_publisher_set_yields_default() {
        let registry = RegistryBuilder::new().seal();
        let defaults = BTreeMap::new();
        let bus = Bus {
            id: make_bus_id("b"),
            value_type: crate::artifact::ArtifactKind::ScalarFloat,
            combine_mode: CombineMode::Sum,
            default_value: Literal::Float(7.0),
            sort_key: 0.0,
        };
        let e = env(&registry, &defaults);
        let out = effective_value(&bus, &[], &e);
        assert_eq!(out, Artifact::Scalar(ScalarValue::Float(7.0)));
    }

    #[test]
    fn last_mode_picks_max_sort_key() {
        let registry = RegistryBuilder::new().seal();
        let defaults = BTreeMap::new();
        let bus_id = make_bus_id("last-bus");
        let p1 = publisher("p1", bus_id, 10.0);
        let p2 = publisher("p2", bus_id, 20.0);
        let e = ResolverEnv {
            registry: &registry,
            ctx: RuntimeCtx::default(),
            resolve_bus: &|_| Artifact::error("unused"),
            resolve_wire: &|slot| {
                if slot.block == p2.source.block {
                    Artifact::Scalar(ScalarValue::Float(100.0))
                } else {
                    Artifact::Scalar(ScalarValue::Float(10.0))
                }
            },
            default_sources: &defaults,
        };
        let bus = Bus {
            id: bus_id,
            value_type: crate::artifact::ArtifactKind::ScalarFloat,
            combine_mode: CombineMode::Last,
            default_value: Literal::Float(0.0),
            sort_key: 0.0,
        };
        let out = effective_value(&bus, &[&p1, &p2], &e);
        assert_eq!(out, Artifact::Scalar(ScalarValue::Float(100.0)));
    }

    #[test]
    fn sum_mode_adds_fields_elementwise() {
        let registry = RegistryBuilder::new().seal();
        let defaults = BTreeMap::new();
        let bus_id = make_bus_id("sum-bus");
        let p1 = publisher("p1", bus_id, 0.0);
        let p2 = publisher("p2", bus_id, 0.0);
        let p1_block = p1.source.block;
        let e = ResolverEnv {
            registry: &registry,
            ctx: RuntimeCtx::default(),
            resolve_bus: &|_| Artifact::error("unused"),
            resolve_wire: &move |slot| {
                let base = if slot.block == p1_block { 0.0 } else { 10.0 };
                Artifact::Field(FieldValue::Float(std::sync::Arc::new(move |_seed, n, _ctx| {
                    (0..n).map(|i| base + i as f64).collect()
                })))
            },
            default_sources: &defaults,
        };
        let bus = Bus {
            id: bus_id,
            value_type: crate::artifact::ArtifactKind::FieldFloat,
            combine_mode: CombineMode::Sum,
            default_value: Literal::Float(0.0),
            sort_key: 0.0,
        };
        let out = effective_value(&bus, &[&p1, &p2], &e);
        let Artifact::Field(FieldValue::Float(f)) = out else {
            unreachable!("expected a combined Field:float")
        };
        let result = f(0, 5, &RuntimeCtx::default());
        assert_eq!(result, vec![10.0, 12.0, 14.0, 16.0, 18.0]);
    }
}
