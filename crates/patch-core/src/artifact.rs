// SPDX-License-Identifier: Apache-2.0
//! The closed value algebra that flows between blocks (spec §3).
//!
//! `Artifact` is a tagged union, not a class hierarchy (spec §9, "closed sum
//! types over subclasses"): every operation that consumes artifacts matches
//! on [`ArtifactKind`] rather than dispatching through a trait object. Time
//! varying payloads (`Signal`, `Field`, the render half of
//! `RenderTreeProgram`) are represented as `Arc`-shared pure closures so that
//! an `Artifact` stays cheaply `Clone` even though it carries a value that is
//! really a function of `(t, ctx)`.

use std::fmt;
use std::sync::Arc;

use crate::math::{Color, Vec2};
use crate::render::RenderTree;

/// The viewport a frame is being evaluated against.
#[derive(Clone, Copy, PartialEq, Debug)]
pub struct Viewport {
    /// Width in CSS pixels.
    pub width: f64,
    /// Height in CSS pixels.
    pub height: f64,
    /// Device pixel ratio.
    pub dpr: f64,
}

impl Default for Viewport {
    fn default() -> Self {
        Self {
            width: 800.0,
            height: 600.0,
            dpr: 1.0,
        }
    }
}

/// The ambient context every `Signal`/`Field`/`RenderTreeProgram` function
/// closure receives alongside `t` (spec §3: "`RuntimeCtx { viewport: { w, h,
/// dpr } }`").
#[derive(Clone, Copy, PartialEq, Debug, Default)]
pub struct RuntimeCtx {
    /// Current viewport.
    pub viewport: Viewport,
}

/// Discriminant for every concrete artifact shape named in spec §3's data
/// model table. Used by the registry and graph compiler to match producer
/// kinds against declared input types without constructing a value.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ArtifactKind {
    /// `Scalar:float`
    ScalarFloat,
    /// `Scalar:int`
    ScalarInt,
    /// `Scalar:bool`
    ScalarBool,
    /// `Scalar:string`
    ScalarString,
    /// `Scalar:vec2`
    ScalarVec2,
    /// `Scalar:color`
    ScalarColor,
    /// `Signal:float`
    SignalFloat,
    /// `Signal:int`
    SignalInt,
    /// `Signal:vec2`
    SignalVec2,
    /// `Signal:color`
    SignalColor,
    /// `Signal:phase` — wrapped to `[0, 1)`.
    SignalPhase,
    /// `Signal:Unit` — clamped to `[0, 1]`.
    SignalUnit,
    /// `Signal:Time`
    SignalTime,
    /// `Field:float`
    FieldFloat,
    /// `Field:vec2`
    FieldVec2,
    /// `Field:color`
    FieldColor,
    /// `Event`
    Event,
    /// `RenderTreeProgram`
    RenderTreeProgram,
    /// `Error`
    Error,
}

impl fmt::Display for ArtifactKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::ScalarFloat => "Scalar:float",
            Self::ScalarInt => "Scalar:int",
            Self::ScalarBool => "Scalar:bool",
            Self::ScalarString => "Scalar:string",
            Self::ScalarVec2 => "Scalar:vec2",
            Self::ScalarColor => "Scalar:color",
            Self::SignalFloat => "Signal:float",
            Self::SignalInt => "Signal:int",
            Self::SignalVec2 => "Signal:vec2",
            Self::SignalColor => "Signal:color",
            Self::SignalPhase => "Signal:phase",
            Self::SignalUnit => "Signal:Unit",
            Self::SignalTime => "Signal:Time",
            Self::FieldFloat => "Field:float",
            Self::FieldVec2 => "Field:vec2",
            Self::FieldColor => "Field:color",
            Self::Event => "Event",
            Self::RenderTreeProgram => "RenderTreeProgram",
            Self::Error => "Error",
        };
        f.write_str(s)
    }
}

/// A time-invariant value (spec §3: "time-invariant value").
#[derive(Clone, PartialEq, Debug)]
pub enum ScalarValue {
    /// `Scalar:float`
    Float(f64),
    /// `Scalar:int`
    Int(i64),
    /// `Scalar:bool`
    Bool(bool),
    /// `Scalar:string`
    String(String),
    /// `Scalar:vec2`
    Vec2(Vec2),
    /// `Scalar:color`
    Color(Color),
}

/// A pure function `(t, ctx) -> T`.
pub type SignalFn<T> = Arc<dyn Fn(f64, &RuntimeCtx) -> T + Send + Sync>;

/// A time-varying value (spec §3: "pure function `(t, ctx) -> T`").
///
/// `Phase` outputs are wrapped to `[0, 1)` and `Unit` outputs are clamped to
/// `[0, 1]` by construction (see [`SignalValue::phase`] and
/// [`SignalValue::unit`]) so the invariant holds regardless of what the
/// wrapped closure computes.
#[derive(Clone)]
pub enum SignalValue {
    /// `Signal:float`
    Float(SignalFn<f64>),
    /// `Signal:int`
    Int(SignalFn<i64>),
    /// `Signal:vec2`
    Vec2(SignalFn<Vec2>),
    /// `Signal:color`
    Color(SignalFn<Color>),
    /// `Signal:phase`, always in `[0, 1)`.
    Phase(SignalFn<f64>),
    /// `Signal:Unit`, always in `[0, 1]`.
    Unit(SignalFn<f64>),
    /// `Signal:Time`
    Time(SignalFn<f64>),
}

impl SignalValue {
    /// Builds a `Signal:phase` from a raw closure, wrapping its output into
    /// `[0, 1)` (spec §3, invariant b).
    pub fn phase<F>(f: F) -> Self
    where
        F: Fn(f64, &RuntimeCtx) -> f64 + Send + Sync + 'static,
    {
        Self::Phase(Arc::new(move |t, ctx| crate::math::wrap01(f(t, ctx))))
    }

    /// Builds a `Signal:Unit` from a raw closure, clamping its output into
    /// `[0, 1]`.
    pub fn unit<F>(f: F) -> Self
    where
        F: Fn(f64, &RuntimeCtx) -> f64 + Send + Sync + 'static,
    {
        Self::Unit(Arc::new(move |t, ctx| crate::math::clamp01(f(t, ctx))))
    }

    /// The discriminant this signal carries.
    #[must_use]
    pub const fn kind(&self) -> ArtifactKind {
        match self {
            Self::Float(_) => ArtifactKind::SignalFloat,
            Self::Int(_) => ArtifactKind::SignalInt,
            Self::Vec2(_) => ArtifactKind::SignalVec2,
            Self::Color(_) => ArtifactKind::SignalColor,
            Self::Phase(_) => ArtifactKind::SignalPhase,
            Self::Unit(_) => ArtifactKind::SignalUnit,
            Self::Time(_) => ArtifactKind::SignalTime,
        }
    }
}

impl fmt::Debug for SignalValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SignalValue::{}(<closure>)", self.kind())
    }
}

/// A bulk function `(seed, n, ctx) -> [T; n]` (spec §3: "lazy per-element
/// sequence"). Implementations must return exactly `n` elements (invariant
/// a); callers in [`crate::runtime`] validate this and surface a mismatch as
/// an internal error rather than silently truncating or padding.
pub type FieldFn<T> = Arc<dyn Fn(u64, usize, &RuntimeCtx) -> Vec<T> + Send + Sync>;

/// A lazy per-element sequence, evaluated in bulk for a requested count.
#[derive(Clone)]
pub enum FieldValue {
    /// `Field:float`
    Float(FieldFn<f64>),
    /// `Field:vec2`
    Vec2(FieldFn<Vec2>),
    /// `Field:color`
    Color(FieldFn<Color>),
}

impl FieldValue {
    /// The discriminant this field carries.
    #[must_use]
    pub const fn kind(&self) -> ArtifactKind {
        match self {
            Self::Float(_) => ArtifactKind::FieldFloat,
            Self::Vec2(_) => ArtifactKind::FieldVec2,
            Self::Color(_) => ArtifactKind::FieldColor,
        }
    }
}

impl fmt::Debug for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FieldValue::{}(<closure>)", self.kind())
    }
}

/// An edge-triggered predicate `(t, lastT) -> bool` (spec §3: "Event").
#[derive(Clone)]
pub struct EventValue(pub Arc<dyn Fn(f64, f64) -> bool + Send + Sync>);

impl EventValue {
    /// Evaluates the predicate for the transition from `last_t` to `t`.
    #[must_use]
    pub fn fired(&self, t: f64, last_t: f64) -> bool {
        (self.0)(t, last_t)
    }
}

impl fmt::Debug for EventValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("EventValue(<predicate>)")
    }
}

impl PartialEq for EventValue {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

/// The terminal sink artifact (spec §3: "Final sink artifact").
#[derive(Clone)]
pub struct RenderTreeProgramValue {
    /// Produces the render tree for a given `(t, ctx)`.
    pub signal: Arc<dyn Fn(f64, &RuntimeCtx) -> RenderTree + Send + Sync>,
    /// Produces the ids of events that fired between `last_t` and `t`.
    pub event: Arc<dyn Fn(f64, f64) -> Vec<String> + Send + Sync>,
}

impl fmt::Debug for RenderTreeProgramValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("RenderTreeProgramValue { signal: <closure>, event: <closure> }")
    }
}

impl PartialEq for RenderTreeProgramValue {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.signal, &other.signal) && Arc::ptr_eq(&self.event, &other.event)
    }
}

/// The closed value algebra flowing between blocks (spec §3).
#[derive(Clone, Debug, PartialEq)]
pub enum Artifact {
    /// A time-invariant value.
    Scalar(ScalarValue),
    /// A time-varying pure function.
    Signal(SignalValue),
    /// A lazy per-element sequence.
    Field(FieldValue),
    /// An edge-triggered trigger.
    Event(EventValue),
    /// The final sink artifact.
    RenderTreeProgram(RenderTreeProgramValue),
    /// A compile-time failure. First-class: any operation consuming an
    /// `Error` produces an `Error` with the same message (spec §3, invariant
    /// d; spec §8, testable property 6).
    Error(String),
}

impl Artifact {
    /// Builds an `Error` artifact.
    #[must_use]
    pub fn error(message: impl Into<String>) -> Self {
        Self::Error(message.into())
    }

    /// The discriminant of this artifact.
    #[must_use]
    pub fn kind(&self) -> ArtifactKind {
        match self {
            Self::Scalar(s) => match s {
                ScalarValue::Float(_) => ArtifactKind::ScalarFloat,
                ScalarValue::Int(_) => ArtifactKind::ScalarInt,
                ScalarValue::Bool(_) => ArtifactKind::ScalarBool,
                ScalarValue::String(_) => ArtifactKind::ScalarString,
                ScalarValue::Vec2(_) => ArtifactKind::ScalarVec2,
                ScalarValue::Color(_) => ArtifactKind::ScalarColor,
            },
            Self::Signal(s) => s.kind(),
            Self::Field(f) => f.kind(),
            Self::Event(_) => ArtifactKind::Event,
            Self::RenderTreeProgram(_) => ArtifactKind::RenderTreeProgram,
            Self::Error(_) => ArtifactKind::Error,
        }
    }

    /// `true` if this artifact is the `Error` variant.
    #[must_use]
    pub const fn is_error(&self) -> bool {
        matches!(self, Self::Error(_))
    }

    /// Error-absorption helper (spec §3, invariant d; §8, property 6): if
    /// any of `inputs` is an `Error`, returns that `Error` unchanged (first
    /// one found, left to right) instead of running `f`.
    pub fn absorb_errors<'a>(
        inputs: impl IntoIterator<Item = &'a Self>,
        f: impl FnOnce() -> Self,
    ) -> Self {
        for input in inputs {
            if let Self::Error(msg) = input {
                return Self::Error(msg.clone());
            }
        }
        f()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn phase_signal_always_wraps() {
        let sig = SignalValue::phase(|t, _ctx| t);
        let ctx = RuntimeCtx::default();
        if let SignalValue::Phase(f) = &sig {
            assert!((0.0..1.0).contains(&f(2.75, &ctx)));
            assert!((0.0..1.0).contains(&f(-0.1, &ctx)));
        } else {
            unreachable!("phase() must build a Phase variant");
        }
    }

    #[test]
    fn error_absorption_short_circuits() {
        let ok = Artifact::Scalar(ScalarValue::Float(1.0));
        let err = Artifact::error("boom");
        let result = Artifact::absorb_errors([&ok, &err], || {
            unreachable!("should not run when an input is an Error")
        });
        assert_eq!(result, Artifact::error("boom"));
    }

    #[test]
    fn error_absorption_runs_when_no_error_present() {
        let a = Artifact::Scalar(ScalarValue::Float(1.0));
        let b = Artifact::Scalar(ScalarValue::Float(2.0));
        let result = Artifact::absorb_errors([&a, &b], || Artifact::Scalar(ScalarValue::Float(3.0)));
        assert_eq!(result, Artifact::Scalar(ScalarValue::Float(3.0)));
    }

    #[test]
    fn kind_display_matches_spec_naming() {
        assert_eq!(ArtifactKind::SignalPhase.to_string(), "Signal:phase");
        assert_eq!(ArtifactKind::FieldColor.to_string(), "Field:color");
    }
}
