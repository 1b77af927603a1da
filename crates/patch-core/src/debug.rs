// SPDX-License-Identifier: Apache-2.0
//! The Debug/Telemetry Core (C8): fixed-capacity, allocation-free columnar
//! ring buffers recording evaluation spans and value samples (spec §4.7).
//!
//! Grounded in the teacher's `wsc::types` fixed-size `#[repr(C)]` rows
//! (`NodeRow`, `EdgeRow`, ...): every record here is a `bytemuck::Pod` row of
//! a known byte width, laid out for cheap columnar storage rather than a
//! `Vec<Box<dyn Trait>>` of heterogeneous events. Unlike `wsc`'s on-disk rows,
//! these never leave memory — they back a single writer, many readers ring
//! (spec §5: "Ring buffers tolerate one writer and many readers").

use bytemuck::{Pod, Zeroable};
use rustc_hash::FxHashMap;
use std::collections::VecDeque;

use crate::artifact::{Artifact, RuntimeCtx};
use crate::ident::{BlockId, BusId, ListenerId, PublisherId};

/// Discriminant for a [`SpanRecord`]'s `kind` byte (spec §4.7).
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
#[repr(u8)]
pub enum SpanKind {
    /// One full frame evaluation.
    FrameEval = 0,
    /// One block's compile/evaluate step.
    BlockEval = 1,
    /// A bus read by a listener.
    BusRead = 2,
    /// A bus combine computation.
    BusCombine = 3,
    /// A bus falling back to its default value.
    BusDefault = 4,
    /// A field materialization.
    MaterializeField = 5,
    /// A render sink evaluation.
    RenderSinkEval = 6,
    /// A single signal sample taken for a probe.
    SignalSample = 7,
    /// One adapter application.
    AdapterStep = 8,
    /// One lens application.
    LensStep = 9,
}

impl SpanKind {
    const fn from_u8(v: u8) -> Option<Self> {
        match v {
            0 => Some(Self::FrameEval),
            1 => Some(Self::BlockEval),
            2 => Some(Self::BusRead),
            3 => Some(Self::BusCombine),
            4 => Some(Self::BusDefault),
            5 => Some(Self::MaterializeField),
            6 => Some(Self::RenderSinkEval),
            7 => Some(Self::SignalSample),
            8 => Some(Self::AdapterStep),
            9 => Some(Self::LensStep),
            _ => None,
        }
    }
}

/// Bitfield flags carried by a [`SpanRecord`] (spec §4.7).
pub mod span_flags {
    /// The sampled value contained `NaN`.
    pub const HAS_NAN: u32 = 1 << 0;
    /// The sampled value contained an infinity.
    pub const HAS_INF: u32 = 1 << 1;
    /// This step's result came from a cache rather than re-evaluation.
    pub const CACHE_HIT: u32 = 1 << 2;
    /// A lens or adapter performed a type coercion.
    pub const TYPE_COERCION: u32 = 1 << 3;
    /// An adapter was inserted automatically by the graph compiler.
    pub const AUTO_ADAPTER: u32 = 1 << 4;
}

/// Sentinel `parent_span_id` meaning "no parent".
pub const NO_PARENT: u32 = u32::MAX;

/// A 32-byte columnar span record (spec §4.7: "`{ frameId, tMs, kind,
/// subjectId, parentSpanId, durationUs, flags }`").
///
/// Every field is a plain `u32` so the record's `repr(C)` layout has no
/// compiler-inserted padding to reason about: eight 4-byte, 4-byte-aligned
/// fields sum to exactly 32 bytes. `subject_id` is a caller-chosen 64-bit
/// identifier (e.g. the low 8 bytes of a [`BlockId`]/[`BusId`] hash),
/// split across `subject_id_lo`/`subject_id_hi` to keep that uniform
/// layout rather than widening the record with a `u64`.
#[repr(C)]
#[derive(Clone, Copy, PartialEq, Eq, Debug, Pod, Zeroable)]
pub struct SpanRecord {
    /// The frame this span belongs to.
    pub frame_id: u32,
    /// Time in milliseconds the frame was evaluated at, as bits of an `f32`.
    pub t_ms_bits: u32,
    /// [`SpanKind`] discriminant.
    pub kind: u32,
    /// Low 32 bits of the caller-chosen subject identifier.
    pub subject_id_lo: u32,
    /// High 32 bits of the caller-chosen subject identifier.
    pub subject_id_hi: u32,
    /// Index of the enclosing span in the same ring, or [`NO_PARENT`].
    pub parent_span_id: u32,
    /// Wall-clock duration of this span in microseconds.
    pub duration_us: u32,
    /// [`span_flags`] bitfield.
    pub flags: u32,
}

const _: () = assert!(std::mem::size_of::<SpanRecord>() == 32);

impl SpanRecord {
    /// Builds a span record.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn new(
        frame_id: u32,
        t_ms: f32,
        kind: SpanKind,
        subject_id: u64,
        parent_span_id: u32,
        duration_us: u32,
        flags: u32,
    ) -> Self {
        Self {
            frame_id,
            t_ms_bits: t_ms.to_bits(),
            kind: kind as u32,
            subject_id_lo: (subject_id & 0xFFFF_FFFF) as u32,
            subject_id_hi: (subject_id >> 32) as u32,
            parent_span_id,
            duration_us,
            flags,
        }
    }

    /// The frame-relative evaluation time.
    #[must_use]
    pub fn t_ms(&self) -> f32 {
        f32::from_bits(self.t_ms_bits)
    }

    /// Reassembles the 64-bit subject identifier from its two halves.
    #[must_use]
    pub fn subject_id(&self) -> u64 {
        (u64::from(self.subject_id_hi) << 32) | u64::from(self.subject_id_lo)
    }

    /// Decodes [`Self::kind`] back into a [`SpanKind`], if the value is a
    /// recognized discriminant.
    #[must_use]
    pub fn span_kind(&self) -> Option<SpanKind> {
        u8::try_from(self.kind).ok().and_then(SpanKind::from_u8)
    }
}

/// Tag byte for a [`ValueRecord`] (spec §4.7: "uniform tagged
/// representation `{ num | phase | bool | color(u32 RGBA) | vec2 | trigger |
/// none | err(nan|inf|unknown) }`").
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
#[repr(u8)]
pub enum ValueTag {
    /// A plain number.
    Num = 0,
    /// A `[0, 1)`-wrapped phase.
    Phase = 1,
    /// A boolean.
    Bool = 2,
    /// A packed `0xAARRGGBB` color.
    Color = 3,
    /// A 2D vector.
    Vec2 = 4,
    /// An edge-triggered event firing.
    Trigger = 5,
    /// No value (e.g. a `Field` or `RenderTreeProgram`, not summarizable).
    None = 6,
    /// An error value.
    Err = 7,
}

/// Sub-classification of [`ValueTag::Err`] (spec §4.7).
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
#[repr(u32)]
pub enum ErrKind {
    /// The value was `NaN`.
    Nan = 0,
    /// The value was `+-inf`.
    Inf = 1,
    /// Any other failure (compile error, unsummarizable artifact).
    Unknown = 2,
}

/// A 32-byte columnar value-sample record (spec §4.7). Fields `a`..`f` are
/// interpreted according to `tag`: `Num`/`Phase` use `a`; `Bool` uses `a` as
/// 0/1; `Color` stores its packed `u32` reinterpreted into `a`'s bits;
/// `Vec2` uses `a`, `b`; `Err` stores an [`ErrKind`] discriminant in `a`'s
/// bits.
#[repr(C)]
#[derive(Clone, Copy, PartialEq, Debug, Pod, Zeroable)]
pub struct ValueRecord {
    /// [`ValueTag`] discriminant.
    pub tag: u8,
    /// Caller-defined type identifier (e.g. [`crate::artifact::ArtifactKind`]
    /// as `u8`), opaque to this module.
    pub type_id: u8,
    _pad: u16,
    /// Payload component `a`.
    pub a: f32,
    /// Payload component `b`.
    pub b: f32,
    /// Payload component `c`.
    pub c: f32,
    /// Payload component `d`.
    pub d: f32,
    /// Payload component `e`.
    pub e: f32,
    /// Payload component `f`.
    pub f: f32,
    _pad2: u32,
}

const _: () = assert!(std::mem::size_of::<ValueRecord>() == 32);

/// A value snapshot with no retained closures (spec §4.7: "Value summaries
/// never retain references to live closures").
#[derive(Clone, Copy, PartialEq, Debug)]
pub enum ValueSummary {
    /// A plain number.
    Num(f64),
    /// A `[0, 1)` phase.
    Phase(f64),
    /// A boolean.
    Bool(bool),
    /// A packed `0xAARRGGBB` color.
    Color(u32),
    /// A 2D vector.
    Vec2(f64, f64),
    /// An event fired this frame.
    Trigger(bool),
    /// Not summarizable (a `Field`, `RenderTreeProgram`, or similar).
    None,
    /// A failure.
    Err(ErrKind),
}

impl ValueSummary {
    /// Packs this summary into a 32-byte [`ValueRecord`] for the ring.
    #[must_use]
    pub fn to_record(self, type_id: u8) -> ValueRecord {
        #[allow(clippy::cast_possible_truncation)]
        let (tag, a, b) = match self {
            Self::Num(v) => (ValueTag::Num, v as f32, 0.0),
            Self::Phase(v) => (ValueTag::Phase, v as f32, 0.0),
            Self::Bool(v) => (ValueTag::Bool, f32::from(u8::from(v)), 0.0),
            Self::Color(c) => (ValueTag::Color, f32::from_bits(c), 0.0),
            Self::Vec2(x, y) => (ValueTag::Vec2, x as f32, y as f32),
            Self::Trigger(fired) => (ValueTag::Trigger, f32::from(u8::from(fired)), 0.0),
            Self::None => (ValueTag::None, 0.0, 0.0),
            Self::Err(kind) => (ValueTag::Err, f32::from_bits(kind as u32), 0.0),
        };
        ValueRecord {
            tag: tag as u8,
            type_id,
            _pad: 0,
            a,
            b,
            c: 0.0,
            d: 0.0,
            e: 0.0,
            f: 0.0,
            _pad2: 0,
        }
    }
}

/// Summarizes an [`Artifact`] at a given `(t, last_t, ctx)` into a
/// [`ValueSummary`], sampling any `Signal`/`Event` closure exactly once and
/// retaining no reference to it (spec §4.7).
#[must_use]
pub fn summarize(artifact: &Artifact, t: f64, last_t: f64, ctx: &RuntimeCtx) -> ValueSummary {
    use crate::artifact::{ScalarValue, SignalValue};

    match artifact {
        Artifact::Scalar(ScalarValue::Float(v)) => classify_f64(*v),
        Artifact::Scalar(ScalarValue::Int(i)) => {
            #[allow(clippy::cast_precision_loss)]
            let v = *i as f64;
            classify_f64(v)
        }
        Artifact::Scalar(ScalarValue::Bool(b)) => ValueSummary::Bool(*b),
        Artifact::Scalar(ScalarValue::Color(c)) => ValueSummary::Color(c.0),
        Artifact::Scalar(ScalarValue::Vec2(v)) => ValueSummary::Vec2(v.x, v.y),
        Artifact::Scalar(ScalarValue::String(_)) => ValueSummary::None,
        Artifact::Signal(SignalValue::Float(f) | SignalValue::Time(f)) => classify_f64(f(t, ctx)),
        Artifact::Signal(SignalValue::Phase(f)) => ValueSummary::Phase(f(t, ctx)),
        Artifact::Signal(SignalValue::Unit(f)) => classify_f64(f(t, ctx)),
        Artifact::Signal(SignalValue::Int(f)) => {
            #[allow(clippy::cast_precision_loss)]
            let v = f(t, ctx) as f64;
            classify_f64(v)
        }
        Artifact::Signal(SignalValue::Vec2(f)) => {
            let v = f(t, ctx);
            ValueSummary::Vec2(v.x, v.y)
        }
        Artifact::Signal(SignalValue::Color(f)) => ValueSummary::Color(f(t, ctx).0),
        Artifact::Event(ev) => ValueSummary::Trigger(ev.fired(t, last_t)),
        Artifact::Field(_) | Artifact::RenderTreeProgram(_) => ValueSummary::None,
        Artifact::Error(_) => ValueSummary::Err(ErrKind::Unknown),
    }
}

fn classify_f64(v: f64) -> ValueSummary {
    if v.is_nan() {
        ValueSummary::Err(ErrKind::Nan)
    } else if v.is_infinite() {
        ValueSummary::Err(ErrKind::Inf)
    } else {
        ValueSummary::Num(v)
    }
}

/// A single-writer, many-reader fixed-capacity ring buffer of `Pod` rows
/// (spec §4.7, §5). Writes are wait-free and allocation-free after
/// construction: `push` never grows `buf`, it only overwrites the oldest
/// slot once `capacity` writes have happened.
#[derive(Debug)]
pub struct Ring<T> {
    buf: Vec<T>,
    capacity: usize,
    write_ptr: u64,
}

impl<T: Pod + Zeroable> Ring<T> {
    /// Builds a ring holding exactly `capacity` records, pre-allocated.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            buf: vec![T::zeroed(); capacity],
            capacity,
            write_ptr: 0,
        }
    }

    /// The ring's fixed capacity.
    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    /// The number of writes performed so far (monotonically increasing,
    /// not wrapped to `capacity`).
    #[must_use]
    pub const fn write_ptr(&self) -> u64 {
        self.write_ptr
    }

    /// Appends `record`, overwriting the oldest entry once the ring is
    /// full, and returns the index just written.
    pub fn push(&mut self, record: T) -> u64 {
        let index = self.write_ptr;
        #[allow(clippy::cast_possible_truncation)]
        let slot = (index % self.capacity as u64) as usize;
        self.buf[slot] = record;
        self.write_ptr += 1;
        index
    }

    /// Reads the record at `index`, or `None` if it has already been
    /// overwritten or has not yet been written (spec §8, testable property
    /// 8: `Some` iff `max(0, N-C) <= i < N`).
    #[must_use]
    pub fn get_by_index(&self, index: u64) -> Option<T> {
        if index >= self.write_ptr {
            return None;
        }
        #[allow(clippy::cast_possible_truncation)]
        let capacity = self.capacity as u64;
        let oldest = self.write_ptr.saturating_sub(capacity);
        if index < oldest {
            return None;
        }
        #[allow(clippy::cast_possible_truncation)]
        let slot = (index % capacity) as usize;
        Some(self.buf[slot])
    }

    /// Snapshots the current `write_ptr` first (spec §4.7: "Range reads
    /// snapshot the current `writePtr` first"), then returns every record
    /// still resident in `[start, end)`.
    #[must_use]
    pub fn snapshot_range(&self, start: u64, end: u64) -> Vec<T> {
        let write_ptr = self.write_ptr;
        let end = end.min(write_ptr);
        (start..end).filter_map(|i| self.get_by_index_capped(i, write_ptr)).collect()
    }

    fn get_by_index_capped(&self, index: u64, write_ptr: u64) -> Option<T> {
        #[allow(clippy::cast_possible_truncation)]
        let capacity = self.capacity as u64;
        let oldest = write_ptr.saturating_sub(capacity);
        if index < oldest || index >= write_ptr {
            return None;
        }
        #[allow(clippy::cast_possible_truncation)]
        let slot = (index % capacity) as usize;
        Some(self.buf[slot])
    }
}

/// Default value-ring capacity (spec §4.7: "Default capacity 100k").
pub const DEFAULT_VALUE_CAPACITY: usize = 100_000;
/// Default span-ring capacity. Spans are coarser-grained than value
/// samples, so a smaller default keeps memory bounded without losing
/// recent-frame visibility.
pub const DEFAULT_SPAN_CAPACITY: usize = 16_384;
/// Per-probe bounded history length.
pub const DEFAULT_PROBE_HISTORY: usize = 256;

/// Opaque probe handle returned by [`DebugRecorder::create_probe`].
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct ProbeId(u32);

/// Which side of a bus binding a probe is attached to.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum BindingDirection {
    /// The publishing side.
    Publish,
    /// The listening side.
    Subscribe,
}

/// A debug attachment target (spec §6: "`target ∈ { block(id) | bus(id) |
/// binding(id, publish|subscribe) }`"). Rust idiom: rather than a
/// `(id, direction)` pair for bindings, the direction is carried by which
/// binding id type is present (a [`PublisherId`] can only ever be
/// `Publish`), so `BindingDirection` is implied rather than stored
/// separately in those variants; it is still exposed via
/// [`ProbeTarget::direction`] for callers matching the spec's tagged shape.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum ProbeTarget {
    /// Attached to a block's output.
    Block(BlockId),
    /// Attached to a bus's effective value.
    Bus(BusId),
    /// Attached to a publisher binding.
    Publisher(PublisherId),
    /// Attached to a listener binding.
    Listener(ListenerId),
}

impl ProbeTarget {
    /// The binding direction this target implies, if it is a binding at
    /// all (spec §6's `publish|subscribe` tag).
    #[must_use]
    pub const fn direction(&self) -> Option<BindingDirection> {
        match self {
            Self::Publisher(_) => Some(BindingDirection::Publish),
            Self::Listener(_) => Some(BindingDirection::Subscribe),
            Self::Block(_) | Self::Bus(_) => None,
        }
    }
}

/// The Debug/Telemetry Core (spec §4.7): owns the two fixed-capacity rings
/// plus a lightweight probe layer. Single-owner, like [`crate::runtime::RuntimeState`]
/// (spec §5: "Ring buffers ... owned by a single recorder").
#[derive(Debug)]
pub struct DebugRecorder {
    spans: Ring<SpanRecord>,
    values: Ring<ValueRecord>,
    probes: FxHashMap<ProbeId, ProbeTarget>,
    probe_history: FxHashMap<ProbeId, VecDeque<(f64, ValueSummary)>>,
    next_probe_id: u32,
}

impl DebugRecorder {
    /// Builds a recorder with the given ring capacities.
    #[must_use]
    pub fn new(span_capacity: usize, value_capacity: usize) -> Self {
        Self {
            spans: Ring::with_capacity(span_capacity),
            values: Ring::with_capacity(value_capacity),
            probes: FxHashMap::default(),
            probe_history: FxHashMap::default(),
            next_probe_id: 0,
        }
    }

    /// Records a span, returning its ring index.
    pub fn record_span(&mut self, span: SpanRecord) -> u64 {
        self.spans.push(span)
    }

    /// Records a value sample, returning its ring index.
    pub fn record_value(&mut self, value: ValueRecord) -> u64 {
        self.values.push(value)
    }

    /// Reads a span by ring index.
    #[must_use]
    pub fn span_by_index(&self, index: u64) -> Option<SpanRecord> {
        self.spans.get_by_index(index)
    }

    /// Reads a value sample by ring index.
    #[must_use]
    pub fn value_by_index(&self, index: u64) -> Option<ValueRecord> {
        self.values.get_by_index(index)
    }

    /// Snapshot range read over the span ring.
    #[must_use]
    pub fn span_range(&self, start: u64, end: u64) -> Vec<SpanRecord> {
        self.spans.snapshot_range(start, end)
    }

    /// Snapshot range read over the value ring.
    #[must_use]
    pub fn value_range(&self, start: u64, end: u64) -> Vec<ValueRecord> {
        self.values.snapshot_range(start, end)
    }

    /// Attaches a probe to `target` (spec §6: `createProbe(target) ->
    /// probeId`).
    pub fn create_probe(&mut self, target: ProbeTarget) -> ProbeId {
        let id = ProbeId(self.next_probe_id);
        self.next_probe_id += 1;
        self.probes.insert(id, target);
        self.probe_history.insert(id, VecDeque::with_capacity(DEFAULT_PROBE_HISTORY));
        id
    }

    /// Every currently-attached probe (spec §6: `listProbes()`).
    #[must_use]
    pub fn list_probes(&self) -> Vec<(ProbeId, ProbeTarget)> {
        self.probes.iter().map(|(id, t)| (*id, *t)).collect()
    }

    /// Records a timed value sample against a probe, also mirroring it into
    /// the shared value ring so range reads see every sample taken anywhere
    /// in the patch, not just probed ones.
    pub fn record_probe_sample(&mut self, id: ProbeId, t_ms: f64, summary: ValueSummary, type_id: u8) {
        self.record_value(summary.to_record(type_id));
        if let Some(history) = self.probe_history.get_mut(&id) {
            if history.len() == DEFAULT_PROBE_HISTORY {
                history.pop_front();
            }
            history.push_back((t_ms, summary));
        }
    }

    /// The most recent `n` samples recorded against `id`, oldest first
    /// (spec §6: `getProbeHistory(id, n)`).
    #[must_use]
    pub fn probe_history(&self, id: ProbeId, n: usize) -> Vec<(f64, ValueSummary)> {
        self.probe_history.get(&id).map_or_else(Vec::new, |history| {
            let skip = history.len().saturating_sub(n);
            history.iter().skip(skip).copied().collect()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ring_bounds_match_spec_property_8() {
        let mut ring: Ring<ValueRecord> = Ring::with_capacity(4);
        for i in 0..10u32 {
            ring.push(ValueSummary::Num(f64::from(i)).to_record(0));
        }
        // N=10, C=4: Some iff max(0, 10-4)=6 <= i < 10.
        for i in 0..6 {
            assert!(ring.get_by_index(i).is_none(), "index {i} should be overwritten");
        }
        for i in 6..10 {
            assert!(ring.get_by_index(i).is_some(), "index {i} should be present");
        }
        assert!(ring.get_by_index(10).is_none(), "not yet written");
    }

    #[test]
    fn snapshot_range_respects_write_ptr() {
        let mut ring: Ring<SpanRecord> = Ring::with_capacity(2);
        ring.push(SpanRecord::new(0, 0.0, SpanKind::FrameEval, 0, NO_PARENT, 0, 0));
        ring.push(SpanRecord::new(1, 0.0, SpanKind::FrameEval, 0, NO_PARENT, 0, 0));
        ring.push(SpanRecord::new(2, 0.0, SpanKind::FrameEval, 0, NO_PARENT, 0, 0));
        let snap = ring.snapshot_range(0, 10);
        assert_eq!(snap.len(), 2);
        assert_eq!(snap[0].frame_id, 1);
        assert_eq!(snap[1].frame_id, 2);
    }

    #[test]
    fn value_record_roundtrips_num() {
        let record = ValueSummary::Num(3.5).to_record(7);
        assert_eq!(record.tag, ValueTag::Num as u8);
        assert!((record.a - 3.5).abs() < 1e-6);
        assert_eq!(record.type_id, 7);
    }

    #[test]
    fn nan_is_classified_as_err() {
        let summary = classify_f64(f64::NAN);
        assert!(matches!(summary, ValueSummary::Err(ErrKind::Nan)));
    }

    #[test]
    fn probe_history_is_bounded_and_ordered() {
        let mut rec = DebugRecorder::new(16, 16);
        let probe = rec.create_probe(ProbeTarget::Bus(crate::ident::make_bus_id("b")));
        for i in 0..300 {
            rec.record_probe_sample(probe, f64::from(i), ValueSummary::Num(f64::from(i)), 0);
        }
        let history = rec.probe_history(probe, 5);
        assert_eq!(history.len(), 5);
        assert_eq!(history.last().unwrap().0, 299.0);
    }

    #[test]
    fn binding_direction_is_implied_by_target_variant() {
        let pub_target = ProbeTarget::Publisher(crate::ident::make_publisher_id("p"));
        let sub_target = ProbeTarget::Listener(crate::ident::make_listener_id("l"));
        assert!(matches!(pub_target.direction(), Some(BindingDirection::Publish)));
        assert!(matches!(sub_target.direction(), Some(BindingDirection::Subscribe)));
    }
}
