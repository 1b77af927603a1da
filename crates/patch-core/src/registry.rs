// SPDX-License-Identifier: Apache-2.0
//! The Transform Registry (C2): a process-wide catalog of type-converting
//! *adapters* and type-preserving *lenses* (spec §4.1).
//!
//! Shaped the way the teacher's [`crate`]-external `CodecRegistry`
//! (`attachment.rs`) separates registration-time validation from a
//! read-only lookup surface, except here the registry is sealed through an
//! explicit builder rather than accepting new entries for its whole
//! lifetime — matching spec §5's "transform registry is read-only after
//! startup".

use std::collections::BTreeMap;
use std::sync::Arc;

use indexmap::IndexMap;
use thiserror::Error;

use crate::artifact::{Artifact, ArtifactKind, RuntimeCtx};
use crate::ident::TransformId;
use crate::ir::{IrBuilder, ValueRefPacked};

/// Whether a transform converts between types (`Adapter`) or preserves
/// type (`Lens`).
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum TransformKind {
    /// A type-converting transform.
    Adapter,
    /// A type-preserving, parameterized transform.
    Lens,
}

/// How aggressively the graph compiler is allowed to insert an adapter
/// automatically (spec §4.1, §4.4 step 5).
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum AdapterPolicy {
    /// Inserted automatically without surfacing anything to the user.
    Auto,
    /// A valid path exists but is reported to the user as a warning
    /// rather than inserted silently.
    Suggest,
    /// Never inserted automatically; the user must add it explicitly.
    Explicit,
}

/// Whether a lens is safe to re-evaluate while scrubbing time backward, or
/// only meaningful during forward playback.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum StabilityHint {
    /// Safe to evaluate at any `t`, including scrubbing backward.
    ScrubSafe,
    /// Only meaningful under monotonically increasing `t` (e.g. triggers
    /// that depend on edge detection across frames).
    TransportOnly,
    /// No constraint.
    Either,
}

/// The scopes a lens is allowed to attach to (spec §4.1, §4.3: listener
/// lenses see post-combine values, publisher lenses see pre-combine
/// values).
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Debug)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Scope {
    /// Attached to a single wire.
    Wire,
    /// Attached to a bus publisher.
    Publisher,
    /// Attached to a bus listener.
    Listener,
    /// Used as a lens parameter binding.
    LensParam,
}

/// A declared parameter of a lens (spec §4.1: "`params: name -> { type,
/// default, uiHint, rangeHint? }`").
#[derive(Clone, Debug)]
pub struct ParamSpec {
    /// Parameter name.
    pub name: String,
    /// Expected artifact kind once resolved.
    pub kind: ArtifactKind,
    /// Default literal value, lifted by [`crate::resolver`] when no
    /// binding is supplied.
    pub default: crate::artifact::ScalarValue,
    /// Editor UI hint (slider, color picker, ...), opaque to the core.
    pub ui_hint: Option<String>,
    /// Optional numeric range hint for UI sliders.
    pub range_hint: Option<(f64, f64)>,
}

/// Parameters resolved by [`crate::resolver`], keyed by [`ParamSpec::name`].
/// A `BTreeMap` so that any code that does iterate it (debug export,
/// snapshot tests) sees a stable order.
pub type ResolvedParams = BTreeMap<String, Artifact>;

/// A transform's runtime implementation: applies resolved parameters to an
/// input artifact and produces an output artifact.
pub type ApplyFn = Arc<dyn Fn(&Artifact, &ResolvedParams, &RuntimeCtx) -> Artifact + Send + Sync>;

/// A transform's IR-lowering implementation. Returns `None` to signal that
/// this transform cannot be lowered and must fall back to [`ApplyFn`] at
/// execution time (spec §9, "IR fallback path").
pub type CompileToIrFn = Arc<
    dyn Fn(ValueRefPacked, &[ValueRefPacked], &mut IrBuilder) -> Option<ValueRefPacked>
        + Send
        + Sync,
>;

/// The full declaration of one adapter or lens (spec §4.1).
pub struct TransformDef {
    /// Canonical (non-alias) id.
    pub id: TransformId,
    /// Adapter or lens.
    pub kind: TransformKind,
    /// Concrete input type. `None` means "same as output" (lenses only).
    pub input_type: Option<ArtifactKind>,
    /// Concrete output type. `None` means "same as input" (lenses only).
    pub output_type: Option<ArtifactKind>,
    /// Whether a lens with an explicit (non-`same`) type was deliberately
    /// flagged as such at registration (spec §4.1: "validates ... that
    /// lenses with explicit types are flagged").
    pub explicit_type: bool,
    /// Lens-only: the value domain it operates over (`float`, `vec2`,
    /// `color`, ...).
    pub domain: Option<ArtifactKind>,
    /// Lens-only: scopes this lens may attach to.
    pub allowed_scopes: Vec<Scope>,
    /// Lens-only: declared parameters.
    pub params: Vec<ParamSpec>,
    /// Lens-only: relative evaluation cost, for UI and scheduling hints.
    pub cost_hint: Option<f64>,
    /// Lens-only: scrub-safety classification.
    pub stability_hint: Option<StabilityHint>,
    /// Adapter-only: how aggressively it may be auto-inserted.
    pub policy: Option<AdapterPolicy>,
    /// Adapter-only: non-negative cost used to rank candidate adapters.
    pub cost: Option<f64>,
    /// Runtime closure implementation.
    pub apply: Option<ApplyFn>,
    /// IR-lowering implementation.
    pub compile_to_ir: Option<CompileToIrFn>,
}

impl std::fmt::Debug for TransformDef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransformDef")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("input_type", &self.input_type)
            .field("output_type", &self.output_type)
            .field("domain", &self.domain)
            .finish_non_exhaustive()
    }
}

/// Errors raised while registering transforms. Registration errors are
/// fatal at startup (spec §4.1).
#[derive(Debug, Error)]
pub enum RegistryError {
    /// Two transforms were registered under the same canonical id.
    #[error("duplicate transform id: {0:?}")]
    DuplicateTransformId(TransformId),
    /// An adapter declared `input_type`/`output_type` as `same`
    /// (i.e. left unset), which is only valid for lenses.
    #[error("adapter {0:?} must declare concrete input/output types")]
    AdapterDeclaresSameType(TransformId),
    /// A lens declared an explicit (non-`same`) type without setting
    /// `explicit_type`.
    #[error("lens {0:?} declares an explicit type but is not flagged explicit_type")]
    LensMissingExplicitTypeFlag(TransformId),
    /// An alias was registered pointing at an id that is not (yet)
    /// registered.
    #[error("alias target not registered: {0:?}")]
    UnknownAliasTarget(TransformId),
}

/// Builder-phase registration surface; consumed by [`RegistryBuilder::seal`]
/// into a read-only [`Registry`] (spec §5: "global registry with explicit
/// lifecycle").
#[derive(Default)]
pub struct RegistryBuilder {
    defs: IndexMap<TransformId, Arc<TransformDef>>,
    aliases: IndexMap<TransformId, TransformId>,
}

impl RegistryBuilder {
    /// Starts an empty builder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a transform definition.
    ///
    /// # Errors
    /// Returns [`RegistryError::DuplicateTransformId`] if `def.id` is
    /// already registered, [`RegistryError::AdapterDeclaresSameType`] if
    /// an adapter omits a concrete input or output type, or
    /// [`RegistryError::LensMissingExplicitTypeFlag`] if a lens declares
    /// an explicit type without the flag.
    pub fn register(&mut self, def: TransformDef) -> Result<(), RegistryError> {
        if self.defs.contains_key(&def.id) {
            return Err(RegistryError::DuplicateTransformId(def.id));
        }
        match def.kind {
            TransformKind::Adapter => {
                if def.input_type.is_none() || def.output_type.is_none() {
                    return Err(RegistryError::AdapterDeclaresSameType(def.id));
                }
            }
            TransformKind::Lens => {
                let has_explicit_type = def.input_type.is_some() || def.output_type.is_some();
                if has_explicit_type && !def.explicit_type {
                    return Err(RegistryError::LensMissingExplicitTypeFlag(def.id));
                }
            }
        }
        self.defs.insert(def.id.clone(), Arc::new(def));
        Ok(())
    }

    /// Registers a legacy alias resolving to an already-registered
    /// canonical id (spec §6: "Legacy PascalCase IDs ... resolve through
    /// the alias table").
    ///
    /// # Errors
    /// Returns [`RegistryError::UnknownAliasTarget`] if `canonical` is not
    /// yet registered.
    pub fn alias(&mut self, legacy: TransformId, canonical: TransformId) -> Result<(), RegistryError> {
        if !self.defs.contains_key(&canonical) {
            return Err(RegistryError::UnknownAliasTarget(canonical));
        }
        self.aliases.insert(legacy, canonical);
        Ok(())
    }

    /// Consumes the builder, freezing it into a read-only [`Registry`].
    #[must_use]
    pub fn seal(self) -> Registry {
        Registry {
            defs: self.defs,
            aliases: self.aliases,
        }
    }
}

/// The sealed, read-only Transform Registry.
pub struct Registry {
    defs: IndexMap<TransformId, Arc<TransformDef>>,
    aliases: IndexMap<TransformId, TransformId>,
}

impl Registry {
    /// Resolves `id` through the alias table and returns its definition,
    /// or `None` if unknown (spec §4.1).
    #[must_use]
    pub fn get(&self, id: &TransformId) -> Option<Arc<TransformDef>> {
        let canonical = self.aliases.get(id).unwrap_or(id);
        self.defs.get(canonical).cloned()
    }

    /// All registered adapters, in stable (insertion) order (spec §4.1:
    /// "enumeration orders ... must be stable").
    #[must_use]
    pub fn all_adapters(&self) -> Vec<Arc<TransformDef>> {
        self.defs
            .values()
            .filter(|d| d.kind == TransformKind::Adapter)
            .cloned()
            .collect()
    }

    /// All registered lenses, in stable (insertion) order.
    #[must_use]
    pub fn all_lenses(&self) -> Vec<Arc<TransformDef>> {
        self.defs
            .values()
            .filter(|d| d.kind == TransformKind::Lens)
            .cloned()
            .collect()
    }

    /// Adapters whose declared `(input_type, output_type)` exactly matches
    /// `(from, to)`, ordered by ascending `cost` with ties broken
    /// lexicographically by id (spec §4.1; §8, testable property 10).
    #[must_use]
    pub fn find_adapters(&self, from: ArtifactKind, to: ArtifactKind) -> Vec<Arc<TransformDef>> {
        let mut matches: Vec<Arc<TransformDef>> = self
            .all_adapters()
            .into_iter()
            .filter(|d| d.input_type == Some(from) && d.output_type == Some(to))
            .collect();
        matches.sort_by(|a, b| {
            let ca = a.cost.unwrap_or(0.0);
            let cb = b.cost.unwrap_or(0.0);
            ca.partial_cmp(&cb)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.id.cmp(&b.id))
        });
        matches
    }

    /// Lenses declared over `domain`, optionally filtered to those
    /// allowing `scope`.
    #[must_use]
    pub fn lenses_for_domain(&self, domain: ArtifactKind, scope: Option<Scope>) -> Vec<Arc<TransformDef>> {
        self.all_lenses()
            .into_iter()
            .filter(|d| d.domain == Some(domain))
            .filter(|d| scope.is_none_or(|s| d.allowed_scopes.contains(&s)))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn adapter(id: &str, from: ArtifactKind, to: ArtifactKind, cost: f64) -> TransformDef {
        TransformDef {
            id: TransformId::new(id),
            kind: TransformKind::Adapter,
            input_type: Some(from),
            output_type: Some(to),
            explicit_type: false,
            domain: None,
            allowed_scopes: Vec::new(),
            params: Vec::new(),
            cost_hint: None,
            stability_hint: None,
            policy: Some(AdapterPolicy::Auto),
            cost: Some(cost),
            apply: None,
            compile_to_ir: None,
        }
    }

    #[test]
    fn register_rejects_duplicates() {
        let mut b = RegistryBuilder::new();
        b.register(adapter("a", ArtifactKind::ScalarFloat, ArtifactKind::SignalFloat, 1.0))
            .unwrap();
        let err = b
            .register(adapter("a", ArtifactKind::ScalarFloat, ArtifactKind::SignalFloat, 1.0))
            .unwrap_err();
        assert!(matches!(err, RegistryError::DuplicateTransformId(_)));
    }

    #[test]
    fn register_rejects_adapter_without_concrete_types() {
        let mut b = RegistryBuilder::new();
        let mut def = adapter("a", ArtifactKind::ScalarFloat, ArtifactKind::SignalFloat, 1.0);
        def.output_type = None;
        assert!(matches!(
            b.register(def),
            Err(RegistryError::AdapterDeclaresSameType(_))
        ));
    }

    #[test]
    fn find_adapters_sorts_by_cost_then_lex_id() {
        let mut b = RegistryBuilder::new();
        b.register(adapter("zeta", ArtifactKind::ScalarFloat, ArtifactKind::SignalFloat, 1.0))
            .unwrap();
        b.register(adapter("alpha", ArtifactKind::ScalarFloat, ArtifactKind::SignalFloat, 1.0))
            .unwrap();
        b.register(adapter("cheap", ArtifactKind::ScalarFloat, ArtifactKind::SignalFloat, 0.5))
            .unwrap();
        let reg = b.seal();
        let found = reg.find_adapters(ArtifactKind::ScalarFloat, ArtifactKind::SignalFloat);
        let ids: Vec<&str> = found.iter().map(|d| d.id.as_str()).collect();
        assert_eq!(ids, vec!["cheap", "alpha", "zeta"]);
    }

    #[test]
    fn alias_resolves_to_canonical() {
        let mut b = RegistryBuilder::new();
        b.register(adapter("scale", ArtifactKind::ScalarFloat, ArtifactKind::SignalFloat, 1.0))
            .unwrap();
        b.alias(TransformId::new("Scale"), TransformId::new("scale")).unwrap();
        let reg = b.seal();
        let a = reg.get(&TransformId::new("scale")).unwrap();
        let b2 = reg.get(&TransformId::new("Scale")).unwrap();
        assert_eq!(a.id, b2.id);
    }

    #[test]
    fn alias_to_unknown_target_fails() {
        let mut b = RegistryBuilder::new();
        let err = b
            .alias(TransformId::new("Old"), TransformId::new("missing"))
            .unwrap_err();
        assert!(matches!(err, RegistryError::UnknownAliasTarget(_)));
    }
}
