// SPDX-License-Identifier: Apache-2.0
//! Deterministic compile-and-execute pipeline for patch-graph animations.
//!
//! A `Patch` — blocks, wires and buses connected by type adapters and
//! parameterized lenses — compiles once into an immutable [`ir::Ir`], which
//! [`runtime`] then executes frame-by-frame into a [`render::RenderFrameIR`]
//! for an external 2D/3D renderer to draw. Compilation and execution are
//! both pure functions of their inputs: same patch, same seed, same `t`
//! always produces the same output.
//!
//! ```text
//! Patch ──(bus)──► effective artifacts ──(graph compiler)──► Ir ──(runtime)──► RenderFrameIR
//! ```
//!
//! Module map:
//!
//! - [`ident`] — content-addressed ids for blocks, buses, publishers and
//!   listeners, and the interned [`ident::TransformId`].
//! - [`math`] — deterministic scalar/vector/color primitives.
//! - [`artifact`] — the closed [`artifact::Artifact`] value algebra (C1).
//! - [`render`] — the `RenderTree` / `RenderFrameIR` wire shapes (§6).
//! - [`registry`] — the Transform Registry (C2).
//! - [`resolver`] — the Parameter Resolver (C3).
//! - [`patch`] — the `Patch` authoring model (blocks, wires, buses).
//! - [`bus`] — the Bus-Aware Compiler's bus half (C4).
//! - [`compiler`] — the Graph Compiler (C5).
//! - [`ir`] — the IR Builder and the immutable [`ir::Ir`] (C6).
//! - [`runtime`] — the Deterministic Runtime Executor (C7).
//! - [`debug`] — the allocation-free Debug/Telemetry Core (C8).
//! - [`stdlib`] — built-in adapters and lenses registered by default.
//! - [`mesh`] — extrusion geometry for mesh-producing blocks.

pub mod artifact;
pub mod bus;
pub mod compiler;
pub mod debug;
pub mod ident;
pub mod ir;
pub mod math;
pub mod mesh;
pub mod patch;
pub mod registry;
pub mod render;
pub mod resolver;
pub mod runtime;
pub mod stdlib;

pub use artifact::{Artifact, ArtifactKind, RuntimeCtx, Viewport};
pub use compiler::{compile, CompileError, CompileOutcome};
pub use ir::Ir;
pub use registry::Registry;
pub use runtime::{execute_frame, RuntimeConfig, RuntimeError, RuntimeState};
