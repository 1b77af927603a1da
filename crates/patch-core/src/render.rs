// SPDX-License-Identifier: Apache-2.0
//! The `RenderFrameIR` wire shape consumed by external 2D/3D renderers
//! (spec §6), and the `RenderTree` shape a `RenderTreeProgram` artifact
//! produces before the runtime's `renderAssemble` step flattens it.
//!
//! This module only defines data; nothing here executes. [`crate::runtime`]
//! walks a [`RenderTree`] and lowers it into a [`RenderFrameIR`].

use crate::math::{Color, Vec2};

/// How the frame buffer is cleared before any pass is drawn.
#[derive(Clone, Copy, PartialEq, Debug, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Clear {
    /// Leave the existing contents untouched.
    #[default]
    None,
    /// Fill with a solid color.
    Color(Color),
}

/// Shared header every pass carries (spec §6: "each pass has a
/// `header: { z, enabled }`").
#[derive(Clone, Copy, PartialEq, Debug)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PassHeader {
    /// Draw order; lower first.
    pub z: i32,
    /// Whether this pass is included in the frame at all.
    pub enabled: bool,
}

/// A primitive glyph drawable by an instanced 2D pass.
#[derive(Clone, PartialEq, Debug)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Glyph2D {
    /// A filled or stroked circle.
    Circle,
    /// An axis-aligned (pre-transform) rectangle.
    Rect,
    /// A star with `points` outer vertices and a given inner radius ratio.
    Star {
        /// Number of outer points.
        points: u32,
        /// Inner radius as a fraction of the outer radius.
        inner: f64,
    },
    /// An open or closed polyline.
    Polyline(Vec<Vec2>),
}

/// Fill material for an instanced pass.
#[derive(Clone, PartialEq, Debug)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Material {
    /// A single flat color.
    Solid(Color),
    /// A two-stop linear gradient.
    Gradient {
        /// Color at `t = 0`.
        from: Color,
        /// Color at `t = 1`.
        to: Color,
    },
}

/// A row-major 2D affine transform: `[a, b, c, d, tx, ty]`, applying
/// `x' = a*x + c*y + tx`, `y' = b*x + d*y + ty`.
pub type Affine2D = [f32; 6];

/// The identity affine transform.
pub const IDENTITY_AFFINE: Affine2D = [1.0, 0.0, 0.0, 1.0, 0.0, 0.0];

/// One instanced-geometry draw call: many copies of `glyph`, each with its
/// own transform and color.
#[derive(Clone, PartialEq, Debug)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Instances2D {
    /// Pass header.
    pub header: PassHeader,
    /// Per-instance affine transforms.
    pub transforms: Vec<Affine2D>,
    /// Per-instance packed colors.
    pub colors: Vec<Color>,
    /// The glyph shared by every instance in this pass.
    pub glyph: Glyph2D,
    /// Fill material.
    pub material: Material,
}

/// A post-processing effect applied to the accumulated frame so far.
#[derive(Clone, Copy, PartialEq, Debug)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum PostFxKind {
    /// Gaussian-style blur with the given radius in pixels.
    Blur(f64),
    /// Additive bloom with the given threshold and intensity.
    Bloom {
        /// Luminance threshold above which bloom contributes.
        threshold: f64,
        /// Bloom intensity multiplier.
        intensity: f64,
    },
    /// Vignette darkening toward the frame edges.
    Vignette(f64),
    /// A 3x3 color-grade matrix applied per-pixel.
    ColorGrade([f32; 9]),
}

/// A post-effects pass.
#[derive(Clone, Copy, PartialEq, Debug)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PostFx {
    /// Pass header.
    pub header: PassHeader,
    /// The effect to apply.
    pub kind: PostFxKind,
}

/// The shape of a clip region. Path-based clipping is reserved (spec §9,
/// open question a) and must report `NotImplemented` rather than silently
/// degrading.
#[derive(Clone, PartialEq, Debug)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ClipShape {
    /// An axis-aligned rectangle clip.
    Rect,
    /// A circular clip.
    Circle,
    /// Reserved: path-based clipping. Always unimplemented.
    Path,
}

/// A clip region, recursing into its own child render nodes.
#[derive(Clone, PartialEq, Debug)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ClipGroup {
    /// Pass header.
    pub header: PassHeader,
    /// Clip shape.
    pub shape: ClipShape,
    /// Transform applied to the children before clipping.
    pub transform: Affine2D,
    /// Children drawn inside the clip region.
    pub children: Vec<RenderNode>,
}

/// One node of a [`RenderTree`]: the pre-flattened form a `RenderTreeProgram`
/// signal produces for a given `t`.
#[derive(Clone, PartialEq, Debug)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum RenderNode {
    /// An instanced 2D draw call.
    Instances2D(Instances2D),
    /// A post-effects pass.
    PostFx(PostFx),
    /// A clip region with nested children.
    ClipGroup(ClipGroup),
}

impl RenderNode {
    /// The `z` order declared by this node's header.
    #[must_use]
    pub const fn z(&self) -> i32 {
        match self {
            Self::Instances2D(p) => p.header.z,
            Self::PostFx(p) => p.header.z,
            Self::ClipGroup(p) => p.header.z,
        }
    }
}

/// The tree a `RenderTreeProgram` artifact's `signal` function produces for
/// a given `(t, ctx)`, before `renderAssemble` flattens it into a
/// [`RenderFrameIR`].
pub type RenderTree = Vec<RenderNode>;

/// An overlay drawn outside the main pass stack (e.g. debug gizmos, probe
/// markers); opaque to the compiler, passed through by the runtime.
#[derive(Clone, PartialEq, Debug)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct OverlayIR {
    /// Overlay identifier, for the external renderer to key on.
    pub id: String,
    /// Overlay payload, opaque to the core (renderer-defined JSON-like
    /// content; plain text here rather than duplicating a JSON value type
    /// the core has no other use for).
    pub payload: String,
}

/// One terminal pass in a [`RenderFrameIR`], after flattening.
#[derive(Clone, PartialEq, Debug)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum PassIR {
    /// An instanced 2D draw call.
    Instances2D(Instances2D),
    /// A post-effects pass.
    PostFx(PostFx),
    /// A clip region with nested, already-flattened children.
    ClipGroup {
        /// Pass header.
        header: PassHeader,
        /// Clip shape.
        shape: ClipShape,
        /// Transform applied to children before clipping.
        transform: Affine2D,
        /// Flattened children, still nested for the renderer to apply the
        /// clip recursively.
        children: Vec<PassIR>,
    },
}

/// The per-frame output of the runtime executor (spec §6), consumed by an
/// external 2D/3D renderer.
#[derive(Clone, PartialEq, Debug)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct RenderFrameIR {
    /// How to clear the frame buffer before drawing.
    pub clear: Clear,
    /// Ordered, z-sorted passes.
    pub passes: Vec<PassIR>,
    /// Overlays, drawn after all passes.
    pub overlays: Vec<OverlayIR>,
}

impl RenderFrameIR {
    /// An empty frame: clears to nothing, draws nothing.
    #[must_use]
    pub const fn empty() -> Self {
        Self {
            clear: Clear::None,
            passes: Vec::new(),
            overlays: Vec::new(),
        }
    }
}

/// Flattens a [`RenderTree`] into ordered [`PassIR`]s, stable-sorting
/// siblings by `z` (spec §4.6, `renderAssemble`).
#[must_use]
pub fn assemble(tree: &RenderTree) -> Vec<PassIR> {
    let mut nodes: Vec<&RenderNode> = tree.iter().collect();
    nodes.sort_by_key(|n| n.z());
    nodes.iter().map(|n| flatten_node(n)).collect()
}

fn flatten_node(node: &RenderNode) -> PassIR {
    match node {
        RenderNode::Instances2D(p) => PassIR::Instances2D(p.clone()),
        RenderNode::PostFx(p) => PassIR::PostFx(*p),
        RenderNode::ClipGroup(g) => {
            let mut children: Vec<&RenderNode> = g.children.iter().collect();
            children.sort_by_key(|n| n.z());
            PassIR::ClipGroup {
                header: g.header,
                shape: g.shape.clone(),
                transform: g.transform,
                children: children.iter().map(|n| flatten_node(n)).collect(),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn instances(z: i32) -> RenderNode {
        RenderNode::Instances2D(Instances2D {
            header: PassHeader { z, enabled: true },
            transforms: vec![IDENTITY_AFFINE],
            colors: vec![Color::BLACK],
            glyph: Glyph2D::Circle,
            material: Material::Solid(Color::BLACK),
        })
    }

    #[test]
    fn assemble_sorts_by_z() {
        let tree = vec![instances(5), instances(1), instances(3)];
        let passes = assemble(&tree);
        let zs: Vec<i32> = passes
            .iter()
            .map(|p| match p {
                PassIR::Instances2D(i) => i.header.z,
                _ => unreachable!(),
            })
            .collect();
        assert_eq!(zs, vec![1, 3, 5]);
    }
}
