// SPDX-License-Identifier: Apache-2.0
//! Extrusion geometry for mesh-producing blocks (spec §6: "Extrude
//! recipe"). Pure geometry generation, no rendering: a block kind's
//! compile function calls [`extrude`] once and hands the result to
//! [`crate::ir::IrBuilder::push_mesh`].
//!
//! Caching note: extruded mesh buffers use the `untilInvalidated` tier
//! (spec §3, "Caching"), which this crate realizes trivially — geometry is
//! generated once during [`crate::compiler::compile`] and baked into the
//! immutable [`crate::ir::Ir`], so it is never recomputed without a full
//! recompile.

use thiserror::Error;

use crate::math::Vec2;

/// The 2D cross-section swept along the extrusion axis.
#[derive(Clone, Debug)]
pub enum Profile {
    /// A regular circle, tessellated into `segs` points.
    Circle {
        /// Radius.
        r: f64,
        /// Tessellation segment count.
        segs: u32,
    },
    /// A regular polygon with `sides` vertices circumscribed by radius `r`.
    Ngon {
        /// Vertex count.
        sides: u32,
        /// Circumscribing radius.
        r: f64,
    },
    /// An explicit polyline, optionally closed into a loop.
    Polyline {
        /// Ring points, in winding order.
        points: Vec<Vec2>,
        /// Whether the last point connects back to the first.
        closed: bool,
    },
}

/// Which ends of the extrusion get cap geometry.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Cap {
    /// Both ends capped.
    Both,
    /// Only the front (z = 0) end capped.
    Front,
    /// Only the back (z = depth) end capped.
    Back,
    /// Neither end capped (an open tube).
    None,
}

impl Cap {
    const fn wants_front(self) -> bool {
        matches!(self, Self::Both | Self::Front)
    }

    const fn wants_back(self) -> bool {
        matches!(self, Self::Both | Self::Back)
    }
}

/// How the profile is swept along the extrusion axis.
#[derive(Clone, Copy, Debug)]
pub enum Extrude {
    /// A straight sweep to `depth`, with optional end caps.
    Linear {
        /// Sweep distance along +z.
        depth: f64,
        /// End-cap selection.
        cap: Cap,
    },
    /// A sweep with the side-to-cap transition rounded over `round_segs`
    /// extra rings of radius `r`, rather than meeting at a hard edge
    /// (spec §9, open question c: "a faithful implementation must
    /// generate the curved edge segments").
    Rounded {
        /// Sweep distance along +z, measured cap-to-cap (the straight
        /// section between the two rounds is `depth - 2*r`, clamped to 0).
        depth: f64,
        /// Rounding tessellation per edge.
        round_segs: u32,
        /// Rounding radius.
        r: f64,
    },
}

/// A complete extrusion request (spec §6: "Extrude recipe").
#[derive(Clone, Debug)]
pub struct ExtrudeRecipe {
    /// Cross-section.
    pub profile: Profile,
    /// Sweep.
    pub extrude: Extrude,
}

/// Declared index width, checked against the actual vertex count.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum IndexType {
    /// 16-bit indices; fatal if the mesh exceeds 65 535 vertices.
    U16,
    /// 32-bit indices.
    U32,
}

/// The generated index buffer, narrowed to `u16` when the vertex count
/// allows it (spec §6: "Index buffer is `u16` if vertex count <= 65535
/// else `u32`").
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum IndexBuffer {
    /// Narrow indices.
    U16(Vec<u16>),
    /// Wide indices.
    U32(Vec<u32>),
}

impl IndexBuffer {
    /// Number of indices, regardless of width.
    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            Self::U16(v) => v.len(),
            Self::U32(v) => v.len(),
        }
    }

    /// `true` if there are no indices.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Generated vertex/index buffers for one extrusion.
#[derive(Clone, Debug, PartialEq)]
pub struct MeshBuffers {
    /// Vertex positions.
    pub positions: Vec<[f32; 3]>,
    /// Per-vertex outward normals, one per position.
    pub normals: Vec<[f32; 3]>,
    /// Triangle indices, three per triangle.
    pub indices: IndexBuffer,
}

impl MeshBuffers {
    /// Vertex count.
    #[must_use]
    pub fn vertex_count(&self) -> usize {
        self.positions.len()
    }
}

/// Failures generating an extrusion (spec §6: "exceeding `u16` with
/// `indexType='u16'` declared is a fatal `Error`").
#[derive(Debug, Clone, Error)]
pub enum MeshError {
    /// The vertex count exceeded 65 535 while `u16` indices were declared.
    #[error("mesh has {vertex_count} vertices but u16 indices were declared (max 65535)")]
    IndexOverflow {
        /// Actual vertex count.
        vertex_count: usize,
    },
    /// A profile had fewer than 3 points, which cannot be extruded or
    /// capped.
    #[error("profile has {point_count} point(s); at least 3 are required")]
    DegenerateProfile {
        /// Actual point count.
        point_count: usize,
    },
}

fn profile_points(profile: &Profile) -> Vec<Vec2> {
    match profile {
        Profile::Circle { r, segs } => {
            let segs = (*segs).max(3);
            (0..segs)
                .map(|i| {
                    let a = std::f64::consts::TAU * f64::from(i) / f64::from(segs);
                    Vec2::new(r * a.cos(), r * a.sin())
                })
                .collect()
        }
        Profile::Ngon { sides, r } => {
            let sides = (*sides).max(3);
            (0..sides)
                .map(|i| {
                    let a = std::f64::consts::TAU * f64::from(i) / f64::from(sides);
                    Vec2::new(r * a.cos(), r * a.sin())
                })
                .collect()
        }
        Profile::Polyline { points, .. } => points.clone(),
    }
}

#[allow(clippy::cast_possible_truncation)]
fn to_f32_pos(p: Vec2, z: f64) -> [f32; 3] {
    [p.x as f32, p.y as f32, z as f32]
}

#[allow(clippy::cast_possible_truncation)]
fn ring_outward_normals(points: &[Vec2]) -> Vec<[f32; 3]> {
    points
        .iter()
        .map(|p| {
            let len = (p.x * p.x + p.y * p.y).sqrt();
            if len < f64::EPSILON {
                [0.0, 0.0, 0.0]
            } else {
                [(p.x / len) as f32, (p.y / len) as f32, 0.0]
            }
        })
        .collect()
}

/// Appends a side wall connecting `front` (at `z_front`) to `back` (at
/// `z_back`), each a full copy of `ring`, to `positions`/`normals`/`tris`.
#[allow(clippy::too_many_arguments)]
fn push_side_wall(
    ring: &[Vec2],
    z_front: f64,
    z_back: f64,
    closed: bool,
    positions: &mut Vec<[f32; 3]>,
    normals: &mut Vec<[f32; 3]>,
    tris: &mut Vec<u32>,
) {
    let n = ring.len();
    let base = u32::try_from(positions.len()).unwrap_or(u32::MAX);
    let outward = ring_outward_normals(ring);
    for p in ring {
        positions.push(to_f32_pos(*p, z_front));
    }
    for p in ring {
        positions.push(to_f32_pos(*p, z_back));
    }
    normals.extend_from_slice(&outward);
    normals.extend_from_slice(&outward);

    let edges = if closed { n } else { n - 1 };
    for i in 0..edges {
        let j = (i + 1) % n;
        let fi = base + u32::try_from(i).unwrap_or(u32::MAX);
        let fj = base + u32::try_from(j).unwrap_or(u32::MAX);
        let bi = fi + u32::try_from(n).unwrap_or(u32::MAX);
        let bj = fj + u32::try_from(n).unwrap_or(u32::MAX);
        tris.extend_from_slice(&[fi, fj, bj, fi, bj, bi]);
    }
}

/// Appends a fan-triangulated cap using its own vertex copy of `ring` (so
/// cap normals don't share vertices with the side wall), flat-facing
/// `+z` if `facing_back` else `-z`.
fn push_cap(
    ring: &[Vec2],
    z: f64,
    facing_back: bool,
    positions: &mut Vec<[f32; 3]>,
    normals: &mut Vec<[f32; 3]>,
    tris: &mut Vec<u32>,
) {
    let n = ring.len();
    let base = u32::try_from(positions.len()).unwrap_or(u32::MAX);
    let normal: [f32; 3] = if facing_back { [0.0, 0.0, 1.0] } else { [0.0, 0.0, -1.0] };
    for p in ring {
        positions.push(to_f32_pos(*p, z));
        normals.push(normal);
    }
    for i in 1..n.saturating_sub(1) {
        let a = base;
        let (b, c) = if facing_back {
            (base + u32::try_from(i).unwrap_or(u32::MAX), base + u32::try_from(i + 1).unwrap_or(u32::MAX))
        } else {
            (base + u32::try_from(i + 1).unwrap_or(u32::MAX), base + u32::try_from(i).unwrap_or(u32::MAX))
        };
        tris.extend_from_slice(&[a, b, c]);
    }
}

fn linear_extrude(ring: &[Vec2], closed: bool, depth: f64, cap: Cap, positions: &mut Vec<[f32; 3]>, normals: &mut Vec<[f32; 3]>, tris: &mut Vec<u32>) {
    push_side_wall(ring, 0.0, depth, closed, positions, normals, tris);
    if closed && cap.wants_front() {
        push_cap(ring, 0.0, false, positions, normals, tris);
    }
    if closed && cap.wants_back() {
        push_cap(ring, depth, true, positions, normals, tris);
    }
}

/// Generates the rounded transition rings between a side wall and a flat
/// cap at `z_cap`, stepping the ring radius by `cos`/outward offset by
/// `1 - cos` and the z offset by `sin`, a quarter-torus profile scaled by
/// `r`; `towards_back` selects which direction the round sweeps away from
/// the flat cap.
#[allow(clippy::cast_possible_truncation, clippy::too_many_arguments)]
fn push_round(
    ring: &[Vec2],
    z_cap: f64,
    r: f64,
    round_segs: u32,
    towards_back: bool,
    positions: &mut Vec<[f32; 3]>,
    normals: &mut Vec<[f32; 3]>,
    tris: &mut Vec<u32>,
) {
    let n = ring.len();
    let round_segs = round_segs.max(1);
    let sign = if towards_back { 1.0 } else { -1.0 };
    let outward = ring_outward_normals(ring);

    let mut prev_base: Option<u32> = None;
    for step in 0..=round_segs {
        let angle = std::f64::consts::FRAC_PI_2 * f64::from(step) / f64::from(round_segs);
        let (sin_a, cos_a) = angle.sin_cos();
        let inset = r * (1.0 - cos_a);
        let z = z_cap + sign * r * sin_a;

        let base = u32::try_from(positions.len()).unwrap_or(u32::MAX);
        for (p, n_out) in ring.iter().zip(outward.iter()) {
            let len = (p.x * p.x + p.y * p.y).sqrt();
            let scale = if len < f64::EPSILON { 1.0 } else { (len - inset).max(0.0) / len };
            positions.push(to_f32_pos(Vec2::new(p.x * scale, p.y * scale), z));
            normals.push([n_out[0] * cos_a as f32, n_out[1] * cos_a as f32, -sign as f32 * sin_a as f32]);
        }

        if let Some(prev) = prev_base {
            for i in 0..n {
                let j = (i + 1) % n;
                let fi = prev + u32::try_from(i).unwrap_or(u32::MAX);
                let fj = prev + u32::try_from(j).unwrap_or(u32::MAX);
                let bi = base + u32::try_from(i).unwrap_or(u32::MAX);
                let bj = base + u32::try_from(j).unwrap_or(u32::MAX);
                tris.extend_from_slice(&[fi, fj, bj, fi, bj, bi]);
            }
        }
        prev_base = Some(base);
    }
}

#[allow(clippy::too_many_arguments)]
fn rounded_extrude(
    ring: &[Vec2],
    closed: bool,
    depth: f64,
    round_segs: u32,
    r: f64,
    positions: &mut Vec<[f32; 3]>,
    normals: &mut Vec<[f32; 3]>,
    tris: &mut Vec<u32>,
) {
    let straight = (depth - 2.0 * r).max(0.0);
    push_round(ring, 0.0, r, round_segs, false, positions, normals, tris);
    push_side_wall(ring, r, r + straight, closed, positions, normals, tris);
    push_round(ring, r + straight, r, round_segs, true, positions, normals, tris);
    if closed {
        push_cap(ring, 0.0, false, positions, normals, tris);
        push_cap(ring, depth, true, positions, normals, tris);
    }
}

/// Generates vertex/index buffers for `recipe`, narrowing the index
/// buffer to `u16` when possible.
///
/// # Errors
/// Returns [`MeshError::DegenerateProfile`] if the profile has fewer than
/// 3 points, or [`MeshError::IndexOverflow`] if `declared` is
/// [`IndexType::U16`] but the generated mesh exceeds 65 535 vertices.
pub fn extrude(recipe: &ExtrudeRecipe, declared: Option<IndexType>) -> Result<MeshBuffers, MeshError> {
    let ring = profile_points(&recipe.profile);
    if ring.len() < 3 {
        return Err(MeshError::DegenerateProfile { point_count: ring.len() });
    }
    let closed = !matches!(&recipe.profile, Profile::Polyline { closed: false, .. });

    let mut positions = Vec::new();
    let mut normals = Vec::new();
    let mut tris: Vec<u32> = Vec::new();

    match recipe.extrude {
        Extrude::Linear { depth, cap } => linear_extrude(&ring, closed, depth, cap, &mut positions, &mut normals, &mut tris),
        Extrude::Rounded { depth, round_segs, r } => {
            rounded_extrude(&ring, closed, depth, round_segs, r, &mut positions, &mut normals, &mut tris);
        }
    }

    let vertex_count = positions.len();
    if matches!(declared, Some(IndexType::U16)) && vertex_count > usize::from(u16::MAX) {
        return Err(MeshError::IndexOverflow { vertex_count });
    }
    let indices = if vertex_count <= usize::from(u16::MAX) {
        narrow_indices(&tris)
    } else {
        IndexBuffer::U32(tris)
    };

    Ok(MeshBuffers { positions, normals, indices })
}

#[allow(clippy::cast_possible_truncation)]
fn narrow_indices(tris: &[u32]) -> IndexBuffer {
    IndexBuffer::U16(tris.iter().map(|&i| i as u16).collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn linear_extrude_circle_cap_both_yields_32_vertices() {
        let recipe = ExtrudeRecipe {
            profile: Profile::Circle { r: 1.0, segs: 8 },
            extrude: Extrude::Linear { depth: 2.0, cap: Cap::Both },
        };
        let mesh = extrude(&recipe, None).unwrap();
        assert_eq!(mesh.vertex_count(), 32);
    }

    #[test]
    fn linear_extrude_circle_cap_none_yields_16_vertices() {
        let recipe = ExtrudeRecipe {
            profile: Profile::Circle { r: 1.0, segs: 8 },
            extrude: Extrude::Linear { depth: 2.0, cap: Cap::None },
        };
        let mesh = extrude(&recipe, None).unwrap();
        assert_eq!(mesh.vertex_count(), 16);
    }

    #[test]
    fn declared_u16_overflow_is_fatal() {
        let recipe = ExtrudeRecipe {
            profile: Profile::Ngon { sides: 40_000, r: 1.0 },
            extrude: Extrude::Linear { depth: 1.0, cap: Cap::None },
        };
        let err = extrude(&recipe, Some(IndexType::U16)).unwrap_err();
        assert!(matches!(err, MeshError::IndexOverflow { .. }));
    }

    #[test]
    fn rounded_extrude_adds_vertices_beyond_linear() {
        let linear = ExtrudeRecipe {
            profile: Profile::Circle { r: 1.0, segs: 8 },
            extrude: Extrude::Linear { depth: 2.0, cap: Cap::Both },
        };
        let rounded = ExtrudeRecipe {
            profile: Profile::Circle { r: 1.0, segs: 8 },
            extrude: Extrude::Rounded { depth: 2.0, round_segs: 3, r: 0.2 },
        };
        let linear_mesh = extrude(&linear, None).unwrap();
        let rounded_mesh = extrude(&rounded, None).unwrap();
        assert!(
            rounded_mesh.vertex_count() > linear_mesh.vertex_count(),
            "a faithful rounded extrude must not degenerate to the linear vertex count"
        );
    }

    #[test]
    fn open_polyline_has_no_caps() {
        let recipe = ExtrudeRecipe {
            profile: Profile::Polyline {
                points: vec![Vec2::new(0.0, 0.0), Vec2::new(1.0, 0.0), Vec2::new(1.0, 1.0)],
                closed: false,
            },
            extrude: Extrude::Linear { depth: 1.0, cap: Cap::Both },
        };
        let mesh = extrude(&recipe, None).unwrap();
        // open polyline: side wall only, 2 edges * 2 verts/edge-endpoint-ring = 2*3 = 6
        assert_eq!(mesh.vertex_count(), 6);
    }

    #[test]
    fn degenerate_profile_is_rejected() {
        let recipe = ExtrudeRecipe {
            profile: Profile::Polyline { points: vec![Vec2::ZERO, Vec2::new(1.0, 0.0)], closed: true },
            extrude: Extrude::Linear { depth: 1.0, cap: Cap::Both },
        };
        assert!(matches!(extrude(&recipe, None), Err(MeshError::DegenerateProfile { point_count: 2 })));
    }
}
