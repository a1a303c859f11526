use glam::Vec3;

use crate::rng::Rng;
use crate::scene::{TriData, TriVerts};
use crate::util;

/// Emission magnitude below which a triangle neither enters the light table
/// nor counts as an emitter at a hit. Filters out near-black emissive values
/// and degenerate faces.
pub const EMISSIVE_MIN: f32 = 1e-3;

/// Area-weighted CDF over the solid emissive triangles of the scene.
/// Triangle indices refer to the reordered (leaf-contiguous) arrays.
#[derive(Default)]
pub struct LightTable {
    indices: Vec<u32>,
    cdf: Vec<f32>,
    total_area: f32,
}

impl LightTable {
    pub fn build(tri_data: &[TriData]) -> LightTable {
        let mut indices = Vec::new();
        let mut cdf = Vec::new();
        let mut total_area = 0.0f32;

        for (i, data) in tri_data.iter().enumerate() {
            if data.emissive.length() > EMISSIVE_MIN {
                indices.push(i as u32);
                total_area += data.area;
                cdf.push(total_area);
            }
        }

        if total_area > 0.0 {
            for c in cdf.iter_mut() {
                *c /= total_area;
            }
        }

        LightTable {
            indices,
            cdf,
            total_area,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }

    pub fn total_area(&self) -> f32 {
        self.total_area
    }

    /// Picks a triangle with probability proportional to its area share,
    /// then a uniform point on it. Returns (triangle index, point).
    pub fn sample_point(&self, tri_verts: &[TriVerts], rng: &mut Rng) -> (u32, Vec3) {
        let u = rng.next_f32();
        let slot = self
            .cdf
            .partition_point(|&c| c < u)
            .min(self.indices.len() - 1);
        let tri = self.indices[slot];

        let verts = &tri_verts[tri as usize];
        let point = util::sample_triangle(
            verts.v0,
            verts.v1,
            verts.v2,
            rng.next_f32(),
            rng.next_f32(),
        );
        (tri, point)
    }
}
