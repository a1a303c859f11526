use bytemuck::{Pod, Zeroable};
use glam::Vec3;

/// Axis-aligned bounding box. `Pod` so the BVH node array can be bound by a
/// GPU backend without repacking.
#[repr(C)]
#[derive(Clone, Copy, PartialEq, Debug, Pod, Zeroable)]
pub struct Aabb {
    pub min: Vec3,
    pub max: Vec3,
}

impl Default for Aabb {
    fn default() -> Self {
        Self::EMPTY
    }
}

impl Aabb {
    /// Empty box: grows correctly from either side.
    pub const EMPTY: Aabb = Aabb {
        min: Vec3::splat(f32::INFINITY),
        max: Vec3::splat(f32::NEG_INFINITY),
    };

    pub fn from_points(points: &[Vec3]) -> Aabb {
        let mut aabb = Aabb::EMPTY;
        for &p in points {
            aabb.grow(p);
        }
        aabb
    }

    pub fn grow(&mut self, p: Vec3) {
        self.min = self.min.min(p);
        self.max = self.max.max(p);
    }

    pub fn grow_aabb(&mut self, other: &Aabb) {
        self.min = self.min.min(other.min);
        self.max = self.max.max(other.max);
    }

    /// Half surface area. The factor of 2 cancels in every SAH ratio.
    pub fn half_area(&self) -> f32 {
        let d = self.max - self.min;
        d.x * d.y + d.y * d.z + d.x * d.z
    }

    pub fn centroid(&self) -> Vec3 {
        (self.min + self.max) * 0.5
    }

    /// Slab test against a ray with precomputed reciprocal direction.
    /// Glam's componentwise min/max ignore NaN, so axis-aligned rays
    /// (reciprocal components of ±∞) still resolve correctly.
    pub fn intersects(&self, origin: Vec3, inv_dir: Vec3, t_max: f32) -> bool {
        let t1 = (self.min - origin) * inv_dir;
        let t2 = (self.max - origin) * inv_dir;
        let t_near = t1.min(t2).max_element();
        let t_far = t1.max(t2).min_element();
        t_far >= t_near.max(0.0) && t_near < t_max
    }
}
