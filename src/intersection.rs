use glam::{Vec2, Vec3};

use crate::bvh::BvhNode;
use crate::scene::{MaterialKind, TriData, TriVerts};
use crate::texture::Texture;

/// Determinant cull and minimum hit distance for Möller–Trumbore.
const EPSILON: f32 = 1e-7;

/// Deep enough for any BVH of a few million triangles.
const STACK_DEPTH: usize = 64;

#[derive(Clone, Copy)]
pub struct Ray {
    pub origin: Vec3,
    pub direction: Vec3,
}

impl Ray {
    pub fn at(&self, t: f32) -> Vec3 {
        self.origin + self.direction * t
    }
}

/// Möller–Trumbore. Returns `(t, u, v)` for intersections with `t > EPSILON`;
/// rays nearly parallel to the triangle plane are culled.
pub fn intersect_triangle(ray: &Ray, tri: &TriVerts) -> Option<(f32, f32, f32)> {
    let edge1 = tri.v1 - tri.v0;
    let edge2 = tri.v2 - tri.v0;
    let h = ray.direction.cross(edge2);
    let det = edge1.dot(h);

    if det > -EPSILON && det < EPSILON {
        return None;
    }

    let inv_det = 1.0 / det;
    let s = ray.origin - tri.v0;
    let u = inv_det * s.dot(h);
    if !(0.0..=1.0).contains(&u) {
        return None;
    }

    let q = s.cross(edge1);
    let v = inv_det * ray.direction.dot(q);
    if v < 0.0 || u + v > 1.0 {
        return None;
    }

    let t = inv_det * edge2.dot(q);
    (t > EPSILON).then_some((t, u, v))
}

/// Closest-hit result with shading data interpolated at the hit point.
#[derive(Clone)]
pub struct HitRecord {
    pub t: f32,
    pub hit: bool,
    pub position: Vec3,
    /// Interpolated shading normal (face normal under flat shading).
    pub normal: Vec3,
    /// Face normal, used for ray offsets and the light PDF.
    pub geometric_normal: Vec3,
    pub color: Vec3,
    pub emissive: Vec3,
    pub uv: Vec2,
    pub albedo_texture: Option<u32>,
    pub emissive_texture: Option<u32>,
    pub normal_texture: Option<u32>,
    pub roughness_texture: Option<u32>,
    pub metallic_texture: Option<u32>,
    pub triangle_index: u32,
    pub material: MaterialKind,
    pub ior: f32,
    pub roughness: f32,
    pub metallic: f32,
    pub tangent: Vec3,
    pub bitangent_sign: f32,
}

impl Default for HitRecord {
    fn default() -> Self {
        Self {
            t: f32::MAX,
            hit: false,
            position: Vec3::ZERO,
            normal: Vec3::Y,
            geometric_normal: Vec3::Y,
            color: Vec3::ZERO,
            emissive: Vec3::ZERO,
            uv: Vec2::ZERO,
            albedo_texture: None,
            emissive_texture: None,
            normal_texture: None,
            roughness_texture: None,
            metallic_texture: None,
            triangle_index: u32::MAX,
            material: MaterialKind::Microfacet,
            ior: 1.5,
            roughness: 0.5,
            metallic: 0.0,
            tangent: Vec3::X,
            bitangent_sign: 1.0,
        }
    }
}

/// Borrowed view of everything a traversal needs. Geometry is read-only
/// during a sample, so one of these can be shared freely across threads.
pub struct Intersector<'a> {
    pub nodes: &'a [BvhNode],
    pub tri_verts: &'a [TriVerts],
    pub tri_data: &'a [TriData],
    pub textures: &'a [Texture],
}

impl<'a> Intersector<'a> {
    /// Alpha-clipped faces are transparent wherever the sampled albedo
    /// alpha falls below 0.5, for primary and shadow rays alike.
    fn alpha_clipped(&self, data: &TriData, u: f32, v: f32) -> bool {
        if !data.alpha_clip {
            return false;
        }
        let Some(tex) = data.albedo_texture else {
            return false;
        };
        let w = 1.0 - u - v;
        let uv = data.uv0 * w + data.uv1 * u + data.uv2 * v;
        self.textures[tex as usize].sample(uv).w < 0.5
    }

    pub fn closest_hit(&self, ray: &Ray, flat_shading: bool) -> HitRecord {
        let mut closest = HitRecord::default();
        if self.nodes.is_empty() {
            return closest;
        }

        let inv_dir = ray.direction.recip();
        let mut stack = [0u32; STACK_DEPTH];
        let mut sp = 1usize;

        while sp > 0 {
            sp -= 1;
            let node = &self.nodes[stack[sp] as usize];
            if !node.bounds.intersects(ray.origin, inv_dir, closest.t) {
                continue;
            }

            if node.is_leaf() {
                for i in node.left_first..node.left_first + node.tri_count {
                    let i = i as usize;
                    let Some((t, u, v)) = intersect_triangle(ray, &self.tri_verts[i]) else {
                        continue;
                    };
                    if t >= closest.t {
                        continue;
                    }
                    let data = &self.tri_data[i];
                    if self.alpha_clipped(data, u, v) {
                        continue;
                    }

                    let w = 1.0 - u - v;
                    closest.t = t;
                    closest.hit = true;
                    closest.position = ray.at(t);
                    closest.normal = if flat_shading {
                        data.geometric_normal
                    } else {
                        (data.n0 * w + data.n1 * u + data.n2 * v).normalize()
                    };
                    closest.geometric_normal = data.geometric_normal;
                    closest.color = data.color;
                    closest.emissive = data.emissive;
                    closest.uv = data.uv0 * w + data.uv1 * u + data.uv2 * v;
                    closest.albedo_texture = data.albedo_texture;
                    closest.emissive_texture = data.emissive_texture;
                    closest.normal_texture = data.normal_texture;
                    closest.roughness_texture = data.roughness_texture;
                    closest.metallic_texture = data.metallic_texture;
                    closest.triangle_index = i as u32;
                    closest.material = data.material;
                    closest.ior = data.ior;
                    closest.roughness = data.roughness;
                    closest.metallic = data.metallic;
                    closest.tangent = data.tangent;
                    closest.bitangent_sign = data.bitangent_sign;
                }
            } else {
                stack[sp] = node.left_first;
                stack[sp + 1] = node.left_first + 1;
                sp += 2;
            }
        }

        closest
    }

    /// Returns on the first confirmed occluder within `max_dist`.
    pub fn occluded(&self, ray: &Ray, max_dist: f32) -> bool {
        if self.nodes.is_empty() {
            return false;
        }

        let inv_dir = ray.direction.recip();
        let mut stack = [0u32; STACK_DEPTH];
        let mut sp = 1usize;

        while sp > 0 {
            sp -= 1;
            let node = &self.nodes[stack[sp] as usize];
            if !node.bounds.intersects(ray.origin, inv_dir, max_dist) {
                continue;
            }

            if node.is_leaf() {
                for i in node.left_first..node.left_first + node.tri_count {
                    let i = i as usize;
                    let Some((t, u, v)) = intersect_triangle(ray, &self.tri_verts[i]) else {
                        continue;
                    };
                    if t >= max_dist {
                        continue;
                    }
                    if self.alpha_clipped(&self.tri_data[i], u, v) {
                        continue;
                    }
                    return true;
                }
            } else {
                stack[sp] = node.left_first;
                stack[sp + 1] = node.left_first + 1;
                sp += 2;
            }
        }

        false
    }
}
