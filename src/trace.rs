use glam::{Mat4, Vec3, Vec4};
use rayon::prelude::*;
use std::f32::consts::PI;
use std::time::Instant;

use crate::aabb::Aabb;
use crate::bsdf::{CookTorranceBsdf, DielectricBsdf, MirrorBsdf};
use crate::bvh::Bvh;
use crate::environment::EnvironmentMap;
use crate::intersection::{Intersector, Ray};
use crate::light_pick::{self, LightTable};
use crate::rng::{self, Rng};
use crate::scene::{MaterialKind, TriData, TriVerts, Triangle};
use crate::texture::Texture;
use crate::util;

/// Per-sample luminance ceiling for the firefly clamp.
const FIREFLY_MAX_LUMINANCE: f32 = 10.0;

/// Progressive path tracer. Owns the scene's intersection and shading
/// arrays, the BVH, the light table, the environment and the accumulation
/// buffers. One `trace_sample` call integrates a single sample per pixel
/// across all rows in parallel, then tone-maps into the display buffer.
///
/// Settings that change the integrand reset accumulation when set; display
/// settings (exposure, gamma, ACES) only affect tone mapping.
pub struct PathTracer {
    tri_verts: Vec<TriVerts>,
    tri_data: Vec<TriData>,
    textures: Vec<Texture>,
    bvh: Bvh,
    lights: LightTable,

    width: u32,
    height: u32,
    accum: Vec<Vec3>,
    pixels: Vec<u8>,
    sample_count: u32,

    camera_origin: Vec3,
    inverse_vp: Mat4,

    max_depth: u32,
    enable_nee: bool,
    enable_firefly_clamp: bool,
    enable_aa: bool,
    enable_environment: bool,
    env_light_multiplier: f32,
    flat_shading: bool,
    enable_normal_mapping: bool,
    enable_emissive: bool,
    exposure: f32,
    gamma: f32,
    enable_aces: bool,
    ray_eps: f32,
    enable_rr: bool,

    aperture: f32,
    focus_distance: f32,
    camera_right: Vec3,
    camera_up: Vec3,

    point_light_pos: Vec3,
    point_light_color: Vec3,
    point_light_enabled: bool,

    sun_dir: Vec3,
    sun_color: Vec3,
    sun_cos_angle: f32,
    sun_enabled: bool,

    env_color: Vec3,
    env_map: Option<EnvironmentMap>,
}

impl Default for PathTracer {
    fn default() -> Self {
        Self::new()
    }
}

impl PathTracer {
    pub fn new() -> Self {
        Self {
            tri_verts: Vec::new(),
            tri_data: Vec::new(),
            textures: Vec::new(),
            bvh: Bvh::build(&[]),
            lights: LightTable::default(),
            width: 0,
            height: 0,
            accum: Vec::new(),
            pixels: Vec::new(),
            sample_count: 0,
            camera_origin: Vec3::ZERO,
            inverse_vp: Mat4::IDENTITY,
            max_depth: 5,
            enable_nee: true,
            enable_firefly_clamp: true,
            enable_aa: true,
            enable_environment: false,
            env_light_multiplier: 1.0,
            flat_shading: false,
            enable_normal_mapping: true,
            enable_emissive: true,
            exposure: 0.0,
            gamma: 2.2,
            enable_aces: true,
            ray_eps: 1e-4,
            enable_rr: true,
            aperture: 0.0,
            focus_distance: 10.0,
            camera_right: Vec3::X,
            camera_up: Vec3::Y,
            point_light_pos: Vec3::ZERO,
            point_light_color: Vec3::ONE,
            point_light_enabled: false,
            sun_dir: Vec3::new(0.0, -1.0, 0.0),
            sun_color: Vec3::ONE,
            sun_cos_angle: 0.00873f32.cos(),
            sun_enabled: false,
            env_color: Vec3::ZERO,
            env_map: None,
        }
    }

    // --- Geometry ---

    /// Installs a new scene: splits the triangles into hot/cold arrays,
    /// builds the BVH, reorders both arrays to match its leaf layout and
    /// rebuilds the emissive light table. Resets accumulation.
    pub fn set_geometry(&mut self, triangles: Vec<Triangle>, textures: Vec<Texture>) {
        let count = triangles.len();
        let mut tri_verts = Vec::with_capacity(count);
        let mut tri_data = Vec::with_capacity(count);
        for tri in &triangles {
            tri_verts.push(TriVerts {
                v0: tri.v0,
                v1: tri.v1,
                v2: tri.v2,
            });
            tri_data.push(TriData {
                n0: tri.n0,
                n1: tri.n1,
                n2: tri.n2,
                uv0: tri.uv0,
                uv1: tri.uv1,
                uv2: tri.uv2,
                color: tri.color,
                emissive: tri.emissive,
                geometric_normal: tri.geometric_normal,
                area: tri.area,
                albedo_texture: tri.albedo_texture,
                emissive_texture: tri.emissive_texture,
                normal_texture: tri.normal_texture,
                roughness_texture: tri.roughness_texture,
                metallic_texture: tri.metallic_texture,
                alpha_clip: tri.alpha_clip,
                material: tri.material,
                ior: tri.ior,
                roughness: tri.roughness,
                metallic: tri.metallic,
                tangent: tri.tangent,
                bitangent_sign: tri.bitangent_sign,
            });
        }

        let tri_bounds: Vec<Aabb> = tri_verts
            .iter()
            .map(|t| Aabb::from_points(&[t.v0, t.v1, t.v2]))
            .collect();

        let start = Instant::now();
        let bvh = Bvh::build(&tri_bounds);
        log::info!(
            "BVH over {} triangles in {:.1?}: {} nodes, SAH cost {:.2}",
            count,
            start.elapsed(),
            bvh.node_count(),
            bvh.sah_cost()
        );

        // Reorder so leaf ranges address the arrays directly.
        self.tri_verts = bvh.indices().iter().map(|&i| tri_verts[i as usize]).collect();
        self.tri_data = bvh
            .indices()
            .iter()
            .map(|&i| tri_data[i as usize].clone())
            .collect();
        self.bvh = bvh;
        self.textures = textures;
        self.lights = LightTable::build(&self.tri_data);
        self.reset();
    }

    /// Patches material scalars in place without touching the BVH.
    /// `triangles` is in the original submission order; the BVH permutation
    /// maps it onto the reordered arrays.
    pub fn update_materials(&mut self, triangles: &[Triangle]) {
        for (slot, &src) in self.bvh.indices().iter().enumerate() {
            let Some(tri) = triangles.get(src as usize) else {
                continue;
            };
            let data = &mut self.tri_data[slot];
            data.material = tri.material;
            data.ior = tri.ior;
            data.roughness = tri.roughness;
            data.metallic = tri.metallic;
        }
        self.reset();
    }

    // --- Buffers ---

    pub fn resize(&mut self, width: u32, height: u32) {
        if self.width == width && self.height == height {
            return;
        }
        self.width = width;
        self.height = height;
        self.accum = vec![Vec3::ZERO; (width * height) as usize];
        self.pixels = vec![0; (width * height * 4) as usize];
        self.sample_count = 0;
    }

    pub fn reset(&mut self) {
        self.accum.fill(Vec3::ZERO);
        self.pixels.fill(0);
        self.sample_count = 0;
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn sample_count(&self) -> u32 {
        self.sample_count
    }

    /// Tone-mapped RGBA8 display buffer, top row first.
    pub fn pixel_buffer(&self) -> &[u8] {
        &self.pixels
    }

    /// Linear running sums; divide by `sample_count` for the mean radiance.
    pub fn accumulation(&self) -> &[Vec3] {
        &self.accum
    }

    // --- BVH diagnostics ---

    pub fn bvh_node_count(&self) -> u32 {
        self.bvh.node_count()
    }

    pub fn bvh_memory_bytes(&self) -> usize {
        self.bvh.memory_bytes()
    }

    pub fn bvh_root_bounds(&self) -> Aabb {
        self.bvh.root_bounds()
    }

    pub fn bvh_sah_cost(&self) -> f32 {
        self.bvh.sah_cost()
    }

    // --- Camera ---

    pub fn set_camera(&mut self, origin: Vec3, inverse_view_projection: Mat4) {
        self.camera_origin = origin;
        self.inverse_vp = inverse_view_projection;
    }

    /// Thin-lens parameters; aperture 0 is a pinhole. Resets on change.
    pub fn set_dof(&mut self, aperture: f32, focus_distance: f32, right: Vec3, up: Vec3) {
        if self.aperture == aperture
            && self.focus_distance == focus_distance
            && self.camera_right == right
            && self.camera_up == up
        {
            return;
        }
        self.aperture = aperture;
        self.focus_distance = focus_distance;
        self.camera_right = right;
        self.camera_up = up;
        self.reset();
    }

    // --- Settings (reset accumulation when changed) ---

    pub fn set_max_depth(&mut self, depth: u32) {
        if self.max_depth != depth {
            self.max_depth = depth;
            self.reset();
        }
    }

    pub fn set_enable_nee(&mut self, v: bool) {
        if self.enable_nee != v {
            self.enable_nee = v;
            self.reset();
        }
    }

    pub fn set_enable_firefly_clamp(&mut self, v: bool) {
        if self.enable_firefly_clamp != v {
            self.enable_firefly_clamp = v;
            self.reset();
        }
    }

    pub fn set_enable_aa(&mut self, v: bool) {
        if self.enable_aa != v {
            self.enable_aa = v;
            self.reset();
        }
    }

    pub fn set_enable_environment(&mut self, v: bool) {
        if self.enable_environment != v {
            self.enable_environment = v;
            self.reset();
        }
    }

    pub fn set_env_light_multiplier(&mut self, v: f32) {
        if self.env_light_multiplier != v {
            self.env_light_multiplier = v;
            self.reset();
        }
    }

    pub fn set_flat_shading(&mut self, v: bool) {
        if self.flat_shading != v {
            self.flat_shading = v;
            self.reset();
        }
    }

    pub fn set_enable_normal_mapping(&mut self, v: bool) {
        if self.enable_normal_mapping != v {
            self.enable_normal_mapping = v;
            self.reset();
        }
    }

    pub fn set_enable_emissive(&mut self, v: bool) {
        if self.enable_emissive != v {
            self.enable_emissive = v;
            self.reset();
        }
    }

    pub fn set_ray_eps(&mut self, v: f32) {
        if self.ray_eps != v {
            self.ray_eps = v;
            self.reset();
        }
    }

    pub fn set_enable_rr(&mut self, v: bool) {
        if self.enable_rr != v {
            self.enable_rr = v;
            self.reset();
        }
    }

    // --- Display settings (tone mapping only, no reset) ---

    pub fn set_exposure(&mut self, v: f32) {
        self.exposure = v;
    }

    pub fn set_gamma(&mut self, v: f32) {
        self.gamma = v;
    }

    pub fn set_enable_aces(&mut self, v: bool) {
        self.enable_aces = v;
    }

    // --- Lights and environment (caller resets) ---

    pub fn set_point_light(&mut self, position: Vec3, color: Vec3, enabled: bool) {
        self.point_light_pos = position;
        self.point_light_color = color;
        self.point_light_enabled = enabled;
    }

    /// `color` stores irradiance; the visible disk radiance is `color/Ω`.
    pub fn set_directional_light(
        &mut self,
        direction: Vec3,
        color: Vec3,
        angular_radius: f32,
        enabled: bool,
    ) {
        self.sun_dir = direction.normalize();
        self.sun_color = color;
        self.sun_cos_angle = angular_radius.cos();
        self.sun_enabled = enabled;
    }

    pub fn set_environment_color(&mut self, color: Vec3) {
        self.env_color = color;
    }

    pub fn set_environment_map(&mut self, map: EnvironmentMap) {
        self.env_map = Some(map);
    }

    pub fn clear_environment_map(&mut self) {
        self.env_map = None;
    }

    // --- Tracing ---

    fn intersector(&self) -> Intersector<'_> {
        Intersector {
            nodes: self.bvh.nodes(),
            tri_verts: &self.tri_verts,
            tri_data: &self.tri_data,
            textures: &self.textures,
        }
    }

    fn sample_environment(&self, direction: Vec3) -> Vec3 {
        match &self.env_map {
            Some(map) => map.radiance(direction),
            None => self.env_color,
        }
    }

    fn generate_ray(&self, x: u32, y: u32, jitter_x: f32, jitter_y: f32, rng: &mut Rng) -> Ray {
        let ndc_x = 2.0 * (x as f32 + jitter_x) / self.width as f32 - 1.0;
        let ndc_y = 1.0 - 2.0 * (y as f32 + jitter_y) / self.height as f32;

        let near_clip = self.inverse_vp * Vec4::new(ndc_x, ndc_y, -1.0, 1.0);
        let far_clip = self.inverse_vp * Vec4::new(ndc_x, ndc_y, 1.0, 1.0);
        let near_world = near_clip.truncate() / near_clip.w;
        let far_world = far_clip.truncate() / far_clip.w;

        let mut ray = Ray {
            origin: self.camera_origin,
            direction: (far_world - near_world).normalize(),
        };

        if self.aperture > 0.0 {
            let focal_point = ray.origin + ray.direction * self.focus_distance;
            let disk =
                util::concentric_sample_disk(rng.next_f32(), rng.next_f32()) * self.aperture;
            ray.origin += disk.x * self.camera_right + disk.y * self.camera_up;
            ray.direction = (focal_point - ray.origin).normalize();
        }

        ray
    }

    fn path_trace(&self, mut ray: Ray, rng: &mut Rng) -> Vec3 {
        let isect = self.intersector();
        let has_lights = !self.lights.is_empty();

        let mut radiance = Vec3::ZERO;
        let mut throughput = Vec3::ONE;
        let mut prev_bsdf_pdf = 0.0f32;
        let mut prev_was_delta = false;

        for depth in 0..self.max_depth {
            // Russian roulette after the first two bounces
            if self.enable_rr && depth >= 2 {
                let p = util::luminance(throughput).min(0.95);
                if rng.next_f32() > p {
                    break;
                }
                throughput /= p;
            }

            let mut hit = isect.closest_hit(&ray, self.flat_shading);

            if !hit.hit {
                if self.sun_enabled && ray.direction.dot(-self.sun_dir) > self.sun_cos_angle {
                    let solid_angle = 2.0 * PI * (1.0 - self.sun_cos_angle);
                    let disk_radiance = 1.0 / solid_angle;
                    if depth == 0 || !self.enable_nee || prev_was_delta {
                        radiance += throughput * self.sun_color * disk_radiance;
                    } else {
                        let light_pdf = 1.0 / solid_angle;
                        let weight = prev_bsdf_pdf / (prev_bsdf_pdf + light_pdf);
                        radiance += throughput * self.sun_color * disk_radiance * weight;
                    }
                }

                let env = self.sample_environment(ray.direction);
                if depth == 0 {
                    // The background stays visible even with environment
                    // lighting disabled.
                    radiance += throughput * env;
                } else if self.enable_environment {
                    let mut scaled = env * self.env_light_multiplier;
                    if self.enable_nee && !prev_was_delta {
                        if let Some(map) = &self.env_map {
                            if map.total_integral() > 0.0 {
                                let env_pdf = map.pdf(ray.direction);
                                if env_pdf > 1e-8 {
                                    scaled *= prev_bsdf_pdf / (prev_bsdf_pdf + env_pdf);
                                }
                            }
                        }
                    }
                    radiance += throughput * scaled;
                }
                break;
            }

            let front_face = hit.geometric_normal.dot(-ray.direction) > 0.0;

            // Opaque back-face hit: the mesh has inverted normals. Step the
            // origin past the surface and keep the direction; bouncing from
            // here would trap the path inside the model. Dielectrics are
            // exempt since refraction needs real back-face handling.
            if !front_face && hit.material != MaterialKind::Dielectric {
                ray.origin = hit.position + ray.direction * self.ray_eps;
                continue;
            }

            // Ray-origin offsets follow the geometric normal, never the
            // shading normal: after normal mapping the shading normal can
            // lie almost tangent to the surface and an offset along it
            // stays self-shadowed at any epsilon.
            let offset_normal = if front_face {
                hit.geometric_normal
            } else {
                -hit.geometric_normal
            };

            // Keep the shading normal on the same side as the geometric one
            // so the NdotL guards in evaluate() and sample() agree.
            if hit.normal.dot(offset_normal) < 0.0 {
                hit.normal = -hit.normal;
            }

            let mut emission = Vec3::ZERO;
            if self.enable_emissive {
                emission = hit.emissive;
                if let Some(tex) = hit.emissive_texture {
                    emission = self.textures[tex as usize].sample(hit.uv).truncate();
                }
            }

            if emission.length() > light_pick::EMISSIVE_MIN {
                let cos_light = hit.geometric_normal.dot(-ray.direction);
                // Textured emitters are absent from the light table, so NEE
                // can never sample them; the BSDF path carries them in full.
                let textured_emitter = hit.emissive_texture.is_some();

                if depth == 0 || prev_was_delta || textured_emitter {
                    if cos_light > 0.0 {
                        radiance += throughput * emission;
                    }
                } else if self.enable_nee && has_lights && cos_light > 0.0 {
                    let pdf_light = (hit.t * hit.t) / (cos_light * self.lights.total_area());
                    let weight = prev_bsdf_pdf / (prev_bsdf_pdf + pdf_light);
                    radiance += throughput * emission * weight;
                } else if !self.enable_nee && cos_light > 0.0 {
                    radiance += throughput * emission;
                }

                // Solid emitters terminate; textured ones keep scattering
                // through their underlying material.
                if !textured_emitter {
                    break;
                }
            }

            let mut albedo = hit.color;
            if let Some(tex) = hit.albedo_texture {
                albedo *= self.textures[tex as usize].sample(hit.uv).truncate();
            }

            if self.enable_normal_mapping {
                if let Some(tex) = hit.normal_texture {
                    let n = hit.normal;
                    let sample = self.textures[tex as usize].sample(hit.uv);
                    let map_n = Vec3::new(
                        sample.x * 2.0 - 1.0,
                        sample.y * 2.0 - 1.0,
                        sample.z * 2.0 - 1.0,
                    )
                    .normalize();

                    let t = (hit.tangent - n * hit.tangent.dot(n)).normalize();
                    let b = n.cross(t) * hit.bitangent_sign;
                    hit.normal = (t * map_n.x + b * map_n.y + n * map_n.z).normalize();

                    // Re-align after perturbation
                    if hit.normal.dot(offset_normal) < 0.0 {
                        hit.normal = -hit.normal;
                    }
                }
            }

            let roughness = hit
                .roughness_texture
                .map_or(hit.roughness, |t| self.textures[t as usize].sample(hit.uv).x);
            let metallic = hit
                .metallic_texture
                .map_or(hit.metallic, |t| self.textures[t as usize].sample(hit.uv).x);

            let wo = -ray.direction;

            if hit.material == MaterialKind::Dielectric {
                let bsdf = DielectricBsdf {
                    color: albedo,
                    ior: hit.ior,
                };
                let sample = bsdf.sample(hit.normal, wo, front_face, rng.next_f32());

                throughput *= sample.throughput;
                prev_bsdf_pdf = sample.pdf;
                prev_was_delta = true;

                // Reflections leave on the entry side, transmissions on the
                // far side of the true surface.
                ray.origin = if sample.direction.dot(offset_normal) > 0.0 {
                    hit.position + offset_normal * self.ray_eps
                } else {
                    hit.position - offset_normal * self.ray_eps
                };
                ray.direction = sample.direction;
            } else if hit.material == MaterialKind::Mirror
                || (metallic > 0.99 && roughness < 0.01)
            {
                // Explicit mirror, or PBR parameters sharp enough to be one
                let bsdf = MirrorBsdf { color: albedo };
                let sample = bsdf.sample(hit.normal, wo);

                throughput *= sample.throughput;
                prev_bsdf_pdf = sample.pdf;
                prev_was_delta = true;

                ray.origin = hit.position + offset_normal * self.ray_eps;
                ray.direction = sample.direction;
            } else {
                let bsdf = CookTorranceBsdf {
                    base_color: albedo,
                    roughness,
                    metallic,
                    ior: hit.ior,
                };

                // NEE: emissive triangles
                if self.enable_nee && self.enable_emissive && has_lights {
                    let (light_tri, light_point) =
                        self.lights.sample_point(&self.tri_verts, rng);
                    let light_data = &self.tri_data[light_tri as usize];

                    let to_light = light_point - hit.position;
                    let dist = to_light.length();
                    let light_dir = to_light / dist;

                    let cos_surface = hit.normal.dot(light_dir);
                    let cos_light = light_data.geometric_normal.dot(-light_dir);

                    if cos_surface > 0.0 && cos_light > 0.0 && offset_normal.dot(light_dir) > 0.0
                    {
                        let shadow_ray = Ray {
                            origin: hit.position + offset_normal * self.ray_eps,
                            direction: light_dir,
                        };
                        if !isect.occluded(&shadow_ray, dist - 2.0 * self.ray_eps) {
                            let pdf_light =
                                (dist * dist) / (cos_light * self.lights.total_area());
                            let pdf_bsdf = bsdf.pdf(hit.normal, wo, light_dir);
                            let mis_weight = pdf_light / (pdf_light + pdf_bsdf);

                            let brdf = bsdf.evaluate(hit.normal, wo, light_dir);
                            radiance += throughput * brdf * light_data.emissive * cos_surface
                                / pdf_light
                                * mis_weight;
                        }
                    }
                }

                // NEE: point light. Delta distribution, so no MIS — the
                // BSDF can never hit it.
                if self.enable_nee && self.point_light_enabled {
                    let to_light = self.point_light_pos - hit.position;
                    let dist = to_light.length();
                    let light_dir = to_light / dist;

                    let cos_surface = hit.normal.dot(light_dir);
                    if cos_surface > 0.0 && offset_normal.dot(light_dir) > 0.0 {
                        let shadow_ray = Ray {
                            origin: hit.position + offset_normal * self.ray_eps,
                            direction: light_dir,
                        };
                        if !isect.occluded(&shadow_ray, dist - 2.0 * self.ray_eps) {
                            let brdf = bsdf.evaluate(hit.normal, wo, light_dir);
                            radiance += throughput * brdf * self.point_light_color * cos_surface
                                / (dist * dist);
                        }
                    }
                }

                // NEE: directional sun, sampled uniformly inside its cone
                if self.enable_nee && self.sun_enabled {
                    let light_dir = util::sample_cone(
                        -self.sun_dir,
                        self.sun_cos_angle,
                        rng.next_f32(),
                        rng.next_f32(),
                    );

                    let cos_surface = hit.normal.dot(light_dir);
                    if cos_surface > 0.0 && offset_normal.dot(light_dir) > 0.0 {
                        let shadow_ray = Ray {
                            origin: hit.position + offset_normal * self.ray_eps,
                            direction: light_dir,
                        };
                        if !isect.occluded(&shadow_ray, f32::MAX) {
                            let solid_angle = 2.0 * PI * (1.0 - self.sun_cos_angle);
                            let light_pdf = 1.0 / solid_angle;
                            let bsdf_pdf = bsdf.pdf(hit.normal, wo, light_dir);
                            let mis_weight = light_pdf / (light_pdf + bsdf_pdf);

                            // colour is irradiance: disk radiance times the
                            // 1/pdf solid angle cancels
                            let brdf = bsdf.evaluate(hit.normal, wo, light_dir);
                            radiance +=
                                throughput * brdf * self.sun_color * cos_surface * mis_weight;
                        }
                    }
                }

                // NEE: environment map importance sampling
                if self.enable_nee && self.enable_environment {
                    if let Some(map) = &self.env_map {
                        if map.total_integral() > 0.0 {
                            let (env_dir, env_radiance, env_pdf) = map.sample(rng);

                            let cos_surface = hit.normal.dot(env_dir);
                            if cos_surface > 0.0
                                && env_pdf > 1e-8
                                && offset_normal.dot(env_dir) > 0.0
                            {
                                let shadow_ray = Ray {
                                    origin: hit.position + offset_normal * self.ray_eps,
                                    direction: env_dir,
                                };
                                if !isect.occluded(&shadow_ray, f32::MAX) {
                                    let bsdf_pdf = bsdf.pdf(hit.normal, wo, env_dir);
                                    let mis_weight = env_pdf / (env_pdf + bsdf_pdf);

                                    let brdf = bsdf.evaluate(hit.normal, wo, env_dir);
                                    radiance += throughput
                                        * brdf
                                        * env_radiance
                                        * self.env_light_multiplier
                                        * cos_surface
                                        / env_pdf
                                        * mis_weight;
                                }
                            }
                        }
                    }
                }

                // BSDF sample for the next bounce
                let sample = bsdf.sample(
                    hit.normal,
                    offset_normal,
                    wo,
                    rng.next_f32(),
                    rng.next_f32(),
                    rng.next_f32(),
                );

                if sample.pdf < 1e-8 {
                    break;
                }
                // Never bounce below the actual geometric surface
                if sample.direction.dot(offset_normal) < 0.0 {
                    break;
                }

                throughput *= sample.throughput;
                prev_bsdf_pdf = sample.pdf;
                prev_was_delta = false;

                ray.origin = hit.position + offset_normal * self.ray_eps;
                ray.direction = sample.direction;
            }
        }

        radiance
    }

    /// Integrates one sample per pixel. Rows are partitioned into contiguous
    /// bands, one per worker; bands write disjoint accumulation rows so no
    /// synchronisation is needed, and the implicit join happens before tone
    /// mapping.
    pub fn trace_sample(&mut self) {
        if self.width == 0 || self.height == 0 {
            return;
        }

        let width = self.width as usize;
        let height = self.height as usize;
        let sample_index = self.sample_count;

        let mut accum = std::mem::take(&mut self.accum);
        let threads = rayon::current_num_threads().max(1);
        let band_rows = (height + threads - 1) / threads;

        {
            let tracer = &*self;
            accum
                .par_chunks_mut(width * band_rows)
                .enumerate()
                .for_each(|(band, rows)| {
                    let y0 = band * band_rows;
                    for (dy, row) in rows.chunks_mut(width).enumerate() {
                        let y = (y0 + dy) as u32;
                        for (x, cell) in row.iter_mut().enumerate() {
                            let x = x as u32;
                            let seed =
                                rng::hash(x + y * tracer.width) ^ rng::hash(sample_index);
                            let mut rng = Rng::new(seed);

                            let (jx, jy) = if tracer.enable_aa {
                                (rng.next_f32(), rng.next_f32())
                            } else {
                                (0.5, 0.5)
                            };
                            let ray = tracer.generate_ray(x, y, jx, jy, &mut rng);

                            let mut color = util::mask_nan(tracer.path_trace(ray, &mut rng));

                            if tracer.enable_firefly_clamp {
                                let lum = util::luminance(color);
                                if lum > FIREFLY_MAX_LUMINANCE {
                                    color *= FIREFLY_MAX_LUMINANCE / lum;
                                }
                            }

                            *cell += color;
                        }
                    }
                });
        }
        self.accum = accum;

        self.sample_count += 1;
        self.tonemap_into_pixels();
    }

    /// display = gamma(tonemap(mean * 2^exposure)), quantised to RGBA8.
    fn tonemap_into_pixels(&mut self) {
        let inv_samples = 1.0 / self.sample_count as f32;
        let exposure_mul = 2.0f32.powf(self.exposure);
        let inv_gamma = 1.0 / self.gamma;
        let enable_aces = self.enable_aces;

        for (cell, px) in self.accum.iter().zip(self.pixels.chunks_exact_mut(4)) {
            let mut c = *cell * inv_samples * exposure_mul;

            if enable_aces {
                // Narkowicz ACES fit
                const A: f32 = 2.51;
                const B: f32 = 0.03;
                const C: f32 = 2.43;
                const D: f32 = 0.59;
                const E: f32 = 0.14;
                let numer = c * (c * A + Vec3::splat(B));
                let denom = c * (c * C + Vec3::splat(D)) + Vec3::splat(E);
                c = (numer / denom).clamp(Vec3::ZERO, Vec3::ONE);
            } else {
                c = c.clamp(Vec3::ZERO, Vec3::ONE);
            }

            c = c.powf(inv_gamma);

            px[0] = (c.x * 255.0) as u8;
            px[1] = (c.y * 255.0) as u8;
            px[2] = (c.z * 255.0) as u8;
            px[3] = 255;
        }
    }
}
