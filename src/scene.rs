use glam::{Vec2, Vec3};
use thiserror::Error;

const GEOMETRY_EPSILON: f32 = 1e-8;

/// Surface model of a submesh.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum MaterialKind {
    /// Cook-Torrance GGX with a diffuse base.
    Microfacet,
    /// Perfect mirror (delta reflection).
    Mirror,
    /// Thin glass interface (delta reflection + transmission).
    Dielectric,
}

/// One imported vertex, already in world space.
#[derive(Clone, Copy)]
pub struct Vertex {
    pub position: Vec3,
    pub normal: Vec3,
    pub color: Vec3,
    pub emissive: Vec3,
    pub uv: Vec2,
}

/// Material fields shared by every face of a submesh. Texture indices refer
/// to the texture array passed alongside the submeshes.
#[derive(Clone, Copy)]
pub struct Material {
    pub kind: MaterialKind,
    pub roughness: f32,
    pub metallic: f32,
    pub ior: f32,
    pub alpha_clip: bool,
    pub albedo_texture: Option<u32>,
    pub emissive_texture: Option<u32>,
    pub normal_texture: Option<u32>,
    pub roughness_texture: Option<u32>,
    pub metallic_texture: Option<u32>,
}

impl Default for Material {
    fn default() -> Self {
        Self {
            kind: MaterialKind::Microfacet,
            roughness: 0.5,
            metallic: 0.0,
            ior: 1.5,
            alpha_clip: false,
            albedo_texture: None,
            emissive_texture: None,
            normal_texture: None,
            roughness_texture: None,
            metallic_texture: None,
        }
    }
}

/// A batch of triangles sharing one material, as produced by the importer.
pub struct SubMesh {
    pub vertices: Vec<Vertex>,
    pub indices: Vec<u32>,
    pub material: Material,
}

/// Full per-triangle record handed to the tracer. Split internally into
/// hot/cold arrays; this is the assembly-time view.
#[derive(Clone)]
pub struct Triangle {
    pub v0: Vec3,
    pub v1: Vec3,
    pub v2: Vec3,
    pub n0: Vec3,
    pub n1: Vec3,
    pub n2: Vec3,
    pub uv0: Vec2,
    pub uv1: Vec2,
    pub uv2: Vec2,
    pub color: Vec3,
    pub emissive: Vec3,
    pub geometric_normal: Vec3,
    pub area: f32,
    pub albedo_texture: Option<u32>,
    pub emissive_texture: Option<u32>,
    pub normal_texture: Option<u32>,
    pub roughness_texture: Option<u32>,
    pub metallic_texture: Option<u32>,
    pub alpha_clip: bool,
    pub material: MaterialKind,
    pub ior: f32,
    pub roughness: f32,
    pub metallic: f32,
    pub tangent: Vec3,
    pub bitangent_sign: f32,
}

/// Hot intersection data: positions only, touched by the traversal inner loop.
#[derive(Clone, Copy)]
pub struct TriVerts {
    pub v0: Vec3,
    pub v1: Vec3,
    pub v2: Vec3,
}

/// Cold shading data, read only on confirmed hits.
#[derive(Clone)]
pub struct TriData {
    pub n0: Vec3,
    pub n1: Vec3,
    pub n2: Vec3,
    pub uv0: Vec2,
    pub uv1: Vec2,
    pub uv2: Vec2,
    pub color: Vec3,
    pub emissive: Vec3,
    pub geometric_normal: Vec3,
    pub area: f32,
    pub albedo_texture: Option<u32>,
    pub emissive_texture: Option<u32>,
    pub normal_texture: Option<u32>,
    pub roughness_texture: Option<u32>,
    pub metallic_texture: Option<u32>,
    pub alpha_clip: bool,
    pub material: MaterialKind,
    pub ior: f32,
    pub roughness: f32,
    pub metallic: f32,
    pub tangent: Vec3,
    pub bitangent_sign: f32,
}

impl Default for TriData {
    fn default() -> Self {
        Self {
            n0: Vec3::Y,
            n1: Vec3::Y,
            n2: Vec3::Y,
            uv0: Vec2::ZERO,
            uv1: Vec2::ZERO,
            uv2: Vec2::ZERO,
            color: Vec3::splat(0.7),
            emissive: Vec3::ZERO,
            geometric_normal: Vec3::Y,
            area: 0.0,
            albedo_texture: None,
            emissive_texture: None,
            normal_texture: None,
            roughness_texture: None,
            metallic_texture: None,
            alpha_clip: false,
            material: MaterialKind::Microfacet,
            ior: 1.5,
            roughness: 0.5,
            metallic: 0.0,
            tangent: Vec3::X,
            bitangent_sign: 1.0,
        }
    }
}

#[derive(Debug, Error)]
pub enum GeometryError {
    #[error("submesh {submesh}: index count {count} is not divisible by 3")]
    IndexCount { submesh: usize, count: usize },
    #[error("submesh {submesh}: index {index} out of range ({vertices} vertices)")]
    IndexRange {
        submesh: usize,
        index: u32,
        vertices: usize,
    },
}

/// Flattens submeshes into per-triangle records: geometric normal from the
/// edge cross product (+Y fallback for degenerate faces), area as half the
/// cross length, and a per-face tangent frame from the UV gradients.
pub fn build_triangles(submeshes: &[SubMesh]) -> Result<Vec<Triangle>, GeometryError> {
    let mut triangles = Vec::new();

    for (si, sm) in submeshes.iter().enumerate() {
        if sm.indices.len() % 3 != 0 {
            return Err(GeometryError::IndexCount {
                submesh: si,
                count: sm.indices.len(),
            });
        }
        if let Some(&bad) = sm.indices.iter().find(|&&i| i as usize >= sm.vertices.len()) {
            return Err(GeometryError::IndexRange {
                submesh: si,
                index: bad,
                vertices: sm.vertices.len(),
            });
        }

        let mat = &sm.material;
        for face in sm.indices.chunks_exact(3) {
            let v0 = &sm.vertices[face[0] as usize];
            let v1 = &sm.vertices[face[1] as usize];
            let v2 = &sm.vertices[face[2] as usize];

            let edge1 = v1.position - v0.position;
            let edge2 = v2.position - v0.position;
            let cross = edge1.cross(edge2);
            let len = cross.length();

            let mut tangent = Vec3::X;
            let mut bitangent_sign = 1.0;
            let geometric_normal = if len > GEOMETRY_EPSILON {
                cross / len
            } else {
                Vec3::Y
            };

            let d_uv1 = v1.uv - v0.uv;
            let d_uv2 = v2.uv - v0.uv;
            let det = d_uv1.x * d_uv2.y - d_uv2.x * d_uv1.y;
            if det.abs() > GEOMETRY_EPSILON {
                let f = 1.0 / det;
                tangent = (f * (d_uv2.y * edge1 - d_uv1.y * edge2)).normalize();
                let bitangent = f * (-d_uv2.x * edge1 + d_uv1.x * edge2);
                bitangent_sign = if geometric_normal.cross(tangent).dot(bitangent) < 0.0 {
                    -1.0
                } else {
                    1.0
                };
            }

            triangles.push(Triangle {
                v0: v0.position,
                v1: v1.position,
                v2: v2.position,
                n0: v0.normal,
                n1: v1.normal,
                n2: v2.normal,
                uv0: v0.uv,
                uv1: v1.uv,
                uv2: v2.uv,
                color: v0.color,
                emissive: v0.emissive,
                geometric_normal,
                area: len * 0.5,
                albedo_texture: mat.albedo_texture,
                emissive_texture: mat.emissive_texture,
                normal_texture: mat.normal_texture,
                roughness_texture: mat.roughness_texture,
                metallic_texture: mat.metallic_texture,
                alpha_clip: mat.alpha_clip,
                material: mat.kind,
                ior: mat.ior,
                roughness: mat.roughness,
                metallic: mat.metallic,
                tangent,
                bitangent_sign,
            });
        }
    }

    Ok(triangles)
}
