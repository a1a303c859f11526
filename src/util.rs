use glam::{Vec2, Vec3};
use std::f32::consts::PI;

/// Orthonormal basis around `n`; returns (tangent, bitangent).
pub fn build_onb(n: Vec3) -> (Vec3, Vec3) {
    let a = if n.x.abs() > 0.9 { Vec3::Y } else { Vec3::X };
    let t = n.cross(a).normalize();
    let b = n.cross(t);
    (t, b)
}

pub fn reflect(i: Vec3, n: Vec3) -> Vec3 {
    i - n * 2.0 * i.dot(n)
}

/// Snell refraction of incident direction `i` (pointing into the surface).
/// Returns the zero vector on total internal reflection.
pub fn refract(i: Vec3, n: Vec3, eta: f32) -> Vec3 {
    let n_dot_i = n.dot(i);
    let k = 1.0 - eta * eta * (1.0 - n_dot_i * n_dot_i);
    if k < 0.0 {
        Vec3::ZERO
    } else {
        eta * i - (eta * n_dot_i + k.sqrt()) * n
    }
}

/// Cosine-weighted hemisphere sample around `n`. PDF = cosθ/π.
pub fn cosine_sample_hemisphere(n: Vec3, u1: f32, u2: f32) -> Vec3 {
    let phi = 2.0 * PI * u1;
    let cos_theta = (1.0 - u2).sqrt();
    let sin_theta = u2.sqrt();
    let (t, b) = build_onb(n);
    (t * (phi.cos() * sin_theta) + b * (phi.sin() * sin_theta) + n * cos_theta).normalize()
}

/// Shirley's concentric mapping of the unit square onto the unit disk.
pub fn concentric_sample_disk(u1: f32, u2: f32) -> Vec2 {
    let a = 2.0 * u1 - 1.0;
    let b = 2.0 * u2 - 1.0;
    if a == 0.0 && b == 0.0 {
        return Vec2::ZERO;
    }
    let (r, phi) = if a.abs() > b.abs() {
        (a, (PI / 4.0) * (b / a))
    } else {
        (b, (PI / 2.0) - (PI / 4.0) * (a / b))
    };
    Vec2::new(r * phi.cos(), r * phi.sin())
}

/// Uniform direction inside the cone of half-angle acos(`cos_max`) around `axis`.
pub fn sample_cone(axis: Vec3, cos_max: f32, u1: f32, u2: f32) -> Vec3 {
    let cos_theta = 1.0 - u1 * (1.0 - cos_max);
    let sin_theta = (1.0 - cos_theta * cos_theta).max(0.0).sqrt();
    let phi = 2.0 * PI * u2;
    let (t, b) = build_onb(axis);
    (t * (phi.cos() * sin_theta) + b * (phi.sin() * sin_theta) + axis * cos_theta).normalize()
}

/// Uniform point on a triangle.
pub fn sample_triangle(a: Vec3, b: Vec3, c: Vec3, u1: f32, u2: f32) -> Vec3 {
    let s = u1.sqrt();
    a * (1.0 - s) + b * (s * (1.0 - u2)) + c * (s * u2)
}

/// Rec. 709 luma of linear RGB.
pub fn luminance(c: Vec3) -> f32 {
    0.2126 * c.x + 0.7152 * c.y + 0.0722 * c.z
}

/// Replaces non-finite radiance with black before it can poison accumulation.
pub fn mask_nan(v: Vec3) -> Vec3 {
    if v.is_finite() {
        v
    } else {
        Vec3::ZERO
    }
}
