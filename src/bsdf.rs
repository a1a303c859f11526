use glam::Vec3;
use std::f32::consts::PI;

use crate::util;

/// One draw from a BSDF. For rough lobes `throughput` is BRDF·cosθ/pdf;
/// for delta lobes it is the plain tint and `pdf` is the sentinel 1.0,
/// which MIS must never divide by — the integrator gates on its own
/// delta flag instead.
#[derive(Clone, Copy)]
pub struct BsdfSample {
    pub direction: Vec3,
    pub throughput: Vec3,
    pub pdf: f32,
}

pub struct MirrorBsdf {
    pub color: Vec3,
}

impl MirrorBsdf {
    pub fn sample(&self, normal: Vec3, wo: Vec3) -> BsdfSample {
        BsdfSample {
            direction: util::reflect(-wo, normal),
            throughput: self.color,
            pdf: 1.0,
        }
    }
}

/// Thin glass interface with Schlick-approximated Fresnel. The tint applies
/// on transmission only.
pub struct DielectricBsdf {
    pub color: Vec3,
    pub ior: f32,
}

impl DielectricBsdf {
    pub fn sample(&self, normal: Vec3, wo: Vec3, front_face: bool, u: f32) -> BsdfSample {
        let (eta_i, eta_t) = if front_face {
            (1.0, self.ior)
        } else {
            (self.ior, 1.0)
        };
        let eta = eta_i / eta_t;
        let cos_i = normal.dot(wo).max(0.0);

        let f0 = ((eta_i - eta_t) / (eta_i + eta_t)).powi(2);
        let mut fresnel = f0 + (1.0 - f0) * (1.0 - cos_i).powi(5);

        let sin_t_sq = eta * eta * (1.0 - cos_i * cos_i);
        if sin_t_sq > 1.0 {
            fresnel = 1.0; // total internal reflection
        }

        if u < fresnel {
            BsdfSample {
                direction: util::reflect(-wo, normal),
                throughput: Vec3::ONE,
                pdf: 1.0,
            }
        } else {
            let wi = util::refract(-wo, normal, eta);
            if wi.length_squared() < 1e-6 {
                return BsdfSample {
                    direction: util::reflect(-wo, normal),
                    throughput: Vec3::ONE,
                    pdf: 1.0,
                };
            }
            BsdfSample {
                direction: wi,
                throughput: self.color,
                pdf: 1.0,
            }
        }
    }
}

/// Cook-Torrance GGX specular lobe over a Lambertian base, sampled with
/// the visible-normal distribution (Heitz 2018).
pub struct CookTorranceBsdf {
    pub base_color: Vec3,
    pub roughness: f32,
    pub metallic: f32,
    pub ior: f32,
}

impl CookTorranceBsdf {
    /// The 0.01 roughness floor keeps D finite and the PDF well-defined.
    fn alpha(&self) -> f32 {
        let r = self.roughness.max(0.01);
        r * r
    }

    fn f0(&self) -> Vec3 {
        let f = ((self.ior - 1.0) / (self.ior + 1.0)).powi(2);
        Vec3::splat(f).lerp(self.base_color, self.metallic)
    }

    fn spec_weight(&self) -> f32 {
        0.5 * (1.0 + self.metallic)
    }

    fn d_ggx(n_dot_h: f32, alpha: f32) -> f32 {
        let a2 = alpha * alpha;
        let denom = n_dot_h * n_dot_h * (a2 - 1.0) + 1.0;
        a2 / (PI * denom * denom)
    }

    fn g1_smith(n_dot_x: f32, alpha: f32) -> f32 {
        let a2 = alpha * alpha;
        2.0 * n_dot_x / (n_dot_x + (a2 + (1.0 - a2) * n_dot_x * n_dot_x).sqrt())
    }

    fn f_schlick(cos_theta: f32, f0: Vec3) -> Vec3 {
        f0 + (Vec3::ONE - f0) * (1.0 - cos_theta).powi(5)
    }

    /// Heitz 2018 visible-normal sampling: stretch the view vector, sample
    /// the projected disk, reproject and unstretch. `ve` is in the local
    /// frame where z is the shading normal.
    fn sample_vndf(ve: Vec3, alpha: f32, u1: f32, u2: f32) -> Vec3 {
        let vh = Vec3::new(alpha * ve.x, alpha * ve.y, ve.z).normalize();

        let lensq = vh.x * vh.x + vh.y * vh.y;
        let t1 = if lensq > 0.0 {
            Vec3::new(-vh.y, vh.x, 0.0) / lensq.sqrt()
        } else {
            Vec3::X
        };
        let t2 = vh.cross(t1);

        let r = u1.sqrt();
        let phi = 2.0 * PI * u2;
        let p1 = r * phi.cos();
        let mut p2 = r * phi.sin();
        let s = 0.5 * (1.0 + vh.z);
        p2 = (1.0 - s) * (1.0 - p1 * p1).max(0.0).sqrt() + s * p2;

        let nh = t1 * p1 + t2 * p2 + vh * (1.0 - p1 * p1 - p2 * p2).max(0.0).sqrt();

        Vec3::new(alpha * nh.x, alpha * nh.y, nh.z.max(0.0)).normalize()
    }

    /// `ng` is the geometric normal. The diffuse lobe is sampled around `ng`
    /// rather than the shading normal so every bounce stays strictly above
    /// the actual surface; otherwise grazing pixels where the interpolated
    /// normal crosses the geometric horizon go black.
    pub fn sample(&self, n: Vec3, ng: Vec3, v: Vec3, u1: f32, u2: f32, u_lobe: f32) -> BsdfSample {
        let alpha = self.alpha();

        let l = if u_lobe < self.spec_weight() {
            let (t, b) = util::build_onb(n);
            let v_local = Vec3::new(v.dot(t), v.dot(b), v.dot(n));
            let h_local = Self::sample_vndf(v_local, alpha, u1, u2);
            let h = (t * h_local.x + b * h_local.y + n * h_local.z).normalize();

            let l = util::reflect(-v, h);
            if l.dot(ng) <= 0.0 {
                // Grazing VNDF reflection went below the geometric surface;
                // fall back to a cosine sample so the path can continue.
                // u1/u2 are reused, which is acceptable for this rare case.
                util::cosine_sample_hemisphere(ng, u1, u2)
            } else {
                l
            }
        } else {
            util::cosine_sample_hemisphere(ng, u1, u2)
        };

        let rejected = BsdfSample {
            direction: l,
            throughput: Vec3::ZERO,
            pdf: 0.0,
        };
        if l.dot(ng) <= 0.0 || n.dot(l) <= 0.0 {
            return rejected;
        }

        let brdf = self.evaluate(n, v, l);
        let pdf = self.pdf(n, v, l);
        if pdf < 1e-8 {
            return rejected;
        }

        BsdfSample {
            direction: l,
            throughput: brdf * n.dot(l) / pdf,
            pdf,
        }
    }

    pub fn evaluate(&self, n: Vec3, v: Vec3, l: Vec3) -> Vec3 {
        let n_dot_l = n.dot(l);
        if n_dot_l <= 0.0 {
            return Vec3::ZERO;
        }
        // Grazing V can dip slightly negative; the 1e-4 clamp here and the
        // 1e-8 clamp in the specular denominator are deliberately different
        // and both load-bearing for grazing-angle convergence.
        let n_dot_v = n.dot(v).max(1e-4);

        let alpha = self.alpha();
        let f0 = self.f0();
        let h = (v + l).normalize();
        let n_dot_h = n.dot(h).max(0.0);
        let v_dot_h = v.dot(h).max(0.0);

        let d = Self::d_ggx(n_dot_h, alpha);
        let g = Self::g1_smith(n_dot_v, alpha) * Self::g1_smith(n_dot_l, alpha);
        let f = Self::f_schlick(v_dot_h, f0);

        let spec = d * g * f / (4.0 * n_dot_v * n_dot_l).max(1e-8);
        let diff = (Vec3::ONE - f) * (1.0 - self.metallic) * self.base_color / PI;

        diff + spec
    }

    pub fn pdf(&self, n: Vec3, v: Vec3, l: Vec3) -> f32 {
        let n_dot_l = n.dot(l);
        if n_dot_l <= 0.0 {
            return 0.0;
        }
        let n_dot_v = n.dot(v).max(1e-4);
        let alpha = self.alpha();
        let spec_weight = self.spec_weight();

        let h = (v + l).normalize();
        let n_dot_h = n.dot(h).max(0.0);
        let spec_pdf =
            Self::d_ggx(n_dot_h, alpha) * Self::g1_smith(n_dot_v, alpha) / (4.0 * n_dot_v);
        let diff_pdf = n_dot_l / PI;

        spec_weight * spec_pdf + (1.0 - spec_weight) * diff_pdf
    }
}
