use glam::Vec3;
use std::f32::consts::PI;

use crate::rng::Rng;
use crate::util;

/// Equirectangular float-RGB environment with a two-level CDF: a marginal
/// CDF over rows and a conditional CDF over columns per row, both weighted
/// by sin θ so inversion yields directions uniform in solid angle.
pub struct EnvironmentMap {
    width: usize,
    height: usize,
    pixels: Vec<f32>,
    cond_cdf: Vec<f32>,
    marginal_cdf: Vec<f32>,
    total_integral: f32,
}

impl EnvironmentMap {
    /// `pixels` are RGB triplets, row 0 at the top.
    pub fn new(width: usize, height: usize, pixels: Vec<f32>) -> Self {
        debug_assert_eq!(pixels.len(), width * height * 3);

        let mut cond_cdf = vec![0.0f32; width * height];
        let mut marginal_cdf = vec![0.0f32; height];
        let mut total_integral = 0.0f32;

        for y in 0..height {
            let sin_theta = (PI * (y as f32 + 0.5) / height as f32).sin();
            let mut row_sum = 0.0;

            for x in 0..width {
                let idx = (y * width + x) * 3;
                let lum = util::luminance(Vec3::new(
                    pixels[idx],
                    pixels[idx + 1],
                    pixels[idx + 2],
                ));
                row_sum += lum * sin_theta;
                cond_cdf[y * width + x] = row_sum;
            }

            if row_sum > 0.0 {
                for x in 0..width {
                    cond_cdf[y * width + x] /= row_sum;
                }
            } else {
                // Zero-energy row: uniform conditional CDF
                for x in 0..width {
                    cond_cdf[y * width + x] = (x + 1) as f32 / width as f32;
                }
            }

            total_integral += row_sum;
            marginal_cdf[y] = total_integral;
        }

        if total_integral > 0.0 {
            for c in marginal_cdf.iter_mut() {
                *c /= total_integral;
            }
        }

        Self {
            width,
            height,
            pixels,
            cond_cdf,
            marginal_cdf,
            total_integral,
        }
    }

    pub fn total_integral(&self) -> f32 {
        self.total_integral
    }

    fn texel(&self, px: usize, py: usize) -> Vec3 {
        let idx = (py * self.width + px) * 3;
        Vec3::new(self.pixels[idx], self.pixels[idx + 1], self.pixels[idx + 2])
    }

    fn direction_to_texel(&self, dir: Vec3) -> (usize, usize) {
        let u = 0.5 + dir.z.atan2(dir.x) / (2.0 * PI);
        let v = 0.5 - dir.y.clamp(-1.0, 1.0).asin() / PI;
        let px = ((u * self.width as f32) as i32).clamp(0, self.width as i32 - 1) as usize;
        let py = ((v * self.height as f32) as i32).clamp(0, self.height as i32 - 1) as usize;
        (px, py)
    }

    /// Radiance along `dir` via the equirectangular mapping.
    pub fn radiance(&self, dir: Vec3) -> Vec3 {
        let (px, py) = self.direction_to_texel(dir);
        self.texel(px, py)
    }

    /// Draws a direction by CDF inversion: the marginal picks the row, the
    /// row's conditional picks the column. Returns (direction, radiance, pdf).
    pub fn sample(&self, rng: &mut Rng) -> (Vec3, Vec3, f32) {
        let u1 = rng.next_f32();
        let row = self
            .marginal_cdf
            .partition_point(|&c| c < u1)
            .min(self.height - 1);

        let u2 = rng.next_f32();
        let row_cdf = &self.cond_cdf[row * self.width..(row + 1) * self.width];
        let col = row_cdf.partition_point(|&c| c < u2).min(self.width - 1);

        // Texel center back to a direction
        let tex_u = (col as f32 + 0.5) / self.width as f32;
        let tex_v = (row as f32 + 0.5) / self.height as f32;
        let phi = (tex_u - 0.5) * 2.0 * PI;
        let theta = tex_v * PI;
        let sin_theta = theta.sin();
        let cos_theta = theta.cos();
        let dir = Vec3::new(sin_theta * phi.cos(), cos_theta, sin_theta * phi.sin());

        let radiance = self.texel(col, row);
        let lum = util::luminance(radiance);
        if sin_theta < 1e-8 || self.total_integral < 1e-8 || lum < 1e-8 {
            return (dir, radiance, 0.0);
        }

        let pdf = lum * (self.width * self.height) as f32
            / (2.0 * PI * PI * sin_theta * self.total_integral);
        (dir, radiance, pdf)
    }

    /// PDF of `dir` under the same distribution `sample` draws from.
    pub fn pdf(&self, dir: Vec3) -> f32 {
        let (px, py) = self.direction_to_texel(dir);
        let lum = util::luminance(self.texel(px, py));

        let sin_theta = (PI * (py as f32 + 0.5) / self.height as f32).sin();
        if sin_theta < 1e-8 || self.total_integral < 1e-8 {
            return 0.0;
        }

        lum * (self.width * self.height) as f32
            / (2.0 * PI * PI * sin_theta * self.total_integral)
    }
}
