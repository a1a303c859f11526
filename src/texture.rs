use glam::{Vec2, Vec4};

/// 8-bit RGBA texture, row 0 at the top. Material textures arrive
/// pre-decoded from the importer; the tracer only ever reads them.
pub struct Texture {
    width: u32,
    height: u32,
    pixels: Vec<u8>,
}

impl Texture {
    pub fn new(width: u32, height: u32, pixels: Vec<u8>) -> Self {
        debug_assert_eq!(pixels.len(), width as usize * height as usize * 4);
        Self {
            width,
            height,
            pixels,
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    /// Nearest-texel sample. UVs wrap by fractional part; V is flipped so
    /// v=0 addresses the bottom row of the source image.
    pub fn sample(&self, uv: Vec2) -> Vec4 {
        let u = uv.x - uv.x.floor();
        let v = 1.0 - (uv.y - uv.y.floor());

        let px = ((u * self.width as f32) as i32).clamp(0, self.width as i32 - 1) as usize;
        let py = ((v * self.height as f32) as i32).clamp(0, self.height as i32 - 1) as usize;
        let idx = (py * self.width as usize + px) * 4;

        Vec4::new(
            self.pixels[idx] as f32 / 255.0,
            self.pixels[idx + 1] as f32 / 255.0,
            self.pixels[idx + 2] as f32 / 255.0,
            self.pixels[idx + 3] as f32 / 255.0,
        )
    }
}
