//! 3D color look-up tables decoded from square atlas images.
//!
//! The LUT resource arrives as one decoded raster: an `N²`-wide square image
//! holding an `N³` lattice as a grid of `N×N` tiles (512×512 = 64³ in an 8×8
//! grid). It is unpacked once at resource-resolution time and sampled
//! trilinearly per pixel.

use crate::{
    error::{HalationError, HalationResult},
    image::Image,
};

#[derive(Clone, Debug)]
pub struct Lut3d {
    size: u32,
    lattice: Vec<[f32; 3]>,
}

impl Lut3d {
    pub fn identity(size: u32) -> Self {
        let n = size.max(2);
        let mut lattice = Vec::with_capacity((n * n * n) as usize);
        let scale = 1.0 / (n - 1) as f32;
        for b in 0..n {
            for g in 0..n {
                for r in 0..n {
                    lattice.push([r as f32 * scale, g as f32 * scale, b as f32 * scale]);
                }
            }
        }
        Self { size: n, lattice }
    }

    /// Unpack a square tile-grid atlas.
    ///
    /// The cube size is inferred from the pixel count (`N³ = width × height`);
    /// images that do not form a perfect cube atlas are rejected.
    pub fn from_atlas_image(image: &Image) -> HalationResult<Self> {
        let extent = image.extent();
        if extent.width != extent.height {
            return Err(HalationError::resource(
                "lut atlas must be square (e.g. 512x512)",
            ));
        }
        let size = (extent.area() as f64).cbrt().round() as u32;
        if size < 2 || u64::from(size).pow(3) != extent.area() {
            return Err(HalationError::resource(format!(
                "lut atlas {}x{} is not a perfect cube lattice",
                extent.width, extent.height
            )));
        }
        let tiles_per_row = extent.width / size;

        let mut lattice = Vec::with_capacity((size * size * size) as usize);
        for b in 0..size {
            let tile_x = (b % tiles_per_row) * size;
            let tile_y = (b / tiles_per_row) * size;
            for g in 0..size {
                for r in 0..size {
                    let px = image.pixel(tile_x + r, tile_y + g);
                    lattice.push([
                        px[0] as f32 / 255.0,
                        px[1] as f32 / 255.0,
                        px[2] as f32 / 255.0,
                    ]);
                }
            }
        }
        Ok(Self { size, lattice })
    }

    pub fn size(&self) -> u32 {
        self.size
    }

    fn at(&self, r: u32, g: u32, b: u32) -> [f32; 3] {
        let n = self.size;
        self.lattice[((b * n + g) * n + r) as usize]
    }

    /// Trilinear lookup; input and output are straight RGB in 0–1.
    pub fn sample(&self, rgb: [f32; 3]) -> [f32; 3] {
        let n = self.size;
        let max = (n - 1) as f32;
        let coord = |v: f32| -> (u32, u32, f32) {
            let x = v.clamp(0.0, 1.0) * max;
            let lo = x.floor().min(max - 1.0).max(0.0);
            (lo as u32, lo as u32 + 1, x - lo)
        };

        let (r0, r1, fr) = coord(rgb[0]);
        let (g0, g1, fg) = coord(rgb[1]);
        let (b0, b1, fb) = coord(rgb[2]);

        let mut out = [0.0f32; 3];
        for (c, out_c) in out.iter_mut().enumerate() {
            let lerp = |a: f32, b: f32, t: f32| a + (b - a) * t;
            let c00 = lerp(self.at(r0, g0, b0)[c], self.at(r1, g0, b0)[c], fr);
            let c10 = lerp(self.at(r0, g1, b0)[c], self.at(r1, g1, b0)[c], fr);
            let c01 = lerp(self.at(r0, g0, b1)[c], self.at(r1, g0, b1)[c], fr);
            let c11 = lerp(self.at(r0, g1, b1)[c], self.at(r1, g1, b1)[c], fr);
            let c0 = lerp(c00, c10, fg);
            let c1 = lerp(c01, c11, fg);
            *out_c = lerp(c0, c1, fb);
        }
        out
    }
}
