use std::sync::Arc;

use crate::{
    error::{HalationError, HalationResult},
    geom::Extent,
};

/// Immutable raster in row-major premultiplied RGBA8.
///
/// Filters never mutate an image in place; every operation returns a new
/// value. Cloning shares the pixel storage.
#[derive(Clone, Debug)]
pub struct Image {
    extent: Extent,
    data: Arc<Vec<u8>>,
}

impl Image {
    pub fn from_premul_rgba8(extent: Extent, data: Vec<u8>) -> HalationResult<Self> {
        let expected = extent
            .area()
            .checked_mul(4)
            .ok_or_else(|| HalationError::validation("image byte size overflow"))?;
        if data.len() as u64 != expected {
            return Err(HalationError::validation(format!(
                "image data length {} does not match {}x{} rgba8",
                data.len(),
                extent.width,
                extent.height
            )));
        }
        Ok(Self {
            extent,
            data: Arc::new(data),
        })
    }

    pub fn from_straight_rgba8(extent: Extent, mut data: Vec<u8>) -> HalationResult<Self> {
        premultiply_rgba8_in_place(&mut data);
        Self::from_premul_rgba8(extent, data)
    }

    /// Uniform fill; `rgba` is premultiplied.
    pub fn solid(extent: Extent, rgba: [u8; 4]) -> Self {
        let data = rgba.repeat(extent.area() as usize);
        Self {
            extent,
            data: Arc::new(data),
        }
    }

    pub fn extent(&self) -> Extent {
        self.extent
    }

    pub fn width(&self) -> u32 {
        self.extent.width
    }

    pub fn height(&self) -> u32 {
        self.extent.height
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// The shared pixel storage, used for cheap identity checks.
    pub fn shared_data(&self) -> Arc<Vec<u8>> {
        Arc::clone(&self.data)
    }

    pub fn pixel(&self, x: u32, y: u32) -> [u8; 4] {
        let idx = ((y as usize * self.extent.width as usize) + x as usize) * 4;
        [
            self.data[idx],
            self.data[idx + 1],
            self.data[idx + 2],
            self.data[idx + 3],
        ]
    }

    /// Edge-clamped integer sampling.
    pub fn sample_clamped(&self, x: i64, y: i64) -> [u8; 4] {
        let cx = x.clamp(0, i64::from(self.extent.width) - 1) as u32;
        let cy = y.clamp(0, i64::from(self.extent.height) - 1) as u32;
        self.pixel(cx, cy)
    }

    /// Edge-clamped bilinear sampling at a fractional position.
    pub fn sample_bilinear(&self, x: f32, y: f32) -> [u8; 4] {
        let x0 = x.floor();
        let y0 = y.floor();
        let fx = x - x0;
        let fy = y - y0;
        let x0 = x0 as i64;
        let y0 = y0 as i64;

        let p00 = self.sample_clamped(x0, y0);
        let p10 = self.sample_clamped(x0 + 1, y0);
        let p01 = self.sample_clamped(x0, y0 + 1);
        let p11 = self.sample_clamped(x0 + 1, y0 + 1);

        let mut out = [0u8; 4];
        for c in 0..4 {
            let top = p00[c] as f32 * (1.0 - fx) + p10[c] as f32 * fx;
            let bot = p01[c] as f32 * (1.0 - fx) + p11[c] as f32 * fx;
            out[c] = (top * (1.0 - fy) + bot * fy).round().clamp(0.0, 255.0) as u8;
        }
        out
    }
}

impl PartialEq for Image {
    fn eq(&self, other: &Self) -> bool {
        self.extent == other.extent
            && (Arc::ptr_eq(&self.data, &other.data) || *self.data == *other.data)
    }
}

pub(crate) fn premultiply_rgba8_in_place(rgba: &mut [u8]) {
    for px in rgba.chunks_exact_mut(4) {
        let a = px[3] as u16;
        if a == 0 {
            px[0] = 0;
            px[1] = 0;
            px[2] = 0;
            continue;
        }
        px[0] = ((px[0] as u16 * a + 127) / 255) as u8;
        px[1] = ((px[1] as u16 * a + 127) / 255) as u8;
        px[2] = ((px[2] as u16 * a + 127) / 255) as u8;
    }
}
