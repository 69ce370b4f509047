//! Two-pass gaussian blur over premultiplied RGBA8.
//!
//! Sampling is edge-clamped, which behaves like blurring an edge-extended
//! copy of the image: edges do not darken toward transparent black.

use crate::{
    error::{HalationError, HalationResult},
    image::Image,
};

pub fn blur_image(image: &Image, radius_px: u32, sigma: f32) -> HalationResult<Image> {
    if radius_px == 0 {
        return Ok(image.clone());
    }
    let kernel = gaussian_kernel_q16(radius_px, sigma)?;
    let (w, h) = (image.width(), image.height());
    let mut tmp = vec![0u8; image.data().len()];
    let mut out = vec![0u8; image.data().len()];

    blur_pass(image.data(), &mut tmp, w, h, &kernel, Axis::Horizontal);
    blur_pass(&tmp, &mut out, w, h, &kernel, Axis::Vertical);
    Image::from_premul_rgba8(image.extent(), out)
}

/// Default sigma for a given radius when the caller does not supply one.
pub fn sigma_for_radius(radius_px: u32) -> f32 {
    (radius_px as f32 / 2.0).max(0.5)
}

enum Axis {
    Horizontal,
    Vertical,
}

// Q16.16 fixed-point weights summing to exactly 1<<16, so a constant image
// blurs to itself.
fn gaussian_kernel_q16(radius: u32, sigma: f32) -> HalationResult<Vec<u32>> {
    if radius == 0 {
        return Ok(vec![1 << 16]);
    }
    if !sigma.is_finite() || sigma <= 0.0 {
        return Err(HalationError::validation("blur sigma must be > 0"));
    }

    let r = radius as i32;
    let mut weights_f = Vec::<f64>::with_capacity((2 * r + 1) as usize);
    let mut sum = 0.0f64;
    let sigma = sigma as f64;
    let denom = 2.0 * sigma * sigma;
    for i in -r..=r {
        let x = i as f64;
        let w = (-x * x / denom).exp();
        weights_f.push(w);
        sum += w;
    }
    if sum <= 0.0 {
        return Err(HalationError::render("gaussian kernel sum is zero"));
    }

    let mut weights = Vec::<u32>::with_capacity(weights_f.len());
    let mut acc: i64 = 0;
    for &wf in &weights_f {
        let q = ((wf / sum) * 65536.0).round() as i64;
        let q = q.clamp(0, 65536);
        weights.push(q as u32);
        acc += q;
    }
    let delta = 65536i64 - acc;
    if delta != 0 {
        let mid = weights.len() / 2;
        let mid_val = i64::from(weights[mid]);
        weights[mid] = (mid_val + delta).clamp(0, 65536) as u32;
    }

    Ok(weights)
}

fn blur_pass(src: &[u8], dst: &mut [u8], width: u32, height: u32, k: &[u32], axis: Axis) {
    let radius = (k.len() / 2) as i32;
    let w = width as i32;
    let h = height as i32;

    for y in 0..h {
        for x in 0..w {
            let mut acc = [0u64; 4];
            for (ki, &kw) in k.iter().enumerate() {
                let d = ki as i32 - radius;
                let (sx, sy) = match axis {
                    Axis::Horizontal => ((x + d).clamp(0, w - 1), y),
                    Axis::Vertical => (x, (y + d).clamp(0, h - 1)),
                };
                let idx = ((sy * w + sx) as usize) * 4;
                for c in 0..4 {
                    acc[c] += u64::from(kw) * u64::from(src[idx + c]);
                }
            }
            let out_idx = ((y * w + x) as usize) * 4;
            for c in 0..4 {
                dst[out_idx + c] = q16_to_u8(acc[c]);
            }
        }
    }
}

fn q16_to_u8(acc: u64) -> u8 {
    let v = (acc + 32768) >> 16;
    v.min(255) as u8
}
