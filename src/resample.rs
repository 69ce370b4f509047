//! Geometric resampling primitives: resize, crop, rotate, color matrix.

use kurbo::Affine;

use crate::{
    error::{HalationError, HalationResult},
    geom::{Extent, Rect},
    image::Image,
};

/// Resize to `target`.
///
/// A uniform downscale takes the Lanczos3 fast path; everything else goes
/// through an affine bilinear mapping.
pub fn resize(image: &Image, target: Extent) -> HalationResult<Image> {
    target
        .validate_nonempty()
        .map_err(|_| HalationError::render("resize target must be non-empty"))?;
    if target == image.extent() {
        return Ok(image.clone());
    }

    let sx = target.width as f64 / image.width() as f64;
    let sy = target.height as f64 / image.height() as f64;
    if (sx - sy).abs() < 1e-3 && sx < 1.0 {
        return lanczos_resize(image, target);
    }

    let affine = Affine::scale_non_uniform(sx, sy);
    affine_map(image, target, affine)
}

fn lanczos_resize(image: &Image, target: Extent) -> HalationResult<Image> {
    let src = image::RgbaImage::from_raw(image.width(), image.height(), image.data().to_vec())
        .ok_or_else(|| HalationError::render("resize source buffer is invalid"))?;
    let resized = image::imageops::resize(
        &src,
        target.width,
        target.height,
        image::imageops::FilterType::Lanczos3,
    );
    Image::from_premul_rgba8(target, resized.into_raw())
}

/// Crop to `rect` (floored, clamped to the image bounds).
pub fn crop(image: &Image, rect: Rect) -> HalationResult<Image> {
    let clamped = rect.floored().intersect(&image.extent().rect());
    let extent = clamped.floored_extent();
    extent
        .validate_nonempty()
        .map_err(|_| HalationError::render("crop rect does not intersect the image"))?;

    let x0 = clamped.x as u32;
    let y0 = clamped.y as u32;
    let row_bytes = extent.width as usize * 4;
    let src_row_bytes = image.width() as usize * 4;

    let mut out = Vec::with_capacity(extent.area() as usize * 4);
    for y in 0..extent.height {
        let start = (y0 + y) as usize * src_row_bytes + x0 as usize * 4;
        out.extend_from_slice(&image.data()[start..start + row_bytes]);
    }
    Image::from_premul_rgba8(extent, out)
}

/// Rotate about the image center; the output extent is the floored bounding
/// box of the rotated rect, and uncovered pixels are transparent.
pub fn rotate_about_center(image: &Image, radians: f32) -> HalationResult<Image> {
    if radians.abs() < 1e-6 {
        return Ok(image.clone());
    }

    let (w, h) = (image.width() as f64, image.height() as f64);
    let theta = radians as f64;
    let (sin, cos) = (theta.sin().abs(), theta.cos().abs());
    let out_w = (w * cos + h * sin).floor().max(1.0);
    let out_h = (w * sin + h * cos).floor().max(1.0);
    let target = Extent::new(out_w as u32, out_h as u32);

    let affine = Affine::translate((out_w / 2.0, out_h / 2.0))
        * Affine::rotate(theta)
        * Affine::translate((-w / 2.0, -h / 2.0));
    affine_map(image, target, affine)
}

// Inverse-maps every output pixel through `forward` and samples bilinearly.
// Output pixels mapping outside the source become transparent.
fn affine_map(image: &Image, target: Extent, forward: Affine) -> HalationResult<Image> {
    let inverse = forward.inverse();
    let (sw, sh) = (image.width() as f64, image.height() as f64);
    let mut out = vec![0u8; target.area() as usize * 4];

    for y in 0..target.height {
        for x in 0..target.width {
            let p = inverse * kurbo::Point::new(f64::from(x) + 0.5, f64::from(y) + 0.5);
            if p.x < 0.0 || p.y < 0.0 || p.x > sw || p.y > sh {
                continue;
            }
            let px = image.sample_bilinear(p.x as f32 - 0.5, p.y as f32 - 0.5);
            let idx = ((y * target.width + x) as usize) * 4;
            out[idx..idx + 4].copy_from_slice(&px);
        }
    }
    Image::from_premul_rgba8(target, out)
}

/// 4×4 channel matrix plus bias, applied to straight (unpremultiplied)
/// values. Rows are output channels over `[r, g, b, a]` inputs.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ColorMatrix {
    pub m: [[f32; 4]; 4],
    pub bias: [f32; 4],
}

impl ColorMatrix {
    pub fn identity() -> Self {
        let mut m = [[0.0; 4]; 4];
        for (i, row) in m.iter_mut().enumerate() {
            row[i] = 1.0;
        }
        Self { m, bias: [0.0; 4] }
    }

    /// Replace color with `rgb`, keeping the alpha channel: tints a glyph or
    /// overlay mask to a uniform color.
    pub fn tint(rgb: [f32; 3]) -> Self {
        Self {
            m: [
                [0.0, 0.0, 0.0, 0.0],
                [0.0, 0.0, 0.0, 0.0],
                [0.0, 0.0, 0.0, 0.0],
                [0.0, 0.0, 0.0, 1.0],
            ],
            bias: [rgb[0], rgb[1], rgb[2], 0.0],
        }
    }

    /// Move luminance into alpha and force white color — isolates a
    /// brightness mask from an opaque overlay.
    pub fn luma_to_alpha() -> Self {
        Self {
            m: [
                [0.0, 0.0, 0.0, 0.0],
                [0.0, 0.0, 0.0, 0.0],
                [0.0, 0.0, 0.0, 0.0],
                [0.2126, 0.7152, 0.0722, 0.0],
            ],
            bias: [1.0, 1.0, 1.0, 0.0],
        }
    }
}

pub fn color_matrix(image: &Image, matrix: &ColorMatrix) -> HalationResult<Image> {
    let mut out = vec![0u8; image.data().len()];
    for (o, px) in out.chunks_exact_mut(4).zip(image.data().chunks_exact(4)) {
        let a = px[3] as f32 / 255.0;
        let straight = if px[3] == 0 {
            [0.0, 0.0, 0.0, 0.0]
        } else {
            [
                px[0] as f32 / 255.0 / a,
                px[1] as f32 / 255.0 / a,
                px[2] as f32 / 255.0 / a,
                a,
            ]
        };

        let mut v = [0.0f32; 4];
        for (c, out_c) in v.iter_mut().enumerate() {
            let row = &matrix.m[c];
            *out_c = (row[0] * straight[0]
                + row[1] * straight[1]
                + row[2] * straight[2]
                + row[3] * straight[3]
                + matrix.bias[c])
                .clamp(0.0, 1.0);
        }

        let oa = v[3];
        o[0] = (v[0] * oa * 255.0).round() as u8;
        o[1] = (v[1] * oa * 255.0).round() as u8;
        o[2] = (v[2] * oa * 255.0).round() as u8;
        o[3] = (oa * 255.0).round() as u8;
    }
    Image::from_premul_rgba8(image.extent(), out)
}
