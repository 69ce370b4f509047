//! CPU reference implementations of the compute kernels.
//!
//! These are the semantics of record: the GPU path must match them within
//! quantization error.

use crate::{
    error::HalationResult,
    image::Image,
    kernel::{
        BurnArgs, ColorTableArgs, DispersionArgs, KernelArgs, ThresholdArgs, VignetteArgs,
    },
};

// Half-angle of the reference field of view the vignette model assumes at the
// image corner (tuned by inspection).
const VIGNETTE_CORNER_HALF_ANGLE: f32 = 0.55;

pub(crate) fn execute(args: &KernelArgs, image: &Image) -> HalationResult<Image> {
    match args {
        KernelArgs::Threshold(a) => threshold(image, a),
        KernelArgs::ColorTable(a) => color_table(image, a),
        KernelArgs::Burn(a) => burn(image, a),
        KernelArgs::Vignette(a) => vignette(image, a),
        KernelArgs::Dispersion(a) => dispersion(image, a),
    }
}

fn luma(px: [u8; 4]) -> f32 {
    (0.2126 * px[0] as f32 + 0.7152 * px[1] as f32 + 0.0722 * px[2] as f32) / 255.0
}

fn threshold(image: &Image, args: &ThresholdArgs) -> HalationResult<Image> {
    let mut out = vec![0u8; image.data().len()];
    for (o, px) in out.chunks_exact_mut(4).zip(image.data().chunks_exact(4)) {
        let p = [px[0], px[1], px[2], px[3]];
        if luma(p) >= args.cutoff {
            o.copy_from_slice(px);
        }
    }
    Image::from_premul_rgba8(image.extent(), out)
}

fn color_table(image: &Image, args: &ColorTableArgs) -> HalationResult<Image> {
    let t = args.intensity.clamp(0.0, 1.0);
    if t <= 0.0 {
        return Ok(image.clone());
    }
    let mut out = vec![0u8; image.data().len()];
    for (o, px) in out.chunks_exact_mut(4).zip(image.data().chunks_exact(4)) {
        let a = px[3];
        if a == 0 {
            continue;
        }
        let af = a as f32 / 255.0;
        let rgb = [
            px[0] as f32 / 255.0 / af,
            px[1] as f32 / 255.0 / af,
            px[2] as f32 / 255.0 / af,
        ];
        let mapped = args.lut.sample(rgb);
        for c in 0..3 {
            let v = rgb[c] + (mapped[c].clamp(0.0, 1.0) - rgb[c]) * t;
            o[c] = (v * af * 255.0).round().clamp(0.0, 255.0) as u8;
        }
        o[3] = a;
    }
    Image::from_premul_rgba8(image.extent(), out)
}

fn burn(image: &Image, args: &BurnArgs) -> HalationResult<Image> {
    let feather = args.feather_px.max(0.0);
    let mut out = vec![0u8; image.data().len()];
    let w = image.width();

    for y in 0..image.height() {
        for x in 0..w {
            let d = args.inner.outside_distance(x as f32 + 0.5, y as f32 + 0.5);
            let k = if d <= 0.0 {
                1.0
            } else if feather <= 0.0 || d >= feather {
                0.0
            } else {
                1.0 - smoothstep(0.0, feather, d)
            };
            let px = image.pixel(x, y);
            let idx = ((y * w + x) as usize) * 4;
            for c in 0..4 {
                out[idx + c] = (px[c] as f32 * k).round() as u8;
            }
        }
    }
    Image::from_premul_rgba8(image.extent(), out)
}

fn vignette(image: &Image, args: &VignetteArgs) -> HalationResult<Image> {
    let intensity = args.intensity.clamp(0.0, 1.0);
    if intensity <= 0.0 {
        return Ok(image.clone());
    }

    let rect = image.extent().rect();
    let (cx, cy) = rect.center();
    let half_diag = rect.half_diagonal().max(1.0);
    // Focal length placing the corner at the reference half-angle.
    let focal = half_diag / VIGNETTE_CORNER_HALF_ANGLE.tan();

    let mut out = vec![0u8; image.data().len()];
    let w = image.width();
    for y in 0..image.height() {
        for x in 0..w {
            let dx = x as f32 + 0.5 - cx;
            let dy = y as f32 + 0.5 - cy;
            let tan2 = (dx * dx + dy * dy) / (focal * focal);
            // cos⁴θ via 1/(1+tan²θ)².
            let falloff = 1.0 / ((1.0 + tan2) * (1.0 + tan2));
            let k = 1.0 - intensity * (1.0 - falloff);

            let px = image.pixel(x, y);
            let idx = ((y * w + x) as usize) * 4;
            for c in 0..3 {
                out[idx + c] = (px[c] as f32 * k).round() as u8;
            }
            out[idx + 3] = px[3];
        }
    }
    Image::from_premul_rgba8(image.extent(), out)
}

fn dispersion(image: &Image, args: &DispersionArgs) -> HalationResult<Image> {
    if args.scale_px <= 0.0 && args.base_px <= 0.0 {
        return Ok(image.clone());
    }

    let rect = image.extent().rect();
    let (cx, cy) = rect.center();
    let half_diag = rect.half_diagonal().max(1.0);

    let mut out = vec![0u8; image.data().len()];
    let w = image.width();
    for y in 0..image.height() {
        for x in 0..w {
            let px_x = x as f32 + 0.5;
            let px_y = y as f32 + 0.5;
            let dx = px_x - cx;
            let dy = px_y - cy;
            let r = (dx * dx + dy * dy).sqrt();

            let idx = ((y * w + x) as usize) * 4;
            if r < 1e-3 {
                let px = image.pixel(x, y);
                out[idx..idx + 4].copy_from_slice(&px);
                continue;
            }

            let (ux, uy) = (dx / r, dy / r);
            let magnitude = args.base_px + args.scale_px * (r / half_diag).powf(args.exponent);

            // Red fringes outward, blue inward, green stays put.
            let red = image.sample_bilinear(px_x + ux * magnitude - 0.5, px_y + uy * magnitude - 0.5);
            let green = image.pixel(x, y);
            let blue = image.sample_bilinear(px_x - ux * magnitude - 0.5, px_y - uy * magnitude - 0.5);

            out[idx] = red[0];
            out[idx + 1] = green[1];
            out[idx + 2] = blue[2];
            out[idx + 3] = green[3];
        }
    }
    Image::from_premul_rgba8(image.extent(), out)
}

fn smoothstep(a: f32, b: f32, x: f32) -> f32 {
    if x <= a {
        return 0.0;
    }
    if x >= b {
        return 1.0;
    }
    let t = (x - a) / (b - a);
    (t * t * (3.0 - 2.0 * t)).clamp(0.0, 1.0)
}
