//! The composed film-look effects and their fixed application order.
//!
//! Order matters: grain and dust go on after color grading and the stamp so
//! they sit physically on top of the emulsion, while the vignette and leak
//! come before grading so the LUT also tints them.

use std::sync::Arc;

use crate::{
    blur_cpu::{blur_image, sigma_for_radius},
    composite_cpu::{BlendMode, blend_at, blend_images},
    error::{HalationError, HalationResult},
    filter::{ChainStep, Filter, intensity},
    geom::{Extent, Rect},
    image::Image,
    kernel::{
        BurnArgs, ColorTableArgs, DispersionArgs, KernelArgs, KernelRegistry, ThresholdArgs,
        VignetteArgs,
    },
    metadata::CaptureMetadata,
    params::FilterParameters,
    resample::{ColorMatrix, color_matrix, crop, resize, rotate_about_center},
    resources::ResourceBundle,
    stamp::{
        STAMP_FEATHER_NORMALIZED, STAMP_HEIGHT_NORMALIZED, STAMP_MARGIN_NORMALIZED,
        format_stamp, render_stamp_text,
    },
    transform::{PositionTransform, SizeTransform},
    units::{ImageUnit, RotationUnit},
};

// Normalized magnitudes at full parameter strength.
const BLUR_RADIUS_MAX: f32 = 0.01;
const GLOW_RADIUS_MAX: f32 = 0.02;
const CHROMA_SCALE_MAX: f32 = 0.008;
const CHROMA_BASE: f32 = 0.0008;
const CHROMA_EXPONENT: f32 = 2.5;
const LEAK_BLUR: f32 = 0.01;

pub fn pass_through() -> Filter {
    Filter::identity()
}

/// Threshold-isolated highlights, blurred and soft-light composited back,
/// scaled by the glow opacity.
pub fn glow(params: &FilterParameters, registry: &KernelRegistry) -> Filter {
    if params.glow_opacity <= 0.0 {
        return Filter::identity();
    }
    let registry = registry.clone();
    let cutoff = params.glow_threshold;
    let radius_unit = ImageUnit::Normalized(params.glow_radius * GLOW_RADIUS_MAX);
    let inner = Filter::new(move |image| {
        let highlights =
            registry.apply(&KernelArgs::Threshold(ThresholdArgs { cutoff }), image)?;
        let radius = radius_unit.resolve_floor(image.extent());
        let blurred = blur_image(&highlights, radius, sigma_for_radius(radius))?;
        blend_images(image, &blurred, BlendMode::SoftLight, 1.0)
    });
    intensity(params.glow_opacity, inner)
}

pub fn chromatic_dispersion(params: &FilterParameters, registry: &KernelRegistry) -> Filter {
    if params.chroma_scale <= 0.0 {
        return Filter::identity();
    }
    let registry = registry.clone();
    let scale_unit = ImageUnit::Normalized(params.chroma_scale * CHROMA_SCALE_MAX);
    let base_unit = ImageUnit::Normalized(CHROMA_BASE);
    Filter::new(move |image| {
        let args = DispersionArgs {
            scale_px: scale_unit.resolve(image.extent()),
            base_px: base_unit.resolve(image.extent()),
            exponent: CHROMA_EXPONENT,
        };
        registry.apply(&KernelArgs::Dispersion(args), image)
    })
}

/// Overall softness.
pub fn softness_blur(params: &FilterParameters) -> Filter {
    if params.blur_radius <= 0.0 {
        return Filter::identity();
    }
    let radius_unit = ImageUnit::Normalized(params.blur_radius * BLUR_RADIUS_MAX);
    Filter::new(move |image| {
        let radius = radius_unit.resolve_floor(image.extent());
        blur_image(image, radius, sigma_for_radius(radius))
    })
}

pub fn vignette(params: &FilterParameters, registry: &KernelRegistry) -> Filter {
    if params.vignette_intensity <= 0.0 {
        return Filter::identity();
    }
    let registry = registry.clone();
    let args = VignetteArgs {
        intensity: params.vignette_intensity,
    };
    Filter::new(move |image| registry.apply(&KernelArgs::Vignette(args), image))
}

/// Screen-composites the leak overlay, sized against the unmodified source
/// frame rather than whatever extent the running accumulator has.
pub fn light_leak(params: &FilterParameters, resources: &ResourceBundle) -> ChainStep {
    let Some(leak) = resources.leak.clone() else {
        return ChainStep::fixed(Filter::identity());
    };
    let opacity = params.leak_opacity;
    let blur_unit = ImageUnit::Normalized(LEAK_BLUR);
    ChainStep::with_source(move |acc, source| {
        let target = source.extent();
        let sized = cover_crop(&leak.image, target)?;
        let radius = blur_unit.resolve_floor(target);
        let softened = blur_image(&sized, radius, sigma_for_radius(radius))?;
        blend_images(acc, &softened, BlendMode::Screen, opacity)
    })
}

pub fn color_grade(params: &FilterParameters, resources: &ResourceBundle, registry: &KernelRegistry) -> Filter {
    let Some(lut) = resources.lut.clone() else {
        return Filter::identity();
    };
    let registry = registry.clone();
    let intensity = params.lut_intensity;
    Filter::new(move |image| {
        let args = ColorTableArgs {
            lut: Arc::clone(&lut.lut),
            intensity,
        };
        registry.apply(&KernelArgs::ColorTable(args), image)
    })
}

/// Renders the capture date, feathers its edges with the burn kernel,
/// rotates it to match the display orientation, and linear-dodges it into
/// the lower trailing corner.
pub fn date_stamp(
    params: &FilterParameters,
    metadata: &CaptureMetadata,
    registry: &KernelRegistry,
) -> Filter {
    if !params.stamp_visible {
        return Filter::identity();
    }
    let registry = registry.clone();
    let metadata = *metadata;
    let font = params.stamp_font;
    let color = params.stamp_color;

    Filter::new(move |image| {
        let extent = image.extent();
        let scale = extent.sqrt_area();
        let height = STAMP_HEIGHT_NORMALIZED * scale;
        let margin = STAMP_MARGIN_NORMALIZED * scale;
        let feather = STAMP_FEATHER_NORMALIZED * scale;

        let text = format_stamp(metadata.captured_at);
        let raster = render_stamp_text(&text, font, height)?;
        let tinted = color_matrix(&raster, &ColorMatrix::tint(color.rgb()))?;

        let burn = BurnArgs {
            inner: tinted.extent().rect().inset(feather * 2.0),
            feather_px: feather,
        };
        let singed = registry.apply(&KernelArgs::Burn(burn), &tinted)?;

        // The stamp reads along the bottom edge of the displayed photo.
        let display = if metadata.orientation.is_landscape() {
            Extent::new(extent.width.max(extent.height), extent.width.min(extent.height))
        } else {
            Extent::new(extent.width.min(extent.height), extent.width.max(extent.height))
        };
        let rotation = RotationUnit::OrientationMatch.resolve(extent, display);
        let oriented = rotate_about_center(&singed, rotation)?;

        let (sw, sh) = (oriented.width() as f32, oriented.height() as f32);
        let position = PositionTransform::new(move |r: Rect| {
            (r.max_x() - sw - margin, r.max_y() - sh - margin)
        });
        let (x, y) = position.apply(extent.rect());

        blend_at(image, &oriented, x, y, BlendMode::LinearDodge, 1.0)
    })
}

/// Resolution-scaled grain overlay, oriented to the photo and
/// overlay-composited at the grain opacity.
pub fn grain(params: &FilterParameters, resources: &ResourceBundle) -> Filter {
    let Some(overlay) = resources.grain.clone() else {
        return Filter::identity();
    };
    let opacity = params.grain_opacity;
    let size_scale = 0.75 + params.grain_size;
    let inner = Filter::new(move |image| {
        let target = image.extent();
        let rotation = RotationUnit::OrientationMatch.resolve(overlay.extent(), target);
        let oriented = rotate_about_center(&overlay, rotation)?;
        let sized = cover_crop_scaled(&oriented, target, size_scale)?;
        blend_images(image, &sized, BlendMode::Overlay, 1.0)
    });
    intensity(opacity, inner)
}

/// Two video-derived overlays screened together, then screened onto the
/// photo at the overall dust opacity.
pub fn dust(params: &FilterParameters, resources: &ResourceBundle) -> Filter {
    let particles = resources.dust_particles.clone();
    let hairs = resources.dust_hairs.clone();
    if params.dust_opacity <= 0.0 || (particles.is_none() && hairs.is_none()) {
        return Filter::identity();
    }
    let opacity = params.dust_opacity;
    Filter::new(move |image| {
        let target = image.extent();
        let mut combined: Option<Image> = None;
        for layer in [&particles, &hairs].into_iter().flatten() {
            let sized = cover_crop(&layer.image, target)?;
            combined = Some(match combined {
                None => sized,
                Some(acc) => blend_images(&acc, &sized, BlendMode::Screen, 1.0)?,
            });
        }
        let overlay = combined.ok_or_else(|| HalationError::render("dust overlay missing"))?;
        blend_images(image, &overlay, BlendMode::Screen, opacity)
    })
}

/// The whole-photo pipeline in its fixed order.
pub fn look_steps(
    params: &FilterParameters,
    metadata: &CaptureMetadata,
    resources: &ResourceBundle,
    registry: &KernelRegistry,
) -> HalationResult<Vec<ChainStep>> {
    params.validate()?;
    Ok(vec![
        ChainStep::fixed(pass_through()),
        ChainStep::fixed(glow(params, registry)),
        ChainStep::fixed(chromatic_dispersion(params, registry)),
        ChainStep::fixed(softness_blur(params)),
        ChainStep::fixed(vignette(params, registry)),
        light_leak(params, resources),
        ChainStep::fixed(color_grade(params, resources, registry)),
        ChainStep::fixed(date_stamp(params, metadata, registry)),
        ChainStep::fixed(grain(params, resources)),
        ChainStep::fixed(dust(params, resources)),
    ])
}

// Scale the overlay to cover `target` and crop the centered window of
// exactly `target`.
fn cover_crop(overlay: &Image, target: Extent) -> HalationResult<Image> {
    cover_crop_scaled(overlay, target, 1.0)
}

fn cover_crop_scaled(overlay: &Image, target: Extent, extra_scale: f32) -> HalationResult<Image> {
    let sizing = SizeTransform::fill(target).then(SizeTransform::scaled(extra_scale.max(1.0)));
    let sized = sizing.apply(overlay.extent().rect());
    // Flooring may land a pixel short of covering; never undershoot the crop.
    let sized = Extent::new(
        sized.width.max(target.width),
        sized.height.max(target.height),
    );
    let resized = resize(overlay, sized)?;
    let x = ((sized.width - target.width) / 2) as f32;
    let y = ((sized.height - target.height) / 2) as f32;
    crop(
        &resized,
        Rect::new(x, y, target.width as f32, target.height as f32),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        metadata::DeviceOrientation,
        params::presets,
        resources::{DustResource, OverlayResource},
    };
    use chrono::{DateTime, Utc};

    fn metadata() -> CaptureMetadata {
        CaptureMetadata::new(
            DateTime::parse_from_rfc3339("1998-08-24T10:00:00Z")
                .unwrap()
                .with_timezone(&Utc),
            DeviceOrientation::Portrait,
            false,
        )
    }

    fn registry() -> KernelRegistry {
        KernelRegistry::new().unwrap()
    }

    fn gradient_image(extent: Extent) -> Image {
        let mut data = Vec::with_capacity(extent.area() as usize * 4);
        for y in 0..extent.height {
            for x in 0..extent.width {
                let v = ((x + y) * 255 / (extent.width + extent.height)) as u8;
                data.extend_from_slice(&[v, v / 2, 255 - v, 255]);
            }
        }
        Image::from_premul_rgba8(extent, data).unwrap()
    }

    #[test]
    fn default_parameters_leave_the_image_untouched() {
        let img = gradient_image(Extent::new(24, 32));
        let steps = look_steps(
            &FilterParameters::default(),
            &metadata(),
            &ResourceBundle::default(),
            &registry(),
        )
        .unwrap();
        let out = crate::filter::chain_steps(steps).apply(&img).unwrap();
        assert_eq!(out, img);
    }

    #[test]
    fn pipeline_has_the_fixed_effect_count() {
        let steps = look_steps(
            &presets::golden_hour(),
            &metadata(),
            &ResourceBundle::default(),
            &registry(),
        )
        .unwrap();
        assert_eq!(steps.len(), 10);
    }

    #[test]
    fn invalid_parameters_are_rejected_up_front() {
        let mut params = FilterParameters::default();
        params.glow_opacity = 2.0;
        assert!(
            look_steps(&params, &metadata(), &ResourceBundle::default(), &registry()).is_err()
        );
    }

    #[test]
    fn glow_brightens_highlight_regions() {
        let mut params = FilterParameters::default();
        params.glow_opacity = 1.0;
        params.glow_radius = 1.0;
        params.glow_threshold = 0.5;

        let e = Extent::new(16, 16);
        let mut data = vec![0u8; e.area() as usize * 4];
        for px in data.chunks_exact_mut(4) {
            px.copy_from_slice(&[40, 40, 40, 255]);
        }
        // A bright block in the middle.
        for y in 6..10u32 {
            for x in 6..10u32 {
                let idx = ((y * 16 + x) as usize) * 4;
                data[idx..idx + 4].copy_from_slice(&[250, 250, 250, 255]);
            }
        }
        let img = Image::from_premul_rgba8(e, data).unwrap();
        let out = glow(&params, &registry()).apply(&img).unwrap();

        // Far corner stays dark, the halo region changed.
        assert_eq!(out.pixel(0, 0), [40, 40, 40, 255]);
        assert_ne!(out.pixel(7, 7), img.pixel(7, 7));
    }

    #[test]
    fn light_leak_sizes_against_the_source_frame() {
        let mut params = FilterParameters::default();
        params.leak_opacity = 1.0;
        let mut resources = ResourceBundle::default();
        resources.leak = Some(OverlayResource {
            id: "leak.test".to_string(),
            image: std::sync::Arc::new(Image::solid(Extent::new(8, 8), [255, 255, 255, 255])),
        });

        let img = gradient_image(Extent::new(20, 30));
        let step = light_leak(&params, &resources);
        let out = crate::filter::chain_steps(vec![step]).apply(&img).unwrap();
        assert_eq!(out.extent(), img.extent());
        // Screening white pushes everything to white.
        assert_eq!(out.pixel(10, 15), [255, 255, 255, 255]);
    }

    #[test]
    fn dust_screens_overlays_at_overall_opacity() {
        let mut params = FilterParameters::default();
        params.dust_opacity = 1.0;
        params.dust_particle_intensity = 0.5;
        let mut resources = ResourceBundle::default();
        resources.dust_particles = Some(DustResource {
            time_ms: 500,
            image: std::sync::Arc::new(Image::solid(Extent::new(4, 4), [80, 80, 80, 255])),
        });

        let img = Image::solid(Extent::new(8, 8), [100, 100, 100, 255]);
        let out = dust(&params, &resources).apply(&img).unwrap();
        let px = out.pixel(4, 4);
        assert!(px[0] > 100);
    }

    #[test]
    fn stamp_marks_the_lower_right_corner() {
        let mut params = FilterParameters::default();
        params.stamp_visible = true;

        let img = Image::solid(Extent::new(120, 160), [10, 10, 10, 255]);
        let out = date_stamp(&params, &metadata(), &registry())
            .apply(&img)
            .unwrap();
        assert_eq!(out.extent(), img.extent());
        // Upper-left quadrant is untouched regardless of font availability.
        assert_eq!(out.pixel(10, 10), [10, 10, 10, 255]);
    }

    #[test]
    fn cover_crop_matches_target_exactly() {
        let overlay = Image::solid(Extent::new(7, 5), [50, 50, 50, 255]);
        for target in [Extent::new(20, 30), Extent::new(33, 21), Extent::new(7, 5)] {
            let out = cover_crop(&overlay, target).unwrap();
            assert_eq!(out.extent(), target);
        }
    }
}
