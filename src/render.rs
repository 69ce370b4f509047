//! Tiered rendering contexts and encode paths.
//!
//! Three long-lived contexts exist — full quality for persisted output, low
//! quality for thumbnails-on-disk and all interactive work, and a thumbnail
//! tier for picker previews. Contexts live for the process lifetime; their
//! scratch caches are bounded by clearing after every render and encode
//! call, on success and failure alike.

use std::io::Cursor;

use image::ImageEncoder;
use tracing::{debug, instrument};

use crate::{
    error::{HalationError, HalationResult},
    filter::chain_steps,
    geom::Extent,
    image::Image,
    kernel::KernelRegistry,
    metadata::CaptureMetadata,
    params::FilterParameters,
    resample::resize,
    resources::ResourceBundle,
    transform::SizeTransform,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum RenderTier {
    Full,
    Low,
    Thumbnail,
}

#[derive(Clone, Copy, Debug)]
pub struct TierConfig {
    pub tier: RenderTier,
    /// Longest output edge; the source is downscaled to fit before filtering.
    pub max_edge: Option<u32>,
    /// Extended-range color handling for the persisted full-quality output.
    pub extended_range: bool,
}

impl TierConfig {
    pub fn for_tier(tier: RenderTier) -> Self {
        match tier {
            RenderTier::Full => Self {
                tier,
                max_edge: None,
                extended_range: true,
            },
            RenderTier::Low => Self {
                tier,
                max_edge: Some(1280),
                extended_range: false,
            },
            RenderTier::Thumbnail => Self {
                tier,
                max_edge: Some(256),
                extended_range: false,
            },
        }
    }
}

/// Counters over the context's retained scratch memory.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub retained_buffers: usize,
    pub retained_bytes: usize,
    pub total_allocations: u64,
}

// Bounded scratch-buffer pool, keyed by byte length. This is the memory the
// clear-after-every-call rule keeps from growing across a batch.
#[derive(Debug, Default)]
struct ScratchPool {
    buffers: Vec<Vec<u8>>,
    stats: CacheStats,
}

const MAX_POOLED_BUFFERS: usize = 4;

impl ScratchPool {
    fn borrow(&mut self, len: usize) -> Vec<u8> {
        if let Some(pos) = self.buffers.iter().position(|b| b.capacity() >= len) {
            let mut buf = self.buffers.swap_remove(pos);
            self.stats.retained_buffers = self.buffers.len();
            self.stats.retained_bytes = self.buffers.iter().map(Vec::capacity).sum();
            buf.clear();
            buf.resize(len, 0);
            return buf;
        }
        self.stats.total_allocations += 1;
        vec![0u8; len]
    }

    fn release(&mut self, buf: Vec<u8>) {
        if self.buffers.len() < MAX_POOLED_BUFFERS {
            self.buffers.push(buf);
        }
        self.stats.retained_buffers = self.buffers.len();
        self.stats.retained_bytes = self.buffers.iter().map(Vec::capacity).sum();
    }

    fn clear(&mut self) {
        self.buffers.clear();
        self.stats.retained_buffers = 0;
        self.stats.retained_bytes = 0;
    }
}

/// One long-lived rendering context, bound to a quality tier.
pub struct RenderContext {
    config: TierConfig,
    registry: KernelRegistry,
    pool: ScratchPool,
}

impl RenderContext {
    /// Kernel registration happens here; failure is fatal configuration, not
    /// a per-render error.
    pub fn new(config: TierConfig) -> HalationResult<Self> {
        let registry = KernelRegistry::new()?;
        Ok(Self {
            config,
            registry,
            pool: ScratchPool::default(),
        })
    }

    pub fn tier(&self) -> RenderTier {
        self.config.tier
    }

    pub fn registry(&self) -> &KernelRegistry {
        &self.registry
    }

    pub fn clear_cache(&mut self) {
        self.pool.clear();
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.pool.stats
    }
}

/// A displayable raw surface.
#[derive(Clone, Debug)]
pub struct FrameSurface {
    pub width: u32,
    pub height: u32,
    pub rgba8_premul: Vec<u8>,
}

pub struct Renderer {
    full: RenderContext,
    low: RenderContext,
    thumbnail: RenderContext,
}

impl Renderer {
    /// Build all three tier contexts once at startup. Any failure here
    /// aborts startup rather than being retried per render.
    pub fn new() -> HalationResult<Self> {
        Ok(Self {
            full: RenderContext::new(TierConfig::for_tier(RenderTier::Full))?,
            low: RenderContext::new(TierConfig::for_tier(RenderTier::Low))?,
            thumbnail: RenderContext::new(TierConfig::for_tier(RenderTier::Thumbnail))?,
        })
    }

    pub fn context(&self, tier: RenderTier) -> &RenderContext {
        match tier {
            RenderTier::Full => &self.full,
            RenderTier::Low => &self.low,
            RenderTier::Thumbnail => &self.thumbnail,
        }
    }

    fn context_mut(&mut self, tier: RenderTier) -> &mut RenderContext {
        match tier {
            RenderTier::Full => &mut self.full,
            RenderTier::Low => &mut self.low,
            RenderTier::Thumbnail => &mut self.thumbnail,
        }
    }

    /// Run the composed look over `source` on the given tier.
    #[instrument(skip_all, fields(tier = ?tier, width = source.width(), height = source.height()))]
    pub fn render(
        &mut self,
        tier: RenderTier,
        source: &Image,
        metadata: &CaptureMetadata,
        params: &FilterParameters,
        resources: &ResourceBundle,
    ) -> HalationResult<Image> {
        let ctx = self.context_mut(tier);
        let result = render_on_context(ctx, source, metadata, params, resources);
        ctx.clear_cache();
        result
    }

    pub fn render_full(
        &mut self,
        source: &Image,
        metadata: &CaptureMetadata,
        params: &FilterParameters,
        resources: &ResourceBundle,
    ) -> HalationResult<Image> {
        self.render(RenderTier::Full, source, metadata, params, resources)
    }

    pub fn render_thumbnail(
        &mut self,
        source: &Image,
        metadata: &CaptureMetadata,
        params: &FilterParameters,
        resources: &ResourceBundle,
    ) -> HalationResult<Image> {
        self.render(RenderTier::Thumbnail, source, metadata, params, resources)
    }

    /// JPEG-encode on the tier's context. The context cache is cleared on
    /// both the success and failure path; skipping that clear grows memory
    /// without bound across a multi-photo batch.
    #[instrument(skip_all, fields(tier = ?tier, quality))]
    pub fn encode_to_bytes(
        &mut self,
        tier: RenderTier,
        image: &Image,
        quality: f32,
    ) -> HalationResult<Vec<u8>> {
        let ctx = self.context_mut(tier);
        let result = encode_jpeg(ctx, image, quality);
        ctx.clear_cache();
        result
    }

    /// Lossless PNG encode, used for picker thumbnails.
    pub fn encode_png(&mut self, tier: RenderTier, image: &Image) -> HalationResult<Vec<u8>> {
        let ctx = self.context_mut(tier);
        let result = encode_png_inner(image);
        ctx.clear_cache();
        result
    }

    /// Hand back a displayable raw surface; same cache discipline as the
    /// byte encoders.
    pub fn encode_to_buffer(
        &mut self,
        tier: RenderTier,
        image: &Image,
    ) -> HalationResult<FrameSurface> {
        let ctx = self.context_mut(tier);
        let result = (|| {
            image
                .extent()
                .validate_nonempty()
                .map_err(|_| HalationError::encode("cannot buffer a zero-size image"))?;
            Ok(FrameSurface {
                width: image.width(),
                height: image.height(),
                rgba8_premul: image.data().to_vec(),
            })
        })();
        ctx.clear_cache();
        result
    }
}

fn render_on_context(
    ctx: &mut RenderContext,
    source: &Image,
    metadata: &CaptureMetadata,
    params: &FilterParameters,
    resources: &ResourceBundle,
) -> HalationResult<Image> {
    source
        .extent()
        .validate_nonempty()
        .map_err(|_| HalationError::render("cannot render a zero-size image"))?;

    let working = match ctx.config.max_edge {
        Some(max_edge) if source.width().max(source.height()) > max_edge => {
            let target = SizeTransform::fit(Extent::new(max_edge, max_edge))
                .apply(source.extent().rect());
            debug!(?target, "downscaling for tier");
            resize(source, target)?
        }
        _ => source.clone(),
    };

    let steps = crate::effects::look_steps(params, metadata, resources, &ctx.registry)?;
    chain_steps(steps).apply(&working)
}

fn encode_jpeg(ctx: &mut RenderContext, image: &Image, quality: f32) -> HalationResult<Vec<u8>> {
    image
        .extent()
        .validate_nonempty()
        .map_err(|_| HalationError::encode("cannot encode a zero-size image"))?;
    if !quality.is_finite() || !(0.0..=1.0).contains(&quality) {
        return Err(HalationError::encode("jpeg quality must be in 0..=1"));
    }

    let rgb_len = image.extent().area() as usize * 3;
    let mut rgb = ctx.pool.borrow(rgb_len);
    for (dst, px) in rgb.chunks_exact_mut(3).zip(image.data().chunks_exact(4)) {
        let a = px[3];
        if a == 0 || a == 255 {
            dst.copy_from_slice(&px[..3]);
        } else {
            // Unpremultiply partially transparent pixels before dropping alpha.
            let af = a as f32;
            dst[0] = (px[0] as f32 * 255.0 / af).min(255.0) as u8;
            dst[1] = (px[1] as f32 * 255.0 / af).min(255.0) as u8;
            dst[2] = (px[2] as f32 * 255.0 / af).min(255.0) as u8;
        }
    }

    let q = (quality * 99.0).round() as u8 + 1;
    let mut out = Vec::new();
    let encoder = image::codecs::jpeg::JpegEncoder::new_with_quality(Cursor::new(&mut out), q);
    let encoded = encoder
        .write_image(
            &rgb,
            image.width(),
            image.height(),
            image::ExtendedColorType::Rgb8,
        )
        .map_err(|e| HalationError::encode(format!("jpeg encode failed: {e}")));
    ctx.pool.release(rgb);
    encoded?;
    Ok(out)
}

fn encode_png_inner(image: &Image) -> HalationResult<Vec<u8>> {
    image
        .extent()
        .validate_nonempty()
        .map_err(|_| HalationError::encode("cannot encode a zero-size image"))?;
    let mut out = Vec::new();
    image::codecs::png::PngEncoder::new(Cursor::new(&mut out))
        .write_image(
            image.data(),
            image.width(),
            image.height(),
            image::ExtendedColorType::Rgba8,
        )
        .map_err(|e| HalationError::encode(format!("png encode failed: {e}")))?;
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::DeviceOrientation;
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

    #[test]
    fn renderer_builds_all_tiers() {
        let renderer = Renderer::new().unwrap();
        assert_eq!(renderer.context(RenderTier::Full).tier(), RenderTier::Full);
        assert_eq!(renderer.context(RenderTier::Low).tier(), RenderTier::Low);
        assert_eq!(
            renderer.context(RenderTier::Thumbnail).tier(),
            RenderTier::Thumbnail
        );
    }

    #[test]
    fn thumbnail_tier_downscales_to_its_edge() {
        let mut renderer = Renderer::new().unwrap();
        let source = Image::solid(Extent::new(512, 1024), [90, 90, 90, 255]);
        let out = renderer
            .render_thumbnail(
                &source,
                &metadata(),
                &FilterParameters::default(),
                &ResourceBundle::default(),
            )
            .unwrap();
        assert_eq!(out.extent(), Extent::new(128, 256));
    }

    #[test]
    fn encode_rejects_bad_quality() {
        let mut renderer = Renderer::new().unwrap();
        let img = Image::solid(Extent::new(4, 4), [1, 2, 3, 255]);
        assert!(renderer.encode_to_bytes(RenderTier::Low, &img, 1.5).is_err());
        assert!(
            renderer
                .encode_to_bytes(RenderTier::Low, &img, f32::NAN)
                .is_err()
        );
    }

    #[test]
    fn encode_produces_jpeg_magic() {
        let mut renderer = Renderer::new().unwrap();
        let img = Image::solid(Extent::new(8, 8), [120, 90, 60, 255]);
        let bytes = renderer.encode_to_bytes(RenderTier::Low, &img, 0.9).unwrap();
        assert_eq!(&bytes[0..2], &[0xFF, 0xD8]);
    }

    #[test]
    fn cache_is_cleared_after_every_encode() {
        let mut renderer = Renderer::new().unwrap();
        let img = Image::solid(Extent::new(16, 16), [120, 90, 60, 255]);

        for _ in 0..8 {
            renderer.encode_to_bytes(RenderTier::Low, &img, 0.8).unwrap();
            let stats = renderer.context(RenderTier::Low).cache_stats();
            assert_eq!(stats.retained_buffers, 0);
            assert_eq!(stats.retained_bytes, 0);
        }
    }

    #[test]
    fn cache_is_cleared_on_failure_too() {
        let mut renderer = Renderer::new().unwrap();
        let img = Image::solid(Extent::new(4, 4), [0, 0, 0, 255]);
        let _ = renderer.encode_to_bytes(RenderTier::Low, &img, 2.0);
        let stats = renderer.context(RenderTier::Low).cache_stats();
        assert_eq!(stats.retained_buffers, 0);
    }

    #[test]
    fn buffer_surface_round_trips_pixels() {
        let mut renderer = Renderer::new().unwrap();
        let img = Image::solid(Extent::new(3, 2), [5, 6, 7, 255]);
        let surface = renderer.encode_to_buffer(RenderTier::Low, &img).unwrap();
        assert_eq!(surface.width, 3);
        assert_eq!(surface.height, 2);
        assert_eq!(surface.rgba8_premul, img.data());
    }
}
