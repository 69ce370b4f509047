//! Auxiliary decoded assets for one look, resolved once and then
//! incrementally re-resolved as parameters change.
//!
//! Decoding is expensive (image decode, video frame extraction), so
//! re-resolution diffs against the previous bundle: a sub-resource whose
//! identity is unchanged — resource id, or quantized sampling time for the
//! video-derived dust frames — is carried over by reference. The bundle is
//! read-only after resolution and shared across filter evaluations.

use std::{
    path::PathBuf,
    sync::Arc,
};

use tracing::debug;

use crate::{
    error::{HalationError, HalationResult},
    geom::Extent,
    image::Image,
    lut::Lut3d,
    media,
    params::FilterParameters,
};

/// Identifier of the single grain overlay asset.
pub const GRAIN_RESOURCE_ID: &str = "grain.fine";

/// Length of the dust source clips the intensity maps onto.
pub const DUST_CLIP_MS: u64 = 10_000;

/// Sampling times are quantized so equal intensities hit the same frame.
pub const DUST_TIME_QUANTUM_MS: u64 = 100;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DustLayer {
    Particles,
    Hairs,
}

impl DustLayer {
    pub fn clip_name(&self) -> &'static str {
        match self {
            DustLayer::Particles => "dust_particles.mp4",
            DustLayer::Hairs => "dust_hairs.mp4",
        }
    }
}

/// Map a dust intensity to the quantized source time used as the reuse key.
pub fn dust_frame_time_ms(intensity: f32) -> u64 {
    let span = (DUST_CLIP_MS - DUST_TIME_QUANTUM_MS) as f64;
    let raw = f64::from(intensity.clamp(0.0, 1.0)) * span;
    (raw / DUST_TIME_QUANTUM_MS as f64).round() as u64 * DUST_TIME_QUANTUM_MS
}

/// Decodes raster and video resources referenced by identifier.
///
/// Kept behind a trait so renders are independent of where assets live and
/// tests can inject fakes.
pub trait ResourceLoader: Send + Sync {
    fn load_image(&self, id: &str) -> HalationResult<Image>;
    fn load_dust_frame(&self, layer: DustLayer, time_ms: u64) -> HalationResult<Image>;
}

#[derive(Clone, Debug)]
pub struct LutResource {
    pub id: String,
    pub lut: Arc<Lut3d>,
}

#[derive(Clone, Debug)]
pub struct OverlayResource {
    pub id: String,
    pub image: Arc<Image>,
}

#[derive(Clone, Debug)]
pub struct DustResource {
    pub time_ms: u64,
    pub image: Arc<Image>,
}

#[derive(Clone, Debug, Default)]
pub struct ResourceBundle {
    pub lut: Option<LutResource>,
    pub leak: Option<OverlayResource>,
    pub grain: Option<Arc<Image>>,
    pub dust_particles: Option<DustResource>,
    pub dust_hairs: Option<DustResource>,
}

impl ResourceBundle {
    /// Resolve the resources `params` references, reusing `previous` entries
    /// whose identity is unchanged.
    ///
    /// A resource that is referenced but fails to decode fails the whole
    /// resolution; a partially-applied look is never rendered.
    pub fn resolve(
        loader: &dyn ResourceLoader,
        params: &FilterParameters,
        previous: Option<&ResourceBundle>,
    ) -> HalationResult<ResourceBundle> {
        let lut = match (&params.lut_id, params.lut_intensity > 0.0) {
            (Some(id), true) => Some(resolve_lut(loader, id, previous)?),
            _ => None,
        };

        let leak = match (&params.leak_id, params.leak_opacity > 0.0) {
            (Some(id), true) => Some(resolve_leak(loader, id, previous)?),
            _ => None,
        };

        let grain = if params.grain_opacity > 0.0 {
            match previous.and_then(|p| p.grain.clone()) {
                Some(existing) => Some(existing),
                None => {
                    debug!(id = GRAIN_RESOURCE_ID, "decoding grain overlay");
                    Some(Arc::new(loader.load_image(GRAIN_RESOURCE_ID)?))
                }
            }
        } else {
            None
        };

        let dust_particles = resolve_dust(
            loader,
            DustLayer::Particles,
            params.dust_particle_intensity,
            params.dust_opacity,
            previous.and_then(|p| p.dust_particles.as_ref()),
        )?;
        let dust_hairs = resolve_dust(
            loader,
            DustLayer::Hairs,
            params.dust_hair_intensity,
            params.dust_opacity,
            previous.and_then(|p| p.dust_hairs.as_ref()),
        )?;

        Ok(ResourceBundle {
            lut,
            leak,
            grain,
            dust_particles,
            dust_hairs,
        })
    }
}

fn resolve_lut(
    loader: &dyn ResourceLoader,
    id: &str,
    previous: Option<&ResourceBundle>,
) -> HalationResult<LutResource> {
    if let Some(prev) = previous.and_then(|p| p.lut.as_ref())
        && prev.id == id
    {
        return Ok(prev.clone());
    }
    debug!(id, "decoding lut atlas");
    let atlas = loader.load_image(id)?;
    let lut = Lut3d::from_atlas_image(&atlas)?;
    Ok(LutResource {
        id: id.to_string(),
        lut: Arc::new(lut),
    })
}

fn resolve_leak(
    loader: &dyn ResourceLoader,
    id: &str,
    previous: Option<&ResourceBundle>,
) -> HalationResult<OverlayResource> {
    if let Some(prev) = previous.and_then(|p| p.leak.as_ref())
        && prev.id == id
    {
        return Ok(prev.clone());
    }
    debug!(id, "decoding light-leak overlay");
    Ok(OverlayResource {
        id: id.to_string(),
        image: Arc::new(loader.load_image(id)?),
    })
}

fn resolve_dust(
    loader: &dyn ResourceLoader,
    layer: DustLayer,
    intensity: f32,
    overall_opacity: f32,
    previous: Option<&DustResource>,
) -> HalationResult<Option<DustResource>> {
    if intensity <= 0.0 || overall_opacity <= 0.0 {
        return Ok(None);
    }
    let time_ms = dust_frame_time_ms(intensity);
    if let Some(prev) = previous
        && prev.time_ms == time_ms
    {
        return Ok(Some(prev.clone()));
    }
    debug!(?layer, time_ms, "extracting dust frame");
    let image = loader.load_dust_frame(layer, time_ms)?;
    Ok(Some(DustResource {
        time_ms,
        image: Arc::new(image),
    }))
}

/// Loads assets from a directory: raster resources are image files named by
/// identifier, dust clips are probed and sampled through `ffmpeg`.
pub struct FsResourceLoader {
    root: PathBuf,
}

impl FsResourceLoader {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

impl ResourceLoader for FsResourceLoader {
    fn load_image(&self, id: &str) -> HalationResult<Image> {
        let path = self.root.join(id);
        let decoded = image::open(&path).map_err(|e| {
            HalationError::resource(format!("failed to decode '{}': {e}", path.display()))
        })?;
        let rgba = decoded.to_rgba8();
        let (width, height) = rgba.dimensions();
        Image::from_straight_rgba8(Extent::new(width, height), rgba.into_raw())
    }

    fn load_dust_frame(&self, layer: DustLayer, time_ms: u64) -> HalationResult<Image> {
        let path = self.root.join(layer.clip_name());
        let info = media::probe_video(&path)?;
        let time_sec = (time_ms as f64 / 1000.0).min(info.duration_sec.max(0.0));
        let rgba = media::decode_video_frame_rgba8(&info, time_sec)?;
        Image::from_straight_rgba8(Extent::new(info.width, info.height), rgba)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::params::{FilterParameters, presets};

    struct FakeLoader {
        image_decodes: AtomicUsize,
        dust_decodes: AtomicUsize,
        fail_grain: bool,
    }

    impl FakeLoader {
        fn new() -> Self {
            Self {
                image_decodes: AtomicUsize::new(0),
                dust_decodes: AtomicUsize::new(0),
                fail_grain: false,
            }
        }
    }

    impl ResourceLoader for FakeLoader {
        fn load_image(&self, id: &str) -> HalationResult<Image> {
            if self.fail_grain && id == GRAIN_RESOURCE_ID {
                return Err(HalationError::resource("grain decode failed"));
            }
            self.image_decodes.fetch_add(1, Ordering::SeqCst);
            // LUT ids decode to a valid cube atlas, overlays to a plain image.
            if id.starts_with("lut.") {
                Ok(identity_atlas())
            } else {
                Ok(Image::solid(Extent::new(8, 8), [128, 128, 128, 255]))
            }
        }

        fn load_dust_frame(&self, _layer: DustLayer, _time_ms: u64) -> HalationResult<Image> {
            self.dust_decodes.fetch_add(1, Ordering::SeqCst);
            Ok(Image::solid(Extent::new(8, 8), [30, 30, 30, 255]))
        }
    }

    fn identity_atlas() -> Image {
        let mut data = Vec::new();
        for y in 0..8u32 {
            for x in 0..8u32 {
                let b = (y / 4) * 2 + x / 4;
                let g = y % 4;
                let r = x % 4;
                data.extend_from_slice(&[(r * 85) as u8, (g * 85) as u8, (b * 85) as u8, 255]);
            }
        }
        Image::from_premul_rgba8(Extent::new(8, 8), data).unwrap()
    }

    #[test]
    fn unchanged_lut_id_reuses_the_same_instance() {
        let loader = FakeLoader::new();
        let params = presets::golden_hour();

        let first = ResourceBundle::resolve(&loader, &params, None).unwrap();
        let second = ResourceBundle::resolve(&loader, &params, Some(&first)).unwrap();

        let a = first.lut.as_ref().unwrap();
        let b = second.lut.as_ref().unwrap();
        assert!(Arc::ptr_eq(&a.lut, &b.lut));
        assert_eq!(loader.image_decodes.load(Ordering::SeqCst), 2); // lut + grain, once each
    }

    #[test]
    fn changed_lut_id_decodes_a_new_instance() {
        let loader = FakeLoader::new();
        let mut params = presets::golden_hour();

        let first = ResourceBundle::resolve(&loader, &params, None).unwrap();
        params.lut_id = Some("lut.other".to_string());
        let second = ResourceBundle::resolve(&loader, &params, Some(&first)).unwrap();

        let a = first.lut.as_ref().unwrap();
        let b = second.lut.as_ref().unwrap();
        assert!(!Arc::ptr_eq(&a.lut, &b.lut));
        assert_eq!(b.id, "lut.other");
    }

    #[test]
    fn equal_dust_intensity_reuses_the_frame() {
        let loader = FakeLoader::new();
        let params = presets::expired_stock();

        let first = ResourceBundle::resolve(&loader, &params, None).unwrap();
        let second = ResourceBundle::resolve(&loader, &params, Some(&first)).unwrap();

        assert_eq!(loader.dust_decodes.load(Ordering::SeqCst), 2); // two layers, once each
        let a = first.dust_particles.as_ref().unwrap();
        let b = second.dust_particles.as_ref().unwrap();
        assert!(Arc::ptr_eq(&a.image, &b.image));
    }

    #[test]
    fn changed_dust_intensity_resamples() {
        let loader = FakeLoader::new();
        let mut params = presets::expired_stock();

        let first = ResourceBundle::resolve(&loader, &params, None).unwrap();
        params.dust_particle_intensity = 0.9;
        let second = ResourceBundle::resolve(&loader, &params, Some(&first)).unwrap();

        let a = first.dust_particles.as_ref().unwrap();
        let b = second.dust_particles.as_ref().unwrap();
        assert_ne!(a.time_ms, b.time_ms);
        assert!(!Arc::ptr_eq(&a.image, &b.image));
        // The hairs layer was untouched and is carried over.
        assert!(Arc::ptr_eq(
            &first.dust_hairs.as_ref().unwrap().image,
            &second.dust_hairs.as_ref().unwrap().image
        ));
    }

    #[test]
    fn zero_opacity_skips_loading() {
        let loader = FakeLoader::new();
        let params = FilterParameters::default();
        let bundle = ResourceBundle::resolve(&loader, &params, None).unwrap();
        assert!(bundle.lut.is_none());
        assert!(bundle.leak.is_none());
        assert!(bundle.grain.is_none());
        assert!(bundle.dust_particles.is_none());
        assert_eq!(loader.image_decodes.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn failed_decode_fails_resolution() {
        let mut loader = FakeLoader::new();
        loader.fail_grain = true;
        let params = presets::expired_stock();
        assert!(ResourceBundle::resolve(&loader, &params, None).is_err());
    }

    #[test]
    fn dust_time_is_quantized() {
        let a = dust_frame_time_ms(0.5);
        assert_eq!(a % DUST_TIME_QUANTUM_MS, 0);
        assert_eq!(dust_frame_time_ms(0.5), a);
        assert_ne!(dust_frame_time_ms(0.9), a);
        assert_eq!(dust_frame_time_ms(0.0), 0);
        assert!(dust_frame_time_ms(1.0) < DUST_CLIP_MS);
    }
}
