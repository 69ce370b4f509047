//! Per-pixel compute kernels with explicit region-of-interest contracts.
//!
//! Each kernel is a named program with a fixed, statically-typed argument
//! list, validated once when the registry is built rather than at each call
//! site. The ROI rule maps an output rect to the input rect the kernel reads;
//! it must be a superset of the kernel's true read footprint or edge pixels
//! come out wrong — a correctness contract, not a performance hint.

pub mod cpu;
#[cfg(feature = "gpu")]
pub mod gpu;

use std::sync::Arc;

use tracing::debug;

use crate::{
    error::{HalationError, HalationResult},
    geom::Rect,
    image::Image,
    lut::Lut3d,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum KernelId {
    Threshold,
    ColorTable,
    Burn,
    Vignette,
    Dispersion,
}

impl KernelId {
    pub fn name(&self) -> &'static str {
        match self {
            KernelId::Threshold => "threshold",
            KernelId::ColorTable => "color_table",
            KernelId::Burn => "burn",
            KernelId::Vignette => "vignette",
            KernelId::Dispersion => "dispersion",
        }
    }

    pub const ALL: [KernelId; 5] = [
        KernelId::Threshold,
        KernelId::ColorTable,
        KernelId::Burn,
        KernelId::Vignette,
        KernelId::Dispersion,
    ];
}

/// Keeps pixels whose luma reaches `cutoff`; everything else becomes
/// transparent black.
#[derive(Clone, Copy, Debug)]
pub struct ThresholdArgs {
    pub cutoff: f32,
}

/// Remaps through a 3D LUT, blended toward the input by `intensity`.
#[derive(Clone, Debug)]
pub struct ColorTableArgs {
    pub lut: Arc<Lut3d>,
    pub intensity: f32,
}

/// Soft alpha falloff outside `inner`, fading to nothing over `feather_px`.
#[derive(Clone, Copy, Debug)]
pub struct BurnArgs {
    pub inner: Rect,
    pub feather_px: f32,
}

/// Angle-at-edge darkening: cos⁴ of the ray angle off the optical axis at a
/// fixed reference field of view, scaled by `intensity`.
#[derive(Clone, Copy, Debug)]
pub struct VignetteArgs {
    pub intensity: f32,
}

/// Per-channel radial displacement of `base_px + scale_px · rⁿ` pixels.
#[derive(Clone, Copy, Debug)]
pub struct DispersionArgs {
    pub scale_px: f32,
    pub base_px: f32,
    pub exponent: f32,
}

#[derive(Clone, Debug)]
pub enum KernelArgs {
    Threshold(ThresholdArgs),
    ColorTable(ColorTableArgs),
    Burn(BurnArgs),
    Vignette(VignetteArgs),
    Dispersion(DispersionArgs),
}

impl KernelArgs {
    pub fn id(&self) -> KernelId {
        match self {
            KernelArgs::Threshold(_) => KernelId::Threshold,
            KernelArgs::ColorTable(_) => KernelId::ColorTable,
            KernelArgs::Burn(_) => KernelId::Burn,
            KernelArgs::Vignette(_) => KernelId::Vignette,
            KernelArgs::Dispersion(_) => KernelId::Dispersion,
        }
    }

    /// The input region the kernel reads to produce `output`.
    pub fn roi(&self, output: Rect) -> Rect {
        self.roi_rule().read_rect(output)
    }

    fn roi_rule(&self) -> Roi {
        match self {
            KernelArgs::Threshold(_) | KernelArgs::ColorTable(_) | KernelArgs::Vignette(_) => {
                Roi::Same
            }
            KernelArgs::Burn(args) => Roi::Inflate(args.feather_px.max(0.0)),
            KernelArgs::Dispersion(args) => {
                Roi::Inflate((args.base_px + args.scale_px).max(0.0))
            }
        }
    }

    fn validate(&self) -> HalationResult<()> {
        let unit = |name: &str, v: f32| -> HalationResult<()> {
            if !v.is_finite() || !(0.0..=1.0).contains(&v) {
                return Err(HalationError::validation(format!(
                    "{}: {name} must be in 0..=1",
                    self.id().name()
                )));
            }
            Ok(())
        };
        let nonneg = |name: &str, v: f32| -> HalationResult<()> {
            if !v.is_finite() || v < 0.0 {
                return Err(HalationError::validation(format!(
                    "{}: {name} must be finite and >= 0",
                    self.id().name()
                )));
            }
            Ok(())
        };

        match self {
            KernelArgs::Threshold(a) => unit("cutoff", a.cutoff),
            KernelArgs::ColorTable(a) => unit("intensity", a.intensity),
            KernelArgs::Burn(a) => nonneg("feather_px", a.feather_px),
            KernelArgs::Vignette(a) => unit("intensity", a.intensity),
            KernelArgs::Dispersion(a) => {
                nonneg("scale_px", a.scale_px)?;
                nonneg("base_px", a.base_px)?;
                nonneg("exponent", a.exponent)
            }
        }
    }
}

/// How a kernel's input read region relates to its output region.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Roi {
    /// Reads exactly the pixels it writes.
    Same,
    /// Reads the output rect inflated by a pixel margin on all sides.
    Inflate(f32),
}

impl Roi {
    pub fn read_rect(&self, output: Rect) -> Rect {
        match *self {
            Roi::Same => output,
            Roi::Inflate(d) => output.inflate(d.max(0.0)),
        }
    }
}

#[derive(Clone)]
enum Backend {
    Cpu,
    #[cfg(feature = "gpu")]
    Gpu(Arc<gpu::GpuKernels>),
}

/// The set of compiled kernels for one render context.
#[derive(Clone)]
pub struct KernelRegistry {
    backend: Backend,
}

impl KernelRegistry {
    /// Build the CPU kernel set. Registration checks every kernel's ROI rule
    /// once; a broken declaration is a configuration error, not a per-render
    /// one.
    pub fn new() -> HalationResult<Self> {
        Self::verify_declarations()?;
        Ok(Self {
            backend: Backend::Cpu,
        })
    }

    /// Build the GPU kernel set; shader or pipeline compilation failure is
    /// fatal at startup.
    #[cfg(feature = "gpu")]
    pub fn with_gpu() -> HalationResult<Self> {
        Self::verify_declarations()?;
        let kernels = gpu::GpuKernels::new()?;
        Ok(Self {
            backend: Backend::Gpu(Arc::new(kernels)),
        })
    }

    fn verify_declarations() -> HalationResult<()> {
        let probe = Rect::new(0.0, 0.0, 64.0, 64.0);
        for id in KernelId::ALL {
            let args = probe_args(id);
            if args.id() != id {
                return Err(HalationError::config(format!(
                    "kernel '{}' argument binding is mismatched",
                    id.name()
                )));
            }
            let read = args.roi(probe);
            let covers = read.x <= probe.x
                && read.y <= probe.y
                && read.max_x() >= probe.max_x()
                && read.max_y() >= probe.max_y();
            if !covers {
                return Err(HalationError::config(format!(
                    "kernel '{}' declares a read region smaller than its output",
                    id.name()
                )));
            }
        }
        Ok(())
    }

    /// Run a kernel over the whole image extent.
    ///
    /// The ROI rule determines how much surrounding data the kernel may read;
    /// the read rect is clamped to the pixels that actually exist.
    pub fn apply(&self, args: &KernelArgs, image: &Image) -> HalationResult<Image> {
        args.validate()?;
        image
            .extent()
            .validate_nonempty()
            .map_err(|_| HalationError::render("kernel input extent is empty"))?;

        let output = image.extent().rect();
        let read = args.roi(output).intersect(&output);
        debug!(kernel = args.id().name(), ?read, "dispatching kernel");

        match &self.backend {
            Backend::Cpu => cpu::execute(args, image),
            #[cfg(feature = "gpu")]
            Backend::Gpu(kernels) => kernels.execute(args, image),
        }
    }
}

// Representative arguments used to exercise each kernel's declaration at
// registration time.
fn probe_args(id: KernelId) -> KernelArgs {
    match id {
        KernelId::Threshold => KernelArgs::Threshold(ThresholdArgs { cutoff: 0.5 }),
        KernelId::ColorTable => KernelArgs::ColorTable(ColorTableArgs {
            lut: Arc::new(Lut3d::identity(4)),
            intensity: 1.0,
        }),
        KernelId::Burn => KernelArgs::Burn(BurnArgs {
            inner: Rect::new(8.0, 8.0, 48.0, 48.0),
            feather_px: 4.0,
        }),
        KernelId::Vignette => KernelArgs::Vignette(VignetteArgs { intensity: 0.5 }),
        KernelId::Dispersion => KernelArgs::Dispersion(DispersionArgs {
            scale_px: 4.0,
            base_px: 1.0,
            exponent: 2.0,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_builds() {
        assert!(KernelRegistry::new().is_ok());
    }

    #[test]
    fn burn_roi_inflates_by_feather_radius() {
        for r in [0.0f32, 1.0, 4.5, 32.0] {
            let args = KernelArgs::Burn(BurnArgs {
                inner: Rect::new(0.0, 0.0, 10.0, 10.0),
                feather_px: r,
            });
            let out = Rect::new(0.0, 0.0, 100.0, 80.0);
            let read = args.roi(out);
            assert_eq!(read, out.inflate(r));
        }
    }

    #[test]
    fn pointwise_kernels_read_exactly_their_output() {
        let out = Rect::new(0.0, 0.0, 33.0, 44.0);
        let args = KernelArgs::Threshold(ThresholdArgs { cutoff: 0.2 });
        assert_eq!(args.roi(out), out);
        let args = KernelArgs::Vignette(VignetteArgs { intensity: 0.9 });
        assert_eq!(args.roi(out), out);
    }

    #[test]
    fn dispersion_roi_covers_max_displacement() {
        let args = KernelArgs::Dispersion(DispersionArgs {
            scale_px: 6.0,
            base_px: 2.0,
            exponent: 1.5,
        });
        let out = Rect::new(0.0, 0.0, 50.0, 50.0);
        assert_eq!(args.roi(out), out.inflate(8.0));
    }

    #[test]
    fn out_of_range_args_rejected() {
        let registry = KernelRegistry::new().unwrap();
        let img = Image::solid(crate::geom::Extent::new(4, 4), [0, 0, 0, 255]);
        let bad = KernelArgs::Threshold(ThresholdArgs { cutoff: 1.5 });
        assert!(registry.apply(&bad, &img).is_err());
        let bad = KernelArgs::Vignette(VignetteArgs {
            intensity: f32::NAN,
        });
        assert!(registry.apply(&bad, &img).is_err());
    }
}
