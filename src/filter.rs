//! Filter values and chain composition.
//!
//! A [`Filter`] is a pure `Image -> Image` function: no mutable state, safe
//! to invoke concurrently and repeatedly. Chains fold an ordered list of
//! steps left-to-right over an accumulator image; a step may also receive the
//! original, pre-chain source image explicitly.

use std::sync::Arc;

use crate::{
    composite_cpu::crossfade_images,
    error::HalationResult,
    image::Image,
};

type FilterFn = dyn Fn(&Image) -> HalationResult<Image> + Send + Sync;
type SourceStepFn = dyn Fn(&Image, &Image) -> HalationResult<Image> + Send + Sync;

#[derive(Clone)]
pub struct Filter(Arc<FilterFn>);

impl Filter {
    pub fn new(f: impl Fn(&Image) -> HalationResult<Image> + Send + Sync + 'static) -> Self {
        Self(Arc::new(f))
    }

    pub fn identity() -> Self {
        Self::new(|image| Ok(image.clone()))
    }

    pub fn apply(&self, image: &Image) -> HalationResult<Image> {
        (self.0)(image)
    }
}

/// One step of a [`chain_steps`] fold.
#[derive(Clone)]
pub enum ChainStep {
    /// Sees only the running accumulator.
    Fixed(Filter),
    /// Receives `(accumulator, original source)` — for effects that must
    /// reference the unmodified frame partway through a chain.
    WithSource(Arc<SourceStepFn>),
}

impl ChainStep {
    pub fn fixed(filter: Filter) -> Self {
        Self::Fixed(filter)
    }

    pub fn with_source(
        f: impl Fn(&Image, &Image) -> HalationResult<Image> + Send + Sync + 'static,
    ) -> Self {
        Self::WithSource(Arc::new(f))
    }
}

/// Fold an ordered list of filters into one.
pub fn chain(filters: impl IntoIterator<Item = Filter>) -> Filter {
    let filters: Vec<Filter> = filters.into_iter().collect();
    Filter::new(move |image| {
        let mut acc = image.clone();
        for f in &filters {
            acc = f.apply(&acc)?;
        }
        Ok(acc)
    })
}

/// Fold chain steps, keeping the original source available to
/// [`ChainStep::WithSource`] steps.
pub fn chain_steps(steps: Vec<ChainStep>) -> Filter {
    Filter::new(move |source| {
        let mut acc = source.clone();
        for step in &steps {
            acc = match step {
                ChainStep::Fixed(f) => f.apply(&acc)?,
                ChainStep::WithSource(f) => f(&acc, source)?,
            };
        }
        Ok(acc)
    })
}

/// Build the step list from the image being filtered, so construction can
/// branch on the current extent.
pub fn chain_using(
    build: impl Fn(&Image) -> HalationResult<Vec<ChainStep>> + Send + Sync + 'static,
) -> Filter {
    Filter::new(move |source| {
        let steps = build(source)?;
        chain_steps(steps).apply(source)
    })
}

/// Apply `inner`, then fade the result back toward the input by `t`.
///
/// Every composed effect exposes a uniform strength control through this one
/// combinator instead of implementing its own fade. `t <= 0` returns the
/// input unchanged without invoking `inner`; `t >= 1` is `inner` itself.
pub fn intensity(t: f32, inner: Filter) -> Filter {
    Filter::new(move |image| {
        let t = t.clamp(0.0, 1.0);
        if t <= 0.0 {
            return Ok(image.clone());
        }
        let filtered = inner.apply(image)?;
        if t >= 1.0 {
            return Ok(filtered);
        }
        crossfade_images(image, &filtered, t)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geom::Extent;

    fn test_image() -> Image {
        Image::solid(Extent::new(4, 4), [40, 80, 120, 255])
    }

    fn invert() -> Filter {
        Filter::new(|img| {
            let mut data = img.data().to_vec();
            for px in data.chunks_exact_mut(4) {
                px[0] = 255 - px[0];
                px[1] = 255 - px[1];
                px[2] = 255 - px[2];
            }
            Image::from_premul_rgba8(img.extent(), data)
        })
    }

    #[test]
    fn empty_chain_is_identity() {
        let img = test_image();
        let out = chain(Vec::new()).apply(&img).unwrap();
        assert_eq!(out, img);
    }

    #[test]
    fn chain_applies_in_order() {
        let img = test_image();
        let double_invert = chain(vec![invert(), invert()]).apply(&img).unwrap();
        assert_eq!(double_invert, img);
    }

    #[test]
    fn with_source_step_sees_original() {
        let img = test_image();
        let steps = vec![
            ChainStep::fixed(invert()),
            ChainStep::with_source(|_acc, source| Ok(source.clone())),
        ];
        let out = chain_steps(steps).apply(&img).unwrap();
        assert_eq!(out, img);
    }

    #[test]
    fn chain_using_branches_on_extent() {
        let img = test_image();
        let f = chain_using(|source| {
            if source.extent().width >= 4 {
                Ok(vec![ChainStep::fixed(invert())])
            } else {
                Ok(Vec::new())
            }
        });
        let out = f.apply(&img).unwrap();
        assert_eq!(out.pixel(0, 0), [215, 175, 135, 255]);
    }

    #[test]
    fn intensity_zero_is_input() {
        let img = test_image();
        let out = intensity(0.0, invert()).apply(&img).unwrap();
        assert_eq!(out, img);
    }

    #[test]
    fn intensity_one_is_filter() {
        let img = test_image();
        let direct = invert().apply(&img).unwrap();
        let out = intensity(1.0, invert()).apply(&img).unwrap();
        assert_eq!(out, direct);
    }

    #[test]
    fn intensity_half_lands_between() {
        let img = test_image();
        let out = intensity(0.5, invert()).apply(&img).unwrap();
        let px = out.pixel(0, 0);
        assert!(px[0] > 40 && px[0] < 215);
    }
}
