//! Composable geometric transforms.
//!
//! Geometric effects are described relative to "the current extent" instead
//! of fixed pixel values: every sub-transform only ever reads the rectangle
//! handed to it at apply time, never a value captured at construction, which
//! is what keeps a composed chain resolution-independent.

use std::sync::Arc;

use crate::{
    geom::{Extent, Rect},
    units::ImageUnit,
};

/// `Rect -> (width, height)`.
#[derive(Clone)]
pub struct SizeTransform(Arc<dyn Fn(Rect) -> (f32, f32) + Send + Sync>);

impl SizeTransform {
    pub fn new(f: impl Fn(Rect) -> (f32, f32) + Send + Sync + 'static) -> Self {
        Self(Arc::new(f))
    }

    pub fn identity() -> Self {
        Self::new(|r| (r.width, r.height))
    }

    pub fn scaled(factor: f32) -> Self {
        Self::new(move |r| (r.width * factor, r.height * factor))
    }

    /// Uniformly scale so the result covers `target` on both axes.
    pub fn fill(target: Extent) -> Self {
        Self::new(move |r| {
            let sx = target.width as f32 / r.width.max(1.0);
            let sy = target.height as f32 / r.height.max(1.0);
            let s = sx.max(sy);
            (r.width * s, r.height * s)
        })
    }

    /// Uniformly scale so the result fits inside `target` on both axes.
    pub fn fit(target: Extent) -> Self {
        Self::new(move |r| {
            let sx = target.width as f32 / r.width.max(1.0);
            let sy = target.height as f32 / r.height.max(1.0);
            let s = sx.min(sy);
            (r.width * s, r.height * s)
        })
    }

    /// Scale so the shorter edge equals the resolved unit.
    pub fn short_edge(unit: ImageUnit) -> Self {
        Self::new(move |r| {
            let extent = r.floored_extent();
            let edge = unit.resolve(extent).max(1.0);
            let s = edge / r.width.min(r.height).max(1.0);
            (r.width * s, r.height * s)
        })
    }

    pub fn then(self, next: SizeTransform) -> SizeTransform {
        SizeTransform::new(move |r| {
            let (w, h) = (self.0)(r);
            (next.0)(Rect::new(r.x, r.y, w, h))
        })
    }

    pub fn eval(&self, rect: Rect) -> (f32, f32) {
        (self.0)(rect)
    }

    /// Evaluate and floor to whole pixels before the size reaches a resample
    /// primitive.
    pub fn apply(&self, rect: Rect) -> Extent {
        let (w, h) = (self.0)(rect);
        crate::geom::floor_size(w, h)
    }
}

/// `Rect -> (x, y)`.
#[derive(Clone)]
pub struct PositionTransform(Arc<dyn Fn(Rect) -> (f32, f32) + Send + Sync>);

impl PositionTransform {
    pub fn new(f: impl Fn(Rect) -> (f32, f32) + Send + Sync + 'static) -> Self {
        Self(Arc::new(f))
    }

    pub fn identity() -> Self {
        Self::new(|r| (r.x, r.y))
    }

    pub fn center() -> Self {
        Self::new(|r| r.center())
    }

    /// Position at a fraction of the rect's own size from its origin.
    pub fn normalized(fx: f32, fy: f32) -> Self {
        Self::new(move |r| (r.x + fx * r.width, r.y + fy * r.height))
    }

    pub fn offset(dx: ImageUnit, dy: ImageUnit) -> Self {
        Self::new(move |r| {
            let extent = r.floored_extent();
            (r.x + dx.resolve(extent), r.y + dy.resolve(extent))
        })
    }

    pub fn then(self, next: PositionTransform) -> PositionTransform {
        PositionTransform::new(move |r| {
            let (x, y) = (self.0)(r);
            (next.0)(Rect::new(x, y, r.width, r.height))
        })
    }

    pub fn eval(&self, rect: Rect) -> (f32, f32) {
        (self.0)(rect)
    }

    pub fn apply(&self, rect: Rect) -> (i64, i64) {
        let (x, y) = (self.0)(rect);
        (x.floor() as i64, y.floor() as i64)
    }
}

/// `Rect -> Rect`.
#[derive(Clone)]
pub struct RectTransform(Arc<dyn Fn(Rect) -> Rect + Send + Sync>);

impl RectTransform {
    pub fn new(f: impl Fn(Rect) -> Rect + Send + Sync + 'static) -> Self {
        Self(Arc::new(f))
    }

    pub fn identity() -> Self {
        Self::new(|r| r)
    }

    pub fn inset(unit: ImageUnit) -> Self {
        Self::new(move |r| {
            let extent = r.floored_extent();
            r.inset(unit.resolve(extent))
        })
    }

    pub fn then(self, next: RectTransform) -> RectTransform {
        RectTransform::new(move |r| (next.0)((self.0)(r)))
    }

    pub fn eval(&self, rect: Rect) -> Rect {
        (self.0)(rect)
    }

    pub fn apply(&self, rect: Rect) -> Rect {
        (self.0)(rect).floored()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rects() -> Vec<Rect> {
        vec![
            Rect::new(0.0, 0.0, 100.0, 50.0),
            Rect::new(10.0, 20.0, 33.3, 77.7),
            Rect::new(0.0, 0.0, 3000.0, 4000.0),
        ]
    }

    #[test]
    fn then_identity_is_identity() {
        let t = SizeTransform::scaled(0.5).then(SizeTransform::identity());
        for r in rects() {
            assert_eq!(t.eval(r), SizeTransform::scaled(0.5).eval(r));
        }
    }

    #[test]
    fn composition_is_associative() {
        let a = || RectTransform::new(|r| r.inset(2.0));
        let b = || RectTransform::new(|r| Rect::new(r.x, r.y, r.width * 0.5, r.height * 0.5));
        let c = || RectTransform::new(|r| Rect::new(r.x + 1.0, r.y + 1.0, r.width, r.height));

        let left = a().then(b()).then(c());
        let right = a().then(b().then(c()));
        for r in rects() {
            assert_eq!(left.eval(r), right.eval(r));
        }
    }

    #[test]
    fn apply_floors_fractional_sizes() {
        let t = SizeTransform::scaled(1.0 / 3.0);
        let e = t.apply(Rect::new(0.0, 0.0, 100.0, 100.0));
        assert_eq!(e, Extent::new(33, 33));
    }

    #[test]
    fn fill_covers_target_on_both_axes() {
        let t = SizeTransform::fill(Extent::new(200, 100));
        let (w, h) = t.eval(Rect::new(0.0, 0.0, 100.0, 100.0));
        assert!(w >= 200.0 && h >= 100.0);
    }

    #[test]
    fn position_chain_reads_rect_at_apply_time() {
        let t = PositionTransform::normalized(0.5, 0.5)
            .then(PositionTransform::offset(ImageUnit::Pixels(10.0), ImageUnit::Pixels(0.0)));
        let (x, y) = t.eval(Rect::new(0.0, 0.0, 100.0, 100.0));
        assert_eq!((x, y), (60.0, 50.0));
    }
}
