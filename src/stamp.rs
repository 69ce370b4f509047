//! Film-style date stamp burned into the lower corner of a photo.
//!
//! The stamp is rasterized as white glyphs on transparency, tinted to the
//! configured color, edge-feathered with the burn kernel, rotated to match
//! the photo's display orientation, and composited with linear dodge. The
//! margins and feather radius are empirical constants tuned by inspection.

use chrono::{DateTime, Datelike, Utc};
use cosmic_text::{Attrs, Buffer, Color, Family, FontSystem, Metrics, Shaping, SwashCache};

use crate::{
    error::{HalationError, HalationResult},
    geom::Extent,
    image::Image,
    params::StampFont,
};

/// Stamp glyph height as a fraction of √(photo area).
pub const STAMP_HEIGHT_NORMALIZED: f32 = 0.032;

/// Distance from the photo's bottom-right corner, same normalization.
pub const STAMP_MARGIN_NORMALIZED: f32 = 0.045;

/// Feather radius handed to the burn kernel, same normalization.
pub const STAMP_FEATHER_NORMALIZED: f32 = 0.0035;

/// Quartz-date-back style: `'98 8 24`.
pub fn format_stamp(captured_at: DateTime<Utc>) -> String {
    format!(
        "'{:02} {} {}",
        captured_at.year() % 100,
        captured_at.month(),
        captured_at.day()
    )
}

/// Rasterize `text` as white glyphs on transparency at the given pixel
/// height. Returns a transparent placeholder of the nominal size when no
/// glyph coverage is produced (e.g. a machine with no usable fonts).
pub fn render_stamp_text(
    text: &str,
    font: StampFont,
    height_px: f32,
) -> HalationResult<Image> {
    if !height_px.is_finite() || height_px < 2.0 {
        return Err(HalationError::render("stamp height must be >= 2 pixels"));
    }

    let mut font_system = FontSystem::new();
    let mut swash_cache = SwashCache::new();

    let font_size = height_px * 0.8;
    let metrics = Metrics::new(font_size, height_px);
    let mut buffer = Buffer::new(&mut font_system, metrics);
    buffer.set_size(&mut font_system, Some(height_px * 16.0), None);

    let family = match font {
        StampFont::Classic => Family::Monospace,
        StampFont::Compact => Family::SansSerif,
    };
    let attrs = Attrs::new().family(family);
    buffer.set_text(&mut font_system, text, &attrs, Shaping::Advanced);
    buffer.shape_until_scroll(&mut font_system, false);

    let mut text_width = 0.0f32;
    for run in buffer.layout_runs() {
        for glyph in run.glyphs.iter() {
            text_width = text_width.max(glyph.x + glyph.w);
        }
    }

    let extent = Extent::new(
        (text_width.ceil() as u32).max(4) + 2,
        (height_px.ceil() as u32).max(4),
    );
    let mut straight = vec![0u8; extent.area() as usize * 4];

    let w = extent.width as i32;
    let h = extent.height as i32;
    buffer.draw(
        &mut font_system,
        &mut swash_cache,
        Color::rgba(255, 255, 255, 255),
        |x, y, cw, ch, color| {
            let coverage = color.a();
            if coverage == 0 {
                return;
            }
            for dy in 0..ch as i32 {
                for dx in 0..cw as i32 {
                    let px = x + dx;
                    let py = y + dy;
                    if px < 0 || py < 0 || px >= w || py >= h {
                        continue;
                    }
                    let idx = ((py * w + px) as usize) * 4;
                    straight[idx] = 255;
                    straight[idx + 1] = 255;
                    straight[idx + 2] = 255;
                    straight[idx + 3] = straight[idx + 3].max(coverage);
                }
            }
        },
    );

    Image::from_straight_rgba8(extent, straight)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ts(s: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
    }

    #[test]
    fn format_matches_quartz_date_back() {
        assert_eq!(format_stamp(ts("1998-08-24T10:00:00Z")), "'98 8 24");
        assert_eq!(format_stamp(ts("2026-12-01T00:00:00Z")), "'26 12 1");
        assert_eq!(format_stamp(ts("2003-01-05T23:59:00Z")), "'03 1 5");
    }

    #[test]
    fn stamp_raster_has_requested_height() {
        let img = render_stamp_text("'98 8 24", StampFont::Classic, 24.0).unwrap();
        assert_eq!(img.height(), 24);
        assert!(img.width() >= 4);
    }

    #[test]
    fn tiny_height_is_rejected() {
        assert!(render_stamp_text("x", StampFont::Classic, 0.5).is_err());
        assert!(render_stamp_text("x", StampFont::Classic, f32::NAN).is_err());
    }
}
