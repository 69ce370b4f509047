//! The complete, serializable description of one filtered look.
//!
//! A pure value: equality-comparable, independent of any rendered pixels, and
//! persisted verbatim as a flat record of normalized floats, booleans and two
//! string resource identifiers.

use crate::error::{HalationError, HalationResult};

#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct FilterParameters {
    /// Overall softness blur, normalized 0–1.
    pub blur_radius: f32,

    /// Chromatic dispersion strength, normalized 0–1.
    pub chroma_scale: f32,

    pub glow_opacity: f32,
    pub glow_radius: f32,
    pub glow_threshold: f32,

    pub grain_opacity: f32,
    pub grain_size: f32,

    pub leak_opacity: f32,
    /// Light-leak overlay resource, referenced by stable identifier.
    pub leak_id: Option<String>,

    /// Color-grade LUT resource, referenced by stable identifier.
    pub lut_id: Option<String>,
    pub lut_intensity: f32,

    pub vignette_intensity: f32,

    pub stamp_visible: bool,
    pub stamp_font: StampFont,
    pub stamp_color: StampColor,

    pub dust_particle_intensity: f32,
    pub dust_hair_intensity: f32,
    pub dust_opacity: f32,
}

impl Default for FilterParameters {
    fn default() -> Self {
        Self {
            blur_radius: 0.0,
            chroma_scale: 0.0,
            glow_opacity: 0.0,
            glow_radius: 0.5,
            glow_threshold: 0.75,
            grain_opacity: 0.0,
            grain_size: 0.5,
            leak_opacity: 0.0,
            leak_id: None,
            lut_id: None,
            lut_intensity: 1.0,
            vignette_intensity: 0.0,
            stamp_visible: false,
            stamp_font: StampFont::Classic,
            stamp_color: StampColor::Amber,
            dust_particle_intensity: 0.0,
            dust_hair_intensity: 0.0,
            dust_opacity: 0.0,
        }
    }
}

impl FilterParameters {
    /// Reject non-finite or out-of-range fields before they reach a filter.
    pub fn validate(&self) -> HalationResult<()> {
        let unit = |name: &str, v: f32| -> HalationResult<()> {
            if !v.is_finite() || !(0.0..=1.0).contains(&v) {
                return Err(HalationError::validation(format!(
                    "{name} must be a finite value in 0..=1"
                )));
            }
            Ok(())
        };

        unit("blur_radius", self.blur_radius)?;
        unit("chroma_scale", self.chroma_scale)?;
        unit("glow_opacity", self.glow_opacity)?;
        unit("glow_radius", self.glow_radius)?;
        unit("glow_threshold", self.glow_threshold)?;
        unit("grain_opacity", self.grain_opacity)?;
        unit("grain_size", self.grain_size)?;
        unit("leak_opacity", self.leak_opacity)?;
        unit("lut_intensity", self.lut_intensity)?;
        unit("vignette_intensity", self.vignette_intensity)?;
        unit("dust_particle_intensity", self.dust_particle_intensity)?;
        unit("dust_hair_intensity", self.dust_hair_intensity)?;
        unit("dust_opacity", self.dust_opacity)?;

        if let Some(id) = &self.leak_id
            && id.trim().is_empty()
        {
            return Err(HalationError::validation("leak_id must be non-empty"));
        }
        if let Some(id) = &self.lut_id
            && id.trim().is_empty()
        {
            return Err(HalationError::validation("lut_id must be non-empty"));
        }
        Ok(())
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum StampFont {
    #[default]
    Classic,
    Compact,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum StampColor {
    #[default]
    Amber,
    Red,
    White,
}

impl StampColor {
    /// Straight RGB in 0–1.
    pub fn rgb(&self) -> [f32; 3] {
        match self {
            StampColor::Amber => [1.0, 0.62, 0.2],
            StampColor::Red => [0.95, 0.25, 0.15],
            StampColor::White => [0.95, 0.93, 0.88],
        }
    }
}

/// Named starting looks.
pub mod presets {
    use super::*;

    pub fn neutral() -> FilterParameters {
        FilterParameters::default()
    }

    /// Warm, glowy look with a gentle vignette.
    pub fn golden_hour() -> FilterParameters {
        FilterParameters {
            glow_opacity: 0.55,
            glow_radius: 0.6,
            glow_threshold: 0.7,
            vignette_intensity: 0.35,
            lut_id: Some("lut.golden".to_string()),
            lut_intensity: 0.8,
            grain_opacity: 0.2,
            ..FilterParameters::default()
        }
    }

    /// Scuffed expired-film look: heavy grain, dust, a leak and the stamp.
    pub fn expired_stock() -> FilterParameters {
        FilterParameters {
            blur_radius: 0.15,
            chroma_scale: 0.3,
            grain_opacity: 0.6,
            grain_size: 0.7,
            leak_opacity: 0.5,
            leak_id: Some("leak.streak".to_string()),
            vignette_intensity: 0.5,
            stamp_visible: true,
            dust_particle_intensity: 0.6,
            dust_hair_intensity: 0.4,
            dust_opacity: 0.7,
            ..FilterParameters::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_parameters_validate() {
        FilterParameters::default().validate().unwrap();
        presets::golden_hour().validate().unwrap();
        presets::expired_stock().validate().unwrap();
    }

    #[test]
    fn json_roundtrip_preserves_equality() {
        let params = presets::expired_stock();
        let s = serde_json::to_string(&params).unwrap();
        let de: FilterParameters = serde_json::from_str(&s).unwrap();
        assert_eq!(de, params);
    }

    #[test]
    fn out_of_range_fields_rejected() {
        let mut p = FilterParameters::default();
        p.vignette_intensity = 1.5;
        assert!(p.validate().is_err());

        let mut p = FilterParameters::default();
        p.blur_radius = f32::NAN;
        assert!(p.validate().is_err());

        let mut p = FilterParameters::default();
        p.lut_id = Some("  ".to_string());
        assert!(p.validate().is_err());
    }
}
