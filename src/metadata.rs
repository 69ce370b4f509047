use chrono::{DateTime, Utc};

/// Capture-time facts supplied by the camera boundary.
#[derive(Clone, Copy, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct CaptureMetadata {
    pub captured_at: DateTime<Utc>,
    pub orientation: DeviceOrientation,
    pub flash_fired: bool,
}

impl CaptureMetadata {
    pub fn new(captured_at: DateTime<Utc>, orientation: DeviceOrientation, flash_fired: bool) -> Self {
        Self {
            captured_at,
            orientation,
            flash_fired,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum DeviceOrientation {
    #[default]
    Portrait,
    PortraitUpsideDown,
    LandscapeLeft,
    LandscapeRight,
}

impl DeviceOrientation {
    pub fn is_landscape(&self) -> bool {
        matches!(self, Self::LandscapeLeft | Self::LandscapeRight)
    }
}
