// crates/reelplay-timeline/src/options.rs
//
// Pass-through rendering options. The playback core carries these to the
// renderer and output devices without interpreting them; equality drives
// change detection downstream.

use serde::{Deserialize, Serialize};

use reelplay_core::image::{HdrData, Mirror, VideoLevels};
use reelplay_core::math::Vector2f;

// ── Color management ─────────────────────────────────────────────────────────

/// OpenColorIO configuration: a config file plus the transform names.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OcioOptions {
    pub enabled: bool,
    pub file_name: String,
    pub input: String,
    pub display: String,
    pub view: String,
    pub look: String,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum LutOrder {
    #[default]
    PostColorConfig,
    PreColorConfig,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LutOptions {
    pub enabled: bool,
    pub file_name: String,
    pub order: LutOrder,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum HdrMode {
    #[default]
    None,
    FromFile,
    Custom,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct HdrOptions {
    pub mode: HdrMode,
    /// Used when `mode` is Custom.
    pub data: HdrData,
}

// ── Image / display ──────────────────────────────────────────────────────────

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ImageFilter {
    Nearest,
    #[default]
    Linear,
}

/// Minify and magnify are configured independently.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageFilters {
    pub minify: ImageFilter,
    pub magnify: ImageFilter,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ImageOptions {
    pub video_levels: Option<VideoLevels>,
    pub image_filters: ImageFilters,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Channels {
    #[default]
    Color,
    Red,
    Green,
    Blue,
    Alpha,
    Lumma,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ColorValues {
    pub enabled: bool,
    pub add: Vector2f,
    pub brightness: f32,
    pub contrast: f32,
    pub saturation: f32,
    pub tint: f32,
    pub invert: bool,
}

impl Default for ColorValues {
    fn default() -> Self {
        Self {
            enabled: false,
            add: Vector2f::default(),
            brightness: 1.0,
            contrast: 1.0,
            saturation: 1.0,
            tint: 0.0,
            invert: false,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LevelsValues {
    pub enabled: bool,
    pub in_low: f32,
    pub in_high: f32,
    pub gamma: f32,
    pub out_low: f32,
    pub out_high: f32,
}

impl Default for LevelsValues {
    fn default() -> Self {
        Self { enabled: false, in_low: 0.0, in_high: 1.0, gamma: 1.0, out_low: 0.0, out_high: 1.0 }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ExrDisplayValues {
    pub enabled: bool,
    pub exposure: f32,
    pub defog: f32,
    pub knee_low: f32,
    pub knee_high: f32,
}

impl Default for ExrDisplayValues {
    fn default() -> Self {
        Self { enabled: false, exposure: 0.0, defog: 0.0, knee_low: 0.0, knee_high: 5.0 }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SoftClipValues {
    pub enabled: bool,
    pub value: f32,
}

impl Default for SoftClipValues {
    fn default() -> Self {
        Self { enabled: false, value: 0.0 }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct DisplayOptions {
    pub channels: Channels,
    pub mirror: Mirror,
    pub color: ColorValues,
    pub levels: LevelsValues,
    pub exr_display: ExrDisplayValues,
    pub soft_clip: SoftClipValues,
    /// Normalize float images into [0, 1] before display.
    pub normalize: bool,
    /// Highlight NaN/Inf pixel values.
    pub invalid_values: bool,
    pub video_levels: Option<VideoLevels>,
    pub ignore_chromaticities: bool,
    pub image_filters: ImageFilters,
}

// ── Background ───────────────────────────────────────────────────────────────

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum BackgroundType {
    #[default]
    Solid,
    Checkers,
    Gradient,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct BackgroundOptions {
    pub background_type: BackgroundType,
    /// RGBA, in [0, 1].
    pub color0: [f32; 4],
    pub color1: [f32; 4],
    pub checkers_size: i32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn equality_detects_changes() {
        let a = DisplayOptions::default();
        let mut b = DisplayOptions::default();
        assert_eq!(a, b);
        b.color.saturation = 0.0;
        assert_ne!(a, b);
    }

    #[test]
    fn options_roundtrip_as_json() {
        let mut options = OcioOptions::default();
        options.enabled = true;
        options.file_name = "config.ocio".into();
        options.view = "sRGB".into();
        let json = serde_json::to_string(&options).unwrap();
        let back: OcioOptions = serde_json::from_str(&json).unwrap();
        assert_eq!(options, back);
    }
}
