//! Device capability tables and the resolution presets callers pick from.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::{CameraError, CameraResult};

/// A width/height pair in pixels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Size {
    pub width: u32,
    pub height: u32,
}

impl Size {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub fn area(&self) -> u64 {
        u64::from(self.width) * u64::from(self.height)
    }

    pub fn fits_within(&self, bound: Size) -> bool {
        self.width <= bound.width && self.height <= bound.height
    }

    /// Exact integer aspect match: `height == width * reference.height / reference.width`.
    ///
    /// Sizes that only match after rounding are rejected.
    pub fn matches_aspect_of(&self, reference: Size) -> bool {
        if reference.width == 0 {
            return false;
        }
        let expected =
            u64::from(self.width) * u64::from(reference.height) / u64::from(reference.width);
        u64::from(self.height) == expected
    }
}

impl fmt::Display for Size {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// Inclusive frames-per-second range
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameRateRange {
    pub lower: u32,
    pub upper: u32,
}

impl FrameRateRange {
    pub const fn new(lower: u32, upper: u32) -> Self {
        Self { lower, upper }
    }
}

impl fmt::Display for FrameRateRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {}]", self.lower, self.upper)
    }
}

/// Caller-selected quality tier
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ResolutionPreset {
    Low,
    Medium,
    High,
    VeryHigh,
    UltraHigh,
    Max,
}

impl ResolutionPreset {
    pub const ALL: [ResolutionPreset; 6] = [
        ResolutionPreset::Low,
        ResolutionPreset::Medium,
        ResolutionPreset::High,
        ResolutionPreset::VeryHigh,
        ResolutionPreset::UltraHigh,
        ResolutionPreset::Max,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ResolutionPreset::Low => "low",
            ResolutionPreset::Medium => "medium",
            ResolutionPreset::High => "high",
            ResolutionPreset::VeryHigh => "veryHigh",
            ResolutionPreset::UltraHigh => "ultraHigh",
            ResolutionPreset::Max => "max",
        }
    }

    /// This preset followed by every lower one, best first.
    pub fn fallback_chain(self) -> impl Iterator<Item = ResolutionPreset> {
        Self::ALL.into_iter().rev().filter(move |preset| *preset <= self)
    }
}

impl fmt::Display for ResolutionPreset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ResolutionPreset {
    type Err = CameraError;

    fn from_str(s: &str) -> CameraResult<Self> {
        Self::ALL
            .into_iter()
            .find(|preset| preset.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| CameraError::Config(format!("Unknown resolution preset '{s}'")))
    }
}

/// Which way the lens faces
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LensFacing {
    Front,
    #[default]
    Back,
    External,
}

/// Post-processing effects a device can apply
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EffectMode {
    Off,
    Mono,
    Negative,
    Sepia,
}

/// A size the device can stream at high frame rates, with its fps ranges
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HighSpeedVideoConfig {
    pub size: Size,
    pub fps_ranges: Vec<FrameRateRange>,
}

/// The vendor's recommended capture size for a preset
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecommendedSize {
    pub preset: ResolutionPreset,
    pub size: Size,
}

/// Static description of a camera device, read once from the driver
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct DeviceCapabilities {
    /// Clockwise rotation of the sensor relative to the device's natural orientation
    pub sensor_orientation: u32,
    pub lens_facing: LensFacing,
    /// Sizes usable for the preview render target
    pub output_sizes: Vec<Size>,
    /// Sizes usable for JPEG still capture
    pub still_sizes: Vec<Size>,
    #[serde(default)]
    pub high_speed_video: Vec<HighSpeedVideoConfig>,
    #[serde(default)]
    pub recommended_sizes: Vec<RecommendedSize>,
    #[serde(default)]
    pub effects: Vec<EffectMode>,
    pub active_array_size: Size,
}

impl DeviceCapabilities {
    pub fn is_front_facing(&self) -> bool {
        self.lens_facing == LensFacing::Front
    }

    pub fn supports_effect(&self, effect: EffectMode) -> bool {
        self.effects.contains(&effect)
    }

    pub fn high_speed_sizes(&self) -> impl Iterator<Item = Size> + '_ {
        self.high_speed_video.iter().map(|config| config.size)
    }

    /// Frame-rate ranges advertised for a high-speed size, in advertised order
    pub fn high_speed_fps_ranges_for(&self, size: Size) -> &[FrameRateRange] {
        self.high_speed_video
            .iter()
            .find(|config| config.size == size)
            .map(|config| config.fps_ranges.as_slice())
            .unwrap_or_default()
    }

    pub fn recommended_size(&self, preset: ResolutionPreset) -> Option<Size> {
        self.recommended_sizes
            .iter()
            .find(|entry| entry.preset == preset)
            .map(|entry| entry.size)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_aspect_matching_is_exact() {
        let reference = Size::new(1920, 1080);
        assert!(Size::new(1280, 720).matches_aspect_of(reference));
        assert!(Size::new(3840, 2160).matches_aspect_of(reference));
        assert!(!Size::new(640, 480).matches_aspect_of(reference));
        // 854 * 9 / 16 == 480 with truncation, so 854x480 matches but 854x481 does not
        assert!(Size::new(854, 480).matches_aspect_of(reference));
        assert!(!Size::new(854, 481).matches_aspect_of(reference));
        assert!(!Size::new(640, 360).matches_aspect_of(Size::new(0, 0)));
    }

    #[test]
    fn test_preset_parsing() {
        assert_eq!(
            "veryHigh".parse::<ResolutionPreset>().expect("parse failed"),
            ResolutionPreset::VeryHigh
        );
        assert_eq!(
            "MAX".parse::<ResolutionPreset>().expect("parse failed"),
            ResolutionPreset::Max
        );
        assert!("huge".parse::<ResolutionPreset>().is_err());
    }

    #[test]
    fn test_preset_serialization() {
        let json = serde_json::to_string(&ResolutionPreset::UltraHigh).expect("serialize failed");
        assert_eq!(json, "\"ultraHigh\"");
    }

    #[test]
    fn test_fallback_chain() {
        let chain: Vec<_> = ResolutionPreset::High.fallback_chain().collect();
        assert_eq!(
            chain,
            vec![
                ResolutionPreset::High,
                ResolutionPreset::Medium,
                ResolutionPreset::Low
            ]
        );
        assert_eq!(ResolutionPreset::Low.fallback_chain().count(), 1);
    }

    #[test]
    fn test_fps_ranges_lookup() {
        let caps = DeviceCapabilities {
            high_speed_video: vec![HighSpeedVideoConfig {
                size: Size::new(1920, 1080),
                fps_ranges: vec![FrameRateRange::new(120, 120), FrameRateRange::new(30, 120)],
            }],
            ..Default::default()
        };
        assert_eq!(caps.high_speed_fps_ranges_for(Size::new(1920, 1080)).len(), 2);
        assert!(caps.high_speed_fps_ranges_for(Size::new(1280, 720)).is_empty());
    }

    #[test]
    fn test_empty_table_has_zero_active_array() {
        let caps = DeviceCapabilities::default();
        assert_eq!(caps.active_array_size, Size::new(0, 0));
        assert!(caps.output_sizes.is_empty());
    }
}
