//! Resolution negotiation.
//!
//! Turns a caller's [`ResolutionPreset`] and the device's capability table into the
//! concrete sizes and frame-rate range a camera session is built with.

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::capabilities::{DeviceCapabilities, FrameRateRange, ResolutionPreset, Size};
use crate::{CameraError, CameraResult};

/// Width a high-frame-rate video size must have to be preferred
pub const PREFERRED_VIDEO_WIDTH: u32 = 1920;
/// Tallest preferred high-frame-rate video size
pub const PREFERRED_VIDEO_MAX_HEIGHT: u32 = 1080;
/// Bound for the video size when no preferred high-frame-rate size exists
pub const FALLBACK_VIDEO_BOUND: Size = Size::new(2560, 1440);
pub const NORMAL_PREVIEW_BOUND: Size = Size::new(1920, 1080);
pub const SLOW_MOTION_PREVIEW_BOUND: Size = Size::new(2560, 1440);

/// Notes about fallbacks taken while negotiating
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NegotiationNote {
    /// No high-frame-rate size matched, the video size came from the output table
    VideoSizeFallback,
    /// No output size matched the aspect ratio, the first table entry was used
    PreviewSizeFallback,
    /// The preset had no vendor recommendation, a lower preset or still size was used
    StillSizeFallback,
}

/// Sizes fixed for the lifetime of a camera component
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionConfig {
    pub preset: ResolutionPreset,
    pub slow_motion: bool,
    pub preview_size: Size,
    pub video_size: Size,
    /// Only set for slow-motion sessions
    pub frame_rate_range: Option<FrameRateRange>,
    pub still_capture_size: Size,
    #[serde(default)]
    pub notes: Vec<NegotiationNote>,
}

/// Pick the session sizes for a preset.
///
/// Fails only when the capability table advertises no output sizes.
pub fn negotiate(
    preset: ResolutionPreset,
    slow_motion: bool,
    capabilities: &DeviceCapabilities,
) -> CameraResult<SessionConfig> {
    let first_output = *capabilities
        .output_sizes
        .first()
        .ok_or(CameraError::NoSupportedSizes)?;
    let mut notes = Vec::new();

    let video_size = match choose_video_size(capabilities) {
        Some(size) => size,
        None => {
            notes.push(NegotiationNote::VideoSizeFallback);
            let size = capabilities
                .output_sizes
                .iter()
                .copied()
                .filter(|size| size.fits_within(FALLBACK_VIDEO_BOUND))
                .max_by_key(Size::area)
                .unwrap_or(first_output);
            warn!("Couldn't find any suitable high-speed video size, using {size}");
            size
        }
    };

    let bound = if slow_motion {
        SLOW_MOTION_PREVIEW_BOUND
    } else {
        NORMAL_PREVIEW_BOUND
    };
    let preview_size = match choose_optimal_size(&capabilities.output_sizes, bound, video_size) {
        Some(size) => size,
        None => {
            warn!("Couldn't find any suitable preview size, using {first_output}");
            notes.push(NegotiationNote::PreviewSizeFallback);
            first_output
        }
    };

    let frame_rate_range = if slow_motion {
        let ranges = capabilities.high_speed_fps_ranges_for(video_size);
        for range in ranges {
            debug!("High-speed range for {video_size}: {range}");
        }
        slow_motion_frame_rate(ranges)
    } else {
        None
    };

    let still_capture_size = match preset
        .fallback_chain()
        .find_map(|candidate| capabilities.recommended_size(candidate))
    {
        Some(size) => size,
        None => {
            notes.push(NegotiationNote::StillSizeFallback);
            capabilities
                .still_sizes
                .iter()
                .copied()
                .max_by_key(Size::area)
                .unwrap_or(preview_size)
        }
    };

    debug!(
        "Negotiated preset {preset}: preview {preview_size}, video {video_size}, still {still_capture_size}, fps {frame_rate_range:?}"
    );

    Ok(SessionConfig {
        preset,
        slow_motion,
        preview_size,
        video_size,
        frame_rate_range,
        still_capture_size,
        notes,
    })
}

/// The tallest high-frame-rate size that is 1920 wide and at most 1080 tall.
pub fn choose_video_size(capabilities: &DeviceCapabilities) -> Option<Size> {
    capabilities
        .high_speed_sizes()
        .filter(|size| {
            size.width == PREFERRED_VIDEO_WIDTH && size.height <= PREFERRED_VIDEO_MAX_HEIGHT
        })
        .max_by_key(|size| size.height)
}

/// The largest choice within `bound` whose aspect ratio exactly matches `aspect`.
pub fn choose_optimal_size(choices: &[Size], bound: Size, aspect: Size) -> Option<Size> {
    choices
        .iter()
        .copied()
        .filter(|option| option.matches_aspect_of(aspect) && option.fits_within(bound))
        .max_by_key(Size::area)
}

/// Frame-rate range for a slow-motion session.
///
/// `max` is the highest upper bound. `min` starts at `max` and takes a range's
/// upper bound each time the running `min` exceeds that range's lower bound, so
/// the result depends on advertised order and never reads a lower bound as the
/// answer.
pub fn slow_motion_frame_rate(ranges: &[FrameRateRange]) -> Option<FrameRateRange> {
    let max = ranges.iter().map(|range| range.upper).max()?;
    let mut min = max;
    for range in ranges {
        if min > range.lower {
            min = range.upper;
        }
    }
    Some(FrameRateRange::new(min, max))
}
