//! Focus lock state and device orientation tracking.

use serde::{Deserialize, Serialize};

use crate::capabilities::Size;
use crate::driver::MeteringRectangle;

/// Raw orientation value reported when the device is lying flat
pub const ORIENTATION_UNKNOWN: i32 = -1;
/// Edge length of the focus metering square, in sensor pixels
pub const FOCUS_AREA_SIZE: u32 = 250;
pub const FOCUS_AREA_WEIGHT: u32 = 500;

/// Normalized point in the preview, `(0, 0)` top-left and `(1, 1)` bottom-right
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub struct FocusPoint {
    pub x: f64,
    pub y: f64,
}

impl FocusPoint {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub struct FocusState {
    pub locked: bool,
    pub point: Option<FocusPoint>,
}

impl FocusState {
    pub fn lock(&mut self, point: FocusPoint) {
        self.locked = true;
        self.point = Some(point);
    }

    pub fn unlock(&mut self) {
        self.locked = false;
    }
}

/// Square metering region centered on `point`, clamped to the active array.
pub fn metering_region(point: FocusPoint, active_array: Size) -> MeteringRectangle {
    let width = FOCUS_AREA_SIZE.min(active_array.width);
    let height = FOCUS_AREA_SIZE.min(active_array.height);
    MeteringRectangle {
        left: region_start(point.x, active_array.width, width),
        top: region_start(point.y, active_array.height, height),
        width,
        height,
        weight: FOCUS_AREA_WEIGHT,
    }
}

fn region_start(normalized: f64, extent: u32, length: u32) -> u32 {
    let center = normalized.clamp(0.0, 1.0) * f64::from(extent);
    let start = (center - f64::from(length) / 2.0).max(0.0);
    let max_start = extent.saturating_sub(length);
    // start is non-negative and bounded by extent, so the cast cannot wrap
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let start = start.round() as u32;
    start.min(max_start)
}

/// Last known device rotation, snapped to a multiple of 90 degrees
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct OrientationTracker {
    current: Option<i32>,
}

impl OrientationTracker {
    pub fn update(&mut self, raw_degrees: i32) {
        if raw_degrees == ORIENTATION_UNKNOWN {
            return;
        }
        let snapped = ((f64::from(raw_degrees) / 90.0).round() as i32) * 90;
        self.current = Some(snapped);
    }

    pub fn current(&self) -> Option<i32> {
        self.current
    }

    /// Clockwise rotation to apply to captured media so it appears upright
    pub fn media_orientation(&self, sensor_orientation: u32, front_facing: bool) -> u32 {
        let offset = match self.current {
            None => 0,
            Some(current) if front_facing => -current,
            Some(current) => current,
        };
        let sensor = i64::from(sensor_orientation);
        let rotation = (i64::from(offset) + sensor + 360).rem_euclid(360);
        u32::try_from(rotation).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_orientation_snapping() {
        let mut tracker = OrientationTracker::default();
        assert_eq!(tracker.current(), None);
        tracker.update(100);
        assert_eq!(tracker.current(), Some(90));
        tracker.update(ORIENTATION_UNKNOWN);
        assert_eq!(tracker.current(), Some(90));
        tracker.update(350);
        assert_eq!(tracker.current(), Some(360));
    }

    #[test]
    fn test_media_orientation() {
        let mut tracker = OrientationTracker::default();
        assert_eq!(tracker.media_orientation(90, false), 90);

        tracker.update(90);
        assert_eq!(tracker.media_orientation(90, false), 180);
        assert_eq!(tracker.media_orientation(270, true), 180);

        tracker.update(270);
        assert_eq!(tracker.media_orientation(90, false), 0);
        assert_eq!(tracker.media_orientation(270, true), 0);
    }

    #[test]
    fn test_metering_region_clamped() {
        let active = Size::new(4000, 3000);

        let center = metering_region(FocusPoint::new(0.5, 0.5), active);
        assert_eq!((center.left, center.top), (1875, 1375));
        assert_eq!((center.width, center.height), (250, 250));
        assert_eq!(center.weight, FOCUS_AREA_WEIGHT);

        let corner = metering_region(FocusPoint::new(0.0, 1.0), active);
        assert_eq!((corner.left, corner.top), (0, 2750));

        let outside = metering_region(FocusPoint::new(-3.0, 7.0), active);
        assert_eq!((outside.left, outside.top), (0, 2750));
    }

    #[test]
    fn test_focus_state() {
        let mut focus = FocusState::default();
        focus.lock(FocusPoint::new(0.25, 0.75));
        assert!(focus.locked);
        focus.unlock();
        assert!(!focus.locked);
        assert_eq!(focus.point, Some(FocusPoint::new(0.25, 0.75)));
    }
}
