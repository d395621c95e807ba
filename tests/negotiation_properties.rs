//! Randomized checks of resolution negotiation over generated capability tables

use camera_session::capabilities::{
    DeviceCapabilities, FrameRateRange, HighSpeedVideoConfig, RecommendedSize, ResolutionPreset,
    Size,
};
use camera_session::negotiator::{
    NORMAL_PREVIEW_BOUND, NegotiationNote, SLOW_MOTION_PREVIEW_BOUND, negotiate,
    slow_motion_frame_rate,
};
use tokio_test::assert_ok;

const COMMON_SIZES: [Size; 10] = [
    Size::new(4032, 3024),
    Size::new(3840, 2160),
    Size::new(2560, 1440),
    Size::new(1920, 1080),
    Size::new(1440, 1080),
    Size::new(1280, 720),
    Size::new(1024, 768),
    Size::new(640, 480),
    Size::new(640, 360),
    Size::new(320, 240),
];

fn random_size() -> Size {
    if rand::random_range(0..4) == 0 {
        Size::new(rand::random_range(1..5000), rand::random_range(1..3000))
    } else {
        COMMON_SIZES[rand::random_range(0..COMMON_SIZES.len())]
    }
}

fn random_sizes(max: usize) -> Vec<Size> {
    (0..rand::random_range(1..=max)).map(|_| random_size()).collect()
}

fn random_capabilities() -> DeviceCapabilities {
    let high_speed_video = (0..rand::random_range(0..3))
        .map(|_| HighSpeedVideoConfig {
            size: random_size(),
            fps_ranges: (0..rand::random_range(0..4))
                .map(|_| {
                    let lower = rand::random_range(15..=240);
                    FrameRateRange::new(lower, rand::random_range(lower..=240))
                })
                .collect(),
        })
        .collect();
    let recommended_sizes = ResolutionPreset::ALL
        .into_iter()
        .filter(|_| rand::random_range(0..2) == 0)
        .map(|preset| RecommendedSize {
            preset,
            size: random_size(),
        })
        .collect();

    DeviceCapabilities {
        output_sizes: random_sizes(8),
        still_sizes: if rand::random_range(0..3) == 0 {
            Vec::new()
        } else {
            random_sizes(4)
        },
        high_speed_video,
        recommended_sizes,
        active_array_size: Size::new(4032, 3024),
        ..Default::default()
    }
}

#[test]
fn test_preview_matches_aspect_within_bound_or_first_entry() {
    for _ in 0..500 {
        let caps = random_capabilities();
        let slow_motion = rand::random_range(0..2) == 0;
        let preset = ResolutionPreset::ALL[rand::random_range(0..ResolutionPreset::ALL.len())];
        let config = assert_ok!(negotiate(preset, slow_motion, &caps));

        let bound = if slow_motion {
            SLOW_MOTION_PREVIEW_BOUND
        } else {
            NORMAL_PREVIEW_BOUND
        };
        if config.notes.contains(&NegotiationNote::PreviewSizeFallback) {
            assert_eq!(config.preview_size, caps.output_sizes[0], "{caps:?}");
            assert!(
                !caps.output_sizes.iter().any(|size| {
                    size.fits_within(bound) && size.matches_aspect_of(config.video_size)
                }),
                "Fell back although a candidate existed: {caps:?}"
            );
        } else {
            assert!(caps.output_sizes.contains(&config.preview_size));
            assert!(config.preview_size.fits_within(bound), "{config:?}");
            assert!(config.preview_size.matches_aspect_of(config.video_size), "{config:?}");
        }
    }
}

#[test]
fn test_frame_rate_only_for_slow_motion() {
    for _ in 0..200 {
        let caps = random_capabilities();
        let config = assert_ok!(negotiate(ResolutionPreset::High, false, &caps));
        assert_eq!(config.frame_rate_range, None);

        let config = assert_ok!(negotiate(ResolutionPreset::High, true, &caps));
        let expected = slow_motion_frame_rate(caps.high_speed_fps_ranges_for(config.video_size));
        assert_eq!(config.frame_rate_range, expected);
    }
}

#[test]
fn test_negotiation_is_deterministic() {
    for _ in 0..100 {
        let caps = random_capabilities();
        let first = assert_ok!(negotiate(ResolutionPreset::Max, true, &caps));
        let second = assert_ok!(negotiate(ResolutionPreset::Max, true, &caps));
        assert_eq!(first, second);
    }
}

#[test]
fn test_slow_motion_scan_depends_on_order() {
    let ranges = [
        FrameRateRange::new(30, 60),
        FrameRateRange::new(24, 48),
        FrameRateRange::new(60, 120),
    ];
    assert_eq!(
        slow_motion_frame_rate(&ranges),
        Some(FrameRateRange::new(48, 120))
    );

    let reordered = [ranges[1], ranges[2], ranges[0]];
    assert_eq!(
        slow_motion_frame_rate(&reordered),
        Some(FrameRateRange::new(60, 120))
    );
    assert_eq!(slow_motion_frame_rate(&[]), None);
}
