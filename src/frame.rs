//! Copying native image buffers into owned frames for stream subscribers.

use std::ops::{Deref, DerefMut};

use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::driver::{DriverResult, ImageReceiver, PixelFormat, RawImage};

/// One plane of a marshaled frame
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Plane {
    pub bytes_per_row: u32,
    pub bytes_per_pixel: u32,
    pub bytes: Vec<u8>,
}

/// A captured image detached from the driver's buffer pool
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Frame {
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
    pub planes: Vec<Plane>,
}

impl Frame {
    /// Total payload size across all planes
    pub fn byte_len(&self) -> usize {
        self.planes.iter().map(|plane| plane.bytes.len()).sum()
    }
}

/// Returns the wrapped buffer to its pool when dropped.
pub struct ImageGuard(Box<dyn RawImage>);

impl ImageGuard {
    pub fn new(image: Box<dyn RawImage>) -> Self {
        Self(image)
    }
}

impl Deref for ImageGuard {
    type Target = dyn RawImage;

    fn deref(&self) -> &Self::Target {
        self.0.as_ref()
    }
}

impl DerefMut for ImageGuard {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.0.as_mut()
    }
}

impl Drop for ImageGuard {
    fn drop(&mut self) {
        self.0.close();
    }
}

/// Copy every plane of `image` into owned memory
pub fn copy_frame(image: &dyn RawImage) -> Frame {
    let planes = image
        .planes()
        .into_iter()
        .map(|plane| Plane {
            bytes_per_row: plane.row_stride,
            bytes_per_pixel: plane.pixel_stride,
            bytes: plane.data.to_vec(),
        })
        .collect();

    Frame {
        width: image.width(),
        height: image.height(),
        format: image.format(),
        planes,
    }
}

/// Take the newest image from `receiver` and marshal it.
///
/// Older queued images are dropped by the receiver. An empty receiver is not an
/// error. The native buffer is released before this returns.
pub fn marshal_latest(receiver: &mut dyn ImageReceiver) -> DriverResult<Option<Frame>> {
    let Some(image) = receiver.acquire_latest_image()? else {
        trace!("Frame notification without a queued image");
        return Ok(None);
    };
    let image = ImageGuard::new(image);
    Ok(Some(copy_frame(&*image)))
}

/// Take the newest image and return the bytes of its first plane.
///
/// Used for JPEG stills, which carry the whole file in one plane.
pub fn take_first_plane(receiver: &mut dyn ImageReceiver) -> DriverResult<Option<Vec<u8>>> {
    let Some(image) = receiver.acquire_latest_image()? else {
        return Ok(None);
    };
    let image = ImageGuard::new(image);
    Ok(image.planes().first().map(|plane| plane.data.to_vec()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::RawPlane;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct TestImage {
        planes: Vec<Vec<u8>>,
        closed: Arc<AtomicUsize>,
    }

    impl RawImage for TestImage {
        fn width(&self) -> u32 {
            4
        }
        fn height(&self) -> u32 {
            2
        }
        fn format(&self) -> PixelFormat {
            PixelFormat::Yuv420
        }
        fn planes(&self) -> Vec<RawPlane<'_>> {
            self.planes
                .iter()
                .map(|data| RawPlane {
                    row_stride: 4,
                    pixel_stride: 1,
                    data,
                })
                .collect()
        }
        fn close(&mut self) {
            self.closed.fetch_add(1, Ordering::SeqCst);
        }
    }

    struct TestReceiver {
        queued: Vec<TestImage>,
        acquired: usize,
    }

    impl ImageReceiver for TestReceiver {
        fn acquire_latest_image(&mut self) -> DriverResult<Option<Box<dyn RawImage>>> {
            self.acquired += 1;
            let latest = self.queued.pop();
            self.queued.clear();
            Ok(latest.map(|image| Box::new(image) as Box<dyn RawImage>))
        }
        fn close(&mut self) {}
    }

    #[test]
    fn test_marshal_copies_planes_and_releases() {
        let closed = Arc::new(AtomicUsize::new(0));
        let mut receiver = TestReceiver {
            queued: vec![
                TestImage {
                    planes: vec![vec![0; 8]],
                    closed: closed.clone(),
                },
                TestImage {
                    planes: vec![vec![1; 8], vec![2; 2], vec![3; 2]],
                    closed: closed.clone(),
                },
            ],
            acquired: 0,
        };

        let frame = marshal_latest(&mut receiver)
            .expect("marshal failed")
            .expect("frame expected");
        assert_eq!(frame.width, 4);
        assert_eq!(frame.planes.len(), 3);
        assert_eq!(frame.planes[0].bytes, vec![1; 8]);
        assert_eq!(frame.byte_len(), 12);
        assert_eq!(closed.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_marshal_empty_receiver_is_silent() {
        let mut receiver = TestReceiver {
            queued: Vec::new(),
            acquired: 0,
        };
        let frame = marshal_latest(&mut receiver).expect("marshal failed");
        assert!(frame.is_none());
        assert_eq!(receiver.acquired, 1);
    }

    #[test]
    fn test_frame_payload_shape() {
        let frame = Frame {
            width: 2,
            height: 1,
            format: PixelFormat::Yuv420,
            planes: vec![Plane {
                bytes_per_row: 2,
                bytes_per_pixel: 1,
                bytes: vec![7, 8],
            }],
        };
        let value = serde_json::to_value(&frame).expect("serialize failed");
        assert_eq!(value["planes"][0]["bytesPerRow"], 2);
        assert_eq!(value["planes"][0]["bytesPerPixel"], 1);
        assert_eq!(value["format"], "yuv420");
    }
}
