//! Contract between the camera session and the platform camera stack.
//!
//! The driver, its devices and sessions, the image receivers, the video recorder,
//! the render target and the orientation sensor are all supplied from outside.
//! Anything the platform reports asynchronously comes back as a [`DriverEvent`]
//! through [`DriverCallbacks`] and is handled on the session loop.

use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::debug;

use crate::capabilities::{DeviceCapabilities, FrameRateRange, Size};

/// First platform API level with constrained high-speed sessions
pub const HIGH_SPEED_SESSION_MIN_API: u32 = 23;
/// First platform API level where a recorder can pause and resume
pub const PAUSE_RESUME_MIN_API: u32 = 24;

/// Failures reported synchronously by driver calls
#[derive(Error, Debug)]
pub enum DriverError {
    #[error("{0}")]
    Access(String),
    #[error("Illegal state: {0}")]
    IllegalState(String),
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type DriverResult<T> = std::result::Result<T, DriverError>;

/// Reasons a device fails to open or dies while open
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceErrorCode {
    CameraInUse,
    MaxCamerasInUse,
    DisabledByPolicy,
    DeviceFault,
    ServiceFault,
    Unknown,
}

impl DeviceErrorCode {
    /// Map a raw platform error code onto the fixed taxonomy
    pub fn from_raw(code: i32) -> Self {
        match code {
            1 => DeviceErrorCode::CameraInUse,
            2 => DeviceErrorCode::MaxCamerasInUse,
            3 => DeviceErrorCode::DisabledByPolicy,
            4 => DeviceErrorCode::DeviceFault,
            5 => DeviceErrorCode::ServiceFault,
            _ => DeviceErrorCode::Unknown,
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            DeviceErrorCode::CameraInUse => "The camera device is in use already.",
            DeviceErrorCode::MaxCamerasInUse => "Max cameras in use",
            DeviceErrorCode::DisabledByPolicy => {
                "The camera device could not be opened due to a device policy."
            }
            DeviceErrorCode::DeviceFault => "The camera device has encountered a fatal error",
            DeviceErrorCode::ServiceFault => "The camera service has encountered a fatal error.",
            DeviceErrorCode::Unknown => "Unknown camera error",
        }
    }
}

impl fmt::Display for DeviceErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.description())
    }
}

/// Why a still capture request failed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CaptureFailureReason {
    FrameworkError,
    Flushed,
    Unknown,
}

impl fmt::Display for CaptureFailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            CaptureFailureReason::FrameworkError => "An error happened in the framework",
            CaptureFailureReason::Flushed => {
                "The capture has failed due to an abortCaptures() call"
            }
            CaptureFailureReason::Unknown => "Unknown reason",
        })
    }
}

/// Pixel layout of images delivered by a receiver
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PixelFormat {
    Jpeg,
    Yuv420,
}

/// The outputs a capture session can feed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SurfaceKind {
    Preview,
    StillCapture,
    FrameStream,
    Recorder,
}

/// A configured output of a capture session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Surface {
    pub kind: SurfaceKind,
    pub size: Size,
}

/// Normal or constrained high-frame-rate session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionKind {
    Normal,
    HighSpeed,
}

/// Identifies one session configuration attempt; newer tokens supersede older ones
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SessionToken(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestTemplate {
    Preview,
    StillCapture,
    Record,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlMode {
    Auto,
    Off,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AutoFocusMode {
    ExtendedDepthOfField,
    Auto,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AutoFocusTrigger {
    Idle,
    Start,
    Cancel,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlashMode {
    Off,
    Torch,
}

/// Rectangle on the active sensor array with a metering weight
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MeteringRectangle {
    pub left: u32,
    pub top: u32,
    pub width: u32,
    pub height: u32,
    pub weight: u32,
}

/// Settings for one capture request or repeating request
#[derive(Debug, Clone, PartialEq)]
pub struct CaptureRequest {
    pub template: RequestTemplate,
    pub targets: Vec<SurfaceKind>,
    pub control_mode: ControlMode,
    pub af_mode: Option<AutoFocusMode>,
    pub af_trigger: AutoFocusTrigger,
    pub af_regions: Vec<MeteringRectangle>,
    pub fps_range: Option<FrameRateRange>,
    pub mono_effect: bool,
    pub flash: FlashMode,
    pub optical_stabilization: bool,
    pub jpeg_orientation: Option<u32>,
    pub jpeg_quality: Option<u8>,
}

impl CaptureRequest {
    pub fn new(template: RequestTemplate) -> Self {
        Self {
            template,
            targets: Vec::new(),
            control_mode: ControlMode::Auto,
            af_mode: None,
            af_trigger: AutoFocusTrigger::Idle,
            af_regions: Vec::new(),
            fps_range: None,
            mono_effect: false,
            flash: FlashMode::Off,
            optical_stabilization: false,
            jpeg_orientation: None,
            jpeg_quality: None,
        }
    }

    pub fn with_target(mut self, target: SurfaceKind) -> Self {
        self.targets.push(target);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VideoEncoder {
    H264,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputContainer {
    Mpeg4,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioSettings {
    pub sample_rate: u32,
}

/// Everything a recorder needs before `prepare`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecorderSettings {
    pub output_path: PathBuf,
    pub container: OutputContainer,
    pub video_encoder: VideoEncoder,
    pub video_bit_rate: u32,
    pub video_frame_rate: u32,
    pub video_size: Size,
    /// `None` records video only
    pub audio: Option<AudioSettings>,
    pub orientation_hint: u32,
}

/// Asynchronous notifications from the platform
pub enum DriverEvent {
    DeviceOpened(Box<dyn CameraDevice>),
    DeviceClosed,
    DeviceDisconnected,
    DeviceError(DeviceErrorCode),
    SessionConfigured {
        token: SessionToken,
        session: Box<dyn CaptureSession>,
    },
    SessionConfigureFailed {
        token: SessionToken,
    },
    /// The still-capture receiver has an image ready
    StillImageAvailable,
    CaptureFailed(CaptureFailureReason),
    /// The frame-stream receiver may have an image ready
    FrameAvailable,
    /// Raw device rotation in degrees, or [`crate::focus::ORIENTATION_UNKNOWN`]
    OrientationChanged(i32),
}

impl fmt::Debug for DriverEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DriverEvent::DeviceOpened(_) => f.write_str("DeviceOpened"),
            DriverEvent::DeviceClosed => f.write_str("DeviceClosed"),
            DriverEvent::DeviceDisconnected => f.write_str("DeviceDisconnected"),
            DriverEvent::DeviceError(code) => write!(f, "DeviceError({code:?})"),
            DriverEvent::SessionConfigured { token, .. } => {
                write!(f, "SessionConfigured({})", token.0)
            }
            DriverEvent::SessionConfigureFailed { token } => {
                write!(f, "SessionConfigureFailed({})", token.0)
            }
            DriverEvent::StillImageAvailable => f.write_str("StillImageAvailable"),
            DriverEvent::CaptureFailed(reason) => write!(f, "CaptureFailed({reason:?})"),
            DriverEvent::FrameAvailable => f.write_str("FrameAvailable"),
            DriverEvent::OrientationChanged(degrees) => {
                write!(f, "OrientationChanged({degrees})")
            }
        }
    }
}

/// Sending half handed to collaborators so they can report back to the session loop
#[derive(Clone, Debug)]
pub struct DriverCallbacks {
    sender: mpsc::UnboundedSender<DriverEvent>,
}

impl DriverCallbacks {
    pub fn new(sender: mpsc::UnboundedSender<DriverEvent>) -> Self {
        Self { sender }
    }

    pub fn notify(&self, event: DriverEvent) {
        if let Err(err) = self.sender.send(event) {
            debug!("Camera session is gone, dropping driver event {:?}", err.0);
        }
    }
}

/// Entry point into the platform camera stack
pub trait CameraDriver: Send {
    /// Platform API level, used to gate optional features
    fn api_level(&self) -> u32;

    fn capabilities(&self, camera_name: &str) -> DriverResult<DeviceCapabilities>;

    /// Start opening a device; the outcome arrives as `DeviceOpened` or `DeviceError`
    fn open_device(&mut self, camera_name: &str, callbacks: DriverCallbacks) -> DriverResult<()>;

    /// Create a receiver holding at most `max_images` buffers
    fn create_image_receiver(
        &mut self,
        kind: SurfaceKind,
        size: Size,
        format: PixelFormat,
        max_images: usize,
        callbacks: DriverCallbacks,
    ) -> DriverResult<Box<dyn ImageReceiver>>;

    /// Create and prepare a recorder
    fn create_recorder(&mut self, settings: &RecorderSettings)
    -> DriverResult<Box<dyn VideoRecorder>>;

    fn supports_high_speed_sessions(&self) -> bool {
        self.api_level() >= HIGH_SPEED_SESSION_MIN_API
    }

    fn supports_pause_resume(&self) -> bool {
        self.api_level() >= PAUSE_RESUME_MIN_API
    }
}

/// An open camera device
pub trait CameraDevice: Send {
    /// Start configuring a session; the outcome arrives as `SessionConfigured` or
    /// `SessionConfigureFailed` carrying `token`
    fn create_capture_session(
        &mut self,
        kind: SessionKind,
        surfaces: &[Surface],
        token: SessionToken,
        callbacks: DriverCallbacks,
    ) -> DriverResult<()>;

    fn close(&mut self);
}

/// A configured capture session
pub trait CaptureSession: Send {
    fn kind(&self) -> SessionKind;

    fn set_repeating_request(&mut self, request: &CaptureRequest) -> DriverResult<()>;

    /// Expand one request into the burst a high-speed session repeats
    fn create_high_speed_request_list(
        &mut self,
        request: &CaptureRequest,
    ) -> DriverResult<Vec<CaptureRequest>>;

    fn set_repeating_burst(&mut self, requests: &[CaptureRequest]) -> DriverResult<()>;

    /// Queue a single capture; failures arrive as `CaptureFailed`
    fn capture(&mut self, request: &CaptureRequest) -> DriverResult<()>;

    fn stop_repeating(&mut self) -> DriverResult<()>;

    fn close(&mut self);
}

/// A plane of a raw image, borrowed from the native buffer
#[derive(Debug, Clone, Copy)]
pub struct RawPlane<'a> {
    pub row_stride: u32,
    pub pixel_stride: u32,
    pub data: &'a [u8],
}

/// A native image buffer owned by a receiver's pool until closed
pub trait RawImage: Send {
    fn width(&self) -> u32;
    fn height(&self) -> u32;
    fn format(&self) -> PixelFormat;
    fn planes(&self) -> Vec<RawPlane<'_>>;

    /// Return the buffer to the receiver's pool
    fn close(&mut self);
}

/// Bounded pool of buffers a session writes images into
pub trait ImageReceiver: Send {
    /// Newest queued image, dropping any older ones; `None` when nothing is queued
    fn acquire_latest_image(&mut self) -> DriverResult<Option<Box<dyn RawImage>>>;

    fn close(&mut self);
}

/// The platform's video/audio encoder
pub trait VideoRecorder: Send {
    fn start(&mut self) -> DriverResult<()>;
    fn stop(&mut self) -> DriverResult<()>;
    fn pause(&mut self) -> DriverResult<()>;
    fn resume(&mut self) -> DriverResult<()>;
    fn reset(&mut self);
    fn release(&mut self);
}

/// Texture the preview is rendered into
pub trait RenderTarget: Send {
    fn id(&self) -> i64;
    fn set_default_buffer_size(&mut self, size: Size);
    fn release(&mut self);
}

/// Device-orientation observer
pub trait OrientationSensor: Send {
    fn enable(&mut self, callbacks: DriverCallbacks);
    fn disable(&mut self);
}
