//! In-process camera stack used by the CLI and the tests.
//!
//! Every driver object shares one state block, so a [`SimulatedCamera`] control
//! handle can inject platform callbacks (frames, disconnects, device errors,
//! rotations) and read back counters of what the session did with its resources.
//! Callbacks are delivered synchronously into the session's event channel, which
//! keeps their order deterministic.

use std::io::Cursor;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
use tracing::{debug, info};

use crate::camera_session::Collaborators;
use crate::capabilities::{
    DeviceCapabilities, EffectMode, FrameRateRange, HighSpeedVideoConfig, LensFacing,
    RecommendedSize, ResolutionPreset, Size,
};
use crate::driver::{
    CameraDevice, CameraDriver, CaptureFailureReason, CaptureRequest, CaptureSession,
    DeviceErrorCode, DriverCallbacks, DriverError, DriverEvent, DriverResult, ImageReceiver,
    OrientationSensor, PixelFormat, RawImage, RawPlane, RecorderSettings, RenderTarget,
    SessionKind, SessionToken, Surface, SurfaceKind, VideoRecorder,
};

/// Edge of the test pattern encoded into simulated stills
const STILL_PATTERN_SIZE: Size = Size::new(64, 48);

/// Capability table of a typical rear phone camera
pub fn default_capabilities() -> DeviceCapabilities {
    DeviceCapabilities {
        sensor_orientation: 90,
        lens_facing: LensFacing::Back,
        output_sizes: vec![
            Size::new(3840, 2160),
            Size::new(2560, 1440),
            Size::new(1920, 1080),
            Size::new(1440, 1080),
            Size::new(1280, 720),
            Size::new(640, 480),
            Size::new(320, 240),
        ],
        still_sizes: vec![
            Size::new(4032, 3024),
            Size::new(1920, 1080),
            Size::new(640, 480),
        ],
        high_speed_video: vec![
            HighSpeedVideoConfig {
                size: Size::new(1920, 1080),
                fps_ranges: vec![FrameRateRange::new(30, 120), FrameRateRange::new(120, 120)],
            },
            HighSpeedVideoConfig {
                size: Size::new(1280, 720),
                fps_ranges: vec![FrameRateRange::new(30, 240), FrameRateRange::new(240, 240)],
            },
        ],
        recommended_sizes: vec![
            RecommendedSize {
                preset: ResolutionPreset::Low,
                size: Size::new(320, 240),
            },
            RecommendedSize {
                preset: ResolutionPreset::Medium,
                size: Size::new(640, 480),
            },
            RecommendedSize {
                preset: ResolutionPreset::High,
                size: Size::new(1280, 720),
            },
            RecommendedSize {
                preset: ResolutionPreset::VeryHigh,
                size: Size::new(1920, 1080),
            },
            RecommendedSize {
                preset: ResolutionPreset::UltraHigh,
                size: Size::new(3840, 2160),
            },
        ],
        effects: vec![EffectMode::Off, EffectMode::Mono],
        active_array_size: Size::new(4032, 3024),
    }
}

/// Behaviour knobs for the simulated stack
#[derive(Debug, Clone)]
pub struct SimulatedOptions {
    pub api_level: u32,
    pub capabilities: DeviceCapabilities,
    /// Report this error instead of opening the device
    pub open_error: Option<DeviceErrorCode>,
    /// Report every session configuration as failed
    pub fail_session_configure: bool,
    /// Fail still captures with this reason
    pub capture_failure: Option<CaptureFailureReason>,
    /// Hold session configuration callbacks until the control handle releases them
    pub defer_sessions: bool,
    pub render_target_id: i64,
}

impl Default for SimulatedOptions {
    fn default() -> Self {
        Self {
            api_level: 30,
            capabilities: default_capabilities(),
            open_error: None,
            fail_session_configure: false,
            capture_failure: None,
            defer_sessions: false,
            render_target_id: 7,
        }
    }
}

/// What the session has done with the simulated resources so far
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SimulatedCounters {
    pub devices_opened: usize,
    pub devices_closed: usize,
    pub sessions_requested: usize,
    pub sessions_created: usize,
    pub sessions_closed: usize,
    pub receivers_created: usize,
    pub receivers_closed: usize,
    pub images_acquired: usize,
    pub images_closed: usize,
    pub captures: usize,
    pub recorders_created: usize,
    pub recorder_starts: usize,
    pub recorder_stops: usize,
    pub recorder_pauses: usize,
    pub recorder_resumes: usize,
    pub recorder_resets: usize,
    pub recorder_releases: usize,
    pub render_target_releases: usize,
    pub buffer_size: Option<Size>,
    pub sensor_enabled: bool,
    pub last_session_kind: Option<SessionKind>,
    pub last_surfaces: Vec<Surface>,
    /// Requests most recently set repeating; more than one for a high-speed burst
    pub last_repeating: Vec<CaptureRequest>,
    pub last_capture: Option<CaptureRequest>,
    pub last_recorder_settings: Option<RecorderSettings>,
}

impl SimulatedCounters {
    /// Sessions created and not yet closed
    pub fn live_sessions(&self) -> usize {
        self.sessions_created.saturating_sub(self.sessions_closed)
    }

    /// Images handed out and not yet returned to their pool
    pub fn outstanding_images(&self) -> usize {
        self.images_acquired.saturating_sub(self.images_closed)
    }
}

struct DeferredSession {
    token: SessionToken,
    kind: SessionKind,
    callbacks: DriverCallbacks,
}

struct ReceiverSlot {
    size: Size,
    callbacks: DriverCallbacks,
    queue: Vec<SimulatedImage>,
}

struct SimulatedState {
    options: SimulatedOptions,
    counters: SimulatedCounters,
    device_callbacks: Option<DriverCallbacks>,
    sensor_callbacks: Option<DriverCallbacks>,
    still: Option<ReceiverSlot>,
    stream: Option<ReceiverSlot>,
    deferred: Vec<DeferredSession>,
}

type Shared = Arc<Mutex<SimulatedState>>;

fn lock(shared: &Shared) -> MutexGuard<'_, SimulatedState> {
    shared.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Control handle for injecting platform callbacks and inspecting counters
#[derive(Clone)]
pub struct SimulatedCamera {
    shared: Shared,
}

/// Build a driver, render target and orientation sensor sharing one simulated stack
pub fn simulated_collaborators(options: SimulatedOptions) -> (Collaborators, SimulatedCamera) {
    let render_target_id = options.render_target_id;
    let shared = Arc::new(Mutex::new(SimulatedState {
        options,
        counters: SimulatedCounters::default(),
        device_callbacks: None,
        sensor_callbacks: None,
        still: None,
        stream: None,
        deferred: Vec::new(),
    }));

    let collaborators = Collaborators {
        driver: Box::new(SimulatedDriver {
            shared: shared.clone(),
        }),
        render_target: Box::new(SimulatedRenderTarget {
            id: render_target_id,
            shared: shared.clone(),
        }),
        orientation_sensor: Box::new(SimulatedOrientationSensor {
            shared: shared.clone(),
        }),
    };
    (collaborators, SimulatedCamera { shared })
}

impl SimulatedCamera {
    pub fn counters(&self) -> SimulatedCounters {
        lock(&self.shared).counters.clone()
    }

    pub fn update_options(&self, update: impl FnOnce(&mut SimulatedOptions)) {
        update(&mut lock(&self.shared).options);
    }

    /// Queue a YUV frame on the stream receiver and signal it
    pub fn emit_frame(&self) -> bool {
        let mut state = lock(&self.shared);
        let shared = self.shared.clone();
        let Some(slot) = state.stream.as_mut() else {
            return false;
        };
        slot.queue.push(SimulatedImage::yuv(slot.size, shared));
        let callbacks = slot.callbacks.clone();
        drop(state);
        callbacks.notify(DriverEvent::FrameAvailable);
        true
    }

    /// Signal a frame without queueing one
    pub fn emit_spurious_frame_notification(&self) -> bool {
        let state = lock(&self.shared);
        let Some(callbacks) = state.stream.as_ref().map(|slot| slot.callbacks.clone()) else {
            return false;
        };
        drop(state);
        callbacks.notify(DriverEvent::FrameAvailable);
        true
    }

    pub fn disconnect(&self) {
        self.notify_device(DriverEvent::DeviceDisconnected);
    }

    pub fn raise_device_error(&self, code: DeviceErrorCode) {
        self.notify_device(DriverEvent::DeviceError(code));
    }

    /// Report the device closed without the session asking for it
    pub fn close_device_externally(&self) {
        self.notify_device(DriverEvent::DeviceClosed);
    }

    pub fn rotate(&self, degrees: i32) {
        let callbacks = lock(&self.shared).sensor_callbacks.clone();
        if let Some(callbacks) = callbacks {
            callbacks.notify(DriverEvent::OrientationChanged(degrees));
        }
    }

    pub fn deferred_session_count(&self) -> usize {
        lock(&self.shared).deferred.len()
    }

    /// Deliver one held session callback, by position in request order
    pub fn complete_deferred_session(&self, index: usize) -> bool {
        let mut state = lock(&self.shared);
        if index >= state.deferred.len() {
            return false;
        }
        let deferred = state.deferred.remove(index);
        state.counters.sessions_created += 1;
        drop(state);
        deliver_session(&self.shared, deferred);
        true
    }

    /// Deliver every held session callback in request order
    pub fn complete_deferred_sessions(&self) {
        let deferred: Vec<_> = lock(&self.shared).deferred.drain(..).collect();
        for session in deferred {
            lock(&self.shared).counters.sessions_created += 1;
            deliver_session(&self.shared, session);
        }
    }

    fn notify_device(&self, event: DriverEvent) {
        let callbacks = lock(&self.shared).device_callbacks.clone();
        match callbacks {
            Some(callbacks) => callbacks.notify(event),
            None => debug!("No simulated device has been opened, dropping {event:?}"),
        }
    }
}

fn deliver_session(shared: &Shared, deferred: DeferredSession) {
    let session = SimulatedSession {
        kind: deferred.kind,
        callbacks: deferred.callbacks.clone(),
        shared: shared.clone(),
        closed: false,
    };
    deferred.callbacks.notify(DriverEvent::SessionConfigured {
        token: deferred.token,
        session: Box::new(session),
    });
}

pub struct SimulatedDriver {
    shared: Shared,
}

impl CameraDriver for SimulatedDriver {
    fn api_level(&self) -> u32 {
        lock(&self.shared).options.api_level
    }

    fn capabilities(&self, camera_name: &str) -> DriverResult<DeviceCapabilities> {
        debug!("Reading simulated capabilities for '{camera_name}'");
        Ok(lock(&self.shared).options.capabilities.clone())
    }

    fn open_device(&mut self, camera_name: &str, callbacks: DriverCallbacks) -> DriverResult<()> {
        let mut state = lock(&self.shared);
        state.device_callbacks = Some(callbacks.clone());
        if let Some(code) = state.options.open_error {
            drop(state);
            callbacks.notify(DriverEvent::DeviceError(code));
            return Ok(());
        }
        state.counters.devices_opened += 1;
        drop(state);

        info!("Simulated camera '{camera_name}' opened");
        callbacks.notify(DriverEvent::DeviceOpened(Box::new(SimulatedDevice {
            shared: self.shared.clone(),
            callbacks: callbacks.clone(),
            closed: false,
        })));
        Ok(())
    }

    fn create_image_receiver(
        &mut self,
        kind: SurfaceKind,
        size: Size,
        format: PixelFormat,
        _max_images: usize,
        callbacks: DriverCallbacks,
    ) -> DriverResult<Box<dyn ImageReceiver>> {
        let mut state = lock(&self.shared);
        let slot = Some(ReceiverSlot {
            size,
            callbacks,
            queue: Vec::new(),
        });
        match kind {
            SurfaceKind::StillCapture => state.still = slot,
            SurfaceKind::FrameStream => state.stream = slot,
            other => {
                return Err(DriverError::InvalidArgument(format!(
                    "{other:?} surfaces are not backed by an image receiver"
                )));
            }
        }
        state.counters.receivers_created += 1;
        debug!("Simulated {format:?} receiver for {kind:?} at {size}");
        Ok(Box::new(SimulatedReceiver {
            kind,
            shared: self.shared.clone(),
            closed: false,
        }))
    }

    fn create_recorder(
        &mut self,
        settings: &RecorderSettings,
    ) -> DriverResult<Box<dyn VideoRecorder>> {
        // Preparing a recorder opens its output file
        std::fs::File::create(&settings.output_path)?;
        let mut state = lock(&self.shared);
        state.counters.recorders_created += 1;
        state.counters.last_recorder_settings = Some(settings.clone());
        Ok(Box::new(SimulatedRecorder {
            output_path: settings.output_path.clone(),
            shared: self.shared.clone(),
            phase: RecorderPhase::Prepared,
        }))
    }
}

struct SimulatedDevice {
    shared: Shared,
    callbacks: DriverCallbacks,
    closed: bool,
}

impl CameraDevice for SimulatedDevice {
    fn create_capture_session(
        &mut self,
        kind: SessionKind,
        surfaces: &[Surface],
        token: SessionToken,
        callbacks: DriverCallbacks,
    ) -> DriverResult<()> {
        if self.closed {
            return Err(DriverError::IllegalState("device is closed".to_string()));
        }
        let mut state = lock(&self.shared);
        state.counters.sessions_requested += 1;
        state.counters.last_session_kind = Some(kind);
        state.counters.last_surfaces = surfaces.to_vec();

        if state.options.fail_session_configure {
            drop(state);
            callbacks.notify(DriverEvent::SessionConfigureFailed { token });
            return Ok(());
        }
        let deferred = DeferredSession {
            token,
            kind,
            callbacks,
        };
        if state.options.defer_sessions {
            state.deferred.push(deferred);
            return Ok(());
        }
        state.counters.sessions_created += 1;
        drop(state);
        deliver_session(&self.shared, deferred);
        Ok(())
    }

    fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        lock(&self.shared).counters.devices_closed += 1;
        self.callbacks.notify(DriverEvent::DeviceClosed);
    }
}

struct SimulatedSession {
    kind: SessionKind,
    callbacks: DriverCallbacks,
    shared: Shared,
    closed: bool,
}

impl SimulatedSession {
    fn check_open(&self) -> DriverResult<()> {
        if self.closed {
            return Err(DriverError::IllegalState("session is closed".to_string()));
        }
        Ok(())
    }
}

impl CaptureSession for SimulatedSession {
    fn kind(&self) -> SessionKind {
        self.kind
    }

    fn set_repeating_request(&mut self, request: &CaptureRequest) -> DriverResult<()> {
        self.check_open()?;
        lock(&self.shared).counters.last_repeating = vec![request.clone()];
        Ok(())
    }

    fn create_high_speed_request_list(
        &mut self,
        request: &CaptureRequest,
    ) -> DriverResult<Vec<CaptureRequest>> {
        self.check_open()?;
        if self.kind != SessionKind::HighSpeed {
            return Err(DriverError::IllegalState(
                "burst lists need a high-speed session".to_string(),
            ));
        }
        let upper = request.fps_range.map_or(30, |range| range.upper);
        let count = usize::try_from((upper / 30).max(1)).unwrap_or(1);
        Ok(vec![request.clone(); count])
    }

    fn set_repeating_burst(&mut self, requests: &[CaptureRequest]) -> DriverResult<()> {
        self.check_open()?;
        lock(&self.shared).counters.last_repeating = requests.to_vec();
        Ok(())
    }

    fn capture(&mut self, request: &CaptureRequest) -> DriverResult<()> {
        self.check_open()?;
        let mut state = lock(&self.shared);
        state.counters.captures += 1;
        state.counters.last_capture = Some(request.clone());

        if let Some(reason) = state.options.capture_failure {
            drop(state);
            self.callbacks.notify(DriverEvent::CaptureFailed(reason));
            return Ok(());
        }

        let shared = self.shared.clone();
        let Some(slot) = state.still.as_mut() else {
            return Err(DriverError::IllegalState(
                "no still capture receiver".to_string(),
            ));
        };
        slot.queue.push(SimulatedImage::jpeg(encode_test_pattern()?, shared));
        let callbacks = slot.callbacks.clone();
        drop(state);
        callbacks.notify(DriverEvent::StillImageAvailable);
        Ok(())
    }

    fn stop_repeating(&mut self) -> DriverResult<()> {
        self.check_open()?;
        lock(&self.shared).counters.last_repeating.clear();
        Ok(())
    }

    fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        lock(&self.shared).counters.sessions_closed += 1;
    }
}

fn encode_test_pattern() -> DriverResult<Vec<u8>> {
    let Size { width, height } = STILL_PATTERN_SIZE;
    let pattern = RgbImage::from_fn(width, height, |x, y| {
        let r = u8::try_from(x * 255 / width).unwrap_or(u8::MAX);
        let g = u8::try_from(y * 255 / height).unwrap_or(u8::MAX);
        Rgb([r, g, 128])
    });

    let mut jpeg_data = Vec::new();
    let mut cursor = Cursor::new(&mut jpeg_data);
    DynamicImage::ImageRgb8(pattern)
        .write_to(&mut cursor, ImageFormat::Jpeg)
        .map_err(|e| DriverError::Access(format!("Failed to encode JPEG: {e}")))?;
    Ok(jpeg_data)
}

struct SimulatedImage {
    size: Size,
    format: PixelFormat,
    planes: Vec<(u32, u32, Vec<u8>)>,
    shared: Shared,
    closed: bool,
}

impl SimulatedImage {
    fn jpeg(bytes: Vec<u8>, shared: Shared) -> Self {
        let len = u32::try_from(bytes.len()).unwrap_or(u32::MAX);
        Self {
            size: STILL_PATTERN_SIZE,
            format: PixelFormat::Jpeg,
            planes: vec![(len, 0, bytes)],
            shared,
            closed: false,
        }
    }

    /// Mid-grey luma with neutral chroma planes at quarter resolution
    fn yuv(size: Size, shared: Shared) -> Self {
        let luma = (size.width as usize) * (size.height as usize);
        let chroma_width = size.width.div_ceil(2);
        let chroma = (chroma_width as usize) * (size.height.div_ceil(2) as usize);
        Self {
            size,
            format: PixelFormat::Yuv420,
            planes: vec![
                (size.width, 1, vec![128; luma]),
                (chroma_width, 1, vec![128; chroma]),
                (chroma_width, 1, vec![128; chroma]),
            ],
            shared,
            closed: false,
        }
    }
}

impl RawImage for SimulatedImage {
    fn width(&self) -> u32 {
        self.size.width
    }

    fn height(&self) -> u32 {
        self.size.height
    }

    fn format(&self) -> PixelFormat {
        self.format
    }

    fn planes(&self) -> Vec<RawPlane<'_>> {
        self.planes
            .iter()
            .map(|(row_stride, pixel_stride, data)| RawPlane {
                row_stride: *row_stride,
                pixel_stride: *pixel_stride,
                data,
            })
            .collect()
    }

    fn close(&mut self) {
        if !self.closed {
            self.closed = true;
            lock(&self.shared).counters.images_closed += 1;
        }
    }
}

struct SimulatedReceiver {
    kind: SurfaceKind,
    shared: Shared,
    closed: bool,
}

impl ImageReceiver for SimulatedReceiver {
    fn acquire_latest_image(&mut self) -> DriverResult<Option<Box<dyn RawImage>>> {
        if self.closed {
            return Err(DriverError::IllegalState("receiver is closed".to_string()));
        }
        let mut state = lock(&self.shared);
        let slot = match self.kind {
            SurfaceKind::StillCapture => state.still.as_mut(),
            _ => state.stream.as_mut(),
        };
        let Some(slot) = slot else {
            return Ok(None);
        };
        let latest = slot.queue.pop();
        let dropped = slot.queue.len();
        slot.queue.clear();
        // Older images skipped here go straight back to the pool
        state.counters.images_acquired += dropped;
        state.counters.images_closed += dropped;
        if latest.is_some() {
            state.counters.images_acquired += 1;
        }
        Ok(latest.map(|image| Box::new(image) as Box<dyn RawImage>))
    }

    fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        lock(&self.shared).counters.receivers_closed += 1;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RecorderPhase {
    Prepared,
    Recording,
    Paused,
    Stopped,
    Released,
}

struct SimulatedRecorder {
    output_path: PathBuf,
    shared: Shared,
    phase: RecorderPhase,
}

impl SimulatedRecorder {
    fn illegal(&self, action: &str) -> DriverError {
        DriverError::IllegalState(format!(
            "cannot {action} recorder for {:?} while {:?}",
            self.output_path, self.phase
        ))
    }
}

impl VideoRecorder for SimulatedRecorder {
    fn start(&mut self) -> DriverResult<()> {
        if self.phase != RecorderPhase::Prepared {
            return Err(self.illegal("start"));
        }
        self.phase = RecorderPhase::Recording;
        lock(&self.shared).counters.recorder_starts += 1;
        Ok(())
    }

    fn stop(&mut self) -> DriverResult<()> {
        if !matches!(self.phase, RecorderPhase::Recording | RecorderPhase::Paused) {
            return Err(self.illegal("stop"));
        }
        self.phase = RecorderPhase::Stopped;
        lock(&self.shared).counters.recorder_stops += 1;
        Ok(())
    }

    fn pause(&mut self) -> DriverResult<()> {
        if self.phase != RecorderPhase::Recording {
            return Err(self.illegal("pause"));
        }
        self.phase = RecorderPhase::Paused;
        lock(&self.shared).counters.recorder_pauses += 1;
        Ok(())
    }

    fn resume(&mut self) -> DriverResult<()> {
        if self.phase != RecorderPhase::Paused {
            return Err(self.illegal("resume"));
        }
        self.phase = RecorderPhase::Recording;
        lock(&self.shared).counters.recorder_resumes += 1;
        Ok(())
    }

    fn reset(&mut self) {
        if self.phase != RecorderPhase::Released {
            self.phase = RecorderPhase::Stopped;
        }
        lock(&self.shared).counters.recorder_resets += 1;
    }

    fn release(&mut self) {
        self.phase = RecorderPhase::Released;
        lock(&self.shared).counters.recorder_releases += 1;
    }
}

struct SimulatedRenderTarget {
    id: i64,
    shared: Shared,
}

impl RenderTarget for SimulatedRenderTarget {
    fn id(&self) -> i64 {
        self.id
    }

    fn set_default_buffer_size(&mut self, size: Size) {
        lock(&self.shared).counters.buffer_size = Some(size);
    }

    fn release(&mut self) {
        lock(&self.shared).counters.render_target_releases += 1;
    }
}

struct SimulatedOrientationSensor {
    shared: Shared,
}

impl OrientationSensor for SimulatedOrientationSensor {
    fn enable(&mut self, callbacks: DriverCallbacks) {
        let mut state = lock(&self.shared);
        state.sensor_callbacks = Some(callbacks);
        state.counters.sensor_enabled = true;
    }

    fn disable(&mut self) {
        let mut state = lock(&self.shared);
        state.sensor_callbacks = None;
        state.counters.sensor_enabled = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    #[test]
    fn test_default_capabilities_negotiate() {
        let caps = default_capabilities();
        let config = crate::negotiator::negotiate(ResolutionPreset::High, false, &caps)
            .expect("negotiation failed");
        assert_eq!(config.video_size, Size::new(1920, 1080));
        assert_eq!(config.still_capture_size, Size::new(1280, 720));
    }

    #[test]
    fn test_test_pattern_is_jpeg() {
        let bytes = encode_test_pattern().expect("encode failed");
        assert_eq!(&bytes[..2], &[0xFF, 0xD8]);
    }

    #[test]
    fn test_receiver_drops_older_images() {
        let (collaborators, camera) = simulated_collaborators(SimulatedOptions::default());
        let mut driver = collaborators.driver;
        let (sender, mut events) = mpsc::unbounded_channel();
        let mut receiver = driver
            .create_image_receiver(
                SurfaceKind::FrameStream,
                Size::new(4, 2),
                PixelFormat::Yuv420,
                2,
                DriverCallbacks::new(sender),
            )
            .expect("receiver failed");

        assert!(camera.emit_frame());
        assert!(camera.emit_frame());
        assert!(matches!(events.try_recv(), Ok(DriverEvent::FrameAvailable)));

        let mut image = receiver
            .acquire_latest_image()
            .expect("acquire failed")
            .expect("image expected");
        assert_eq!(image.planes().len(), 3);
        image.close();
        image.close();

        let counters = camera.counters();
        assert_eq!(counters.images_acquired, 2);
        assert_eq!(counters.images_closed, 2);
        assert_eq!(counters.outstanding_images(), 0);
    }

    #[test]
    fn test_recorder_lifecycle() {
        let dir = tempfile::tempdir().expect("tempdir failed");
        let (collaborators, camera) = simulated_collaborators(SimulatedOptions::default());
        let mut driver = collaborators.driver;
        let settings = RecorderSettings {
            output_path: dir.path().join("clip.mp4"),
            container: crate::driver::OutputContainer::Mpeg4,
            video_encoder: crate::driver::VideoEncoder::H264,
            video_bit_rate: 1,
            video_frame_rate: 30,
            video_size: Size::new(1280, 720),
            audio: None,
            orientation_hint: 0,
        };
        let mut recorder = driver.create_recorder(&settings).expect("prepare failed");
        assert!(settings.output_path.exists());

        assert!(recorder.pause().is_err());
        recorder.start().expect("start failed");
        recorder.pause().expect("pause failed");
        recorder.resume().expect("resume failed");
        recorder.stop().expect("stop failed");
        recorder.reset();
        recorder.release();

        let counters = camera.counters();
        assert_eq!(counters.recorder_starts, 1);
        assert_eq!(counters.recorder_pauses, 1);
        assert_eq!(counters.recorder_resumes, 1);
        assert_eq!(counters.recorder_releases, 1);
    }
}
