//! Capture session state machine.
//!
//! A [`CameraSession`] owns the device, the capture session, both image receivers and
//! the recorder of one camera. It runs as a single task: caller requests arrive through
//! a [`CameraHandle`] and driver callbacks arrive as [`DriverEvent`]s, and both are
//! handled one at a time on that task, so no state is shared across threads.
//!
//! Every transition that needs a different set of surfaces tears the current capture
//! session down and builds a new one. Session configuration is asynchronous; each
//! attempt carries a [`SessionToken`] and a callback for anything but the latest
//! token is treated as stale and its session closed.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, warn};

use crate::capabilities::{DeviceCapabilities, EffectMode, FrameRateRange};
use crate::config::{
    AUDIO_SAMPLE_RATE, RECEIVER_POOL_DEPTH, Settings, VIDEO_BIT_RATE, VIDEO_FRAME_RATE,
};
use crate::driver::{
    AudioSettings, AutoFocusMode, AutoFocusTrigger, CameraDevice, CameraDriver, CaptureRequest,
    CaptureSession, ControlMode, DriverCallbacks, DriverEvent, FlashMode, ImageReceiver,
    OrientationSensor, OutputContainer, PixelFormat, RecorderSettings, RenderTarget,
    RequestTemplate, SessionKind, SessionToken, Surface, SurfaceKind, VideoEncoder,
    VideoRecorder,
};
use crate::events::{CameraEvent, EventSink};
use crate::focus::{FocusPoint, FocusState, OrientationTracker, metering_region};
use crate::frame::{Frame, marshal_latest, take_first_plane};
use crate::negotiator::{SessionConfig, negotiate};
use crate::{CameraError, CameraResult};

/// Lifecycle phase of the camera component
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionPhase {
    Closed,
    Idle,
    Previewing,
    Recording,
    RecordingPaused,
}

impl SessionPhase {
    pub fn is_recording(&self) -> bool {
        matches!(self, SessionPhase::Recording | SessionPhase::RecordingPaused)
    }
}

/// Reply to a successful `open`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OpenReply {
    pub render_target_id: i64,
    pub preview_width: u32,
    pub preview_height: u32,
}

/// Snapshot of the component's state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionStatus {
    pub phase: SessionPhase,
    pub config: SessionConfig,
    pub focus: FocusState,
    pub flash_enabled: bool,
    pub frame_stream_attached: bool,
    pub event_subscriber_attached: bool,
    pub opened_at: Option<DateTime<Utc>>,
    pub disposed: bool,
}

/// Camera control commands
#[derive(Debug)]
pub enum CameraRequest {
    /// Open the device and start previewing
    Open {
        respond_to: oneshot::Sender<CameraResult<OpenReply>>,
    },
    StartPreview {
        respond_to: oneshot::Sender<CameraResult<()>>,
    },
    /// Preview while streaming frames to `sink`
    StartPreviewWithFrameStream {
        sink: mpsc::UnboundedSender<Frame>,
        respond_to: oneshot::Sender<CameraResult<()>>,
    },
    StopFrameStream,
    TakePicture {
        path: PathBuf,
        respond_to: oneshot::Sender<CameraResult<()>>,
    },
    StartVideoRecording {
        path: PathBuf,
        respond_to: oneshot::Sender<CameraResult<()>>,
    },
    StopVideoRecording {
        respond_to: oneshot::Sender<CameraResult<()>>,
    },
    PauseVideoRecording {
        respond_to: oneshot::Sender<CameraResult<()>>,
    },
    ResumeVideoRecording {
        respond_to: oneshot::Sender<CameraResult<()>>,
    },
    LockFocus {
        point: FocusPoint,
    },
    UnlockFocus,
    SetFlashMode {
        enabled: bool,
    },
    SubscribeEvents {
        subscriber: mpsc::UnboundedSender<CameraEvent>,
    },
    UnsubscribeEvents,
    GetStatus {
        respond_to: oneshot::Sender<CameraResult<SessionStatus>>,
    },
    Close {
        respond_to: oneshot::Sender<CameraResult<()>>,
    },
    /// Close and release the render target and orientation sensor; stops the loop
    Dispose {
        respond_to: oneshot::Sender<CameraResult<()>>,
    },
}

/// Platform pieces a camera component is built from
pub struct Collaborators {
    pub driver: Box<dyn CameraDriver>,
    pub render_target: Box<dyn RenderTarget>,
    pub orientation_sensor: Box<dyn OrientationSensor>,
}

/// Why a session is being configured
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SessionPurpose {
    Preview,
    FrameStream,
    Recording,
}

struct PendingSession {
    token: SessionToken,
    purpose: SessionPurpose,
    respond_to: Option<oneshot::Sender<CameraResult<()>>>,
}

struct PendingCapture {
    path: PathBuf,
    respond_to: oneshot::Sender<CameraResult<()>>,
}

/// Handle for communicating with a [`CameraSession`]
#[derive(Clone, Debug)]
pub struct CameraHandle {
    request_sender: mpsc::UnboundedSender<CameraRequest>,
}

impl CameraHandle {
    fn send(&self, request: CameraRequest) -> CameraResult<()> {
        self.request_sender
            .send(request)
            .map_err(|_| CameraError::Channel("Camera session channel closed".to_string()))
    }

    async fn call<T>(
        &self,
        make_request: impl FnOnce(oneshot::Sender<CameraResult<T>>) -> CameraRequest,
    ) -> CameraResult<T> {
        let (sender, receiver) = oneshot::channel();
        self.send(make_request(sender))?;
        receiver
            .await
            .map_err(|_| CameraError::Channel("Camera session response failed".to_string()))?
    }

    /// Open the device; resolves once the device is open and preview was requested
    pub async fn open(&self) -> CameraResult<OpenReply> {
        self.call(|respond_to| CameraRequest::Open { respond_to })
            .await
    }

    pub async fn start_preview(&self) -> CameraResult<()> {
        self.call(|respond_to| CameraRequest::StartPreview { respond_to })
            .await
    }

    /// Restart preview with a frame stream attached and return the stream
    pub async fn start_preview_with_frame_stream(
        &self,
    ) -> CameraResult<mpsc::UnboundedReceiver<Frame>> {
        let (sink, frames) = mpsc::unbounded_channel();
        self.call(|respond_to| CameraRequest::StartPreviewWithFrameStream { sink, respond_to })
            .await?;
        Ok(frames)
    }

    pub fn stop_frame_stream(&self) -> CameraResult<()> {
        self.send(CameraRequest::StopFrameStream)
    }

    /// Capture a JPEG still to `path`, which must not exist yet
    pub async fn take_picture(&self, path: impl Into<PathBuf>) -> CameraResult<()> {
        let path = path.into();
        self.call(|respond_to| CameraRequest::TakePicture { path, respond_to })
            .await
    }

    pub async fn start_video_recording(&self, path: impl Into<PathBuf>) -> CameraResult<()> {
        let path = path.into();
        self.call(|respond_to| CameraRequest::StartVideoRecording { path, respond_to })
            .await
    }

    pub async fn stop_video_recording(&self) -> CameraResult<()> {
        self.call(|respond_to| CameraRequest::StopVideoRecording { respond_to })
            .await
    }

    pub async fn pause_video_recording(&self) -> CameraResult<()> {
        self.call(|respond_to| CameraRequest::PauseVideoRecording { respond_to })
            .await
    }

    pub async fn resume_video_recording(&self) -> CameraResult<()> {
        self.call(|respond_to| CameraRequest::ResumeVideoRecording { respond_to })
            .await
    }

    pub fn lock_focus(&self, point: FocusPoint) -> CameraResult<()> {
        self.send(CameraRequest::LockFocus { point })
    }

    pub fn unlock_focus(&self) -> CameraResult<()> {
        self.send(CameraRequest::UnlockFocus)
    }

    pub fn set_flash_mode(&self, enabled: bool) -> CameraResult<()> {
        self.send(CameraRequest::SetFlashMode { enabled })
    }

    /// Subscribe to camera events, replacing any previous subscriber
    pub fn subscribe_events(&self) -> CameraResult<mpsc::UnboundedReceiver<CameraEvent>> {
        let (subscriber, events) = mpsc::unbounded_channel();
        self.send(CameraRequest::SubscribeEvents { subscriber })?;
        Ok(events)
    }

    pub fn unsubscribe_events(&self) -> CameraResult<()> {
        self.send(CameraRequest::UnsubscribeEvents)
    }

    pub async fn status(&self) -> CameraResult<SessionStatus> {
        self.call(|respond_to| CameraRequest::GetStatus { respond_to })
            .await
    }

    pub async fn close(&self) -> CameraResult<()> {
        self.call(|respond_to| CameraRequest::Close { respond_to })
            .await
    }

    pub async fn dispose(&self) -> CameraResult<()> {
        self.call(|respond_to| CameraRequest::Dispose { respond_to })
            .await
    }
}

/// Camera component state machine
pub struct CameraSession {
    settings: Settings,
    capabilities: DeviceCapabilities,
    config: SessionConfig,

    driver: Box<dyn CameraDriver>,
    render_target: Option<Box<dyn RenderTarget>>,
    orientation_sensor: Option<Box<dyn OrientationSensor>>,
    callbacks: DriverCallbacks,
    driver_events: mpsc::UnboundedReceiver<DriverEvent>,
    request_receiver: mpsc::UnboundedReceiver<CameraRequest>,

    phase: SessionPhase,
    device: Option<Box<dyn CameraDevice>>,
    session: Option<Box<dyn CaptureSession>>,
    picture_receiver: Option<Box<dyn ImageReceiver>>,
    stream_receiver: Option<Box<dyn ImageReceiver>>,
    recorder: Option<Box<dyn VideoRecorder>>,
    /// Repeating request for the current session
    request: Option<CaptureRequest>,

    next_token: u64,
    pending_session: Option<PendingSession>,
    pending_open: Option<oneshot::Sender<CameraResult<OpenReply>>>,
    pending_capture: Option<PendingCapture>,

    frame_sink: Option<mpsc::UnboundedSender<Frame>>,
    events: EventSink,
    focus: FocusState,
    flash_enabled: bool,
    orientation: OrientationTracker,
    closing_reported: bool,
    opened_at: Option<DateTime<Utc>>,
    disposed: bool,
}

impl CameraSession {
    /// Read the device's capabilities, negotiate sizes and enable the orientation sensor
    pub fn new(
        settings: Settings,
        collaborators: Collaborators,
    ) -> CameraResult<(CameraSession, CameraHandle)> {
        let Collaborators {
            driver,
            render_target,
            mut orientation_sensor,
        } = collaborators;

        let capabilities = driver.capabilities(&settings.camera_name)?;
        let config = negotiate(
            settings.resolution_preset,
            settings.slow_motion,
            &capabilities,
        )?;
        info!(
            "Camera '{}' negotiated preview {} video {} still {}",
            settings.camera_name, config.preview_size, config.video_size, config.still_capture_size
        );

        let (request_sender, request_receiver) = mpsc::unbounded_channel();
        let (event_sender, driver_events) = mpsc::unbounded_channel();
        let callbacks = DriverCallbacks::new(event_sender);
        orientation_sensor.enable(callbacks.clone());

        let session = CameraSession {
            settings,
            capabilities,
            config,
            driver,
            render_target: Some(render_target),
            orientation_sensor: Some(orientation_sensor),
            callbacks,
            driver_events,
            request_receiver,
            phase: SessionPhase::Closed,
            device: None,
            session: None,
            picture_receiver: None,
            stream_receiver: None,
            recorder: None,
            request: None,
            next_token: 0,
            pending_session: None,
            pending_open: None,
            pending_capture: None,
            frame_sink: None,
            events: EventSink::new(),
            focus: FocusState::default(),
            flash_enabled: false,
            orientation: OrientationTracker::default(),
            closing_reported: false,
            opened_at: None,
            disposed: false,
        };

        Ok((session, CameraHandle { request_sender }))
    }

    /// Run the camera session event loop until disposed or every handle is dropped
    pub async fn run(mut self) -> CameraResult<()> {
        info!("Starting camera session for '{}'", self.settings.camera_name);

        loop {
            tokio::select! {
                biased;
                Some(event) = self.driver_events.recv() => {
                    self.handle_driver_event(event).await;
                }
                request = self.request_receiver.recv() => {
                    let Some(request) = request else {
                        debug!("All camera handles dropped");
                        break;
                    };
                    self.handle_request(request).await;
                    if self.disposed {
                        break;
                    }
                }
            }
        }

        self.dispose_internal();
        // Deliver whatever teardown produced, such as the device-closed notification
        while let Ok(event) = self.driver_events.try_recv() {
            self.handle_driver_event(event).await;
        }

        info!("Camera session for '{}' stopped", self.settings.camera_name);
        Ok(())
    }

    async fn handle_request(&mut self, request: CameraRequest) {
        match request {
            CameraRequest::Open { respond_to } => self.open_internal(respond_to),
            CameraRequest::StartPreview { respond_to } => {
                let result = self.start_preview_internal();
                reply(respond_to, result, "start preview");
            }
            CameraRequest::StartPreviewWithFrameStream { sink, respond_to } => {
                let result = self.start_frame_stream_internal(sink);
                reply(respond_to, result, "start frame stream");
            }
            CameraRequest::StopFrameStream => {
                debug!("Frame stream subscriber removed");
                self.frame_sink = None;
            }
            CameraRequest::TakePicture { path, respond_to } => {
                if let Err(e) = self.take_picture_internal(&path) {
                    reply(respond_to, Err(e), "take picture");
                } else {
                    self.pending_capture = Some(PendingCapture { path, respond_to });
                }
            }
            CameraRequest::StartVideoRecording { path, respond_to } => {
                match self.start_video_recording_internal(&path) {
                    Ok(token) => {
                        self.pending_session = Some(PendingSession {
                            token,
                            purpose: SessionPurpose::Recording,
                            respond_to: Some(respond_to),
                        });
                    }
                    Err(e) => reply(respond_to, Err(e), "start video recording"),
                }
            }
            CameraRequest::StopVideoRecording { respond_to } => {
                let result = self.stop_video_recording_internal();
                reply(respond_to, result, "stop video recording");
            }
            CameraRequest::PauseVideoRecording { respond_to } => {
                let result = self.pause_video_recording_internal();
                reply(respond_to, result, "pause video recording");
            }
            CameraRequest::ResumeVideoRecording { respond_to } => {
                let result = self.resume_video_recording_internal();
                reply(respond_to, result, "resume video recording");
            }
            CameraRequest::LockFocus { point } => self.lock_focus_internal(point),
            CameraRequest::UnlockFocus => self.unlock_focus_internal(),
            CameraRequest::SetFlashMode { enabled } => {
                debug!("Flash mode set to {}", if enabled { "torch" } else { "off" });
                self.flash_enabled = enabled;
            }
            CameraRequest::SubscribeEvents { subscriber } => self.events.subscribe(subscriber),
            CameraRequest::UnsubscribeEvents => self.events.unsubscribe(),
            CameraRequest::GetStatus { respond_to } => {
                let status = self.status_internal();
                reply(respond_to, Ok(status), "status");
            }
            CameraRequest::Close { respond_to } => {
                self.close_internal();
                reply(respond_to, Ok(()), "close");
            }
            CameraRequest::Dispose { respond_to } => {
                self.dispose_internal();
                reply(respond_to, Ok(()), "dispose");
            }
        }
    }

    async fn handle_driver_event(&mut self, event: DriverEvent) {
        debug!("Driver event: {event:?}");
        match event {
            DriverEvent::DeviceOpened(device) => self.on_device_opened(device),
            DriverEvent::DeviceClosed => {
                if !self.closing_reported {
                    self.closing_reported = true;
                    self.events.send(CameraEvent::CameraClosing);
                }
            }
            DriverEvent::DeviceDisconnected => {
                warn!("Camera '{}' was disconnected", self.settings.camera_name);
                self.fail_device(CameraError::CameraAccess(
                    "The camera was disconnected.".to_string(),
                ));
            }
            DriverEvent::DeviceError(code) => {
                error!("Camera '{}' reported: {code}", self.settings.camera_name);
                self.fail_device(CameraError::DeviceUnavailable(code));
            }
            DriverEvent::SessionConfigured { token, session } => {
                self.on_session_configured(token, session);
            }
            DriverEvent::SessionConfigureFailed { token } => self.on_session_failed(token),
            DriverEvent::StillImageAvailable => self.on_still_image_available().await,
            DriverEvent::CaptureFailed(reason) => match self.pending_capture.take() {
                Some(pending) => {
                    reply(pending.respond_to, Err(CameraError::CaptureFailed(reason)), "capture");
                }
                None => self.events.send(CameraEvent::error(reason.to_string())),
            },
            DriverEvent::FrameAvailable => self.on_frame_available(),
            DriverEvent::OrientationChanged(degrees) => self.orientation.update(degrees),
        }
    }

    fn open_internal(&mut self, respond_to: oneshot::Sender<CameraResult<OpenReply>>) {
        if self.disposed {
            reply(respond_to, Err(CameraError::Disposed), "open");
            return;
        }
        if self.phase != SessionPhase::Closed || self.pending_open.is_some() {
            info!("Re-opening camera '{}'", self.settings.camera_name);
            self.close_internal();
        }

        match self.request_device_open() {
            Ok(()) => self.pending_open = Some(respond_to),
            Err(e) => {
                warn!("Failed to open camera '{}': {e}", self.settings.camera_name);
                self.close_receivers();
                reply(respond_to, Err(e), "open");
            }
        }
    }

    fn request_device_open(&mut self) -> CameraResult<()> {
        let picture_receiver = self.driver.create_image_receiver(
            SurfaceKind::StillCapture,
            self.config.still_capture_size,
            PixelFormat::Jpeg,
            RECEIVER_POOL_DEPTH,
            self.callbacks.clone(),
        )?;
        replace_receiver(&mut self.picture_receiver, picture_receiver);

        let stream_receiver = self.driver.create_image_receiver(
            SurfaceKind::FrameStream,
            self.config.preview_size,
            PixelFormat::Yuv420,
            RECEIVER_POOL_DEPTH,
            self.callbacks.clone(),
        )?;
        replace_receiver(&mut self.stream_receiver, stream_receiver);

        self.driver
            .open_device(&self.settings.camera_name, self.callbacks.clone())?;
        Ok(())
    }

    fn on_device_opened(&mut self, mut device: Box<dyn CameraDevice>) {
        let Some(respond_to) = self.pending_open.take() else {
            warn!("Device opened with no open request outstanding, closing it");
            device.close();
            return;
        };

        info!("Camera '{}' opened", self.settings.camera_name);
        if let Some(mut previous) = self.device.replace(device) {
            previous.close();
        }
        self.phase = SessionPhase::Idle;
        self.closing_reported = false;
        self.opened_at = Some(Utc::now());

        match self.start_preview_internal() {
            Ok(()) => {
                let open_reply = OpenReply {
                    render_target_id: self.render_target.as_ref().map_or(-1, |rt| rt.id()),
                    preview_width: self.config.preview_size.width,
                    preview_height: self.config.preview_size.height,
                };
                reply(respond_to, Ok(open_reply), "open");
            }
            Err(e) => {
                self.close_internal();
                reply(respond_to, Err(e), "open");
            }
        }
    }

    /// Tear everything down after the device died, reporting to a waiting `open` if
    /// there is one and to the event sink otherwise
    fn fail_device(&mut self, err: CameraError) {
        let pending_open = self.pending_open.take();
        self.close_internal();
        match pending_open {
            Some(respond_to) => reply(respond_to, Err(err), "open"),
            None => {
                let description = match &err {
                    CameraError::DeviceUnavailable(code) => code.description().to_string(),
                    CameraError::CameraAccess(message) => message.clone(),
                    other => other.to_string(),
                };
                self.events.send(CameraEvent::error(description));
            }
        }
    }

    fn start_preview_internal(&mut self) -> CameraResult<()> {
        self.finish_superseded_recording();
        let mut request =
            CaptureRequest::new(RequestTemplate::Preview).with_target(SurfaceKind::Preview);
        request.mono_effect = self.supports_mono_effect();
        let surfaces = [
            Surface {
                kind: SurfaceKind::Preview,
                size: self.config.preview_size,
            },
            Surface {
                kind: SurfaceKind::StillCapture,
                size: self.config.still_capture_size,
            },
        ];
        let token = self.configure_session(SessionKind::Normal, &surfaces, request)?;
        self.pending_session = Some(PendingSession {
            token,
            purpose: SessionPurpose::Preview,
            respond_to: None,
        });
        Ok(())
    }

    fn start_frame_stream_internal(
        &mut self,
        sink: mpsc::UnboundedSender<Frame>,
    ) -> CameraResult<()> {
        self.finish_superseded_recording();
        let request = CaptureRequest::new(RequestTemplate::StillCapture)
            .with_target(SurfaceKind::Preview)
            .with_target(SurfaceKind::FrameStream);
        let surfaces = [
            Surface {
                kind: SurfaceKind::Preview,
                size: self.config.preview_size,
            },
            Surface {
                kind: SurfaceKind::FrameStream,
                size: self.config.preview_size,
            },
        ];
        let token = self.configure_session(SessionKind::Normal, &surfaces, request)?;
        self.pending_session = Some(PendingSession {
            token,
            purpose: SessionPurpose::FrameStream,
            respond_to: None,
        });
        self.frame_sink = Some(sink);
        Ok(())
    }

    /// Tear down the current session and ask the device for a new one
    fn configure_session(
        &mut self,
        kind: SessionKind,
        surfaces: &[Surface],
        request: CaptureRequest,
    ) -> CameraResult<SessionToken> {
        if self.device.is_none() {
            return Err(CameraError::CameraAccess("Camera is not open".to_string()));
        }
        self.supersede_pending_session();
        self.close_capture_session();
        self.phase = SessionPhase::Idle;

        if let Some(render_target) = self.render_target.as_mut() {
            render_target.set_default_buffer_size(self.config.preview_size);
        }

        self.next_token += 1;
        let token = SessionToken(self.next_token);
        self.request = Some(request);

        let Some(device) = self.device.as_mut() else {
            return Err(CameraError::CameraAccess("Camera is not open".to_string()));
        };
        device.create_capture_session(kind, surfaces, token, self.callbacks.clone())?;
        debug!("Requested {kind:?} session {} with {} surfaces", token.0, surfaces.len());
        Ok(token)
    }

    fn supersede_pending_session(&mut self) {
        if let Some(pending) = self.pending_session.take() {
            debug!("Session {} superseded before configuration", pending.token.0);
            if let Some(respond_to) = pending.respond_to {
                reply(
                    respond_to,
                    Err(CameraError::SessionConfigFailed(
                        "Superseded by a newer session".to_string(),
                    )),
                    "session",
                );
            }
        }
    }

    fn on_session_configured(&mut self, token: SessionToken, mut session: Box<dyn CaptureSession>) {
        let pending = match self.pending_session.take() {
            Some(pending) if pending.token == token => pending,
            other => {
                debug!("Closing stale session {}", token.0);
                self.pending_session = other;
                session.close();
                return;
            }
        };

        if self.device.is_none() {
            session.close();
            self.report_session_failure(pending, "The camera was closed during configuration.");
            return;
        }

        if let Some(mut previous) = self.session.replace(session) {
            previous.close();
        }

        match pending.purpose {
            SessionPurpose::Preview | SessionPurpose::FrameStream => {
                if let Some(request) = self.request.as_mut() {
                    request.control_mode = ControlMode::Auto;
                }
                self.phase = SessionPhase::Idle;
                match self.update_preview() {
                    Ok(()) => self.phase = SessionPhase::Previewing,
                    Err(e) => self.events.send(CameraEvent::error(e.to_string())),
                }
            }
            SessionPurpose::Recording => {
                let result = self.begin_recording();
                if let Some(respond_to) = pending.respond_to {
                    reply(respond_to, result, "start video recording");
                }
            }
        }
    }

    fn begin_recording(&mut self) -> CameraResult<()> {
        if self.focus.locked {
            let point = self.focus.point.unwrap_or_default();
            self.apply_focus_lock(point);
        }
        self.update_preview()
            .map_err(|e| CameraError::VideoRecordingFailed(e.to_string()))?;
        let recorder = self.recorder.as_mut().ok_or_else(|| {
            CameraError::VideoRecordingFailed("Recorder is not prepared".to_string())
        })?;
        recorder
            .start()
            .map_err(|e| CameraError::VideoRecordingFailed(e.to_string()))?;
        self.phase = SessionPhase::Recording;
        info!("Video recording started");
        Ok(())
    }

    fn on_session_failed(&mut self, token: SessionToken) {
        match self.pending_session.take() {
            Some(pending) if pending.token == token => {
                let message = match pending.purpose {
                    SessionPurpose::Preview => "Failed to configure the camera for preview.",
                    SessionPurpose::FrameStream => {
                        "Failed to configure the camera for streaming images."
                    }
                    SessionPurpose::Recording => "Failed to configure camera session",
                };
                warn!("{message}");
                self.report_session_failure(pending, message);
            }
            other => {
                debug!("Ignoring failure of stale session {}", token.0);
                self.pending_session = other;
            }
        }
    }

    fn report_session_failure(&mut self, pending: PendingSession, message: &str) {
        match pending.respond_to {
            Some(respond_to) => reply(
                respond_to,
                Err(CameraError::SessionConfigFailed(message.to_string())),
                "session",
            ),
            None => self.events.send(CameraEvent::error(message)),
        }
    }

    /// Re-issue the repeating request on the live session
    fn update_preview(&mut self) -> CameraResult<()> {
        let (Some(session), Some(request)) = (self.session.as_mut(), self.request.as_mut()) else {
            return Ok(());
        };

        if session.kind() == SessionKind::HighSpeed {
            request.fps_range = Some(
                self.config
                    .frame_rate_range
                    .unwrap_or(FrameRateRange::new(VIDEO_FRAME_RATE, VIDEO_FRAME_RATE)),
            );
            request.optical_stabilization = true;
            let burst = session.create_high_speed_request_list(request)?;
            session.set_repeating_burst(&burst)?;
        } else {
            session.set_repeating_request(request)?;
        }
        Ok(())
    }

    fn close_capture_session(&mut self) {
        if let Some(mut session) = self.session.take() {
            debug!("Closing capture session");
            session.close();
        }
    }

    fn take_picture_internal(&mut self, path: &Path) -> CameraResult<()> {
        if path.exists() {
            return Err(CameraError::FileAlreadyExists(path.to_path_buf()));
        }
        if self.pending_capture.is_some() {
            return Err(CameraError::CameraAccess(
                "A picture is already being taken".to_string(),
            ));
        }

        let mut request = CaptureRequest::new(RequestTemplate::StillCapture)
            .with_target(SurfaceKind::StillCapture);
        request.jpeg_orientation = Some(self.media_orientation());
        request.jpeg_quality = Some(100);
        request.mono_effect = self.supports_mono_effect();
        request.flash = self.flash_mode();

        let session = self
            .session
            .as_mut()
            .ok_or_else(|| CameraError::CameraAccess("No active capture session".to_string()))?;
        session.capture(&request)?;
        debug!("Still capture requested for {path:?}");
        Ok(())
    }

    async fn on_still_image_available(&mut self) {
        let bytes = match self.picture_receiver.as_mut() {
            Some(receiver) => take_first_plane(receiver.as_mut()),
            None => Ok(None),
        };

        match (self.pending_capture.take(), bytes) {
            (None, _) => debug!("Discarding still image nobody asked for"),
            (Some(pending), Ok(None)) => self.pending_capture = Some(pending),
            (Some(pending), Ok(Some(bytes))) => {
                let result = write_new_file(&pending.path, &bytes).await;
                if result.is_ok() {
                    info!("Saved {} byte picture to {:?}", bytes.len(), pending.path);
                }
                reply(pending.respond_to, result, "take picture");
            }
            (Some(pending), Err(e)) => reply(pending.respond_to, Err(e.into()), "take picture"),
        }
    }

    fn on_frame_available(&mut self) {
        let Some(receiver) = self.stream_receiver.as_mut() else {
            return;
        };
        match marshal_latest(receiver.as_mut()) {
            Ok(Some(frame)) => {
                if let Some(sink) = &self.frame_sink
                    && sink.send(frame).is_err()
                {
                    debug!("Frame stream subscriber went away");
                    self.frame_sink = None;
                }
            }
            Ok(None) => {}
            Err(e) => warn!("Failed to acquire stream image: {e}"),
        }
    }

    fn start_video_recording_internal(&mut self, path: &Path) -> CameraResult<SessionToken> {
        if path.exists() {
            return Err(CameraError::FileAlreadyExists(path.to_path_buf()));
        }
        if self.device.is_none() {
            return Err(CameraError::CameraAccess("Camera is not open".to_string()));
        }

        let recorder = self.prepare_recorder(path)?;
        self.finish_superseded_recording();
        if let Some(mut previous) = self.recorder.replace(recorder) {
            previous.release();
        }
        self.close_capture_session();

        let mut request = CaptureRequest::new(RequestTemplate::Record)
            .with_target(SurfaceKind::Preview)
            .with_target(SurfaceKind::Recorder);
        request.flash = self.flash_mode();
        request.mono_effect = self.supports_mono_effect();

        let kind = if self.settings.slow_motion && self.driver.supports_high_speed_sessions() {
            SessionKind::HighSpeed
        } else {
            SessionKind::Normal
        };
        let surfaces = [
            Surface {
                kind: SurfaceKind::Preview,
                size: self.config.preview_size,
            },
            Surface {
                kind: SurfaceKind::Recorder,
                size: self.config.video_size,
            },
        ];
        self.configure_session(kind, &surfaces, request)
            .map_err(|e| CameraError::VideoRecordingFailed(e.to_string()))
    }

    fn prepare_recorder(&mut self, path: &Path) -> CameraResult<Box<dyn VideoRecorder>> {
        let settings = RecorderSettings {
            output_path: path.to_path_buf(),
            container: OutputContainer::Mpeg4,
            video_encoder: VideoEncoder::H264,
            video_bit_rate: VIDEO_BIT_RATE,
            video_frame_rate: VIDEO_FRAME_RATE,
            video_size: self.config.video_size,
            audio: self.settings.enable_audio.then_some(AudioSettings {
                sample_rate: AUDIO_SAMPLE_RATE,
            }),
            orientation_hint: self.media_orientation(),
        };
        self.driver
            .create_recorder(&settings)
            .map_err(|e| CameraError::VideoRecordingFailed(e.to_string()))
    }

    /// Stop and reset the running recorder so the output file is finalized
    fn finalize_recording(&mut self) -> CameraResult<()> {
        self.phase = SessionPhase::Idle;
        let recorder = self.recorder.as_mut().ok_or_else(|| {
            CameraError::VideoRecordingFailed("Recorder is not prepared".to_string())
        })?;
        let stopped = recorder.stop();
        recorder.reset();
        stopped.map_err(|e| CameraError::VideoRecordingFailed(e.to_string()))
    }

    /// A session rebuild while recording ends the recording first
    fn finish_superseded_recording(&mut self) {
        if !self.phase.is_recording() {
            return;
        }
        match self.finalize_recording() {
            Ok(()) => info!("Video recording stopped by a new session"),
            Err(e) => warn!("Failed to stop superseded recording: {e}"),
        }
    }

    fn stop_video_recording_internal(&mut self) -> CameraResult<()> {
        if !self.phase.is_recording() {
            return Ok(());
        }

        self.finalize_recording()?;
        if let Some(session) = self.session.as_mut() {
            session
                .stop_repeating()
                .map_err(|e| CameraError::VideoRecordingFailed(e.to_string()))?;
        }
        info!("Video recording stopped");

        self.start_preview_internal()
            .map_err(|e| CameraError::VideoRecordingFailed(e.to_string()))
    }

    fn pause_video_recording_internal(&mut self) -> CameraResult<()> {
        if !self.phase.is_recording() {
            return Ok(());
        }
        if !self.driver.supports_pause_resume() {
            return Err(CameraError::UnsupportedOperation(
                "pauseVideoRecording requires platform API 24 or newer".to_string(),
            ));
        }
        self.recorder
            .as_mut()
            .ok_or_else(|| {
                CameraError::VideoRecordingFailed("Recorder is not prepared".to_string())
            })?
            .pause()
            .map_err(|e| CameraError::VideoRecordingFailed(e.to_string()))?;
        self.phase = SessionPhase::RecordingPaused;
        Ok(())
    }

    fn resume_video_recording_internal(&mut self) -> CameraResult<()> {
        if !self.phase.is_recording() {
            return Ok(());
        }
        if !self.driver.supports_pause_resume() {
            return Err(CameraError::UnsupportedOperation(
                "resumeVideoRecording requires platform API 24 or newer".to_string(),
            ));
        }
        self.recorder
            .as_mut()
            .ok_or_else(|| {
                CameraError::VideoRecordingFailed("Recorder is not prepared".to_string())
            })?
            .resume()
            .map_err(|e| CameraError::VideoRecordingFailed(e.to_string()))?;
        self.phase = SessionPhase::Recording;
        Ok(())
    }

    fn lock_focus_internal(&mut self, point: FocusPoint) {
        self.focus.lock(point);
        self.apply_focus_lock(point);
        if let Err(e) = self.update_preview() {
            self.events.send(CameraEvent::error(e.to_string()));
        }
    }

    fn apply_focus_lock(&mut self, point: FocusPoint) {
        let region = metering_region(point, self.capabilities.active_array_size);
        if let Some(request) = self.request.as_mut() {
            request.af_mode = Some(AutoFocusMode::Auto);
            request.af_regions = vec![region];
            request.af_trigger = AutoFocusTrigger::Start;
        }
    }

    fn unlock_focus_internal(&mut self) {
        self.focus.unlock();
        if let Some(request) = self.request.as_mut() {
            request.af_trigger = AutoFocusTrigger::Cancel;
            request.af_regions.clear();
            request.control_mode = ControlMode::Auto;
        }
        if let Err(e) = self.update_preview() {
            self.events.send(CameraEvent::error(e.to_string()));
        }
    }

    fn close_receivers(&mut self) {
        if let Some(mut receiver) = self.picture_receiver.take() {
            receiver.close();
        }
        if let Some(mut receiver) = self.stream_receiver.take() {
            receiver.close();
        }
    }

    /// Release every resource; each step is guarded so this is safe to repeat
    fn close_internal(&mut self) {
        if let Some(pending) = self.pending_session.take()
            && let Some(respond_to) = pending.respond_to
        {
            reply(
                respond_to,
                Err(CameraError::CameraAccess(
                    "The camera was closed during configuration.".to_string(),
                )),
                "session",
            );
        }
        self.close_capture_session();

        if let Some(mut device) = self.device.take() {
            info!("Closing camera '{}'", self.settings.camera_name);
            device.close();
        }
        self.close_receivers();
        if let Some(mut recorder) = self.recorder.take() {
            recorder.reset();
            recorder.release();
        }

        if let Some(respond_to) = self.pending_open.take() {
            reply(
                respond_to,
                Err(CameraError::CameraAccess(
                    "The camera was closed before it finished opening.".to_string(),
                )),
                "open",
            );
        }
        if let Some(pending) = self.pending_capture.take() {
            reply(
                pending.respond_to,
                Err(CameraError::CameraAccess(
                    "The camera was closed during capture.".to_string(),
                )),
                "take picture",
            );
        }

        self.request = None;
        self.frame_sink = None;
        self.phase = SessionPhase::Closed;
        self.opened_at = None;
    }

    fn dispose_internal(&mut self) {
        self.close_internal();
        if let Some(mut render_target) = self.render_target.take() {
            render_target.release();
        }
        if let Some(mut sensor) = self.orientation_sensor.take() {
            sensor.disable();
        }
        if !self.disposed {
            info!("Camera '{}' disposed", self.settings.camera_name);
        }
        self.disposed = true;
    }

    fn status_internal(&self) -> SessionStatus {
        SessionStatus {
            phase: self.phase,
            config: self.config.clone(),
            focus: self.focus,
            flash_enabled: self.flash_enabled,
            frame_stream_attached: self.frame_sink.is_some(),
            event_subscriber_attached: self.events.has_subscriber(),
            opened_at: self.opened_at,
            disposed: self.disposed,
        }
    }

    fn supports_mono_effect(&self) -> bool {
        self.capabilities.supports_effect(EffectMode::Mono)
    }

    fn flash_mode(&self) -> FlashMode {
        if self.flash_enabled {
            FlashMode::Torch
        } else {
            FlashMode::Off
        }
    }

    fn media_orientation(&self) -> u32 {
        self.orientation.media_orientation(
            self.capabilities.sensor_orientation,
            self.capabilities.is_front_facing(),
        )
    }
}

fn replace_receiver(slot: &mut Option<Box<dyn ImageReceiver>>, receiver: Box<dyn ImageReceiver>) {
    if let Some(mut previous) = slot.replace(receiver) {
        previous.close();
    }
}

fn reply<T>(respond_to: oneshot::Sender<CameraResult<T>>, result: CameraResult<T>, what: &str) {
    if respond_to.send(result).is_err() {
        debug!("Failed to send {what} response");
    }
}

async fn write_new_file(path: &Path, bytes: &[u8]) -> CameraResult<()> {
    let mut file = tokio::fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(path)
        .await?;
    file.write_all(bytes).await?;
    file.flush().await?;
    Ok(())
}

/// Start a camera session in a separate task
pub fn start_camera_session(
    settings: Settings,
    collaborators: Collaborators,
) -> CameraResult<CameraHandle> {
    let (session, handle) = CameraSession::new(settings, collaborators)?;

    tokio::spawn(async move {
        if let Err(e) = session.run().await {
            error!("Camera session error: {e}");
        }
    });

    Ok(handle)
}
