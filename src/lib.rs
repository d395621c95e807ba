#![deny(clippy::expect_used)]
#![deny(clippy::unwrap_used)]

pub mod camera_session;
pub mod capabilities;
pub mod config;
pub mod driver;
pub mod error;
pub mod events;
pub mod focus;
pub mod frame;
pub mod negotiator;
pub mod simulated;

pub use camera_session::{CameraHandle, CameraSession, start_camera_session};
pub use error::{CameraError, CameraResult};
