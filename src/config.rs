//! Configuration management for the camera session.
//!
//! This module provides the settings a camera component is constructed with. It uses
//! Serde for serialization and supports environment variable overrides and a JSON
//! user config file.

use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::capabilities::{DeviceCapabilities, ResolutionPreset};
use crate::{CameraError, CameraResult};

/// Fixed recorder parameters
pub const VIDEO_BIT_RATE: u32 = 2_000_000_000;
pub const VIDEO_FRAME_RATE: u32 = 240;
pub const AUDIO_SAMPLE_RATE: u32 = 16_000;
/// Buffers held by each image receiver
pub const RECEIVER_POOL_DEPTH: usize = 2;

/// Configuration settings for a camera component.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Driver-level identifier of the camera to open
    pub camera_name: String,
    /// Requested quality tier
    pub resolution_preset: ResolutionPreset,
    /// Record an audio track alongside video
    pub enable_audio: bool,
    /// Use a high-frame-rate session while recording
    pub slow_motion: bool,
    /// Enable debug logging
    pub debug: bool,
    /// Where the CLI writes pictures and recordings
    pub output_directory: PathBuf,
    /// Optional JSON capability table to use instead of the built-in simulated one
    pub capabilities_file: Option<PathBuf>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            camera_name: "0".to_string(),
            resolution_preset: ResolutionPreset::High,
            enable_audio: true,
            slow_motion: false,
            debug: false,
            output_directory: PathBuf::from("./captures"),
            capabilities_file: None,
        }
    }
}

impl Settings {
    /// Settings from the user config file, overridden by `CAMERA_SESSION_*` variables
    pub fn new() -> CameraResult<Self> {
        let base = Self::load_user_config();
        base.with_overrides(|key| env::var(key).ok())
    }

    /// Apply overrides from a variable lookup; split out so tests need not touch the
    /// process environment
    pub fn with_overrides<F>(mut self, lookup: F) -> CameraResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(camera_name) = lookup("CAMERA_SESSION_CAMERA") {
            self.camera_name = camera_name;
        }
        if let Some(preset) = lookup("CAMERA_SESSION_PRESET") {
            self.resolution_preset = preset.parse()?;
        }
        if let Some(enable_audio) = lookup("CAMERA_SESSION_ENABLE_AUDIO") {
            self.enable_audio = parse_bool("CAMERA_SESSION_ENABLE_AUDIO", &enable_audio)?;
        }
        if let Some(slow_motion) = lookup("CAMERA_SESSION_SLOW_MOTION") {
            self.slow_motion = parse_bool("CAMERA_SESSION_SLOW_MOTION", &slow_motion)?;
        }
        if let Some(debug) = lookup("CAMERA_SESSION_DEBUG") {
            self.debug = parse_bool("CAMERA_SESSION_DEBUG", &debug)?;
        }
        if let Some(output_directory) = lookup("CAMERA_SESSION_OUTPUT_DIR") {
            self.output_directory = PathBuf::from(output_directory);
        }
        if let Some(capabilities_file) = lookup("CAMERA_SESSION_CAPABILITIES") {
            self.capabilities_file = Some(PathBuf::from(capabilities_file));
        }
        Ok(self)
    }

    /// Create the output directory if needed
    pub fn create_directories(&self) -> CameraResult<()> {
        if !self.output_directory.exists() {
            fs::create_dir_all(&self.output_directory)?;
        }
        Ok(())
    }

    /// Get the path to the user config file
    pub fn get_config_path() -> PathBuf {
        // Allow override via environment variable for testing
        if let Ok(config_path_override) = env::var("CAMERA_SESSION_CONFIG_PATH") {
            return PathBuf::from(config_path_override);
        }

        // Default to ~/.config/camera-session.json
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".config")
            .join("camera-session.json")
    }

    /// Load the user config, falling back to defaults when missing or unreadable
    pub fn load_user_config() -> Self {
        let config_path = Self::get_config_path();
        if !config_path.exists() {
            return Self::default();
        }
        match Self::load_from(&config_path) {
            Ok(settings) => settings,
            Err(e) => {
                warn!("Failed to load user config from {config_path:?}: {e}");
                Self::default()
            }
        }
    }

    pub fn load_from(path: &Path) -> CameraResult<Self> {
        let contents = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&contents)?)
    }

    /// Save settings to `path`, creating parent directories
    pub fn save_to(&self, path: &Path) -> CameraResult<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let contents = serde_json::to_string_pretty(self)?;
        fs::write(path, contents)?;
        debug!("Saved user config to {path:?}");
        Ok(())
    }
}

fn parse_bool(key: &str, value: &str) -> CameraResult<bool> {
    value
        .parse()
        .map_err(|_| CameraError::Config(format!("{key} must be true or false, got '{value}'")))
}

/// Read a capability table from a JSON file
pub fn load_capabilities(path: &Path) -> CameraResult<DeviceCapabilities> {
    let contents = fs::read_to_string(path)?;
    Ok(serde_json::from_str(&contents)?)
}
