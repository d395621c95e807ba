use std::path::PathBuf;

use camera_session::camera_session::start_camera_session;
use camera_session::capabilities::ResolutionPreset;
use camera_session::config::{Settings, load_capabilities};
use camera_session::focus::FocusPoint;
use camera_session::negotiator::negotiate;
use camera_session::simulated::{SimulatedOptions, default_capabilities, simulated_collaborators};
use camera_session::{CameraError, CameraResult};
use chrono::Utc;
use clap::{Parser, Subcommand};
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "camera-session")]
#[command(about = "Camera capture session controller")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable debug output
    #[arg(short, long, global = true)]
    debug: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the negotiated session configuration as JSON
    Negotiate {
        /// Resolution preset (low, medium, high, veryHigh, ultraHigh, max)
        #[arg(long)]
        preset: Option<ResolutionPreset>,
        /// Negotiate for a high-frame-rate session
        #[arg(long)]
        slow_motion: bool,
        /// JSON capability table to negotiate against
        #[arg(long)]
        capabilities: Option<PathBuf>,
    },
    /// Run a full capture sequence against the simulated camera
    Simulate {
        /// Number of preview frames to stream before capturing
        #[arg(long, default_value = "3")]
        frames: usize,
        /// Record in slow motion
        #[arg(long)]
        slow_motion: bool,
    },
    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Show configuration
    Show,
    /// Print the user config file location
    Path,
}

#[tokio::main]
async fn main() -> CameraResult<()> {
    let cli = Cli::parse();

    let settings = match Settings::new() {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!("Failed to load configuration: {e}");
            std::process::exit(1);
        }
    };

    let default_level = if cli.debug || settings.debug {
        "debug"
    } else {
        "info"
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    debug!("Loaded settings: {settings:?}");

    match cli.command {
        Commands::Negotiate {
            preset,
            slow_motion,
            capabilities,
        } => handle_negotiate(&settings, preset, slow_motion, capabilities),
        Commands::Simulate {
            frames,
            slow_motion,
        } => handle_simulate(settings, frames, slow_motion).await,
        Commands::Config { action } => handle_config_command(action, &settings),
    }
}

fn handle_negotiate(
    settings: &Settings,
    preset: Option<ResolutionPreset>,
    slow_motion: bool,
    capabilities: Option<PathBuf>,
) -> CameraResult<()> {
    let capabilities = match capabilities.or_else(|| settings.capabilities_file.clone()) {
        Some(path) => load_capabilities(&path)?,
        None => default_capabilities(),
    };
    let preset = preset.unwrap_or(settings.resolution_preset);
    let config = negotiate(preset, slow_motion || settings.slow_motion, &capabilities)?;
    println!("{}", serde_json::to_string_pretty(&config)?);
    Ok(())
}

async fn handle_simulate(
    mut settings: Settings,
    frames: usize,
    slow_motion: bool,
) -> CameraResult<()> {
    settings.slow_motion |= slow_motion;
    settings.create_directories()?;

    let mut options = SimulatedOptions::default();
    if let Some(path) = &settings.capabilities_file {
        options.capabilities = load_capabilities(path)?;
    }
    let (collaborators, simulator) = simulated_collaborators(options);
    let output_directory = settings.output_directory.clone();
    let camera = start_camera_session(settings, collaborators)?;

    let mut events = camera.subscribe_events()?;
    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            info!("Camera event: {}", serde_json::to_string(&event).unwrap_or_default());
        }
    });

    let reply = camera.open().await?;
    info!(
        "Opened camera, render target {} preview {}x{}",
        reply.render_target_id, reply.preview_width, reply.preview_height
    );

    let mut stream = camera.start_preview_with_frame_stream().await?;
    for _ in 0..frames {
        if !simulator.emit_frame() {
            warn!("Frame stream receiver is not available");
            break;
        }
        match stream.recv().await {
            Some(frame) => info!(
                "Frame {}x{} with {} planes ({} bytes)",
                frame.width,
                frame.height,
                frame.planes.len(),
                frame.byte_len()
            ),
            None => break,
        }
    }
    camera.stop_frame_stream()?;
    camera.start_preview().await?;

    camera.lock_focus(FocusPoint::new(0.5, 0.5))?;
    let stamp = Utc::now().format("%Y%m%d-%H%M%S");
    let picture = output_directory.join(format!("picture-{stamp}.jpg"));
    camera.take_picture(picture.clone()).await?;
    info!("Saved picture to {picture:?}");

    let video = output_directory.join(format!("video-{stamp}.mp4"));
    camera.start_video_recording(video.clone()).await?;
    match camera.pause_video_recording().await {
        Ok(()) => camera.resume_video_recording().await?,
        Err(CameraError::UnsupportedOperation(message)) => warn!("{message}"),
        Err(e) => return Err(e),
    }
    camera.stop_video_recording().await?;
    camera.unlock_focus()?;
    info!("Recorded video to {video:?}");

    let status = camera.status().await?;
    println!("{}", serde_json::to_string_pretty(&status)?);

    camera.dispose().await?;
    debug!("Simulator counters: {:?}", simulator.counters());
    Ok(())
}

fn handle_config_command(action: ConfigAction, settings: &Settings) -> CameraResult<()> {
    match action {
        ConfigAction::Show => {
            println!("Configuration:");
            println!("  Camera: {}", settings.camera_name);
            println!("  Resolution preset: {}", settings.resolution_preset);
            println!("  Enable audio: {}", settings.enable_audio);
            println!("  Slow motion: {}", settings.slow_motion);
            println!("  Debug: {}", settings.debug);
            println!("  Output directory: {}", settings.output_directory.display());
            match &settings.capabilities_file {
                Some(path) => println!("  Capabilities file: {}", path.display()),
                None => println!("  Capabilities file: (simulated defaults)"),
            }
            Ok(())
        }
        ConfigAction::Path => {
            println!("{}", Settings::get_config_path().display());
            Ok(())
        }
    }
}
