//! Camera driver seam.
//!
//! The capture worker only talks to the sensor through these traits, so the
//! worker and everything above it can run against a recorded stream or an
//! in-test fake instead of real hardware.

mod replay;
mod rpicam;

pub use replay::ReplayDriver;
pub use rpicam::RpicamDriver;

use gimbal_cam_common::config::CameraConfig;
use std::time::Duration;

/// Receives raw MJPEG bytes from a streaming device, in arrival order.
pub type ChunkSink = Box<dyn FnMut(&[u8]) + Send + 'static>;

/// Sensor parameters fixed at open time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CameraSettings {
    pub width: u32,
    pub height: u32,
    pub framerate: u32,
    pub hflip: bool,
    pub vflip: bool,
}

impl From<&CameraConfig> for CameraSettings {
    fn from(config: &CameraConfig) -> Self {
        Self {
            width: config.width,
            height: config.height,
            framerate: config.framerate,
            hflip: config.hflip,
            vflip: config.vflip,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CameraError {
    #[error("failed to spawn {command}: {source}")]
    Spawn {
        command: String,
        source: std::io::Error,
    },
    #[error("{command} probe failed: {status}")]
    Probe { command: String, status: String },
    #[error("camera I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("camera stream ended: {0}")]
    Exited(String),
    #[error("no JPEG frames found in {0}")]
    NoFrames(String),
    #[error("device is already streaming")]
    AlreadyStreaming,
    #[error("unknown camera driver '{0}', expected 'rpicam' or 'replay'")]
    UnknownDriver(String),
    #[error("camera driver 'replay' requires camera.replay_path")]
    MissingReplayPath,
}

/// Opens camera devices.
pub trait CameraDriver: Send + Sync {
    /// Human-readable name for logging.
    fn name(&self) -> &str;

    fn open(&self, settings: &CameraSettings) -> Result<Box<dyn CameraDevice>, CameraError>;
}

/// An open camera. Always streams MJPEG.
pub trait CameraDevice: Send {
    /// Begin continuous capture, delivering bytes to `sink` from a driver thread.
    fn start_streaming(&mut self, sink: ChunkSink) -> Result<(), CameraError>;

    /// Block for up to `timeout`, reporting a stream failure if one occurred.
    fn wait_streaming(&mut self, timeout: Duration) -> Result<(), CameraError>;

    /// Halt capture. A no-op if streaming never started.
    fn stop_streaming(&mut self) -> Result<(), CameraError>;

    /// Release the device.
    fn close(self: Box<Self>);
}

/// Build the driver named by `camera.driver`.
pub fn from_config(config: &CameraConfig) -> Result<Box<dyn CameraDriver>, CameraError> {
    match config.driver.as_str() {
        "rpicam" => Ok(Box::new(RpicamDriver::new(config.command.clone()))),
        "replay" => {
            let path = config
                .replay_path
                .clone()
                .ok_or(CameraError::MissingReplayPath)?;
            Ok(Box::new(ReplayDriver::new(path)))
        }
        other => Err(CameraError::UnknownDriver(other.to_string())),
    }
}
