//! Pan/tilt actuator seam.

mod hat;

pub use hat::PanTiltHat;

use gimbal_cam_common::config::PanTiltConfig;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Axis {
    Pan,
    Tilt,
}

impl fmt::Display for Axis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Axis::Pan => f.write_str("pan"),
            Axis::Tilt => f.write_str("tilt"),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ActuatorError {
    #[error("failed to open {path}: {source}")]
    Open {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to select I2C address {address:#04x}: {source}")]
    Ioctl {
        address: u16,
        source: std::io::Error,
    },
    #[error("I2C write failed: {0}")]
    Write(std::io::Error),
    #[error("{axis} angle {angle} outside -90..=90")]
    OutOfRange { axis: Axis, angle: f64 },
    #[error("unknown pan/tilt driver '{0}', expected 'hat' or 'log'")]
    UnknownDriver(String),
}

/// Accepts absolute angle commands for the two mount axes.
///
/// Calls are synchronous and may block on bus I/O; async callers should go
/// through `spawn_blocking`.
pub trait PanTilt: Send + Sync {
    fn name(&self) -> &str;

    fn set_pan(&self, angle: f64) -> Result<(), ActuatorError>;

    fn set_tilt(&self, angle: f64) -> Result<(), ActuatorError>;
}

/// Logs commands instead of moving anything.
pub struct LogPanTilt;

impl PanTilt for LogPanTilt {
    fn name(&self) -> &str {
        "log"
    }

    fn set_pan(&self, angle: f64) -> Result<(), ActuatorError> {
        info!(angle, "pan (no hardware)");
        Ok(())
    }

    fn set_tilt(&self, angle: f64) -> Result<(), ActuatorError> {
        info!(angle, "tilt (no hardware)");
        Ok(())
    }
}

/// Build the actuator named by `pantilt.driver`.
pub fn from_config(config: &PanTiltConfig) -> Result<Arc<dyn PanTilt>, ActuatorError> {
    match config.driver.as_str() {
        "hat" => Ok(Arc::new(PanTiltHat::new(
            config.i2c_device.clone(),
            config.address,
        ))),
        "log" => Ok(Arc::new(LogPanTilt)),
        other => Err(ActuatorError::UnknownDriver(other.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn driver_selection() {
        let hat = from_config(&PanTiltConfig::default()).unwrap();
        assert_eq!(hat.name(), "hat");

        let log = PanTiltConfig {
            driver: "log".into(),
            ..PanTiltConfig::default()
        };
        let log = from_config(&log).unwrap();
        assert_eq!(log.name(), "log");
        assert!(log.set_pan(12.5).is_ok());
        assert!(log.set_tilt(-300.0).is_ok());

        let unknown = PanTiltConfig {
            driver: "stepper".into(),
            ..PanTiltConfig::default()
        };
        assert!(matches!(
            from_config(&unknown),
            Err(ActuatorError::UnknownDriver(_))
        ));
    }

    #[test]
    fn out_of_range_message() {
        let err = ActuatorError::OutOfRange {
            axis: Axis::Tilt,
            angle: 120.0,
        };
        assert_eq!(err.to_string(), "tilt angle 120 outside -90..=90");
    }
}
