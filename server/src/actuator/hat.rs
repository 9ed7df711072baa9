use std::fs::{File, OpenOptions};
use std::io::Write;
use std::os::fd::AsRawFd;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use tracing::{debug, info};

use super::{ActuatorError, Axis, PanTilt};

/// Linux `I2C_SLAVE` ioctl: bind the file descriptor to a device address.
const I2C_SLAVE: u16 = 0x0703;

const REG_CONFIG: u8 = 0x00;
const REG_SERVO1: u8 = 0x01;
const REG_SERVO2: u8 = 0x03;

/// Pulse width range of the HAT's servos, in microseconds.
const SERVO_MIN_US: u16 = 575;
const SERVO_MAX_US: u16 = 2325;

/// Pimoroni Pan-Tilt HAT on the Linux I2C bus.
///
/// Servo 1 is pan, servo 2 is tilt. The bus is opened on the first command
/// and each servo is enabled on its first use. A failed write drops the bus
/// handle so the next command reopens it and re-enables its servo.
pub struct PanTiltHat {
    device: PathBuf,
    address: u16,
    bus: Mutex<BusState>,
}

#[derive(Default)]
struct BusState {
    file: Option<File>,
    /// Shadow of the config register (servo enable bits).
    config: u8,
}

impl Axis {
    fn register(self) -> u8 {
        match self {
            Axis::Pan => REG_SERVO1,
            Axis::Tilt => REG_SERVO2,
        }
    }

    fn enable_bit(self) -> u8 {
        match self {
            Axis::Pan => 0b01,
            Axis::Tilt => 0b10,
        }
    }
}

impl PanTiltHat {
    pub fn new(device: impl Into<PathBuf>, address: u16) -> Self {
        Self {
            device: device.into(),
            address,
            bus: Mutex::new(BusState::default()),
        }
    }

    fn set_servo(&self, axis: Axis, angle: f64) -> Result<(), ActuatorError> {
        if !(-90.0..=90.0).contains(&angle) {
            return Err(ActuatorError::OutOfRange { axis, angle });
        }
        let pulse_us = angle_to_pulse_us(angle);

        let mut bus = self.bus.lock().unwrap_or_else(PoisonError::into_inner);
        let state = &mut *bus;
        let mut file = match state.file.take() {
            Some(file) => file,
            None => {
                let file = open_bus(&self.device, self.address)?;
                state.config = 0;
                info!(device = %self.device.display(), address = self.address, "pan/tilt HAT opened");
                file
            }
        };

        write_servo(&mut file, &mut state.config, axis, pulse_us)?;
        state.file = Some(file);
        debug!(%axis, angle, pulse_us, "servo command");
        Ok(())
    }
}

impl PanTilt for PanTiltHat {
    fn name(&self) -> &str {
        "hat"
    }

    fn set_pan(&self, angle: f64) -> Result<(), ActuatorError> {
        self.set_servo(Axis::Pan, angle)
    }

    fn set_tilt(&self, angle: f64) -> Result<(), ActuatorError> {
        self.set_servo(Axis::Tilt, angle)
    }
}

/// Enable the axis' servo if needed, then write its pulse width.
fn write_servo<W: Write>(
    out: &mut W,
    config: &mut u8,
    axis: Axis,
    pulse_us: u16,
) -> Result<(), ActuatorError> {
    let wanted = *config | axis.enable_bit();
    if wanted != *config {
        out.write_all(&[REG_CONFIG, wanted])
            .map_err(ActuatorError::Write)?;
        *config = wanted;
    }
    let [lo, hi] = pulse_us.to_le_bytes();
    out.write_all(&[axis.register(), lo, hi])
        .map_err(ActuatorError::Write)
}

fn open_bus(device: &Path, address: u16) -> Result<File, ActuatorError> {
    let file = OpenOptions::new()
        .read(true)
        .write(true)
        .open(device)
        .map_err(|source| ActuatorError::Open {
            path: device.to_path_buf(),
            source,
        })?;

    // SAFETY: the descriptor is owned by `file` and stays open for the call;
    // I2C_SLAVE takes the address by value.
    let rc = unsafe {
        libc::ioctl(
            file.as_raw_fd(),
            I2C_SLAVE as _,
            libc::c_ulong::from(address),
        )
    };
    if rc < 0 {
        return Err(ActuatorError::Ioctl {
            address,
            source: std::io::Error::last_os_error(),
        });
    }
    Ok(file)
}

/// Map -90..=90 degrees linearly onto the servo pulse range, truncating.
pub fn angle_to_pulse_us(angle: f64) -> u16 {
    let span = f64::from(SERVO_MAX_US - SERVO_MIN_US);
    SERVO_MIN_US + (span * (angle + 90.0) / 180.0) as u16
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pulse_width_mapping() {
        assert_eq!(angle_to_pulse_us(-90.0), 575);
        assert_eq!(angle_to_pulse_us(0.0), 1450);
        assert_eq!(angle_to_pulse_us(45.0), 1887);
        assert_eq!(angle_to_pulse_us(90.0), 2325);
    }

    #[test]
    fn out_of_range_rejected_before_touching_the_bus() {
        let hat = PanTiltHat::new("/nonexistent/i2c-1", 0x15);
        assert!(matches!(
            hat.set_tilt(95.0),
            Err(ActuatorError::OutOfRange { axis: Axis::Tilt, .. })
        ));
        assert!(matches!(
            hat.set_pan(-90.5),
            Err(ActuatorError::OutOfRange { axis: Axis::Pan, .. })
        ));
    }

    #[test]
    fn missing_bus_is_open_error() {
        let hat = PanTiltHat::new("/nonexistent/i2c-1", 0x15);
        assert!(matches!(hat.set_pan(0.0), Err(ActuatorError::Open { .. })));
    }

    #[test]
    fn non_i2c_file_fails_address_select() {
        let file = tempfile::NamedTempFile::new().unwrap();
        let hat = PanTiltHat::new(file.path(), 0x15);
        let err = hat.set_pan(10.0).unwrap_err();
        assert!(matches!(err, ActuatorError::Ioctl { address: 0x15, .. }));
        // Nothing was kept open after the failure.
        assert!(hat.bus.lock().unwrap().file.is_none());
    }

    #[test]
    fn servo_writes_enable_then_pulse() {
        let mut written: Vec<u8> = Vec::new();
        let mut config = 0u8;

        write_servo(&mut written, &mut config, Axis::Pan, 1450).unwrap();
        write_servo(&mut written, &mut config, Axis::Pan, 575).unwrap();
        write_servo(&mut written, &mut config, Axis::Tilt, 2325).unwrap();

        let [p_lo, p_hi] = 1450u16.to_le_bytes();
        let [m_lo, m_hi] = 575u16.to_le_bytes();
        let [t_lo, t_hi] = 2325u16.to_le_bytes();
        assert_eq!(config, 0b11);
        assert_eq!(
            written,
            vec![
                REG_CONFIG, 0b01, REG_SERVO1, p_lo, p_hi,
                REG_SERVO1, m_lo, m_hi,
                REG_CONFIG, 0b11, REG_SERVO2, t_lo, t_hi,
            ]
        );
    }
}
