use std::io::{ErrorKind, Read};
use std::process::{Child, ChildStdout, Command, Stdio};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::{debug, info, warn};

use super::{CameraDevice, CameraDriver, CameraError, CameraSettings, ChunkSink};
use crate::chunker::MarkerAligner;

const READ_BUF_SIZE: usize = 64 * 1024;

/// Raspberry Pi camera via the `rpicam-vid` (or `libcamera-vid`) app.
///
/// The app writes an MJPEG stream to stdout; a reader thread re-cuts it on
/// frame markers and feeds the sink.
pub struct RpicamDriver {
    command: String,
}

impl RpicamDriver {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
        }
    }

    fn args(settings: &CameraSettings) -> Vec<String> {
        let mut args: Vec<String> = vec![
            "--nopreview".into(),
            "-t".into(),
            "0".into(),
            "--codec".into(),
            "mjpeg".into(),
            "--width".into(),
            settings.width.to_string(),
            "--height".into(),
            settings.height.to_string(),
            "--framerate".into(),
            settings.framerate.to_string(),
        ];
        if settings.hflip {
            args.push("--hflip".into());
        }
        if settings.vflip {
            args.push("--vflip".into());
        }
        args.extend(["-o".into(), "-".into()]);
        args
    }
}

impl CameraDriver for RpicamDriver {
    fn name(&self) -> &str {
        "rpicam"
    }

    /// Probes the camera app with `--version` so a missing binary fails at
    /// open time. The sensor itself is claimed when streaming starts.
    fn open(&self, settings: &CameraSettings) -> Result<Box<dyn CameraDevice>, CameraError> {
        let output = Command::new(&self.command)
            .arg("--version")
            .stdin(Stdio::null())
            .output()
            .map_err(|source| CameraError::Spawn {
                command: self.command.clone(),
                source,
            })?;
        if !output.status.success() {
            return Err(CameraError::Probe {
                command: self.command.clone(),
                status: output.status.to_string(),
            });
        }
        debug!(
            command = self.command,
            version = %String::from_utf8_lossy(&output.stdout).trim(),
            "camera app found"
        );

        Ok(Box::new(RpicamDevice {
            command: self.command.clone(),
            args: Self::args(settings),
            child: None,
            reader: None,
        }))
    }
}

struct RpicamDevice {
    command: String,
    args: Vec<String>,
    child: Option<Child>,
    reader: Option<JoinHandle<std::io::Result<()>>>,
}

impl CameraDevice for RpicamDevice {
    fn start_streaming(&mut self, sink: ChunkSink) -> Result<(), CameraError> {
        if self.child.is_some() {
            return Err(CameraError::AlreadyStreaming);
        }

        let mut child = Command::new(&self.command)
            .args(&self.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .spawn()
            .map_err(|source| CameraError::Spawn {
                command: self.command.clone(),
                source,
            })?;

        let Some(stdout) = child.stdout.take() else {
            let _ = child.kill();
            return Err(CameraError::Exited("stdout not captured".into()));
        };

        let reader = thread::Builder::new()
            .name("rpicam-reader".into())
            .spawn(move || pump(stdout, sink));
        let reader = match reader {
            Ok(handle) => handle,
            Err(e) => {
                let _ = child.kill();
                let _ = child.wait();
                return Err(CameraError::Io(e));
            }
        };

        info!(command = self.command, pid = child.id(), "camera streaming started");
        self.child = Some(child);
        self.reader = Some(reader);
        Ok(())
    }

    fn wait_streaming(&mut self, timeout: Duration) -> Result<(), CameraError> {
        thread::sleep(timeout);
        if let Some(child) = self.child.as_mut() {
            if let Some(status) = child.try_wait()? {
                return Err(CameraError::Exited(format!("{} {status}", self.command)));
            }
        }
        Ok(())
    }

    fn stop_streaming(&mut self) -> Result<(), CameraError> {
        if let Some(mut child) = self.child.take() {
            if let Err(e) = child.kill() {
                debug!(error = %e, "camera process already gone");
            }
            let status = child.wait()?;
            debug!(%status, "camera process reaped");
        }

        if let Some(reader) = self.reader.take() {
            match reader.join() {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!(error = %e, "camera reader ended with error"),
                Err(_) => warn!("camera reader thread panicked"),
            }
        }
        Ok(())
    }

    fn close(mut self: Box<Self>) {
        if let Err(e) = self.stop_streaming() {
            warn!(error = %e, "error stopping camera on close");
        }
    }
}

impl Drop for RpicamDevice {
    fn drop(&mut self) {
        if let Some(child) = self.child.as_mut() {
            let _ = child.kill();
            let _ = child.wait();
        }
    }
}

/// Copy stdout into the sink until EOF, aligned on frame markers.
fn pump(mut stdout: ChildStdout, mut sink: ChunkSink) -> std::io::Result<()> {
    let mut buf = vec![0u8; READ_BUF_SIZE];
    let mut aligner = MarkerAligner::new();

    loop {
        let n = match stdout.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        };
        aligner.feed(&buf[..n], &mut sink);
    }
    aligner.finish(&mut sink);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_line_carries_settings() {
        let settings = CameraSettings {
            width: 320,
            height: 240,
            framerate: 10,
            hflip: true,
            vflip: false,
        };
        let args = RpicamDriver::args(&settings).join(" ");
        assert_eq!(
            args,
            "--nopreview -t 0 --codec mjpeg --width 320 --height 240 --framerate 10 --hflip -o -"
        );
    }

    #[test]
    fn missing_binary_fails_at_open() {
        let driver = RpicamDriver::new("/nonexistent/rpicam-vid");
        let settings = CameraSettings {
            width: 320,
            height: 240,
            framerate: 10,
            hflip: true,
            vflip: true,
        };
        assert!(matches!(
            driver.open(&settings),
            Err(CameraError::Spawn { .. })
        ));
    }
}
