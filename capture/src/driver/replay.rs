use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use bytes::Bytes;
use tracing::{info, warn};

use super::{CameraDevice, CameraDriver, CameraError, CameraSettings, ChunkSink};
use crate::chunker::MarkerAligner;
use crate::splitter::SOI;

/// Plays a recorded MJPEG file in a loop, for machines without a sensor.
pub struct ReplayDriver {
    path: PathBuf,
}

impl ReplayDriver {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl CameraDriver for ReplayDriver {
    fn name(&self) -> &str {
        "replay"
    }

    fn open(&self, settings: &CameraSettings) -> Result<Box<dyn CameraDevice>, CameraError> {
        let data = std::fs::read(&self.path)?;
        let frames = split_frames(&data);
        if frames.is_empty() {
            return Err(CameraError::NoFrames(self.path.display().to_string()));
        }
        info!(
            path = %self.path.display(),
            frames = frames.len(),
            framerate = settings.framerate,
            "replay file loaded"
        );

        Ok(Box::new(ReplayDevice {
            frames: Arc::new(frames),
            interval: Duration::from_secs(1) / settings.framerate.max(1),
            stop: Arc::new(AtomicBool::new(false)),
            pacer: None,
        }))
    }
}

struct ReplayDevice {
    frames: Arc<Vec<Bytes>>,
    interval: Duration,
    stop: Arc<AtomicBool>,
    pacer: Option<JoinHandle<()>>,
}

impl CameraDevice for ReplayDevice {
    fn start_streaming(&mut self, mut sink: ChunkSink) -> Result<(), CameraError> {
        if self.pacer.is_some() {
            return Err(CameraError::AlreadyStreaming);
        }
        self.stop.store(false, Ordering::Release);

        let frames = Arc::clone(&self.frames);
        let stop = Arc::clone(&self.stop);
        let interval = self.interval;
        let pacer = thread::Builder::new()
            .name("replay-pacer".into())
            .spawn(move || {
                for frame in frames.iter().cycle() {
                    if stop.load(Ordering::Acquire) {
                        break;
                    }
                    sink(&frame[..]);
                    thread::sleep(interval);
                }
            })?;

        self.pacer = Some(pacer);
        Ok(())
    }

    fn wait_streaming(&mut self, timeout: Duration) -> Result<(), CameraError> {
        thread::sleep(timeout);
        match &self.pacer {
            Some(pacer) if pacer.is_finished() && !self.stop.load(Ordering::Acquire) => {
                Err(CameraError::Exited("replay pacer ended".into()))
            }
            _ => Ok(()),
        }
    }

    fn stop_streaming(&mut self) -> Result<(), CameraError> {
        self.stop.store(true, Ordering::Release);
        if let Some(pacer) = self.pacer.take() {
            if pacer.join().is_err() {
                warn!("replay pacer thread panicked");
            }
        }
        Ok(())
    }

    fn close(mut self: Box<Self>) {
        let _ = self.stop_streaming();
    }
}

/// Cut a whole MJPEG recording into frames. Bytes before the first marker
/// are discarded.
fn split_frames(data: &[u8]) -> Vec<Bytes> {
    let mut frames = Vec::new();
    let mut aligner = MarkerAligner::new();
    let mut current: Vec<u8> = Vec::new();

    let mut collect = |chunk: &[u8]| {
        if chunk.starts_with(&SOI) && !current.is_empty() {
            frames.push(Bytes::from(std::mem::take(&mut current)));
        }
        if chunk.starts_with(&SOI) || !current.is_empty() {
            current.extend_from_slice(chunk);
        }
    };
    aligner.feed(data, &mut collect);
    aligner.finish(&mut collect);
    drop(collect);

    if !current.is_empty() {
        frames.push(Bytes::from(current));
    }
    frames
}
