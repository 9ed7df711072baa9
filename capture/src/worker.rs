use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use gimbal_cam_common::config::CameraConfig;
use gimbal_cam_common::frame::{Frame, FrameSlot};
use tokio::sync::watch;
use tracing::{debug, error, info, trace, warn};

use crate::driver::{CameraDevice, CameraDriver, CameraError, CameraSettings};
use crate::splitter::FrameSplitter;

/// Lifecycle of the capture thread.
///
/// `Idle → Configuring → Streaming → Stopping → Closed`, or `Failed` when the
/// camera could not be opened or the stream broke. The device is always
/// released before `Closed` or `Failed` is published.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CaptureState {
    Idle,
    Configuring,
    Streaming,
    Stopping,
    Closed,
    Failed(String),
}

impl CaptureState {
    pub fn as_str(&self) -> &'static str {
        match self {
            CaptureState::Idle => "idle",
            CaptureState::Configuring => "configuring",
            CaptureState::Streaming => "streaming",
            CaptureState::Stopping => "stopping",
            CaptureState::Closed => "closed",
            CaptureState::Failed(_) => "failed",
        }
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, CaptureState::Failed(_))
    }
}

impl fmt::Display for CaptureState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CaptureState::Failed(reason) => write!(f, "failed: {reason}"),
            other => f.write_str(other.as_str()),
        }
    }
}

#[derive(Debug, Clone)]
pub struct CaptureSettings {
    pub camera: CameraSettings,
    /// Sleep between open and streaming so auto-exposure can settle.
    pub warmup: Duration,
    /// How often the stop signal is checked; bounds stop latency.
    pub poll_interval: Duration,
}

impl From<&CameraConfig> for CaptureSettings {
    fn from(config: &CameraConfig) -> Self {
        Self {
            camera: CameraSettings::from(config),
            warmup: config.warmup(),
            poll_interval: config.poll_interval(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CaptureError {
    #[error("failed to spawn capture thread: {0}")]
    Thread(std::io::Error),
}

/// Read side of a running capture: the frame slot plus its state.
///
/// Cheap to clone; this is what request handlers hold.
#[derive(Debug, Clone)]
pub struct CaptureHandle {
    slot: FrameSlot,
    state: watch::Receiver<CaptureState>,
}

impl CaptureHandle {
    /// Build a handle from parts, for callers that drive the slot themselves.
    pub fn new(slot: FrameSlot, state: watch::Receiver<CaptureState>) -> Self {
        Self { slot, state }
    }

    pub fn current_frame(&self) -> Option<Frame> {
        self.slot.latest()
    }

    pub fn state(&self) -> CaptureState {
        self.state.borrow().clone()
    }
}

/// Owns the camera on a dedicated thread and keeps the frame slot current.
pub struct CaptureWorker {
    handle: CaptureHandle,
    stop: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl CaptureWorker {
    /// Start the capture thread. Camera failures do not surface here; they
    /// show up as [`CaptureState::Failed`].
    pub fn spawn(
        driver: Box<dyn CameraDriver>,
        settings: CaptureSettings,
        slot: FrameSlot,
    ) -> Result<Self, CaptureError> {
        let (state_tx, state_rx) = watch::channel(CaptureState::Idle);
        let stop = Arc::new(AtomicBool::new(false));

        let thread = {
            let slot = slot.clone();
            let stop = Arc::clone(&stop);
            thread::Builder::new()
                .name("capture".into())
                .spawn(move || run(driver.as_ref(), &settings, &slot, &state_tx, &stop))
                .map_err(CaptureError::Thread)?
        };

        Ok(Self {
            handle: CaptureHandle::new(slot, state_rx),
            stop,
            thread: Some(thread),
        })
    }

    /// Ask the thread to wind down. Safe to call more than once.
    pub fn stop(&self) {
        if !self.stop.swap(true, Ordering::AcqRel) {
            info!("capture stop requested");
        }
    }

    /// Wait for the capture thread to exit. Call [`stop`](Self::stop) first.
    pub fn join(mut self) {
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                error!("capture thread panicked");
            }
        }
    }

    pub fn current_frame(&self) -> Option<Frame> {
        self.handle.current_frame()
    }

    pub fn state(&self) -> CaptureState {
        self.handle.state()
    }

    pub fn handle(&self) -> CaptureHandle {
        self.handle.clone()
    }
}

impl Drop for CaptureWorker {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Release);
    }
}

fn set_state(tx: &watch::Sender<CaptureState>, state: CaptureState) {
    info!(state = %state, "capture state");
    tx.send_replace(state);
}

fn run(
    driver: &dyn CameraDriver,
    settings: &CaptureSettings,
    slot: &FrameSlot,
    state: &watch::Sender<CaptureState>,
    stop: &AtomicBool,
) {
    set_state(state, CaptureState::Configuring);
    info!(
        driver = driver.name(),
        width = settings.camera.width,
        height = settings.camera.height,
        framerate = settings.camera.framerate,
        "opening camera"
    );

    let mut device = match driver.open(&settings.camera) {
        Ok(device) => device,
        Err(e) => {
            error!(error = %e, "failed to open camera, frames will not update");
            set_state(state, CaptureState::Failed(e.to_string()));
            return;
        }
    };

    let result = stream(device.as_mut(), settings, slot, state, stop);

    set_state(state, CaptureState::Stopping);
    if let Err(e) = device.stop_streaming() {
        warn!(error = %e, "failed to stop camera stream");
    }
    device.close();

    match result {
        Ok(()) => set_state(state, CaptureState::Closed),
        Err(e) => {
            error!(error = %e, "camera stream failed, frames will not update");
            set_state(state, CaptureState::Failed(e.to_string()));
        }
    }
}

fn stream(
    device: &mut dyn CameraDevice,
    settings: &CaptureSettings,
    slot: &FrameSlot,
    state: &watch::Sender<CaptureState>,
    stop: &AtomicBool,
) -> Result<(), CameraError> {
    if !sleep_unless_stopped(stop, settings.warmup, settings.poll_interval) {
        debug!("stopped during warm-up");
        return Ok(());
    }

    let mut splitter = FrameSplitter::new();
    let sink_slot = slot.clone();
    device.start_streaming(Box::new(move |chunk: &[u8]| {
        if let Some(frame) = splitter.push(chunk) {
            trace!(seq = frame.seq, bytes = frame.len(), "publishing frame");
            sink_slot.publish(frame);
        }
    }))?;
    set_state(state, CaptureState::Streaming);

    while !stop.load(Ordering::Acquire) {
        device.wait_streaming(settings.poll_interval)?;
    }
    Ok(())
}

/// Sleep for `total` in steps of `step`. Returns `false` if stopped early.
fn sleep_unless_stopped(stop: &AtomicBool, total: Duration, step: Duration) -> bool {
    let deadline = Instant::now() + total;
    loop {
        if stop.load(Ordering::Acquire) {
            return false;
        }
        let now = Instant::now();
        if now >= deadline {
            return true;
        }
        thread::sleep(step.min(deadline - now));
    }
}
