//! Camera capture: turns a sensor's MJPEG byte stream into the latest frame.
//!
//! [`worker::CaptureWorker`] owns the device on its own thread, pushes every
//! chunk through a [`splitter::FrameSplitter`] and publishes completed frames
//! into a shared [`gimbal_cam_common::frame::FrameSlot`].

pub mod chunker;
pub mod driver;
pub mod splitter;
pub mod worker;

pub use driver::{CameraDevice, CameraDriver, CameraError, CameraSettings, ChunkSink};
pub use splitter::FrameSplitter;
pub use worker::{CaptureError, CaptureHandle, CaptureSettings, CaptureState, CaptureWorker};
