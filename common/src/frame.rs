use bytes::Bytes;
use tokio::sync::watch;

/// One complete JPEG image cut from the camera's MJPEG stream.
///
/// Frames are immutable once built. Cloning shares the underlying buffer, so
/// handing a frame to many readers never copies the image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    data: Bytes,
    /// Wall-clock time the frame was completed (Unix millis).
    pub captured_at_ms: i64,
    /// Sequence number assigned by the splitter, starting at 0.
    pub seq: u64,
}

impl Frame {
    pub fn new(data: impl Into<Bytes>, captured_at_ms: i64, seq: u64) -> Self {
        Self {
            data: data.into(),
            captured_at_ms,
            seq,
        }
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Cheap handle on the JPEG bytes, suitable for a response body.
    pub fn bytes(&self) -> Bytes {
        self.data.clone()
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Milliseconds elapsed between capture and `now_ms`, clamped at zero.
    pub fn age_ms(&self, now_ms: i64) -> u64 {
        now_ms.saturating_sub(self.captured_at_ms).max(0) as u64
    }
}

/// Single-value store holding the most recently published frame.
///
/// One writer (the capture worker) replaces the value; any number of readers
/// take a clone of whatever is current. Replacement swaps the whole `Frame`
/// under the channel's lock, so a reader sees either the old or the new frame,
/// never a mix. No history is kept.
#[derive(Debug, Clone)]
pub struct FrameSlot {
    tx: watch::Sender<Option<Frame>>,
}

impl FrameSlot {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(None);
        Self { tx }
    }

    /// Replace the current frame.
    pub fn publish(&self, frame: Frame) {
        self.tx.send_replace(Some(frame));
    }

    /// The latest frame, or `None` before the first one completes.
    pub fn latest(&self) -> Option<Frame> {
        self.tx.borrow().clone()
    }
}

impl Default for FrameSlot {
    fn default() -> Self {
        Self::new()
    }
}
