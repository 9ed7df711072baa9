use bytes::BytesMut;
use chrono::Utc;
use gimbal_cam_common::frame::Frame;
use tracing::trace;

/// JPEG start-of-image marker. Every MJPEG frame begins with it.
pub const SOI: [u8; 2] = [0xFF, 0xD8];

/// Cuts a chunked MJPEG stream into frames.
///
/// The camera delivers each frame as one or more chunks, the first of which
/// starts with [`SOI`]. A frame is only known to be complete once the *next*
/// frame's marker arrives, so the splitter always runs one frame behind the
/// sensor: `push` returns the previous accumulation, never the frame whose
/// marker triggered it. Whatever is still accumulating when the stream ends
/// is never emitted.
///
/// No JPEG validation is done beyond the marker; a malformed stream simply
/// yields malformed frames.
pub struct FrameSplitter {
    /// Bytes of the in-progress frame.
    buffer: BytesMut,
    next_seq: u64,
}

impl FrameSplitter {
    pub fn new() -> Self {
        Self {
            buffer: BytesMut::with_capacity(64 * 1024),
            next_seq: 0,
        }
    }

    /// Feed the next chunk. Returns the frame completed by this chunk, if any.
    ///
    /// Bytes received before the first marker are kept and become the head
    /// of the first emitted frame. An empty accumulation (the stream opened
    /// exactly on a marker) is dropped rather than emitted as a zero-length
    /// frame.
    pub fn push(&mut self, chunk: &[u8]) -> Option<Frame> {
        let mut completed = None;

        if chunk.starts_with(&SOI) {
            let data = self.buffer.split().freeze();
            if !data.is_empty() {
                let seq = self.next_seq;
                self.next_seq += 1;
                trace!(seq, bytes = data.len(), "frame complete");
                completed = Some(Frame::new(data, Utc::now().timestamp_millis(), seq));
            }
        }

        self.buffer.extend_from_slice(chunk);
        completed
    }

    /// Number of bytes accumulated for the in-progress frame.
    pub fn pending_len(&self) -> usize {
        self.buffer.len()
    }
}

impl Default for FrameSplitter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame_chunks(body: u8, parts: usize) -> Vec<Vec<u8>> {
        let mut chunks = vec![vec![0xFF, 0xD8, body]];
        for i in 0..parts {
            chunks.push(vec![body, i as u8]);
        }
        chunks
    }

    #[test]
    fn publishes_previous_accumulation_on_next_marker() {
        let mut splitter = FrameSplitter::new();
        let first = frame_chunks(0xA0, 3);
        let mut expected = Vec::new();
        for chunk in &first {
            assert!(splitter.push(chunk).is_none());
            expected.extend_from_slice(chunk);
        }

        let frame = splitter.push(&[0xFF, 0xD8, 0xB0]).expect("second marker completes the first frame");
        assert_eq!(frame.data(), expected.as_slice());
        assert_eq!(frame.seq, 0);
        // The triggering chunk starts the next accumulation.
        assert_eq!(splitter.pending_len(), 3);
    }

    #[test]
    fn never_publishes_without_a_marker() {
        let mut splitter = FrameSplitter::new();
        for i in 0..100u8 {
            assert!(splitter.push(&[i, 0x00, 0xD8, 0xFF]).is_none());
        }
        assert_eq!(splitter.pending_len(), 400);
    }

    #[test]
    fn marker_inside_a_chunk_does_not_split() {
        let mut splitter = FrameSplitter::new();
        assert!(splitter.push(&[0xFF, 0xD8, 0x01]).is_none());
        // Marker at offset 1 is ignored; only the chunk start counts.
        assert!(splitter.push(&[0x00, 0xFF, 0xD8]).is_none());
        let frame = splitter.push(&[0xFF, 0xD8]).unwrap();
        assert_eq!(frame.data(), &[0xFF, 0xD8, 0x01, 0x00, 0xFF, 0xD8]);
    }

    #[test]
    fn leading_garbage_joins_the_first_frame() {
        let mut splitter = FrameSplitter::new();
        assert!(splitter.push(&[0x12, 0x34]).is_none());
        let frame = splitter.push(&[0xFF, 0xD8, 0x00]).unwrap();
        assert_eq!(frame.data(), &[0x12, 0x34]);
    }

    #[test]
    fn stream_starting_on_marker_emits_no_empty_frame() {
        let mut splitter = FrameSplitter::new();
        assert!(splitter.push(&[0xFF, 0xD8, 0x01]).is_none());
        let frame = splitter.push(&[0xFF, 0xD8, 0x02]).unwrap();
        assert_eq!(frame.data(), &[0xFF, 0xD8, 0x01]);
        assert_eq!(frame.seq, 0);
    }

    #[test]
    fn every_publish_is_the_concatenation_since_the_last() {
        let mut splitter = FrameSplitter::new();
        let mut since_last: Vec<u8> = Vec::new();
        let mut published = 0u64;

        // Frames of varying chunk counts, including single-chunk frames.
        for (n, parts) in [0usize, 4, 1, 0, 7, 2].iter().enumerate() {
            for chunk in frame_chunks(n as u8, *parts) {
                let result = splitter.push(&chunk);
                if chunk.starts_with(&SOI) && !since_last.is_empty() {
                    let frame = result.expect("marker chunk publishes");
                    assert_eq!(frame.data(), since_last.as_slice());
                    assert_eq!(frame.seq, published);
                    published += 1;
                    since_last.clear();
                } else {
                    assert!(result.is_none());
                }
                since_last.extend_from_slice(&chunk);
            }
        }
        assert_eq!(published, 5);
        assert_eq!(splitter.pending_len(), since_last.len());
    }
}
