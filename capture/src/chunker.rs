use crate::splitter::SOI;

/// Re-cuts an arbitrary byte stream so frame markers land on chunk starts.
///
/// Pipes and files deliver reads of whatever size the OS chooses, but the
/// splitter only recognises a frame boundary at the beginning of a chunk.
/// The aligner splits each read in front of every [`SOI`] marker. A trailing
/// `0xFF` is held back until the next read because it may be the first half
/// of a marker that straddles two reads.
#[derive(Debug, Default)]
pub struct MarkerAligner {
    held_ff: bool,
}

impl MarkerAligner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Split `data` and hand each piece to `emit`, in order.
    pub fn feed<F>(&mut self, data: &[u8], mut emit: F)
    where
        F: FnMut(&[u8]),
    {
        if data.is_empty() {
            return;
        }

        let stitched;
        let buf: &[u8] = if self.held_ff {
            stitched = [&[0xFF][..], data].concat();
            &stitched
        } else {
            data
        };
        self.held_ff = false;

        let mut end = buf.len();
        if buf[end - 1] == 0xFF {
            end -= 1;
            self.held_ff = true;
        }
        let body = &buf[..end];

        let mut start = 0;
        for pos in marker_positions(body) {
            if pos > start {
                emit(&body[start..pos]);
                start = pos;
            }
        }
        if start < body.len() {
            emit(&body[start..]);
        }
    }

    /// Flush a held-back byte at end of stream.
    pub fn finish<F>(&mut self, mut emit: F)
    where
        F: FnMut(&[u8]),
    {
        if self.held_ff {
            self.held_ff = false;
            emit(&[0xFF]);
        }
    }
}

/// Offsets of every [`SOI`] marker in `haystack`.
fn marker_positions(haystack: &[u8]) -> impl Iterator<Item = usize> + '_ {
    haystack
        .windows(SOI.len())
        .enumerate()
        .filter(|(_, window)| *window == SOI)
        .map(|(pos, _)| pos)
}
