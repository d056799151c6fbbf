use core::ops::Deref;

use crate::{RawByteCursor, MAX_FRAME_CAPACITY};

/// A byte span believed to be one protocol message: `LEN | PAYLOAD | CRC`
/// with start markers and escapes already stripped by the packetizer.
/// Nothing has been validated yet, see [`crate::ProtoHandler::decode`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CandidateFrame(heapless::Vec<u8, MAX_FRAME_CAPACITY>);

impl CandidateFrame {
    pub fn new() -> Self {
        Self(heapless::Vec::new())
    }

    /// Returns `None` if `bytes` does not fit in [`MAX_FRAME_CAPACITY`]
    pub fn from_slice(bytes: &[u8]) -> Option<Self> {
        heapless::Vec::from_slice(bytes).ok().map(Self)
    }

    pub(crate) fn push(&mut self, byte: u8) -> Result<(), u8> {
        self.0.push(byte)
    }

    pub(crate) fn clear(&mut self) {
        self.0.clear()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl Deref for CandidateFrame {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        &self.0
    }
}

/// Counters kept by every packetizer
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExtractorStats {
    /// Candidate frames handed out
    pub frames: u32,
    /// Bytes thrown away while hunting for a start marker
    pub discarded_bytes: u32,
    /// Frames dropped for exceeding the maximum frame length
    pub oversize_drops: u32,
}

/// Framing capability the decoder depends on. Implementations own
/// whatever partial-frame state they need, so bytes may be delivered in
/// arbitrary chunks.
///
/// Implementations must never fail on malformed input; the worst case
/// is that no frame comes out and the bytes are consumed.
pub trait FrameSource {
    /// Consume bytes from `cursor` until one frame completes or the
    /// cursor runs dry. Unconsumed bytes stay in the cursor.
    fn next_frame(&mut self, cursor: &mut RawByteCursor<'_>) -> Option<CandidateFrame>;

    fn stats(&self) -> ExtractorStats;

    /// Drop any partially assembled frame and go back to hunting
    fn reset(&mut self);

    /// Lazily iterate over all frames completed by `bytes`
    fn frames<'s, 'a>(&'s mut self, bytes: &'a [u8]) -> Frames<'s, 'a, Self>
    where
        Self: Sized,
    {
        Frames {
            source: self,
            cursor: RawByteCursor::new(bytes),
        }
    }
}

/// Iterator returned by [`FrameSource::frames`]
pub struct Frames<'s, 'a, P: FrameSource> {
    source: &'s mut P,
    cursor: RawByteCursor<'a>,
}

impl<P: FrameSource> Iterator for Frames<'_, '_, P> {
    type Item = CandidateFrame;

    fn next(&mut self) -> Option<CandidateFrame> {
        if self.cursor.is_empty() {
            return None;
        }
        self.source.next_frame(&mut self.cursor)
    }
}
