//! Framing strategies that can feed a [`crate::ProtoHandler`]

use core::mem;

use crate::{
    CandidateFrame, ExtractorStats, FrameSource, RawByteCursor, ESCAPE_XOR, FRAME_ESCAPE,
    FRAME_FLAG, FRAME_OVERHEAD, FRAME_START, MAX_FRAME_CAPACITY,
};

const DEFAULT_MAX_FRAME_LEN: usize = 32;

fn clamp_frame_len(max_frame_len: usize) -> usize {
    max_frame_len.clamp(FRAME_OVERHEAD, MAX_FRAME_CAPACITY)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PrefixState {
    Hunting,
    Length,
    Body { expected: usize },
    /// Remainder of an oversized frame, payload and CRC
    Skipping { remaining: usize },
}

/// Packetizer for the fill sensor's native wire format:
///
/// `0xA5 | LEN | PAYLOAD[LEN] | CRC8`
///
/// The emitted candidate is `LEN | PAYLOAD | CRC8`. When the declared
/// length would make the frame longer than `max_frame_len`, the frame is
/// dropped: its `LEN + 1` remaining bytes are discarded unseen, so no
/// candidate is ever taken from inside it, and hunting resumes after.
#[derive(Debug)]
pub struct FillSensorPacketizer {
    state: PrefixState,
    frame: CandidateFrame,
    max_frame_len: usize,
    stats: ExtractorStats,
}

impl FillSensorPacketizer {
    pub fn new(max_frame_len: usize) -> Self {
        Self {
            state: PrefixState::Hunting,
            frame: CandidateFrame::new(),
            max_frame_len: clamp_frame_len(max_frame_len),
            stats: ExtractorStats::default(),
        }
    }

    pub fn max_frame_len(&self) -> usize {
        self.max_frame_len
    }
}

impl Default for FillSensorPacketizer {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_FRAME_LEN)
    }
}

impl FrameSource for FillSensorPacketizer {
    fn next_frame(&mut self, cursor: &mut RawByteCursor<'_>) -> Option<CandidateFrame> {
        while let Some(byte) = cursor.next_byte() {
            match self.state {
                PrefixState::Hunting => {
                    if byte == FRAME_START {
                        self.frame.clear();
                        self.state = PrefixState::Length;
                    } else {
                        self.stats.discarded_bytes += 1;
                    }
                }
                PrefixState::Length => {
                    let expected = byte as usize + FRAME_OVERHEAD;
                    if expected <= self.max_frame_len && self.frame.push(byte).is_ok() {
                        self.state = PrefixState::Body { expected };
                    } else if byte == FRAME_START {
                        // previous marker was noise, this one may be real
                        self.stats.discarded_bytes += 1;
                    } else {
                        log::debug!(
                            "Dropping frame with declared length {byte}, max frame is {}",
                            self.max_frame_len
                        );
                        self.stats.oversize_drops += 1;
                        self.state = PrefixState::Skipping {
                            remaining: byte as usize + 1,
                        };
                    }
                }
                PrefixState::Skipping { remaining } => {
                    self.stats.discarded_bytes += 1;
                    self.state = match remaining - 1 {
                        0 => PrefixState::Hunting,
                        remaining => PrefixState::Skipping { remaining },
                    };
                }
                PrefixState::Body { expected } => {
                    if self.frame.push(byte).is_err() {
                        self.stats.oversize_drops += 1;
                        self.state = PrefixState::Hunting;
                        continue;
                    }
                    if self.frame.len() == expected {
                        self.state = PrefixState::Hunting;
                        self.stats.frames += 1;
                        return Some(mem::take(&mut self.frame));
                    }
                }
            }
        }
        None
    }

    fn stats(&self) -> ExtractorStats {
        self.stats
    }

    fn reset(&mut self) {
        self.frame.clear();
        self.state = PrefixState::Hunting;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DelimitedState {
    Hunting,
    InFrame,
    Escaped,
    Overflow,
}

/// HDLC style framing: `0x7E | escaped(LEN | PAYLOAD | CRC8) | 0x7E`.
///
/// `0x7E` and `0x7D` inside a frame are sent as `0x7D, byte ^ 0x20`.
/// A flag both closes the current frame and opens the next one, and
/// empty frames between back to back flags are skipped. Frames that grow
/// past `max_frame_len` are dropped up to the next flag.
#[derive(Debug)]
pub struct DelimitedPacketizer {
    state: DelimitedState,
    frame: CandidateFrame,
    max_frame_len: usize,
    stats: ExtractorStats,
}

impl DelimitedPacketizer {
    pub fn new(max_frame_len: usize) -> Self {
        Self {
            state: DelimitedState::Hunting,
            frame: CandidateFrame::new(),
            max_frame_len: clamp_frame_len(max_frame_len),
            stats: ExtractorStats::default(),
        }
    }

    pub fn max_frame_len(&self) -> usize {
        self.max_frame_len
    }

    fn accept(&mut self, byte: u8) {
        if self.frame.len() >= self.max_frame_len || self.frame.push(byte).is_err() {
            log::debug!(
                "Frame exceeded {} bytes, discarding until next flag",
                self.max_frame_len
            );
            self.stats.oversize_drops += 1;
            self.frame.clear();
            self.state = DelimitedState::Overflow;
        }
    }
}

impl Default for DelimitedPacketizer {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_FRAME_LEN)
    }
}

impl FrameSource for DelimitedPacketizer {
    fn next_frame(&mut self, cursor: &mut RawByteCursor<'_>) -> Option<CandidateFrame> {
        while let Some(byte) = cursor.next_byte() {
            match (self.state, byte) {
                (DelimitedState::Hunting, FRAME_FLAG) | (DelimitedState::Overflow, FRAME_FLAG) => {
                    self.frame.clear();
                    self.state = DelimitedState::InFrame;
                }
                (DelimitedState::Hunting, _) => self.stats.discarded_bytes += 1,
                (DelimitedState::Overflow, _) => {}
                (DelimitedState::InFrame, FRAME_FLAG) => {
                    if self.frame.is_empty() {
                        continue;
                    }
                    self.stats.frames += 1;
                    return Some(mem::take(&mut self.frame));
                }
                (DelimitedState::InFrame, FRAME_ESCAPE) => self.state = DelimitedState::Escaped,
                (DelimitedState::InFrame, _) => self.accept(byte),
                (DelimitedState::Escaped, FRAME_FLAG) => {
                    // escape followed by a flag aborts the frame
                    self.stats.discarded_bytes += self.frame.len() as u32 + 1;
                    self.frame.clear();
                    self.state = DelimitedState::InFrame;
                }
                (DelimitedState::Escaped, _) => {
                    self.state = DelimitedState::InFrame;
                    self.accept(byte ^ ESCAPE_XOR);
                }
            }
        }
        None
    }

    fn stats(&self) -> ExtractorStats {
        self.stats
    }

    fn reset(&mut self) {
        self.frame.clear();
        self.state = DelimitedState::Hunting;
    }
}
