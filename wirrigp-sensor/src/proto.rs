use core::marker::PhantomData;

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

use crate::{
    crc8, CandidateFrame, DecodeError, ExtractorStats, FrameSource, RawByteCursor, FRAME_OVERHEAD,
};

/// Fill level is reported in tenths of a percent
pub const MAX_FILL_PERMILLE: u16 = 1000;
/// Signal quality is reported in percent
pub const MAX_QUALITY: u8 = 100;

const BASIC_PAYLOAD_LEN: usize = 4;
const EXTENDED_PAYLOAD_LEN: usize = 6;

/// A decoded sensor payload. Implementations parse the payload section
/// of an already validated frame, so any sensor type can sit behind the
/// same [`ProtoHandler`].
pub trait SensorReading: Sized {
    /// `payload` excludes the length and CRC bytes
    fn parse(payload: &[u8]) -> Result<Self, DecodeError>;

    /// Sequence counter used for gap detection, if the sensor has one
    fn sequence(&self) -> Option<u16> {
        None
    }

    /// Called with the number of sequence numbers skipped since the
    /// previous reading
    fn set_missed(&mut self, _missed: u16) {}
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    #[serde(transparent)]
    pub struct StatusFlags: u8 {
        const SENSOR_FAULT = 0x01;
        const LOW_SIGNAL = 0x02;
        const CALIBRATING = 0x04;
        const OVERFLOW = 0x08;
    }
}

impl Default for StatusFlags {
    fn default() -> Self {
        Self::empty()
    }
}

/// Reading reported by the tank fill-level sensor.
///
/// Wire payload, big-endian: `fill_permille u16 | sequence u16` with an
/// optional `status u8 | quality u8` tail.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FillSensorReading {
    pub fill_permille: u16,
    pub sequence: u16,
    pub status: StatusFlags,
    /// Present exactly when the sensor sent the extended layout, which
    /// also carries `status`. Status flags without a quality cannot be
    /// put on the wire.
    pub quality: Option<u8>,
    /// Frames lost between the previous reading and this one
    pub missed: u16,
}

impl FillSensorReading {
    pub fn fill_percent(&self) -> f32 {
        self.fill_permille as f32 / 10.0
    }
}

impl SensorReading for FillSensorReading {
    fn parse(payload: &[u8]) -> Result<Self, DecodeError> {
        if payload.len() != BASIC_PAYLOAD_LEN && payload.len() != EXTENDED_PAYLOAD_LEN {
            return Err(DecodeError::LengthMismatch {
                expected: EXTENDED_PAYLOAD_LEN,
                actual: payload.len(),
            });
        }

        let fill_permille = u16::from_be_bytes([payload[0], payload[1]]);
        if fill_permille > MAX_FILL_PERMILLE {
            return Err(DecodeError::FieldOutOfRange {
                field: "fill_permille",
                value: fill_permille.into(),
            });
        }
        let sequence = u16::from_be_bytes([payload[2], payload[3]]);

        let (status, quality) = if payload.len() == EXTENDED_PAYLOAD_LEN {
            let status =
                StatusFlags::from_bits(payload[4]).ok_or(DecodeError::FieldOutOfRange {
                    field: "status",
                    value: payload[4].into(),
                })?;
            if payload[5] > MAX_QUALITY {
                return Err(DecodeError::FieldOutOfRange {
                    field: "quality",
                    value: payload[5].into(),
                });
            }
            (status, Some(payload[5]))
        } else {
            (StatusFlags::empty(), None)
        };

        Ok(Self {
            fill_permille,
            sequence,
            status,
            quality,
            missed: 0,
        })
    }

    fn sequence(&self) -> Option<u16> {
        Some(self.sequence)
    }

    fn set_missed(&mut self, missed: u16) {
        self.missed = missed;
    }
}

/// Counters kept by a [`ProtoHandler`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DecodeStats {
    pub frames: u32,
    pub readings: u32,
    pub integrity_failures: u32,
    pub length_mismatches: u32,
    pub out_of_range: u32,
    /// Sum of all detected sequence gaps
    pub missed: u32,
}

/// Validates candidate frames and interprets their payload as `R`.
///
/// Generic over the packetizer `P`: the decode path only ever sees a
/// [`CandidateFrame`], never how its boundaries were found.
pub struct ProtoHandler<P: FrameSource, R: SensorReading> {
    packetizer: P,
    last_sequence: Option<u16>,
    stats: DecodeStats,
    _reading: PhantomData<fn() -> R>,
}

/// The protocol handler for the fill-level sensor
pub type FillSensorProtoHandler<P> = ProtoHandler<P, FillSensorReading>;

impl<P: FrameSource, R: SensorReading> ProtoHandler<P, R> {
    pub fn new(packetizer: P) -> Self {
        Self {
            packetizer,
            last_sequence: None,
            stats: DecodeStats::default(),
            _reading: PhantomData,
        }
    }

    pub fn packetizer(&self) -> &P {
        &self.packetizer
    }

    pub fn stats(&self) -> DecodeStats {
        self.stats
    }

    pub fn extractor_stats(&self) -> ExtractorStats {
        self.packetizer.stats()
    }

    /// Run one delivery of transport bytes through extraction and
    /// decode. Every extracted frame produces exactly one call to `sink`,
    /// in stream order. Returns the number of valid readings.
    pub fn process<F>(&mut self, bytes: &[u8], mut sink: F) -> usize
    where
        F: FnMut(Result<R, DecodeError>),
    {
        let mut cursor = RawByteCursor::new(bytes);
        let mut readings = 0;
        while let Some(frame) = self.packetizer.next_frame(&mut cursor) {
            let res = self.decode(&frame);
            match &res {
                Ok(_) => readings += 1,
                Err(e) => log::warn!("Dropping sensor frame: {e:?}"),
            }
            sink(res);
        }
        readings
    }

    /// Validate and interpret one frame. Only the sequence-gap tracker
    /// and the counters are touched.
    pub fn decode(&mut self, frame: &CandidateFrame) -> Result<R, DecodeError> {
        self.stats.frames += 1;
        let res = self.decode_inner(frame);
        match &res {
            Ok(_) => self.stats.readings += 1,
            Err(DecodeError::IntegrityFailure { .. }) => self.stats.integrity_failures += 1,
            Err(DecodeError::LengthMismatch { .. }) => self.stats.length_mismatches += 1,
            Err(DecodeError::FieldOutOfRange { .. }) => self.stats.out_of_range += 1,
        }
        res
    }

    fn decode_inner(&mut self, frame: &CandidateFrame) -> Result<R, DecodeError> {
        let (body, crc) = match frame.split_last() {
            Some((crc, body)) if !body.is_empty() => (body, *crc),
            _ => {
                return Err(DecodeError::LengthMismatch {
                    expected: FRAME_OVERHEAD,
                    actual: frame.len(),
                })
            }
        };

        let expected = crc8(body);
        if expected != crc {
            return Err(DecodeError::IntegrityFailure {
                expected,
                actual: crc,
            });
        }

        let declared = body[0] as usize;
        let payload = &body[1..];
        if declared != payload.len() {
            return Err(DecodeError::LengthMismatch {
                expected: declared,
                actual: payload.len(),
            });
        }

        let mut reading = R::parse(payload)?;
        if let Some(sequence) = reading.sequence() {
            let missed = self.sequence_gap(sequence);
            if missed > 0 {
                log::info!("Sensor skipped {missed} frame(s) before sequence {sequence}");
                self.stats.missed += missed as u32;
            }
            reading.set_missed(missed);
            self.last_sequence = Some(sequence);
        }
        Ok(reading)
    }

    fn sequence_gap(&self, sequence: u16) -> u16 {
        let Some(previous) = self.last_sequence else {
            return 0;
        };
        let delta = sequence.wrapping_sub(previous);
        // duplicates and backwards jumps (sensor restart) are not gaps
        if delta == 0 || delta > u16::MAX / 2 {
            0
        } else {
            delta - 1
        }
    }
}
