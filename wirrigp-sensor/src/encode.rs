//! Inverse of the decode path, used to synthesize sensor traffic in
//! tests and the replay harness. Enabled with the `encoder` feature.

use crate::{
    crc8, CandidateFrame, FillSensorReading, ESCAPE_XOR, FRAME_ESCAPE, FRAME_FLAG, FRAME_START,
    MAX_FRAME_CAPACITY,
};

/// Worst case wire size: every byte escaped plus two flags
pub const MAX_WIRE_LEN: usize = 2 * MAX_FRAME_CAPACITY + 2;

pub type WireFrame = heapless::Vec<u8, MAX_WIRE_LEN>;

/// Payload bytes for `reading`: the basic layout without status or
/// quality, the extended one with both. Status flags without a quality
/// have no wire form and give `None`.
pub fn payload(reading: &FillSensorReading) -> Option<heapless::Vec<u8, 6>> {
    let mut payload = heapless::Vec::new();
    payload.extend(reading.fill_permille.to_be_bytes());
    payload.extend(reading.sequence.to_be_bytes());
    match reading.quality {
        Some(quality) => payload.extend([reading.status.bits(), quality]),
        None if reading.status.is_empty() => {}
        None => return None,
    }
    Some(payload)
}

/// `LEN | payload | CRC8`, or `None` if the payload does not fit
pub fn frame_from_payload(payload: &[u8]) -> Option<CandidateFrame> {
    if payload.len() + 2 > MAX_FRAME_CAPACITY {
        return None;
    }
    let mut bytes: heapless::Vec<u8, MAX_FRAME_CAPACITY> = heapless::Vec::new();
    bytes.extend([payload.len() as u8]);
    bytes.extend(payload.iter().copied());
    bytes.extend([crc8(&bytes)]);
    CandidateFrame::from_slice(&bytes)
}

/// Candidate frame for `reading`. A reading [`payload`] rejects yields
/// an empty candidate, which the decoder refuses as too short.
pub fn candidate(reading: &FillSensorReading) -> CandidateFrame {
    payload(reading)
        .and_then(|payload| frame_from_payload(&payload))
        .unwrap_or_default()
}

/// Wrap a candidate in the fill sensor's length-prefixed framing
pub fn wrap_length_prefixed(frame: &CandidateFrame) -> WireFrame {
    let mut wire = WireFrame::new();
    wire.extend([FRAME_START]);
    wire.extend(frame.iter().copied());
    wire
}

/// Wrap a candidate in HDLC style flags, escaping as needed
pub fn wrap_delimited(frame: &CandidateFrame) -> WireFrame {
    let mut wire = WireFrame::new();
    wire.extend([FRAME_FLAG]);
    for &byte in frame.iter() {
        if byte == FRAME_FLAG || byte == FRAME_ESCAPE {
            wire.extend([FRAME_ESCAPE, byte ^ ESCAPE_XOR]);
        } else {
            wire.extend([byte]);
        }
    }
    wire.extend([FRAME_FLAG]);
    wire
}

pub fn length_prefixed(reading: &FillSensorReading) -> WireFrame {
    wrap_length_prefixed(&candidate(reading))
}

pub fn delimited(reading: &FillSensorReading) -> WireFrame {
    wrap_delimited(&candidate(reading))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{DecodeError, FillSensorProtoHandler, FillSensorPacketizer, StatusFlags};

    #[test]
    fn status_without_quality_has_no_wire_form() {
        let reading = FillSensorReading {
            fill_permille: 300,
            sequence: 4,
            status: StatusFlags::SENSOR_FAULT,
            quality: None,
            missed: 0,
        };
        assert!(payload(&reading).is_none());
        assert!(candidate(&reading).is_empty());

        let mut handler = FillSensorProtoHandler::new(FillSensorPacketizer::default());
        assert!(matches!(
            handler.decode(&candidate(&reading)),
            Err(DecodeError::LengthMismatch { .. })
        ));
    }

    #[test]
    fn layout_follows_quality() {
        let basic = FillSensorReading {
            fill_permille: 300,
            sequence: 4,
            ..Default::default()
        };
        assert_eq!(payload(&basic).map(|p| p.len()), Some(4));

        let extended = FillSensorReading {
            quality: Some(0),
            ..basic
        };
        assert_eq!(payload(&extended).map(|p| p.len()), Some(6));
    }
}
