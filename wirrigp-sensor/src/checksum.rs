const CRC8_POLY: u8 = 0x07;

/// CRC-8 (poly 0x07, init 0x00, no reflection) as computed by the
/// sensor firmware over the length byte and the payload
pub fn crc8(bytes: &[u8]) -> u8 {
    bytes.iter().fold(0u8, |mut crc, &byte| {
        crc ^= byte;
        for _ in 0..8 {
            crc = if crc & 0x80 != 0 {
                (crc << 1) ^ CRC8_POLY
            } else {
                crc << 1
            };
        }
        crc
    })
}
