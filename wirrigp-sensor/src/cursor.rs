/// Read position over one delivery of bytes from the sensor transport.
///
/// Packetizers pull bytes one at a time, so a delivery that contains
/// several frames can be drained lazily: whatever has not been consumed
/// when a frame completes is picked up by the next call.
#[derive(Debug, Clone)]
pub struct RawByteCursor<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> RawByteCursor<'a> {
    pub fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, pos: 0 }
    }

    pub fn next_byte(&mut self) -> Option<u8> {
        let byte = self.bytes.get(self.pos).copied()?;
        self.pos += 1;
        Some(byte)
    }

    pub fn remaining(&self) -> &'a [u8] {
        &self.bytes[self.pos..]
    }

    pub fn consumed(&self) -> usize {
        self.pos
    }

    pub fn is_empty(&self) -> bool {
        self.pos >= self.bytes.len()
    }
}

impl Iterator for RawByteCursor<'_> {
    type Item = u8;

    fn next(&mut self) -> Option<u8> {
        self.next_byte()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn drains_in_order() {
        let mut cursor = RawByteCursor::new(&[1, 2, 3]);
        assert_eq!(cursor.next_byte(), Some(1));
        assert_eq!(cursor.remaining(), &[2, 3]);
        assert_eq!(cursor.consumed(), 1);
        assert_eq!(cursor.by_ref().count(), 2);
        assert!(cursor.is_empty());
        assert_eq!(cursor.next_byte(), None);
    }
}
