//! Bit-level output for the DEFLATE encoder
//!
//! DEFLATE packs header fields and extra bits least-significant-bit first,
//! while Huffman codes are emitted starting from their most significant bit.
//! The writer keeps the partially filled byte at the end of its buffer the
//! same way PKLib's `OutputBits` does.

/// Append-only bit writer over a byte vector
#[derive(Debug, Default, Clone)]
pub struct BitWriter {
    out: Vec<u8>,
    /// Number of bits already used in the last byte of `out` (0 = byte aligned)
    bit_pos: u8,
}

impl BitWriter {
    /// Create an empty writer
    pub fn new() -> Self {
        Self::default()
    }

    /// Continue writing after existing bytes (byte aligned)
    pub fn with_bytes(out: Vec<u8>) -> Self {
        Self { out, bit_pos: 0 }
    }

    /// Emit a single bit
    pub fn write_bit(&mut self, bit: bool) {
        if self.bit_pos == 0 {
            self.out.push(0);
        }
        if bit {
            let last = self.out.len() - 1;
            self.out[last] |= 1 << self.bit_pos;
        }
        self.bit_pos = (self.bit_pos + 1) & 7;
    }

    /// Emit the low `n_bits` of `value`, least significant bit first
    pub fn write_bits(&mut self, value: u32, n_bits: u32) {
        for i in 0..n_bits {
            self.write_bit((value >> i) & 1 != 0);
        }
    }

    /// Emit a Huffman code of `length` bits, most significant bit first
    pub fn write_huffman_bits(&mut self, code: u32, length: u32) {
        for i in (0..length).rev() {
            self.write_bit((code >> i) & 1 != 0);
        }
    }

    /// Pad with zero bits up to the next byte boundary
    pub fn align_to_byte(&mut self) {
        self.bit_pos = 0;
    }

    /// Emit a whole byte; the stream must be byte aligned
    pub fn write_byte(&mut self, byte: u8) {
        debug_assert_eq!(self.bit_pos, 0);
        self.out.push(byte);
    }

    /// Emit a run of whole bytes; the stream must be byte aligned
    pub fn write_bytes(&mut self, bytes: &[u8]) {
        debug_assert_eq!(self.bit_pos, 0);
        self.out.extend_from_slice(bytes);
    }

    /// Total number of bits written so far
    pub fn bit_len(&self) -> usize {
        if self.bit_pos == 0 {
            self.out.len() * 8
        } else {
            (self.out.len() - 1) * 8 + self.bit_pos as usize
        }
    }

    /// Bytes written so far, the last one possibly partial
    pub fn as_bytes(&self) -> &[u8] {
        &self.out
    }

    /// Finish and return the output buffer
    pub fn into_inner(self) -> Vec<u8> {
        self.out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lsb_first_bits() {
        let mut writer = BitWriter::new();
        writer.write_bits(0b101, 3);
        writer.write_bits(0b11111, 5);
        assert_eq!(writer.bit_len(), 8);
        assert_eq!(writer.into_inner(), vec![0b1111_1101]);
    }

    #[test]
    fn test_huffman_bits_are_reversed() {
        let mut writer = BitWriter::new();
        writer.write_huffman_bits(0b110, 3);
        assert_eq!(writer.as_bytes(), &[0b011]);
    }

    #[test]
    fn test_align_and_bytes() {
        let mut writer = BitWriter::with_bytes(vec![0x78, 0xDA]);
        writer.write_bit(true);
        writer.align_to_byte();
        writer.write_byte(0xAB);
        writer.write_bytes(&[1, 2]);
        assert_eq!(writer.bit_len(), 6 * 8);
        assert_eq!(writer.into_inner(), vec![0x78, 0xDA, 0x01, 0xAB, 1, 2]);
    }

    #[test]
    fn test_bits_span_bytes() {
        let mut writer = BitWriter::new();
        writer.write_bits(0x3FF, 10);
        assert_eq!(writer.bit_len(), 10);
        assert_eq!(writer.as_bytes(), &[0xFF, 0x03]);
    }
}
