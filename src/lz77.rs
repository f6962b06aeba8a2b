//! Legacy fixed-window LZ77 decoder
//!
//! Chunks compressed with method 1 use a small proprietary LZ77 variant: a
//! 4096-byte circular window, one flag byte per group of eight tokens (read
//! least significant bit first), literal bytes for clear bits and 16-bit
//! little-endian back-references for set bits. A back-reference whose window
//! position is zero terminates the stream.
//!
//! Only decoding is supported; the encoder side writes DEFLATE.

use crate::{HpiError, Result};

/// Size of the circular window (4KB)
pub const WINDOW_SIZE: usize = 0x1000;

const WINDOW_MASK: usize = WINDOW_SIZE - 1;

/// Shortest back-reference length
pub const MIN_MATCH: usize = 2;

/// Decoder state for one legacy LZ77 stream
#[derive(Debug)]
pub struct Lz77Decoder {
    /// Circular history window
    window: [u8; WINDOW_SIZE],
    /// Next window slot to write
    write_pos: usize,
    /// Current position in the input
    in_pos: usize,
    /// Number of bytes produced so far
    out_pos: usize,
}

impl Default for Lz77Decoder {
    fn default() -> Self {
        Self::new()
    }
}

impl Lz77Decoder {
    /// Create a decoder with an empty window
    pub fn new() -> Self {
        Self {
            window: [0; WINDOW_SIZE],
            write_pos: 1,
            in_pos: 0,
            out_pos: 0,
        }
    }

    /// Decode `input` into `output`, returning the number of bytes written
    ///
    /// Decoding stops at the end-of-stream marker. Running out of input once
    /// `output` is full is accepted; running out earlier is an error, as is
    /// any token that would write past the end of `output`.
    pub fn decode(&mut self, input: &[u8], output: &mut [u8]) -> Result<usize> {
        loop {
            let Some(flags) = self.next_byte(input, output.len())? else {
                return Ok(self.out_pos);
            };

            for bit in 0..8 {
                if flags & (1 << bit) == 0 {
                    let Some(byte) = self.next_byte(input, output.len())? else {
                        return Ok(self.out_pos);
                    };
                    self.emit(byte, output)?;
                    continue;
                }

                let (Some(lo), Some(hi)) = (
                    self.next_byte(input, output.len())?,
                    self.next_byte(input, output.len())?,
                ) else {
                    return Err(HpiError::Format(
                        "LZ77 stream truncated inside a back-reference".to_string(),
                    ));
                };
                let word = u16::from_le_bytes([lo, hi]) as usize;
                let mut read_pos = word >> 4;
                if read_pos == 0 {
                    return Ok(self.out_pos);
                }
                let count = (word & 0x0F) + MIN_MATCH;
                for _ in 0..count {
                    let byte = self.window[read_pos];
                    self.emit(byte, output)?;
                    read_pos = (read_pos + 1) & WINDOW_MASK;
                }
            }
        }
    }

    /// Next input byte, or `None` when input ends with the output complete
    fn next_byte(&mut self, input: &[u8], expected: usize) -> Result<Option<u8>> {
        match input.get(self.in_pos) {
            Some(&b) => {
                self.in_pos += 1;
                Ok(Some(b))
            }
            None => self.finish_without_marker(expected).map(|_| None),
        }
    }

    fn finish_without_marker(&self, expected: usize) -> Result<usize> {
        if self.out_pos == expected {
            Ok(self.out_pos)
        } else {
            Err(HpiError::Format(format!(
                "LZ77 stream ended after {} of {} bytes",
                self.out_pos, expected
            )))
        }
    }

    fn emit(&mut self, byte: u8, output: &mut [u8]) -> Result<()> {
        let slot = output.get_mut(self.out_pos).ok_or_else(|| {
            HpiError::Format(format!(
                "LZ77 stream overruns its {} byte output",
                self.out_pos
            ))
        })?;
        *slot = byte;
        self.out_pos += 1;
        self.window[self.write_pos] = byte;
        self.write_pos = (self.write_pos + 1) & WINDOW_MASK;
        Ok(())
    }
}

/// Decode a whole legacy LZ77 payload of known decompressed size
pub fn decompress(input: &[u8], decompressed_len: usize) -> Result<Vec<u8>> {
    let mut output = vec![0u8; decompressed_len];
    let mut decoder = Lz77Decoder::new();
    let written = decoder.decode(input, &mut output)?;
    if written != decompressed_len {
        return Err(HpiError::Format(format!(
            "LZ77 stream produced {} bytes, expected {}",
            written, decompressed_len
        )));
    }
    Ok(output)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reference(pos: usize, len: usize) -> [u8; 2] {
        let word = ((pos << 4) | (len - MIN_MATCH)) as u16;
        word.to_le_bytes()
    }

    #[test]
    fn test_literals_then_marker() {
        // flags: 3 literals, then a back-reference slot
        let input = [0b0000_1000, b'a', b'b', b'c', 0x00, 0x00];
        assert_eq!(decompress(&input, 3).unwrap(), b"abc");
    }

    #[test]
    fn test_back_reference_copies_window() {
        // "abc" lands at window slots 1..=3; copy 6 bytes from slot 1
        let mut input = vec![0b0001_1000, b'a', b'b', b'c'];
        input.extend_from_slice(&reference(1, 6));
        input.extend_from_slice(&[0, 0]);
        assert_eq!(decompress(&input, 9).unwrap(), b"abcabcabc");
    }

    #[test]
    fn test_marker_stops_before_trailing_input() {
        let input = [0b0000_0001, 0x00, 0x00, b'x', b'y', b'z'];
        let mut output = [0xEEu8; 4];
        let mut decoder = Lz77Decoder::new();
        let written = decoder.decode(&input, &mut output).unwrap();
        assert_eq!(written, 0);
        assert_eq!(output, [0xEE; 4]);
    }

    #[test]
    fn test_overrun_is_an_error() {
        let mut input = vec![0b0000_0010, b'a'];
        input.extend_from_slice(&reference(1, 17));
        assert!(decompress(&input, 4).is_err());
    }

    #[test]
    fn test_truncated_stream() {
        let input = [0b0000_0000, b'a'];
        assert!(decompress(&input, 5).is_err());
        // full output without a marker is accepted
        assert_eq!(decompress(&input[..2], 1).unwrap(), b"a");
    }
}
