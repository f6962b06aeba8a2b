//! SQSH chunk framing
//!
//! Every compressed file is stored as a sequence of independently decodable
//! chunks of at most 64KB of input. Each chunk carries a 19-byte header:
//!
//! ```text
//! 0  magic "SQSH"
//! 4  version (2)
//! 5  compression method (1 = LZ77, 2 = zlib)
//! 6  obfuscation flag
//! 7  compressed size (i32)
//! 11 decompressed size (i32)
//! 15 checksum (i32, wrapping sum of the stored payload bytes)
//! ```

use std::io::{Read, Write};

use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;
use log::trace;

use crate::cipher::{checksum, chunk_deobfuscate};
use crate::common::{CompressionFlavor, CompressionMethod, CHUNK_SIZE, ZOPFLI_BREAK_EVEN};
use crate::zopfli::{zlib_compress, ZopfliOptions};
use crate::{lz77, HpiError, Result};

/// "SQSH" read as a little-endian u32
pub const CHUNK_MAGIC: u32 = 0x4853_5153;

/// The only chunk format version in use
pub const CHUNK_VERSION: u8 = 2;

/// Size of the serialised chunk header
pub const CHUNK_HEADER_SIZE: usize = 19;

/// Parsed chunk header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkHeader {
    /// Payload encoding
    pub method: CompressionMethod,
    /// Payload bytes are obfuscated with the per-chunk transform
    pub obfuscated: bool,
    /// Payload length in bytes
    pub compressed_size: u32,
    /// Length of the decoded data
    pub decompressed_size: u32,
    /// Wrapping byte sum of the payload as stored
    pub checksum: u32,
}

impl ChunkHeader {
    /// Parse and validate a header from the start of `bytes`
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < CHUNK_HEADER_SIZE {
            return Err(HpiError::Format(format!(
                "chunk header needs {} bytes, got {}",
                CHUNK_HEADER_SIZE,
                bytes.len()
            )));
        }

        let magic = read_u32(bytes, 0);
        if magic != CHUNK_MAGIC {
            return Err(HpiError::InvalidMagic {
                expected: CHUNK_MAGIC,
                found: magic,
            });
        }
        if bytes[4] != CHUNK_VERSION {
            return Err(HpiError::UnsupportedVersion(bytes[4] as u32));
        }

        let method = CompressionMethod::from_u8(bytes[5])?;
        if !method.is_chunked() {
            return Err(HpiError::InvalidCompressionMethod(bytes[5]));
        }

        let compressed_size = read_u32(bytes, 7);
        let decompressed_size = read_u32(bytes, 11);
        if compressed_size > i32::MAX as u32 || decompressed_size > CHUNK_SIZE as u32 {
            return Err(HpiError::Format(format!(
                "implausible chunk sizes {} -> {}",
                compressed_size, decompressed_size
            )));
        }

        Ok(Self {
            method,
            obfuscated: bytes[6] != 0,
            compressed_size,
            decompressed_size,
            checksum: read_u32(bytes, 15),
        })
    }

    /// Serialise into the 19-byte on-disk form
    pub fn to_bytes(&self) -> [u8; CHUNK_HEADER_SIZE] {
        let mut out = [0u8; CHUNK_HEADER_SIZE];
        out[0..4].copy_from_slice(&CHUNK_MAGIC.to_le_bytes());
        out[4] = CHUNK_VERSION;
        out[5] = self.method as u8;
        out[6] = self.obfuscated as u8;
        out[7..11].copy_from_slice(&self.compressed_size.to_le_bytes());
        out[11..15].copy_from_slice(&self.decompressed_size.to_le_bytes());
        out[15..19].copy_from_slice(&self.checksum.to_le_bytes());
        out
    }

    /// Header plus payload length
    pub fn frame_size(&self) -> usize {
        CHUNK_HEADER_SIZE + self.compressed_size as usize
    }
}

fn read_u32(bytes: &[u8], at: usize) -> u32 {
    u32::from_le_bytes([bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3]])
}

fn deflate_best(data: &[u8]) -> Result<Vec<u8>> {
    let mut encoder =
        ZlibEncoder::new(Vec::with_capacity(data.len() / 2 + 64), Compression::best());
    encoder.write_all(data)?;
    Ok(encoder.finish()?)
}

/// zlib payload for one chunk under the given flavor
fn zlib_payload(data: &[u8], flavor: CompressionFlavor) -> Result<Vec<u8>> {
    match flavor {
        CompressionFlavor::Store => Err(HpiError::InvalidInput(
            "stored files are not chunked".to_string(),
        )),
        CompressionFlavor::Zopfli { .. } if data.len() < ZOPFLI_BREAK_EVEN => deflate_best(data),
        CompressionFlavor::Deflate => deflate_best(data),
        CompressionFlavor::Zopfli { iterations } => {
            let options = ZopfliOptions::default().with_iteration_count(iterations as usize);
            let zopfli = zlib_compress(&options, data)?;
            let plain = deflate_best(data)?;
            trace!("chunk: zopfli {} bytes, deflate {} bytes", zopfli.len(), plain.len());
            Ok(if zopfli.len() <= plain.len() { zopfli } else { plain })
        }
    }
}

/// Compress up to one chunk of data into a framed SQSH chunk
pub fn compress(data: &[u8], flavor: CompressionFlavor) -> Result<Vec<u8>> {
    if data.len() > CHUNK_SIZE {
        return Err(HpiError::InvalidInput(format!(
            "chunk input of {} bytes exceeds {}",
            data.len(),
            CHUNK_SIZE
        )));
    }

    let payload = zlib_payload(data, flavor)?;
    let header = ChunkHeader {
        method: CompressionMethod::Zlib,
        obfuscated: false,
        compressed_size: payload.len() as u32,
        decompressed_size: data.len() as u32,
        checksum: checksum(&payload),
    };

    let mut frame = Vec::with_capacity(header.frame_size());
    frame.extend_from_slice(&header.to_bytes());
    frame.extend_from_slice(&payload);
    Ok(frame)
}

/// Decode a framed chunk, returning exactly `decompressed_size` bytes
pub fn decompress(frame: &[u8]) -> Result<Vec<u8>> {
    let header = ChunkHeader::parse(frame)?;
    let stored = frame
        .get(CHUNK_HEADER_SIZE..header.frame_size())
        .ok_or_else(|| {
            HpiError::Format(format!(
                "chunk payload truncated: {} of {} bytes",
                frame.len().saturating_sub(CHUNK_HEADER_SIZE),
                header.compressed_size
            ))
        })?;

    let actual = checksum(stored);
    if actual != header.checksum {
        return Err(HpiError::ChecksumMismatch {
            expected: header.checksum,
            actual,
        });
    }

    let mut payload = stored.to_vec();
    if header.obfuscated {
        chunk_deobfuscate(&mut payload);
    }

    let expected = header.decompressed_size as usize;
    match header.method {
        CompressionMethod::Lz77 => lz77::decompress(&payload, expected),
        CompressionMethod::Zlib => {
            let mut out = Vec::with_capacity(expected);
            ZlibDecoder::new(&payload[..])
                .take(expected as u64 + 1)
                .read_to_end(&mut out)?;
            if out.len() != expected {
                return Err(HpiError::Format(format!(
                    "zlib chunk produced {} bytes, expected {}",
                    out.len(),
                    expected
                )));
            }
            Ok(out)
        }
        CompressionMethod::Store => Err(HpiError::InvalidCompressionMethod(0)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cipher::chunk_obfuscate;

    fn frame(method: CompressionMethod, obfuscated: bool, payload: &[u8], size: u32) -> Vec<u8> {
        let header = ChunkHeader {
            method,
            obfuscated,
            compressed_size: payload.len() as u32,
            decompressed_size: size,
            checksum: checksum(payload),
        };
        let mut out = header.to_bytes().to_vec();
        out.extend_from_slice(payload);
        out
    }

    #[test]
    fn test_header_layout() {
        let header = ChunkHeader {
            method: CompressionMethod::Zlib,
            obfuscated: false,
            compressed_size: 0x10,
            decompressed_size: 0x20,
            checksum: 0x0102_0304,
        };
        assert_eq!(
            hex::encode(header.to_bytes()),
            "53515348020200100000002000000004030201"
        );
        assert_eq!(ChunkHeader::parse(&header.to_bytes()).unwrap(), header);
    }

    #[test]
    fn test_deflate_round_trip() {
        let data = b"the quick brown fox jumps over the lazy dog ".repeat(50);
        let framed = compress(&data, CompressionFlavor::Deflate).unwrap();
        assert_eq!(&framed[..4], b"SQSH");
        assert_eq!(&framed[CHUNK_HEADER_SIZE..CHUNK_HEADER_SIZE + 2], &[0x78, 0xDA]);
        assert_eq!(decompress(&framed).unwrap(), data);
    }

    #[test]
    fn test_zopfli_round_trip_and_small_fallback() {
        let data = b"zopfli zopfli deflate deflate ".repeat(100);
        let flavor = CompressionFlavor::Zopfli { iterations: 3 };
        let framed = compress(&data, flavor).unwrap();
        assert_eq!(decompress(&framed).unwrap(), data);

        let small = b"tiny";
        assert_eq!(
            compress(small, flavor).unwrap(),
            compress(small, CompressionFlavor::Deflate).unwrap()
        );
    }

    #[test]
    fn test_store_and_oversize_rejected() {
        assert!(matches!(
            compress(b"abc", CompressionFlavor::Store),
            Err(HpiError::InvalidInput(_))
        ));
        let big = vec![0u8; CHUNK_SIZE + 1];
        assert!(compress(&big, CompressionFlavor::Deflate).is_err());
    }

    #[test]
    fn test_checksum_mismatch() {
        let data = vec![7u8; 4000];
        let mut framed = compress(&data, CompressionFlavor::Deflate).unwrap();
        let last = framed.len() - 1;
        framed[last] ^= 0x40;
        assert!(matches!(
            decompress(&framed),
            Err(HpiError::ChecksumMismatch { .. })
        ));
    }

    #[test]
    fn test_bad_magic_and_version() {
        let mut framed = compress(b"abc", CompressionFlavor::Deflate).unwrap();
        framed[4] = 3;
        assert!(matches!(decompress(&framed), Err(HpiError::UnsupportedVersion(3))));
        framed[0] = b'X';
        assert!(matches!(decompress(&framed), Err(HpiError::InvalidMagic { .. })));
    }

    #[test]
    fn test_legacy_lz77_obfuscated() {
        // three literals, one back-reference to window slot 1, end marker
        let mut payload = hex::decode("1841424314000000").unwrap();
        let plain = frame(CompressionMethod::Lz77, false, &payload, 9);
        assert_eq!(decompress(&plain).unwrap(), b"ABCABCABC");

        chunk_obfuscate(&mut payload);
        let hidden = frame(CompressionMethod::Lz77, true, &payload, 9);
        assert_eq!(decompress(&hidden).unwrap(), b"ABCABCABC");
    }

    #[test]
    fn test_truncated_payload() {
        let framed = compress(&[1u8; 500], CompressionFlavor::Deflate).unwrap();
        assert!(matches!(
            decompress(&framed[..framed.len() - 1]),
            Err(HpiError::Format(_))
        ));
    }
}
