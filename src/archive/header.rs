//! Archive header
//!
//! ```text
//! 0  marker "HAPI"
//! 4  version (0x00010000)
//! 8  end of the directory region (absolute offset)
//! 12 header key (0 = not obfuscated)
//! 16 start of the directory region (absolute offset)
//! ```

use crate::{HpiError, Result};

/// Size of the fixed header
pub const HEADER_SIZE: usize = 20;

/// "HAPI" as a little-endian u32
pub const HAPI_MARKER: u32 = 0x4950_4148;

/// The supported layout
pub const VERSION_1: u32 = 0x0001_0000;

/// "BANK": saved-game archives
pub const SAVED_GAME_MARKER: u32 = 0x4B4E_4142;

/// Second-generation archives with a different directory layout
pub const VERSION_2: u32 = 0x0002_0000;

/// Decoded archive header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArchiveHeader {
    /// Offset one past the last byte of the directory region
    pub directory_end: u32,
    /// Raw key field; see [`crate::cipher::derive_key`]
    pub header_key: u32,
    /// Offset of the root directory record
    pub start: u32,
}

impl ArchiveHeader {
    /// Parse and validate the first [`HEADER_SIZE`] bytes of an archive
    pub fn parse(bytes: &[u8; HEADER_SIZE]) -> Result<Self> {
        let field =
            |i: usize| u32::from_le_bytes([bytes[i], bytes[i + 1], bytes[i + 2], bytes[i + 3]]);

        let marker = field(0);
        if marker != HAPI_MARKER {
            return Err(HpiError::InvalidMagic {
                expected: HAPI_MARKER,
                found: marker,
            });
        }
        match field(4) {
            VERSION_1 => {}
            SAVED_GAME_MARKER => return Err(HpiError::UnsupportedVariant("saved game")),
            VERSION_2 => return Err(HpiError::UnsupportedVariant("version 2 (TA: Kingdoms)")),
            other => return Err(HpiError::UnsupportedVersion(other)),
        }

        let header = Self {
            directory_end: field(8),
            header_key: field(12),
            start: field(16),
        };
        if (header.start as usize) < HEADER_SIZE || header.directory_end < header.start {
            return Err(HpiError::Format(format!(
                "directory region {}..{} is invalid",
                header.start, header.directory_end
            )));
        }
        Ok(header)
    }

    /// Serialise the header
    pub fn to_bytes(&self) -> [u8; HEADER_SIZE] {
        let mut out = [0u8; HEADER_SIZE];
        out[0..4].copy_from_slice(&HAPI_MARKER.to_le_bytes());
        out[4..8].copy_from_slice(&VERSION_1.to_le_bytes());
        out[8..12].copy_from_slice(&self.directory_end.to_le_bytes());
        out[12..16].copy_from_slice(&self.header_key.to_le_bytes());
        out[16..20].copy_from_slice(&self.start.to_le_bytes());
        out
    }
}
