//! Common types and constants for HPI archives
//!
//! This module defines the core types, constants, and the error enum shared by
//! the chunk codec, the archive container, and the build pipeline.

use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Maximum number of uncompressed bytes held by a single chunk
pub const CHUNK_SIZE: usize = 0x10000; // 64KB

/// Inputs smaller than this never go through the Zopfli engine
pub const ZOPFLI_BREAK_EVEN: usize = 1024;

/// Default number of Zopfli optimisation iterations
pub const DEFAULT_ZOPFLI_ITERATIONS: u16 = 15;

/// Compression method stored in archive file records and chunk headers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CompressionMethod {
    /// Raw bytes, no chunking
    Store = 0,
    /// Legacy 4KB-window LZ77 (decode only)
    Lz77 = 1,
    /// zlib-framed DEFLATE
    Zlib = 2,
}

impl CompressionMethod {
    /// Create a CompressionMethod from a raw value
    pub fn from_u8(value: u8) -> Result<Self> {
        match value {
            0 => Ok(CompressionMethod::Store),
            1 => Ok(CompressionMethod::Lz77),
            2 => Ok(CompressionMethod::Zlib),
            _ => Err(HpiError::InvalidCompressionMethod(value)),
        }
    }

    /// Whether data stored with this method is split into chunks
    pub fn is_chunked(&self) -> bool {
        !matches!(self, CompressionMethod::Store)
    }
}

/// Encoder-side compression strategy
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum CompressionFlavor {
    /// Store files uncompressed
    Store,
    /// Plain zlib DEFLATE at the best level
    #[default]
    Deflate,
    /// Zopfli optimal DEFLATE with the given number of iterations
    Zopfli {
        /// Number of cost-model refinement passes
        iterations: u16,
    },
}

impl CompressionFlavor {
    /// Zopfli with the default iteration count
    pub const fn zopfli() -> Self {
        CompressionFlavor::Zopfli {
            iterations: DEFAULT_ZOPFLI_ITERATIONS,
        }
    }

    /// The method recorded in the archive for files written with this flavor
    pub fn method(&self) -> CompressionMethod {
        match self {
            CompressionFlavor::Store => CompressionMethod::Store,
            CompressionFlavor::Deflate | CompressionFlavor::Zopfli { .. } => {
                CompressionMethod::Zlib
            }
        }
    }
}

impl fmt::Display for CompressionFlavor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CompressionFlavor::Store => write!(f, "store"),
            CompressionFlavor::Deflate => write!(f, "deflate"),
            CompressionFlavor::Zopfli { iterations } => write!(f, "zopfli-i{}", iterations),
        }
    }
}

impl FromStr for CompressionFlavor {
    type Err = HpiError;

    fn from_str(s: &str) -> Result<Self> {
        let lower = s.trim().to_ascii_lowercase();
        match lower.as_str() {
            "store" | "none" => Ok(CompressionFlavor::Store),
            "deflate" | "zlib" => Ok(CompressionFlavor::Deflate),
            "zopfli" => Ok(CompressionFlavor::zopfli()),
            other => {
                let iterations = other
                    .strip_prefix("zopfli-i")
                    .and_then(|n| n.parse::<u16>().ok())
                    .filter(|&n| n > 0)
                    .ok_or_else(|| HpiError::InvalidInput(format!("unknown flavor '{}'", s)))?;
                Ok(CompressionFlavor::Zopfli { iterations })
            }
        }
    }
}

/// Error type for HPI operations
#[derive(Debug, Error)]
pub enum HpiError {
    /// Archive or chunk does not start with the expected marker
    #[error("Invalid magic: expected {expected:08X}, found {found:08X}")]
    InvalidMagic {
        /// Expected marker
        expected: u32,
        /// Marker found in the stream
        found: u32,
    },

    /// Unknown version field
    #[error("Unsupported version: {0:#010X}")]
    UnsupportedVersion(u32),

    /// A recognised archive sub-format this crate does not handle
    #[error("Unsupported archive variant: {0}")]
    UnsupportedVariant(&'static str),

    /// Invalid compression method value
    #[error("Invalid compression method: {0}")]
    InvalidCompressionMethod(u8),

    /// Structural damage in an archive or stream
    #[error("Invalid format: {0}")]
    Format(String),

    /// Chunk checksum mismatch
    #[error("Checksum mismatch: expected {expected:08X}, got {actual:08X}")]
    ChecksumMismatch {
        /// Checksum recorded in the chunk header
        expected: u32,
        /// Checksum of the stored bytes
        actual: u32,
    },

    /// Size limits of the format exceeded
    #[error("Capacity exceeded: {0}")]
    Capacity(String),

    /// Caller supplied unusable input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Path not present in the archive
    #[error("Entry not found: {0}")]
    EntryNotFound(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for HPI operations
pub type Result<T> = std::result::Result<T, HpiError>;

/// Number of chunks needed for a file of `size` bytes
pub fn chunk_count(size: usize) -> usize {
    size.div_ceil(CHUNK_SIZE)
}
