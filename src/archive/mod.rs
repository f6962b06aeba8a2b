//! HPI archive container
//!
//! An archive is a 20-byte header, a directory table describing a tree of
//! named entries, then file data. Chunked files start with a table of chunk
//! frame sizes followed by the SQSH frames themselves. Everything after the
//! header may be obfuscated with a key derived from the header.
//!
//! # Example
//!
//! ```no_run
//! use hpi::archive::Archive;
//!
//! let archive = Archive::open("totala1.hpi")?;
//! for (path, info) in archive.summaries() {
//!     println!("{} {} -> {}", path, info.uncompressed_size, info.compressed_size);
//! }
//! let data = archive.read_file("units/armcom.fbi")?;
//! # Ok::<(), hpi::HpiError>(())
//! ```

pub mod header;
pub mod reader;
pub mod tree;
pub mod writer;

pub use reader::Archive;
pub use writer::{ArchiveWriter, StagedFile, WriteSummary};

use crate::common::CompressionMethod;

/// One file as recorded in the directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileEntry {
    /// Absolute offset of the stored data or of the chunk size table
    pub offset: u32,
    /// Uncompressed size
    pub size: u32,
    /// How the data is stored
    pub method: CompressionMethod,
    /// Size of each chunk frame, empty for stored files
    pub chunk_sizes: Vec<u32>,
}

impl FileEntry {
    /// Offset of the first chunk frame
    pub fn chunk_data_offset(&self) -> u64 {
        self.offset as u64 + 4 * self.chunk_sizes.len() as u64
    }

    /// Bytes occupied by the data, chunk size table excluded
    pub fn compressed_size(&self) -> u64 {
        if self.method.is_chunked() {
            self.chunk_sizes.iter().map(|&s| s as u64).sum()
        } else {
            self.size as u64
        }
    }

    /// Size summary
    pub fn info(&self) -> EntryInfo {
        let compressed_size = self.compressed_size();
        let ratio = if self.size == 0 {
            1.0
        } else {
            compressed_size as f64 / self.size as f64
        };
        EntryInfo {
            uncompressed_size: self.size as u64,
            compressed_size,
            ratio,
        }
    }
}

/// Size summary of one entry
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EntryInfo {
    /// Decoded size
    pub uncompressed_size: u64,
    /// Stored size
    pub compressed_size: u64,
    /// `compressed_size / uncompressed_size`, 1.0 for empty files
    pub ratio: f64,
}
