//! HPI - Rust reader and writer for HPI game archives
//!
//! HPI archives bundle a directory tree of game assets into one file. Files
//! are split into 64KB chunks, each compressed on its own with zlib or, in
//! old archives, a small LZ77 variant. The directory and data may be
//! obfuscated with a key stored in the header.
//!
//! # Features
//!
//! - Reading archives, including obfuscated ones and legacy LZ77 chunks
//! - Writing archives with store, zlib or Zopfli-optimised DEFLATE chunks
//! - Content deduplication across folders and archives when building
//! - Parallel chunk compression and decompression with rayon
//! - A standalone Zopfli-style DEFLATE encoder in [`zopfli`]
//!
//! # Example - Reading
//!
//! ```no_run
//! use hpi::Archive;
//!
//! let archive = Archive::open("totala2.hpi")?;
//! for (path, info) in archive.summaries() {
//!     println!("{:<40} {:>9} {:>5.1}%", path, info.uncompressed_size, info.ratio * 100.0);
//! }
//! # Ok::<(), hpi::HpiError>(())
//! ```
//!
//! # Example - Building
//!
//! ```no_run
//! use hpi::{build_archive, scan_inputs, CompressionFlavor};
//! use std::path::Path;
//!
//! let sources = scan_inputs(&["mod/units", "base.hpi"])?;
//! let report = build_archive(
//!     &sources,
//!     Path::new("out.hpi"),
//!     CompressionFlavor::zopfli(),
//!     None,
//!     |event| log::debug!("{}", event),
//! )?;
//! println!("{} files, {} duplicates", report.files_written, report.duplicates);
//! # Ok::<(), hpi::HpiError>(())
//! ```

#![warn(missing_docs)]
#![warn(missing_debug_implementations)]

// Public modules
pub mod archive;
pub mod bitstream;
pub mod builder;
pub mod chunk;
pub mod cipher;
pub mod common;
pub mod dedup;
pub mod error;
pub mod lz77;
pub mod paths;
pub mod zopfli;

// Re-export commonly used types
pub use archive::{Archive, ArchiveWriter, EntryInfo, FileEntry, StagedFile};
pub use builder::{build_archive, build_many, extract_entries, scan_inputs, BuildReport};
pub use common::{
    CompressionFlavor, CompressionMethod, HpiError, Result, CHUNK_SIZE, ZOPFLI_BREAK_EVEN,
};
pub use dedup::find_duplicates;
pub use paths::{DuplicateMap, PathMap, Source, SourceMap};

// Convenience functions

/// Compress up to 64KB into a framed chunk
///
/// # Arguments
/// * `data` - The data to compress, at most [`CHUNK_SIZE`] bytes
/// * `flavor` - Deflate or Zopfli; store is rejected
pub fn compress_chunk(data: &[u8], flavor: CompressionFlavor) -> Result<Vec<u8>> {
    chunk::compress(data, flavor)
}

/// Decode a framed chunk
pub fn decompress_chunk(frame: &[u8]) -> Result<Vec<u8>> {
    chunk::decompress(frame)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reexports() {
        let _ = CompressionFlavor::zopfli();
        let _ = CompressionMethod::Zlib;

        let frame = compress_chunk(b"test", CompressionFlavor::Deflate).unwrap();
        assert_eq!(decompress_chunk(&frame).unwrap(), b"test");
    }
}
