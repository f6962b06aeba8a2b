//! Writing archives
//!
//! Files are staged fully compressed in memory, laid out after the directory
//! table and written in one pass. Duplicates store no data of their own; their
//! file record points at the canonical entry's data.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use log::{debug, warn};
use rayon::prelude::*;

use super::header::{ArchiveHeader, HEADER_SIZE};
use super::tree::{DirNode, RECORD_SIZE};
use crate::cipher::{derive_key, encrypt_in_place};
use crate::common::{CompressionFlavor, CompressionMethod, CHUNK_SIZE};
use crate::paths::{normalize_path, DuplicateMap, PathMap};
use crate::{chunk, HpiError, Result};

/// Appended after the last file
pub const TRAILER: &[u8] = b"Copyright 2026 hpi archive builder. All rights reserved.\0";

/// Archives above this size load in some consumers only
pub const SOFT_SIZE_LIMIT: u64 = i32::MAX as u64;

/// One file ready to be written
#[derive(Debug, Clone)]
pub struct StagedFile {
    method: CompressionMethod,
    size: u32,
    /// Stored bytes, or the chunk size table followed by the chunk frames
    body: Vec<u8>,
}

impl StagedFile {
    /// Keep `data` uncompressed
    pub fn stored(data: Vec<u8>) -> Result<Self> {
        let size = checked_size(data.len())?;
        Ok(Self {
            method: CompressionMethod::Store,
            size,
            body: data,
        })
    }

    /// Assemble a chunked file from already framed chunks
    pub fn from_chunks(method: CompressionMethod, size: usize, frames: &[Vec<u8>]) -> Result<Self> {
        let size = checked_size(size)?;
        let payload: usize = frames.iter().map(Vec::len).sum();
        let mut body = Vec::with_capacity(frames.len() * 4 + payload);
        for frame in frames {
            body.extend_from_slice(&checked_size(frame.len())?.to_le_bytes());
        }
        for frame in frames {
            body.extend_from_slice(frame);
        }
        Ok(Self { method, size, body })
    }

    /// Compress `data` with `flavor`, one chunk per worker
    ///
    /// `on_chunk` is called with the chunk index as each chunk finishes, in
    /// no particular order.
    pub fn compress<F>(data: &[u8], flavor: CompressionFlavor, on_chunk: F) -> Result<Self>
    where
        F: Fn(usize) + Sync,
    {
        if flavor == CompressionFlavor::Store {
            return Self::stored(data.to_vec());
        }
        let frames = data
            .par_chunks(CHUNK_SIZE)
            .enumerate()
            .map(|(i, piece)| -> Result<Vec<u8>> {
                let frame = chunk::compress(piece, flavor)?;
                on_chunk(i);
                Ok(frame)
            })
            .collect::<Result<Vec<_>>>()?;
        Self::from_chunks(flavor.method(), data.len(), &frames)
    }

    /// Compression method
    pub fn method(&self) -> CompressionMethod {
        self.method
    }

    /// Uncompressed size
    pub fn size(&self) -> u32 {
        self.size
    }

    /// Bytes this file adds to the archive
    pub fn stored_len(&self) -> usize {
        self.body.len()
    }
}

fn checked_size(len: usize) -> Result<u32> {
    if len > i32::MAX as usize {
        return Err(HpiError::Capacity(format!("{} bytes exceeds the 2GB file limit", len)));
    }
    Ok(len as u32)
}

/// What a write produced
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WriteSummary {
    /// Total archive size in bytes
    pub total_size: u64,
    /// Files whose data was written
    pub files_written: usize,
    /// Entries aliasing another entry's data
    pub duplicates: usize,
    /// Non-fatal problems worth reporting
    pub warnings: Vec<String>,
}

/// Collects staged files and writes the archive
#[derive(Debug, Default)]
pub struct ArchiveWriter {
    files: PathMap<StagedFile>,
    duplicates: DuplicateMap,
    header_key: u32,
}

impl ArchiveWriter {
    /// Create an empty writer producing an unobfuscated archive
    pub fn new() -> Self {
        Self::default()
    }

    /// Obfuscate everything after the header with this key field
    pub fn with_header_key(mut self, header_key: u32) -> Self {
        self.header_key = header_key;
        self
    }

    /// Stage a file
    pub fn add_file(&mut self, path: &str, file: StagedFile) -> Result<()> {
        if self.duplicates.contains(path) || self.files.insert(path, file)?.is_some() {
            return Err(HpiError::InvalidInput(format!("'{}' added twice", path)));
        }
        Ok(())
    }

    /// Stage `path` as sharing the data of `canonical`
    pub fn add_duplicate(&mut self, path: &str, canonical: &str) -> Result<()> {
        let canonical = normalize_path(canonical)?;
        if self.files.contains(path) || self.duplicates.insert(path, canonical)?.is_some() {
            return Err(HpiError::InvalidInput(format!("'{}' added twice", path)));
        }
        Ok(())
    }

    /// Number of entries, duplicates included
    pub fn len(&self) -> usize {
        self.files.len() + self.duplicates.len()
    }

    /// Whether nothing is staged
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Serialise the archive into `out`
    ///
    /// Layout problems are reported before the first byte is written.
    pub fn write<W: Write>(&self, mut out: W) -> Result<WriteSummary> {
        let mut tree_paths: Vec<&str> = self.files.paths().collect();
        tree_paths.extend(self.duplicates.paths());
        let tree = DirNode::from_paths(tree_paths)?;

        let start = HEADER_SIZE as u64;
        let directory_end = start + tree.serialized_size() as u64;

        // data follows the directory in path order
        let mut offsets = PathMap::new();
        let mut cursor = directory_end;
        for (path, file) in self.files.iter() {
            let offset = u32::try_from(cursor).map_err(|_| {
                HpiError::Capacity(format!("data offset for '{}' exceeds 32 bits", path))
            })?;
            offsets.insert(path, offset)?;
            cursor += file.body.len() as u64;
        }
        let total_size = cursor + TRAILER.len() as u64;
        if total_size > u32::MAX as u64 {
            return Err(HpiError::Capacity(format!(
                "archive of {} bytes exceeds the 4GB limit",
                total_size
            )));
        }

        for (path, canonical) in self.duplicates.iter() {
            if !self.files.contains(canonical) {
                return Err(HpiError::InvalidInput(format!(
                    "duplicate '{}' points at missing entry '{}'",
                    path, canonical
                )));
            }
        }

        let file_record = |path: &str| -> Result<[u8; RECORD_SIZE]> {
            let target = self.duplicates.get(path).map(String::as_str).unwrap_or(path);
            let (file, offset) = self
                .files
                .get(target)
                .zip(offsets.get(target))
                .ok_or_else(|| HpiError::EntryNotFound(target.to_string()))?;
            let mut record = [0u8; RECORD_SIZE];
            record[0..4].copy_from_slice(&offset.to_le_bytes());
            record[4..8].copy_from_slice(&file.size.to_le_bytes());
            record[8] = file.method as u8;
            Ok(record)
        };

        let mut directory = Vec::with_capacity((directory_end - start) as usize);
        tree.serialize(start as u32, &mut directory, &file_record)?;
        debug_assert_eq!(start + directory.len() as u64, directory_end);

        let header = ArchiveHeader {
            directory_end: directory_end as u32,
            header_key: self.header_key,
            start: start as u32,
        };
        let key = derive_key(self.header_key);

        let mut position = start;
        let mut emit = |out: &mut W, bytes: &[u8]| -> Result<()> {
            match key {
                Some(key) => {
                    let mut buf = bytes.to_vec();
                    encrypt_in_place(key, position, &mut buf);
                    out.write_all(&buf)?;
                }
                None => out.write_all(bytes)?,
            }
            position += bytes.len() as u64;
            Ok(())
        };

        out.write_all(&header.to_bytes())?;
        emit(&mut out, &directory)?;
        for (_, file) in self.files.iter() {
            emit(&mut out, &file.body)?;
        }
        emit(&mut out, TRAILER)?;
        out.flush()?;

        let mut summary = WriteSummary {
            total_size,
            files_written: self.files.len(),
            duplicates: self.duplicates.len(),
            warnings: Vec::new(),
        };
        if total_size > SOFT_SIZE_LIMIT {
            let message = format!(
                "archive is {} bytes; files above 2GB may not load in the game",
                total_size
            );
            warn!("{}", message);
            summary.warnings.push(message);
        }
        debug!(
            "wrote {} files, {} duplicates, {} bytes",
            summary.files_written, summary.duplicates, total_size
        );
        Ok(summary)
    }

    /// Write the archive to a file
    pub fn write_to_path<P: AsRef<Path>>(&self, path: P) -> Result<WriteSummary> {
        let file = File::create(path)?;
        self.write(BufWriter::new(file))
    }
}
