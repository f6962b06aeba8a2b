//! Reading archives

use std::collections::HashSet;
use std::fs::File;
use std::io::{BufReader, Read, Seek, SeekFrom};
use std::path::Path;
use std::sync::Mutex;

use log::{debug, warn};
use rayon::prelude::*;

use super::header::{ArchiveHeader, HEADER_SIZE};
use super::tree::{DIRECTORY_HEADER_SIZE, RECORD_SIZE};
use super::{EntryInfo, FileEntry};
use crate::cipher::{decrypt_in_place, derive_key};
use crate::common::{chunk_count, CompressionMethod, CHUNK_SIZE};
use crate::paths::{decode_name, PathMap};
use crate::{chunk, HpiError, Result};

/// Directory nesting deeper than this is treated as corrupt
const MAX_DEPTH: usize = 256;

/// An open archive
///
/// The underlying stream is owned for the archive's lifetime and closed when
/// it is dropped.
#[derive(Debug)]
pub struct Archive<R> {
    inner: Mutex<R>,
    key: Option<u8>,
    stream_len: u64,
    entries: PathMap<FileEntry>,
}

impl Archive<BufReader<File>> {
    /// Open an archive file
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::open(path.as_ref())?;
        debug!("opening {}", path.as_ref().display());
        Self::from_reader(BufReader::new(file))
    }
}

/// Bounds-checked view into the decrypted directory region
fn field(buf: &[u8], at: usize, len: usize) -> Result<&[u8]> {
    at.checked_add(len)
        .and_then(|end| buf.get(at..end))
        .ok_or_else(|| HpiError::Format(format!("directory reference {} out of range", at)))
}

fn u32_at(buf: &[u8], at: usize) -> Result<u32> {
    let b = field(buf, at, 4)?;
    Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
}

fn name_at(buf: &[u8], at: usize) -> Result<String> {
    let tail = buf
        .get(at..)
        .ok_or_else(|| HpiError::Format(format!("name offset {} out of range", at)))?;
    let len = tail
        .iter()
        .position(|&b| b == 0)
        .ok_or_else(|| HpiError::Format(format!("unterminated name at {}", at)))?;
    Ok(decode_name(&tail[..len]))
}

struct DirectoryParser<'a> {
    buf: &'a [u8],
    visited: HashSet<usize>,
    files: Vec<(String, FileEntry)>,
}

impl DirectoryParser<'_> {
    fn walk(&mut self, at: usize, prefix: &str, depth: usize) -> Result<()> {
        if depth > MAX_DEPTH || !self.visited.insert(at) {
            return Err(HpiError::Format(format!("directory cycle at offset {}", at)));
        }
        let count = u32_at(self.buf, at)? as usize;
        let list = u32_at(self.buf, at + 4)? as usize;
        // every entry must fit inside the region
        field(self.buf, list, count.saturating_mul(RECORD_SIZE))?;

        for i in 0..count {
            let entry = list + i * RECORD_SIZE;
            let name = name_at(self.buf, u32_at(self.buf, entry)? as usize)?;
            let data = u32_at(self.buf, entry + 4)? as usize;
            let is_dir = field(self.buf, entry + 8, 1)?[0] != 0;

            let path = if prefix.is_empty() {
                name
            } else {
                format!("{}/{}", prefix, name)
            };
            if is_dir {
                self.walk(data, &path, depth + 1)?;
            } else {
                let record = field(self.buf, data, RECORD_SIZE)?;
                let offset = u32::from_le_bytes([record[0], record[1], record[2], record[3]]);
                let size = u32::from_le_bytes([record[4], record[5], record[6], record[7]]);
                let method = CompressionMethod::from_u8(record[8])?;
                self.files.push((
                    path,
                    FileEntry {
                        offset,
                        size,
                        method,
                        chunk_sizes: Vec::new(),
                    },
                ));
            }
        }
        Ok(())
    }
}

impl<R: Read + Seek + Send> Archive<R> {
    /// Parse an archive from any seekable stream
    pub fn from_reader(mut reader: R) -> Result<Self> {
        let stream_len = reader.seek(SeekFrom::End(0))?;
        reader.seek(SeekFrom::Start(0))?;

        let mut raw = [0u8; HEADER_SIZE];
        reader.read_exact(&mut raw)?;
        let header = ArchiveHeader::parse(&raw)?;
        if header.directory_end as u64 > stream_len {
            return Err(HpiError::Format(format!(
                "directory ends at {} beyond the {} byte stream",
                header.directory_end, stream_len
            )));
        }
        let key = derive_key(header.header_key);

        let mut archive = Self {
            inner: Mutex::new(reader),
            key,
            stream_len,
            entries: PathMap::new(),
        };

        // Directory offsets are absolute, so index the buffer the same way
        let start = header.start as usize;
        let end = header.directory_end as usize;
        let mut directory = vec![0u8; end];
        let region = archive.read_at(start as u64, end - start)?;
        directory[start..].copy_from_slice(&region);

        if end - start < DIRECTORY_HEADER_SIZE {
            return Err(HpiError::Format("directory region too small".to_string()));
        }
        let mut parser = DirectoryParser {
            buf: &directory,
            visited: HashSet::new(),
            files: Vec::new(),
        };
        parser.walk(start, "", 0)?;

        for (path, mut entry) in parser.files {
            archive.load_chunk_sizes(&mut entry)?;
            if archive.entries.contains(&path) {
                warn!("duplicate entry {} ignored", path);
                continue;
            }
            archive.entries.insert(&path, entry)?;
        }
        debug!(
            "archive: {} entries, key {:?}, directory {}..{}",
            archive.entries.len(),
            key,
            start,
            end
        );
        Ok(archive)
    }

    fn load_chunk_sizes(&self, entry: &mut FileEntry) -> Result<()> {
        if entry.size > i32::MAX as u32 {
            return Err(HpiError::Capacity(format!(
                "entry of {} bytes exceeds the 2GB limit",
                entry.size
            )));
        }
        if !entry.method.is_chunked() {
            self.check_span(entry.offset as u64, entry.size as u64)?;
            return Ok(());
        }

        let count = chunk_count(entry.size as usize);
        let table = self.read_at(entry.offset as u64, count * 4)?;
        entry.chunk_sizes = table
            .chunks_exact(4)
            .map(|b| u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
            .collect();
        self.check_span(entry.chunk_data_offset(), entry.compressed_size())
    }

    fn check_span(&self, offset: u64, len: u64) -> Result<()> {
        if offset.saturating_add(len) > self.stream_len {
            return Err(HpiError::Format(format!(
                "data at {}+{} runs past the {} byte stream",
                offset, len, self.stream_len
            )));
        }
        Ok(())
    }

    /// Read and decrypt `len` bytes at absolute offset `position`
    fn read_at(&self, position: u64, len: usize) -> Result<Vec<u8>> {
        self.check_span(position, len as u64)?;
        let mut buf = vec![0u8; len];
        {
            let mut inner = self
                .inner
                .lock()
                .map_err(|_| HpiError::Format("archive stream poisoned".to_string()))?;
            inner.seek(SeekFrom::Start(position))?;
            inner.read_exact(&mut buf)?;
        }
        if let Some(key) = self.key {
            decrypt_in_place(key, position, &mut buf);
        }
        Ok(buf)
    }

    /// Look up an entry by path
    pub fn entry(&self, path: &str) -> Option<&FileEntry> {
        self.entries.get(path)
    }

    /// All entries in path order
    pub fn entries(&self) -> impl Iterator<Item = (&str, &FileEntry)> {
        self.entries.iter()
    }

    /// Size summaries in path order
    pub fn summaries(&self) -> impl Iterator<Item = (&str, EntryInfo)> {
        self.entries.iter().map(|(p, e)| (p, e.info()))
    }

    /// Number of files
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the archive holds no files
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Whether the archive is obfuscated
    pub fn is_encrypted(&self) -> bool {
        self.key.is_some()
    }

    /// Decode one file, decompressing its chunks in parallel
    pub fn read_file(&self, path: &str) -> Result<Vec<u8>> {
        let entry = self
            .entry(path)
            .ok_or_else(|| HpiError::EntryNotFound(path.to_string()))?;
        self.read_entry(entry)
    }

    /// Decode the data of an entry belonging to this archive
    pub fn read_entry(&self, entry: &FileEntry) -> Result<Vec<u8>> {
        if !entry.method.is_chunked() {
            return self.read_at(entry.offset as u64, entry.size as usize);
        }

        let size = entry.size as usize;
        if entry.chunk_sizes.len() != chunk_count(size) {
            return Err(HpiError::Format(format!(
                "{} chunk sizes recorded for {} bytes",
                entry.chunk_sizes.len(),
                size
            )));
        }

        let mut spans = Vec::with_capacity(entry.chunk_sizes.len());
        let mut offset = entry.chunk_data_offset();
        for &len in &entry.chunk_sizes {
            spans.push((offset, len as usize));
            offset += len as u64;
        }

        let chunks = spans
            .par_iter()
            .enumerate()
            .map(|(i, &(offset, len))| -> Result<Vec<u8>> {
                let frame = self.read_at(offset, len)?;
                let data = chunk::decompress(&frame)?;
                let expected = CHUNK_SIZE.min(size.saturating_sub(i * CHUNK_SIZE));
                if data.len() != expected {
                    return Err(HpiError::Format(format!(
                        "chunk {} holds {} bytes, expected {}",
                        i,
                        data.len(),
                        expected
                    )));
                }
                Ok(data)
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(chunks.concat())
    }

    /// Give back the underlying stream
    pub fn into_inner(self) -> Result<R> {
        self.inner
            .into_inner()
            .map_err(|_| HpiError::Format("archive stream poisoned".to_string()))
    }
}
