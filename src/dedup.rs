//! Duplicate content detection across build sources
//!
//! Candidates are first bucketed by size. Only buckets with more than one
//! member are hashed (SHA-256, in parallel). Within a hash group every member
//! after the first, in source map order, becomes a duplicate of the first.

use std::collections::{BTreeMap, HashMap};
use std::fs::{self, File};
use std::io::{self, BufReader};
use std::path::PathBuf;

use log::debug;
use rayon::prelude::*;
use sha2::{Digest, Sha256};

use crate::archive::Archive;
use crate::paths::{DuplicateMap, Source, SourceMap};
use crate::{HpiError, Result};

/// Every source archive of a build, opened once and shared by all readers
#[derive(Debug, Default)]
pub struct OpenSources {
    archives: HashMap<PathBuf, Archive<BufReader<File>>>,
}

impl OpenSources {
    /// Open each distinct archive named in `sources`
    pub fn open(sources: &SourceMap) -> Result<Self> {
        let mut archives = HashMap::new();
        for (_, source) in sources.iter() {
            if let Source::Archive(path) = source {
                if !archives.contains_key(path) {
                    archives.insert(path.clone(), Archive::open(path)?);
                }
            }
        }
        Ok(Self { archives })
    }

    fn archive(&self, path: &PathBuf) -> Result<&Archive<BufReader<File>>> {
        self.archives
            .get(path)
            .ok_or_else(|| {
                HpiError::InvalidInput(format!("source archive {} not opened", path.display()))
            })
    }

    /// Uncompressed size of `path` in its source
    pub fn size(&self, path: &str, source: &Source) -> Result<u64> {
        match source {
            Source::Folder(_) => {
                let file = source
                    .file_path(path)
                    .ok_or_else(|| HpiError::EntryNotFound(path.to_string()))?;
                Ok(fs::metadata(file)?.len())
            }
            Source::Archive(archive) => self
                .archive(archive)?
                .entry(path)
                .map(|e| e.size as u64)
                .ok_or_else(|| {
                    HpiError::EntryNotFound(format!("{} in {}", path, archive.display()))
                }),
        }
    }

    /// Raw bytes of `path`, decompressed if it comes from an archive
    pub fn read(&self, path: &str, source: &Source) -> Result<Vec<u8>> {
        match source {
            Source::Folder(_) => {
                let file = source
                    .file_path(path)
                    .ok_or_else(|| HpiError::EntryNotFound(path.to_string()))?;
                Ok(fs::read(file)?)
            }
            Source::Archive(archive) => self.archive(archive)?.read_file(path),
        }
    }

    /// SHA-256 of the bytes of `path`; folder files are streamed from disk
    pub fn digest(&self, path: &str, source: &Source) -> Result<[u8; 32]> {
        let mut hasher = Sha256::new();
        match source {
            Source::Folder(_) => {
                let file = source
                    .file_path(path)
                    .ok_or_else(|| HpiError::EntryNotFound(path.to_string()))?;
                io::copy(&mut BufReader::new(File::open(file)?), &mut hasher)?;
            }
            Source::Archive(_) => hasher.update(self.read(path, source)?),
        }
        Ok(hasher.finalize().into())
    }
}

/// Map every byte-identical file to the first file with the same content
pub fn find_duplicates(sources: &SourceMap) -> Result<DuplicateMap> {
    let open = OpenSources::open(sources)?;
    find_duplicates_with(&open, sources)
}

/// As [`find_duplicates`], reading through already opened sources
pub fn find_duplicates_with(open: &OpenSources, sources: &SourceMap) -> Result<DuplicateMap> {
    let candidates: Vec<(&str, &Source)> = sources.iter().collect();

    let sizes = candidates
        .par_iter()
        .map(|(path, source)| open.size(path, source))
        .collect::<Result<Vec<_>>>()?;

    let mut by_size: BTreeMap<u64, Vec<usize>> = BTreeMap::new();
    for (i, size) in sizes.into_iter().enumerate() {
        by_size.entry(size).or_default().push(i);
    }
    let buckets: Vec<Vec<usize>> = by_size.into_values().filter(|b| b.len() > 1).collect();

    let to_hash: Vec<usize> = buckets.iter().flatten().copied().collect();
    debug!(
        "dedup: {} candidates, {} share a size",
        candidates.len(),
        to_hash.len()
    );
    let digests: HashMap<usize, [u8; 32]> = to_hash
        .par_iter()
        .map(|&i| -> Result<(usize, [u8; 32])> {
            let (path, source) = candidates[i];
            Ok((i, open.digest(path, source)?))
        })
        .collect::<Result<_>>()?;

    let mut duplicates = DuplicateMap::new();
    for bucket in &buckets {
        let mut first_by_hash: HashMap<[u8; 32], usize> = HashMap::new();
        for &i in bucket {
            let digest = digests[&i];
            match first_by_hash.get(&digest) {
                Some(&first) => {
                    duplicates.insert(candidates[i].0, candidates[first].0.to_string())?;
                }
                None => {
                    first_by_hash.insert(digest, i);
                }
            }
        }
    }
    debug!("dedup: {} duplicates", duplicates.len());
    Ok(duplicates)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;
    use tempfile::TempDir;

    fn write(root: &Path, rel: &str, data: &[u8]) {
        let path = root.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, data).unwrap();
    }

    #[test]
    fn test_identical_files_alias_first() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "a/first.txt", b"same content");
        write(dir.path(), "b/second.txt", b"same content");
        write(dir.path(), "c/third.txt", b"same content");
        write(dir.path(), "d/other.txt", b"diff content");
        write(dir.path(), "e/unique.txt", b"short");

        let mut sources = SourceMap::new();
        for p in ["a/first.txt", "b/second.txt", "c/third.txt", "d/other.txt", "e/unique.txt"] {
            sources.insert(p, Source::Folder(dir.path().to_path_buf())).unwrap();
        }

        let dups = find_duplicates(&sources).unwrap();
        assert_eq!(dups.len(), 2);
        assert_eq!(dups.get("b/second.txt").map(String::as_str), Some("a/first.txt"));
        assert_eq!(dups.get("c/third.txt").map(String::as_str), Some("a/first.txt"));
        // same size, different bytes
        assert!(!dups.contains("d/other.txt"));
        assert!(!dups.contains("a/first.txt"));
    }

    #[test]
    fn test_streamed_digest_matches_in_memory_hash() {
        let dir = TempDir::new().unwrap();
        let data: Vec<u8> = (0..300_000u32).map(|i| (i * 7 % 253) as u8).collect();
        write(dir.path(), "maps/large.tnt", &data);
        let source = Source::Folder(dir.path().to_path_buf());
        let mut sources = SourceMap::new();
        sources.insert("maps/large.tnt", source.clone()).unwrap();

        let open = OpenSources::open(&sources).unwrap();
        let expected: [u8; 32] = Sha256::digest(&data).into();
        assert_eq!(open.digest("maps/large.tnt", &source).unwrap(), expected);
    }

    #[test]
    fn test_missing_source_file() {
        let dir = TempDir::new().unwrap();
        let mut sources = SourceMap::new();
        sources.insert("nope.bin", Source::Folder(dir.path().to_path_buf())).unwrap();
        assert!(matches!(find_duplicates(&sources), Err(HpiError::Io(_))));
    }
}
