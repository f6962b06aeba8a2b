//! Building and extracting archives from mixed sources
//!
//! A build takes a [`SourceMap`] (archive path to folder or archive), finds
//! duplicate content unless a duplicate map is supplied, recompresses every
//! unique file in parallel and writes one archive.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use log::{debug, info, warn};
use rayon::prelude::*;

use crate::archive::{Archive, ArchiveWriter, StagedFile};
use crate::common::CompressionFlavor;
use crate::dedup::{find_duplicates_with, OpenSources};
use crate::paths::{normalize_path, DuplicateMap, Source, SourceMap};
use crate::{HpiError, Result};

/// Outcome of one archive build
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BuildReport {
    /// Files whose data was stored
    pub files_written: usize,
    /// Entries aliasing another entry
    pub duplicates: usize,
    /// Uncompressed bytes of the stored files
    pub input_bytes: u64,
    /// Size of the archive written
    pub output_bytes: u64,
    /// Non-fatal problems, such as a size above what the game loads
    pub warnings: Vec<String>,
}

/// Add every file below `root` to `sources`, replacing earlier entries
pub fn scan_folder(root: &Path, sources: &mut SourceMap) -> Result<usize> {
    fn walk(root: &Path, dir: &Path, prefix: &str, sources: &mut SourceMap) -> Result<usize> {
        let mut added = 0;
        let mut children: Vec<_> = fs::read_dir(dir)?.collect::<std::io::Result<_>>()?;
        children.sort_by_key(|e| e.file_name());
        for child in children {
            let name = child.file_name().to_string_lossy().into_owned();
            let path = if prefix.is_empty() {
                name
            } else {
                format!("{}/{}", prefix, name)
            };
            if child.file_type()?.is_dir() {
                added += walk(root, &child.path(), &path, sources)?;
            } else {
                sources.insert(&path, Source::Folder(root.to_path_buf()))?;
                added += 1;
            }
        }
        Ok(added)
    }
    walk(root, root, "", sources)
}

/// Add every entry of the archive at `path` to `sources`, replacing earlier entries
pub fn scan_archive(path: &Path, sources: &mut SourceMap) -> Result<usize> {
    let archive = Archive::open(path)?;
    for (entry, _) in archive.entries() {
        sources.insert(entry, Source::Archive(path.to_path_buf()))?;
    }
    Ok(archive.len())
}

/// Build a source map from folders and archives; later inputs win
pub fn scan_inputs<P: AsRef<Path>>(inputs: &[P]) -> Result<SourceMap> {
    let mut sources = SourceMap::new();
    for input in inputs {
        let input = input.as_ref();
        let added = if input.is_dir() {
            scan_folder(input, &mut sources)?
        } else {
            scan_archive(input, &mut sources)?
        };
        debug!("{}: {} files", input.display(), added);
    }
    Ok(sources)
}

/// Build one archive at `destination`
///
/// `progress` is called once per compressed chunk (`"<path>:Chunk#<n>"`,
/// counting from 1) or once per stored file, possibly from several threads.
pub fn build_archive<F>(
    sources: &SourceMap,
    destination: &Path,
    flavor: CompressionFlavor,
    duplicates: Option<&DuplicateMap>,
    progress: F,
) -> Result<BuildReport>
where
    F: Fn(&str) + Sync,
{
    let open = OpenSources::open(sources)?;
    let found;
    let duplicates = match duplicates {
        Some(map) => {
            for (path, canonical) in map.iter() {
                if !sources.contains(path) || !sources.contains(canonical) {
                    return Err(HpiError::InvalidInput(format!(
                        "duplicate '{}' -> '{}' is not among the sources",
                        path, canonical
                    )));
                }
            }
            map
        }
        None => {
            found = find_duplicates_with(&open, sources)?;
            &found
        }
    };

    let unique: Vec<(&str, &Source)> = sources
        .iter()
        .filter(|(path, _)| !duplicates.contains(path))
        .collect();

    let staged = unique
        .par_iter()
        .map(|&(path, source)| -> Result<(StagedFile, u64)> {
            let data = open.read(path, source)?;
            let file = StagedFile::compress(&data, flavor, |i| {
                progress(&format!("{}:Chunk#{}", path, i + 1));
            })?;
            if flavor == CompressionFlavor::Store {
                progress(path);
            }
            Ok((file, data.len() as u64))
        })
        .collect::<Result<Vec<_>>>()?;

    let mut writer = ArchiveWriter::new();
    let mut input_bytes = 0;
    for (&(path, _), (file, len)) in unique.iter().zip(staged) {
        writer.add_file(path, file)?;
        input_bytes += len;
    }
    for (path, canonical) in duplicates.iter() {
        writer.add_duplicate(path, canonical)?;
    }

    let summary = writer.write_to_path(destination)?;
    info!(
        "{}: {} files, {} duplicates, {} -> {} bytes",
        destination.display(),
        summary.files_written,
        summary.duplicates,
        input_bytes,
        summary.total_size
    );
    Ok(BuildReport {
        files_written: summary.files_written,
        duplicates: summary.duplicates,
        input_bytes,
        output_bytes: summary.total_size,
        warnings: summary.warnings,
    })
}

/// Build several archives at once, one per destination
///
/// Each destination is deduplicated and written independently; a failure in
/// one does not affect the others.
pub fn build_many<F>(
    plan: &BTreeMap<PathBuf, SourceMap>,
    flavor: CompressionFlavor,
    progress: F,
) -> BTreeMap<PathBuf, Result<BuildReport>>
where
    F: Fn(&str) + Sync,
{
    plan.par_iter()
        .map(|(destination, sources)| {
            let report = build_archive(sources, destination, flavor, None, &progress);
            if let Err(e) = &report {
                warn!("{}: {}", destination.display(), e);
            }
            (destination.clone(), report)
        })
        .collect()
}

/// Write each source entry below `destination_root`
///
/// `progress` is called once per extracted path. Returns the number of files
/// written.
pub fn extract_entries<F>(
    sources: &SourceMap,
    destination_root: &Path,
    progress: F,
) -> Result<usize>
where
    F: Fn(&str) + Sync,
{
    let open = OpenSources::open(sources)?;
    let entries: Vec<(&str, &Source)> = sources.iter().collect();

    entries.par_iter().try_for_each(|&(path, source)| -> Result<()> {
        let data = open.read(path, source)?;
        let target = normalize_path(path)?
            .split('/')
            .fold(destination_root.to_path_buf(), |p, s| p.join(s));
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&target, data)?;
        progress(path);
        Ok(())
    })?;
    Ok(entries.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use tempfile::TempDir;

    fn write(root: &Path, rel: &str, data: &[u8]) {
        let path = root.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, data).unwrap();
    }

    #[test]
    fn test_scan_folder_sorted_and_nested() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "b.txt", b"b");
        write(dir.path(), "sub/a.txt", b"a");
        let mut sources = SourceMap::new();
        assert_eq!(scan_folder(dir.path(), &mut sources).unwrap(), 2);
        assert_eq!(sources.paths().collect::<Vec<_>>(), vec!["b.txt", "sub/a.txt"]);
    }

    #[test]
    fn test_build_reports_chunk_progress() {
        let dir = TempDir::new().unwrap();
        let src = dir.path().join("src");
        write(&src, "big.bin", &vec![9u8; 70000]);
        write(&src, "copy.bin", &vec![9u8; 70000]);

        let sources = scan_inputs(&[&src]).unwrap();
        let events = Mutex::new(Vec::new());
        let out = dir.path().join("out.hpi");
        let report = build_archive(&sources, &out, CompressionFlavor::Deflate, None, |e| {
            events.lock().unwrap().push(e.to_string())
        })
        .unwrap();

        assert_eq!(report.files_written, 1);
        assert_eq!(report.duplicates, 1);
        let mut events = events.into_inner().unwrap();
        events.sort();
        assert_eq!(events, vec!["big.bin:Chunk#1", "big.bin:Chunk#2"]);

        let archive = Archive::open(&out).unwrap();
        assert_eq!(archive.read_file("copy.bin").unwrap(), vec![9u8; 70000]);
    }

    #[test]
    fn test_rejects_foreign_duplicate_map() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "a.txt", b"a");
        let sources = scan_inputs(&[dir.path()]).unwrap();
        let mut dups = DuplicateMap::new();
        dups.insert("ghost.txt", "a.txt".to_string()).unwrap();
        let out = dir.path().join("x.hpi");
        assert!(matches!(
            build_archive(&sources, &out, CompressionFlavor::Store, Some(&dups), |_| {}),
            Err(HpiError::InvalidInput(_))
        ));
    }
}
