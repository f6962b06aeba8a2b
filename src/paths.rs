//! Archive paths, entry names and source maps
//!
//! Paths inside an archive are `/`-separated and compare case-insensitively.
//! Names are stored on disk as NUL-terminated Windows-1252 strings.

use std::collections::btree_map::{self, BTreeMap};
use std::path::{Path, PathBuf};

use encoding_rs::WINDOWS_1252;

use crate::{HpiError, Result};

/// Characters that cannot appear in a file name on common filesystems
const RESERVED: &[char] = &['<', '>', '"', '/', '\\', '|', '?', '*', ':'];

/// Replace control and filesystem-reserved characters with `_`
pub fn sanitize_name(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_control() || RESERVED.contains(&c) {
                '_'
            } else {
                c
            }
        })
        .collect()
}

/// Decode a raw on-disk name and make it safe to use as a path segment
pub fn decode_name(raw: &[u8]) -> String {
    let (text, _, _) = WINDOWS_1252.decode(raw);
    sanitize_name(&text)
}

/// Encode a path segment for storage
pub fn encode_name(name: &str) -> Result<Vec<u8>> {
    if name.is_empty() || name.contains('\0') {
        return Err(HpiError::InvalidInput(format!("invalid entry name '{}'", name)));
    }
    let (bytes, _, had_errors) = WINDOWS_1252.encode(name);
    if had_errors {
        return Err(HpiError::InvalidInput(format!(
            "entry name '{}' is not representable in Windows-1252",
            name
        )));
    }
    Ok(bytes.into_owned())
}

/// Normalise an archive path: `/` separators, no empty, `.` or `..` segments
pub fn normalize_path(path: &str) -> Result<String> {
    let mut segments = Vec::new();
    for segment in path.split(['/', '\\']) {
        match segment {
            "" | "." => continue,
            ".." => {
                return Err(HpiError::InvalidInput(format!(
                    "path '{}' escapes the archive root",
                    path
                )))
            }
            s => segments.push(s),
        }
    }
    if segments.is_empty() {
        return Err(HpiError::InvalidInput(format!("empty archive path '{}'", path)));
    }
    Ok(segments.join("/"))
}

/// Comparison key for a normalised path
pub fn path_key(path: &str) -> String {
    path.to_lowercase()
}

/// Where the bytes for an archive path come from
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Source {
    /// A directory on disk; the file lives at `root/<archive path>`
    Folder(PathBuf),
    /// An existing archive holding an entry with the same path
    Archive(PathBuf),
}

impl Source {
    /// Location of `archive_path` for a folder source
    pub fn file_path(&self, archive_path: &str) -> Option<PathBuf> {
        match self {
            Source::Folder(root) => {
                Some(archive_path.split('/').fold(root.clone(), |p, s| p.join(s)))
            }
            Source::Archive(_) => None,
        }
    }

    /// The folder or archive path itself
    pub fn location(&self) -> &Path {
        match self {
            Source::Folder(p) | Source::Archive(p) => p,
        }
    }
}

/// Ordered map from archive path to a value, case-insensitive on keys
///
/// Iteration follows the case-insensitive sort order; the casing of the latest
/// insertion is kept.
#[derive(Debug, Clone)]
pub struct PathMap<V> {
    entries: BTreeMap<String, (String, V)>,
}

impl<V> Default for PathMap<V> {
    fn default() -> Self {
        Self {
            entries: BTreeMap::new(),
        }
    }
}

impl<V> PathMap<V> {
    /// Create an empty map
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert under a normalised path, returning the previous value
    pub fn insert(&mut self, path: &str, value: V) -> Result<Option<V>> {
        let path = normalize_path(path)?;
        match self.entries.entry(path_key(&path)) {
            btree_map::Entry::Occupied(mut slot) => {
                let (_, old) = std::mem::replace(slot.get_mut(), (path, value));
                Ok(Some(old))
            }
            btree_map::Entry::Vacant(slot) => {
                slot.insert((path, value));
                Ok(None)
            }
        }
    }

    /// Look up a path in any casing or separator style
    pub fn get(&self, path: &str) -> Option<&V> {
        let path = normalize_path(path).ok()?;
        self.entries.get(&path_key(&path)).map(|(_, v)| v)
    }

    /// Whether the path is present
    pub fn contains(&self, path: &str) -> bool {
        self.get(path).is_some()
    }

    /// Remove a path
    pub fn remove(&mut self, path: &str) -> Option<V> {
        let path = normalize_path(path).ok()?;
        self.entries.remove(&path_key(&path)).map(|(_, v)| v)
    }

    /// Number of paths
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the map is empty
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Paths and values in order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &V)> {
        self.entries.values().map(|(p, v)| (p.as_str(), v))
    }

    /// Paths in order
    pub fn paths(&self) -> impl Iterator<Item = &str> {
        self.entries.values().map(|(p, _)| p.as_str())
    }
}

/// Build inputs: archive path to the source providing its bytes
pub type SourceMap = PathMap<Source>;

/// Duplicate path to the canonical path whose data it shares
pub type DuplicateMap = PathMap<String>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize() {
        assert_eq!(sanitize_name("a<b>c:d"), "a_b_c_d");
        assert_eq!(sanitize_name("x\u{1}y\tz"), "x_y_z");
        assert_eq!(sanitize_name("q?\"*|/\\"), "q______");
        assert_eq!(sanitize_name("plain.tdf"), "plain.tdf");
    }

    #[test]
    fn test_windows_1252_names() {
        assert_eq!(decode_name(&[b'c', 0xE9, b'.', b'g']), "c\u{e9}.g");
        assert_eq!(encode_name("c\u{e9}.g").unwrap(), vec![b'c', 0xE9, b'.', b'g']);
        assert!(encode_name("\u{4e2d}").is_err());
        assert!(encode_name("").is_err());
    }

    #[test]
    fn test_normalize() {
        assert_eq!(normalize_path("\\units\\ARMCOM.fbi").unwrap(), "units/ARMCOM.fbi");
        assert_eq!(normalize_path("a//./b/").unwrap(), "a/b");
        assert!(normalize_path("a/../b").is_err());
        assert!(normalize_path("/").is_err());
    }

    #[test]
    fn test_path_map_case_insensitive() {
        let mut map = PathMap::new();
        assert!(map.insert("Units/ArmCom.fbi", 1).unwrap().is_none());
        assert_eq!(map.insert("units\\ARMCOM.FBI", 2).unwrap(), Some(1));
        assert_eq!(map.len(), 1);
        assert_eq!(map.get("UNITS/armcom.fbi"), Some(&2));
        assert_eq!(map.paths().collect::<Vec<_>>(), vec!["units/ARMCOM.FBI"]);

        map.insert("anims/x.gaf", 3).unwrap();
        map.insert("Zeta.txt", 4).unwrap();
        map.insert("beta.txt", 5).unwrap();
        assert_eq!(
            map.paths().collect::<Vec<_>>(),
            vec!["anims/x.gaf", "beta.txt", "units/ARMCOM.FBI", "Zeta.txt"]
        );
        assert_eq!(map.remove("BETA.TXT"), Some(5));
    }

    #[test]
    fn test_folder_source_path() {
        let source = Source::Folder(PathBuf::from("root"));
        assert_eq!(
            source.file_path("a/b.txt").unwrap(),
            PathBuf::from("root").join("a").join("b.txt")
        );
        assert!(Source::Archive(PathBuf::from("x.hpi")).file_path("a").is_none());
    }
}
