//! Build-time directory trie
//!
//! The directory table has to be sized before any file data is placed, since
//! file data follows it. The trie mirrors the on-disk layout: a directory
//! record is `[count][entry list offset]`, immediately followed by its
//! 9-byte entries, then for each child its NUL-terminated name and either a
//! 9-byte file record or the child's own directory record.

use std::collections::BTreeMap;

use crate::paths::{encode_name, path_key};
use crate::{HpiError, Result};

/// Size of one directory entry and of one file record
pub const RECORD_SIZE: usize = 9;

/// Size of a directory record header
pub const DIRECTORY_HEADER_SIZE: usize = 8;

#[derive(Debug)]
enum Node {
    /// Full archive path of the file
    File(String),
    Dir(DirNode),
}

#[derive(Debug)]
struct Child {
    name: Vec<u8>,
    node: Node,
}

/// A directory and its children, ordered case-insensitively
#[derive(Debug, Default)]
pub struct DirNode {
    children: BTreeMap<String, Child>,
}

impl DirNode {
    /// Build the trie for a set of normalised archive paths
    pub fn from_paths<'a, I>(paths: I) -> Result<Self>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut root = DirNode::default();
        for path in paths {
            root.insert(path)?;
        }
        Ok(root)
    }

    fn insert(&mut self, path: &str) -> Result<()> {
        let segments: Vec<&str> = path.split('/').collect();
        let (file, dirs) = segments
            .split_last()
            .ok_or_else(|| HpiError::InvalidInput("empty path".to_string()))?;

        let mut node = self;
        for dir in dirs {
            let child = match node.children.entry(path_key(dir)) {
                std::collections::btree_map::Entry::Occupied(slot) => slot.into_mut(),
                std::collections::btree_map::Entry::Vacant(slot) => slot.insert(Child {
                    name: encode_name(dir)?,
                    node: Node::Dir(DirNode::default()),
                }),
            };
            node = match &mut child.node {
                Node::Dir(d) => d,
                Node::File(existing) => {
                    return Err(HpiError::InvalidInput(format!(
                        "'{}' is both a file and a directory",
                        existing
                    )))
                }
            };
        }

        let key = path_key(file);
        if node.children.contains_key(&key) {
            return Err(HpiError::InvalidInput(format!("'{}' is listed twice", path)));
        }
        node.children.insert(
            key,
            Child {
                name: encode_name(file)?,
                node: Node::File(path.to_string()),
            },
        );
        Ok(())
    }

    /// Number of direct children
    pub fn len(&self) -> usize {
        self.children.len()
    }

    /// Whether the directory has no children
    pub fn is_empty(&self) -> bool {
        self.children.is_empty()
    }

    /// Bytes this directory occupies once serialised, children included
    pub fn serialized_size(&self) -> usize {
        DIRECTORY_HEADER_SIZE
            + self
                .children
                .values()
                .map(|child| {
                    let body = match &child.node {
                        Node::File(_) => RECORD_SIZE,
                        Node::Dir(dir) => dir.serialized_size(),
                    };
                    RECORD_SIZE + child.name.len() + 1 + body
                })
                .sum::<usize>()
    }

    /// Append this directory to `out`, whose first byte sits at `base`
    ///
    /// `file_record` supplies the 9-byte record for each file path.
    pub fn serialize<F>(&self, base: u32, out: &mut Vec<u8>, file_record: &F) -> Result<()>
    where
        F: Fn(&str) -> Result<[u8; RECORD_SIZE]>,
    {
        let offset = |out: &Vec<u8>| -> Result<u32> {
            u32::try_from(base as usize + out.len())
                .map_err(|_| HpiError::Capacity("directory offset exceeds 32 bits".to_string()))
        };

        let here = offset(out)?;
        let list = here + DIRECTORY_HEADER_SIZE as u32;
        out.extend_from_slice(&(self.children.len() as u32).to_le_bytes());
        out.extend_from_slice(&list.to_le_bytes());

        let list_at = out.len();
        out.resize(list_at + self.children.len() * RECORD_SIZE, 0);

        for (i, child) in self.children.values().enumerate() {
            let name_offset = offset(out)?;
            out.extend_from_slice(&child.name);
            out.push(0);

            let data_offset = offset(out)?;
            let is_dir = match &child.node {
                Node::File(path) => {
                    out.extend_from_slice(&file_record(path)?);
                    0u8
                }
                Node::Dir(dir) => {
                    dir.serialize(base, out, file_record)?;
                    1u8
                }
            };

            let entry = list_at + i * RECORD_SIZE;
            out[entry..entry + 4].copy_from_slice(&name_offset.to_le_bytes());
            out[entry + 4..entry + 8].copy_from_slice(&data_offset.to_le_bytes());
            out[entry + 8] = is_dir;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(_: &str) -> Result<[u8; RECORD_SIZE]> {
        Ok([0xAB; RECORD_SIZE])
    }

    #[test]
    fn test_empty_root() {
        let root = DirNode::from_paths(std::iter::empty()).unwrap();
        assert_eq!(root.serialized_size(), 8);
        let mut out = Vec::new();
        root.serialize(20, &mut out, &record).unwrap();
        assert_eq!(hex::encode(&out), "000000001c000000");
    }

    #[test]
    fn test_single_file_layout() {
        let root = DirNode::from_paths(["a.txt"]).unwrap();
        // 8 + 9 + "a.txt\0" + file record
        assert_eq!(root.serialized_size(), 8 + 9 + 6 + 9);

        let mut out = Vec::new();
        root.serialize(20, &mut out, &record).unwrap();
        assert_eq!(out.len(), root.serialized_size());
        // one entry, listed at 28; name at 37, file record at 43
        assert_eq!(&out[0..8], &[1, 0, 0, 0, 28, 0, 0, 0]);
        assert_eq!(&out[8..17], &[37, 0, 0, 0, 43, 0, 0, 0, 0]);
        assert_eq!(&out[17..23], b"a.txt\0");
        assert_eq!(&out[23..], &[0xAB; 9]);
    }

    #[test]
    fn test_size_prediction_nested() {
        let paths = [
            "units/armcom.fbi",
            "units/corcom.fbi",
            "Units/scripts/armcom.cob",
            "anims/armcom.gaf",
            "readme.txt",
        ];
        let root = DirNode::from_paths(paths).unwrap();
        assert_eq!(root.len(), 3);
        let mut out = Vec::new();
        root.serialize(20, &mut out, &record).unwrap();
        assert_eq!(out.len(), root.serialized_size());
    }

    #[test]
    fn test_conflicts_rejected() {
        assert!(DirNode::from_paths(["a/b", "a/b/c"]).is_err());
        assert!(DirNode::from_paths(["a/b/c", "A/B"]).is_err());
        assert!(DirNode::from_paths(["x.txt", "X.TXT"]).is_err());
    }
}
