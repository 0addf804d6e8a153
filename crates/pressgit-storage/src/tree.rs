//! Tree objects: sorted directory listings.

use crate::{ObjectId, ObjectType, Result, StorageError};
use std::cmp::Ordering;
use std::fmt;

/// The mode of a tree entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FileMode {
    /// A subdirectory (`40000`).
    Directory,
    /// A regular file (`100644`).
    Regular,
    /// An executable file (`100755`).
    Executable,
    /// A symbolic link (`120000`).
    Symlink,
    /// A submodule commit link (`160000`).
    CommitLink,
}

impl FileMode {
    /// Returns the octal spelling written into tree objects.
    pub fn as_octal(&self) -> &'static str {
        match self {
            Self::Directory => "40000",
            Self::Regular => "100644",
            Self::Executable => "100755",
            Self::Symlink => "120000",
            Self::CommitLink => "160000",
        }
    }

    /// Parses a mode, normalizing the spellings found in real repositories.
    pub fn parse(mode: &str) -> Result<Self> {
        let mode = mode.trim_start_matches('0');
        if mode == "40000" {
            return Ok(Self::Directory);
        }
        if mode.len() == 6 && mode.bytes().all(|b| (b'0'..=b'7').contains(&b)) {
            match &mode[..3] {
                "100" => {
                    // Only the owner-execute bit decides; group and other bits vary in old trees.
                    let owner = mode.as_bytes()[3] - b'0';
                    return Ok(if owner & 0o1 != 0 {
                        Self::Executable
                    } else {
                        Self::Regular
                    });
                }
                "120" => return Ok(Self::Symlink),
                "160" => return Ok(Self::CommitLink),
                _ => {}
            }
        }
        Err(StorageError::InvalidObject(format!(
            "unknown tree entry mode: {}",
            mode
        )))
    }

    /// Returns true for subdirectories.
    pub fn is_dir(&self) -> bool {
        matches!(self, Self::Directory)
    }

    /// Returns the type of object the entry points at, if it lives in this repository.
    pub fn object_type(&self) -> Option<ObjectType> {
        match self {
            Self::Directory => Some(ObjectType::Tree),
            Self::Regular | Self::Executable | Self::Symlink => Some(ObjectType::Blob),
            Self::CommitLink => None,
        }
    }
}

impl fmt::Display for FileMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_octal())
    }
}

/// A single entry of a tree.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TreeEntry {
    /// Entry mode.
    pub mode: FileMode,
    /// File or directory name (a single path segment).
    pub name: String,
    /// The object the entry points at.
    pub oid: ObjectId,
}

impl TreeEntry {
    /// Creates a new tree entry.
    pub fn new(mode: FileMode, name: impl Into<String>, oid: ObjectId) -> Self {
        Self {
            mode,
            name: name.into(),
            oid,
        }
    }

    /// Compares entries the way git orders them: directories sort as if
    /// their name ended in `/`.
    pub fn sort_cmp(&self, other: &TreeEntry) -> Ordering {
        let a = self.name.as_bytes();
        let b = other.name.as_bytes();
        let len = a.len().min(b.len());
        match a[..len].cmp(&b[..len]) {
            Ordering::Equal => {}
            ord => return ord,
        }
        let tail = |bytes: &[u8], mode: FileMode| -> u8 {
            match bytes.get(len) {
                Some(&c) => c,
                None if mode.is_dir() => b'/',
                None => 0,
            }
        };
        tail(a, self.mode).cmp(&tail(b, other.mode))
    }
}

/// A directory listing with unique, sorted entry names.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Tree {
    entries: Vec<TreeEntry>,
}

impl Tree {
    /// Creates a tree from entries; later entries replace earlier ones with the same name.
    pub fn new(entries: impl IntoIterator<Item = TreeEntry>) -> Self {
        let mut tree = Self::default();
        for entry in entries {
            tree.insert(entry);
        }
        tree
    }

    /// Inserts or replaces an entry.
    pub fn insert(&mut self, entry: TreeEntry) {
        self.entries.retain(|e| e.name != entry.name);
        let pos = self
            .entries
            .iter()
            .position(|e| e.sort_cmp(&entry) == Ordering::Greater)
            .unwrap_or(self.entries.len());
        self.entries.insert(pos, entry);
    }

    /// Removes an entry by name.
    pub fn remove(&mut self, name: &str) -> Option<TreeEntry> {
        let pos = self.entries.iter().position(|e| e.name == name)?;
        Some(self.entries.remove(pos))
    }

    /// Looks up an entry by name.
    pub fn get(&self, name: &str) -> Option<&TreeEntry> {
        self.entries.iter().find(|e| e.name == name)
    }

    /// Returns the entries in tree order.
    pub fn entries(&self) -> &[TreeEntry] {
        &self.entries
    }

    /// Iterates the entries in tree order.
    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &TreeEntry> {
        self.entries.iter()
    }

    /// Returns the number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if the tree has no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Serializes the tree: `<mode> <name>\0<20 raw bytes>` per entry.
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.entries.len() * 40);
        for entry in &self.entries {
            out.extend_from_slice(entry.mode.as_octal().as_bytes());
            out.push(b' ');
            out.extend_from_slice(entry.name.as_bytes());
            out.push(0);
            out.extend_from_slice(entry.oid.as_bytes());
        }
        out
    }

    /// Parses a serialized tree.
    pub fn decode(data: &[u8]) -> Result<Self> {
        let mut entries = Vec::new();
        let mut pos = 0;
        while pos < data.len() {
            let space = data[pos..]
                .iter()
                .position(|&b| b == b' ')
                .ok_or_else(|| truncated(pos, "mode"))?;
            let mode = std::str::from_utf8(&data[pos..pos + space])
                .map_err(|_| StorageError::InvalidObject("non-ascii tree mode".to_string()))?;
            let mode = FileMode::parse(mode)?;
            pos += space + 1;

            let nul = data[pos..]
                .iter()
                .position(|&b| b == 0)
                .ok_or_else(|| truncated(pos, "name"))?;
            let name = String::from_utf8(data[pos..pos + nul].to_vec())
                .map_err(|_| StorageError::InvalidObject("non-utf8 tree entry name".to_string()))?;
            if name.is_empty() || name.contains('/') {
                return Err(StorageError::InvalidObject(format!(
                    "invalid tree entry name: {:?}",
                    name
                )));
            }
            pos += nul + 1;

            if data.len() < pos + 20 {
                return Err(truncated(pos, "hash"));
            }
            let oid = ObjectId::from_slice(&data[pos..pos + 20])?;
            pos += 20;

            entries.push(TreeEntry::new(mode, name, oid));
        }
        Ok(Self::new(entries))
    }
}

impl<'a> IntoIterator for &'a Tree {
    type Item = &'a TreeEntry;
    type IntoIter = std::slice::Iter<'a, TreeEntry>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.iter()
    }
}

fn truncated(offset: usize, what: &str) -> StorageError {
    StorageError::InvalidObject(format!("truncated tree entry {} at offset {}", what, offset))
}
