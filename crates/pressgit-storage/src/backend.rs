//! Byte storage backends.
//!
//! The object store and the reference store only ever talk to a
//! [`ByteStorage`]: a small file-system-like key/value interface with
//! `/`-separated paths relative to the storage root.

use crate::{Result, StorageError};
use bytes::Bytes;
use parking_lot::RwLock;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::fs;
use std::io::{self, Cursor, Read};
use std::path::{Path, PathBuf};

/// A trait for byte storage backends.
pub trait ByteStorage: Send + Sync + fmt::Debug {
    /// Returns true if `path` is a directory.
    fn is_dir(&self, path: &str) -> bool;

    /// Returns true if `path` is a file.
    fn is_file(&self, path: &str) -> bool;

    /// Creates a directory and all of its parents.
    fn mkdir(&self, path: &str) -> Result<()>;

    /// Reads a whole file.
    fn read_file(&self, path: &str) -> Result<Bytes>;

    /// Opens a file for streaming reads.
    fn open_read(&self, path: &str) -> Result<Box<dyn Read + Send>> {
        Ok(Box::new(Cursor::new(self.read_file(path)?)))
    }

    /// Writes a whole file, creating parent directories as needed.
    fn put_contents(&self, path: &str, data: &[u8]) -> Result<()>;

    /// Moves a file.
    fn rename(&self, from: &str, to: &str) -> Result<()>;

    /// Lists the names directly under a directory, sorted.
    fn ls(&self, path: &str) -> Result<Vec<String>>;

    /// Removes a file.
    fn remove(&self, path: &str) -> Result<()>;
}

fn normalize(path: &str) -> Result<String> {
    let trimmed = path.trim_matches('/');
    for segment in trimmed.split('/') {
        if segment == ".." || segment == "." || (segment.is_empty() && !trimmed.is_empty()) {
            return Err(StorageError::InvalidPath(path.to_string()));
        }
    }
    Ok(trimmed.to_string())
}

fn parent_dirs(path: &str) -> impl Iterator<Item = &str> {
    path.match_indices('/').map(move |(i, _)| &path[..i])
}

fn not_found(path: &str) -> StorageError {
    StorageError::Io(io::Error::new(
        io::ErrorKind::NotFound,
        format!("no such file: {}", path),
    ))
}

#[derive(Debug, Default)]
struct MemoryTree {
    files: BTreeMap<String, Bytes>,
    dirs: BTreeSet<String>,
}

impl MemoryTree {
    fn add_parents(&mut self, path: &str) {
        for dir in parent_dirs(path) {
            self.dirs.insert(dir.to_string());
        }
    }
}

/// An in-memory storage backend.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    tree: RwLock<MemoryTree>,
}

impl MemoryStorage {
    /// Creates an empty in-memory backend.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of stored files.
    pub fn file_count(&self) -> usize {
        self.tree.read().files.len()
    }
}

impl ByteStorage for MemoryStorage {
    fn is_dir(&self, path: &str) -> bool {
        match normalize(path) {
            Ok(p) => p.is_empty() || self.tree.read().dirs.contains(&p),
            Err(_) => false,
        }
    }

    fn is_file(&self, path: &str) -> bool {
        match normalize(path) {
            Ok(p) => self.tree.read().files.contains_key(&p),
            Err(_) => false,
        }
    }

    fn mkdir(&self, path: &str) -> Result<()> {
        let path = normalize(path)?;
        if path.is_empty() {
            return Ok(());
        }
        let mut tree = self.tree.write();
        tree.add_parents(&path);
        tree.dirs.insert(path);
        Ok(())
    }

    fn read_file(&self, path: &str) -> Result<Bytes> {
        let path = normalize(path)?;
        self.tree
            .read()
            .files
            .get(&path)
            .cloned()
            .ok_or_else(|| not_found(&path))
    }

    fn put_contents(&self, path: &str, data: &[u8]) -> Result<()> {
        let path = normalize(path)?;
        let mut tree = self.tree.write();
        tree.add_parents(&path);
        tree.files.insert(path, Bytes::copy_from_slice(data));
        Ok(())
    }

    fn rename(&self, from: &str, to: &str) -> Result<()> {
        let from = normalize(from)?;
        let to = normalize(to)?;
        let mut tree = self.tree.write();
        let data = tree.files.remove(&from).ok_or_else(|| not_found(&from))?;
        tree.add_parents(&to);
        tree.files.insert(to, data);
        Ok(())
    }

    fn ls(&self, path: &str) -> Result<Vec<String>> {
        let path = normalize(path)?;
        let prefix = if path.is_empty() {
            String::new()
        } else {
            format!("{}/", path)
        };
        let tree = self.tree.read();
        let children: BTreeSet<String> = tree
            .files
            .keys()
            .chain(tree.dirs.iter())
            .filter_map(|key| key.strip_prefix(&prefix))
            .filter_map(|rest| rest.split('/').next())
            .filter(|name| !name.is_empty())
            .map(str::to_string)
            .collect();
        Ok(children.into_iter().collect())
    }

    fn remove(&self, path: &str) -> Result<()> {
        let path = normalize(path)?;
        self.tree
            .write()
            .files
            .remove(&path)
            .map(|_| ())
            .ok_or_else(|| not_found(&path))
    }
}

/// A storage backend rooted at a local directory.
#[derive(Debug, Clone)]
pub struct LocalStorage {
    root: PathBuf,
}

impl LocalStorage {
    /// Opens (and creates, if needed) a local storage root.
    pub fn new<P: AsRef<Path>>(root: P) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    /// Returns the root directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, path: &str) -> Result<PathBuf> {
        let path = normalize(path)?;
        let mut full = self.root.clone();
        for segment in path.split('/').filter(|s| !s.is_empty()) {
            full.push(segment);
        }
        Ok(full)
    }
}

impl ByteStorage for LocalStorage {
    fn is_dir(&self, path: &str) -> bool {
        self.resolve(path).map(|p| p.is_dir()).unwrap_or(false)
    }

    fn is_file(&self, path: &str) -> bool {
        self.resolve(path).map(|p| p.is_file()).unwrap_or(false)
    }

    fn mkdir(&self, path: &str) -> Result<()> {
        fs::create_dir_all(self.resolve(path)?)?;
        Ok(())
    }

    fn read_file(&self, path: &str) -> Result<Bytes> {
        Ok(Bytes::from(fs::read(self.resolve(path)?)?))
    }

    fn open_read(&self, path: &str) -> Result<Box<dyn Read + Send>> {
        Ok(Box::new(fs::File::open(self.resolve(path)?)?))
    }

    fn put_contents(&self, path: &str, data: &[u8]) -> Result<()> {
        let target = self.resolve(path)?;
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut tmp = target.clone().into_os_string();
        tmp.push(format!(".tmp-{}", std::process::id()));
        let tmp = PathBuf::from(tmp);
        fs::write(&tmp, data)?;
        fs::rename(&tmp, &target)?;
        Ok(())
    }

    fn rename(&self, from: &str, to: &str) -> Result<()> {
        let to = self.resolve(to)?;
        if let Some(parent) = to.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::rename(self.resolve(from)?, to)?;
        Ok(())
    }

    fn ls(&self, path: &str) -> Result<Vec<String>> {
        let mut names = Vec::new();
        for entry in fs::read_dir(self.resolve(path)?)? {
            let name = entry?.file_name().to_string_lossy().into_owned();
            if !name.contains(".tmp-") {
                names.push(name);
            }
        }
        names.sort();
        Ok(names)
    }

    fn remove(&self, path: &str) -> Result<()> {
        fs::remove_file(self.resolve(path)?)?;
        Ok(())
    }
}
