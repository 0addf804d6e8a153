//! Loose object store over a [`ByteStorage`].

use crate::object::{parse_header, wrap};
use crate::{
    ByteStorage, Commit, FileMode, GitObject, MemoryStorage, ObjectId, ObjectType, RawObject,
    Result, StorageError, Tree, TreeEntry,
};
use bytes::Bytes;
use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;
use std::io::{Read, Write};
use std::sync::Arc;

/// Size of the body chunks handed out by [`ObjectReader::next_chunk`].
pub const READ_CHUNK_SIZE: usize = 8192;

/// Longest object envelope header accepted (`"commit 18446744073709551615"`).
const MAX_HEADER_LEN: usize = 32;
/// Cap on preallocation from a declared object length.
const MAX_PREALLOC: usize = 16 * 1024 * 1024;

/// Splits a `/`-separated tree path into segments, rejecting empty, `.` and `..` segments.
pub(crate) fn split_path(path: &str) -> Result<Vec<&str>> {
    let trimmed = path.trim_matches('/');
    if trimmed.is_empty() {
        return Ok(Vec::new());
    }
    let segments: Vec<&str> = trimmed.split('/').collect();
    if segments
        .iter()
        .any(|s| s.is_empty() || *s == "." || *s == ".." || s.contains('\0'))
    {
        return Err(StorageError::InvalidPath(path.to_string()));
    }
    Ok(segments)
}

/// Content-addressed object store.
///
/// Objects are deflated and written to `objects/<xx>/<rest>` where `xx` are
/// the first two hex digits of the id.
#[derive(Debug, Clone)]
pub struct ObjectStore {
    storage: Arc<dyn ByteStorage>,
}

impl ObjectStore {
    /// Creates an object store over a byte storage.
    pub fn new(storage: Arc<dyn ByteStorage>) -> Self {
        Self { storage }
    }

    /// Creates a store backed by fresh in-memory storage.
    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryStorage::new()))
    }

    /// Returns the underlying byte storage.
    pub fn storage(&self) -> &Arc<dyn ByteStorage> {
        &self.storage
    }

    fn object_path(id: &ObjectId) -> String {
        let hex = id.to_hex();
        format!("objects/{}/{}", &hex[..2], &hex[2..])
    }

    /// Checks if an object exists.
    pub fn contains(&self, id: &ObjectId) -> bool {
        self.storage.is_file(&Self::object_path(id))
    }

    /// Stores content of the given type and returns its id.
    ///
    /// Writing an object that already exists is a no-op.
    pub fn add_object(&self, object_type: ObjectType, data: &[u8]) -> Result<ObjectId> {
        let id = ObjectId::hash_object(object_type, data);
        if self.contains(&id) {
            return Ok(id);
        }

        let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(&wrap(object_type, data))?;
        let compressed = encoder.finish()?;
        self.storage
            .put_contents(&Self::object_path(&id), &compressed)?;

        tracing::debug!(id = %id, kind = %object_type, size = data.len(), "Stored object");
        Ok(id)
    }

    /// Stores a decoded object.
    pub fn add(&self, object: &GitObject) -> Result<ObjectId> {
        self.add_object(object.object_type(), &object.encode())
    }

    /// Stores a raw object.
    pub fn add_raw(&self, object: &RawObject) -> Result<ObjectId> {
        self.add_object(object.object_type, &object.data)
    }

    /// Opens a streaming read session for an object.
    pub fn read_object(&self, id: &ObjectId) -> Result<ObjectReader<'_>> {
        ObjectReader::open(self, *id)
    }

    /// Reads an object's type and content.
    pub fn read_raw(&self, id: &ObjectId) -> Result<RawObject> {
        let mut reader = self.read_object(id)?;
        let data = reader.read_all()?;
        Ok(RawObject {
            id: *id,
            object_type: reader.object_type(),
            data,
        })
    }

    /// Reads and decodes an object.
    pub fn read(&self, id: &ObjectId) -> Result<GitObject> {
        self.read_raw(id)?.decode()
    }

    /// Reads a tree, failing if the object is of another type.
    pub fn read_tree(&self, id: &ObjectId) -> Result<Tree> {
        match self.read(id)? {
            GitObject::Tree(tree) => Ok(tree),
            other => Err(StorageError::InvalidObject(format!(
                "expected tree {}, found {}",
                id,
                other.object_type()
            ))),
        }
    }

    /// Reads a commit, failing if the object is of another type.
    pub fn read_commit(&self, id: &ObjectId) -> Result<Commit> {
        match self.read(id)? {
            GitObject::Commit(commit) => Ok(commit),
            other => Err(StorageError::InvalidObject(format!(
                "expected commit {}, found {}",
                id,
                other.object_type()
            ))),
        }
    }

    /// Returns an object's type without reading its body.
    pub fn object_type(&self, id: &ObjectId) -> Result<ObjectType> {
        Ok(self.read_object(id)?.object_type())
    }

    /// Returns an object's declared length without reading its body.
    pub fn object_size(&self, id: &ObjectId) -> Result<usize> {
        Ok(self.read_object(id)?.len())
    }

    /// Resolves a commit or tree id to its root tree id.
    pub fn root_tree(&self, id: &ObjectId) -> Result<ObjectId> {
        match self.object_type(id)? {
            ObjectType::Commit => Ok(self.read_commit(id)?.tree),
            ObjectType::Tree => Ok(*id),
            ObjectType::Blob => Err(StorageError::InvalidObject(format!(
                "{} is a blob, not a commit or tree",
                id
            ))),
        }
    }

    /// Looks up the entry at `path` under a root tree.
    ///
    /// The empty path resolves to the root tree itself.
    pub fn read_by_path(&self, root: &ObjectId, path: &str) -> Result<Option<TreeEntry>> {
        let segments = split_path(path)?;
        let mut current = TreeEntry::new(FileMode::Directory, "", *root);
        for segment in segments {
            if !current.mode.is_dir() {
                return Ok(None);
            }
            let tree = self.read_tree(&current.oid)?;
            match tree.get(segment) {
                Some(entry) => current = entry.clone(),
                None => return Ok(None),
            }
        }
        Ok(Some(current))
    }

    /// Lists every entry below `path`, sorted by their paths relative to `path`.
    pub fn find_path_descendants(
        &self,
        root: &ObjectId,
        path: &str,
    ) -> Result<Vec<(String, TreeEntry)>> {
        let start = self
            .read_by_path(root, path)?
            .ok_or_else(|| StorageError::PathNotFound(path.to_string()))?;
        if !start.mode.is_dir() {
            return Ok(Vec::new());
        }

        let mut found = Vec::new();
        let mut stack = vec![(String::new(), start.oid)];
        while let Some((prefix, tree_id)) = stack.pop() {
            let tree = self.read_tree(&tree_id)?;
            for entry in tree.iter().rev() {
                let child = if prefix.is_empty() {
                    entry.name.clone()
                } else {
                    format!("{}/{}", prefix, entry.name)
                };
                if entry.mode.is_dir() {
                    stack.push((child.clone(), entry.oid));
                }
                found.push((child, entry.clone()));
            }
        }
        found.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(found)
    }
}

/// A streaming inflate session over one stored object.
///
/// The envelope header is parsed on open; the body is produced in chunks.
/// [`ObjectReader::read_all`] buffers the body once and caches it. Calling it
/// after [`ObjectReader::next_chunk`] re-opens the object from storage.
pub struct ObjectReader<'a> {
    store: &'a ObjectStore,
    id: ObjectId,
    object_type: ObjectType,
    len: usize,
    decoder: ZlibDecoder<Box<dyn Read + Send>>,
    produced: usize,
    started: bool,
    cached: Option<Bytes>,
}

impl<'a> ObjectReader<'a> {
    fn open(store: &'a ObjectStore, id: ObjectId) -> Result<Self> {
        let path = ObjectStore::object_path(&id);
        if !store.storage.is_file(&path) {
            return Err(StorageError::ObjectNotFound(id.to_hex()));
        }
        let mut decoder = ZlibDecoder::new(store.storage.open_read(&path)?);

        let mut head = Vec::with_capacity(MAX_HEADER_LEN);
        let mut byte = [0u8; 1];
        loop {
            if decoder.read(&mut byte)? == 0 {
                return Err(StorageError::InvalidObject(format!(
                    "object {} ends inside its header",
                    id
                )));
            }
            if byte[0] == 0 {
                break;
            }
            head.push(byte[0]);
            if head.len() > MAX_HEADER_LEN {
                return Err(StorageError::InvalidObject(format!(
                    "object {} has an oversized header",
                    id
                )));
            }
        }
        let (object_type, len) = parse_header(&head)?;

        Ok(Self {
            store,
            id,
            object_type,
            len,
            decoder,
            produced: 0,
            started: false,
            cached: None,
        })
    }

    /// Returns the object id.
    pub fn id(&self) -> ObjectId {
        self.id
    }

    /// Returns the object type from the header.
    pub fn object_type(&self) -> ObjectType {
        self.object_type
    }

    /// Returns the declared body length from the header.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Returns true if the declared body length is zero.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Returns the next chunk of the body, or `None` once it is exhausted.
    pub fn next_chunk(&mut self) -> Result<Option<Bytes>> {
        self.started = true;
        let mut buf = vec![0u8; READ_CHUNK_SIZE];
        let n = self.decoder.read(&mut buf)?;
        if n == 0 {
            if self.produced != self.len {
                return Err(StorageError::InvalidObject(format!(
                    "object {} declares {} bytes but holds {}",
                    self.id, self.len, self.produced
                )));
            }
            return Ok(None);
        }
        self.produced += n;
        if self.produced > self.len {
            return Err(StorageError::InvalidObject(format!(
                "object {} is longer than its declared {} bytes",
                self.id, self.len
            )));
        }
        buf.truncate(n);
        Ok(Some(Bytes::from(buf)))
    }

    /// Reads the whole body, caching it for later calls.
    pub fn read_all(&mut self) -> Result<Bytes> {
        if let Some(cached) = &self.cached {
            return Ok(cached.clone());
        }
        if self.started {
            tracing::debug!(id = %self.id, "Re-opening object for a full read");
            *self = Self::open(self.store, self.id)?;
        }

        let mut body = Vec::with_capacity(self.len.min(MAX_PREALLOC));
        while let Some(chunk) = self.next_chunk()? {
            body.extend_from_slice(&chunk);
        }
        let body = Bytes::from(body);
        self.cached = Some(body.clone());
        Ok(body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{FileMode, Signature};

    #[test]
    fn test_oversized_declared_length_is_invalid() {
        let store = ObjectStore::in_memory();
        let id = ObjectId::from_bytes([7u8; 20]);
        let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
        encoder
            .write_all(b"blob 18446744073709551000\0abc")
            .unwrap();
        store
            .storage()
            .put_contents(&ObjectStore::object_path(&id), &encoder.finish().unwrap())
            .unwrap();

        let body = store.read_object(&id).and_then(|mut reader| reader.read_all());
        assert!(matches!(body, Err(StorageError::InvalidObject(_))));
        assert!(matches!(
            store.read_raw(&id),
            Err(StorageError::InvalidObject(_))
        ));
    }

    #[test]
    fn test_add_and_read_blob() {
        let store = ObjectStore::in_memory();
        let id = store.add_object(ObjectType::Blob, b"hello\n").unwrap();
        assert_eq!(id.to_hex(), "ce013625030ba8dba906f756967f9e9ca394464a");
        assert!(store
            .storage()
            .is_file("objects/ce/013625030ba8dba906f756967f9e9ca394464a"));

        let raw = store.read_raw(&id).unwrap();
        assert_eq!(raw.object_type, ObjectType::Blob);
        assert_eq!(raw.data.as_ref(), b"hello\n");
    }

    #[test]
    fn test_add_is_idempotent() {
        let store = ObjectStore::in_memory();
        let a = store.add_object(ObjectType::Blob, b"same").unwrap();
        let b = store.add_object(ObjectType::Blob, b"same").unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_missing_object() {
        let store = ObjectStore::in_memory();
        let missing = ObjectId::from_bytes([7u8; 20]);
        assert!(!store.contains(&missing));
        assert!(matches!(
            store.read_object(&missing),
            Err(StorageError::ObjectNotFound(_))
        ));
    }

    #[test]
    fn test_streaming_chunks_then_read_all_reopens() {
        let store = ObjectStore::in_memory();
        let data: Vec<u8> = (0..READ_CHUNK_SIZE * 3 + 17).map(|i| (i % 251) as u8).collect();
        let id = store.add_object(ObjectType::Blob, &data).unwrap();

        let mut reader = store.read_object(&id).unwrap();
        assert_eq!(reader.len(), data.len());
        let first = reader.next_chunk().unwrap().unwrap();
        assert!(!first.is_empty());

        let all = reader.read_all().unwrap();
        assert_eq!(all.as_ref(), data.as_slice());
        assert_eq!(reader.read_all().unwrap(), all);
    }

    #[test]
    fn test_chunks_cover_whole_body() {
        let store = ObjectStore::in_memory();
        let data = vec![42u8; READ_CHUNK_SIZE * 2 + 1];
        let id = store.add_object(ObjectType::Blob, &data).unwrap();

        let mut reader = store.read_object(&id).unwrap();
        let mut collected = Vec::new();
        while let Some(chunk) = reader.next_chunk().unwrap() {
            collected.extend_from_slice(&chunk);
        }
        assert_eq!(collected, data);
    }

    #[test]
    fn test_type_and_size_without_body() {
        let store = ObjectStore::in_memory();
        let id = store.add_object(ObjectType::Blob, &[1u8; 5000]).unwrap();
        assert_eq!(store.object_type(&id).unwrap(), ObjectType::Blob);
        assert_eq!(store.object_size(&id).unwrap(), 5000);
    }

    #[test]
    fn test_corrupt_object_is_an_error() {
        let store = ObjectStore::in_memory();
        let id = ObjectId::from_bytes([3u8; 20]);
        store
            .storage()
            .put_contents(&ObjectStore::object_path(&id), b"not zlib at all")
            .unwrap();
        assert!(store.read_object(&id).and_then(|mut r| r.read_all()).is_err());
    }

    fn nested_store() -> (ObjectStore, ObjectId, ObjectId) {
        let store = ObjectStore::in_memory();
        let blob = store.add_object(ObjectType::Blob, b"leaf").unwrap();
        let inner = Tree::new(vec![TreeEntry::new(FileMode::Regular, "leaf.txt", blob)]);
        let inner_id = store.add(&GitObject::Tree(inner)).unwrap();
        let root = Tree::new(vec![
            TreeEntry::new(FileMode::Directory, "docs", inner_id),
            TreeEntry::new(FileMode::Regular, "README.md", blob),
        ]);
        let root_id = store.add(&GitObject::Tree(root)).unwrap();
        (store, root_id, blob)
    }

    #[test]
    fn test_read_by_path() {
        let (store, root, blob) = nested_store();
        let entry = store.read_by_path(&root, "docs/leaf.txt").unwrap().unwrap();
        assert_eq!(entry.oid, blob);
        assert_eq!(entry.mode, FileMode::Regular);
        assert!(store.read_by_path(&root, "docs/missing").unwrap().is_none());
        assert!(store.read_by_path(&root, "README.md/below").unwrap().is_none());
        assert_eq!(store.read_by_path(&root, "").unwrap().unwrap().oid, root);
        assert!(store.read_by_path(&root, "docs/../x").is_err());
    }

    #[test]
    fn test_find_path_descendants() {
        let (store, root, _) = nested_store();
        let all: Vec<String> = store
            .find_path_descendants(&root, "")
            .unwrap()
            .into_iter()
            .map(|(path, _)| path)
            .collect();
        assert_eq!(all, vec!["README.md", "docs", "docs/leaf.txt"]);
        assert!(store.find_path_descendants(&root, "nope").is_err());
    }

    #[test]
    fn test_root_tree_of_commit() {
        let (store, root, blob) = nested_store();
        let commit = Commit {
            tree: root,
            parents: Vec::new(),
            author: Signature::new("A <a@x>", "1 +0000"),
            committer: Signature::new("A <a@x>", "1 +0000"),
            message: "m".to_string(),
        };
        let commit_id = store.add(&GitObject::Commit(commit)).unwrap();
        assert_eq!(store.root_tree(&commit_id).unwrap(), root);
        assert_eq!(store.root_tree(&root).unwrap(), root);
        assert!(store.root_tree(&blob).is_err());
        assert!(store.read_tree(&commit_id).is_err());
    }
}
