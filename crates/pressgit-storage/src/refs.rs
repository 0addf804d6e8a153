//! Git reference management.
//!
//! References are stored as small files in the byte storage: `HEAD`,
//! `refs/heads/<branch>`, and `refs/remotes/<remote>/<branch>`. A file holds
//! either a hex object id or `ref: <target>`.

use crate::{ByteStorage, ObjectId, ObjectStore, Result, StorageError};
use std::sync::Arc;

/// Prefix of local branches.
pub const HEADS_PREFIX: &str = "refs/heads/";
/// Prefix of remote tracking branches.
pub const REMOTES_PREFIX: &str = "refs/remotes/";

const SYMREF_PREFIX: &str = "ref: ";

/// A git reference (branch or symbolic ref).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reference {
    /// Direct reference to an object.
    Direct(ObjectId),
    /// Symbolic reference (e.g., HEAD -> refs/heads/main).
    Symbolic(String),
}

impl Reference {
    /// Returns the object ID if this is a direct reference.
    pub fn as_direct(&self) -> Option<ObjectId> {
        match self {
            Self::Direct(id) => Some(*id),
            Self::Symbolic(_) => None,
        }
    }

    /// Returns the target name if this is a symbolic reference.
    pub fn as_symbolic(&self) -> Option<&str> {
        match self {
            Self::Direct(_) => None,
            Self::Symbolic(target) => Some(target),
        }
    }

    fn parse(name: &str, content: &[u8]) -> Result<Self> {
        let text = std::str::from_utf8(content)
            .map_err(|_| StorageError::InvalidRef(format!("{} is not utf-8", name)))?
            .trim();
        if let Some(target) = text.strip_prefix(SYMREF_PREFIX) {
            return Ok(Self::Symbolic(target.trim().to_string()));
        }
        if ObjectId::is_hex(text) {
            return Ok(Self::Direct(ObjectId::from_hex(text)?));
        }
        Err(StorageError::InvalidRef(format!(
            "{} holds neither an object id nor a symbolic ref",
            name
        )))
    }

    fn serialize(&self) -> String {
        match self {
            Self::Direct(id) => format!("{}\n", id),
            Self::Symbolic(target) => format!("{}{}\n", SYMREF_PREFIX, target),
        }
    }
}

/// Checks a reference name before it is used as a storage path.
///
/// Names with a `/` must live under `refs/heads/` or `refs/remotes/`.
/// Single-segment names must be upper case, such as `HEAD` or `ORIG_HEAD`.
pub fn validate_ref_name(name: &str) -> Result<()> {
    let invalid = |why: &str| Err(StorageError::InvalidRef(format!("{:?}: {}", name, why)));
    if name.is_empty() {
        return invalid("empty name");
    }
    if name.contains("..") {
        return invalid("contains '..'");
    }
    if name.starts_with('/') || name.ends_with('/') {
        return invalid("leading or trailing '/'");
    }
    if name
        .chars()
        .any(|c| c == '\\' || c == '\0' || c.is_control() || c == ' ')
    {
        return invalid("contains a forbidden character");
    }
    if name.contains('/') {
        if !(name.starts_with(HEADS_PREFIX) || name.starts_with(REMOTES_PREFIX)) {
            return invalid("must be under refs/heads/ or refs/remotes/");
        }
        if name.split('/').any(|s| s.is_empty() || s == ".") {
            return invalid("empty path segment");
        }
    } else if !name.bytes().all(|b| b.is_ascii_uppercase() || b == b'_') {
        return invalid("top-level names must be upper case");
    }
    Ok(())
}

/// Reference store backed by a [`ByteStorage`].
#[derive(Debug, Clone)]
pub struct RefStore {
    storage: Arc<dyn ByteStorage>,
    objects: ObjectStore,
}

impl RefStore {
    /// Creates a reference store sharing the object store's storage.
    pub fn new(objects: ObjectStore) -> Self {
        Self {
            storage: objects.storage().clone(),
            objects,
        }
    }

    /// Reads a reference without resolving it.
    pub fn read_ref(&self, name: &str) -> Result<Reference> {
        validate_ref_name(name)?;
        if !self.storage.is_file(name) {
            return Err(StorageError::RefNotFound(name.to_string()));
        }
        Reference::parse(name, &self.storage.read_file(name)?)
    }

    /// Resolves a reference to an object id.
    ///
    /// A full hex id naming a stored object resolves to itself. Symbolic refs
    /// are followed exactly one hop; a branch holding the null id is unborn
    /// and reported as not found.
    pub fn get_ref(&self, name: &str) -> Result<ObjectId> {
        if ObjectId::is_hex(name) {
            let id = ObjectId::from_hex(name)?;
            if self.objects.contains(&id) {
                return Ok(id);
            }
        }
        let id = match self.read_ref(name)? {
            Reference::Direct(id) => id,
            Reference::Symbolic(target) => match self.read_ref(&target)? {
                Reference::Direct(id) => id,
                Reference::Symbolic(_) => {
                    return Err(StorageError::InvalidRef(format!(
                        "{} -> {} is a nested symbolic ref",
                        name, target
                    )))
                }
            },
        };
        if id.is_null() {
            return Err(StorageError::RefNotFound(name.to_string()));
        }
        Ok(id)
    }

    /// Resolves a reference, mapping "not found" and "unborn" to `None`.
    pub fn try_get_ref(&self, name: &str) -> Result<Option<ObjectId>> {
        match self.get_ref(name) {
            Ok(id) => Ok(Some(id)),
            Err(StorageError::RefNotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Sets a reference to point to an object.
    pub fn set_ref(&self, name: &str, target: ObjectId) -> Result<()> {
        self.write(name, &Reference::Direct(target))
    }

    /// Sets a symbolic reference.
    pub fn set_symbolic_ref(&self, name: &str, target: &str) -> Result<()> {
        validate_ref_name(target)?;
        self.write(name, &Reference::Symbolic(target.to_string()))
    }

    fn write(&self, name: &str, reference: &Reference) -> Result<()> {
        validate_ref_name(name)?;
        self.storage
            .put_contents(name, reference.serialize().as_bytes())?;
        tracing::debug!(name, reference = ?reference, "Updated ref");
        Ok(())
    }

    /// Deletes a reference.
    pub fn delete_ref(&self, name: &str) -> Result<()> {
        validate_ref_name(name)?;
        if !self.storage.is_file(name) {
            return Err(StorageError::RefNotFound(name.to_string()));
        }
        self.storage.remove(name)
    }

    /// Returns true if `refs/heads/<branch>` exists (born or unborn).
    pub fn branch_exists(&self, branch: &str) -> bool {
        let name = format!("{}{}", HEADS_PREFIX, branch);
        validate_ref_name(&name).is_ok() && self.storage.is_file(&name)
    }

    /// Gets the current branch name (if HEAD is symbolic to a local branch).
    pub fn current_branch(&self) -> Option<String> {
        match self.read_ref("HEAD").ok()? {
            Reference::Symbolic(target) => target.strip_prefix(HEADS_PREFIX).map(str::to_string),
            Reference::Direct(_) => None,
        }
    }

    /// Lists references whose names start with any of `prefixes`, sorted by
    /// name, followed by `HEAD` when it matches. An empty prefix list matches
    /// everything.
    pub fn list_refs(&self, prefixes: &[&str]) -> Result<Vec<(String, Reference)>> {
        let matches = |name: &str| prefixes.is_empty() || prefixes.iter().any(|p| name.starts_with(p));

        let mut names = Vec::new();
        let mut stack = vec!["refs".to_string()];
        while let Some(dir) = stack.pop() {
            if !self.storage.is_dir(&dir) {
                continue;
            }
            for child in self.storage.ls(&dir)? {
                let path = format!("{}/{}", dir, child);
                if self.storage.is_dir(&path) {
                    stack.push(path);
                } else if matches(&path) && validate_ref_name(&path).is_ok() {
                    names.push(path);
                }
            }
        }
        names.sort();

        let mut refs = Vec::with_capacity(names.len() + 1);
        for name in names {
            let reference = self.read_ref(&name)?;
            refs.push((name, reference));
        }
        if matches("HEAD") && self.storage.is_file("HEAD") {
            refs.push(("HEAD".to_string(), self.read_ref("HEAD")?));
        }
        Ok(refs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ObjectType;

    fn store() -> (RefStore, ObjectId) {
        let objects = ObjectStore::in_memory();
        let id = objects.add_object(ObjectType::Blob, b"target").unwrap();
        (RefStore::new(objects), id)
    }

    #[test]
    fn test_ref_store_basic() {
        let (refs, id) = store();
        refs.set_ref("refs/heads/main", id).unwrap();
        refs.set_symbolic_ref("HEAD", "refs/heads/main").unwrap();

        assert_eq!(refs.current_branch(), Some("main".to_string()));
        assert_eq!(refs.get_ref("HEAD").unwrap(), id);
        assert_eq!(refs.get_ref("refs/heads/main").unwrap(), id);
        assert_eq!(
            refs.read_ref("HEAD").unwrap(),
            Reference::Symbolic("refs/heads/main".to_string())
        );
    }

    #[test]
    fn test_ref_file_format() {
        let (refs, id) = store();
        refs.set_ref("refs/heads/main", id).unwrap();
        refs.set_symbolic_ref("HEAD", "refs/heads/main").unwrap();
        let storage = refs.storage.clone();
        assert_eq!(
            storage.read_file("HEAD").unwrap().as_ref(),
            b"ref: refs/heads/main\n"
        );
        assert_eq!(
            storage.read_file("refs/heads/main").unwrap().as_ref(),
            format!("{}\n", id).as_bytes()
        );
    }

    #[test]
    fn test_hex_name_resolves_to_stored_object() {
        let (refs, id) = store();
        assert_eq!(refs.get_ref(&id.to_hex()).unwrap(), id);
    }

    #[test]
    fn test_unborn_branch_is_not_found() {
        let (refs, _) = store();
        refs.set_ref("refs/heads/main", ObjectId::NULL).unwrap();
        refs.set_symbolic_ref("HEAD", "refs/heads/main").unwrap();
        assert!(matches!(refs.get_ref("HEAD"), Err(StorageError::RefNotFound(_))));
        assert_eq!(refs.try_get_ref("HEAD").unwrap(), None);
        assert!(refs.branch_exists("main"));
    }

    #[test]
    fn test_nested_symbolic_ref_rejected() {
        let (refs, id) = store();
        refs.set_ref("refs/heads/main", id).unwrap();
        refs.set_symbolic_ref("refs/heads/alias", "refs/heads/main").unwrap();
        refs.set_symbolic_ref("HEAD", "refs/heads/alias").unwrap();
        assert!(matches!(refs.get_ref("HEAD"), Err(StorageError::InvalidRef(_))));
        assert_eq!(refs.get_ref("refs/heads/alias").unwrap(), id);
    }

    #[test]
    fn test_ref_name_validation() {
        assert!(validate_ref_name("HEAD").is_ok());
        assert!(validate_ref_name("refs/heads/main").is_ok());
        assert!(validate_ref_name("refs/heads/feature/x").is_ok());
        assert!(validate_ref_name("refs/remotes/origin/main").is_ok());

        assert!(validate_ref_name("").is_err());
        assert!(validate_ref_name("refs/heads/../../etc").is_err());
        assert!(validate_ref_name("refs/tags/v1").is_err());
        assert!(validate_ref_name("objects/ab/cd").is_err());
        assert!(validate_ref_name("/refs/heads/main").is_err());
        assert!(validate_ref_name("refs/heads//main").is_err());
        assert!(validate_ref_name("refs/heads/").is_err());
        assert!(validate_ref_name("refs/heads/a b").is_err());
    }

    #[test]
    fn test_invalid_names_never_touch_storage() {
        let (refs, id) = store();
        assert!(refs.set_ref("../outside", id).is_err());
        assert!(refs.set_ref("config", id).is_err());
        assert!(refs.set_ref("ORIG_HEAD", id).is_ok());
        assert!(refs.set_ref("refs/tags/v1", id).is_err());
        assert!(!refs.storage.is_file("refs/tags/v1"));
    }

    #[test]
    fn test_ref_store_get_not_found() {
        let (refs, _) = store();
        assert!(matches!(
            refs.get_ref("refs/heads/nonexistent"),
            Err(StorageError::RefNotFound(_))
        ));
    }

    #[test]
    fn test_ref_store_delete() {
        let (refs, id) = store();
        refs.set_ref("refs/heads/feature", id).unwrap();
        refs.delete_ref("refs/heads/feature").unwrap();
        assert!(refs.get_ref("refs/heads/feature").is_err());
        assert!(matches!(
            refs.delete_ref("refs/heads/feature"),
            Err(StorageError::RefNotFound(_))
        ));
    }

    #[test]
    fn test_list_refs() {
        let (refs, id) = store();
        refs.set_ref("refs/heads/main", id).unwrap();
        refs.set_ref("refs/heads/dev", id).unwrap();
        refs.set_ref("refs/heads/feature/x", id).unwrap();
        refs.set_ref("refs/remotes/origin/main", id).unwrap();
        refs.set_symbolic_ref("HEAD", "refs/heads/main").unwrap();

        let heads: Vec<String> = refs
            .list_refs(&["refs/heads/"])
            .unwrap()
            .into_iter()
            .map(|(n, _)| n)
            .collect();
        assert_eq!(
            heads,
            vec!["refs/heads/dev", "refs/heads/feature/x", "refs/heads/main"]
        );

        let all = refs.list_refs(&[]).unwrap();
        assert_eq!(all.len(), 5);
        assert_eq!(all.last().unwrap().0, "HEAD");

        let head_only = refs.list_refs(&["HEAD"]).unwrap();
        assert_eq!(head_only.len(), 1);
        assert_eq!(head_only[0].0, "HEAD");

        assert!(refs.list_refs(&["refs/heads/nope"]).unwrap().is_empty());
    }

    #[test]
    fn test_detached_head_has_no_branch() {
        let (refs, id) = store();
        refs.set_ref("HEAD", id).unwrap();
        assert_eq!(refs.current_branch(), None);
        assert_eq!(refs.get_ref("HEAD").unwrap(), id);
    }
}
