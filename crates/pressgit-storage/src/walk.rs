//! Tree walks: objects added between two snapshots, and structural diffs.

use crate::{ObjectId, ObjectStore, ObjectType, Result, TreeEntry};
use std::collections::HashSet;

/// An object reported by [`AddedObjects`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AddedObject {
    /// Object id.
    pub id: ObjectId,
    /// Object type, taken from the commit or tree entry that referenced it.
    pub object_type: ObjectType,
}

enum Pending {
    Root {
        new: ObjectId,
        old: Option<ObjectId>,
    },
    Tree {
        new: ObjectId,
        old: Option<ObjectId>,
    },
    Blob(ObjectId),
}

/// Iterator over the objects reachable from `new` that are not reachable
/// from `old` at the same path.
///
/// Subtrees whose ids match on both sides are pruned without being read.
/// Blobs are reported from their tree entries and never read. Submodule
/// commit links are skipped. An old-side object missing from the old store
/// counts as absent, so a partially populated store still gets every object
/// it lacks.
pub struct AddedObjects<'a> {
    store: &'a ObjectStore,
    old_store: &'a ObjectStore,
    stack: Vec<Pending>,
    seen: HashSet<ObjectId>,
    exhaustive: bool,
}

impl<'a> AddedObjects<'a> {
    pub(crate) fn new(store: &'a ObjectStore, new: ObjectId, old: Option<ObjectId>) -> Self {
        Self {
            store,
            old_store: store,
            stack: vec![Pending::Root { new, old }],
            seen: HashSet::new(),
            exhaustive: false,
        }
    }

    /// Reads the old side of the comparison from another store.
    pub fn with_old_store(mut self, old_store: &'a ObjectStore) -> Self {
        self.old_store = old_store;
        self
    }

    /// Descends into identical subtrees as well and reports only objects the
    /// old store lacks.
    ///
    /// For old stores filled by partial copies, where a tree can be present
    /// while parts of it are not.
    pub fn exhaustive(mut self) -> Self {
        self.exhaustive = true;
        self
    }

    fn step(&mut self, pending: Pending) -> Result<Option<AddedObject>> {
        match pending {
            Pending::Root { new, old } => {
                let old = old.filter(|id| self.old_store.contains(id));
                if Some(new) == old && !self.exhaustive {
                    return Ok(None);
                }
                let old_tree = match old {
                    Some(old) => Some(self.old_store.root_tree(&old)?),
                    None => None,
                };
                match self.store.object_type(&new)? {
                    ObjectType::Commit => {
                        let tree = self.store.read_commit(&new)?.tree;
                        self.stack.push(Pending::Tree {
                            new: tree,
                            old: old_tree,
                        });
                        Ok(self.report(new, ObjectType::Commit))
                    }
                    ObjectType::Tree => {
                        self.stack.push(Pending::Tree {
                            new,
                            old: old_tree,
                        });
                        Ok(None)
                    }
                    ObjectType::Blob => Ok(self.report(new, ObjectType::Blob)),
                }
            }
            Pending::Tree { new, old } => {
                let old = old.filter(|id| self.old_store.contains(id));
                if self.seen.contains(&new) || (Some(new) == old && !self.exhaustive) {
                    return Ok(None);
                }
                let tree = self.store.read_tree(&new)?;
                let old_tree = match old {
                    Some(old) => self.old_store.read_tree(&old)?,
                    None => Default::default(),
                };

                for entry in tree.iter().rev() {
                    let previous = old_tree.get(&entry.name);
                    match entry.mode.object_type() {
                        Some(ObjectType::Tree) => {
                            let old_child = previous
                                .filter(|e| e.mode.is_dir())
                                .map(|e| e.oid)
                                .filter(|id| self.old_store.contains(id));
                            if old_child != Some(entry.oid) || self.exhaustive {
                                self.stack.push(Pending::Tree {
                                    new: entry.oid,
                                    old: old_child,
                                });
                            }
                        }
                        Some(_) => {
                            let unchanged = previous.map(|e| e.oid) == Some(entry.oid)
                                && self.old_store.contains(&entry.oid);
                            if !unchanged {
                                self.stack.push(Pending::Blob(entry.oid));
                            }
                        }
                        None => {}
                    }
                }
                Ok(self.report(new, ObjectType::Tree))
            }
            Pending::Blob(id) => Ok(self.report(id, ObjectType::Blob)),
        }
    }

    fn report(&mut self, id: ObjectId, object_type: ObjectType) -> Option<AddedObject> {
        if !self.seen.insert(id) || (self.exhaustive && self.old_store.contains(&id)) {
            return None;
        }
        Some(AddedObject { id, object_type })
    }
}

impl Iterator for AddedObjects<'_> {
    type Item = Result<AddedObject>;

    fn next(&mut self) -> Option<Self::Item> {
        while let Some(pending) = self.stack.pop() {
            match self.step(pending) {
                Ok(Some(found)) => return Some(Ok(found)),
                Ok(None) => continue,
                Err(e) => {
                    self.stack.clear();
                    return Some(Err(e));
                }
            }
        }
        None
    }
}

/// One structural difference between two trees.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TreeChange {
    /// An entry exists only in the current tree.
    Added {
        /// Path from the compared root.
        path: String,
        /// The new entry.
        entry: TreeEntry,
    },
    /// An entry exists only in the previous tree.
    Deleted {
        /// Path from the compared root.
        path: String,
        /// The removed entry.
        entry: TreeEntry,
    },
    /// A non-directory entry changed content or mode.
    Modified {
        /// Path from the compared root.
        path: String,
        /// The previous entry.
        previous: TreeEntry,
        /// The current entry.
        current: TreeEntry,
    },
}

impl TreeChange {
    /// Returns the path of the change.
    pub fn path(&self) -> &str {
        match self {
            Self::Added { path, .. } | Self::Deleted { path, .. } | Self::Modified { path, .. } => {
                path
            }
        }
    }
}

fn join(prefix: &str, name: &str) -> String {
    if prefix.is_empty() {
        name.to_string()
    } else {
        format!("{}/{}", prefix, name)
    }
}

impl ObjectStore {
    /// Walks the objects added in `new` relative to `old`.
    ///
    /// Both ids may name commits or trees. A commit yields itself before its tree.
    pub fn find_objects_added_in(&self, new: ObjectId, old: Option<ObjectId>) -> AddedObjects<'_> {
        AddedObjects::new(self, new, old)
    }

    /// Computes the structural differences between two trees (or commits).
    ///
    /// Directories present on both sides are compared recursively; whole
    /// directories added or removed are reported as a single change.
    pub fn diff_trees(
        &self,
        current: Option<ObjectId>,
        previous: Option<ObjectId>,
    ) -> Result<Vec<TreeChange>> {
        let current = current.map(|id| self.root_tree(&id)).transpose()?;
        let previous = previous.map(|id| self.root_tree(&id)).transpose()?;

        let mut changes = Vec::new();
        let mut stack = vec![(String::new(), current, previous)];
        while let Some((prefix, current, previous)) = stack.pop() {
            if current == previous {
                continue;
            }
            let current_tree = match current {
                Some(id) => self.read_tree(&id)?,
                None => Default::default(),
            };
            let previous_tree = match previous {
                Some(id) => self.read_tree(&id)?,
                None => Default::default(),
            };

            for entry in current_tree.iter() {
                let path = join(&prefix, &entry.name);
                match previous_tree.get(&entry.name) {
                    None => changes.push(TreeChange::Added {
                        path,
                        entry: entry.clone(),
                    }),
                    Some(old) if old == entry => {}
                    Some(old) if old.mode.is_dir() && entry.mode.is_dir() => {
                        stack.push((path, Some(entry.oid), Some(old.oid)));
                    }
                    Some(old) => changes.push(TreeChange::Modified {
                        path,
                        previous: old.clone(),
                        current: entry.clone(),
                    }),
                }
            }
            for entry in previous_tree.iter() {
                if current_tree.get(&entry.name).is_none() {
                    changes.push(TreeChange::Deleted {
                        path: join(&prefix, &entry.name),
                        entry: entry.clone(),
                    });
                }
            }
        }
        changes.sort_by(|a, b| a.path().cmp(b.path()));
        Ok(changes)
    }

    /// Returns the tree or blob id at `path` below a commit or tree, if any.
    pub fn resolve_path(&self, root: &ObjectId, path: &str) -> Result<Option<ObjectId>> {
        let tree = self.root_tree(root)?;
        Ok(self.read_by_path(&tree, path)?.map(|entry| entry.oid))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Commit, FileMode, GitObject, Signature, Tree};

    fn blob(store: &ObjectStore, content: &str) -> ObjectId {
        store.add_object(ObjectType::Blob, content.as_bytes()).unwrap()
    }

    fn tree(store: &ObjectStore, entries: Vec<TreeEntry>) -> ObjectId {
        store.add(&GitObject::Tree(Tree::new(entries))).unwrap()
    }

    fn commit(store: &ObjectStore, tree: ObjectId, parent: Option<ObjectId>) -> ObjectId {
        let commit = Commit {
            tree,
            parents: parent.into_iter().collect(),
            author: Signature::new("A <a@x>", "1 +0000"),
            committer: Signature::new("A <a@x>", "1 +0000"),
            message: "m".to_string(),
        };
        store.add(&GitObject::Commit(commit)).unwrap()
    }

    /// Builds `a/b/c/leaf.txt` plus a sibling `other.txt` at every level.
    fn deep_tree(store: &ObjectStore, leaf: &str) -> (ObjectId, Vec<ObjectId>) {
        let other = blob(store, "other");
        let leaf = blob(store, leaf);
        let c = tree(
            store,
            vec![
                TreeEntry::new(FileMode::Regular, "leaf.txt", leaf),
                TreeEntry::new(FileMode::Regular, "other.txt", other),
            ],
        );
        let b = tree(
            store,
            vec![
                TreeEntry::new(FileMode::Directory, "c", c),
                TreeEntry::new(FileMode::Regular, "other.txt", other),
            ],
        );
        let a = tree(
            store,
            vec![
                TreeEntry::new(FileMode::Directory, "b", b),
                TreeEntry::new(FileMode::Regular, "other.txt", other),
            ],
        );
        let root = tree(
            store,
            vec![
                TreeEntry::new(FileMode::Directory, "a", a),
                TreeEntry::new(FileMode::Regular, "other.txt", other),
            ],
        );
        (root, vec![root, a, b, c, leaf])
    }

    fn collect(iter: AddedObjects<'_>) -> Vec<AddedObject> {
        iter.collect::<Result<Vec<_>>>().unwrap()
    }

    #[test]
    fn test_same_commit_yields_nothing() {
        let store = ObjectStore::in_memory();
        let (root, _) = deep_tree(&store, "v1");
        let c = commit(&store, root, None);
        assert!(collect(store.find_objects_added_in(c, Some(c))).is_empty());
    }

    #[test]
    fn test_deep_leaf_change_yields_leaf_and_ancestors() {
        let store = ObjectStore::in_memory();
        let (old_root, _) = deep_tree(&store, "v1");
        let (new_root, changed) = deep_tree(&store, "v2");
        let old_commit = commit(&store, old_root, None);
        let new_commit = commit(&store, new_root, Some(old_commit));

        let added: HashSet<ObjectId> = collect(store.find_objects_added_in(new_commit, Some(old_commit)))
            .into_iter()
            .map(|o| o.id)
            .collect();

        let mut expected: HashSet<ObjectId> = changed.into_iter().collect();
        expected.insert(new_commit);
        assert_eq!(added, expected);
    }

    #[test]
    fn test_full_walk_without_old() {
        let store = ObjectStore::in_memory();
        let (root, _) = deep_tree(&store, "v1");
        let c = commit(&store, root, None);
        let added = collect(store.find_objects_added_in(c, None));
        // commit, 4 trees, leaf, other (reported once)
        assert_eq!(added.len(), 7);
        assert_eq!(added[0].id, c);
        assert_eq!(added[0].object_type, ObjectType::Commit);
        assert_eq!(added[1].object_type, ObjectType::Tree);
    }

    #[test]
    fn test_blobs_are_not_read() {
        let store = ObjectStore::in_memory();
        let missing_blob = ObjectId::from_bytes([9u8; 20]);
        let root = tree(
            &store,
            vec![TreeEntry::new(FileMode::Regular, "absent.bin", missing_blob)],
        );
        let added = collect(store.find_objects_added_in(root, None));
        assert_eq!(added.len(), 2);
        assert_eq!(added[1].id, missing_blob);
    }

    #[test]
    fn test_commit_links_skipped() {
        let store = ObjectStore::in_memory();
        let root = tree(
            &store,
            vec![TreeEntry::new(
                FileMode::CommitLink,
                "vendor",
                ObjectId::from_bytes([5u8; 20]),
            )],
        );
        assert_eq!(collect(store.find_objects_added_in(root, None)).len(), 1);
    }

    #[test]
    fn test_old_side_from_other_store() {
        let remote = ObjectStore::in_memory();
        let local = ObjectStore::in_memory();
        let (old_root, _) = deep_tree(&local, "v1");
        deep_tree(&remote, "v1");
        let (new_root, changed) = deep_tree(&remote, "v2");

        let added: HashSet<ObjectId> = collect(
            remote
                .find_objects_added_in(new_root, Some(old_root))
                .with_old_store(&local),
        )
        .into_iter()
        .map(|o| o.id)
        .collect();
        assert_eq!(added, changed.into_iter().collect());
    }

    #[test]
    fn test_old_side_missing_from_old_store_counts_as_absent() {
        let remote = ObjectStore::in_memory();
        let local = ObjectStore::in_memory();
        let (root, ids) = deep_tree(&remote, "v1");
        deep_tree(&local, "v0");

        // Same id on both sides, but the old store never received it.
        let added: HashSet<ObjectId> = collect(
            remote
                .find_objects_added_in(root, Some(root))
                .with_old_store(&local),
        )
        .into_iter()
        .map(|o| o.id)
        .collect();
        assert!(added.is_superset(&ids.into_iter().collect()));
    }

    #[test]
    fn test_exhaustive_reports_only_what_old_store_lacks() {
        let remote = ObjectStore::in_memory();
        let local = ObjectStore::in_memory();
        let (root, ids) = deep_tree(&remote, "v1");
        let (a, b, c, leaf) = (ids[1], ids[2], ids[3], ids[4]);

        // Copy the root and `a` only, as a sparse pull of another path would.
        for id in [root, a] {
            local.add_raw(&remote.read_raw(&id).unwrap()).unwrap();
        }
        local.add_object(ObjectType::Blob, b"other").unwrap();

        let pruned = collect(
            remote
                .find_objects_added_in(root, Some(root))
                .with_old_store(&local),
        );
        assert!(pruned.is_empty());

        let added: HashSet<ObjectId> = collect(
            remote
                .find_objects_added_in(root, Some(root))
                .with_old_store(&local)
                .exhaustive(),
        )
        .into_iter()
        .map(|o| o.id)
        .collect();
        assert_eq!(added, [b, c, leaf].into_iter().collect());
    }

    #[test]
    fn test_missing_tree_is_an_error() {
        let store = ObjectStore::in_memory();
        let root = tree(
            &store,
            vec![TreeEntry::new(
                FileMode::Directory,
                "gone",
                ObjectId::from_bytes([4u8; 20]),
            )],
        );
        let results: Vec<_> = store.find_objects_added_in(root, None).collect();
        assert!(results.last().unwrap().is_err());
    }

    #[test]
    fn test_diff_trees() {
        let store = ObjectStore::in_memory();
        let (old_root, _) = deep_tree(&store, "v1");
        let (new_root, _) = deep_tree(&store, "v2");
        let changes = store.diff_trees(Some(new_root), Some(old_root)).unwrap();
        assert_eq!(changes.len(), 1);
        assert!(matches!(
            &changes[0],
            TreeChange::Modified { path, .. } if path == "a/b/c/leaf.txt"
        ));

        let added = store.diff_trees(Some(new_root), None).unwrap();
        assert_eq!(added.len(), 2);
        assert!(added.iter().all(|c| matches!(c, TreeChange::Added { .. })));

        let deleted = store.diff_trees(None, Some(old_root)).unwrap();
        assert!(deleted.iter().all(|c| matches!(c, TreeChange::Deleted { .. })));
    }

    #[test]
    fn test_resolve_path() {
        let store = ObjectStore::in_memory();
        let (root, ids) = deep_tree(&store, "v1");
        let c = commit(&store, root, None);
        assert_eq!(store.resolve_path(&c, "a/b/c").unwrap(), Some(ids[3]));
        assert_eq!(store.resolve_path(&c, "a/nope").unwrap(), None);
    }
}
