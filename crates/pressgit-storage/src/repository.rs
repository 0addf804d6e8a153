//! A repository: object store, references, and config over one byte storage.

use crate::refs::HEADS_PREFIX;
use crate::store::split_path;
use crate::{
    ByteStorage, Commit, FileMode, GitObject, MemoryStorage, ObjectId, ObjectStore, ObjectType,
    RefStore, Reference, RepoConfig, Result, Signature, StorageError, Tree, TreeChange, TreeEntry,
};
use bytes::Bytes;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Branch that `HEAD` points at in a fresh repository.
pub const DEFAULT_BRANCH: &str = "main";

/// Commit message used when a request does not supply one.
pub const DEFAULT_MESSAGE: &str = "Changes";

const FALLBACK_NAME: &str = "pressgit";
const FALLBACK_EMAIL: &str = "pressgit@localhost";

/// A set of working-tree changes to record as one commit.
#[derive(Debug, Clone, Default)]
pub struct CommitRequest {
    /// File contents to write, keyed by path.
    pub updates: BTreeMap<String, Bytes>,
    /// Paths (files or directories) to remove.
    pub deletes: Vec<String>,
    /// Entries to move, old path to new path.
    pub move_trees: BTreeMap<String, String>,
    /// Commit message; defaults to [`DEFAULT_MESSAGE`], or the amended commit's message.
    pub message: Option<String>,
    /// Author; defaults to the configured identity, or the amended commit's author.
    pub author: Option<Signature>,
    /// Committer; defaults to the configured identity.
    pub committer: Option<Signature>,
    /// Replace the current tip instead of adding a child commit.
    pub amend: bool,
}

impl CommitRequest {
    /// Creates an empty request.
    pub fn new() -> Self {
        Self::default()
    }

    /// Writes `content` at `path`.
    pub fn update(mut self, path: impl Into<String>, content: impl Into<Bytes>) -> Self {
        self.updates.insert(path.into(), content.into());
        self
    }

    /// Removes `path`.
    pub fn delete(mut self, path: impl Into<String>) -> Self {
        self.deletes.push(path.into());
        self
    }

    /// Moves the entry at `from` to `to`.
    pub fn move_tree(mut self, from: impl Into<String>, to: impl Into<String>) -> Self {
        self.move_trees.insert(from.into(), to.into());
        self
    }

    /// Sets the commit message.
    pub fn message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    /// Sets the author.
    pub fn author(mut self, author: Signature) -> Self {
        self.author = Some(author);
        self
    }

    /// Sets the committer.
    pub fn committer(mut self, committer: Signature) -> Self {
        self.committer = Some(committer);
        self
    }

    /// Amends the current tip.
    pub fn amend(mut self) -> Self {
        self.amend = true;
        self
    }
}

/// The result of [`Repository::commit`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitOutcome {
    /// The branch tip after the call.
    pub commit: ObjectId,
    /// Root tree of that commit.
    pub tree: ObjectId,
    /// Trees written while rebuilding, deepest first.
    pub written_trees: Vec<ObjectId>,
    /// False when nothing changed and no commit was created.
    pub created: bool,
}

/// Overrides applied while rewriting history.
///
/// The author is always preserved. `committer` applies to every rewritten
/// commit; `message` only to the oldest one.
#[derive(Debug, Clone, Default)]
pub struct CommitRewrite {
    /// Replacement committer.
    pub committer: Option<Signature>,
    /// Replacement message for the oldest rewritten commit.
    pub message: Option<String>,
}

#[derive(Debug, Clone)]
enum Replace {
    Removed,
    Entry(FileMode, ObjectId),
}

/// Pending edits below one tree, keyed by entry name.
#[derive(Debug, Default)]
struct EditNode {
    replace: Option<Replace>,
    children: BTreeMap<String, EditNode>,
}

impl EditNode {
    fn insert(&mut self, segments: &[&str], replace: Replace) {
        if let Some((first, rest)) = segments.split_first() {
            let node = self.children.entry((*first).to_string()).or_default();
            if rest.is_empty() {
                node.replace = Some(replace);
                node.children.clear();
            } else {
                node.insert(rest, replace);
            }
        }
    }
}

/// A rebuilt tree: its id (`None` when it ended up empty) and every tree written.
struct TreeBuild {
    oid: Option<ObjectId>,
    written: Vec<ObjectId>,
}

/// A git repository.
#[derive(Debug, Clone)]
pub struct Repository {
    storage: Arc<dyn ByteStorage>,
    objects: ObjectStore,
    refs: RefStore,
}

impl Repository {
    /// Opens a repository, initializing the layout and `HEAD` when missing.
    pub fn open(storage: Arc<dyn ByteStorage>) -> Result<Self> {
        storage.mkdir("objects")?;
        storage.mkdir("refs/heads")?;
        storage.mkdir("refs/remotes")?;

        let objects = ObjectStore::new(storage.clone());
        let refs = RefStore::new(objects.clone());
        if !storage.is_file("HEAD") {
            refs.set_symbolic_ref("HEAD", &format!("{}{}", HEADS_PREFIX, DEFAULT_BRANCH))?;
            tracing::info!(branch = DEFAULT_BRANCH, "Initialized repository");
        }
        Ok(Self {
            storage,
            objects,
            refs,
        })
    }

    /// Opens a fresh in-memory repository.
    pub fn in_memory() -> Result<Self> {
        Self::open(Arc::new(MemoryStorage::new()))
    }

    /// Returns the underlying byte storage.
    pub fn storage(&self) -> &Arc<dyn ByteStorage> {
        &self.storage
    }

    /// Returns the object store.
    pub fn objects(&self) -> &ObjectStore {
        &self.objects
    }

    /// Returns the reference store.
    pub fn refs(&self) -> &RefStore {
        &self.refs
    }

    /// Loads the repository config.
    pub fn config(&self) -> Result<RepoConfig> {
        RepoConfig::load(&self.storage)
    }

    /// Saves the repository config.
    pub fn save_config(&self, config: &RepoConfig) -> Result<()> {
        config.save(&self.storage)
    }

    /// Returns a signature for the configured user, stamped now.
    pub fn default_signature(&self) -> Result<Signature> {
        let config = self.config()?;
        Ok(Signature::now(
            config.get("user.name").unwrap_or(FALLBACK_NAME),
            config.get("user.email").unwrap_or(FALLBACK_EMAIL),
        ))
    }

    /// Resolves `HEAD`; `None` for an unborn branch.
    pub fn head(&self) -> Result<Option<ObjectId>> {
        self.refs.try_get_ref("HEAD")
    }

    /// Returns the branch ref `HEAD` points at, or [`StorageError::DetachedHead`].
    pub fn head_branch_ref(&self) -> Result<String> {
        match self.refs.read_ref("HEAD")? {
            Reference::Symbolic(target) if target.starts_with(HEADS_PREFIX) => Ok(target),
            _ => Err(StorageError::DetachedHead),
        }
    }

    /// Records `request` as a commit on the current branch.
    ///
    /// All paths are validated before anything is written. When the
    /// resulting root tree equals the current one and `amend` is not set, the
    /// current tip is returned and no commit is created.
    pub fn commit(&self, request: CommitRequest) -> Result<CommitOutcome> {
        let branch = self.head_branch_ref()?;
        let head = self.refs.try_get_ref(&branch)?;
        let head_commit = head.map(|id| self.objects.read_commit(&id)).transpose()?;
        let base_tree = head_commit.as_ref().map(|c| c.tree);

        let mut edits = EditNode::default();
        let mut moved = Vec::with_capacity(request.move_trees.len());
        for (from, to) in &request.move_trees {
            let entry = self.existing_entry(base_tree, from)?;
            let to_segments = non_empty_path(to)?;
            moved.push((non_empty_path(from)?, to_segments, entry));
        }
        let mut deleted = Vec::with_capacity(request.deletes.len());
        for path in &request.deletes {
            self.existing_entry(base_tree, path)?;
            deleted.push(non_empty_path(path)?);
        }
        let mut updated = Vec::with_capacity(request.updates.len());
        for (path, content) in &request.updates {
            updated.push((non_empty_path(path)?, content));
        }

        for (from, to, entry) in moved {
            edits.insert(&from, Replace::Removed);
            edits.insert(&to, Replace::Entry(entry.mode, entry.oid));
        }
        for path in deleted {
            edits.insert(&path, Replace::Removed);
        }
        for (path, content) in updated {
            let blob = self.objects.add_object(ObjectType::Blob, content)?;
            edits.insert(&path, Replace::Entry(FileMode::Regular, blob));
        }

        let build = self.build_tree(base_tree, &edits.children)?;
        let tree = match build.oid {
            Some(oid) => oid,
            None => self.objects.add(&GitObject::Tree(Tree::default()))?,
        };

        if let (Some(head), false) = (head, request.amend) {
            if Some(tree) == base_tree {
                tracing::debug!(commit = %head, "Tree unchanged, skipping commit");
                return Ok(CommitOutcome {
                    commit: head,
                    tree,
                    written_trees: build.written,
                    created: false,
                });
            }
        }

        let (parents, default_message, default_author) = match (&head_commit, request.amend) {
            (Some(amended), true) => (
                amended.parents.clone(),
                amended.message.clone(),
                Some(amended.author.clone()),
            ),
            (None, true) => return Err(StorageError::RefNotFound(branch)),
            (_, false) => (head.into_iter().collect(), DEFAULT_MESSAGE.to_string(), None),
        };
        let author = match request.author.or(default_author) {
            Some(author) => author,
            None => self.default_signature()?,
        };
        let committer = match request.committer {
            Some(committer) => committer,
            None => self.default_signature()?,
        };

        let commit = Commit {
            tree,
            parents,
            author,
            committer,
            message: request.message.unwrap_or(default_message),
        };
        let commit_id = self.objects.add(&GitObject::Commit(commit))?;
        self.refs.set_ref(&branch, commit_id)?;

        tracing::info!(
            branch = %branch,
            commit = %commit_id,
            trees_written = build.written.len(),
            amend = request.amend,
            "Created commit"
        );
        Ok(CommitOutcome {
            commit: commit_id,
            tree,
            written_trees: build.written,
            created: true,
        })
    }

    fn existing_entry(&self, base_tree: Option<ObjectId>, path: &str) -> Result<TreeEntry> {
        let base = base_tree.ok_or_else(|| StorageError::PathNotFound(path.to_string()))?;
        match self.objects.read_by_path(&base, path)? {
            Some(entry) if !entry.name.is_empty() => Ok(entry),
            _ => Err(StorageError::PathNotFound(path.to_string())),
        }
    }

    /// Applies `edits` on top of `base`, writing only the trees that change.
    fn build_tree(
        &self,
        base: Option<ObjectId>,
        edits: &BTreeMap<String, EditNode>,
    ) -> Result<TreeBuild> {
        let mut tree = match base {
            Some(id) => self.objects.read_tree(&id)?,
            None => Tree::default(),
        };
        let mut written = Vec::new();

        for (name, node) in edits {
            let start = match &node.replace {
                Some(Replace::Removed) => None,
                Some(Replace::Entry(mode, oid)) => Some(TreeEntry::new(*mode, name.clone(), *oid)),
                None => tree.get(name).cloned(),
            };
            let result = if node.children.is_empty() {
                start
            } else {
                let sub_base = start.filter(|e| e.mode.is_dir()).map(|e| e.oid);
                let sub = self.build_tree(sub_base, &node.children)?;
                written.extend(sub.written);
                sub.oid
                    .map(|oid| TreeEntry::new(FileMode::Directory, name.clone(), oid))
            };
            match result {
                Some(entry) => tree.insert(entry),
                None => {
                    tree.remove(name);
                }
            }
        }

        if tree.is_empty() {
            return Ok(TreeBuild { oid: None, written });
        }
        let oid = self.objects.add(&GitObject::Tree(tree))?;
        if Some(oid) != base {
            written.push(oid);
        }
        Ok(TreeBuild {
            oid: Some(oid),
            written,
        })
    }

    /// Recreates `head` back to `last_ancestor` (inclusive) on top of `new_base`.
    ///
    /// Trees and authors are preserved. Returns the rewritten tip.
    pub fn reparent_commit_range(
        &self,
        head: ObjectId,
        last_ancestor: ObjectId,
        new_base: Option<ObjectId>,
        rewrite: &CommitRewrite,
    ) -> Result<ObjectId> {
        let mut chain = Vec::new();
        let mut current = head;
        loop {
            let commit = self.objects.read_commit(&current)?;
            let parent = commit.parent();
            chain.push(commit);
            if current == last_ancestor {
                break;
            }
            current = parent.ok_or_else(|| StorageError::NotAnAncestor {
                ancestor: last_ancestor.to_hex(),
                head: head.to_hex(),
            })?;
        }

        let mut tip = new_base;
        for (index, commit) in chain.into_iter().rev().enumerate() {
            let message = match (&rewrite.message, index) {
                (Some(message), 0) => message.clone(),
                _ => commit.message,
            };
            let rewritten = Commit {
                tree: commit.tree,
                parents: tip.into_iter().collect(),
                author: commit.author,
                committer: rewrite.committer.clone().unwrap_or(commit.committer),
                message,
            };
            tip = Some(self.objects.add(&GitObject::Commit(rewritten))?);
        }
        tip.ok_or_else(|| StorageError::ObjectNotFound(head.to_hex()))
    }

    /// Folds the commits from `until_ancestor` up to `into` into one commit
    /// carrying `into`'s tree, replays later commits on top, and moves the branch.
    pub fn squash(
        &self,
        into: ObjectId,
        until_ancestor: ObjectId,
        rewrite: &CommitRewrite,
    ) -> Result<ObjectId> {
        let branch = self.head_branch_ref()?;
        let head = self.refs.get_ref(&branch)?;

        let ancestor = self.objects.read_commit(&until_ancestor)?;
        self.ensure_ancestor(into, until_ancestor)?;

        let squashed = self.reparent_commit_range(into, into, ancestor.parent(), rewrite)?;
        let new_head = if head == into {
            squashed
        } else {
            let above = self.child_of(head, into)?;
            let replay = CommitRewrite {
                committer: rewrite.committer.clone(),
                message: None,
            };
            self.reparent_commit_range(head, above, Some(squashed), &replay)?
        };

        self.refs.set_ref(&branch, new_head)?;
        tracing::info!(branch = %branch, head = %new_head, "Squashed history");
        Ok(new_head)
    }

    fn ensure_ancestor(&self, head: ObjectId, ancestor: ObjectId) -> Result<()> {
        let mut current = head;
        while current != ancestor {
            current = self
                .objects
                .read_commit(&current)?
                .parent()
                .ok_or_else(|| StorageError::NotAnAncestor {
                    ancestor: ancestor.to_hex(),
                    head: head.to_hex(),
                })?;
        }
        Ok(())
    }

    /// Finds the commit on `head`'s first-parent line whose parent is `ancestor`.
    fn child_of(&self, head: ObjectId, ancestor: ObjectId) -> Result<ObjectId> {
        let mut current = head;
        loop {
            let parent = self.objects.read_commit(&current)?.parent();
            match parent {
                Some(p) if p == ancestor => return Ok(current),
                Some(p) => current = p,
                None => {
                    return Err(StorageError::NotAnAncestor {
                        ancestor: ancestor.to_hex(),
                        head: head.to_hex(),
                    })
                }
            }
        }
    }

    /// Structural diff between two commits (or trees).
    pub fn diff_commits(
        &self,
        current: ObjectId,
        previous: Option<ObjectId>,
    ) -> Result<Vec<TreeChange>> {
        self.objects.diff_trees(Some(current), previous)
    }
}

fn non_empty_path(path: &str) -> Result<Vec<&str>> {
    let segments = split_path(path)?;
    if segments.is_empty() {
        return Err(StorageError::InvalidPath(path.to_string()));
    }
    Ok(segments)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sig(name: &str, ts: u64) -> Signature {
        Signature::new(format!("{} <{}@example.com>", name, name), format!("{} +0000", ts))
    }

    fn request() -> CommitRequest {
        CommitRequest::new()
            .author(sig("alice", 100))
            .committer(sig("alice", 100))
    }

    fn read_file(repo: &Repository, commit: ObjectId, path: &str) -> Option<Bytes> {
        let tree = repo.objects().read_commit(&commit).unwrap().tree;
        repo.objects()
            .read_by_path(&tree, path)
            .unwrap()
            .map(|entry| repo.objects().read_raw(&entry.oid).unwrap().data)
    }

    #[test]
    fn test_open_initializes_head() {
        let repo = Repository::in_memory().unwrap();
        assert_eq!(repo.head_branch_ref().unwrap(), "refs/heads/main");
        assert_eq!(repo.head().unwrap(), None);
        assert_eq!(repo.refs().current_branch(), Some("main".to_string()));
    }

    #[test]
    fn test_first_commit() {
        let repo = Repository::in_memory().unwrap();
        let outcome = repo
            .commit(request().update("README.md", "Hello, world!").message("Initial"))
            .unwrap();
        assert!(outcome.created);
        assert_eq!(repo.head().unwrap(), Some(outcome.commit));
        assert_eq!(
            read_file(&repo, outcome.commit, "README.md").unwrap().as_ref(),
            b"Hello, world!"
        );
        let commit = repo.objects().read_commit(&outcome.commit).unwrap();
        assert!(commit.parents.is_empty());
        assert_eq!(commit.message, "Initial");
        assert_eq!(commit.author, sig("alice", 100));
    }

    #[test]
    fn test_nested_updates_and_unchanged_siblings() {
        let repo = Repository::in_memory().unwrap();
        let first = repo
            .commit(
                request()
                    .update("docs/guide/intro.md", "intro")
                    .update("src/main.rs", "fn main() {}"),
            )
            .unwrap();
        let first_tree = repo.objects().read_commit(&first.commit).unwrap().tree;
        let src_before = repo.objects().read_by_path(&first_tree, "src").unwrap().unwrap();

        let second = repo
            .commit(request().update("docs/guide/intro.md", "intro v2"))
            .unwrap();
        assert_eq!(
            repo.objects().read_commit(&second.commit).unwrap().parent(),
            Some(first.commit)
        );
        // root, docs, docs/guide
        assert_eq!(second.written_trees.len(), 3);
        let src_after = repo
            .objects()
            .read_by_path(&second.tree, "src")
            .unwrap()
            .unwrap();
        assert_eq!(src_before.oid, src_after.oid);
        assert_eq!(
            read_file(&repo, second.commit, "docs/guide/intro.md").unwrap().as_ref(),
            b"intro v2"
        );
    }

    #[test]
    fn test_unchanged_tree_skips_commit() {
        let repo = Repository::in_memory().unwrap();
        let first = repo.commit(request().update("a.txt", "a")).unwrap();
        let again = repo.commit(request().update("a.txt", "a")).unwrap();
        assert!(!again.created);
        assert_eq!(again.commit, first.commit);
    }

    #[test]
    fn test_delete_and_prune_empty_directories() {
        let repo = Repository::in_memory().unwrap();
        repo.commit(request().update("keep.txt", "k").update("dir/only.txt", "o"))
            .unwrap();
        let outcome = repo.commit(request().delete("dir/only.txt")).unwrap();
        assert!(repo
            .objects()
            .read_by_path(&outcome.tree, "dir")
            .unwrap()
            .is_none());
        assert!(read_file(&repo, outcome.commit, "keep.txt").is_some());
    }

    #[test]
    fn test_delete_missing_path_fails_before_writing() {
        let repo = Repository::in_memory().unwrap();
        let first = repo.commit(request().update("a.txt", "a")).unwrap();
        let result = repo.commit(request().update("b.txt", "b").delete("missing.txt"));
        assert!(matches!(result, Err(StorageError::PathNotFound(_))));
        assert_eq!(repo.head().unwrap(), Some(first.commit));
    }

    #[test]
    fn test_move_tree() {
        let repo = Repository::in_memory().unwrap();
        repo.commit(request().update("old/a.txt", "a").update("old/b.txt", "b"))
            .unwrap();
        let outcome = repo
            .commit(request().move_tree("old", "new/place").update("new/place/c.txt", "c"))
            .unwrap();
        assert!(read_file(&repo, outcome.commit, "old/a.txt").is_none());
        assert_eq!(
            read_file(&repo, outcome.commit, "new/place/a.txt").unwrap().as_ref(),
            b"a"
        );
        assert_eq!(
            read_file(&repo, outcome.commit, "new/place/c.txt").unwrap().as_ref(),
            b"c"
        );
    }

    #[test]
    fn test_invalid_paths_rejected() {
        let repo = Repository::in_memory().unwrap();
        assert!(matches!(
            repo.commit(request().update("../escape", "x")),
            Err(StorageError::InvalidPath(_))
        ));
        assert!(matches!(
            repo.commit(request().update("", "x")),
            Err(StorageError::InvalidPath(_))
        ));
    }

    #[test]
    fn test_detached_head_fails() {
        let repo = Repository::in_memory().unwrap();
        let first = repo.commit(request().update("a.txt", "a")).unwrap();
        repo.refs().set_ref("HEAD", first.commit).unwrap();
        assert!(matches!(
            repo.commit(request().update("b.txt", "b")),
            Err(StorageError::DetachedHead)
        ));
    }

    #[test]
    fn test_amend_keeps_parent_author_and_message() {
        let repo = Repository::in_memory().unwrap();
        let first = repo.commit(request().update("a.txt", "a")).unwrap();
        let second = repo
            .commit(request().update("b.txt", "b").message("Add b"))
            .unwrap();
        let amended = repo
            .commit(
                CommitRequest::new()
                    .update("c.txt", "c")
                    .committer(sig("bob", 200))
                    .amend(),
            )
            .unwrap();
        assert_ne!(amended.commit, second.commit);
        let commit = repo.objects().read_commit(&amended.commit).unwrap();
        assert_eq!(commit.parent(), Some(first.commit));
        assert_eq!(commit.message, "Add b");
        assert_eq!(commit.author, sig("alice", 100));
        assert_eq!(commit.committer, sig("bob", 200));
    }

    #[test]
    fn test_default_identity_from_config() {
        let repo = Repository::in_memory().unwrap();
        let mut config = repo.config().unwrap();
        config.set("user.name", "Config User").unwrap();
        config.set("user.email", "config@example.com").unwrap();
        repo.save_config(&config).unwrap();

        let outcome = repo.commit(CommitRequest::new().update("a", "a")).unwrap();
        let commit = repo.objects().read_commit(&outcome.commit).unwrap();
        assert_eq!(commit.author.identity, "Config User <config@example.com>");
        assert_eq!(commit.message, DEFAULT_MESSAGE);
    }

    fn linear_history(repo: &Repository) -> Vec<ObjectId> {
        (0..4)
            .map(|i| {
                repo.commit(
                    request()
                        .update(format!("file{}.txt", i), format!("v{}", i))
                        .message(format!("commit {}", i)),
                )
                .unwrap()
                .commit
            })
            .collect()
    }

    #[test]
    fn test_reparent_commit_range() {
        let repo = Repository::in_memory().unwrap();
        let commits = linear_history(&repo);
        let rewrite = CommitRewrite {
            committer: Some(sig("bob", 300)),
            message: None,
        };
        let tip = repo
            .reparent_commit_range(commits[3], commits[2], Some(commits[0]), &rewrite)
            .unwrap();

        let new_tip = repo.objects().read_commit(&tip).unwrap();
        let old_tip = repo.objects().read_commit(&commits[3]).unwrap();
        assert_eq!(new_tip.tree, old_tip.tree);
        assert_eq!(new_tip.author, old_tip.author);
        assert_eq!(new_tip.committer, sig("bob", 300));

        let new_parent = repo.objects().read_commit(&new_tip.parent().unwrap()).unwrap();
        assert_eq!(new_parent.parent(), Some(commits[0]));
        assert_eq!(new_parent.message, "commit 2");
    }

    #[test]
    fn test_reparent_rejects_non_ancestor() {
        let repo = Repository::in_memory().unwrap();
        let commits = linear_history(&repo);
        let stranger = ObjectId::from_bytes([1u8; 20]);
        let result =
            repo.reparent_commit_range(commits[3], stranger, None, &CommitRewrite::default());
        assert!(matches!(result, Err(StorageError::NotAnAncestor { .. })));
    }

    #[test]
    fn test_squash() {
        let repo = Repository::in_memory().unwrap();
        let commits = linear_history(&repo);
        let rewrite = CommitRewrite {
            committer: None,
            message: Some("squashed 1-2".to_string()),
        };
        let head = repo.squash(commits[2], commits[1], &rewrite).unwrap();

        assert_eq!(repo.head().unwrap(), Some(head));
        let tip = repo.objects().read_commit(&head).unwrap();
        assert_eq!(tip.message, "commit 3");
        let squashed = repo.objects().read_commit(&tip.parent().unwrap()).unwrap();
        assert_eq!(squashed.message, "squashed 1-2");
        assert_eq!(squashed.parent(), Some(commits[0]));
        assert_eq!(
            squashed.tree,
            repo.objects().read_commit(&commits[2]).unwrap().tree
        );
        assert_eq!(
            tip.tree,
            repo.objects().read_commit(&commits[3]).unwrap().tree
        );
    }

    #[test]
    fn test_squash_rejects_unrelated_ancestor() {
        let repo = Repository::in_memory().unwrap();
        let commits = linear_history(&repo);
        let result = repo.squash(commits[1], commits[2], &CommitRewrite::default());
        assert!(matches!(result, Err(StorageError::NotAnAncestor { .. })));
    }

    #[test]
    fn test_diff_commits() {
        let repo = Repository::in_memory().unwrap();
        let commits = linear_history(&repo);
        let changes = repo.diff_commits(commits[1], Some(commits[0])).unwrap();
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].path(), "file1.txt");
    }
}
