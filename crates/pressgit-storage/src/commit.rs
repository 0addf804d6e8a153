//! Commit objects.

use crate::{ObjectId, Result, StorageError};
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

/// An author or committer line: `Name <email>` followed by `<seconds> <tz>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Signature {
    /// `Name <email>`.
    pub identity: String,
    /// `<unix seconds> <timezone offset>`.
    pub timestamp: String,
}

impl Signature {
    /// Creates a signature from an identity and a timestamp string.
    pub fn new(identity: impl Into<String>, timestamp: impl Into<String>) -> Self {
        Self {
            identity: identity.into(),
            timestamp: timestamp.into(),
        }
    }

    /// Creates a signature stamped with the current time in UTC.
    pub fn now(name: &str, email: &str) -> Self {
        let secs = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        Self::new(format!("{} <{}>", name, email), format!("{} +0000", secs))
    }

    /// Parses a signature, splitting at the last `>`.
    pub fn parse(line: &str) -> Result<Self> {
        let split = line.rfind('>').ok_or_else(|| {
            StorageError::InvalidObject(format!("malformed signature: {}", line))
        })?;
        Ok(Self {
            identity: line[..=split].to_string(),
            timestamp: line[split + 1..].trim().to_string(),
        })
    }
}

impl fmt::Display for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.timestamp.is_empty() {
            f.write_str(&self.identity)
        } else {
            write!(f, "{} {}", self.identity, self.timestamp)
        }
    }
}

/// A commit: a tree snapshot with ancestry and authorship.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Commit {
    /// Root tree of the snapshot.
    pub tree: ObjectId,
    /// Parent commits; empty for a root commit.
    pub parents: Vec<ObjectId>,
    /// Who wrote the change.
    pub author: Signature,
    /// Who recorded the commit.
    pub committer: Signature,
    /// Commit message.
    pub message: String,
}

impl Commit {
    /// Returns the first parent, if any.
    pub fn parent(&self) -> Option<ObjectId> {
        self.parents.first().copied()
    }

    /// Serializes the commit.
    pub fn encode(&self) -> Vec<u8> {
        let mut content = format!("tree {}\n", self.tree);
        for parent in &self.parents {
            content.push_str(&format!("parent {}\n", parent));
        }
        content.push_str(&format!("author {}\n", self.author));
        content.push_str(&format!("committer {}\n", self.committer));
        content.push_str(&format!("\n{}", self.message));
        content.into_bytes()
    }

    /// Parses a serialized commit.
    pub fn decode(data: &[u8]) -> Result<Self> {
        let text = std::str::from_utf8(data)
            .map_err(|_| StorageError::InvalidObject("non-utf8 commit".to_string()))?;
        let (headers, message) = text.split_once("\n\n").unwrap_or((text, ""));

        let mut tree = None;
        let mut parents = Vec::new();
        let mut author = None;
        let mut committer = None;

        for line in headers.lines() {
            // Continuation lines of multi-line headers (e.g. gpgsig) start with a space.
            if line.starts_with(' ') {
                continue;
            }
            let (key, value) = match line.split_once(' ') {
                Some(kv) => kv,
                None => continue,
            };
            match key {
                "tree" => tree = Some(ObjectId::from_hex(value)?),
                "parent" => {
                    let parent = ObjectId::from_hex(value)?;
                    if !parent.is_null() {
                        parents.push(parent);
                    }
                }
                "author" => author = Some(Signature::parse(value)?),
                "committer" => committer = Some(Signature::parse(value)?),
                _ => {}
            }
        }

        let missing = |field: &str| StorageError::InvalidObject(format!("commit missing {}", field));
        Ok(Self {
            tree: tree.ok_or_else(|| missing("tree"))?,
            parents,
            author: author.ok_or_else(|| missing("author"))?,
            committer: committer.ok_or_else(|| missing("committer"))?,
            message: message.to_string(),
        })
    }
}
