//! Git object identifiers, types, and the object envelope.

use crate::{Commit, Result, StorageError, Tree};
use bytes::Bytes;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha1::{Digest, Sha1};
use std::fmt;
use std::str::FromStr;

/// A 20-byte SHA-1 object identifier.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectId([u8; 20]);

impl Serialize for ObjectId {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for ObjectId {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        ObjectId::from_hex(&s).map_err(serde::de::Error::custom)
    }
}

impl ObjectId {
    /// The all-zero id, used on the wire and in ref files for "no object".
    pub const NULL: ObjectId = ObjectId([0u8; 20]);

    /// Creates an ObjectId from raw bytes.
    pub fn from_bytes(bytes: [u8; 20]) -> Self {
        Self(bytes)
    }

    /// Creates an ObjectId from a raw 20-byte slice.
    pub fn from_slice(slice: &[u8]) -> Result<Self> {
        let bytes: [u8; 20] = slice.try_into().map_err(|_| {
            StorageError::InvalidObject(format!("invalid raw object id length: {}", slice.len()))
        })?;
        Ok(Self(bytes))
    }

    /// Creates an ObjectId from a hex string.
    pub fn from_hex(hex: &str) -> Result<Self> {
        if hex.len() != 40 {
            return Err(StorageError::InvalidObject(format!(
                "invalid object id length: {}",
                hex.len()
            )));
        }
        let mut bytes = [0u8; 20];
        hex::decode_to_slice(hex, &mut bytes)
            .map_err(|e| StorageError::InvalidObject(e.to_string()))?;
        Ok(Self(bytes))
    }

    /// Returns true if the string looks like a full hex object id.
    pub fn is_hex(s: &str) -> bool {
        s.len() == 40 && s.bytes().all(|b| b.is_ascii_hexdigit())
    }

    /// Returns the raw bytes.
    pub fn as_bytes(&self) -> &[u8; 20] {
        &self.0
    }

    /// Returns the hex representation.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Returns true for the all-zero id.
    pub fn is_null(&self) -> bool {
        self.0 == [0u8; 20]
    }

    /// Computes the SHA-1 hash of data with a git object header.
    pub fn hash_object(object_type: ObjectType, data: &[u8]) -> Self {
        let mut hasher = Sha1::new();
        hasher.update(header(object_type, data.len()).as_bytes());
        hasher.update(data);
        let result = hasher.finalize();
        let mut bytes = [0u8; 20];
        bytes.copy_from_slice(&result);
        Self(bytes)
    }
}

impl FromStr for ObjectId {
    type Err = StorageError;

    fn from_str(s: &str) -> Result<Self> {
        Self::from_hex(s)
    }
}

impl fmt::Debug for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ObjectId({})", self.to_hex())
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

/// Git object types stored by pressgit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ObjectType {
    /// Commit object.
    Commit,
    /// Directory listing.
    Tree,
    /// File content.
    Blob,
}

impl ObjectType {
    /// Returns the string representation used in git.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Blob => "blob",
            Self::Tree => "tree",
            Self::Commit => "commit",
        }
    }

    /// Parses an object type from a string.
    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "blob" => Ok(Self::Blob),
            "tree" => Ok(Self::Tree),
            "commit" => Ok(Self::Commit),
            _ => Err(StorageError::InvalidObject(format!(
                "unknown object type: {}",
                s
            ))),
        }
    }

    /// Returns the type code used in pack files.
    pub fn pack_type(&self) -> u8 {
        match self {
            Self::Commit => 1,
            Self::Tree => 2,
            Self::Blob => 3,
        }
    }

    /// Parses an object type from a pack file type code.
    pub fn from_pack_type(code: u8) -> Result<Self> {
        match code {
            1 => Ok(Self::Commit),
            2 => Ok(Self::Tree),
            3 => Ok(Self::Blob),
            4 => Err(StorageError::InvalidObject(
                "tag objects are not supported".to_string(),
            )),
            _ => Err(StorageError::InvalidObject(format!(
                "unknown pack type: {}",
                code
            ))),
        }
    }
}

impl fmt::Display for ObjectType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

fn header(object_type: ObjectType, len: usize) -> String {
    format!("{} {}\0", object_type.as_str(), len)
}

/// Wraps content in the `"<type> <len>\0"` envelope that is hashed and stored.
pub fn wrap(object_type: ObjectType, data: &[u8]) -> Vec<u8> {
    let header = header(object_type, data.len());
    let mut wrapped = Vec::with_capacity(header.len() + data.len());
    wrapped.extend_from_slice(header.as_bytes());
    wrapped.extend_from_slice(data);
    wrapped
}

/// Parses the `"<type> <len>"` part of an object envelope (without the NUL).
pub fn parse_header(header: &[u8]) -> Result<(ObjectType, usize)> {
    let header = std::str::from_utf8(header)
        .map_err(|_| StorageError::InvalidObject("non-utf8 object header".to_string()))?;
    let (kind, len) = header
        .split_once(' ')
        .ok_or_else(|| StorageError::InvalidObject(format!("invalid header: {}", header)))?;
    let len = len
        .parse()
        .map_err(|_| StorageError::InvalidObject(format!("invalid size: {}", len)))?;
    Ok((ObjectType::parse(kind)?, len))
}

/// An undecoded object: its id, type, and serialized content.
#[derive(Debug, Clone)]
pub struct RawObject {
    /// The object's unique identifier (SHA-1 hash).
    pub id: ObjectId,
    /// The type of object.
    pub object_type: ObjectType,
    /// The raw object data (uncompressed, without envelope).
    pub data: Bytes,
}

impl RawObject {
    /// Creates a raw object, computing its ID from the data.
    pub fn new(object_type: ObjectType, data: impl Into<Bytes>) -> Self {
        let data = data.into();
        let id = ObjectId::hash_object(object_type, &data);
        Self {
            id,
            object_type,
            data,
        }
    }

    /// Returns the size of the object data.
    pub fn size(&self) -> usize {
        self.data.len()
    }

    /// Decodes the content into a structured object.
    pub fn decode(&self) -> Result<GitObject> {
        GitObject::decode(self.object_type, &self.data)
    }
}

/// A decoded git object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GitObject {
    /// File content.
    Blob(Bytes),
    /// Directory listing.
    Tree(Tree),
    /// Commit.
    Commit(Commit),
}

impl GitObject {
    /// Returns the type of this object.
    pub fn object_type(&self) -> ObjectType {
        match self {
            Self::Blob(_) => ObjectType::Blob,
            Self::Tree(_) => ObjectType::Tree,
            Self::Commit(_) => ObjectType::Commit,
        }
    }

    /// Serializes the object content.
    pub fn encode(&self) -> Bytes {
        match self {
            Self::Blob(data) => data.clone(),
            Self::Tree(tree) => Bytes::from(tree.encode()),
            Self::Commit(commit) => Bytes::from(commit.encode()),
        }
    }

    /// Decodes object content of the given type.
    pub fn decode(object_type: ObjectType, data: &[u8]) -> Result<Self> {
        match object_type {
            ObjectType::Blob => Ok(Self::Blob(Bytes::copy_from_slice(data))),
            ObjectType::Tree => Ok(Self::Tree(Tree::decode(data)?)),
            ObjectType::Commit => Ok(Self::Commit(Commit::decode(data)?)),
        }
    }

    /// Encodes the object and computes its id.
    pub fn to_raw(&self) -> RawObject {
        RawObject::new(self.object_type(), self.encode())
    }

    /// Returns the id this object would be stored under.
    pub fn id(&self) -> ObjectId {
        self.to_raw().id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_object_id_hex_roundtrip() {
        let hex = "a94a8fe5ccb19ba61c4c0873d391e987982fbbd3";
        let id = ObjectId::from_hex(hex).unwrap();
        assert_eq!(id.to_hex(), hex);
        assert_eq!(hex.parse::<ObjectId>().unwrap(), id);
    }

    #[test]
    fn test_blob_hash() {
        let obj = RawObject::new(ObjectType::Blob, b"hello\n".to_vec());
        assert_eq!(obj.id.to_hex(), "ce013625030ba8dba906f756967f9e9ca394464a");
    }

    #[test]
    fn test_empty_blob_hash() {
        let id = ObjectId::hash_object(ObjectType::Blob, b"");
        assert_eq!(id.to_hex(), "e69de29bb2d1d6434b8b29ae775ad8c2e48c5391");
    }

    #[test]
    fn test_empty_tree_hash() {
        let id = GitObject::Tree(Tree::default()).id();
        assert_eq!(id.to_hex(), "4b825dc642cb6eb9a060e54bf8d69288fbee4904");
    }

    #[test]
    fn test_object_id_invalid_hex() {
        assert!(ObjectId::from_hex("abc").is_err());
        assert!(ObjectId::from_hex("zzzzzzzzzzzzzzzzzzzzzzzzzzzzzzzzzzzzzzzz").is_err());
        assert!(ObjectId::from_slice(&[0u8; 19]).is_err());
    }

    #[test]
    fn test_null_id() {
        assert!(ObjectId::NULL.is_null());
        assert_eq!(ObjectId::NULL.to_string(), "0".repeat(40));
        assert!(!ObjectId::from_bytes([1u8; 20]).is_null());
    }

    #[test]
    fn test_object_type_roundtrip() {
        for ot in [ObjectType::Blob, ObjectType::Tree, ObjectType::Commit] {
            assert_eq!(ObjectType::parse(ot.as_str()).unwrap(), ot);
            assert_eq!(ObjectType::from_pack_type(ot.pack_type()).unwrap(), ot);
        }
    }

    #[test]
    fn test_object_type_rejects_tags_and_unknown() {
        assert!(ObjectType::parse("tag").is_err());
        assert!(ObjectType::from_pack_type(4).is_err());
        assert!(ObjectType::from_pack_type(0).is_err());
        assert!(ObjectType::from_pack_type(6).is_err());
    }

    #[test]
    fn test_wrap_and_parse_header() {
        let wrapped = wrap(ObjectType::Blob, b"abc");
        assert_eq!(wrapped, b"blob 3\0abc");
        let nul = wrapped.iter().position(|&b| b == 0).unwrap();
        let (kind, len) = parse_header(&wrapped[..nul]).unwrap();
        assert_eq!(kind, ObjectType::Blob);
        assert_eq!(len, 3);
    }

    #[test]
    fn test_parse_header_invalid() {
        assert!(parse_header(b"blob").is_err());
        assert!(parse_header(b"blob x").is_err());
        assert!(parse_header(b"widget 3").is_err());
    }

    #[test]
    fn test_object_id_serialization() {
        let id = ObjectId::from_bytes([0xab; 20]);
        let json = serde_json::to_string(&id).unwrap();
        let parsed: ObjectId = serde_json::from_str(&json).unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn test_git_object_decode_blob() {
        let obj = GitObject::decode(ObjectType::Blob, b"data").unwrap();
        assert_eq!(obj.object_type(), ObjectType::Blob);
        assert_eq!(obj.encode().as_ref(), b"data");
    }
}
