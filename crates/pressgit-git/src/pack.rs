//! Git pack file format implementation.
//!
//! Pack files are the format used by git for efficient object transfer.
//! See: https://git-scm.com/docs/pack-format

use crate::delta::{apply_delta, encode_delta};
use crate::{GitError, Result};
use bytes::Bytes;
use flate2::write::ZlibEncoder;
use flate2::{Compression, Decompress, FlushDecompress, Status};
use pressgit_storage::{GitObject, ObjectId, ObjectStore, ObjectType, RawObject};
use sha1::{Digest, Sha1};
use std::collections::HashMap;
use std::io::Write;

/// Magic bytes at the start of a pack file.
const PACK_SIGNATURE: &[u8; 4] = b"PACK";
/// Pack file version we write.
const PACK_VERSION: u32 = 2;
/// Length of the fixed header.
const HEADER_LEN: usize = 12;
/// Length of the trailing SHA-1 checksum.
const TRAILER_LEN: usize = 20;
/// Pack type code for offset deltas.
const OFS_DELTA: u8 = 6;
/// Pack type code for reference deltas.
const REF_DELTA: u8 = 7;
/// Cap on speculative preallocation from a declared size.
const MAX_PREALLOC: usize = 16 * 1024 * 1024;

/// Writes a record header: type in bits 4-6 of the first byte, the low four
/// size bits below it, then seven size bits per continuation byte.
pub fn write_object_header(out: &mut Vec<u8>, type_code: u8, size: usize) {
    let mut byte = ((type_code & 0x07) << 4) | (size & 0x0f) as u8;
    let mut rest = size >> 4;
    while rest != 0 {
        out.push(byte | 0x80);
        byte = (rest & 0x7f) as u8;
        rest >>= 7;
    }
    out.push(byte);
}

/// Reads a record header written by [`write_object_header`].
pub fn read_object_header(data: &[u8], pos: &mut usize) -> Result<(u8, usize)> {
    let mut byte = next_byte(data, pos, "record header")?;
    let type_code = (byte >> 4) & 0x07;
    let mut size = u64::from(byte & 0x0f);
    let mut shift = 4u32;
    while byte & 0x80 != 0 {
        byte = next_byte(data, pos, "record size")?;
        if shift > 60 {
            return Err(GitError::InvalidPack("record size overflow".to_string()));
        }
        size |= u64::from(byte & 0x7f) << shift;
        shift += 7;
    }
    let size = usize::try_from(size)
        .map_err(|_| GitError::InvalidPack("record size too large".to_string()))?;
    Ok((type_code, size))
}

/// Writes the backwards distance of an offset delta.
pub fn write_offset(out: &mut Vec<u8>, mut offset: usize) {
    let mut buf = [0u8; 10];
    let mut i = buf.len() - 1;
    buf[i] = (offset & 0x7f) as u8;
    offset >>= 7;
    while offset != 0 {
        offset -= 1;
        i -= 1;
        buf[i] = 0x80 | (offset & 0x7f) as u8;
        offset >>= 7;
    }
    out.extend_from_slice(&buf[i..]);
}

/// Reads an offset-delta distance: each continuation adds one before shifting.
pub fn read_offset(data: &[u8], pos: &mut usize) -> Result<usize> {
    let mut byte = next_byte(data, pos, "delta offset")?;
    let mut value = u64::from(byte & 0x7f);
    while byte & 0x80 != 0 {
        byte = next_byte(data, pos, "delta offset")?;
        if value >= (u64::MAX >> 7) {
            return Err(GitError::InvalidPack("delta offset overflow".to_string()));
        }
        value = ((value + 1) << 7) | u64::from(byte & 0x7f);
    }
    usize::try_from(value).map_err(|_| GitError::InvalidPack("delta offset too large".to_string()))
}

fn next_byte(data: &[u8], pos: &mut usize, what: &str) -> Result<u8> {
    let byte = *data
        .get(*pos)
        .ok_or_else(|| GitError::InvalidPack(format!("unexpected end of pack in {}", what)))?;
    *pos += 1;
    Ok(byte)
}

/// Inflates one zlib stream from the front of `input`.
///
/// Returns the decompressed bytes and how many input bytes the stream used.
fn inflate(input: &[u8], expected: usize) -> Result<(Vec<u8>, usize)> {
    let mut decoder = Decompress::new(true);
    let mut out = Vec::with_capacity(expected.min(MAX_PREALLOC).max(64));
    loop {
        if out.len() == out.capacity() {
            out.reserve(out.capacity().max(64));
        }
        let in_before = decoder.total_in() as usize;
        let out_before = out.len();
        let status = decoder
            .decompress_vec(&input[in_before..], &mut out, FlushDecompress::None)
            .map_err(|e| GitError::InvalidPack(format!("decompression failed: {}", e)))?;
        if out.len() > expected {
            return Err(GitError::InvalidPack(format!(
                "record inflates past its declared size of {}",
                expected
            )));
        }
        match status {
            Status::StreamEnd => break,
            Status::Ok | Status::BufError => {
                let consumed = decoder.total_in() as usize;
                let stalled = consumed == in_before && out.len() == out_before;
                if consumed == input.len() && (stalled || out.len() < out.capacity()) {
                    return Err(GitError::InvalidPack(
                        "truncated compressed record".to_string(),
                    ));
                }
                if stalled && out.len() < out.capacity() {
                    return Err(GitError::InvalidPack("compressed record stalled".to_string()));
                }
            }
        }
    }
    if out.len() != expected {
        return Err(GitError::InvalidPack(format!(
            "record size mismatch: declared {}, inflated {}",
            expected,
            out.len()
        )));
    }
    Ok((out, decoder.total_in() as usize))
}

fn deflate(data: &[u8]) -> Result<Vec<u8>> {
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data)?;
    Ok(encoder.finish()?)
}

enum PackEntry {
    Object(RawObject),
    OfsDelta { base: usize, delta: Vec<u8> },
    RefDelta { base: ObjectId, delta: Vec<u8> },
}

/// Builds a pack file from a set of objects.
#[derive(Default)]
pub struct PackBuilder {
    entries: Vec<PackEntry>,
}

impl PackBuilder {
    /// Creates a new pack builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of records added so far.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if nothing has been added.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Adds an object to the pack and returns its record index.
    pub fn add(&mut self, object: GitObject) -> usize {
        self.add_raw(object.to_raw())
    }

    /// Adds an already-encoded object.
    pub fn add_raw(&mut self, object: RawObject) -> usize {
        self.entries.push(PackEntry::Object(object));
        self.entries.len() - 1
    }

    /// Adds an object from the store by ID.
    pub fn add_from_store(&mut self, store: &ObjectStore, id: &ObjectId) -> Result<usize> {
        let object = store.read_raw(id)?;
        Ok(self.add_raw(object))
    }

    /// Adds an offset delta whose base is an earlier record.
    pub fn add_ofs_delta(&mut self, base: usize, delta: Vec<u8>) -> Result<usize> {
        if base >= self.entries.len() {
            return Err(GitError::InvalidPack(format!(
                "delta base {} is not an earlier record",
                base
            )));
        }
        self.entries.push(PackEntry::OfsDelta { base, delta });
        Ok(self.entries.len() - 1)
    }

    /// Adds a reference delta against the object named `base`.
    pub fn add_ref_delta(&mut self, base: ObjectId, delta: Vec<u8>) -> usize {
        self.entries.push(PackEntry::RefDelta { base, delta });
        self.entries.len() - 1
    }

    /// Adds `target` as an offset delta against a full object at record `base`.
    pub fn add_delta_against(&mut self, base: usize, target: &RawObject) -> Result<usize> {
        let delta = match self.entries.get(base) {
            Some(PackEntry::Object(object)) if object.object_type == target.object_type => {
                encode_delta(&object.data, &target.data)
            }
            _ => {
                return Err(GitError::InvalidPack(format!(
                    "record {} is not a full {} object",
                    base, target.object_type
                )))
            }
        };
        self.add_ofs_delta(base, delta)
    }

    /// Builds the pack file.
    pub fn build(self) -> Result<Vec<u8>> {
        let count = u32::try_from(self.entries.len())
            .map_err(|_| GitError::InvalidPack("too many objects for one pack".to_string()))?;

        let mut pack = Vec::new();
        pack.extend_from_slice(PACK_SIGNATURE);
        pack.extend_from_slice(&PACK_VERSION.to_be_bytes());
        pack.extend_from_slice(&count.to_be_bytes());

        let mut offsets = Vec::with_capacity(self.entries.len());
        for entry in &self.entries {
            let offset = pack.len();
            offsets.push(offset);
            match entry {
                PackEntry::Object(object) => {
                    write_object_header(&mut pack, object.object_type.pack_type(), object.size());
                    pack.extend_from_slice(&deflate(&object.data)?);
                }
                PackEntry::OfsDelta { base, delta } => {
                    write_object_header(&mut pack, OFS_DELTA, delta.len());
                    write_offset(&mut pack, offset - offsets[*base]);
                    pack.extend_from_slice(&deflate(delta)?);
                }
                PackEntry::RefDelta { base, delta } => {
                    write_object_header(&mut pack, REF_DELTA, delta.len());
                    pack.extend_from_slice(base.as_bytes());
                    pack.extend_from_slice(&deflate(delta)?);
                }
            }
        }

        let checksum = Sha1::digest(&pack);
        pack.extend_from_slice(&checksum);
        tracing::debug!(objects = count, bytes = pack.len(), "built pack");
        Ok(pack)
    }
}

/// An object recovered from a pack.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackObject {
    /// Offset of the record in the pack.
    pub offset: usize,
    /// Object ID of the reconstructed object.
    pub id: ObjectId,
    /// Object type.
    pub object_type: ObjectType,
    /// Object body.
    pub data: Bytes,
}

impl PackObject {
    /// Converts into a raw object.
    pub fn into_raw(self) -> RawObject {
        RawObject {
            id: self.id,
            object_type: self.object_type,
            data: self.data,
        }
    }
}

enum RecordKind {
    Full(ObjectType),
    OfsDelta(usize),
    RefDelta(ObjectId),
}

struct Record {
    offset: usize,
    kind: RecordKind,
    data: Vec<u8>,
}

/// Parses a pack file and extracts objects.
pub struct PackParser<'a> {
    data: &'a [u8],
    base_store: Option<&'a ObjectStore>,
}

impl<'a> PackParser<'a> {
    /// Creates a new pack parser.
    pub fn new(data: &'a [u8]) -> Self {
        Self {
            data,
            base_store: None,
        }
    }

    /// Lets reference deltas resolve against objects in `store`.
    pub fn with_base_store(mut self, store: &'a ObjectStore) -> Self {
        self.base_store = Some(store);
        self
    }

    /// Number of records the header declares.
    pub fn object_count(&self) -> Result<usize> {
        if self.data.len() < HEADER_LEN + TRAILER_LEN {
            return Err(GitError::InvalidPack("pack too small".to_string()));
        }
        if &self.data[0..4] != PACK_SIGNATURE {
            return Err(GitError::InvalidPack("invalid signature".to_string()));
        }
        let version = u32::from_be_bytes([self.data[4], self.data[5], self.data[6], self.data[7]]);
        if version != 2 && version != 3 {
            return Err(GitError::InvalidPack(format!(
                "unsupported version: {}",
                version
            )));
        }
        let count =
            u32::from_be_bytes([self.data[8], self.data[9], self.data[10], self.data[11]]);
        Ok(count as usize)
    }

    /// Decodes every object in the pack, resolving deltas.
    ///
    /// Objects come back in pack order.
    pub fn decode(&self) -> Result<Vec<PackObject>> {
        let count = self.object_count()?;
        let body_end = self.data.len() - TRAILER_LEN;
        let computed = Sha1::digest(&self.data[..body_end]);
        if computed.as_slice() != &self.data[body_end..] {
            return Err(GitError::InvalidPack("checksum mismatch".to_string()));
        }

        let body = &self.data[..body_end];
        let mut records = Vec::with_capacity(count.min(body.len()));
        let mut pos = HEADER_LEN;
        for _ in 0..count {
            let record = self.parse_record(body, &mut pos)?;
            records.push(record);
        }
        if pos != body_end {
            return Err(GitError::InvalidPack(format!(
                "{} unexpected bytes after the last record",
                body_end - pos
            )));
        }

        self.resolve(records)
    }

    /// Decodes the pack and writes every object into `store`.
    pub fn decode_into(&self, store: &ObjectStore) -> Result<Vec<ObjectId>> {
        let objects = self.decode()?;
        let mut ids = Vec::with_capacity(objects.len());
        for object in objects {
            let raw = object.into_raw();
            store.add_raw(&raw)?;
            ids.push(raw.id);
        }
        Ok(ids)
    }

    fn parse_record(&self, body: &[u8], pos: &mut usize) -> Result<Record> {
        let offset = *pos;
        let (type_code, size) = read_object_header(body, pos)?;
        let kind = match type_code {
            OFS_DELTA => {
                let distance = read_offset(body, pos)?;
                let base = offset
                    .checked_sub(distance)
                    .filter(|_| distance > 0)
                    .ok_or_else(|| {
                        GitError::InvalidPack(format!(
                            "delta at {} points {} bytes back",
                            offset, distance
                        ))
                    })?;
                RecordKind::OfsDelta(base)
            }
            REF_DELTA => {
                let raw = body
                    .get(*pos..*pos + 20)
                    .ok_or_else(|| GitError::InvalidPack("truncated delta base".to_string()))?;
                *pos += 20;
                RecordKind::RefDelta(ObjectId::from_slice(raw)?)
            }
            code => RecordKind::Full(
                ObjectType::from_pack_type(code)
                    .map_err(|e| GitError::InvalidPack(format!("record at {}: {}", offset, e)))?,
            ),
        };
        let (data, consumed) = inflate(&body[*pos..], size)?;
        *pos += consumed;
        Ok(Record { offset, kind, data })
    }

    fn resolve(&self, records: Vec<Record>) -> Result<Vec<PackObject>> {
        let mut resolved: Vec<Option<(ObjectType, ObjectId, Bytes)>> = vec![None; records.len()];
        let by_offset: HashMap<usize, usize> = records
            .iter()
            .enumerate()
            .map(|(i, r)| (r.offset, i))
            .collect();
        let mut by_id: HashMap<ObjectId, usize> = HashMap::new();
        let mut pending = Vec::new();

        for (i, record) in records.iter().enumerate() {
            match record.kind {
                RecordKind::Full(object_type) => {
                    let id = ObjectId::hash_object(object_type, &record.data);
                    by_id.entry(id).or_insert(i);
                    resolved[i] = Some((object_type, id, Bytes::copy_from_slice(&record.data)));
                }
                _ => pending.push(i),
            }
        }

        let deltas = pending.len();
        while !pending.is_empty() {
            let mut unresolved = Vec::new();
            for &i in &pending {
                let record = &records[i];
                let base = match &record.kind {
                    RecordKind::OfsDelta(base_offset) => {
                        let base = by_offset.get(base_offset).ok_or_else(|| {
                            GitError::InvalidPack(format!(
                                "delta at {} has no record at base offset {}",
                                record.offset, base_offset
                            ))
                        })?;
                        resolved[*base]
                            .as_ref()
                            .map(|(t, _, data)| (*t, data.clone()))
                    }
                    RecordKind::RefDelta(base_id) => match by_id.get(base_id) {
                        Some(&base) => resolved[base]
                            .as_ref()
                            .map(|(t, _, data)| (*t, data.clone())),
                        None => match self.base_store {
                            Some(store) if store.contains(base_id) => {
                                let raw = store.read_raw(base_id)?;
                                Some((raw.object_type, raw.data))
                            }
                            _ => None,
                        },
                    },
                    RecordKind::Full(_) => continue,
                };

                match base {
                    Some((object_type, base_data)) => {
                        let data = apply_delta(&base_data, &record.data)?;
                        let id = ObjectId::hash_object(object_type, &data);
                        by_id.entry(id).or_insert(i);
                        resolved[i] = Some((object_type, id, Bytes::from(data)));
                    }
                    None => unresolved.push(i),
                }
            }

            if unresolved.len() == pending.len() {
                return Err(GitError::UnresolvedDeltas {
                    remaining: unresolved.len(),
                    offset: records[unresolved[0]].offset,
                });
            }
            pending = unresolved;
        }

        tracing::debug!(objects = records.len(), deltas, "decoded pack");

        records
            .iter()
            .zip(resolved)
            .map(|(record, entry)| {
                let (object_type, id, data) = entry.ok_or_else(|| {
                    GitError::InvalidPack(format!("record at {} left unresolved", record.offset))
                })?;
                Ok(PackObject {
                    offset: record.offset,
                    id,
                    object_type,
                    data,
                })
            })
            .collect()
    }
}
