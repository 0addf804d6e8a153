//! Git delta instruction streams.
//!
//! A delta starts with the base and result sizes as little-endian base-128
//! varints, followed by instructions. A control byte with the high bit set
//! copies a range of the base, where bits 0-3 select offset bytes and bits
//! 4-6 select size bytes (a size of zero means `0x10000`). A control byte
//! in `1..=127` inserts that many literal bytes. Zero is reserved.

use crate::{GitError, Result};
use std::collections::HashMap;

/// Size of a copy with no size bytes present.
const DEFAULT_COPY_SIZE: usize = 0x10000;
/// Largest literal run a single insert instruction can carry.
const MAX_INSERT: usize = 0x7f;
/// Block size used to index the base when encoding.
const BLOCK: usize = 16;
/// Cap on speculative preallocation from a declared result size.
const MAX_PREALLOC: usize = 16 * 1024 * 1024;

fn read_size(delta: &[u8], pos: &mut usize) -> Result<usize> {
    let mut value: u64 = 0;
    let mut shift = 0u32;
    loop {
        let byte = *delta
            .get(*pos)
            .ok_or_else(|| GitError::InvalidDelta("truncated size header".to_string()))?;
        *pos += 1;
        let bits = u64::from(byte & 0x7f);
        if shift >= 64 || (shift > 57 && bits >> (64 - shift) != 0) {
            return Err(GitError::InvalidDelta("size header overflow".to_string()));
        }
        value |= bits << shift;
        shift += 7;
        if byte & 0x80 == 0 {
            break;
        }
    }
    usize::try_from(value).map_err(|_| GitError::InvalidDelta("size too large".to_string()))
}

fn write_size(out: &mut Vec<u8>, mut size: usize) {
    loop {
        let byte = (size & 0x7f) as u8;
        size >>= 7;
        if size == 0 {
            out.push(byte);
            return;
        }
        out.push(byte | 0x80);
    }
}

/// Reads the declared base and result sizes of a delta.
pub fn delta_sizes(delta: &[u8]) -> Result<(usize, usize)> {
    let mut pos = 0;
    let base = read_size(delta, &mut pos)?;
    let result = read_size(delta, &mut pos)?;
    Ok((base, result))
}

/// Applies a delta to `base` and returns the reconstructed object body.
pub fn apply_delta(base: &[u8], delta: &[u8]) -> Result<Vec<u8>> {
    let mut pos = 0;
    let base_len = read_size(delta, &mut pos)?;
    let result_len = read_size(delta, &mut pos)?;
    if base_len != base.len() {
        return Err(GitError::InvalidDelta(format!(
            "base length mismatch: delta expects {}, base has {}",
            base_len,
            base.len()
        )));
    }

    let mut out = Vec::with_capacity(result_len.min(MAX_PREALLOC));
    while pos < delta.len() {
        let cmd = delta[pos];
        pos += 1;

        if cmd & 0x80 != 0 {
            let mut offset = 0usize;
            for i in 0..4 {
                if cmd & (1 << i) != 0 {
                    let byte = *delta.get(pos).ok_or_else(|| {
                        GitError::InvalidDelta("truncated copy offset".to_string())
                    })?;
                    pos += 1;
                    offset |= (byte as usize) << (8 * i);
                }
            }
            let mut size = 0usize;
            for i in 0..3 {
                if cmd & (0x10 << i) != 0 {
                    let byte = *delta.get(pos).ok_or_else(|| {
                        GitError::InvalidDelta("truncated copy size".to_string())
                    })?;
                    pos += 1;
                    size |= (byte as usize) << (8 * i);
                }
            }
            if size == 0 {
                size = DEFAULT_COPY_SIZE;
            }
            let end = offset
                .checked_add(size)
                .filter(|&end| end <= base.len())
                .ok_or_else(|| {
                    GitError::InvalidDelta(format!(
                        "copy of {} bytes at {} exceeds base of {} bytes",
                        size,
                        offset,
                        base.len()
                    ))
                })?;
            out.extend_from_slice(&base[offset..end]);
        } else if cmd != 0 {
            let len = cmd as usize;
            let literal = delta
                .get(pos..pos + len)
                .ok_or_else(|| GitError::InvalidDelta("truncated insert".to_string()))?;
            out.extend_from_slice(literal);
            pos += len;
        } else {
            return Err(GitError::InvalidDelta("reserved instruction 0".to_string()));
        }

        if out.len() > result_len {
            return Err(GitError::InvalidDelta(format!(
                "result exceeds declared length {}",
                result_len
            )));
        }
    }

    if out.len() != result_len {
        return Err(GitError::InvalidDelta(format!(
            "result length mismatch: expected {}, got {}",
            result_len,
            out.len()
        )));
    }
    Ok(out)
}

fn push_copy(out: &mut Vec<u8>, mut offset: usize, mut len: usize) {
    while len > 0 {
        let size = len.min(DEFAULT_COPY_SIZE);
        let mut cmd = 0x80u8;
        let mut args = Vec::with_capacity(7);
        for i in 0..4 {
            let byte = ((offset >> (8 * i)) & 0xff) as u8;
            if byte != 0 {
                cmd |= 1 << i;
                args.push(byte);
            }
        }
        if size != DEFAULT_COPY_SIZE {
            for i in 0..2 {
                let byte = ((size >> (8 * i)) & 0xff) as u8;
                if byte != 0 {
                    cmd |= 0x10 << i;
                    args.push(byte);
                }
            }
        }
        out.push(cmd);
        out.extend_from_slice(&args);
        offset += size;
        len -= size;
    }
}

fn push_inserts(out: &mut Vec<u8>, literal: &[u8]) {
    for chunk in literal.chunks(MAX_INSERT) {
        out.push(chunk.len() as u8);
        out.extend_from_slice(chunk);
    }
}

/// Encodes `target` as a delta against `base`.
///
/// Matches are found by indexing fixed-size blocks of the base and extending
/// each hit forward; everything else becomes literal inserts. Bases larger
/// than 4 GiB are not indexed.
pub fn encode_delta(base: &[u8], target: &[u8]) -> Vec<u8> {
    let mut out = Vec::new();
    write_size(&mut out, base.len());
    write_size(&mut out, target.len());

    let mut index: HashMap<&[u8], usize> = HashMap::new();
    if base.len() <= u32::MAX as usize {
        for (i, block) in base.chunks_exact(BLOCK).enumerate() {
            index.entry(block).or_insert(i * BLOCK);
        }
    }

    let mut literal_start = 0;
    let mut i = 0;
    while i + BLOCK <= target.len() {
        match index.get(&target[i..i + BLOCK]) {
            Some(&start) => {
                let len = base[start..]
                    .iter()
                    .zip(&target[i..])
                    .take_while(|(a, b)| a == b)
                    .count();
                push_inserts(&mut out, &target[literal_start..i]);
                push_copy(&mut out, start, len);
                i += len;
                literal_start = i;
            }
            None => i += 1,
        }
    }
    push_inserts(&mut out, &target[literal_start..]);
    out
}
