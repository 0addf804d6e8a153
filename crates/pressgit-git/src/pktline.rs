//! Git pkt-line format implementation.
//!
//! The pkt-line format is used for all git protocol communication.
//! Each line is prefixed with a 4-character hex length that counts the
//! prefix itself. Lengths `0000`, `0001` and `0002` are the flush,
//! delimiter and response-end markers.

use crate::{GitError, Result};
use std::io::{Read, Write};

/// Largest payload a single data packet may carry.
pub const MAX_PKT_DATA: usize = 65516;

/// A pkt-line packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PktLine {
    /// Data line with content.
    Data(Vec<u8>),
    /// Flush packet (0000).
    Flush,
    /// Delimiter packet (0001).
    Delimiter,
    /// Response-end packet (0002).
    ResponseEnd,
}

impl PktLine {
    /// Creates a data packet from a string slice.
    pub fn from_string(s: &str) -> Self {
        Self::Data(s.as_bytes().to_vec())
    }

    /// Creates a data packet from bytes.
    pub fn from_bytes(b: impl Into<Vec<u8>>) -> Self {
        Self::Data(b.into())
    }

    /// Encodes the packet to bytes.
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::new();
        self.encode_into(&mut out);
        out
    }

    /// Appends the encoded packet to `out`.
    pub fn encode_into(&self, out: &mut Vec<u8>) {
        match self {
            Self::Data(data) => {
                out.extend_from_slice(format!("{:04x}", data.len() + 4).as_bytes());
                out.extend_from_slice(data);
            }
            Self::Flush => out.extend_from_slice(b"0000"),
            Self::Delimiter => out.extend_from_slice(b"0001"),
            Self::ResponseEnd => out.extend_from_slice(b"0002"),
        }
    }

    /// Returns true if this is a flush packet.
    pub fn is_flush(&self) -> bool {
        matches!(self, Self::Flush)
    }

    /// Returns the data content, or None for special packets.
    pub fn data(&self) -> Option<&[u8]> {
        match self {
            Self::Data(data) => Some(data),
            _ => None,
        }
    }

    /// Returns the data as a string, trimming any trailing newline.
    pub fn as_str(&self) -> Option<&str> {
        self.data()
            .and_then(|d| std::str::from_utf8(d).ok())
            .map(|s| s.trim_end_matches('\n'))
    }
}

/// Encodes a sequence of packets into one buffer.
///
/// Fails if a data packet is larger than [`MAX_PKT_DATA`].
pub fn encode_pkt_lines<'a>(packets: impl IntoIterator<Item = &'a PktLine>) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    for pkt in packets {
        if let PktLine::Data(data) = pkt {
            check_payload(data.len())?;
        }
        pkt.encode_into(&mut out);
    }
    Ok(out)
}

fn check_payload(len: usize) -> Result<()> {
    if len > MAX_PKT_DATA {
        return Err(GitError::InvalidPktLine(format!(
            "payload of {} bytes exceeds {}",
            len, MAX_PKT_DATA
        )));
    }
    Ok(())
}

fn parse_length(prefix: &[u8]) -> Result<usize> {
    let text = std::str::from_utf8(prefix)
        .map_err(|_| GitError::InvalidPktLine("invalid length prefix".to_string()))?;
    if !text.bytes().all(|b| b.is_ascii_hexdigit()) {
        return Err(GitError::InvalidPktLine(format!("invalid length: {:?}", text)));
    }
    usize::from_str_radix(text, 16)
        .map_err(|_| GitError::InvalidPktLine(format!("invalid length: {:?}", text)))
}

/// Decodes the packet starting at `*cursor` and advances the cursor past it.
///
/// Returns `Ok(None)` once the buffer is exhausted.
pub fn decode_next(buf: &[u8], cursor: &mut usize) -> Result<Option<PktLine>> {
    let start = *cursor;
    if start >= buf.len() {
        return Ok(None);
    }
    let prefix = buf
        .get(start..start + 4)
        .ok_or_else(|| GitError::InvalidPktLine("truncated length prefix".to_string()))?;
    let pkt = match parse_length(prefix)? {
        0 => PktLine::Flush,
        1 => PktLine::Delimiter,
        2 => PktLine::ResponseEnd,
        3 => return Err(GitError::InvalidPktLine("length too small".to_string())),
        len => {
            let data = buf.get(start + 4..start + len).ok_or_else(|| {
                GitError::InvalidPktLine(format!(
                    "packet at {} declares {} bytes but only {} remain",
                    start,
                    len,
                    buf.len() - start
                ))
            })?;
            *cursor = start + len;
            return Ok(Some(PktLine::Data(data.to_vec())));
        }
    };
    *cursor = start + 4;
    Ok(Some(pkt))
}

/// Decodes every packet in `buf`.
pub fn decode_all(buf: &[u8]) -> Result<Vec<PktLine>> {
    let mut cursor = 0;
    let mut packets = Vec::new();
    while let Some(pkt) = decode_next(buf, &mut cursor)? {
        packets.push(pkt);
    }
    Ok(packets)
}

/// Reader for pkt-line format.
pub struct PktLineReader<R> {
    reader: R,
}

impl<R: Read> PktLineReader<R> {
    /// Creates a new pkt-line reader.
    pub fn new(reader: R) -> Self {
        Self { reader }
    }

    /// Reads the next packet.
    pub fn read(&mut self) -> Result<Option<PktLine>> {
        let mut len_buf = [0u8; 4];
        match self.reader.read_exact(&mut len_buf) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
            Err(e) => return Err(e.into()),
        }

        match parse_length(&len_buf)? {
            0 => Ok(Some(PktLine::Flush)),
            1 => Ok(Some(PktLine::Delimiter)),
            2 => Ok(Some(PktLine::ResponseEnd)),
            3 => Err(GitError::InvalidPktLine("length too small".to_string())),
            len => {
                let mut data = vec![0u8; len - 4];
                self.reader.read_exact(&mut data).map_err(|e| {
                    if e.kind() == std::io::ErrorKind::UnexpectedEof {
                        GitError::InvalidPktLine(format!("truncated packet of {} bytes", len))
                    } else {
                        e.into()
                    }
                })?;
                Ok(Some(PktLine::Data(data)))
            }
        }
    }

    /// Reads all packets until a flush packet.
    pub fn read_until_flush(&mut self) -> Result<Vec<PktLine>> {
        let mut packets = Vec::new();
        loop {
            match self.read()? {
                Some(PktLine::Flush) | None => break,
                Some(pkt) => packets.push(pkt),
            }
        }
        Ok(packets)
    }

    /// Returns a mutable reference to the inner reader.
    pub fn inner_mut(&mut self) -> &mut R {
        &mut self.reader
    }

    /// Consumes the reader and returns the inner reader.
    pub fn into_inner(self) -> R {
        self.reader
    }
}

/// Writer for pkt-line format.
pub struct PktLineWriter<W> {
    writer: W,
}

impl<W: Write> PktLineWriter<W> {
    /// Creates a new pkt-line writer.
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    /// Writes a packet.
    pub fn write(&mut self, pkt: &PktLine) -> Result<()> {
        if let PktLine::Data(data) = pkt {
            check_payload(data.len())?;
        }
        self.writer.write_all(&pkt.encode())?;
        Ok(())
    }

    /// Writes a data line.
    pub fn write_data(&mut self, data: &[u8]) -> Result<()> {
        self.write(&PktLine::Data(data.to_vec()))
    }

    /// Writes a string line (with newline).
    pub fn write_line(&mut self, s: &str) -> Result<()> {
        let mut data = s.as_bytes().to_vec();
        if !s.ends_with('\n') {
            data.push(b'\n');
        }
        self.write(&PktLine::Data(data))
    }

    /// Writes a flush packet.
    pub fn flush_pkt(&mut self) -> Result<()> {
        self.write(&PktLine::Flush)
    }

    /// Writes a delimiter packet.
    pub fn delim_pkt(&mut self) -> Result<()> {
        self.write(&PktLine::Delimiter)
    }

    /// Flushes the underlying writer.
    pub fn flush(&mut self) -> Result<()> {
        self.writer.flush()?;
        Ok(())
    }

    /// Returns the inner writer.
    pub fn into_inner(self) -> W {
        self.writer
    }
}


#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        /// Any sequence of packets decodes to itself.
        #[test]
        fn prop_pktline_sequence(
            payloads in prop::collection::vec(prop::collection::vec(any::<u8>(), 0..300), 0..20)
        ) {
            let packets: Vec<PktLine> = payloads
                .into_iter()
                .map(|p| if p.is_empty() { PktLine::Delimiter } else { PktLine::Data(p) })
                .chain(std::iter::once(PktLine::Flush))
                .collect();
            let buf = encode_pkt_lines(&packets).unwrap();
            prop_assert_eq!(decode_all(&buf).unwrap(), packets);
        }

        /// Decoding arbitrary bytes never panics.
        #[test]
        fn prop_decode_no_panic(data in prop::collection::vec(any::<u8>(), 0..200)) {
            let _ = decode_all(&data);
        }
    }
}
