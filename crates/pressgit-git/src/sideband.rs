//! Side-band multiplexing over pkt-lines.
//!
//! Each data packet starts with a channel byte: 1 carries pack data,
//! 2 carries progress text and 3 carries a fatal error message.

use crate::pktline::{decode_next, PktLine, MAX_PKT_DATA};
use crate::{GitError, Result};

/// Largest chunk of channel data per packet (one byte goes to the channel).
pub const MAX_SIDEBAND_DATA: usize = MAX_PKT_DATA - 1;

/// A side-band channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Channel {
    /// Pack data.
    Pack = 1,
    /// Progress messages.
    Progress = 2,
    /// Fatal error message.
    Fatal = 3,
}

impl Channel {
    /// Parses a channel byte.
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            1 => Some(Self::Pack),
            2 => Some(Self::Progress),
            3 => Some(Self::Fatal),
            _ => None,
        }
    }
}

/// One demultiplexed side-band packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SidebandFrame {
    /// Channel the payload arrived on.
    pub channel: Channel,
    /// Payload without the channel byte.
    pub payload: Vec<u8>,
}

impl SidebandFrame {
    /// Payload as lossy text, for progress and error channels.
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.payload)
            .trim_end_matches(['\n', '\r'])
            .to_string()
    }
}

/// Encodes `data` as side-band packets on `channel`.
pub fn encode_sideband(channel: Channel, data: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(data.len() + data.len() / MAX_SIDEBAND_DATA * 5 + 5);
    for chunk in data.chunks(MAX_SIDEBAND_DATA) {
        let mut payload = Vec::with_capacity(chunk.len() + 1);
        payload.push(channel as u8);
        payload.extend_from_slice(chunk);
        PktLine::Data(payload).encode_into(&mut out);
    }
    out
}

/// Iterator over side-band frames until a flush packet or end of input.
#[derive(Debug)]
pub struct SidebandReader<'a> {
    buf: &'a [u8],
    cursor: usize,
    done: bool,
}

/// Starts demultiplexing side-band packets at `cursor` in `buf`.
pub fn demultiplex_sideband(buf: &[u8], cursor: usize) -> SidebandReader<'_> {
    SidebandReader {
        buf,
        cursor,
        done: false,
    }
}

impl SidebandReader<'_> {
    /// Offset just past the last consumed packet.
    pub fn position(&self) -> usize {
        self.cursor
    }

    fn next_frame(&mut self) -> Result<Option<SidebandFrame>> {
        match decode_next(self.buf, &mut self.cursor)? {
            None | Some(PktLine::Flush) | Some(PktLine::ResponseEnd) => Ok(None),
            Some(PktLine::Delimiter) => Err(GitError::Protocol(
                "unexpected delimiter in side-band stream".to_string(),
            )),
            Some(PktLine::Data(mut data)) => {
                if data.is_empty() {
                    return Err(GitError::Protocol(
                        "side-band packet without a channel".to_string(),
                    ));
                }
                let channel = Channel::from_byte(data[0]).ok_or_else(|| {
                    GitError::Protocol(format!("unknown side-band channel {}", data[0]))
                })?;
                data.remove(0);
                Ok(Some(SidebandFrame {
                    channel,
                    payload: data,
                }))
            }
        }
    }
}

impl Iterator for SidebandReader<'_> {
    type Item = Result<SidebandFrame>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.next_frame() {
            Ok(Some(frame)) => Some(Ok(frame)),
            Ok(None) => {
                self.done = true;
                None
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}

/// Concatenates pack-channel payloads, reporting progress lines as they arrive.
///
/// A frame on the fatal channel aborts with [`GitError::RemoteFatal`].
pub fn collect_pack_data<I, F>(frames: I, mut on_progress: F) -> Result<Vec<u8>>
where
    I: IntoIterator<Item = Result<SidebandFrame>>,
    F: FnMut(&str),
{
    let mut pack = Vec::new();
    for frame in frames {
        let frame = frame?;
        match frame.channel {
            Channel::Pack => pack.extend_from_slice(&frame.payload),
            Channel::Progress => on_progress(&frame.text()),
            Channel::Fatal => return Err(GitError::RemoteFatal(frame.text())),
        }
    }
    Ok(pack)
}
