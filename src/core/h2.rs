//! Just enough HTTP/2 to read a gRPC request path.
//!
//! This is not an HTTP/2 implementation: there is no flow control, no stream
//! state and no SETTINGS negotiation. Frames are split off a byte buffer,
//! everything except `HEADERS`/`CONTINUATION` is skipped, and the first
//! complete header block is HPACK-decoded until `:path` shows up. The real
//! protocol exchange happens between client and upstream once the bytes are
//! replayed.
use bytes::{Buf, Bytes, BytesMut};
use fluke_hpack::Decoder;

use crate::core::error::{ProxyError, ProxyResult};

/// Client connection preface for prior-knowledge HTTP/2.
pub const PREFACE: &[u8] = b"PRI * HTTP/2.0\r\n\r\nSM\r\n\r\n";

/// SETTINGS frame with the ACK flag and an empty payload.
pub const SETTINGS_ACK: [u8; 9] = [0, 0, 0, frame_type::SETTINGS, flags::ACK, 0, 0, 0, 0];

pub const FRAME_HEADER_LEN: usize = 9;

/// SETTINGS_MAX_FRAME_SIZE default; we never advertise a larger one.
pub const MAX_FRAME_LEN: usize = 16_384;

pub mod frame_type {
    pub const DATA: u8 = 0x0;
    pub const HEADERS: u8 = 0x1;
    pub const SETTINGS: u8 = 0x4;
    pub const CONTINUATION: u8 = 0x9;
}

pub mod flags {
    pub const ACK: u8 = 0x1;
    pub const END_STREAM: u8 = 0x1;
    pub const END_HEADERS: u8 = 0x4;
    pub const PADDED: u8 = 0x8;
    pub const PRIORITY: u8 = 0x20;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub length: usize,
    pub kind: u8,
    pub flags: u8,
    pub stream_id: u32,
}

impl FrameHeader {
    pub fn parse(bytes: &[u8; FRAME_HEADER_LEN]) -> Self {
        let length =
            (usize::from(bytes[0]) << 16) | (usize::from(bytes[1]) << 8) | usize::from(bytes[2]);
        let stream_id = u32::from_be_bytes([bytes[5], bytes[6], bytes[7], bytes[8]]) & 0x7fff_ffff;
        Self {
            length,
            kind: bytes[3],
            flags: bytes[4],
            stream_id,
        }
    }

    pub fn has(&self, flag: u8) -> bool {
        self.flags & flag == flag
    }
}

/// Strip the client preface from the front of `buf`.
///
/// Returns `Ok(false)` while fewer than [`PREFACE`] bytes are buffered.
pub fn take_preface(buf: &mut BytesMut) -> ProxyResult<bool> {
    if buf.len() < PREFACE.len() {
        if !PREFACE.starts_with(&buf[..]) {
            return Err(ProxyError::protocol("invalid client preface"));
        }
        return Ok(false);
    }
    if &buf[..PREFACE.len()] != PREFACE {
        return Err(ProxyError::protocol("invalid client preface"));
    }
    buf.advance(PREFACE.len());
    Ok(true)
}

/// Split one complete frame off the front of `buf`, if buffered.
pub fn next_frame(buf: &mut BytesMut) -> ProxyResult<Option<(FrameHeader, Bytes)>> {
    let Some(head) = buf.first_chunk::<FRAME_HEADER_LEN>() else {
        return Ok(None);
    };
    let header = FrameHeader::parse(head);
    if header.length > MAX_FRAME_LEN {
        return Err(ProxyError::protocol(format!(
            "frame of {} bytes exceeds max frame size",
            header.length
        )));
    }
    if buf.len() < FRAME_HEADER_LEN + header.length {
        return Ok(None);
    }
    buf.advance(FRAME_HEADER_LEN);
    let payload = buf.split_to(header.length).freeze();
    Ok(Some((header, payload)))
}

/// Header block fragment of a HEADERS payload, without padding and priority.
fn headers_fragment(header: &FrameHeader, payload: &[u8]) -> ProxyResult<Vec<u8>> {
    let mut start = 0;
    let mut end = payload.len();

    if header.has(flags::PADDED) {
        let pad_len = usize::from(
            *payload
                .first()
                .ok_or_else(|| ProxyError::protocol("padded HEADERS frame is empty"))?,
        );
        start += 1;
        end = end
            .checked_sub(pad_len)
            .ok_or_else(|| ProxyError::protocol("HEADERS padding exceeds payload"))?;
    }
    if header.has(flags::PRIORITY) {
        start += 5;
    }
    if start > end {
        return Err(ProxyError::protocol("HEADERS frame too short"));
    }
    Ok(payload[start..end].to_vec())
}

/// Feeds frames in order and reports the request `:path` once known.
///
/// Completed header blocks are kept so the HPACK dynamic table can be rebuilt
/// in order; the decoder uses the protocol-default 4096-byte table since no
/// SETTINGS_HEADER_TABLE_SIZE is ever advertised to grow it.
#[derive(Default)]
pub struct PathExtractor {
    blocks: Vec<Vec<u8>>,
    /// Stream id and accumulated fragment of a header block awaiting CONTINUATION.
    pending: Option<(u32, Vec<u8>)>,
}

impl PathExtractor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_frame(&mut self, header: &FrameHeader, payload: &[u8]) -> ProxyResult<Option<String>> {
        if let Some((stream_id, mut block)) = self.pending.take() {
            if header.kind != frame_type::CONTINUATION || header.stream_id != stream_id {
                return Err(ProxyError::protocol(
                    "header block interrupted before END_HEADERS",
                ));
            }
            block.extend_from_slice(payload);
            if !header.has(flags::END_HEADERS) {
                self.pending = Some((stream_id, block));
                return Ok(None);
            }
            return self.decode_path(block);
        }

        match header.kind {
            frame_type::HEADERS => {
                let fragment = headers_fragment(header, payload)?;
                if header.has(flags::END_HEADERS) {
                    self.decode_path(fragment)
                } else {
                    self.pending = Some((header.stream_id, fragment));
                    Ok(None)
                }
            }
            frame_type::CONTINUATION => Err(ProxyError::protocol("unexpected CONTINUATION frame")),
            _ => Ok(None),
        }
    }

    fn decode_path(&mut self, block: Vec<u8>) -> ProxyResult<Option<String>> {
        self.blocks.push(block);

        let mut decoder = Decoder::new();
        let mut fields = Vec::new();
        for block in &self.blocks {
            fields = decoder
                .decode(block)
                .map_err(|e| ProxyError::protocol(format!("hpack decode failed: {e:?}")))?;
        }

        Ok(fields
            .into_iter()
            .find(|(name, _)| name.as_slice() == b":path")
            .map(|(_, value)| String::from_utf8_lossy(&value).into_owned()))
    }
}

/// Split `/<service>/<method>` into its two segments.
pub fn split_grpc_path(path: &str) -> Option<(&str, &str)> {
    let mut segments = path.split('/');
    let (Some(""), Some(service), Some(method), None) = (
        segments.next(),
        segments.next(),
        segments.next(),
        segments.next(),
    ) else {
        return None;
    };
    Some((service, method))
}

/// Encode a frame header followed by `payload`.
pub fn encode_frame(kind: u8, flags: u8, stream_id: u32, payload: &[u8]) -> Vec<u8> {
    let len = payload.len();
    let mut out = Vec::with_capacity(FRAME_HEADER_LEN + len);
    out.extend_from_slice(&[(len >> 16) as u8, (len >> 8) as u8, len as u8, kind, flags]);
    out.extend_from_slice(&(stream_id & 0x7fff_ffff).to_be_bytes());
    out.extend_from_slice(payload);
    out
}
