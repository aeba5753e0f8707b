//! Protocol sniffing over the first chunk read from a raw connection.
//!
//! Only the request line is inspected. HTTP/1.x and HTTP/2 prior-knowledge
//! (`PRI * HTTP/2.0`) connections both start with one, which is enough to
//! pick a relay without a real HTTP parser.
use crate::core::error::{ProxyError, ProxyResult};

/// Size of the initial read performed on every accepted connection.
pub const SNIFF_CHUNK_SIZE: usize = 4096;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestLine<'a> {
    pub method: &'a str,
    pub path: &'a str,
    pub version: &'a str,
}

/// Dispatch decision for one connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sniffed<'a> {
    HealthCheck,
    Http1(RequestLine<'a>),
    Http2(RequestLine<'a>),
    Unknown,
}

/// Parse the first line of `chunk`. A chunk without a line terminator, a
/// non-UTF-8 line or fewer than three tokens yields `None`.
pub fn parse_request_line(chunk: &[u8]) -> Option<RequestLine<'_>> {
    let end = chunk.iter().position(|&b| b == b'\n')?;
    let mut line = &chunk[..end];
    if let Some((&b'\r', rest)) = line.split_last() {
        line = rest;
    }

    let line = std::str::from_utf8(line).ok()?;
    let mut tokens = line.split_ascii_whitespace();
    let method = tokens.next()?;
    let path = tokens.next()?;
    let version = tokens.next()?;
    Some(RequestLine {
        method,
        path,
        version,
    })
}

pub fn sniff<'a>(chunk: &'a [u8], health_uri: &str) -> Sniffed<'a> {
    let Some(line) = parse_request_line(chunk) else {
        return Sniffed::Unknown;
    };

    if !health_uri.is_empty() && line.path == health_uri {
        return Sniffed::HealthCheck;
    }

    if line.version.starts_with("HTTP/1") {
        Sniffed::Http1(line)
    } else if line.version.starts_with("HTTP/2") {
        Sniffed::Http2(line)
    } else {
        Sniffed::Unknown
    }
}

/// Replace the request-target of the first line with `new_path`.
///
/// Everything outside the path token (method, version, headers and any body
/// bytes already buffered) is copied through byte for byte.
pub fn splice_path(raw: &[u8], new_path: &str) -> ProxyResult<Vec<u8>> {
    let line_end = raw
        .iter()
        .position(|&b| b == b'\n')
        .ok_or_else(|| ProxyError::malformed("request line is not terminated"))?;
    let line = &raw[..line_end];

    let method_end = line
        .iter()
        .position(|&b| b == b' ')
        .ok_or_else(|| ProxyError::malformed("request line has no method separator"))?;
    let path_start = line[method_end..]
        .iter()
        .position(|&b| b == b'/')
        .map(|i| method_end + i)
        .ok_or_else(|| ProxyError::malformed("request target does not start with '/'"))?;
    let path_end = line[path_start..]
        .iter()
        .position(|&b| b == b' ')
        .map(|i| path_start + i)
        .ok_or_else(|| ProxyError::malformed("request target is not followed by a version"))?;

    let mut out = Vec::with_capacity(raw.len() - (path_end - path_start) + new_path.len());
    out.extend_from_slice(&raw[..path_start]);
    out.extend_from_slice(new_path.as_bytes());
    out.extend_from_slice(&raw[path_end..]);
    Ok(out)
}

/// First value of header `name` among the headers present in `chunk`.
///
/// Used for the forwarded-client-IP header; comma-separated lists yield
/// their first (client-most) element.
pub fn header_first_value(chunk: &[u8], name: &str) -> Option<String> {
    if name.is_empty() {
        return None;
    }

    let text = String::from_utf8_lossy(chunk);
    text.split('\n')
        .skip(1)
        .map(|line| line.strip_suffix('\r').unwrap_or(line))
        .take_while(|line| !line.is_empty())
        .filter_map(|line| line.split_once(':'))
        .find(|(key, _)| key.trim().eq_ignore_ascii_case(name))
        .and_then(|(_, value)| value.split(',').next())
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}
