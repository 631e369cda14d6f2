//! HTTP/1.x request heads
//!
//! Recorded requests are parsed with `httparse`, which also accepts the
//! LF-only line endings some clients emit. The same parser backs the replay
//! server's wire reader, so a head that reconstructs offline also parses on
//! the wire.

use http::header::{CONNECTION, CONTENT_LENGTH, TRANSFER_ENCODING};
use http::{HeaderMap, HeaderName, HeaderValue, Method, Uri, Version};
use thiserror::Error;

/// Maximum number of headers accepted in one request head
pub const MAX_HEADERS: usize = 64;

const HEAD_END: &[u8] = b"\r\n\r\n";

/// Reason a request head was rejected
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{0}")]
pub struct InvalidHead(pub String);

impl From<httparse::Error> for InvalidHead {
    fn from(e: httparse::Error) -> Self {
        InvalidHead(e.to_string())
    }
}

/// Parsed request line and headers
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestHead {
    pub method: Method,
    pub uri: Uri,
    pub version: Version,
    pub headers: HeaderMap,
    /// Declared `Content-Length`, if the header is present
    pub content_length: Option<u64>,
    /// True when the body uses chunked transfer coding
    pub chunked: bool,
    /// True when the client asked for the connection to close after this
    /// request
    pub close: bool,
}

impl RequestHead {
    /// Parse a complete head; trailing bytes after the head are ignored
    pub fn parse(buf: &[u8]) -> Result<Self, InvalidHead> {
        match Self::parse_partial(buf)? {
            Some((head, _)) => Ok(head),
            None => Err(InvalidHead("incomplete request head".to_string())),
        }
    }

    /// Parse a head from the front of `buf`
    ///
    /// Returns `Ok(None)` when more bytes are needed, otherwise the head and
    /// the number of bytes it occupied.
    pub fn parse_partial(buf: &[u8]) -> Result<Option<(Self, usize)>, InvalidHead> {
        let mut headers = [httparse::EMPTY_HEADER; MAX_HEADERS];
        let mut req = httparse::Request::new(&mut headers);

        let len = match req.parse(buf)? {
            httparse::Status::Complete(len) => len,
            httparse::Status::Partial => return Ok(None),
        };

        let method = Method::from_bytes(req.method.unwrap_or_default().as_bytes())
            .map_err(|e| InvalidHead(e.to_string()))?;
        let uri: Uri = req
            .path
            .unwrap_or_default()
            .parse()
            .map_err(|e: http::uri::InvalidUri| InvalidHead(e.to_string()))?;
        let version = match req.version {
            Some(0) => Version::HTTP_10,
            _ => Version::HTTP_11,
        };

        let mut map = HeaderMap::with_capacity(req.headers.len());
        for h in req.headers.iter() {
            let name = HeaderName::from_bytes(h.name.as_bytes())
                .map_err(|e| InvalidHead(e.to_string()))?;
            let value = HeaderValue::from_bytes(h.value).map_err(|e| InvalidHead(e.to_string()))?;
            map.append(name, value);
        }

        let content_length = content_length(&map)?;
        let chunked = has_token(&map, &TRANSFER_ENCODING, "chunked");
        let close = has_token(&map, &CONNECTION, "close")
            || (version == Version::HTTP_10 && !has_token(&map, &CONNECTION, "keep-alive"));

        Ok(Some((
            RequestHead {
                method,
                uri,
                version,
                headers: map,
                content_length,
                chunked,
                close,
            },
            len,
        )))
    }

    /// Request path, without the query
    pub fn path(&self) -> &str {
        self.uri.path()
    }
}

fn content_length(headers: &HeaderMap) -> Result<Option<u64>, InvalidHead> {
    let mut declared: Option<u64> = None;
    for value in headers.get_all(CONTENT_LENGTH) {
        let n = value
            .to_str()
            .ok()
            .and_then(|s| s.trim().parse::<u64>().ok())
            .ok_or_else(|| InvalidHead(format!("invalid Content-Length {value:?}")))?;
        match declared {
            Some(prev) if prev != n => {
                return Err(InvalidHead("conflicting Content-Length headers".to_string()))
            }
            _ => declared = Some(n),
        }
    }
    Ok(declared)
}

fn has_token(headers: &HeaderMap, name: &HeaderName, token: &str) -> bool {
    headers
        .get_all(name)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .any(|t| t.trim().eq_ignore_ascii_case(token))
}

/// Split raw request bytes after the first `\r\n\r\n`
///
/// Returns `None` when the marker is missing.
pub fn split_header_body(raw: &[u8]) -> Option<(&[u8], &[u8])> {
    raw.windows(HEAD_END.len())
        .position(|w| w == HEAD_END)
        .map(|n| raw.split_at(n + HEAD_END.len()))
}
