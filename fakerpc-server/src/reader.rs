//! Buffered HTTP/1.x request reader
//!
//! Reads request heads off the wire and discards their bodies. Bodies framed
//! by `Content-Length` or chunked transfer coding are supported, and both
//! CRLF and bare LF line endings are accepted.

use std::io;

use bytes::{Buf, BytesMut};
use fakerpc_core::RequestHead;
use tokio::io::{AsyncRead, AsyncReadExt};

/// Largest request head accepted
pub const MAX_HEAD_LEN: usize = 64 * 1024;

/// Largest chunk-size or trailer line accepted
const MAX_LINE_LEN: usize = 8 * 1024;

const READ_CHUNK: usize = 8 * 1024;

/// Reads consecutive requests from one connection
#[derive(Debug)]
pub struct RequestReader<R> {
    inner: R,
    buf: BytesMut,
}

impl<R: AsyncRead + Unpin> RequestReader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            buf: BytesMut::with_capacity(READ_CHUNK),
        }
    }

    /// Read the next request head
    ///
    /// Returns `Ok(None)` on a clean end of stream between requests.
    pub async fn read_head(&mut self) -> io::Result<Option<RequestHead>> {
        loop {
            if !self.buf.is_empty() {
                match RequestHead::parse_partial(&self.buf) {
                    Ok(Some((head, len))) => {
                        self.buf.advance(len);
                        return Ok(Some(head));
                    }
                    Ok(None) if self.buf.len() > MAX_HEAD_LEN => {
                        return Err(invalid("request head too large"));
                    }
                    Ok(None) => {}
                    Err(e) => return Err(io::Error::new(io::ErrorKind::InvalidData, e)),
                }
            }

            if self.fill().await? == 0 {
                return if self.buf.is_empty() {
                    Ok(None)
                } else {
                    Err(io::Error::new(
                        io::ErrorKind::UnexpectedEof,
                        "connection closed inside a request head",
                    ))
                };
            }
        }
    }

    /// Read and discard the body of `head`, returning its length
    pub async fn drain_body(&mut self, head: &RequestHead) -> io::Result<u64> {
        if head.chunked {
            self.drain_chunked().await
        } else {
            let n = head.content_length.unwrap_or(0);
            self.discard(n).await?;
            Ok(n)
        }
    }

    async fn drain_chunked(&mut self) -> io::Result<u64> {
        let mut total = 0u64;
        loop {
            let line = self.read_line().await?;
            let size = line.split(';').next().unwrap_or_default().trim();
            let size = u64::from_str_radix(size, 16)
                .map_err(|_| invalid(format!("invalid chunk size {size:?}")))?;

            if size == 0 {
                // Trailers end with an empty line
                while !self.read_line().await?.is_empty() {}
                return Ok(total);
            }

            self.discard(size).await?;
            total += size;
            if !self.read_line().await?.is_empty() {
                return Err(invalid("missing chunk terminator"));
            }
        }
    }

    async fn discard(&mut self, mut n: u64) -> io::Result<()> {
        while n > 0 {
            if self.buf.is_empty() && self.fill().await? == 0 {
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "connection closed inside a request body",
                ));
            }
            let take = self.buf.len().min(usize::try_from(n).unwrap_or(usize::MAX));
            self.buf.advance(take);
            n -= take as u64;
        }
        Ok(())
    }

    /// Next line without its CRLF or LF terminator
    async fn read_line(&mut self) -> io::Result<String> {
        loop {
            if let Some(pos) = self.buf.iter().position(|&b| b == b'\n') {
                let line = self.buf.split_to(pos + 1);
                let line = line.strip_suffix(b"\n").unwrap_or(&line);
                let line = line.strip_suffix(b"\r").unwrap_or(line);
                return String::from_utf8(line.to_vec()).map_err(|_| invalid("line is not UTF-8"));
            }
            if self.buf.len() > MAX_LINE_LEN {
                return Err(invalid("line too long"));
            }
            if self.fill().await? == 0 {
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "connection closed inside a chunked body",
                ));
            }
        }
    }

    async fn fill(&mut self) -> io::Result<usize> {
        self.buf.reserve(READ_CHUNK);
        self.inner.read_buf(&mut self.buf).await
    }
}

fn invalid(msg: impl Into<String>) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, msg.into())
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn drain_all(input: &'static [u8]) -> io::Result<Vec<(String, u64)>> {
        let mut reader = RequestReader::new(input);
        let mut out = Vec::new();
        while let Some(head) = reader.read_head().await? {
            let n = reader.drain_body(&head).await?;
            out.push((head.path().to_string(), n));
        }
        Ok(out)
    }

    #[tokio::test]
    async fn test_pipelined_requests() {
        let got = drain_all(
            b"POST /a HTTP/1.1\r\nContent-Length: 3\r\n\r\nabc\
              GET /b HTTP/1.1\r\n\r\n\
              POST /c HTTP/1.1\nContent-Length: 1\n\nz",
        )
        .await
        .unwrap();
        assert_eq!(
            got,
            vec![("/a".to_string(), 3), ("/b".to_string(), 0), ("/c".to_string(), 1)]
        );
    }

    #[tokio::test]
    async fn test_chunked_body() {
        let got = drain_all(
            b"POST /x HTTP/1.1\r\nTransfer-Encoding: chunked\r\n\r\n\
              4\r\nWiki\r\n5;ext=1\r\npedia\r\n0\r\nX-Trailer: y\r\n\r\n\
              POST /y HTTP/1.1\nTransfer-Encoding: chunked\n\n1\nA\n0\n\n",
        )
        .await
        .unwrap();
        assert_eq!(got, vec![("/x".to_string(), 9), ("/y".to_string(), 1)]);
    }

    #[tokio::test]
    async fn test_truncated_body_is_unexpected_eof() {
        let err = drain_all(b"POST / HTTP/1.1\r\nContent-Length: 10\r\n\r\nabc")
            .await
            .unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);

        let err = drain_all(b"GET / HTTP/1.1\r\nHost").await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
    }

    #[tokio::test]
    async fn test_malformed_head_is_invalid_data() {
        let err = drain_all(b"HTTP/1.1 200 OK\r\n\r\n").await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }
}
