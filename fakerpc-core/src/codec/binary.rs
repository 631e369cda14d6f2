//! Binary log codec: bincode inside gzip
//!
//! Readers are format-agnostic. Anything that is not a gzip stream holding a
//! bincode-encoded [`Log`] is handed to the ngrep decoder instead.

use std::io::{Read, Write};

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;

use super::ngrep;
use crate::error::{FakeRpcError, Result};
use crate::log::Log;

/// Serialize and compress a log at maximum compression
pub fn write<W: Write>(w: W, log: &Log) -> Result<()> {
    let data = to_vec(log)?;
    let mut encoder = GzEncoder::new(w, Compression::best());
    encoder.write_all(&data)?;
    encoder.finish()?.flush()?;
    Ok(())
}

/// Read a log in either binary or ngrep form
pub fn read<R: Read>(mut r: R) -> Result<Log> {
    let mut buf = Vec::new();
    r.read_to_end(&mut buf)?;
    from_slice(&buf)
}

/// Decode a log held in memory, falling back to ngrep text
pub fn from_slice(buf: &[u8]) -> Result<Log> {
    match decode_binary(buf) {
        Ok(log) => Ok(log),
        Err(reason) => {
            tracing::debug!(%reason, "Not a binary log, falling back to ngrep");
            ngrep::from_slice(buf)
        }
    }
}

fn decode_binary(buf: &[u8]) -> std::result::Result<Log, String> {
    let mut decoder = GzDecoder::new(buf);
    let mut data = Vec::new();
    decoder
        .read_to_end(&mut data)
        .map_err(|e| format!("gzip: {e}"))?;
    bincode::deserialize(&data).map_err(|e| format!("bincode: {e}"))
}

fn to_vec(log: &Log) -> Result<Vec<u8>> {
    bincode::serialize(log).map_err(|e| FakeRpcError::Encode {
        reason: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::log::Transmission;
    use std::time::Duration;

    fn sample() -> Log {
        let mut log = Log::new()
            .with_filter("tcp port 80")
            .with_max_interval(Duration::from_millis(250));
        log.push(
            Transmission::new(
                "127.0.0.1:50000".parse().unwrap(),
                "127.0.0.1:8080".parse().unwrap(),
            )
            .with_raw(vec![0u8, 1, 2, b'\r', b'\n', 255])
            .with_start(chrono::Utc::now()),
        );
        log
    }

    #[test]
    fn test_binary_preserves_everything() {
        let log = sample();
        let mut buf = Vec::new();
        write(&mut buf, &log).unwrap();

        assert_eq!(&buf[..2], &[0x1f, 0x8b]);
        assert_eq!(read(buf.as_slice()).unwrap(), log);
    }

    #[test]
    fn test_plain_text_falls_back_to_ngrep() {
        let text = "interface: lo (127.0.0.0/255.0.0.0)\nfilter: x\n\nT 127.0.0.1:1 -> 127.0.0.1:2 [AP]\nHI.\n";
        let log = read(text.as_bytes()).unwrap();
        assert_eq!(log.filter.as_deref(), Some("x"));
        assert_eq!(log.transmissions[0].raw, b"HI\r\n");
    }

    #[test]
    fn test_gzipped_garbage_falls_back_to_ngrep() {
        let mut encoder = GzEncoder::new(Vec::new(), Compression::best());
        encoder.write_all(b"definitely not bincode").unwrap();
        let buf = encoder.finish().unwrap();

        // ngrep sees binary noise without markers and yields an empty log
        let log = read(buf.as_slice()).unwrap();
        assert!(log.is_empty());
    }
}
