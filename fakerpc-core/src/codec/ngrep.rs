//! Ngrep text codec
//!
//! A line-oriented dump compatible with `ngrep -xX`-style output:
//!
//! ```text
//! interface: tun0 (192.168.14.0/255.255.255.0)
//! filter: (ip or ipv6) and ( host 192.168.16.50 and port 80 )
//!
//! T 192.168.14.108:46793 -> 192.168.16.50:80 [AP]
//! POST / HTTP/1.1.
//! .
//!
//! T 192.168.16.50:80 -> 192.168.14.108:46793 [AP]
//! HTTP/1.1 200 OK.
//! ```
//!
//! A `.` right before a newline stands for `\r`. The decoder is a three
//! state machine (header, marker, raw); end of input in any state is a
//! successful end of parse.

use std::io::{BufRead, BufReader, Read, Write};
use std::net::IpAddr;
use std::sync::LazyLock;

use chrono::{DateTime, NaiveDateTime, Utc};
use regex::Regex;

use crate::addr::parse_endpoint;
use crate::error::{FakeRpcError, Result};
use crate::log::{Log, Network, Transmission};

/// Interface name written when the log does not carry one
pub const DEFAULT_INTERFACE: &str = "fakerpc0";

const TIMESTAMP_FORMAT: &str = "%Y/%m/%d %H:%M:%S%.6f";

static INTERFACE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^interface: (\S+) \(([\[\]\.:\w]+)/([\[\]\.:\w]+)\)").expect("interface regex")
});

static FILTER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^filter: (.*)$").expect("filter regex"));

static MARKER_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^T (?:(\d{4}/\d{2}/\d{2} \d{2}:\d{2}:\d{2}\.\d{6}) )?([\[\]\.:\w]+) -> ([\[\]\.:\w]+)",
    )
    .expect("marker regex")
});

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Header,
    Marker,
    Raw,
}

/// Decode ngrep text into a log
pub fn decode<R: Read>(reader: R) -> Result<Log> {
    let mut reader = BufReader::new(reader);
    let mut log = Log::new();
    let mut state = State::Header;
    let mut line = Vec::new();

    loop {
        line.clear();
        if reader.read_until(b'\n', &mut line)? == 0 {
            return Ok(log);
        }
        let blank = line == b"\n";

        match state {
            State::Raw => {
                if blank {
                    state = State::Marker;
                    continue;
                }
                let n = line.len();
                if n >= 2 && line[n - 1] == b'\n' && line[n - 2] == b'.' {
                    line[n - 2] = b'\r';
                }
                if let Some(t) = log.transmissions.last_mut() {
                    t.raw.extend_from_slice(&line);
                }
            }
            State::Marker => {
                if let Some(t) = parse_marker(&line)? {
                    log.push(t);
                    state = State::Raw;
                }
            }
            State::Header => {
                if blank {
                    state = State::Marker;
                    continue;
                }
                if let Some(t) = parse_marker(&line)? {
                    log.push(t);
                    state = State::Raw;
                    continue;
                }
                parse_header_line(&line, &mut log)?;
            }
        }
    }
}

/// Decode ngrep text held in memory
pub fn from_slice(input: &[u8]) -> Result<Log> {
    decode(input)
}

/// Decode ngrep text from a string
pub fn from_str(input: &str) -> Result<Log> {
    decode(input.as_bytes())
}

fn parse_header_line(line: &[u8], log: &mut Log) -> Result<()> {
    let text = String::from_utf8_lossy(line);
    let text = text.trim_end_matches(['\r', '\n']);

    if let Some(m) = INTERFACE_RE.captures(text) {
        let ip = parse_net_ip(&m[2])?;
        let mask = parse_net_ip(&m[3])?;
        log.interface = Some(m[1].to_string());
        log.network = Some(Network::new(ip, mask));
    } else if let Some(m) = FILTER_RE.captures(text) {
        log.filter = Some(m[1].to_string());
    }
    Ok(())
}

fn parse_net_ip(value: &str) -> Result<IpAddr> {
    value
        .trim_start_matches('[')
        .trim_end_matches(']')
        .parse()
        .map_err(|e: std::net::AddrParseError| FakeRpcError::MalformedNetwork {
            value: value.to_string(),
            reason: e.to_string(),
        })
}

fn parse_marker(line: &[u8]) -> Result<Option<Transmission>> {
    let text = String::from_utf8_lossy(line);
    let Some(m) = MARKER_RE.captures(&text) else {
        return Ok(None);
    };

    let src = parse_endpoint(&m[2])?;
    let dst = parse_endpoint(&m[3])?;
    let mut t = Transmission::new(src, dst);
    if let Some(ts) = m.get(1) {
        t.start = Some(parse_timestamp(ts.as_str())?);
    }
    Ok(Some(t))
}

fn parse_timestamp(s: &str) -> Result<DateTime<Utc>> {
    NaiveDateTime::parse_from_str(s, TIMESTAMP_FORMAT)
        .map(|naive| naive.and_utc())
        .map_err(|e| FakeRpcError::Decode {
            reason: format!("invalid timestamp '{s}': {e}"),
        })
}

/// Encode a log as ngrep text
pub fn encode<W: Write>(mut w: W, log: &Log) -> Result<()> {
    writeln!(
        w,
        "interface: {} ({}/{})",
        log.interface.as_deref().unwrap_or(DEFAULT_INTERFACE),
        log.net_ip(),
        log.net_mask()
    )?;
    writeln!(w, "filter: {}", log.net_filter())?;

    for t in &log.transmissions {
        match t.start {
            Some(start) => writeln!(
                w,
                "\nT {} {} -> {} [AP]",
                start.format(TIMESTAMP_FORMAT),
                t.src,
                t.dst
            )?,
            None => writeln!(w, "\nT {} -> {} [AP]", t.src, t.dst)?,
        }

        for chunk in t.raw.split_inclusive(|&b| b == b'\n') {
            match chunk {
                [body @ .., b'\r', b'\n'] => {
                    w.write_all(body)?;
                    w.write_all(b".\n")?;
                }
                [.., b'\n'] => w.write_all(chunk)?,
                _ => {
                    w.write_all(chunk)?;
                    w.write_all(b"\n")?;
                }
            }
        }
    }
    w.flush()?;
    Ok(())
}

/// Encode a log into a byte buffer
pub fn to_vec(log: &Log) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    encode(&mut buf, log)?;
    Ok(buf)
}

/// Encode a log into a string
///
/// Fails with [`FakeRpcError::Encode`] if a payload is not valid UTF-8.
pub fn to_string(log: &Log) -> Result<String> {
    String::from_utf8(to_vec(log)?).map_err(|e| FakeRpcError::Encode {
        reason: e.to_string(),
    })
}
