//! Log persistence
//!
//! Two formats share one loader:
//!
//! - [`binary`]: gzip-compressed bincode, always produced by writers
//! - [`ngrep`]: line-oriented text, for humans and hand-written fixtures
//!
//! [`read_log`] accepts either; [`write_log`] always writes the binary form.

pub mod binary;
pub mod ngrep;

use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;

use crate::error::Result;
use crate::log::Log;

/// Load a log file in binary or ngrep form
pub fn read_log(path: impl AsRef<Path>) -> Result<Log> {
    let path = path.as_ref();
    let log = binary::read(BufReader::new(File::open(path)?))?;
    tracing::debug!(path = %path.display(), transmissions = log.len(), "Loaded log");
    Ok(log)
}

/// Write a log file in binary form, truncating any existing file
pub fn write_log(path: impl AsRef<Path>, log: &Log) -> Result<()> {
    let path = path.as_ref();
    binary::write(BufWriter::new(File::create(path)?), log)?;
    tracing::debug!(path = %path.display(), transmissions = log.len(), "Wrote log");
    Ok(())
}
