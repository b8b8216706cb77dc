//! Streaming reader for gzip-compressed CirrusSearch dumps.
//!
//! The dump is newline-delimited JSON in bulk-API form: odd lines
//! (1st, 3rd, ...) are index-action directives and are skipped, even lines
//! carry the document. Pairing is by line position only, never by content.
//!
//! [`stream`] opens the file and returns a lazy, single-pass
//! [`DumpRecords`] iterator. The decompressed content is never held in
//! memory as a whole; a second pass means calling [`stream`] again.

use flate2::read::MultiGzDecoder;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;
use tracing::warn;

use crate::error::DumpError;
use crate::models::RawRecord;

const READ_BUFFER_BYTES: usize = 1024 * 1024;

/// Gzip-backed reader type produced by [`stream`].
pub type GzLines = BufReader<MultiGzDecoder<File>>;

/// Open a gzip dump and stream its payload records.
///
/// `limit` bounds the number of successfully parsed records; `None` drains
/// the file. Fails with [`DumpError::SourceNotFound`] before any read when
/// the path is not a readable file.
pub fn stream(path: &Path, limit: Option<usize>) -> Result<DumpRecords<GzLines>, DumpError> {
    let not_found = || DumpError::SourceNotFound {
        path: path.to_path_buf(),
    };

    if !path.is_file() {
        return Err(not_found());
    }
    let file = File::open(path).map_err(|_| not_found())?;

    let reader = BufReader::with_capacity(READ_BUFFER_BYTES, MultiGzDecoder::new(file));
    Ok(DumpRecords::from_reader(reader, limit))
}

/// Lazy iterator over the payload records of a dump.
///
/// Yields `Ok(record)` per parsed payload line. Lines that fail to parse
/// are logged and counted in [`skipped`](DumpRecords::skipped) without
/// counting toward the limit. A read or decompression failure yields one
/// `Err` and ends the sequence.
pub struct DumpRecords<R> {
    reader: R,
    limit: Option<usize>,
    line_no: u64,
    yielded: usize,
    skipped: u64,
    done: bool,
    buf: Vec<u8>,
}

impl<R: BufRead> DumpRecords<R> {
    /// Wrap an already-decompressed line source.
    pub fn from_reader(reader: R, limit: Option<usize>) -> Self {
        Self {
            reader,
            limit,
            line_no: 0,
            yielded: 0,
            skipped: 0,
            done: false,
            buf: Vec::new(),
        }
    }

    /// Payload lines skipped because they did not parse.
    pub fn skipped(&self) -> u64 {
        self.skipped
    }

    /// Physical lines consumed so far.
    pub fn lines_read(&self) -> u64 {
        self.line_no
    }

    fn limit_reached(&self) -> bool {
        self.limit.is_some_and(|limit| self.yielded >= limit)
    }
}

impl<R: BufRead> Iterator for DumpRecords<R> {
    type Item = Result<RawRecord, DumpError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if self.done || self.limit_reached() {
                return None;
            }

            self.buf.clear();
            match self.reader.read_until(b'\n', &mut self.buf) {
                Ok(0) => {
                    self.done = true;
                    return None;
                }
                Ok(_) => self.line_no += 1,
                Err(source) => {
                    self.done = true;
                    return Some(Err(DumpError::Read {
                        line: self.line_no + 1,
                        source,
                    }));
                }
            }

            // Action directive.
            if self.line_no % 2 == 1 {
                continue;
            }

            match serde_json::from_slice::<RawRecord>(&self.buf) {
                Ok(record) => {
                    self.yielded += 1;
                    return Some(Ok(record));
                }
                Err(source) => {
                    self.skipped += 1;
                    let err = DumpError::RecordParse {
                        line: self.line_no,
                        source,
                    };
                    warn!("skipping payload: {}", err);
                }
            }
        }
    }
}
