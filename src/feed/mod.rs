pub mod tail;

use std::fmt::Write as _;
use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::path::Path;

use serde::Serialize;
use serde_json::Value;
use sha2::{Digest, Sha256};
use thiserror::Error;

pub use tail::FeedTail;

const STREAM_SOURCE: &str = "<stream>";
const ZSTD_EXTENSION: &str = "zst";

#[derive(Debug, Error)]
pub enum FeedError {
    #[error("failed to read {source_name}: {error}")]
    Io {
        source_name: String,
        #[source]
        error: io::Error,
    },
    #[error("{source_name}:{line}: malformed record: {reason}")]
    Malformed {
        source_name: String,
        line: usize,
        reason: String,
    },
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct FeedCounters {
    pub lines: usize,
    pub records: usize,
    pub tagged_records: usize,
    pub skipped_lines: usize,
}

/// Lazily yields the hashtag list of every record in a line-delimited JSON
/// feed. One line is held in memory at a time.
pub struct FeedReader<R> {
    reader: R,
    source_name: String,
    buf: Vec<u8>,
    line_no: usize,
    skip_malformed: bool,
    hasher: Sha256,
    counters: FeedCounters,
    done: bool,
}

impl<R: BufRead> FeedReader<R> {
    pub fn new(reader: R) -> Self {
        Self::named(reader, STREAM_SOURCE)
    }

    pub fn named(reader: R, source_name: impl Into<String>) -> Self {
        Self {
            reader,
            source_name: source_name.into(),
            buf: Vec::new(),
            line_no: 0,
            skip_malformed: false,
            hasher: Sha256::new(),
            counters: FeedCounters::default(),
            done: false,
        }
    }

    pub fn skip_malformed(mut self, skip: bool) -> Self {
        self.skip_malformed = skip;
        self
    }

    pub fn source_name(&self) -> &str {
        &self.source_name
    }

    pub fn counters(&self) -> FeedCounters {
        self.counters
    }

    /// SHA-256 over the decoded bytes consumed so far.
    pub fn sha256_hex(&self) -> String {
        hex_digest(self.hasher.clone().finalize().as_slice())
    }

    fn malformed(&self, reason: String) -> FeedError {
        FeedError::Malformed {
            source_name: self.source_name.clone(),
            line: self.line_no,
            reason,
        }
    }
}

impl<R: BufRead> Iterator for FeedReader<R> {
    type Item = Result<Vec<String>, FeedError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        loop {
            self.buf.clear();
            match self.reader.read_until(b'\n', &mut self.buf) {
                Ok(0) => {
                    self.done = true;
                    return None;
                }
                Ok(_) => {}
                Err(error) => {
                    self.done = true;
                    return Some(Err(FeedError::Io {
                        source_name: self.source_name.clone(),
                        error,
                    }));
                }
            }
            self.hasher.update(&self.buf);
            self.line_no += 1;
            self.counters.lines += 1;

            let parsed = std::str::from_utf8(&self.buf)
                .map_err(|err| err.to_string())
                .and_then(|text| {
                    let trimmed = text.trim();
                    if trimmed.is_empty() {
                        Ok(None)
                    } else {
                        parse_record(trimmed)
                            .map(Some)
                            .map_err(|err| err.to_string())
                    }
                });

            match parsed {
                Ok(None) => continue,
                Ok(Some(tags)) => {
                    self.counters.records += 1;
                    if !tags.is_empty() {
                        self.counters.tagged_records += 1;
                    }
                    return Some(Ok(tags));
                }
                Err(reason) if self.skip_malformed => {
                    tracing::warn!(
                        source = %self.source_name,
                        line = self.line_no,
                        %reason,
                        "skipping malformed record"
                    );
                    self.counters.skipped_lines += 1;
                }
                Err(reason) => {
                    self.done = true;
                    return Some(Err(self.malformed(reason)));
                }
            }
        }
    }
}

/// Opens a feed file, decoding `.zst` files as a zstd stream.
pub fn open_feed(path: &Path) -> Result<FeedReader<Box<dyn BufRead>>, FeedError> {
    let source_name = path.display().to_string();
    let io_err = |error| FeedError::Io {
        source_name: source_name.clone(),
        error,
    };
    let file = File::open(path).map_err(io_err)?;
    let reader: Box<dyn BufRead> = if is_zstd(path) {
        let decoder = zstd::stream::read::Decoder::new(file).map_err(io_err)?;
        Box::new(BufReader::new(decoder))
    } else {
        Box::new(BufReader::new(file))
    };
    Ok(FeedReader::named(reader, source_name))
}

fn is_zstd(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case(ZSTD_EXTENSION))
}

/// Parses one feed line. Records without hashtag entities yield an empty list.
pub fn parse_record(line: &str) -> Result<Vec<String>, serde_json::Error> {
    let value: Value = serde_json::from_str(line)?;
    Ok(extract_hashtags(&value))
}

pub fn extract_hashtags(record: &Value) -> Vec<String> {
    record
        .get("entities")
        .and_then(|entities| entities.get("hashtags"))
        .and_then(Value::as_array)
        .map(|hashtags| {
            hashtags
                .iter()
                .filter_map(|tag| tag.get("text").and_then(Value::as_str))
                .map(ToOwned::to_owned)
                .collect()
        })
        .unwrap_or_default()
}

fn hex_digest(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 2);
    for byte in bytes {
        let _ = write!(&mut out, "{byte:02x}");
    }
    out
}
