use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use super::{FeedCounters, FeedError, parse_record};

/// Follows a growing feed file, returning records from complete lines
/// appended since the previous poll.
#[derive(Debug)]
pub struct FeedTail {
    path: PathBuf,
    offset: u64,
    pending: Vec<u8>,
    line_no: usize,
    skip_malformed: bool,
    counters: FeedCounters,
    deferred: Option<FeedError>,
}

impl FeedTail {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            offset: 0,
            pending: Vec::new(),
            line_no: 0,
            skip_malformed: false,
            counters: FeedCounters::default(),
            deferred: None,
        }
    }

    pub fn skip_malformed(mut self, skip: bool) -> Self {
        self.skip_malformed = skip;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn offset(&self) -> u64 {
        self.offset
    }

    pub fn counters(&self) -> FeedCounters {
        self.counters
    }

    /// Reads whatever was appended since the last call. A trailing line
    /// without its newline is held back until the rest of it arrives.
    ///
    /// A malformed line after good ones in the same batch ends the batch
    /// early: the good records are returned and the error comes from the
    /// next call. Lines after the bad one are delivered by the call after
    /// that.
    pub fn poll(&mut self) -> Result<Vec<Vec<String>>, FeedError> {
        if let Some(err) = self.deferred.take() {
            return Err(err);
        }
        self.read_appended()?;

        let mut records = Vec::new();
        while let Some(pos) = self.pending.iter().position(|byte| *byte == b'\n') {
            let line = self.pending.drain(..=pos).collect::<Vec<_>>();
            self.line_no += 1;
            self.counters.lines += 1;
            match self.parse_line(&line) {
                Ok(Some(tags)) => {
                    self.counters.records += 1;
                    if !tags.is_empty() {
                        self.counters.tagged_records += 1;
                    }
                    records.push(tags);
                }
                Ok(None) => {}
                Err(err) if records.is_empty() => return Err(err),
                Err(err) => {
                    self.deferred = Some(err);
                    break;
                }
            }
        }
        Ok(records)
    }

    fn read_appended(&mut self) -> Result<(), FeedError> {
        let mut file = File::open(&self.path).map_err(|error| self.io_error(error))?;
        let len = file
            .metadata()
            .map_err(|error| self.io_error(error))?
            .len();
        if len < self.offset {
            tracing::warn!(
                path = %self.path.display(),
                previous = self.offset,
                current = len,
                "feed shrank; restarting from the beginning"
            );
            self.offset = 0;
            self.line_no = 0;
            self.pending.clear();
        }
        if len == self.offset {
            return Ok(());
        }

        file.seek(SeekFrom::Start(self.offset))
            .map_err(|error| self.io_error(error))?;
        let read = file
            .take(len - self.offset)
            .read_to_end(&mut self.pending)
            .map_err(|error| self.io_error(error))?;
        self.offset += read as u64;
        Ok(())
    }

    fn parse_line(&mut self, line: &[u8]) -> Result<Option<Vec<String>>, FeedError> {
        let parsed = std::str::from_utf8(line)
            .map_err(|err| err.to_string())
            .and_then(|text| {
                let trimmed = text.trim();
                if trimmed.is_empty() {
                    return Ok(None);
                }
                parse_record(trimmed)
                    .map(Some)
                    .map_err(|err| err.to_string())
            });
        match parsed {
            Ok(tags) => Ok(tags),
            Err(reason) if self.skip_malformed => {
                tracing::warn!(
                    path = %self.path.display(),
                    line = self.line_no,
                    %reason,
                    "skipping malformed record"
                );
                self.counters.skipped_lines += 1;
                Ok(None)
            }
            Err(reason) => Err(FeedError::Malformed {
                source_name: self.path.display().to_string(),
                line: self.line_no,
                reason,
            }),
        }
    }

    fn io_error(&self, error: std::io::Error) -> FeedError {
        FeedError::Io {
            source_name: self.path.display().to_string(),
            error,
        }
    }
}
