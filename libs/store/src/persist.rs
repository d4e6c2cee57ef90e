//! Append-only durability log.
//!
//! Every committed mutation is appended as one JSON line. On open the
//! log is replayed to rebuild the object map and resume the version
//! counter from the last committed value, so a crash between commit and
//! client ack is safe: create/update are re-driveable and the retry
//! either conflicts (already applied) or applies at a newer version.

use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use keel_api::Object;
use serde::{Deserialize, Serialize};

/// What a log record did to its object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) enum LogOp {
    /// Object created or updated; `object` is the post-write state.
    Applied,
    /// Object removed; `object` is the last state.
    Removed,
}

/// One committed mutation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct LogRecord {
    pub resource_version: u64,
    pub op: LogOp,
    pub object: Object,
}

/// The append-only log file.
pub(crate) struct Wal {
    path: PathBuf,
    writer: BufWriter<File>,
}

impl Wal {
    /// Opens the log at `path`, returning the replayed records in
    /// commit order. A missing file is an empty log.
    pub fn open(path: &Path) -> std::io::Result<(Wal, Vec<LogRecord>)> {
        let mut records = Vec::new();

        if path.exists() {
            let reader = BufReader::new(File::open(path)?);
            for line in reader.lines() {
                let line = line?;
                if line.trim().is_empty() {
                    continue;
                }
                let record: LogRecord = serde_json::from_str(&line).map_err(|e| {
                    std::io::Error::new(
                        std::io::ErrorKind::InvalidData,
                        format!("corrupt log record: {e}"),
                    )
                })?;
                records.push(record);
            }
        }

        let file = OpenOptions::new().create(true).append(true).open(path)?;
        let wal = Wal {
            path: path.to_path_buf(),
            writer: BufWriter::new(file),
        };

        Ok((wal, records))
    }

    /// Appends one record and flushes it to the OS.
    pub fn append(&mut self, record: &LogRecord) -> std::io::Result<()> {
        serde_json::to_writer(&mut self.writer, record)?;
        self.writer.write_all(b"\n")?;
        self.writer.flush()
    }

    /// Rewrites the log to exactly `records` (compaction). Writes a
    /// sibling temp file and renames it over the log so a crash leaves
    /// either the old or the new log, never a torn one.
    pub fn rewrite(&mut self, records: impl Iterator<Item = LogRecord>) -> std::io::Result<()> {
        let tmp_path = self.path.with_extension("tmp");
        {
            let mut tmp = BufWriter::new(File::create(&tmp_path)?);
            for record in records {
                serde_json::to_writer(&mut tmp, &record)?;
                tmp.write_all(b"\n")?;
            }
            tmp.flush()?;
        }
        fs::rename(&tmp_path, &self.path)?;

        let file = OpenOptions::new().append(true).open(&self.path)?;
        self.writer = BufWriter::new(file);
        Ok(())
    }
}
