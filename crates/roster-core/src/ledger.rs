//! Append-only attendance ledger (CSV) with per-run deduplication.

use crate::types::{Identity, TIMESTAMP_FORMAT};
use chrono::NaiveDateTime;
use std::collections::HashSet;
use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Header row of the ledger file.
pub const LEDGER_HEADER: [&str; 2] = ["Name", "Timestamp"];

#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("cannot read ledger {}: {source}", .path.display())]
    Read { path: PathBuf, source: io::Error },
    #[error("malformed ledger {} at line {line}: {reason}", .path.display())]
    Malformed {
        path: PathBuf,
        line: u64,
        reason: String,
    },
    #[error("cannot append to ledger {}: {source}", .path.display())]
    Write { path: PathBuf, source: io::Error },
    #[error("cannot write leaderboard {}: {source}", .path.display())]
    Snapshot { path: PathBuf, source: io::Error },
}

/// Attendance ledger for one run.
///
/// The seen-set only lives for this process; history from earlier runs
/// stays in the file and is never consulted for deduplication.
#[derive(Debug)]
pub struct Ledger {
    path: PathBuf,
    recorded: HashSet<Identity>,
    created: bool,
}

impl Ledger {
    /// Open the ledger at `path`, creating it with just the header row if it
    /// is missing or empty. Existing history is left untouched.
    pub fn initialize(path: impl Into<PathBuf>) -> Result<Self, LedgerError> {
        let path = path.into();

        let needs_header = match std::fs::metadata(&path) {
            Ok(meta) => meta.len() == 0,
            Err(e) if e.kind() == io::ErrorKind::NotFound => true,
            Err(source) => return Err(LedgerError::Read { path, source }),
        };

        if needs_header {
            write_header(&path).map_err(|source| LedgerError::Write {
                path: path.clone(),
                source,
            })?;
            tracing::info!(path = %path.display(), "created attendance ledger");
        }

        Ok(Self {
            path,
            recorded: HashSet::new(),
            created: needs_header,
        })
    }

    /// Append `(identity, timestamp)` unless `identity` was already recorded
    /// in this run.
    ///
    /// Returns `Ok(false)` without touching the file for a repeat sighting.
    /// The identity is only marked as recorded once the row is flushed and
    /// synced, so a failed append is retried on the next sighting.
    pub fn record_if_new(
        &mut self,
        identity: &Identity,
        timestamp: NaiveDateTime,
    ) -> Result<bool, LedgerError> {
        if self.recorded.contains(identity) {
            return Ok(false);
        }

        self.append(identity, timestamp)
            .map_err(|source| LedgerError::Write {
                path: self.path.clone(),
                source,
            })?;

        self.recorded.insert(identity.clone());
        Ok(true)
    }

    fn append(&self, identity: &Identity, timestamp: NaiveDateTime) -> io::Result<()> {
        let mut file = OpenOptions::new().read(true).append(true).open(&self.path)?;
        terminate_last_line(&mut file)?;
        let mut writer = csv::WriterBuilder::new()
            .has_headers(false)
            .from_writer(file);

        let stamp = timestamp.format(TIMESTAMP_FORMAT).to_string();
        writer.write_record([identity.as_str(), stamp.as_str()])?;

        let file = writer.into_inner().map_err(|e| e.into_error())?;
        file.sync_data()
    }

    pub fn has_recorded(&self, identity: &Identity) -> bool {
        self.recorded.contains(identity)
    }

    /// Number of identities recorded in this run.
    pub fn recorded_count(&self) -> usize {
        self.recorded.len()
    }

    /// True if `initialize` had to create the file (no prior history).
    pub fn was_created(&self) -> bool {
        self.created
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// A hand-edited ledger may lack a final newline; without one the next row
/// would be glued onto the last record.
fn terminate_last_line(file: &mut File) -> io::Result<()> {
    let len = file.metadata()?.len();
    if len == 0 {
        return Ok(());
    }
    file.seek(SeekFrom::Start(len - 1))?;
    let mut last = [0u8; 1];
    file.read_exact(&mut last)?;
    if !matches!(last[0], b'\n' | b'\r') {
        file.write_all(b"\n")?;
    }
    Ok(())
}

fn write_header(path: &Path) -> io::Result<()> {
    let mut writer = csv::Writer::from_writer(File::create(path)?);
    writer.write_record(LEDGER_HEADER)?;
    let file = writer.into_inner().map_err(|e| e.into_error())?;
    file.sync_all()
}
