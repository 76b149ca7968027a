//! Append-only JSON-lines journal
//!
//! Incidents and recovery attempts must survive a restart. Each record is one
//! JSON document on its own line, flushed to disk before the in-memory state
//! changes. Replay tolerates a torn final line left by a crash mid-write.

use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::marker::PhantomData;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::error::{GuardError, GuardResult};

/// Typed append-only log stored at a single path
#[derive(Debug)]
pub struct Journal<T> {
    path: PathBuf,
    file: File,
    _record: PhantomData<fn() -> T>,
}

impl<T> Journal<T>
where
    T: Serialize + DeserializeOwned,
{
    /// Open (or create) the journal at `path` and replay what it holds
    pub fn open(path: impl Into<PathBuf>) -> GuardResult<(Self, Vec<T>)> {
        let path = path.into();
        let (records, torn_at) = Self::replay(&path).map_err(journal_error)?;
        let file = open_append(&path).map_err(journal_error)?;
        if let Some(len) = torn_at {
            file.set_len(len)
                .with_context(|| format!("Failed to truncate torn line in {:?}", path))
                .map_err(journal_error)?;
        }

        info!(path = %path.display(), records = records.len(), "Journal opened");
        Ok((
            Self {
                path,
                file,
                _record: PhantomData,
            },
            records,
        ))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one record and sync it to disk
    pub fn append(&mut self, record: &T) -> GuardResult<()> {
        self.write_line(record).map_err(journal_error)
    }

    fn write_line(&mut self, record: &T) -> Result<()> {
        let mut line = serde_json::to_vec(record).context("Failed to serialize journal record")?;
        line.push(b'\n');
        self.file
            .write_all(&line)
            .with_context(|| format!("Failed to append to {:?}", self.path))?;
        self.file
            .sync_data()
            .with_context(|| format!("Failed to sync {:?}", self.path))?;
        Ok(())
    }

    /// Returns the records and, when the final line is torn, the length to
    /// truncate the file to
    fn replay(path: &Path) -> Result<(Vec<T>, Option<u64>)> {
        if !path.exists() {
            return Ok((Vec::new(), None));
        }

        let file =
            File::open(path).with_context(|| format!("Failed to open journal {:?}", path))?;
        let mut reader = BufReader::new(file);
        let mut records = Vec::new();
        let mut offset = 0u64;
        let mut line = String::new();
        let mut line_no = 0usize;

        loop {
            line.clear();
            let read = reader
                .read_line(&mut line)
                .with_context(|| format!("Failed to read journal {:?}", path))?;
            if read == 0 {
                break;
            }
            line_no += 1;
            let complete = line.ends_with('\n');

            if !line.trim().is_empty() {
                match serde_json::from_str(line.trim_end()) {
                    Ok(record) => records.push(record),
                    Err(e) if !complete => {
                        warn!(path = %path.display(), error = %e, "Ignoring torn final journal line");
                        return Ok((records, Some(offset)));
                    }
                    Err(e) => {
                        return Err(e).with_context(|| {
                            format!("Corrupt journal {:?} at line {}", path, line_no)
                        });
                    }
                }
            }
            offset += read as u64;
        }

        debug!(path = %path.display(), records = records.len(), "Journal replayed");
        Ok((records, None))
    }
}

fn open_append(path: &Path) -> Result<File> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory {:?}", parent))?;
        }
    }
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("Failed to open journal {:?} for append", path))
}

fn journal_error(e: anyhow::Error) -> GuardError {
    GuardError::Journal(format!("{:#}", e))
}
