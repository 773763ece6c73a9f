//! Persisted block-completion state.
//!
//! A [`CompletionLedger`] remembers which blocks of a payload passed
//! verification, plus a modification-time fingerprint for every file the
//! payload writes to. On restart the ledger is read back so a partially
//! downloaded payload resumes instead of starting over; if any tracked file
//! changed behind our back, every block is treated as unverified again.
//!
//! The on-disk format is described in [`record`].
//!
//! # Examples
//!
//! ```no_run
//! use rbit_store::ledger::CompletionLedger;
//! use std::path::Path;
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let mut ledger = CompletionLedger::new();
//! ledger.init(64, Path::new("./state"), "payload")?;
//!
//! ledger.set_block_as_done(3);
//! ledger.write_meta_file(true)?;
//! # Ok(())
//! # }
//! ```

mod bitmap;
mod error;
pub mod record;

pub use bitmap::CompletionBitmap;
pub use error::LedgerError;

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use parking_lot::Mutex;

use crate::constants::{LEDGER_EXTENSION, LEDGER_WRITE_INTERVAL};
use record::{Record, RecordReader};

/// A ledger shared between a payload's storage and its owner.
pub type SharedLedger = Arc<Mutex<CompletionLedger>>;

/// Stored fingerprint of one payload file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileFingerprint {
    pub filename: String,
    /// Modification time in whole seconds since the Unix epoch.
    pub last_modified: u32,
    pub length: u64,
}

/// Outcome of [`CompletionLedger::has_file_changed`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileStatus {
    /// The ledger holds no fingerprint for the file.
    Untracked,
    Unchanged,
    /// Modification time differs; all blocks were cleared.
    Changed,
    /// The file is gone; all blocks were cleared.
    Missing,
}

#[derive(Debug)]
pub struct CompletionLedger {
    blocks: CompletionBitmap,
    files: Vec<FileFingerprint>,
    path: Option<PathBuf>,
    changed: bool,
    last_write: Option<Instant>,
    write_interval: Duration,
}

impl CompletionLedger {
    pub fn new() -> Self {
        Self {
            blocks: CompletionBitmap::new(0),
            files: Vec::new(),
            path: None,
            changed: false,
            last_write: None,
            write_interval: LEDGER_WRITE_INTERVAL,
        }
    }

    /// Overrides the minimum spacing between unforced writes.
    pub fn with_write_interval(mut self, interval: Duration) -> Self {
        self.write_interval = interval;
        self
    }

    /// Wraps the ledger for sharing.
    pub fn shared(self) -> SharedLedger {
        Arc::new(Mutex::new(self))
    }

    /// Resets the ledger to `block_count` unfinished blocks stored at
    /// `directory/name.dat`, then loads that file if it exists.
    ///
    /// A missing file is not an error. A corrupt file is logged and
    /// ignored, leaving the ledger empty.
    pub fn init(
        &mut self,
        block_count: u32,
        directory: &Path,
        name: &str,
    ) -> Result<(), LedgerError> {
        self.blocks = CompletionBitmap::new(block_count as usize);
        self.files.clear();
        self.changed = false;
        self.path = Some(directory.join(format!("{name}.{LEDGER_EXTENSION}")));
        self.last_write = Some(Instant::now());

        match self.read_meta_file() {
            Ok(()) => {
                tracing::debug!(
                    done = self.blocks.count(),
                    blocks = block_count,
                    files = self.files.len(),
                    "ledger loaded"
                );
                Ok(())
            }
            Err(LedgerError::NotFound(_)) => Ok(()),
            Err(LedgerError::Corruption(reason)) => {
                tracing::warn!(%reason, "ignoring corrupt ledger");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    /// Location of the ledger file, once initialised.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn set_block_as_done(&mut self, block: u32) {
        if self.blocks.set(block as usize) {
            self.changed = true;
        } else {
            tracing::trace!(block, "ignoring out-of-range block");
        }
    }

    pub fn set_block_as_dirty(&mut self, block: u32) {
        if self.blocks.clear(block as usize) {
            self.changed = true;
        } else {
            tracing::trace!(block, "ignoring out-of-range block");
        }
    }

    pub fn is_block_done(&self, block: u32) -> bool {
        self.blocks.is_done(block as usize)
    }

    pub fn done_count(&self) -> usize {
        self.blocks.count()
    }

    pub fn block_count(&self) -> u32 {
        self.blocks.len() as u32
    }

    pub fn blocks(&self) -> &CompletionBitmap {
        &self.blocks
    }

    /// Marks every block unfinished.
    pub fn clear_blocks(&mut self) {
        if self.blocks.count() > 0 {
            self.changed = true;
        }
        self.blocks.clear_all();
    }

    /// True if there are changes not yet written.
    pub fn is_changed(&self) -> bool {
        self.changed
    }

    pub fn files(&self) -> &[FileFingerprint] {
        &self.files
    }

    pub fn file_fingerprint(&self, path: &Path) -> Option<&FileFingerprint> {
        let name = path.to_string_lossy();
        self.files
            .iter()
            .find(|f| f.filename.eq_ignore_ascii_case(&name))
    }

    fn file_fingerprint_mut(&mut self, path: &Path) -> Option<&mut FileFingerprint> {
        let name = path.to_string_lossy();
        self.files
            .iter_mut()
            .find(|f| f.filename.eq_ignore_ascii_case(&name))
    }

    /// Writes the ledger to disk.
    ///
    /// Unless `force` is set, nothing is written when there are no changes
    /// or the last write was less than the write interval ago. The file is
    /// written next to its final location and renamed into place. Returns
    /// whether a write happened.
    pub fn write_meta_file(&mut self, force: bool) -> Result<bool, LedgerError> {
        let path = self.path.clone().ok_or(LedgerError::Uninitialized)?;

        if !force {
            if !self.changed {
                return Ok(false);
            }
            if self
                .last_write
                .is_some_and(|last| last.elapsed() < self.write_interval)
            {
                return Ok(false);
            }
        }
        self.last_write = Some(Instant::now());

        let records: Vec<Record> = self
            .files
            .iter()
            .map(|f| Record::File {
                filename: f.filename.clone(),
                last_modified: f.last_modified,
                length: f.length,
            })
            .chain(self.blocks.done_blocks().map(|block| Record::Block {
                number: block as u32,
                status: 1,
            }))
            .collect();
        let data = record::encode(&records);

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let temp = path.with_extension(format!("{LEDGER_EXTENSION}.tmp"));
        fs::write(&temp, &data)?;
        fs::rename(&temp, &path)?;

        self.changed = false;
        tracing::trace!(path = %path.display(), bytes = data.len(), "ledger written");
        Ok(true)
    }

    /// Replaces the in-memory state with the ledger file's contents.
    ///
    /// The file is parsed completely before anything is applied, so any
    /// parse failure leaves the ledger untouched.
    pub fn read_meta_file(&mut self) -> Result<(), LedgerError> {
        let path = self.path.as_ref().ok_or(LedgerError::Uninitialized)?;

        let data = match fs::read(path) {
            Ok(data) => data,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(LedgerError::NotFound(path.display().to_string()));
            }
            Err(e) => return Err(e.into()),
        };

        let mut blocks = CompletionBitmap::new(self.blocks.len());
        let mut files: Vec<FileFingerprint> = Vec::new();
        let mut reader = RecordReader::new(&data)?;

        while let Some(record) = reader.next_record()? {
            match record {
                Record::File {
                    filename,
                    last_modified,
                    length,
                } => {
                    if filename.is_empty() {
                        continue;
                    }
                    match files
                        .iter_mut()
                        .find(|f| f.filename.eq_ignore_ascii_case(&filename))
                    {
                        Some(existing) => {
                            existing.last_modified = last_modified;
                            existing.length = length;
                        }
                        None => files.push(FileFingerprint {
                            filename,
                            last_modified,
                            length,
                        }),
                    }
                }
                Record::Block { number, status } => {
                    if status != 0 {
                        blocks.set(number as usize);
                    }
                }
            }
        }

        self.blocks = blocks;
        self.files = files;
        self.changed = false;
        Ok(())
    }

    /// Removes the ledger file. A file that does not exist is not an error.
    pub fn delete_meta_file(&mut self) -> Result<(), LedgerError> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        match fs::remove_file(path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Compares a file's modification time with its stored fingerprint.
    ///
    /// A tracked file that changed or disappeared invalidates the whole
    /// ledger: every block is cleared, not just the ones in that file.
    pub fn has_file_changed(&mut self, path: &Path) -> Result<FileStatus, LedgerError> {
        let Some(stored) = self.file_fingerprint(path).map(|f| f.last_modified) else {
            return Ok(FileStatus::Untracked);
        };

        let modified = match fs::metadata(path) {
            Ok(meta) => unix_secs(meta.modified()?),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "tracked file missing, clearing ledger");
                self.clear_blocks();
                return Ok(FileStatus::Missing);
            }
            Err(e) => return Err(e.into()),
        };

        if modified != stored {
            tracing::debug!(
                path = %path.display(),
                stored,
                modified,
                "tracked file changed, clearing ledger"
            );
            self.clear_blocks();
            return Ok(FileStatus::Changed);
        }
        Ok(FileStatus::Unchanged)
    }

    /// Records a file's new modification time.
    ///
    /// The first time a file is seen every block is cleared, since nothing
    /// in the ledger can vouch for data written before it was tracked.
    pub fn update_file_data(&mut self, path: &Path, last_modified: u32, length: u64) {
        if let Some(existing) = self.file_fingerprint_mut(path) {
            if existing.last_modified != last_modified || existing.length != length {
                existing.last_modified = last_modified;
                existing.length = length;
                self.changed = true;
            }
            return;
        }

        self.clear_blocks();
        self.files.push(FileFingerprint {
            filename: path.to_string_lossy().into_owned(),
            last_modified,
            length,
        });
        self.changed = true;
    }
}

impl Default for CompletionLedger {
    fn default() -> Self {
        Self::new()
    }
}

/// Whole seconds since the Unix epoch, truncated to the ledger's 32 bits.
pub fn unix_secs(time: SystemTime) -> u32 {
    time.duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as u32)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests;
