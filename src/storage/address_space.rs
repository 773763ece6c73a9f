use std::path::PathBuf;
use std::sync::Arc;

use sha1::{Digest, Sha1};
use sha2::Sha256;

use super::error::StorageError;
use super::file::SegmentInfo;
use super::registry::{OpenRequest, PayloadHandle, PayloadRegistry};
use crate::constants::DEFAULT_BLOCK_SIZE;
use crate::fragment::{Fragment, FragmentSet};
use crate::ledger::SharedLedger;

/// Digest used to check a block, chosen by the length of the expected hash.
enum BlockHasher {
    Sha1(Sha1),
    Sha256(Sha256),
}

impl BlockHasher {
    fn for_digest(expected: &[u8]) -> Option<Self> {
        match expected.len() {
            20 => Some(BlockHasher::Sha1(Sha1::new())),
            32 => Some(BlockHasher::Sha256(Sha256::new())),
            _ => None,
        }
    }

    fn update(&mut self, data: &[u8]) {
        match self {
            BlockHasher::Sha1(h) => h.update(data),
            BlockHasher::Sha256(h) => h.update(data),
        }
    }

    fn finalize(self) -> Vec<u8> {
        match self {
            BlockHasher::Sha1(h) => h.finalize().to_vec(),
            BlockHasher::Sha256(h) => h.finalize().to_vec(),
        }
    }
}

/// One payload's logical byte range and the bytes of it still missing.
///
/// Writes only land where bytes are missing, and a range stops being
/// missing only once all of it was written. Reads refuse any range that is
/// still partly missing.
pub struct PayloadAddressSpace {
    registry: Arc<PayloadRegistry>,
    directory: PathBuf,
    handle: Option<PayloadHandle>,
    write: bool,
    missing: FragmentSet,
    total: u64,
    unflushed: u64,
    block_size: u64,
}

impl PayloadAddressSpace {
    pub fn new(registry: Arc<PayloadRegistry>, directory: impl Into<PathBuf>) -> Self {
        Self {
            registry,
            directory: directory.into(),
            handle: None,
            write: false,
            missing: FragmentSet::new(),
            total: 0,
            unflushed: 0,
            block_size: DEFAULT_BLOCK_SIZE,
        }
    }

    pub fn is_open(&self) -> bool {
        self.handle.is_some()
    }

    pub fn handle(&self) -> Option<&PayloadHandle> {
        self.handle.as_ref()
    }

    /// Logical size of the payload.
    pub fn total(&self) -> u64 {
        self.total
    }

    /// Bytes still missing.
    pub fn remaining(&self) -> u64 {
        self.missing.total_length()
    }

    pub fn missing(&self) -> &FragmentSet {
        &self.missing
    }

    /// Creates every segment file and marks the whole payload missing.
    ///
    /// `block_size` tags cache entries and sizes the blocks checked by
    /// [`verify_block`](Self::verify_block).
    pub fn create_all(
        &mut self,
        identity: &str,
        total: u64,
        segments: Vec<SegmentInfo>,
        ledger: Option<SharedLedger>,
        block_size: u64,
    ) -> Result<(), StorageError> {
        if self.handle.is_some() {
            return Err(StorageError::AlreadyOpen);
        }
        if total == 0 {
            return Err(StorageError::InvalidArgument("payload length is zero"));
        }
        if block_size == 0 {
            return Err(StorageError::InvalidArgument("block size is zero"));
        }
        self.block_size = block_size;

        let missing = FragmentSet::from_range(0, total)?;
        let request = self.request(identity, segments, ledger).with_create(true);
        self.handle = Some(self.registry.open(request)?);
        self.write = true;
        self.missing = missing;
        self.total = total;
        self.unflushed = 0;
        tracing::debug!(identity, total, "payload created");
        Ok(())
    }

    /// Opens existing segment files.
    ///
    /// The missing set is left as it is; callers resuming a download restore
    /// it with [`set_empty_fragments`](Self::set_empty_fragments).
    pub fn open(
        &mut self,
        identity: &str,
        total: u64,
        segments: Vec<SegmentInfo>,
        ledger: Option<SharedLedger>,
        write: bool,
        block_size: u64,
    ) -> Result<(), StorageError> {
        if self.handle.is_some() {
            return Err(StorageError::AlreadyOpen);
        }
        if total == 0 {
            return Err(StorageError::InvalidArgument("payload length is zero"));
        }
        if block_size == 0 {
            return Err(StorageError::InvalidArgument("block size is zero"));
        }
        self.block_size = block_size;

        let request = self.request(identity, segments, ledger).with_write(write);
        self.handle = Some(self.registry.open(request)?);
        self.write = write;
        self.total = total;
        self.unflushed = 0;
        Ok(())
    }

    fn request(
        &self,
        identity: &str,
        segments: Vec<SegmentInfo>,
        ledger: Option<SharedLedger>,
    ) -> OpenRequest {
        let mut request = OpenRequest::new(identity, self.directory.clone())
            .with_segments(segments)
            .with_block_size(self.block_size);
        if let Some(ledger) = ledger {
            request = request.with_ledger(ledger);
        }
        request
    }

    fn handle_or_err(&self) -> Result<&PayloadHandle, StorageError> {
        self.handle.as_ref().ok_or(StorageError::NotOpen)
    }

    /// Adds a segment to the open payload.
    pub fn add_file(&mut self, path: impl Into<PathBuf>, length: u64, offset: u64) -> Result<(), StorageError> {
        let handle = self.handle_or_err()?;
        handle.lock().add_segment(SegmentInfo::new(path, length, offset))
    }

    /// Flushes OS buffers if anything was written since the last flush.
    /// Returns whether a flush happened.
    pub fn flush(&mut self) -> Result<bool, StorageError> {
        if self.unflushed == 0 {
            return Ok(false);
        }
        self.handle_or_err()?.lock().flush_buffers()?;
        self.unflushed = 0;
        Ok(true)
    }

    /// Gives the payload back to the registry.
    pub fn close(&mut self) -> Result<(), StorageError> {
        self.unflushed = 0;
        match self.handle.take() {
            Some(handle) => self.registry.release(handle, self.write),
            None => Ok(()),
        }
    }

    /// Closes the payload and forgets its size and missing set.
    pub fn clear(&mut self) -> Result<(), StorageError> {
        let closed = self.close();
        self.missing.clear();
        self.total = 0;
        self.write = false;
        closed
    }

    /// Declares the whole payload present, growing every file to its full
    /// length. Returns `false` if there was nothing to complete.
    pub fn make_complete(&mut self) -> Result<bool, StorageError> {
        if self.total == 0 || self.missing.is_empty() {
            return Ok(false);
        }
        if let Some(handle) = &self.handle {
            handle.lock().extend_to_full_length()?;
        }
        self.missing.clear();
        Ok(true)
    }

    /// Replaces the missing set, e.g. with one restored from a resume file.
    pub fn set_empty_fragments(&mut self, missing: FragmentSet) {
        self.missing = missing;
    }

    pub fn copy_free_fragments(&self) -> FragmentSet {
        self.missing.clone()
    }

    /// The bytes already present.
    pub fn copy_filled_fragments(&self) -> Result<FragmentSet, StorageError> {
        Ok(self.missing.create_inverse(self.total)?)
    }

    pub fn is_position_remaining(&self, offset: u64) -> bool {
        offset < self.total && self.missing.contains(offset)
    }

    pub fn does_range_overlap(&self, offset: u64, length: u64) -> bool {
        self.missing.overlaps(offset, length)
    }

    /// Number of missing bytes inside the range.
    pub fn get_range_overlap(&self, offset: u64, length: u64) -> u64 {
        self.missing.overlap_len(offset, length)
    }

    /// Writes the missing parts of `data` at `offset`, skipping bytes that
    /// are already present. Returns the number of bytes that were missing.
    ///
    /// The missing set only shrinks once every part was written; on error
    /// it is left as it was.
    pub fn write_range(&mut self, offset: u64, data: &[u8], block_number: u32) -> Result<u64, StorageError> {
        let handle = self.handle_or_err()?;
        if self.missing.is_empty() {
            return Err(StorageError::InvalidArgument("payload is already complete"));
        }
        if data.is_empty() {
            return Ok(0);
        }

        let length = data.len() as u64;
        let end = offset
            .checked_add(length)
            .ok_or(StorageError::InvalidArgument("range overflows"))?;
        let parts: Vec<Fragment> = self
            .missing
            .iter()
            .filter(|f| f.offset < end && f.end() > offset)
            .map(|f| {
                let start = f.offset.max(offset);
                Fragment::new(start, f.end().min(end) - start)
            })
            .collect();

        {
            let mut file = handle.lock();
            for part in &parts {
                let from = (part.offset - offset) as usize;
                let to = from + part.length as usize;
                file.write(part.offset, &data[from..to], block_number, true)?;
            }
        }

        let written = self.missing.subtract(offset, length)?;
        self.unflushed += written;
        tracing::trace!(offset, length, written, remaining = self.remaining(), "range written");
        Ok(written)
    }

    /// Reads `buf.len()` bytes at `offset`, refusing ranges that are still
    /// partly missing.
    pub fn read_range(&self, offset: u64, buf: &mut [u8]) -> Result<(), StorageError> {
        let handle = self.handle_or_err()?;
        if buf.is_empty() {
            return Ok(());
        }
        let length = buf.len() as u64;
        if self.missing.overlaps(offset, length) {
            return Err(StorageError::RangeMissing { offset, length });
        }
        handle.lock().read(offset, buf, false)
    }

    /// Marks a range missing again. Returns how many present bytes it
    /// covered.
    pub fn invalidate_range(&mut self, offset: u64, length: u64) -> Result<u64, StorageError> {
        let mut filled = self.missing.create_inverse(self.total)?;
        let count = filled.subtract(offset, length)?;
        self.missing = filled.create_inverse(self.total)?;
        if count > 0 {
            tracing::debug!(offset, length, count, "range invalidated");
        }
        Ok(count)
    }

    /// Hashes block `block` as stored on disk and compares it with
    /// `expected` (20 bytes for SHA-1, 32 for SHA-256).
    ///
    /// A match marks the block done in `ledger`. A mismatch marks the block
    /// missing again and dirty in `ledger`.
    pub fn verify_block(
        &mut self,
        block: u32,
        expected: &[u8],
        ledger: Option<&SharedLedger>,
    ) -> Result<bool, StorageError> {
        let mut hasher = BlockHasher::for_digest(expected)
            .ok_or(StorageError::InvalidArgument("unsupported digest length"))?;

        let offset = u64::from(block)
            .checked_mul(self.block_size)
            .filter(|&offset| offset < self.total)
            .ok_or(StorageError::InvalidArgument("block beyond end of payload"))?;
        let length = self.block_size.min(self.total - offset);
        if self.missing.overlaps(offset, length) {
            return Err(StorageError::RangeMissing { offset, length });
        }

        let mut buf = vec![0u8; length as usize];
        self.handle_or_err()?.lock().read(offset, &mut buf, true)?;
        hasher.update(&buf);
        let matched = hasher.finalize() == expected;

        if matched {
            if let Some(ledger) = ledger {
                ledger.lock().set_block_as_done(block);
            }
        } else {
            tracing::debug!(block, "block failed verification");
            self.invalidate_range(offset, length)?;
            if let Some(ledger) = ledger {
                ledger.lock().set_block_as_dirty(block);
            }
        }
        Ok(matched)
    }
}

impl Drop for PayloadAddressSpace {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            tracing::warn!(error = %e, "closing payload on drop failed");
        }
    }
}
