use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Instant, SystemTime};

use super::error::StorageError;
use super::file::{validate_file_path, BackingFile, FileOpener, OpenMode, SegmentInfo};
use crate::cache::{CacheError, CacheSink, WriteBackCache};
use crate::ledger::{unix_secs, SharedLedger};

struct FileSegment {
    info: SegmentInfo,
    full_path: PathBuf,
    handle: Option<Box<dyn BackingFile>>,
}

/// The segment files behind a [`VirtualFile`], plus everything a cache
/// flush needs to reach them.
struct SegmentIo {
    identity: String,
    base: PathBuf,
    segments: Vec<FileSegment>,
    opener: Arc<dyn FileOpener>,
    ledger: Option<SharedLedger>,
    write: bool,
    cache_disabled: bool,
}

impl SegmentIo {
    fn is_open(&self) -> bool {
        self.segments.iter().any(|s| s.handle.is_some())
    }

    /// Index of the non-empty segment holding `offset`.
    fn find_segment(&self, offset: u64) -> Option<usize> {
        self.segments
            .iter()
            .position(|s| s.info.length > 0 && s.info.contains_offset(offset))
    }

    /// A lone segment, or one whose path has directories, lives directly
    /// under the base directory; otherwise it goes in a folder named after
    /// the payload.
    fn construct_paths(&mut self) {
        let single = self.segments.len() == 1;
        for segment in &mut self.segments {
            let nested = segment.info.path.components().count() > 1;
            segment.full_path = if single || nested {
                self.base.join(&segment.info.path)
            } else {
                self.base.join(&self.identity).join(&segment.info.path)
            };
        }
    }

    fn open(&mut self, write: bool, create: bool) -> Result<(), StorageError> {
        if self.segments.is_empty() {
            return Err(StorageError::NoSegment);
        }
        self.construct_paths();

        let mode = match (create, write) {
            (true, _) => OpenMode::Create,
            (false, true) => OpenMode::ReadWrite,
            (false, false) => OpenMode::Read,
        };

        for index in 0..self.segments.len() {
            if self.segments[index].info.length == 0 {
                continue;
            }
            match self.open_segment(index, mode) {
                Ok(handle) => self.segments[index].handle = Some(handle),
                Err(e) => {
                    self.close();
                    return Err(e);
                }
            }
        }

        self.write = write || create;
        tracing::debug!(
            identity = %self.identity,
            segments = self.segments.len(),
            write = self.write,
            "payload files opened"
        );
        Ok(())
    }

    fn open_segment(
        &self,
        index: usize,
        mode: OpenMode,
    ) -> Result<Box<dyn BackingFile>, StorageError> {
        let path = &self.segments[index].full_path;
        let result = match self.opener.open(path, mode) {
            Err(e) if mode == OpenMode::ReadWrite => {
                tracing::trace!(path = %path.display(), error = %e, "reopening as new file");
                self.opener.open(path, OpenMode::Create)
            }
            other => other,
        };
        result.map_err(|e| match e.kind() {
            io::ErrorKind::NotFound => StorageError::FileNotFound(path.display().to_string()),
            _ => StorageError::Io(e),
        })
    }

    fn close(&mut self) {
        for segment in &mut self.segments {
            segment.handle = None;
        }
        self.write = false;
    }

    fn read_segments(&mut self, offset: u64, buf: &mut [u8]) -> Result<(), StorageError> {
        let mut done = 0usize;
        while done < buf.len() {
            let cursor = offset + done as u64;
            let completed = done as u64;
            let index = self
                .find_segment(cursor)
                .ok_or(StorageError::OutOfRange { offset: cursor, completed })?;
            let segment = &mut self.segments[index];
            let Some(handle) = segment.handle.as_mut() else {
                return Err(StorageError::NotOpen);
            };

            let within = cursor - segment.info.offset;
            let take = ((segment.info.length - within) as usize).min(buf.len() - done);
            handle
                .seek(within)
                .and_then(|()| handle.read(&mut buf[done..done + take]))
                .map_err(|source| StorageError::Segment {
                    offset: cursor,
                    completed,
                    source,
                })?;
            done += take;
        }
        Ok(())
    }

    /// Writes `data` across segments, refreshing each touched file's
    /// fingerprint in the ledger. Returns the bytes written.
    fn write_segments(&mut self, offset: u64, data: &[u8]) -> Result<u64, StorageError> {
        if !self.write {
            return Err(StorageError::ReadOnly);
        }

        let mut done = 0usize;
        while done < data.len() {
            let cursor = offset + done as u64;
            let completed = done as u64;
            let index = self
                .find_segment(cursor)
                .ok_or(StorageError::OutOfRange { offset: cursor, completed })?;
            let segment = &mut self.segments[index];
            let Some(handle) = segment.handle.as_mut() else {
                return Err(StorageError::NotOpen);
            };

            let within = cursor - segment.info.offset;
            let take = ((segment.info.length - within) as usize).min(data.len() - done);
            handle
                .seek(within)
                .and_then(|()| handle.write(&data[done..done + take]))
                .map_err(|source| StorageError::Segment {
                    offset: cursor,
                    completed,
                    source,
                })?;
            done += take;

            if let Some(ledger) = &self.ledger {
                let modified = handle.last_modified().unwrap_or_else(|_| SystemTime::now());
                ledger.lock().update_file_data(
                    &segment.full_path,
                    unix_secs(modified),
                    segment.info.length,
                );
            }
        }
        Ok(done as u64)
    }

    fn flush(&mut self) -> Result<(), StorageError> {
        let mut first_error = None;
        for segment in &mut self.segments {
            if let Some(handle) = segment.handle.as_mut() {
                if let Err(e) = handle.flush() {
                    tracing::warn!(path = %segment.full_path.display(), error = %e, "flush failed");
                    first_error.get_or_insert(e);
                }
            }
        }
        match first_error {
            Some(e) => Err(e.into()),
            None => Ok(()),
        }
    }

    /// The sink cache flushes go to, if the files can take writes.
    fn sink(&mut self) -> Option<&mut dyn CacheSink> {
        if self.write && self.is_open() {
            Some(self)
        } else {
            None
        }
    }
}

impl CacheSink for SegmentIo {
    fn write_cache_data(&mut self, offset: u64, data: &[u8]) -> io::Result<()> {
        self.write_segments(offset, data)?;
        Ok(())
    }

    fn cache_disabled(&mut self, disabled: bool) {
        self.cache_disabled = disabled;
    }
}

/// A payload's segment files presented as one contiguous byte range,
/// fronted by a write-back cache.
pub struct VirtualFile {
    cache: WriteBackCache,
    io: SegmentIo,
}

impl VirtualFile {
    /// Describes a payload without opening anything.
    ///
    /// Segments are sorted by offset; exact duplicates are dropped.
    pub fn new(
        identity: impl Into<String>,
        directory: impl Into<PathBuf>,
        segments: Vec<SegmentInfo>,
        ledger: Option<SharedLedger>,
        cache: WriteBackCache,
        opener: Arc<dyn FileOpener>,
    ) -> Result<Self, StorageError> {
        let cache_disabled = cache.is_disabled();
        let mut file = Self {
            cache,
            io: SegmentIo {
                identity: identity.into(),
                base: directory.into(),
                segments: Vec::with_capacity(segments.len()),
                opener,
                ledger,
                write: false,
                cache_disabled,
            },
        };
        for info in segments {
            file.insert_segment(info)?;
        }
        Ok(file)
    }

    pub fn identity(&self) -> &str {
        &self.io.identity
    }

    pub fn directory(&self) -> &Path {
        &self.io.base
    }

    pub fn is_open(&self) -> bool {
        self.io.is_open()
    }

    pub fn is_writable(&self) -> bool {
        self.io.write
    }

    pub fn is_cache_disabled(&self) -> bool {
        self.io.cache_disabled
    }

    /// Turns caching on or off for subsequent reads and writes.
    pub fn set_cache_disabled(&mut self, disabled: bool) {
        self.io.cache_disabled = disabled || self.cache.is_disabled();
    }

    pub fn cache(&self) -> &WriteBackCache {
        &self.cache
    }

    pub fn segments(&self) -> impl Iterator<Item = &SegmentInfo> {
        self.io.segments.iter().map(|s| &s.info)
    }

    /// Resolved on-disk path of each segment, valid once opened.
    pub fn segment_paths(&self) -> impl Iterator<Item = &Path> {
        self.io.segments.iter().map(|s| s.full_path.as_path())
    }

    /// End of the last segment.
    pub fn total_length(&self) -> u64 {
        self.io.segments.iter().map(|s| s.info.end()).max().unwrap_or(0)
    }

    pub fn find_segment(&self, offset: u64) -> Option<&SegmentInfo> {
        self.io.find_segment(offset).map(|i| &self.io.segments[i].info)
    }

    /// Adds a segment. Has no effect on files that are already open.
    pub fn add_segment(&mut self, info: SegmentInfo) -> Result<(), StorageError> {
        self.insert_segment(info)
    }

    fn insert_segment(&mut self, info: SegmentInfo) -> Result<(), StorageError> {
        validate_file_path(&info.path)?;
        if self.io.segments.iter().any(|s| s.info == info) {
            return Ok(());
        }
        let index = self
            .io
            .segments
            .partition_point(|s| s.info.offset <= info.offset);
        self.io.segments.insert(
            index,
            FileSegment {
                info,
                full_path: PathBuf::new(),
                handle: None,
            },
        );
        Ok(())
    }

    /// Opens every non-empty segment.
    ///
    /// `create` makes missing files (and their directories) and implies
    /// write access. A write open of a file that does not exist yet falls
    /// back to creating it.
    pub fn open(&mut self, write: bool, create: bool) -> Result<(), StorageError> {
        if self.io.is_open() {
            return Err(StorageError::AlreadyOpen);
        }
        self.io.open(write, create)
    }

    /// Reopens the files for writing if they are currently read-only. If
    /// that fails they are reopened read-only again.
    pub fn ensure_write(&mut self) -> Result<(), StorageError> {
        if !self.io.is_open() {
            return Err(StorageError::NotOpen);
        }
        if self.io.write {
            return Ok(());
        }

        self.io.close();
        if let Err(e) = self.io.open(true, false) {
            tracing::warn!(identity = %self.io.identity, error = %e, "write reopen failed");
            self.io.open(false, false)?;
            return Err(e);
        }
        Ok(())
    }

    /// Writes back the cache and drops to read-only access.
    pub fn close_write(&mut self) -> Result<(), StorageError> {
        if !self.io.is_open() {
            return Err(StorageError::NotOpen);
        }
        if !self.io.write {
            return Ok(());
        }

        let dumped = self.dump_cache();
        self.io.close();
        self.io.open(false, false)?;
        dumped
    }

    /// Writes back the cache and closes every file.
    pub fn close_all(&mut self) -> Result<(), StorageError> {
        let dumped = self.dump_cache();
        self.io.close();
        tracing::debug!(identity = %self.io.identity, "payload files closed");
        dumped
    }

    /// Flushes every dirty cache entry to disk and empties the cache.
    pub fn dump_cache(&mut self) -> Result<(), StorageError> {
        if self.cache.is_empty() {
            return Ok(());
        }
        self.cache.write_cache(self.io.sink())?;
        Ok(())
    }

    /// Flushes OS buffers of every open segment.
    pub fn flush_buffers(&mut self) -> Result<(), StorageError> {
        self.io.flush()
    }

    /// Reads `buf.len()` bytes at `offset`.
    ///
    /// Served from the cache when it covers the whole range, unless
    /// `bypass_cache` is set. Otherwise overlapping dirty entries are
    /// written back first so the segments hold the newest bytes, and what
    /// was read is cached as already committed.
    ///
    /// # Errors
    ///
    /// Fails if an overlapping dirty entry cannot be written back, even
    /// when caching is off, rather than returning older bytes from disk.
    pub fn read(&mut self, offset: u64, buf: &mut [u8], bypass_cache: bool) -> Result<(), StorageError> {
        if !self.io.is_open() {
            return Err(StorageError::NotOpen);
        }
        if buf.is_empty() {
            return Ok(());
        }

        let length = buf.len() as u64;
        // A disabled cache can still hold dirty entries newer than the disk.
        if !self.io.cache_disabled || !self.cache.is_empty() {
            if !bypass_cache && self.cache.get_cache_data(buf, offset) {
                return Ok(());
            }

            let block_size = self.cache.config().block_size;
            let invalidated = if length == block_size {
                let block = self.cache.config().block_of(offset);
                self.cache.invalidate_block(block, self.io.sink())
            } else {
                self.cache.invalidate_range(offset, length, self.io.sink())
            };
            invalidated?;
        }

        self.io.read_segments(offset, buf)?;

        if !self.io.cache_disabled && !bypass_cache {
            let block = self.cache.config().block_of(offset);
            match self.cache.add_cache_entry(buf, offset, block, true, self.io.sink()) {
                Ok(()) | Err(CacheError::EntryTooLarge { .. }) => {}
                Err(e) => {
                    tracing::warn!(offset, error = %e, "caching read failed");
                    self.io.cache_disabled = true;
                }
            }
        }
        Ok(())
    }

    /// Writes `data` at `offset` and returns the bytes accepted.
    ///
    /// With `use_cache` the bytes land in the cache as a dirty entry tagged
    /// with `block_number`. Data too large for the cache, or any write while
    /// the cache is off, goes straight to the segments.
    ///
    /// # Errors
    ///
    /// A segment failure part way through returns
    /// [`StorageError::Segment`], whose `completed` count says how much was
    /// written before it. A write around the cache fails without touching
    /// the segments if overlapping dirty entries cannot be written back.
    pub fn write(
        &mut self,
        offset: u64,
        data: &[u8],
        block_number: u32,
        use_cache: bool,
    ) -> Result<u64, StorageError> {
        if !self.io.is_open() {
            return Err(StorageError::NotOpen);
        }
        if !self.io.write {
            return Err(StorageError::ReadOnly);
        }
        if data.is_empty() {
            return Ok(0);
        }
        if self.io.find_segment(offset).is_none() {
            return Err(StorageError::OutOfRange {
                offset,
                completed: 0,
            });
        }

        if !self.io.cache_disabled && use_cache {
            match self
                .cache
                .add_cache_entry(data, offset, block_number, false, self.io.sink())
            {
                Ok(()) => return Ok(data.len() as u64),
                Err(CacheError::EntryTooLarge { len, .. }) => {
                    tracing::trace!(offset, len, "entry too large, writing through");
                }
                Err(e) => {
                    tracing::warn!(offset, error = %e, "cache insert failed, writing through");
                    self.io.cache_disabled = true;
                }
            }
        }

        let length = data.len() as u64;
        if !self.cache.is_empty() {
            self.cache.evict_range(offset, length, self.io.sink())?;
        }

        self.io.write_segments(offset, data)
    }

    /// Grows every open segment file to its full length.
    pub fn extend_to_full_length(&mut self) -> Result<(), StorageError> {
        if !self.io.write {
            return Err(StorageError::ReadOnly);
        }
        for segment in &mut self.io.segments {
            let Some(handle) = segment.handle.as_mut() else {
                continue;
            };
            if handle.len()? < segment.info.length {
                handle.set_len(segment.info.length)?;
            }
        }
        Ok(())
    }

    /// Periodic upkeep: cache trimming and sweeping, then a rate-limited
    /// ledger write. With caching off, entries left behind are written back
    /// and dropped.
    pub fn maintain(&mut self, now: Instant) -> Result<(), StorageError> {
        if !self.io.is_open() {
            return Ok(());
        }
        if !self.io.cache_disabled {
            self.cache.tick(now, self.io.sink())?;
        } else if !self.cache.is_empty() {
            self.cache.drain(self.io.sink())?;
        }
        if let Some(ledger) = &self.io.ledger {
            ledger.lock().write_meta_file(false)?;
        }
        Ok(())
    }
}

impl std::fmt::Debug for VirtualFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VirtualFile")
            .field("identity", &self.io.identity)
            .field("segments", &self.io.segments.len())
            .field("open", &self.io.is_open())
            .field("write", &self.io.write)
            .field("cache_disabled", &self.io.cache_disabled)
            .finish()
    }
}
