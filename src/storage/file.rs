use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Component, Path, PathBuf};
use std::time::SystemTime;

use super::error::StorageError;

/// How a segment file is opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenMode {
    Read,
    /// Read and write an existing file.
    ReadWrite,
    /// Read and write, creating the file and its parent directories.
    Create,
}

/// Handle to one physical file backing a payload segment.
pub trait BackingFile: Send {
    /// Moves the cursor to `pos` bytes from the start of the file.
    fn seek(&mut self, pos: u64) -> io::Result<()>;

    /// Fills `buf` completely from the cursor.
    fn read(&mut self, buf: &mut [u8]) -> io::Result<()>;

    /// Writes all of `data` at the cursor.
    fn write(&mut self, data: &[u8]) -> io::Result<()>;

    /// Pushes buffered writes down to the device.
    fn flush(&mut self) -> io::Result<()>;

    fn len(&self) -> io::Result<u64>;

    /// Grows or truncates the file; growth reads back as zeros.
    fn set_len(&mut self, len: u64) -> io::Result<()>;

    fn last_modified(&self) -> io::Result<SystemTime>;
}

/// Opens [`BackingFile`]s.
pub trait FileOpener: Send + Sync {
    fn open(&self, path: &Path, mode: OpenMode) -> io::Result<Box<dyn BackingFile>>;
}

/// [`FileOpener`] for the local filesystem.
#[derive(Debug, Clone, Copy, Default)]
pub struct DiskOpener;

impl FileOpener for DiskOpener {
    fn open(&self, path: &Path, mode: OpenMode) -> io::Result<Box<dyn BackingFile>> {
        let file = match mode {
            OpenMode::Read => File::open(path)?,
            OpenMode::ReadWrite => OpenOptions::new().read(true).write(true).open(path)?,
            OpenMode::Create => {
                if let Some(parent) = path.parent() {
                    fs::create_dir_all(parent)?;
                }
                OpenOptions::new()
                    .create(true)
                    .read(true)
                    .write(true)
                    .truncate(false)
                    .open(path)?
            }
        };
        Ok(Box::new(DiskFile { file }))
    }
}

struct DiskFile {
    file: File,
}

impl BackingFile for DiskFile {
    fn seek(&mut self, pos: u64) -> io::Result<()> {
        self.file.seek(SeekFrom::Start(pos)).map(|_| ())
    }

    fn read(&mut self, buf: &mut [u8]) -> io::Result<()> {
        self.file.read_exact(buf)
    }

    fn write(&mut self, data: &[u8]) -> io::Result<()> {
        self.file.write_all(data)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.file.flush()?;
        self.file.sync_data()
    }

    fn len(&self) -> io::Result<u64> {
        Ok(self.file.metadata()?.len())
    }

    fn set_len(&mut self, len: u64) -> io::Result<()> {
        self.file.set_len(len)
    }

    fn last_modified(&self) -> io::Result<SystemTime> {
        self.file.metadata()?.modified()
    }
}

/// One file of a payload and where it sits in the logical byte stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SegmentInfo {
    /// Path relative to the payload directory.
    pub path: PathBuf,
    pub length: u64,
    /// Logical offset of the file's first byte.
    pub offset: u64,
}

impl SegmentInfo {
    pub fn new(path: impl Into<PathBuf>, length: u64, offset: u64) -> Self {
        Self {
            path: path.into(),
            length,
            offset,
        }
    }

    pub fn end(&self) -> u64 {
        self.offset.saturating_add(self.length)
    }

    pub fn byte_range(&self) -> std::ops::Range<u64> {
        self.offset..self.end()
    }

    pub fn contains_offset(&self, offset: u64) -> bool {
        offset >= self.offset && offset < self.end()
    }
}

pub(crate) fn validate_file_path(file_path: &Path) -> Result<(), StorageError> {
    for component in file_path.components() {
        match component {
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                return Err(StorageError::PathTraversal(file_path.display().to_string()));
            }
            _ => {}
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_validate_file_path() {
        assert!(validate_file_path(Path::new("a/b.bin")).is_ok());
        assert!(matches!(
            validate_file_path(Path::new("../escape")),
            Err(StorageError::PathTraversal(_))
        ));
        assert!(matches!(
            validate_file_path(Path::new("/etc/passwd")),
            Err(StorageError::PathTraversal(_))
        ));
    }

    #[test]
    fn test_disk_opener_modes() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("nested/dir/file.bin");

        assert!(DiskOpener.open(&path, OpenMode::ReadWrite).is_err());

        let mut file = DiskOpener.open(&path, OpenMode::Create).unwrap();
        file.seek(4).unwrap();
        file.write(b"data").unwrap();
        assert_eq!(file.len().unwrap(), 8);

        let mut reader = DiskOpener.open(&path, OpenMode::Read).unwrap();
        let mut buf = [0xffu8; 8];
        reader.read(&mut buf).unwrap();
        assert_eq!(&buf, b"\0\0\0\0data");

        file.set_len(16).unwrap();
        assert_eq!(file.len().unwrap(), 16);
        assert!(file.last_modified().is_ok());
    }
}
