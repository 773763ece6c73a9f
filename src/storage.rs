//! Payload storage: one logical byte range over many files.
//!
//! # Overview
//!
//! A payload is addressed as a single contiguous range even when it is spread
//! across several files. The layers, bottom up:
//!
//! - [`FileOpener`] / [`BackingFile`] - the physical files, [`DiskOpener`]
//!   for the local filesystem
//! - [`VirtualFile`] - maps logical offsets onto [`SegmentInfo`]s and fronts
//!   them with a [`WriteBackCache`](crate::cache::WriteBackCache)
//! - [`PayloadRegistry`] - shares one [`VirtualFile`] between everyone who
//!   opens the same payload, with reference counting
//! - [`PayloadAddressSpace`] - tracks which bytes are still missing and only
//!   writes those
//! - [`MaintenanceHandle`] - periodic cache trimming, sweeping and ledger
//!   writes
//!
//! # Examples
//!
//! ```no_run
//! use rbit_store::storage::{PayloadAddressSpace, PayloadRegistry, SegmentInfo};
//! use std::sync::Arc;
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let registry = Arc::new(PayloadRegistry::new());
//! let mut payload = PayloadAddressSpace::new(Arc::clone(&registry), "./downloads");
//!
//! let segments = vec![
//!     SegmentInfo::new("a.bin", 50, 0),
//!     SegmentInfo::new("b.bin", 70, 50),
//! ];
//! payload.create_all("payload", 120, segments, None, 16 * 1024)?;
//!
//! // spans both files
//! payload.write_range(40, &[7u8; 20], 0)?;
//!
//! let mut buf = [0u8; 20];
//! payload.read_range(40, &mut buf)?;
//! assert_eq!(payload.remaining(), 100);
//!
//! payload.close()?;
//! # Ok(())
//! # }
//! ```
//!
//! # Paths
//!
//! A payload with one segment, or a segment path with directories in it,
//! resolves directly under the payload directory. Bare names of a
//! multi-segment payload go into a folder named after the payload. Paths
//! containing `..` or absolute paths are rejected.

mod address_space;
mod error;
mod file;
mod maintenance;
mod registry;
mod virtual_file;

pub use address_space::PayloadAddressSpace;
pub use error::StorageError;
pub use file::{BackingFile, DiskOpener, FileOpener, OpenMode, SegmentInfo};
pub use maintenance::MaintenanceHandle;
pub use registry::{OpenRequest, PayloadHandle, PayloadRegistry};
pub use virtual_file::VirtualFile;

#[cfg(test)]
mod tests;
