//! Interval algebra over byte ranges.
//!
//! A [`FragmentSet`] records a predicate ("missing", "available", ...) over a
//! byte address space as an ordered list of disjoint [`Fragment`]s. Payload
//! storage keeps one set of missing bytes per download and splits or merges
//! it every time a block lands on disk or fails verification.
//!
//! # Allocation
//!
//! Fragment nodes live in a [`FragmentAllocator`], an index arena with a free
//! list. Nodes are linked by index, so splitting and merging never hands out
//! dangling neighbours, and released nodes are reused instead of going back
//! to the heap. Growing the arena can fail; that surfaces as
//! [`FragmentError::OutOfMemory`] rather than a panic.
//!
//! # Examples
//!
//! ```
//! use rbit_store::fragment::{Fragment, FragmentSet};
//!
//! // 100 bytes, all missing
//! let mut missing = FragmentSet::from_range(0, 100).unwrap();
//!
//! // bytes 40..60 arrived
//! let removed = missing.subtract(40, 20).unwrap();
//! assert_eq!(removed, 20);
//! assert_eq!(
//!     missing.fragments(),
//!     vec![Fragment::new(0, 40), Fragment::new(60, 40)]
//! );
//!
//! // what we already have
//! let present = missing.create_inverse(100).unwrap();
//! assert_eq!(present.fragments(), vec![Fragment::new(40, 20)]);
//! ```

mod allocator;
mod error;
mod range;
mod set;

pub use allocator::{FragmentAllocator, NodeId};
pub use error::FragmentError;
pub use range::{Fragment, Overlap};
pub use set::{FragmentSet, Iter};
