//! System V shared memory segments.
//!
//! This crate wraps the host's System V shared memory facility in three
//! layers:
//!
//! - **[`raw`]**: the bare `create` / `attach` / `release` operations, one
//!   host call (or two, for release) each, with no lifecycle tracking
//! - **[`Segment`]**: an owning handle that binds identifier, mapping and
//!   size, rejects operations on the wrong lifecycle state and releases
//!   the segment exactly once
//! - **[`ShmHost`]**: the capability the other two run against, either the
//!   kernel ([`SysV`]) or an in-process table ([`MemoryHost`]) for tests
//!
//! The crate provides no synchronization over the shared bytes. Whatever
//! is placed in a segment has to bring its own (atomics, sequence numbers,
//! process-shared locks).
//!
//! # Example
//!
//! ```rust,no_run
//! use shm_segment::Segment;
//!
//! # fn example() -> Result<(), shm_segment::ShmError> {
//! let mut segment = Segment::create(4096)?;
//! segment.attach()?;
//! segment.as_mut_slice()?[0] = 0xAB;
//!
//! // Hand `segment.id()` to another process, which calls
//! // `Segment::open(id)` and `attach()` to see the same bytes.
//! println!("segment id: {}", segment.id());
//!
//! segment.release()?;
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]

pub mod config;
pub mod error;
pub mod host;
pub mod id;
pub mod raw;
pub mod segment;

pub use config::{SegmentConfig, SegmentMode};
pub use error::{Result, ShmError};
pub use host::{MemoryHost, SegmentInfo, ShmHost};
#[cfg(unix)]
pub use host::SysV;
pub use id::SegmentId;
pub use segment::{Segment, SegmentState};

/// Version information for this crate.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
