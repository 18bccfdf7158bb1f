//! Host shared memory facility.
//!
//! The kernel segment table is process-wide state outside this crate's
//! control, so every operation goes through the [`ShmHost`] capability
//! instead of calling the kernel directly. Two implementations exist:
//!
//! - [`SysV`]: System V `shmget` / `shmat` / `shmdt` / `shmctl` via `libc`
//! - [`MemoryHost`]: an in-process table with Linux semantics, for tests
//!
//! Host methods report failures as [`std::io::Error`] carrying the host
//! `errno`; the lifecycle layers above wrap them into
//! [`ShmError`](crate::ShmError).

use std::io;
use std::ptr::NonNull;

use serde::{Deserialize, Serialize};

use crate::config::SegmentMode;
use crate::id::SegmentId;

pub mod memory;
#[cfg(unix)]
pub mod sysv;

pub use memory::MemoryHost;
#[cfg(unix)]
pub use sysv::SysV;

/// Snapshot of a segment's host status (`IPC_STAT`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SegmentInfo {
    /// Segment identifier.
    pub id: SegmentId,
    /// Size in bytes as requested at creation.
    pub size: usize,
    /// Number of mappings currently attached, across all processes.
    pub attach_count: u64,
    /// Permission bits.
    pub mode: SegmentMode,
    /// Pid of the creating process.
    pub creator_pid: i32,
    /// Pid of the last process to attach or detach.
    pub last_pid: i32,
    /// Whether the segment is marked for removal and will be destroyed on
    /// its last detach.
    pub marked_for_removal: bool,
}

/// Capability interface over a shared memory facility.
///
/// Implementations are cheap handles onto shared state (the kernel, or a
/// shared in-memory table), hence the `Clone` bound: a
/// [`Segment`](crate::Segment) keeps its own copy.
pub trait ShmHost: Clone {
    /// Allocate a new private segment of exactly `size` bytes.
    fn allocate(&self, size: u32, mode: SegmentMode) -> io::Result<SegmentId>;

    /// Map the whole segment at a host-chosen address with read/write access.
    fn map(&self, id: SegmentId) -> io::Result<NonNull<u8>>;

    /// Unmap a mapping previously returned by [`ShmHost::map`].
    ///
    /// # Safety
    ///
    /// The caller must not access memory through `addr` (or any reference
    /// derived from it) after this call, whether or not it succeeds.
    #[allow(unsafe_code)]
    unsafe fn unmap(&self, addr: NonNull<u8>) -> io::Result<()>;

    /// Mark the segment for destruction once its last mapping is gone.
    fn mark_for_removal(&self, id: SegmentId) -> io::Result<()>;

    /// Query the segment's host status.
    fn stat(&self, id: SegmentId) -> io::Result<SegmentInfo>;
}
