//! In-process emulation of the kernel segment table.
//!
//! `MemoryHost` follows Linux semantics closely enough to exercise the
//! lifecycle layers without touching the kernel:
//!
//! - `EINVAL` for a zero size or a size above the configured maximum
//! - `ENOSPC` once the segment count limit is reached
//! - `EINVAL` for unknown or destroyed identifiers and unknown addresses
//! - `EACCES` when the mode denies the owner read/write access
//! - a marked segment stays attachable until its last detach destroys it
//!
//! All mappings of one segment share a single address, unlike the kernel,
//! which hands out a fresh address per `shmat`.

use std::collections::HashMap;
use std::io;
use std::ptr::{self, NonNull};
use std::sync::Arc;

use codes::{EACCES, EINVAL, ENOSPC};
use parking_lot::Mutex;

use super::{SegmentInfo, ShmHost};
use crate::config::SegmentMode;
use crate::id::SegmentId;

/// Errno values used by the emulation. Fixed to the Linux numbering so that
/// assertions on `raw_os_error` read the same on every platform.
mod codes {
    pub const EACCES: i32 = 13;
    pub const EINVAL: i32 = 22;
    pub const ENOSPC: i32 = 28;
}

/// Default maximum segment size (Linux `SHMMAX` is effectively unbounded;
/// the emulation caps it to keep tests cheap).
pub const DEFAULT_MAX_SIZE: u32 = 64 * 1024 * 1024;

/// Default maximum number of live segments (Linux `SHMMNI`).
pub const DEFAULT_MAX_SEGMENTS: usize = 4096;

/// In-memory shared memory host.
///
/// Clones share one segment table, the way every process shares the
/// kernel's.
#[derive(Debug, Clone)]
pub struct MemoryHost {
    table: Arc<Mutex<Table>>,
}

#[derive(Debug)]
struct Table {
    next_id: i32,
    max_size: u32,
    max_segments: usize,
    segments: HashMap<SegmentId, Region>,
    /// One entry per live mapping.
    mappings: Vec<(NonNull<u8>, SegmentId)>,
}

#[derive(Debug)]
struct Region {
    data: NonNull<u8>,
    len: usize,
    mode: SegmentMode,
    attach_count: u64,
    marked: bool,
    creator_pid: i32,
    last_pid: i32,
}

impl Region {
    fn zeroed(len: usize, mode: SegmentMode) -> Self {
        let boxed = vec![0u8; len].into_boxed_slice();
        let data = NonNull::from(Box::leak(boxed)).cast::<u8>();
        let pid = current_pid();
        Self {
            data,
            len,
            mode,
            attach_count: 0,
            marked: false,
            creator_pid: pid,
            last_pid: pid,
        }
    }
}

impl Drop for Region {
    #[allow(unsafe_code)]
    fn drop(&mut self) {
        // SAFETY: `data`/`len` come from the leaked boxed slice in
        // `Region::zeroed` and are freed exactly once, here.
        unsafe {
            drop(Box::from_raw(ptr::slice_from_raw_parts_mut(
                self.data.as_ptr(),
                self.len,
            )));
        }
    }
}

// SAFETY: the table only hands out raw addresses; all bookkeeping is done
// under the mutex and the buffers are plain bytes owned by the table.
#[allow(unsafe_code)]
unsafe impl Send for Table {}

fn current_pid() -> i32 {
    i32::try_from(std::process::id()).unwrap_or(i32::MAX)
}

fn errno(code: i32) -> io::Error {
    io::Error::from_raw_os_error(code)
}

impl Default for MemoryHost {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryHost {
    /// Create an empty table with the default limits.
    pub fn new() -> Self {
        Self::with_limits(DEFAULT_MAX_SIZE, DEFAULT_MAX_SEGMENTS)
    }

    /// Create an empty table with explicit size and count limits.
    pub fn with_limits(max_size: u32, max_segments: usize) -> Self {
        Self {
            table: Arc::new(Mutex::new(Table {
                next_id: 0,
                max_size,
                max_segments,
                segments: HashMap::new(),
                mappings: Vec::new(),
            })),
        }
    }

    /// Number of segments that still exist (created and not yet destroyed).
    pub fn segment_count(&self) -> usize {
        self.table.lock().segments.len()
    }

    /// Whether `id` still names an existing segment.
    pub fn contains(&self, id: SegmentId) -> bool {
        self.table.lock().segments.contains_key(&id)
    }

    /// Number of live mappings across all segments.
    pub fn mapping_count(&self) -> usize {
        self.table.lock().mappings.len()
    }
}

impl Table {
    fn destroy_if_unused(&mut self, id: SegmentId) {
        let unused = self
            .segments
            .get(&id)
            .is_some_and(|region| region.marked && region.attach_count == 0);
        if unused {
            self.segments.remove(&id);
        }
    }
}

impl ShmHost for MemoryHost {
    fn allocate(&self, size: u32, mode: SegmentMode) -> io::Result<SegmentId> {
        let mut table = self.table.lock();
        if size == 0 || size > table.max_size {
            return Err(errno(EINVAL));
        }
        if table.segments.len() >= table.max_segments {
            return Err(errno(ENOSPC));
        }

        let id = SegmentId::from_raw(table.next_id).ok_or_else(|| errno(ENOSPC))?;
        table.next_id = table.next_id.checked_add(1).unwrap_or(-1);

        let len = usize::try_from(size).map_err(|_| errno(EINVAL))?;
        table.segments.insert(id, Region::zeroed(len, mode));
        Ok(id)
    }

    fn map(&self, id: SegmentId) -> io::Result<NonNull<u8>> {
        let mut table = self.table.lock();
        let region = table.segments.get_mut(&id).ok_or_else(|| errno(EINVAL))?;
        if !region.mode.owner_can_read_write() {
            return Err(errno(EACCES));
        }

        region.attach_count += 1;
        region.last_pid = current_pid();
        let addr = region.data;
        table.mappings.push((addr, id));
        Ok(addr)
    }

    #[allow(unsafe_code)]
    unsafe fn unmap(&self, addr: NonNull<u8>) -> io::Result<()> {
        let mut table = self.table.lock();
        let slot = table
            .mappings
            .iter()
            .position(|(mapped, _)| *mapped == addr)
            .ok_or_else(|| errno(EINVAL))?;
        let (_, id) = table.mappings.swap_remove(slot);

        if let Some(region) = table.segments.get_mut(&id) {
            region.attach_count -= 1;
            region.last_pid = current_pid();
        }
        table.destroy_if_unused(id);
        Ok(())
    }

    fn mark_for_removal(&self, id: SegmentId) -> io::Result<()> {
        let mut table = self.table.lock();
        let region = table.segments.get_mut(&id).ok_or_else(|| errno(EINVAL))?;
        region.marked = true;
        table.destroy_if_unused(id);
        Ok(())
    }

    fn stat(&self, id: SegmentId) -> io::Result<SegmentInfo> {
        let table = self.table.lock();
        let region = table.segments.get(&id).ok_or_else(|| errno(EINVAL))?;
        Ok(SegmentInfo {
            id,
            size: region.len,
            attach_count: region.attach_count,
            mode: region.mode,
            creator_pid: region.creator_pid,
            last_pid: region.last_pid,
            marked_for_removal: region.marked,
        })
    }
}

#[cfg(test)]
#[allow(clippy::expect_used, unsafe_code)]
mod tests {
    use super::*;

    #[test]
    fn test_allocate_limits() {
        let host = MemoryHost::with_limits(1024, 2);

        let zero = host.allocate(0, SegmentMode::WORLD).expect_err("zero size");
        assert_eq!(zero.raw_os_error(), Some(EINVAL));

        let big = host.allocate(1025, SegmentMode::WORLD).expect_err("too big");
        assert_eq!(big.raw_os_error(), Some(EINVAL));

        host.allocate(1024, SegmentMode::WORLD).expect("first");
        host.allocate(1, SegmentMode::WORLD).expect("second");
        let full = host.allocate(1, SegmentMode::WORLD).expect_err("table full");
        assert_eq!(full.raw_os_error(), Some(ENOSPC));
    }

    #[test]
    fn test_ids_are_not_reused() {
        let host = MemoryHost::new();
        let first = host.allocate(16, SegmentMode::WORLD).expect("allocate");
        host.mark_for_removal(first).expect("remove");
        assert!(!host.contains(first));

        let second = host.allocate(16, SegmentMode::WORLD).expect("allocate");
        assert_ne!(first, second);
    }

    #[test]
    fn test_new_segment_is_zeroed() {
        let host = MemoryHost::new();
        let id = host.allocate(64, SegmentMode::WORLD).expect("allocate");
        let addr = host.map(id).expect("map");
        let bytes = unsafe { std::slice::from_raw_parts(addr.as_ptr(), 64) };
        assert!(bytes.iter().all(|b| *b == 0));
        unsafe { host.unmap(addr) }.expect("unmap");
    }

    #[test]
    fn test_marked_segment_lives_until_last_detach() {
        let host = MemoryHost::new();
        let id = host.allocate(32, SegmentMode::WORLD).expect("allocate");
        let first = host.map(id).expect("map");

        host.mark_for_removal(id).expect("mark");
        assert!(host.stat(id).expect("stat").marked_for_removal);

        // Still attachable while a mapping keeps it alive
        let second = host.map(id).expect("map marked");
        assert_eq!(host.stat(id).expect("stat").attach_count, 2);

        unsafe { host.unmap(first) }.expect("unmap first");
        assert!(host.contains(id));
        unsafe { host.unmap(second) }.expect("unmap second");
        assert!(!host.contains(id));

        assert_eq!(host.map(id).expect_err("destroyed").raw_os_error(), Some(EINVAL));
        assert_eq!(host.stat(id).expect_err("destroyed").raw_os_error(), Some(EINVAL));
    }

    #[test]
    fn test_unmap_unknown_address() {
        let host = MemoryHost::new();
        let mut local = 0u8;
        let err = unsafe { host.unmap(NonNull::from(&mut local)) }.expect_err("unknown");
        assert_eq!(err.raw_os_error(), Some(EINVAL));
    }

    #[test]
    fn test_mode_without_owner_access() {
        let host = MemoryHost::new();
        let mode = SegmentMode::new(0o044).expect("mode");
        let id = host.allocate(8, mode).expect("allocate");
        assert_eq!(host.map(id).expect_err("denied").raw_os_error(), Some(EACCES));
        assert_eq!(host.stat(id).expect("stat").mode, mode);
    }
}
