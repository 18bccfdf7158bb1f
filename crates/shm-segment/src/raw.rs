//! The bare segment operations: create, attach, release.
//!
//! These map one-to-one onto the host calls and do no lifecycle tracking.
//! Nothing stops a caller from attaching a released segment or releasing
//! twice; [`Segment`](crate::Segment) is the safe layer on top.
//!
//! The functions without a suffix use the kernel ([`SysV`]); the `_on`
//! variants take any [`ShmHost`].

use std::ptr::NonNull;

use tracing::{debug, warn};

use crate::config::SegmentMode;
use crate::error::{Result, ShmError};
use crate::host::ShmHost;
#[cfg(unix)]
use crate::host::SysV;
use crate::id::SegmentId;

/// Create a private segment of exactly `size` bytes, read/write for owner,
/// group and other.
///
/// Fails with [`ShmError::Allocation`] when the host refuses; on Linux that
/// includes `size == 0` (`EINVAL`).
#[cfg(unix)]
pub fn create(size: u32) -> Result<SegmentId> {
    create_on(&SysV, size, SegmentMode::WORLD)
}

/// Map the segment `id` at a kernel-chosen address.
///
/// The mapping covers the size given at creation; the caller has to
/// remember it.
#[cfg(unix)]
pub fn attach(id: SegmentId) -> Result<NonNull<u8>> {
    attach_on(&SysV, id)
}

/// Unmap `addr` and mark `id` for removal.
///
/// See [`release_on`].
///
/// # Safety
///
/// Same contract as [`release_on`].
#[cfg(unix)]
#[allow(unsafe_code)]
pub unsafe fn release(id: SegmentId, addr: NonNull<u8>) {
    unsafe { release_on(&SysV, id, addr) }
}

/// [`create`] against an arbitrary host and mode.
pub fn create_on<H: ShmHost>(host: &H, size: u32, mode: SegmentMode) -> Result<SegmentId> {
    let id = host
        .allocate(size, mode)
        .map_err(|source| ShmError::Allocation { size, source })?;
    debug!(%id, size, %mode, "created shared memory segment");
    Ok(id)
}

/// [`attach`] against an arbitrary host.
pub fn attach_on<H: ShmHost>(host: &H, id: SegmentId) -> Result<NonNull<u8>> {
    let addr = host
        .map(id)
        .map_err(|source| ShmError::Attach { id, source })?;
    debug!(%id, addr = ?addr, "attached shared memory segment");
    Ok(addr)
}

/// Unmap `addr`, then mark `id` for removal.
///
/// Both host calls are made even if the first one fails. Failures are
/// logged and otherwise dropped: the segment may then outlive every
/// process until an administrator removes it (`ipcrm -m <id>`).
///
/// # Safety
///
/// `addr` must not be used after this call, and `id` must not have been
/// released before: a stale identifier may already name a different
/// segment.
#[allow(unsafe_code)]
pub unsafe fn release_on<H: ShmHost>(host: &H, id: SegmentId, addr: NonNull<u8>) {
    // SAFETY: forwarded from this function's contract.
    let (detach, remove) = unsafe { release_steps(host, id, Some(addr)) };
    if detach.is_none() && remove.is_none() {
        debug!(%id, "released shared memory segment");
    }
}

/// Run both release steps and log each failure. Returns the failures so
/// that callers needing them can build a [`ShmError::Release`].
///
/// # Safety
///
/// If `addr` is given it must not be used after this call.
#[allow(unsafe_code)]
pub(crate) unsafe fn release_steps<H: ShmHost>(
    host: &H,
    id: SegmentId,
    addr: Option<NonNull<u8>>,
) -> (Option<std::io::Error>, Option<std::io::Error>) {
    let detach = addr.and_then(|addr| unsafe { host.unmap(addr) }.err());
    if let Some(e) = &detach {
        warn!(%id, error = %e, "failed to detach shared memory segment");
    }

    let remove = host.mark_for_removal(id).err();
    if let Some(e) = &remove {
        warn!(
            %id,
            error = %e,
            "failed to mark shared memory segment for removal; it may leak until removed by hand"
        );
    }

    (detach, remove)
}

#[cfg(test)]
#[allow(clippy::expect_used, unsafe_code)]
mod tests {
    use super::*;
    use crate::host::MemoryHost;

    #[test]
    fn test_create_attach_release_on_memory_host() {
        let host = MemoryHost::new();
        let id = create_on(&host, 4096, SegmentMode::WORLD).expect("create");
        assert!(id.raw() >= 0);

        let p1 = attach_on(&host, id).expect("attach");
        let p2 = attach_on(&host, id).expect("second attach");
        unsafe {
            p1.as_ptr().write(0xAB);
            assert_eq!(p2.as_ptr().read(), 0xAB);
        }

        unsafe { release_on(&host, id, p1) };
        // Marked but still held by p2
        assert!(host.contains(id));
        unsafe { release_on(&host, id, p2) };
        assert!(!host.contains(id));

        let err = attach_on(&host, id).expect_err("destroyed");
        assert!(matches!(err, ShmError::Attach { .. }));
        assert_eq!(err.raw_os_error(), Some(22));
    }

    #[test]
    fn test_create_zero_is_allocation_error() {
        let host = MemoryHost::new();
        let err = create_on(&host, 0, SegmentMode::WORLD).expect_err("zero size");
        assert!(matches!(err, ShmError::Allocation { size: 0, .. }));
        assert_eq!(err.raw_os_error(), Some(22));
    }

    #[test]
    fn test_release_attempts_removal_after_failed_detach() {
        let host = MemoryHost::new();
        let id = create_on(&host, 8, SegmentMode::WORLD).expect("create");
        let mut bogus = 0u8;

        let (detach, remove) = unsafe { release_steps(&host, id, Some(NonNull::from(&mut bogus))) };
        assert!(detach.is_some());
        assert!(remove.is_none());
        assert!(!host.contains(id));
    }
}
