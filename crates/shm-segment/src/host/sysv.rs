//! System V shared memory via `shmget` / `shmat`.
//!
//! Segments are created with `IPC_PRIVATE`, so they have no key and are
//! only reachable through their identifier. Linux keeps a segment alive
//! after `IPC_RMID` until its last detach, and still allows `shmat` on it
//! in that window.

use std::io;
use std::mem;
use std::ptr::{self, NonNull};

use libc::{IPC_CREAT, IPC_PRIVATE, IPC_RMID, IPC_STAT};
use libc::{c_int, c_void, size_t};
use libc::{shmat, shmctl, shmdt, shmget};

use super::{SegmentInfo, ShmHost};
use crate::config::SegmentMode;
use crate::id::SegmentId;

/// `shm_perm.mode` flag set once a segment is marked for removal.
#[cfg(target_os = "linux")]
const SHM_DEST: u32 = 0o1000;

/// The kernel's System V shared memory facility.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SysV;

impl ShmHost for SysV {
    #[allow(unsafe_code)]
    fn allocate(&self, size: u32, mode: SegmentMode) -> io::Result<SegmentId> {
        let perms = c_int::try_from(mode.bits())
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
        let size = size_t::try_from(size)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;

        let raw = unsafe { shmget(IPC_PRIVATE, size, IPC_CREAT | perms) };
        if raw == -1 {
            return Err(io::Error::last_os_error());
        }

        SegmentId::from_raw(raw)
            .ok_or_else(|| io::Error::other(format!("shmget returned invalid id {raw}")))
    }

    #[allow(unsafe_code)]
    fn map(&self, id: SegmentId) -> io::Result<NonNull<u8>> {
        let addr = unsafe { shmat(id.raw(), ptr::null(), 0) };

        // shmat signals failure with (void *) -1
        if addr.addr() == usize::MAX {
            return Err(io::Error::last_os_error());
        }

        NonNull::new(addr.cast::<u8>())
            .ok_or_else(|| io::Error::other("shmat returned a null address"))
    }

    #[allow(unsafe_code)]
    unsafe fn unmap(&self, addr: NonNull<u8>) -> io::Result<()> {
        let rc = unsafe { shmdt(addr.as_ptr().cast::<c_void>().cast_const()) };
        if rc == -1 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }

    #[allow(unsafe_code)]
    fn mark_for_removal(&self, id: SegmentId) -> io::Result<()> {
        let rc = unsafe { shmctl(id.raw(), IPC_RMID, ptr::null_mut()) };
        if rc == -1 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }

    #[allow(unsafe_code)]
    fn stat(&self, id: SegmentId) -> io::Result<SegmentInfo> {
        let mut ds: libc::shmid_ds = unsafe { mem::zeroed() };
        if unsafe { shmctl(id.raw(), IPC_STAT, &raw mut ds) } == -1 {
            return Err(io::Error::last_os_error());
        }

        let raw_mode = u32::from(ds.shm_perm.mode);

        #[cfg(target_os = "linux")]
        let marked_for_removal = raw_mode & SHM_DEST != 0;
        #[cfg(not(target_os = "linux"))]
        let marked_for_removal = false;

        Ok(SegmentInfo {
            id,
            size: ds.shm_segsz as usize,
            attach_count: u64::try_from(ds.shm_nattch).unwrap_or(u64::MAX),
            mode: SegmentMode::new(raw_mode & 0o777).unwrap_or_default(),
            creator_pid: ds.shm_cpid,
            last_pid: ds.shm_lpid,
            marked_for_removal,
        })
    }
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::panic, unsafe_code)]
mod tests {
    use super::*;

    /// Allocate through the kernel, or `None` when the facility is disabled
    /// (sandboxes without an IPC namespace report `ENOSYS` or `EPERM`).
    fn try_allocate(size: u32) -> Option<SegmentId> {
        match SysV.allocate(size, SegmentMode::OWNER_ONLY) {
            Ok(id) => Some(id),
            Err(e) if matches!(e.raw_os_error(), Some(libc::ENOSYS | libc::EPERM)) => {
                eprintln!("skipping System V test (not available): {e}");
                None
            }
            Err(e) => panic!("shmget failed: {e}"),
        }
    }

    #[test]
    fn test_allocate_map_stat_remove() {
        let Some(id) = try_allocate(4096) else {
            return;
        };

        let addr = SysV.map(id).expect("map");
        unsafe {
            addr.as_ptr().write(0x5A);
            assert_eq!(addr.as_ptr().read(), 0x5A);
        }

        let info = SysV.stat(id).expect("stat");
        assert_eq!(info.id, id);
        assert_eq!(info.size, 4096);
        assert_eq!(info.attach_count, 1);
        assert_eq!(info.mode, SegmentMode::OWNER_ONLY);
        assert!(!info.marked_for_removal);
        assert_eq!(
            info.creator_pid,
            i32::try_from(std::process::id()).expect("pid fits")
        );

        SysV.mark_for_removal(id).expect("rmid");
        let info = SysV.stat(id).expect("stat after rmid");
        #[cfg(target_os = "linux")]
        assert!(info.marked_for_removal);
        assert_eq!(info.attach_count, 1);

        unsafe { SysV.unmap(addr) }.expect("unmap");
        assert!(SysV.map(id).is_err());
        assert!(SysV.stat(id).is_err());
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_zero_size_is_einval() {
        match SysV.allocate(0, SegmentMode::OWNER_ONLY) {
            Err(e) if matches!(e.raw_os_error(), Some(libc::ENOSYS | libc::EPERM)) => {
                eprintln!("skipping System V test (not available): {e}");
            }
            Err(e) => assert_eq!(e.raw_os_error(), Some(libc::EINVAL)),
            Ok(id) => {
                let _ = SysV.mark_for_removal(id);
                panic!("zero-size segment {id} was allocated");
            }
        }
    }

    #[test]
    fn test_unmap_unknown_address() {
        let mut local = 0u8;
        let err = unsafe { SysV.unmap(NonNull::from(&mut local)) }.expect_err("not a mapping");
        assert_eq!(err.raw_os_error(), Some(libc::EINVAL));
    }
}
