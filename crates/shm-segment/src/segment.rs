//! Owning segment handle.
//!
//! A [`Segment`] binds a host, a segment identifier, the segment size and
//! the current mapping together, and tracks where it is in the lifecycle:
//!
//! ```text
//!            attach            release
//! Created ----------> Attached ---------> Released
//!    ^                   |                   ^
//!    +------ detach -----+                   |
//!    +-------------------- release ----------+
//! ```
//!
//! Operations on the wrong state return [`ShmError::InvalidState`] instead
//! of reaching the host, so a segment is released at most once and a
//! mapping is never handed out after its detach.
//!
//! A segment obtained from `create*` is *owned*: dropping it releases the
//! segment. One obtained from `open*` is *borrowed*: dropping it only
//! detaches, leaving the segment to its creator.

use std::fmt;
use std::ptr::NonNull;
use std::slice;

use tracing::{debug, warn};

use crate::config::SegmentConfig;
#[cfg(unix)]
use crate::host::SysV;
use crate::error::{Result, ShmError};
use crate::host::{SegmentInfo, ShmHost};
use crate::id::SegmentId;
use crate::raw;

/// Lifecycle state of a [`Segment`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SegmentState {
    /// The segment exists; this handle holds no mapping.
    Created,
    /// This handle holds a mapping at the given base address.
    Attached(NonNull<u8>),
    /// Detached and marked for removal. Terminal.
    Released,
}

impl SegmentState {
    /// Short lowercase name, used in error messages.
    pub const fn name(self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Attached(_) => "attached",
            Self::Released => "released",
        }
    }
}

impl fmt::Display for SegmentState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A shared memory segment with guaranteed single release.
#[derive(Debug)]
pub struct Segment<H: ShmHost> {
    host: H,
    id: SegmentId,
    size: usize,
    owned: bool,
    state: SegmentState,
}

// SAFETY: the mapping points at host-managed shared memory, not at memory
// tied to the creating thread. Moving the handle across threads is fine;
// shared access to the bytes needs coordination above this crate anyway.
#[allow(unsafe_code)]
unsafe impl<H: ShmHost + Send> Send for Segment<H> {}

#[cfg(unix)]
impl Segment<SysV> {
    /// Create a kernel segment of `size` bytes with the default
    /// configuration.
    pub fn create(size: u32) -> Result<Self> {
        Self::create_with(SysV, &SegmentConfig::default(), size)
    }

    /// Create a kernel segment with an explicit configuration.
    pub fn create_with_config(config: &SegmentConfig, size: u32) -> Result<Self> {
        Self::create_with(SysV, config, size)
    }

    /// Create a kernel segment, attach it and zero its bytes.
    pub fn zeroed(size: u32) -> Result<Self> {
        Self::zeroed_with(SysV, size)
    }

    /// Borrow a kernel segment created elsewhere.
    pub fn open(id: SegmentId) -> Result<Self> {
        Self::open_with(SysV, id)
    }
}

impl<H: ShmHost> Segment<H> {
    /// Create an owned segment on `host`.
    ///
    /// With [`SegmentConfig::zero_fill`] the segment is returned attached
    /// and zeroed. If anything after the allocation fails, the segment is
    /// released before the error is returned.
    pub fn create_with(host: H, config: &SegmentConfig, size: u32) -> Result<Self> {
        let id = raw::create_on(&host, size, config.mode)?;
        let mut segment = Self {
            host,
            id,
            size: size as usize,
            owned: true,
            state: SegmentState::Created,
        };

        if config.zero_fill {
            segment.attach()?;
            segment.as_mut_slice()?.fill(0);
        }

        Ok(segment)
    }

    /// Create an owned segment on `host`, attach it and zero its bytes.
    pub fn zeroed_with(host: H, size: u32) -> Result<Self> {
        let config = SegmentConfig::default().with_zero_fill(true);
        Self::create_with(host, &config, size)
    }

    /// Borrow a segment created by another handle or process.
    ///
    /// The size is taken from the host, so the mapped slice always matches
    /// the segment.
    pub fn open_with(host: H, id: SegmentId) -> Result<Self> {
        let info = host.stat(id).map_err(|source| ShmError::Stat { id, source })?;
        debug!(%id, size = info.size, "opened shared memory segment");
        Ok(Self {
            host,
            id,
            size: info.size,
            owned: false,
            state: SegmentState::Created,
        })
    }

    /// Segment identifier, to hand to cooperating processes.
    #[inline]
    pub const fn id(&self) -> SegmentId {
        self.id
    }

    /// Segment size in bytes.
    #[inline]
    pub const fn size(&self) -> usize {
        self.size
    }

    /// Current lifecycle state.
    #[inline]
    pub const fn state(&self) -> SegmentState {
        self.state
    }

    /// Whether dropping this handle releases the segment.
    #[inline]
    pub const fn is_owner(&self) -> bool {
        self.owned
    }

    /// Whether this handle currently holds a mapping.
    pub const fn is_attached(&self) -> bool {
        matches!(self.state, SegmentState::Attached(_))
    }

    /// The host this segment lives on.
    pub const fn host(&self) -> &H {
        &self.host
    }

    fn invalid(&self, operation: &'static str) -> ShmError {
        ShmError::InvalidState {
            id: self.id,
            operation,
            state: self.state.name(),
        }
    }

    /// Map the segment into this process.
    pub fn attach(&mut self) -> Result<NonNull<u8>> {
        match self.state {
            SegmentState::Created => {
                let addr = raw::attach_on(&self.host, self.id)?;
                self.state = SegmentState::Attached(addr);
                Ok(addr)
            }
            SegmentState::Attached(_) | SegmentState::Released => Err(self.invalid("attach")),
        }
    }

    /// Unmap this handle's mapping, leaving the segment alive.
    ///
    /// On failure the handle stays attached.
    #[allow(unsafe_code)]
    pub fn detach(&mut self) -> Result<()> {
        let SegmentState::Attached(addr) = self.state else {
            return Err(self.invalid("detach"));
        };

        // SAFETY: `&mut self` guarantees no slice borrowed from this handle
        // is alive, and the address is forgotten on success.
        unsafe { self.host.unmap(addr) }.map_err(|source| ShmError::Detach {
            id: self.id,
            source,
        })?;
        self.state = SegmentState::Created;
        debug!(id = %self.id, "detached shared memory segment");
        Ok(())
    }

    /// Detach (if attached) and mark the segment for removal.
    ///
    /// Both steps are always attempted and the handle ends up
    /// [`SegmentState::Released`] either way. A second call returns
    /// [`ShmError::InvalidState`].
    #[allow(unsafe_code)]
    pub fn release(&mut self) -> Result<()> {
        let addr = match self.state {
            SegmentState::Created => None,
            SegmentState::Attached(addr) => Some(addr),
            SegmentState::Released => return Err(self.invalid("release")),
        };
        self.state = SegmentState::Released;

        // SAFETY: the state is already `Released`, so the address can no
        // longer be reached through this handle.
        let (detach, remove) = unsafe { raw::release_steps(&self.host, self.id, addr) };
        if detach.is_some() || remove.is_some() {
            return Err(ShmError::Release {
                id: self.id,
                detach,
                remove,
            });
        }

        debug!(id = %self.id, "released shared memory segment");
        Ok(())
    }

    /// Give up ownership without destroying the segment.
    ///
    /// Detaches if attached and returns the identifier; the segment stays
    /// in the host table until someone releases it.
    pub fn persist(mut self) -> Result<SegmentId> {
        match self.state {
            SegmentState::Released => return Err(self.invalid("persist")),
            SegmentState::Attached(_) => self.detach()?,
            SegmentState::Created => {}
        }
        self.owned = false;
        debug!(id = %self.id, "persisting shared memory segment");
        Ok(self.id)
    }

    /// Base address of this handle's mapping.
    pub fn as_ptr(&self) -> Result<NonNull<u8>> {
        match self.state {
            SegmentState::Attached(addr) => Ok(addr),
            SegmentState::Created | SegmentState::Released => Err(self.invalid("access")),
        }
    }

    /// The mapped bytes.
    ///
    /// Other handles and processes may write the same bytes concurrently;
    /// coordinating that is up to the data layout placed in the segment.
    #[allow(unsafe_code)]
    pub fn as_slice(&self) -> Result<&[u8]> {
        let addr = self.as_ptr()?;
        // SAFETY: the mapping covers `size` bytes and stays mapped while
        // the returned borrow of `self` lives.
        Ok(unsafe { slice::from_raw_parts(addr.as_ptr(), self.size) })
    }

    /// The mapped bytes, mutably.
    #[allow(unsafe_code)]
    pub fn as_mut_slice(&mut self) -> Result<&mut [u8]> {
        let addr = self.as_ptr()?;
        // SAFETY: as in `as_slice`; `&mut self` rules out other slices from
        // this handle.
        Ok(unsafe { slice::from_raw_parts_mut(addr.as_ptr(), self.size) })
    }

    /// Query the host status of the segment.
    pub fn info(&self) -> Result<SegmentInfo> {
        if self.state == SegmentState::Released {
            return Err(self.invalid("stat"));
        }
        self.host
            .stat(self.id)
            .map_err(|source| ShmError::Stat { id: self.id, source })
    }
}

impl<H: ShmHost> Drop for Segment<H> {
    fn drop(&mut self) {
        if self.owned {
            if self.state != SegmentState::Released {
                // Failures are already logged by the release steps
                let _ = self.release();
            }
        } else if self.is_attached() {
            if let Err(e) = self.detach() {
                warn!(id = %self.id, error = %e, "failed to detach borrowed segment on drop");
            }
        }
    }
}
