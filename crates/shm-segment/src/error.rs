//! Error types for segment lifecycle operations

use std::io;

use thiserror::Error;

use crate::id::SegmentId;

/// Errors that can occur while creating, mapping, releasing or querying a
/// shared memory segment.
///
/// Host failures keep the `errno` reported by the kernel; use
/// [`ShmError::raw_os_error`] to get at it.
#[derive(Debug, Error)]
pub enum ShmError {
    /// The host refused to allocate a segment.
    #[error("failed to allocate {size}-byte segment: {source}")]
    Allocation {
        /// Requested size in bytes
        size: u32,
        /// Host error
        #[source]
        source: io::Error,
    },

    /// The host refused to map a segment. No address was produced.
    #[error("failed to attach segment {id}: {source}")]
    Attach {
        /// Segment that could not be mapped
        id: SegmentId,
        /// Host error
        #[source]
        source: io::Error,
    },

    /// The host refused to unmap a mapping. The mapping is still held.
    #[error("failed to detach segment {id}: {source}")]
    Detach {
        /// Segment whose mapping could not be removed
        id: SegmentId,
        /// Host error
        #[source]
        source: io::Error,
    },

    /// Detaching or marking for removal failed during release.
    ///
    /// Both steps are always attempted; each field holds the failure of the
    /// corresponding step, if any.
    #[error("failed to release segment {id}: {}", describe_release(.detach.as_ref(), .remove.as_ref()))]
    Release {
        /// Segment being released
        id: SegmentId,
        /// Failure of the unmap step
        detach: Option<io::Error>,
        /// Failure of the mark-for-removal step
        remove: Option<io::Error>,
    },

    /// The operation is not valid in the segment's current lifecycle state.
    #[error("cannot {operation} segment {id} in state {state}")]
    InvalidState {
        /// Segment the operation was attempted on
        id: SegmentId,
        /// Operation that was rejected
        operation: &'static str,
        /// Name of the current state
        state: &'static str,
    },

    /// Querying the segment status failed.
    #[error("failed to stat segment {id}: {source}")]
    Stat {
        /// Segment being queried
        id: SegmentId,
        /// Host error
        #[source]
        source: io::Error,
    },

    /// Permission bits outside `0o777`.
    #[error("invalid permission bits {0:#o}")]
    InvalidMode(u32),
}

fn describe_release(detach: Option<&io::Error>, remove: Option<&io::Error>) -> String {
    match (detach, remove) {
        (Some(d), Some(r)) => format!("detach: {d}; remove: {r}"),
        (Some(d), None) => format!("detach: {d}"),
        (None, Some(r)) => format!("remove: {r}"),
        (None, None) => "no error".to_string(),
    }
}

impl ShmError {
    /// The host `errno` behind this error, if it came from the host.
    ///
    /// For [`ShmError::Release`] the detach failure wins over the removal
    /// failure.
    pub fn raw_os_error(&self) -> Option<i32> {
        match self {
            Self::Allocation { source, .. }
            | Self::Attach { source, .. }
            | Self::Detach { source, .. }
            | Self::Stat { source, .. } => source.raw_os_error(),
            Self::Release { detach, remove, .. } => detach
                .as_ref()
                .or(remove.as_ref())
                .and_then(io::Error::raw_os_error),
            Self::InvalidState { .. } | Self::InvalidMode(_) => None,
        }
    }

    /// Whether this is a lifecycle misuse rather than a host failure.
    pub const fn is_invalid_state(&self) -> bool {
        matches!(self, Self::InvalidState { .. })
    }
}

/// Result type for segment operations.
pub type Result<T> = std::result::Result<T, ShmError>;
