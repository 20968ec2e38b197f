//! Segment errors and their status codes.

use std::io;

use thiserror::Error;

/// Failure to create, open or map a named segment.
///
/// Every variant is local and recoverable: a producer that gets one of these
/// skips the frame it was publishing and carries on.
#[derive(Debug, Error)]
pub enum ShmError {
    /// Allocating the backing store, fixing its length, or mapping it failed.
    #[error("failed to create shared memory segment {name:?}: {source}")]
    CreationFailed {
        name: String,
        #[source]
        source: io::Error,
    },

    /// The backing store exists but could not be mapped into this process.
    #[error("failed to map shared memory segment {name:?}: {source}")]
    MappingFailed {
        name: String,
        #[source]
        source: io::Error,
    },

    /// The named segment does not exist or cannot be opened.
    #[error("failed to open shared memory segment {name:?}: {source}")]
    OpeningFailed {
        name: String,
        #[source]
        source: io::Error,
    },
}

impl ShmError {
    pub(crate) fn creation(name: &str, source: io::Error) -> Self {
        ShmError::CreationFailed {
            name: name.to_owned(),
            source,
        }
    }

    pub(crate) fn mapping(name: &str, source: io::Error) -> Self {
        ShmError::MappingFailed {
            name: name.to_owned(),
            source,
        }
    }

    pub(crate) fn opening(name: &str, source: io::Error) -> Self {
        ShmError::OpeningFailed {
            name: name.to_owned(),
            source,
        }
    }

    /// Status code for this error.
    pub fn status(&self) -> ShmStatus {
        match self {
            ShmError::CreationFailed { .. } => ShmStatus::CreationFailed,
            ShmError::MappingFailed { .. } => ShmStatus::MappingFailed,
            ShmError::OpeningFailed { .. } => ShmStatus::OpeningFailed,
        }
    }

    /// Name of the segment the operation was attempted on.
    pub fn name(&self) -> &str {
        match self {
            ShmError::CreationFailed { name, .. }
            | ShmError::MappingFailed { name, .. }
            | ShmError::OpeningFailed { name, .. } => name,
        }
    }
}

/// Numeric result codes, stable across the process boundary.
///
/// Collaborators that relay segment state to a consumer over their own IPC
/// report these values rather than the `Display` text of [`ShmError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum ShmStatus {
    Ok = 0,
    CreationFailed = 100,
    MappingFailed = 110,
    OpeningFailed = 120,
}

impl ShmStatus {
    /// Collapse an operation result into its status code.
    pub fn of<T>(result: &Result<T, ShmError>) -> Self {
        match result {
            Ok(_) => ShmStatus::Ok,
            Err(e) => e.status(),
        }
    }

    /// The raw code.
    #[inline]
    pub fn code(self) -> i32 {
        self as i32
    }
}

impl From<&ShmError> for ShmStatus {
    fn from(e: &ShmError) -> Self {
        e.status()
    }
}
