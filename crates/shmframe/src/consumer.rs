//! Consumer side of the handoff protocol.
//!
//! External consumers implement the same loop in whatever language they are
//! written in:
//!
//! ```text
//! open(name, 1 + frame_size)
//! loop {
//!     if byte[0] == 0x00 {
//!         copy byte[1..]
//!         byte[0] = 0xFF
//!     }
//! }
//! ```
//!
//! [`FrameReader`] is that loop body, used by in-tree consumers and tests.

use std::sync::atomic::Ordering;

use crate::channel::{status_byte, HEADER_LEN, STATUS_EMPTY, STATUS_FULL};
use crate::error::ShmError;
use crate::segment::{Backend, PlatformBackend, SharedSegment};

/// Attached to a producer's frame segment.
///
/// Dropping the reader unmaps the segment but never removes its name.
#[derive(Debug)]
pub struct FrameReader<B: Backend = PlatformBackend> {
    segment: SharedSegment<B>,
}

impl<B: Backend> FrameReader<B> {
    /// Open the segment named `name` carrying `payload_size` bytes of pixels.
    pub fn open(name: &str, payload_size: usize) -> Result<Self, ShmError> {
        let total = payload_size.saturating_add(HEADER_LEN);
        let segment = SharedSegment::open(name, total)?;
        Ok(Self { segment })
    }

    /// Take the waiting frame, if any.
    ///
    /// On success `out` holds exactly the payload and the segment is marked
    /// empty so the producer can write the next frame.
    pub fn try_read(&mut self, out: &mut Vec<u8>) -> bool {
        let status = status_byte(&self.segment);
        if status.load(Ordering::Relaxed) != STATUS_FULL {
            return false;
        }

        let len = self.payload_size();
        out.clear();
        out.reserve(len);
        // SAFETY: the segment maps HEADER_LEN + len bytes and `out` has room
        // for `len`. No reference covers the payload, which a peer may be
        // writing.
        unsafe {
            std::ptr::copy_nonoverlapping(
                self.segment.as_ptr().add(HEADER_LEN),
                out.as_mut_ptr(),
                len,
            );
            out.set_len(len);
        }
        status.store(STATUS_EMPTY, Ordering::Relaxed);
        true
    }

    /// Whether a frame is waiting.
    pub fn is_full(&self) -> bool {
        status_byte(&self.segment).load(Ordering::Relaxed) == STATUS_FULL
    }

    pub fn name(&self) -> &str {
        self.segment.name()
    }

    pub fn payload_size(&self) -> usize {
        self.segment.size() - HEADER_LEN
    }
}
