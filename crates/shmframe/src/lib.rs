//! shmframe: hand rendered frames to an external process through named
//! shared memory.
//!
//! # Quick Start
//!
//! The producer owns a [`FrameChannel`] and publishes packed BGRA frames:
//!
//! ```no_run
//! use shmframe::{FrameChannel, Publish, RandomNames};
//!
//! let mut channel: FrameChannel<_> = FrameChannel::new(RandomNames::from_entropy());
//! let frame = vec![0u8; 640 * 480 * 4];
//! match channel.publish(&frame)? {
//!     Publish::Delivered => {}
//!     Publish::Dropped => { /* consumer still busy with the last one */ }
//! }
//! // Tell the consumer where to look.
//! println!("{}", channel.current_name());
//! # Ok::<(), shmframe::ShmError>(())
//! ```
//!
//! The consumer attaches with [`FrameReader`] (or its own implementation of
//! the same loop) using the name and frame size it was told:
//!
//! ```no_run
//! use shmframe::FrameReader;
//!
//! let mut reader: FrameReader = FrameReader::open("1234567890osr", 640 * 480 * 4)?;
//! let mut frame = Vec::new();
//! if reader.try_read(&mut frame) {
//!     // `frame` holds the pixels; the producer may write the next one.
//! }
//! # Ok::<(), shmframe::ShmError>(())
//! ```
//!
//! # Segment layout
//!
//! ```text
//! offset 0      status byte   0xFF = empty (producer may write)
//!                             0x00 = full  (consumer may read)
//! offset 1..    width * height * 4 bytes of pixels
//! ```
//!
//! A size change moves the channel to a new segment under a new name; the old
//! one is unlinked. Consumers learn the new name out of band.
//!
//! # Producers
//!
//! - [`CaptureConsumer`] adapts an upstream capturer that delivers strided
//!   frames.
//! - [`LayeredUpdater`] adapts a compositor that paints into its own canvas.
//!
//! # Errors
//!
//! Every failure is a [`ShmError`]. [`ShmStatus`] maps results onto the
//! numeric codes reported across process boundaries:
//!
//! ```
//! use shmframe::ShmStatus;
//!
//! assert_eq!(ShmStatus::Ok.code(), 0);
//! assert_eq!(ShmStatus::OpeningFailed.code(), 120);
//! ```

#![forbid(unsafe_op_in_unsafe_fn)]

mod capture;
mod channel;
mod config;
mod consumer;
mod error;
mod geometry;
mod name;
mod updater;

pub mod segment;

pub use capture::{CaptureConsumer, CaptureControl, CaptureOutcome, CapturedFrame};
pub use channel::{FrameChannel, Publish, HEADER_LEN, STATUS_EMPTY, STATUS_FULL};
pub use config::{CaptureConfig, ChannelConfig};
pub use consumer::FrameReader;
pub use error::{ShmError, ShmStatus};
pub use geometry::{PixelSize, Rect, BYTES_PER_PIXEL};
pub use name::{NameSource, RandomNames};
pub use segment::{Backend, PlatformBackend, SharedSegment};
pub use updater::LayeredUpdater;
