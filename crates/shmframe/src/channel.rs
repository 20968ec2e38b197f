//! Producer side of the frame handoff protocol.
//!
//! # Layout
//!
//! ```text
//! ┌────────┬──────────────────────────────────────────────┐
//! │ status │ payload: frame_size bytes, row-major pixels  │
//! │ 1 byte │                                              │
//! └────────┴──────────────────────────────────────────────┘
//!   0xFF  empty: the consumer has taken the last frame
//!   0x00  full:  a frame is waiting to be read
//! ```
//!
//! # Protocol
//!
//! The producer only writes a frame into an empty segment, and marks it full
//! *before* copying the payload. The consumer copies the payload out and then
//! marks the segment empty. A frame published while the segment is still full
//! is dropped.
//!
//! The flag is advisory. There is no fence between the flag store and the
//! payload copy, and no acknowledgement beyond the flag itself, so a consumer
//! polling at the wrong moment can observe "full" with a payload that is
//! still being written.
//!
//! When the frame size changes the segment is torn down and a new one is
//! created under a new name. The consumer must learn the new name out of
//! band through [`FrameChannel::current_name`].

use std::fmt;
use std::io;
use std::sync::atomic::{AtomicU8, Ordering};

use crate::config::ChannelConfig;
use crate::error::ShmError;
use crate::name::NameSource;
use crate::segment::{Backend, PlatformBackend, SharedSegment};

/// Status byte value: no unread frame.
pub const STATUS_EMPTY: u8 = 0xFF;
/// Status byte value: a frame is waiting for the consumer.
pub const STATUS_FULL: u8 = 0x00;
/// Bytes in front of the payload.
pub const HEADER_LEN: usize = 1;

/// Draws allowed before giving up on getting a name that differs from the
/// segment being replaced.
const NAME_ATTEMPTS: usize = 8;

/// What happened to a published frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Publish {
    /// Copied into the segment and marked full.
    Delivered,
    /// The previous frame was still unread; this one was discarded.
    Dropped,
}

/// Owns the producer's segment and runs the handoff protocol.
///
/// The segment is created lazily by the first [`publish`](Self::publish) and
/// torn down (unlinking its name) when the channel is dropped.
pub struct FrameChannel<N, B: Backend = PlatformBackend> {
    segment: Option<SharedSegment<B>>,
    /// Payload size the current segment was built for.
    frame_size: usize,
    names: N,
    config: ChannelConfig,
}

impl<N: NameSource, B: Backend> FrameChannel<N, B> {
    /// Channel drawing segment names from `names`.
    pub fn new(names: N) -> Self {
        Self::with_config(names, ChannelConfig::default())
    }

    pub fn with_config(names: N, config: ChannelConfig) -> Self {
        Self {
            segment: None,
            frame_size: 0,
            names,
            config,
        }
    }

    /// Hand `pixels` to the consumer if it has drained the previous frame.
    ///
    /// A size change first replaces the segment. If that fails the channel is
    /// left without a segment, the frame is skipped, and the next call tries
    /// again.
    pub fn publish(&mut self, pixels: &[u8]) -> Result<Publish, ShmError> {
        let segment = self.ensure_segment(pixels.len())?;
        let status = status_byte(segment);

        if status.load(Ordering::Relaxed) != STATUS_EMPTY {
            tracing::trace!(name = %segment.name(), "consumer has not drained, dropping frame");
            return Ok(Publish::Dropped);
        }

        status.store(STATUS_FULL, Ordering::Relaxed);
        // SAFETY: the segment maps HEADER_LEN + pixels.len() bytes, and
        // `pixels` lives in this process's private memory.
        unsafe {
            std::ptr::copy_nonoverlapping(
                pixels.as_ptr(),
                segment.as_ptr().add(HEADER_LEN),
                pixels.len(),
            );
        }
        Ok(Publish::Delivered)
    }

    /// Name of the active segment, or `""` before the first frame.
    pub fn current_name(&self) -> &str {
        self.segment.as_ref().map_or("", |s| s.name())
    }

    /// The active segment, if any.
    pub fn segment(&self) -> Option<&SharedSegment<B>> {
        self.segment.as_ref()
    }

    /// Payload size of the active segment.
    pub fn frame_size(&self) -> Option<usize> {
        self.segment.as_ref().map(|_| self.frame_size)
    }

    /// Current status byte of the active segment.
    pub fn status(&self) -> Option<u8> {
        self.segment
            .as_ref()
            .map(|s| status_byte(s).load(Ordering::Relaxed))
    }

    pub fn config(&self) -> &ChannelConfig {
        &self.config
    }

    /// Tear down the active segment now.
    ///
    /// The next publish creates a fresh one under a new name.
    pub fn reset(&mut self) {
        if let Some(segment) = self.segment.take() {
            segment.close();
        }
    }

    fn ensure_segment(&mut self, frame_size: usize) -> Result<&mut SharedSegment<B>, ShmError> {
        let segment = match self.segment.take() {
            Some(segment) if self.frame_size == frame_size => segment,
            previous => self.replace(previous, frame_size)?,
        };
        Ok(self.segment.insert(segment))
    }

    fn replace(
        &mut self,
        previous: Option<SharedSegment<B>>,
        frame_size: usize,
    ) -> Result<SharedSegment<B>, ShmError> {
        let previous_name = previous.map(|old| {
            let name = old.name().to_owned();
            old.close();
            name
        });

        let total = frame_size.checked_add(HEADER_LEN).ok_or_else(|| {
            ShmError::creation(
                previous_name.as_deref().unwrap_or_default(),
                io::Error::new(io::ErrorKind::InvalidInput, "frame size overflows"),
            )
        })?;

        let segment = self.allocate(total, previous_name.as_deref())?;
        status_byte(&segment).store(STATUS_EMPTY, Ordering::Relaxed);
        self.frame_size = frame_size;

        tracing::debug!(
            name = %segment.name(),
            previous = previous_name.as_deref().unwrap_or(""),
            frame_size,
            "frame segment refreshed"
        );
        Ok(segment)
    }

    /// Create a segment under a fresh name different from `previous`.
    fn allocate(
        &mut self,
        total: usize,
        previous: Option<&str>,
    ) -> Result<SharedSegment<B>, ShmError> {
        for _ in 0..NAME_ATTEMPTS {
            let name = format!("{}{}", self.names.next_name(), self.config.name_suffix);
            if previous.is_some() && B::os_name(&name).ok().as_deref() == previous {
                continue;
            }
            return SharedSegment::create(&name, total);
        }
        Err(ShmError::creation(
            previous.unwrap_or_default(),
            io::Error::new(
                io::ErrorKind::AlreadyExists,
                "name source kept repeating the previous segment name",
            ),
        ))
    }
}

impl<N, B: Backend> fmt::Debug for FrameChannel<N, B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FrameChannel")
            .field("segment", &self.segment)
            .field("frame_size", &self.frame_size)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

/// The status byte of a frame segment.
///
/// Accessed with `Relaxed` ordering only. The protocol makes no ordering
/// promise between the flag and the payload.
pub(crate) fn status_byte<B: Backend>(segment: &SharedSegment<B>) -> &AtomicU8 {
    // SAFETY: every frame segment holds at least HEADER_LEN bytes, AtomicU8
    // has the alignment of u8, and the byte lives as long as the segment.
    unsafe { &*segment.as_ptr().cast::<AtomicU8>() }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consumer::FrameReader;

    type Reader = FrameReader<PlatformBackend>;

    /// Names unique to this process and call, so parallel tests never collide
    /// in the OS namespace.
    struct Unique(&'static str, u32);

    impl NameSource for Unique {
        fn next_name(&mut self) -> String {
            self.1 += 1;
            format!("chan{}{}x{}", self.0, std::process::id(), self.1)
        }
    }

    /// Always the same name.
    struct Stuck(String);

    impl NameSource for Stuck {
        fn next_name(&mut self) -> String {
            self.0.clone()
        }
    }

    /// Hands out a fixed sequence of names.
    struct Script(std::collections::VecDeque<String>);

    impl NameSource for Script {
        fn next_name(&mut self) -> String {
            self.0.pop_front().unwrap_or_default()
        }
    }

    fn channel(tag: &'static str) -> FrameChannel<Unique> {
        FrameChannel::new(Unique(tag, 0))
    }

    #[test]
    fn absent_until_first_frame() {
        let channel = channel("absent");
        assert_eq!(channel.current_name(), "");
        assert!(channel.segment().is_none());
        assert_eq!(channel.frame_size(), None);
        assert_eq!(channel.status(), None);
    }

    #[test]
    fn first_frame_is_delivered() {
        let mut channel = channel("first");
        let outcome = channel.publish(&[0xAA; 100]).unwrap();

        assert_eq!(outcome, Publish::Delivered);
        let segment = channel.segment().unwrap();
        assert_eq!(segment.size(), 101);
        assert_eq!(segment.as_slice()[0], STATUS_FULL);
        assert!(segment.as_slice()[1..].iter().all(|&b| b == 0xAA));
        assert_eq!(channel.frame_size(), Some(100));
        assert!(channel.current_name().ends_with("osr"));
    }

    #[test]
    fn full_segment_drops_frames() {
        let mut channel = channel("full");
        channel.publish(&[1; 16]).unwrap();

        let outcome = channel.publish(&[2; 16]).unwrap();
        assert_eq!(outcome, Publish::Dropped);

        let segment = channel.segment().unwrap();
        assert_eq!(segment.as_slice()[0], STATUS_FULL);
        assert!(segment.as_slice()[1..].iter().all(|&b| b == 1));
    }

    #[test]
    fn drained_segment_accepts_next_frame() {
        let mut channel = channel("drain");
        channel.publish(&[1; 16]).unwrap();
        let name = channel.current_name().to_owned();

        let mut reader = Reader::open(&name, 16).unwrap();
        let mut out = Vec::new();
        assert!(reader.try_read(&mut out));
        assert_eq!(out, vec![1; 16]);
        assert_eq!(channel.status(), Some(STATUS_EMPTY));

        assert_eq!(channel.publish(&[3; 16]).unwrap(), Publish::Delivered);
        assert_eq!(channel.current_name(), name);
        assert!(reader.try_read(&mut out));
        assert_eq!(out, vec![3; 16]);
    }

    #[test]
    fn resize_replaces_segment_under_new_name() {
        let mut channel = channel("resize");
        channel.publish(&[0xAA; 100]).unwrap();
        let old_name = channel.current_name().to_owned();

        channel.publish(&[0x55; 200]).unwrap();
        let segment = channel.segment().unwrap();
        assert_eq!(segment.size(), 201);
        assert_ne!(segment.name(), old_name);
        assert_eq!(segment.as_slice()[0], STATUS_FULL);
        assert!(segment.as_slice()[1..].iter().all(|&b| b == 0x55));

        assert!(Reader::open(&old_name, 100).is_err());
    }

    #[test]
    fn resize_delivers_even_if_old_frame_unread() {
        let mut channel = channel("unread");
        channel.publish(&[1; 8]).unwrap();
        // Never drained, but the new segment starts empty.
        assert_eq!(channel.publish(&[2; 9]).unwrap(), Publish::Delivered);
    }

    #[test]
    fn repeated_name_is_skipped_on_resize() {
        let a = format!("repeatA{}", std::process::id());
        let b = format!("repeatB{}", std::process::id());
        let script = Script(vec![a.clone(), a.clone(), b.clone()].into());

        let mut channel = FrameChannel::<_, PlatformBackend>::new(script);
        channel.publish(&[0; 4]).unwrap();
        assert!(channel.current_name().contains(&a));

        channel.publish(&[0; 5]).unwrap();
        assert!(channel.current_name().contains(&b));
    }

    #[test]
    fn stuck_name_source_fails_resize_and_recovers() {
        let stem = format!("stuck{}", std::process::id());
        let mut channel = FrameChannel::<_, PlatformBackend>::new(Stuck(stem));
        channel.publish(&[0; 4]).unwrap();

        let err = channel.publish(&[0; 8]).unwrap_err();
        assert_eq!(err.status(), crate::ShmStatus::CreationFailed);
        assert!(channel.segment().is_none());
        assert_eq!(channel.current_name(), "");

        // No previous segment any more, so the same name is acceptable again.
        assert_eq!(channel.publish(&[0; 8]).unwrap(), Publish::Delivered);
    }

    #[test]
    fn reset_unlinks_and_renames() {
        let mut channel = channel("reset");
        channel.publish(&[7; 4]).unwrap();
        let name = channel.current_name().to_owned();

        channel.reset();
        assert_eq!(channel.current_name(), "");
        assert!(Reader::open(&name, 4).is_err());

        channel.publish(&[7; 4]).unwrap();
        assert_ne!(channel.current_name(), name);
    }

    #[test]
    fn drop_unlinks_segment() {
        let mut channel = channel("drop");
        channel.publish(&[7; 4]).unwrap();
        let name = channel.current_name().to_owned();
        drop(channel);

        assert!(Reader::open(&name, 4).is_err());
    }

    #[test]
    fn custom_suffix_is_appended() {
        let config = ChannelConfig {
            name_suffix: "frames".to_owned(),
        };
        let names = Unique("suffix", 0);
        let mut channel = FrameChannel::<_, PlatformBackend>::with_config(names, config);
        channel.publish(&[0; 4]).unwrap();
        assert!(channel.current_name().ends_with("frames"));
        assert_eq!(channel.config().name_suffix, "frames");
    }
}
