//! Producer fed by a compositor that paints into its own canvas.

use crate::channel::{FrameChannel, Publish};
use crate::geometry::{PixelSize, Rect};
use crate::name::NameSource;
use crate::segment::{Backend, PlatformBackend};

/// Publishes frames drawn by a layered compositor.
///
/// The compositor first announces the canvas size with
/// [`on_allocated`](Self::on_allocated), then calls [`draw`](Self::draw) with
/// the finished pixels for each frame.
#[derive(Debug)]
pub struct LayeredUpdater<N, B: Backend = PlatformBackend> {
    channel: FrameChannel<N, B>,
    /// Canvas size and its byte length, once a valid one has been announced.
    canvas: Option<(PixelSize, usize)>,
    active: bool,
}

impl<N: NameSource, B: Backend> LayeredUpdater<N, B> {
    /// Inactive updater with no canvas.
    pub fn new(channel: FrameChannel<N, B>) -> Self {
        Self {
            channel,
            canvas: None,
            active: false,
        }
    }

    /// The compositor allocated a canvas of `pixel_size`.
    ///
    /// Drops the current segment so the next frame is published under a new
    /// name. Returns `false` if the size cannot be represented, leaving the
    /// updater unbound until the next valid allocation.
    pub fn on_allocated(&mut self, pixel_size: PixelSize) -> bool {
        self.channel.reset();
        self.canvas = None;

        match pixel_size.byte_size() {
            Some(len) if !pixel_size.is_empty() => {
                tracing::debug!(size = ?pixel_size, len, "canvas allocated");
                self.canvas = Some((pixel_size, len));
                true
            }
            _ => {
                tracing::warn!(size = ?pixel_size, "rejecting canvas allocation");
                false
            }
        }
    }

    /// The compositor finished a frame.
    ///
    /// Publishes `pixels` and calls `on_paint` with the damage, pixels and
    /// canvas size. Does nothing while inactive, before a canvas is bound, or
    /// when `pixels` does not match the bound canvas. The returned value is
    /// what the channel made of the frame, if it got that far.
    pub fn draw<F>(&mut self, damage: Rect, pixels: &[u8], on_paint: F) -> Option<Publish>
    where
        F: FnOnce(Rect, &[u8], PixelSize),
    {
        if !self.active {
            return None;
        }
        let (size, len) = self.canvas?;
        if pixels.len() != len {
            tracing::warn!(
                expected = len,
                got = pixels.len(),
                "frame does not match canvas"
            );
            return None;
        }

        let published = match self.channel.publish(pixels) {
            Ok(publish) => Some(publish),
            Err(err) => {
                tracing::warn!("skipping frame: {err}");
                None
            }
        };
        on_paint(damage, pixels, size);
        published
    }

    pub fn set_active(&mut self, active: bool) {
        self.active = active;
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn canvas_size(&self) -> Option<PixelSize> {
        self.canvas.map(|(size, _)| size)
    }

    /// Name of the segment the consumer should attach to, or `""`.
    pub fn endpoint(&self) -> &str {
        self.channel.current_name()
    }

    pub fn channel(&self) -> &FrameChannel<N, B> {
        &self.channel
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consumer::FrameReader;

    type Reader = FrameReader<PlatformBackend>;

    struct Names(&'static str, u32);

    impl NameSource for Names {
        fn next_name(&mut self) -> String {
            self.1 += 1;
            format!("layered{}{}x{}", self.0, std::process::id(), self.1)
        }
    }

    fn updater(tag: &'static str) -> LayeredUpdater<Names> {
        let mut updater = LayeredUpdater::new(FrameChannel::new(Names(tag, 0)));
        updater.set_active(true);
        updater
    }

    #[test]
    fn draws_nothing_before_allocation() {
        let mut u = updater("unbound");
        let drawn = u.draw(Rect::new(0, 0, 1, 1), &[0; 4], |_, _, _| {
            panic!("no canvas yet")
        });
        assert_eq!(drawn, None);
        assert_eq!(u.endpoint(), "");
    }

    #[test]
    fn inactive_updater_skips_frames() {
        let mut u = updater("inactive");
        assert!(u.on_allocated(PixelSize::new(1, 1)));
        u.set_active(false);
        assert_eq!(u.draw(Rect::new(0, 0, 1, 1), &[0; 4], |_, _, _| {}), None);
        assert!(u.channel().segment().is_none());
    }

    #[test]
    fn draw_publishes_and_paints() {
        let mut u = updater("draw");
        let size = PixelSize::new(2, 1);
        assert!(u.on_allocated(size));

        let damage = Rect::new(1, 0, 1, 1);
        let mut painted = None;
        let drawn = u.draw(damage, &[3; 8], |d, p, s| {
            painted = Some((d, p.to_vec(), s));
        });
        assert_eq!(drawn, Some(Publish::Delivered));
        assert_eq!(painted, Some((damage, vec![3; 8], size)));

        let mut reader = Reader::open(u.endpoint(), 8).unwrap();
        let mut out = Vec::new();
        assert!(reader.try_read(&mut out));
        assert_eq!(out, vec![3; 8]);
    }

    #[test]
    fn mismatched_pixels_are_rejected() {
        let mut u = updater("mismatch");
        assert!(u.on_allocated(PixelSize::new(2, 2)));
        assert_eq!(u.draw(Rect::new(0, 0, 2, 2), &[0; 12], |_, _, _| {}), None);
    }

    #[test]
    fn reallocation_moves_to_new_segment() {
        let mut u = updater("realloc");
        u.on_allocated(PixelSize::new(1, 1));
        u.draw(Rect::new(0, 0, 1, 1), &[0; 4], |_, _, _| {});
        let first = u.endpoint().to_owned();

        assert!(u.on_allocated(PixelSize::new(1, 1)));
        assert_eq!(u.endpoint(), "");
        u.draw(Rect::new(0, 0, 1, 1), &[0; 4], |_, _, _| {});
        assert_ne!(u.endpoint(), first);
        assert!(Reader::open(&first, 4).is_err());
    }

    #[test]
    fn invalid_allocation_unbinds() {
        let mut u = updater("invalid");
        assert!(u.on_allocated(PixelSize::new(1, 1)));
        assert!(!u.on_allocated(PixelSize::new(-1, 4)));
        assert!(!u.on_allocated(PixelSize::new(0, 4)));
        assert_eq!(u.canvas_size(), None);
        assert_eq!(u.draw(Rect::new(0, 0, 1, 1), &[0; 4], |_, _, _| {}), None);
    }
}
