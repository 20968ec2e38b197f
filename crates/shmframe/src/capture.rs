//! Adapter between an upstream video capturer and a [`FrameChannel`].
//!
//! The capturer delivers each frame in a read-only region laid out with its
//! own row stride. [`CaptureConsumer`] checks the frame against the current
//! view size, packs the visible rows, publishes them, and forwards the frame
//! to a paint callback.

use std::fmt;
use std::time::Duration;

use crate::channel::{FrameChannel, Publish};
use crate::config::CaptureConfig;
use crate::error::ShmError;
use crate::geometry::{PixelSize, Rect, BYTES_PER_PIXEL};
use crate::name::NameSource;
use crate::segment::{Backend, PlatformBackend, SharedSegment};

/// Control surface of the upstream capturer.
pub trait CaptureControl {
    /// Constrain captured frames to between `min` and `max` pixels.
    fn set_resolution(&mut self, min: PixelSize, max: PixelSize, fixed_aspect_ratio: bool);
    /// Minimum time between two captured frames.
    fn set_min_capture_period(&mut self, period: Duration);
    /// Ask for a new frame even if nothing changed.
    fn request_refresh(&mut self);
    fn start(&mut self);
    fn stop(&mut self);
}

/// One frame as delivered by the capturer.
#[derive(Debug, Clone, Copy)]
pub struct CapturedFrame<'a> {
    /// The mapped region holding the pixels.
    pub data: &'a [u8],
    /// Size of the full frame in the region.
    pub coded_size: PixelSize,
    /// Bytes between the starts of two rows in `data`.
    pub stride: usize,
    /// The part of the coded frame holding content.
    pub content: Rect,
    /// Region that changed since the previous frame, if the capturer knows.
    pub update_rect: Option<Rect>,
}

/// What became of a captured frame.
#[derive(Debug)]
pub enum CaptureOutcome {
    /// The frame did not match the view size; a refresh was requested.
    NeedsRefresh,
    /// The region was missing, too small, or inconsistent with its geometry.
    Invalid,
    /// Painted and handed to the channel.
    Published(Publish),
    /// Painted, but the channel could not allocate a segment for it.
    Failed(ShmError),
}

/// Receives captured frames and feeds them into a [`FrameChannel`].
pub struct CaptureConsumer<C, N, B: Backend = PlatformBackend> {
    capturer: C,
    channel: FrameChannel<N, B>,
    config: CaptureConfig,
    view_size: PixelSize,
    active: bool,
    /// Reused for frames whose rows are not contiguous.
    scratch: Vec<u8>,
}

impl<C: CaptureControl, N: NameSource, B: Backend> CaptureConsumer<C, N, B> {
    /// Wrap `capturer`, constraining it to `view_size` and the configured rate.
    ///
    /// Capturing does not start until [`set_active`](Self::set_active).
    pub fn new(
        mut capturer: C,
        channel: FrameChannel<N, B>,
        view_size: PixelSize,
        config: CaptureConfig,
    ) -> Self {
        capturer.set_resolution(view_size, view_size, true);
        capturer.set_min_capture_period(capture_period(config.frame_rate));
        Self {
            capturer,
            channel,
            config,
            view_size,
            active: false,
            scratch: Vec::new(),
        }
    }

    pub fn set_active(&mut self, active: bool) {
        if active {
            self.capturer.start();
        } else {
            self.capturer.stop();
        }
        self.active = active;
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn set_frame_rate(&mut self, frame_rate: u32) {
        self.config.frame_rate = frame_rate;
        self.capturer
            .set_min_capture_period(capture_period(frame_rate));
    }

    /// The view was resized: follow it and ask for a frame at the new size.
    pub fn size_changed(&mut self, view_size: PixelSize) {
        self.view_size = view_size;
        self.capturer.set_resolution(view_size, view_size, true);
        self.capturer.request_refresh();
    }

    /// Handle one captured frame.
    ///
    /// `on_paint` receives the damaged rect, the packed pixels and their size
    /// for every frame that passes validation, whether or not the consumer
    /// process had room for it.
    pub fn on_frame_captured<F>(&mut self, frame: CapturedFrame<'_>, on_paint: F) -> CaptureOutcome
    where
        F: FnOnce(Rect, &[u8], PixelSize),
    {
        let content = frame.content.size();
        if !content.within(self.view_size, self.config.size_tolerance) {
            tracing::debug!(
                content = ?frame.content,
                view = ?self.view_size,
                "captured frame does not match view, requesting refresh"
            );
            self.capturer
                .set_resolution(self.view_size, self.view_size, true);
            self.capturer.request_refresh();
            return CaptureOutcome::NeedsRefresh;
        }

        if frame.data.is_empty() {
            tracing::error!("captured frame has no pixel data");
            return CaptureOutcome::Invalid;
        }

        let Some(pixels) = pack_rows(&frame, &mut self.scratch) else {
            tracing::error!(
                len = frame.data.len(),
                coded = ?frame.coded_size,
                stride = frame.stride,
                "captured frame region is smaller than its geometry requires"
            );
            return CaptureOutcome::Invalid;
        };

        let result = self.channel.publish(pixels);

        let damage = match frame.update_rect {
            Some(rect) if !rect.is_empty() => rect,
            _ => frame.content,
        };
        on_paint(damage, pixels, frame.content.size());

        match result {
            Ok(publish) => CaptureOutcome::Published(publish),
            Err(err) => {
                tracing::warn!("skipping frame: {err}");
                CaptureOutcome::Failed(err)
            }
        }
    }

    /// The segment the consumer process should attach to.
    pub fn external_segment(&self) -> Option<&SharedSegment<B>> {
        self.channel.segment()
    }

    /// Name of [`external_segment`](Self::external_segment), or `""`.
    pub fn endpoint(&self) -> &str {
        self.channel.current_name()
    }

    pub fn channel(&self) -> &FrameChannel<N, B> {
        &self.channel
    }

    pub fn capturer(&self) -> &C {
        &self.capturer
    }

    pub fn view_size(&self) -> PixelSize {
        self.view_size
    }
}

impl<C: fmt::Debug, N, B: Backend> fmt::Debug for CaptureConsumer<C, N, B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CaptureConsumer")
            .field("capturer", &self.capturer)
            .field("channel", &self.channel)
            .field("view_size", &self.view_size)
            .field("active", &self.active)
            .finish_non_exhaustive()
    }
}

fn capture_period(frame_rate: u32) -> Duration {
    Duration::from_secs(1) / frame_rate.max(1)
}

/// The content rows of `frame`, packed without padding.
///
/// Borrows straight from the region when rows are already contiguous,
/// otherwise copies into `scratch`. `None` if the geometry is inconsistent or
/// the region is shorter than the coded frame.
fn pack_rows<'a>(frame: &CapturedFrame<'a>, scratch: &'a mut Vec<u8>) -> Option<&'a [u8]> {
    let coded_row = frame.coded_size.row_bytes()?;
    let coded_height = usize::try_from(frame.coded_size.height).ok()?;
    if frame.stride < coded_row {
        return None;
    }
    // The last row needs no padding after it.
    let required = frame
        .stride
        .checked_mul(coded_height - 1)?
        .checked_add(coded_row)?;
    if frame.data.len() < required {
        return None;
    }

    let content = frame.content;
    let x = usize::try_from(content.x).ok()?;
    let y = usize::try_from(content.y).ok()?;
    let row = content.size().row_bytes()?;
    let height = usize::try_from(content.height).ok()?;
    let x_bytes = x.checked_mul(BYTES_PER_PIXEL)?;
    if x_bytes.checked_add(row)? > coded_row || y.checked_add(height)? > coded_height {
        return None;
    }

    let start = y * frame.stride + x_bytes;
    if frame.stride == row {
        return Some(&frame.data[start..start + row * height]);
    }

    scratch.clear();
    scratch.reserve(row * height);
    for r in 0..height {
        let offset = start + r * frame.stride;
        scratch.extend_from_slice(&frame.data[offset..offset + row]);
    }
    Some(scratch.as_slice())
}
