//! Tunables for the producer side.

/// Configuration for a [`FrameChannel`](crate::FrameChannel).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelConfig {
    /// Appended to every random name stem. Must survive the backend's name
    /// normalization (alphanumerics on POSIX).
    pub name_suffix: String,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            name_suffix: "osr".to_owned(),
        }
    }
}

/// Configuration for a [`CaptureConsumer`](crate::CaptureConsumer).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaptureConfig {
    /// Target capture rate in frames per second. Values below 1 are treated
    /// as 1.
    pub frame_rate: u32,
    /// How far, in pixels per axis, a captured content rect may differ from
    /// the view size before the frame is discarded and a refresh requested.
    pub size_tolerance: i32,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            frame_rate: 60,
            size_tolerance: 2,
        }
    }
}
