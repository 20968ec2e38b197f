//! In-memory model of the frame handoff, and a differential check of the
//! real channel against it.
//!
//! The model tracks the one thing the protocol promises: at most one frame in
//! flight per segment, and a fresh segment whenever the frame size changes.

use shmframe::{
    FrameChannel, FrameReader, NameSource, PlatformBackend, Publish, STATUS_EMPTY, STATUS_FULL,
};
use std::sync::atomic::{AtomicU64, Ordering};

/// Largest frame the harness publishes.
pub const MAX_FRAME_LEN: usize = 256;

#[derive(Debug, Clone)]
struct ModelSegment {
    /// Bumped every time a new segment is created.
    generation: u32,
    frame_size: usize,
    held: Option<Vec<u8>>,
}

/// Pure model of a producer channel plus its segment.
#[derive(Debug, Default)]
pub struct HandoffModel {
    segment: Option<ModelSegment>,
    generations: u32,
}

impl HandoffModel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn publish(&mut self, pixels: &[u8]) -> Publish {
        let segment = match self.segment.take() {
            Some(segment) if segment.frame_size == pixels.len() => segment,
            _ => {
                self.generations += 1;
                ModelSegment {
                    generation: self.generations,
                    frame_size: pixels.len(),
                    held: None,
                }
            }
        };
        let segment = self.segment.insert(segment);

        if segment.held.is_some() {
            return Publish::Dropped;
        }
        segment.held = Some(pixels.to_vec());
        Publish::Delivered
    }

    pub fn read(&mut self) -> Option<Vec<u8>> {
        self.segment.as_mut()?.held.take()
    }

    pub fn reset(&mut self) {
        self.segment = None;
    }

    pub fn generation(&self) -> Option<u32> {
        self.segment.as_ref().map(|s| s.generation)
    }

    pub fn frame_size(&self) -> Option<usize> {
        self.segment.as_ref().map(|s| s.frame_size)
    }

    pub fn is_full(&self) -> Option<bool> {
        self.segment.as_ref().map(|s| s.held.is_some())
    }
}

/// Operations driven by the fuzzer.
#[derive(Clone, Debug)]
pub enum HandoffOp {
    /// Publish `len` bytes, all equal to `fill`.
    Publish { len: usize, fill: u8 },
    /// The consumer tries to take a frame.
    Read,
    /// The producer drops its segment.
    Reset,
}

/// Names unique across iterations and test processes.
struct FuzzNames;

static NEXT: AtomicU64 = AtomicU64::new(0);

impl NameSource for FuzzNames {
    fn next_name(&mut self) -> String {
        format!(
            "fuzz{}n{}",
            std::process::id(),
            NEXT.fetch_add(1, Ordering::Relaxed)
        )
    }
}

/// Run `ops` against both the model and a real channel, failing on the first
/// divergence.
pub fn execute_and_verify(ops: &[HandoffOp]) -> Result<(), String> {
    let mut model = HandoffModel::new();
    let mut channel = FrameChannel::<_, PlatformBackend>::new(FuzzNames);
    let mut reader: Option<FrameReader<PlatformBackend>> = None;
    let mut last_name = String::new();
    let mut last_generation = None;
    let mut frame = Vec::new();

    for (i, op) in ops.iter().enumerate() {
        match op {
            HandoffOp::Publish { len, fill } => {
                let pixels = vec![*fill; (*len).min(MAX_FRAME_LEN)];
                let expected = model.publish(&pixels);
                let got = channel
                    .publish(&pixels)
                    .map_err(|e| format!("op {}: publish failed: {}", i, e))?;
                if got != expected {
                    return Err(format!(
                        "op {}: publish of {} bytes gave {:?}, model says {:?}",
                        i,
                        pixels.len(),
                        got,
                        expected
                    ));
                }
            }
            HandoffOp::Read => {
                let expected = model.read();
                let name = channel.current_name();
                let got = if name.is_empty() {
                    None
                } else {
                    if reader.as_ref().map_or(true, |r| r.name() != name) {
                        let size = channel.frame_size().unwrap_or(0);
                        reader = Some(
                            FrameReader::open(name, size)
                                .map_err(|e| format!("op {}: open {} failed: {}", i, name, e))?,
                        );
                    }
                    match reader.as_mut() {
                        Some(r) if r.try_read(&mut frame) => Some(frame.clone()),
                        _ => None,
                    }
                };
                if got != expected {
                    return Err(format!(
                        "op {}: read gave {:?}, model says {:?}",
                        i,
                        got.map(|f| f.len()),
                        expected.map(|f| f.len())
                    ));
                }
            }
            HandoffOp::Reset => {
                model.reset();
                channel.reset();
                reader = None;
            }
        }

        verify_invariants(&model, &channel, &mut last_name, &mut last_generation, i)?;
    }

    Ok(())
}

fn verify_invariants(
    model: &HandoffModel,
    channel: &FrameChannel<FuzzNames, PlatformBackend>,
    last_name: &mut String,
    last_generation: &mut Option<u32>,
    op_idx: usize,
) -> Result<(), String> {
    // Invariant 1: segment geometry matches the model
    if channel.frame_size() != model.frame_size() {
        return Err(format!(
            "after op {}: frame size {:?} != model {:?}",
            op_idx,
            channel.frame_size(),
            model.frame_size()
        ));
    }
    if let (Some(segment), Some(size)) = (channel.segment(), model.frame_size()) {
        if segment.size() != size + 1 {
            return Err(format!(
                "after op {}: segment is {} bytes for {} byte frames",
                op_idx,
                segment.size(),
                size
            ));
        }
    }

    // Invariant 2: the status byte is exactly empty or full, as modelled
    let expected_status = model
        .is_full()
        .map(|full| if full { STATUS_FULL } else { STATUS_EMPTY });
    if channel.status() != expected_status {
        return Err(format!(
            "after op {}: status {:?} != model {:?}",
            op_idx,
            channel.status(),
            expected_status
        ));
    }

    // Invariant 3: the name changes exactly when the model's segment does
    let name = channel.current_name();
    let generation = model.generation();
    if generation.is_none() != name.is_empty() {
        return Err(format!(
            "after op {}: name {:?} with model generation {:?}",
            op_idx, name, generation
        ));
    }
    if generation != *last_generation && generation.is_some() && name == last_name.as_str() {
        return Err(format!(
            "after op {}: new segment reused name {}",
            op_idx, name
        ));
    }
    if generation == *last_generation && name != last_name.as_str() {
        return Err(format!(
            "after op {}: name changed from {} to {} without a new segment",
            op_idx, last_name, name
        ));
    }
    *last_name = name.to_owned();
    *last_generation = generation;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn model_holds_one_frame() {
        let mut model = HandoffModel::new();
        assert_eq!(model.publish(&[1; 4]), Publish::Delivered);
        assert_eq!(model.publish(&[2; 4]), Publish::Dropped);
        assert_eq!(model.read(), Some(vec![1; 4]));
        assert_eq!(model.read(), None);
    }

    #[test]
    fn model_resize_discards_held_frame() {
        let mut model = HandoffModel::new();
        model.publish(&[1; 4]);
        assert_eq!(model.publish(&[2; 8]), Publish::Delivered);
        assert_eq!(model.generation(), Some(2));
        assert_eq!(model.read(), Some(vec![2; 8]));
    }
}
