//! Bolero fuzzer for the frame handoff.
//!
//! Properties tested:
//! - At most one frame in flight per segment
//! - A frame is read back exactly as published
//! - A size change moves to a new segment name
//! - The status byte only ever holds the empty or full marker

use bolero::check;
use shmframe_fuzz::handoff_model::{execute_and_verify, HandoffOp};

fn main() {
    check!()
        .with_type::<Vec<HandoffOpInput>>()
        .for_each(|ops_data| {
            let ops: Vec<HandoffOp> = ops_data.iter().map(|op| op.to_handoff_op()).collect();

            if let Err(e) = execute_and_verify(&ops) {
                panic!("Invariant violated: {}", e);
            }
        });
}

/// Fuzz-friendly input type for handoff operations.
#[derive(Debug, Clone, bolero::TypeGenerator)]
enum HandoffOpInput {
    // Sizes are drawn from a few widths so resizes and repeats both happen.
    Publish { width: u8, fill: u8 },
    Read,
    Reset,
}

impl HandoffOpInput {
    fn to_handoff_op(&self) -> HandoffOp {
        match self {
            HandoffOpInput::Publish { width, fill } => HandoffOp::Publish {
                len: (*width as usize % 8) * 4,
                fill: *fill,
            },
            HandoffOpInput::Read => HandoffOp::Read,
            HandoffOpInput::Reset => HandoffOp::Reset,
        }
    }
}

#[cfg(test)]
mod tests {
    use shmframe_fuzz::handoff_model::{execute_and_verify, HandoffOp};

    #[test]
    fn fuzz_handoff_basic() {
        let ops = vec![
            HandoffOp::Publish { len: 16, fill: 1 },
            HandoffOp::Publish { len: 16, fill: 2 },
            HandoffOp::Read,
            HandoffOp::Read,
            HandoffOp::Publish { len: 16, fill: 3 },
            HandoffOp::Read,
        ];
        execute_and_verify(&ops).unwrap();
    }

    #[test]
    fn fuzz_handoff_resize_and_reset() {
        let ops = vec![
            HandoffOp::Publish { len: 4, fill: 0xAA },
            HandoffOp::Publish { len: 8, fill: 0x55 },
            HandoffOp::Read,
            HandoffOp::Reset,
            HandoffOp::Read,
            HandoffOp::Publish { len: 8, fill: 0x11 },
            HandoffOp::Read,
        ];
        execute_and_verify(&ops).unwrap();
    }

    #[test]
    fn fuzz_handoff_empty_frames() {
        let ops = vec![
            HandoffOp::Publish { len: 0, fill: 0 },
            HandoffOp::Read,
            HandoffOp::Publish { len: 0, fill: 0 },
            HandoffOp::Publish { len: 0, fill: 0 },
        ];
        execute_and_verify(&ops).unwrap();
    }
}
