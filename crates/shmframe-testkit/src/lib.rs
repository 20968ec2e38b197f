//! shmframe-testkit: Conformance scenarios for shmframe backends.
//!
//! Every [`Backend`] must pass the same handoff laws. The scenarios here are
//! generic over the backend so each one is exercised the same way:
//!
//! ```ignore
//! use shmframe::PlatformBackend;
//!
//! #[test]
//! fn handoff_law() {
//!     shmframe_testkit::run_handoff_law::<PlatformBackend>();
//! }
//! ```

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use shmframe::{
    Backend, FrameChannel, FrameReader, NameSource, Publish, SharedSegment, ShmError, ShmStatus,
};

/// Error type for test scenarios.
#[derive(Debug)]
pub enum TestError {
    /// A shared-memory operation failed.
    Shm(ShmError),
    /// Assertion failed.
    Assertion(String),
}

impl std::fmt::Display for TestError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TestError::Shm(e) => write!(f, "shared memory error: {}", e),
            TestError::Assertion(msg) => write!(f, "assertion failed: {}", msg),
        }
    }
}

impl std::error::Error for TestError {}

impl From<ShmError> for TestError {
    fn from(e: ShmError) -> Self {
        TestError::Shm(e)
    }
}

macro_rules! ensure {
    ($cond:expr, $($arg:tt)+) => {
        if !$cond {
            return Err(TestError::Assertion(format!($($arg)+)));
        }
    };
}

/// Names unique to this process and this source.
///
/// Tests run in parallel inside one process and test binaries run side by
/// side, so every name carries the pid and a process-wide counter.
#[derive(Debug, Clone)]
pub struct TestNames {
    prefix: &'static str,
}

static NEXT_NAME: AtomicU32 = AtomicU32::new(0);

impl TestNames {
    /// `prefix` must be ASCII alphanumeric.
    pub fn new(prefix: &'static str) -> Self {
        Self { prefix }
    }
}

impl NameSource for TestNames {
    fn next_name(&mut self) -> String {
        let n = NEXT_NAME.fetch_add(1, Ordering::Relaxed);
        format!("{}{}n{}", self.prefix, std::process::id(), n)
    }
}

fn channel<B: Backend>(prefix: &'static str) -> FrameChannel<TestNames, B> {
    FrameChannel::new(TestNames::new(prefix))
}

fn publish<B: Backend>(
    channel: &mut FrameChannel<TestNames, B>,
    pixels: &[u8],
    expected: Publish,
) -> Result<(), TestError> {
    let got = channel.publish(pixels)?;
    ensure!(
        got == expected,
        "publishing {} bytes: expected {:?}, got {:?}",
        pixels.len(),
        expected,
        got
    );
    Ok(())
}

fn run(name: &str, result: Result<(), TestError>) {
    if let Err(e) = result {
        panic!("{} failed: {}", name, e);
    }
}

// ============================================================================
// Test scenarios
// ============================================================================

/// Bytes written through one mapping are visible through another mapping of
/// the same name, in both directions.
pub fn run_cross_mapping_visibility<B: Backend>() {
    run(
        "run_cross_mapping_visibility",
        run_cross_mapping_visibility_inner::<B>(),
    );
}

fn run_cross_mapping_visibility_inner<B: Backend>() -> Result<(), TestError> {
    let name = TestNames::new("visibility").next_name();
    let mut creator = SharedSegment::<B>::create(&name, 64)?;
    let mut opener = SharedSegment::<B>::open(&name, 64)?;

    ensure!(creator.is_owner(), "creator should own the segment");
    ensure!(!opener.is_owner(), "opener should not own the segment");

    creator.as_mut_slice()[..4].copy_from_slice(b"ping");
    ensure!(
        &opener.as_slice()[..4] == b"ping",
        "opener did not see creator's write"
    );

    opener.as_mut_slice()[60..].copy_from_slice(b"pong");
    ensure!(
        &creator.as_slice()[60..] == b"pong",
        "creator did not see opener's write"
    );

    Ok(())
}

/// One frame in flight: delivered, then dropped until drained, then
/// delivered again.
pub fn run_handoff_law<B: Backend>() {
    run("run_handoff_law", run_handoff_law_inner::<B>());
}

fn run_handoff_law_inner<B: Backend>() -> Result<(), TestError> {
    let mut channel = channel::<B>("handoff");
    publish(&mut channel, &[1; 16], Publish::Delivered)?;
    publish(&mut channel, &[2; 16], Publish::Dropped)?;

    let mut reader = FrameReader::<B>::open(channel.current_name(), 16)?;
    let mut frame = Vec::new();
    ensure!(reader.try_read(&mut frame), "first frame was not readable");
    ensure!(
        frame == [1; 16],
        "read {:?}, expected the first frame",
        frame
    );
    ensure!(!reader.try_read(&mut frame), "drained segment read twice");

    publish(&mut channel, &[3; 16], Publish::Delivered)?;
    ensure!(reader.try_read(&mut frame), "third frame was not readable");
    ensure!(
        frame == [3; 16],
        "read {:?}, expected the third frame",
        frame
    );

    Ok(())
}

/// While the consumer holds a frame, any number of publishes leave it intact.
pub fn run_backpressure_law<B: Backend>() {
    run("run_backpressure_law", run_backpressure_law_inner::<B>());
}

fn run_backpressure_law_inner<B: Backend>() -> Result<(), TestError> {
    let mut channel = channel::<B>("backpressure");
    publish(&mut channel, &[7; 8], Publish::Delivered)?;
    for fill in 8..32u8 {
        publish(&mut channel, &[fill; 8], Publish::Dropped)?;
    }

    let mut reader = FrameReader::<B>::open(channel.current_name(), 8)?;
    let mut frame = Vec::new();
    ensure!(reader.try_read(&mut frame), "held frame was not readable");
    ensure!(frame == [7; 8], "held frame was overwritten: {:?}", frame);

    Ok(())
}

/// A size change moves the channel to a new name and removes the old one.
pub fn run_resize_law<B: Backend>() {
    run("run_resize_law", run_resize_law_inner::<B>());
}

fn run_resize_law_inner<B: Backend>() -> Result<(), TestError> {
    let mut channel = channel::<B>("resize");
    publish(&mut channel, &[0; 40], Publish::Delivered)?;
    let old = channel.current_name().to_owned();

    publish(&mut channel, &[0; 80], Publish::Delivered)?;
    let new = channel.current_name().to_owned();
    ensure!(old != new, "resize kept the name {}", old);
    ensure!(
        channel.frame_size() == Some(80),
        "frame size is {:?}",
        channel.frame_size()
    );

    match FrameReader::<B>::open(&old, 40) {
        Err(e) => ensure!(
            e.status() == ShmStatus::OpeningFailed,
            "old name failed with {:?}",
            e.status()
        ),
        Ok(_) => ensure!(false, "old name {} is still openable", old),
    }

    let reader = FrameReader::<B>::open(&new, 80)?;
    ensure!(
        reader.payload_size() == 80,
        "payload is {}",
        reader.payload_size()
    );
    Ok(())
}

/// The worked example: a 100-byte frame of 0xAA, then a 200-byte frame of
/// 0x55 after the consumer drained the first.
pub fn run_concrete_scenario<B: Backend>() {
    run("run_concrete_scenario", run_concrete_scenario_inner::<B>());
}

fn run_concrete_scenario_inner<B: Backend>() -> Result<(), TestError> {
    let mut channel = channel::<B>("concrete");
    publish(&mut channel, &[0xAA; 100], Publish::Delivered)?;
    ensure!(
        channel.segment().map(|s| s.size()) == Some(101),
        "segment size is {:?}",
        channel.segment().map(|s| s.size())
    );

    let first = channel.current_name().to_owned();
    let mut reader = FrameReader::<B>::open(&first, 100)?;
    let mut frame = Vec::new();
    ensure!(reader.try_read(&mut frame), "first frame was not readable");
    ensure!(frame == [0xAA; 100], "first frame corrupted");
    drop(reader);

    publish(&mut channel, &[0x55; 200], Publish::Delivered)?;
    ensure!(
        channel.current_name() != first,
        "second frame reused {}",
        first
    );

    let mut reader = FrameReader::<B>::open(channel.current_name(), 200)?;
    ensure!(reader.try_read(&mut frame), "second frame was not readable");
    ensure!(frame == [0x55; 200], "second frame corrupted");
    ensure!(
        channel.status() == Some(shmframe::STATUS_EMPTY),
        "status after drain is {:?}",
        channel.status()
    );

    Ok(())
}

/// Opening a name nobody created fails with the opening status.
pub fn run_open_missing<B: Backend>() {
    run("run_open_missing", run_open_missing_inner::<B>());
}

fn run_open_missing_inner<B: Backend>() -> Result<(), TestError> {
    let name = TestNames::new("missing").next_name();
    let result = SharedSegment::<B>::open(&name, 32);
    let status = ShmStatus::of(&result);
    ensure!(
        status == ShmStatus::OpeningFailed,
        "opening a missing name gave {:?}",
        status
    );
    ensure!(status.code() == 120, "status code is {}", status.code());
    Ok(())
}

/// Teardown runs once: closing removes the name, and the name can be
/// created again afterwards.
pub fn run_idempotent_teardown<B: Backend>() {
    run(
        "run_idempotent_teardown",
        run_idempotent_teardown_inner::<B>(),
    );
}

fn run_idempotent_teardown_inner<B: Backend>() -> Result<(), TestError> {
    let name = TestNames::new("teardown").next_name();

    let segment = SharedSegment::<B>::create(&name, 16)?;
    let opener = SharedSegment::<B>::open(&name, 16)?;
    drop(opener);
    ensure!(
        SharedSegment::<B>::open(&name, 16).is_ok(),
        "dropping an opener removed the name"
    );
    segment.close();

    // The creator's teardown may not remove names on every backend; the
    // name must at least be reusable.
    let again = SharedSegment::<B>::create(&name, 16)?;
    ensure!(
        again.as_slice().iter().all(|&b| b == 0),
        "recreated segment is not zeroed"
    );
    Ok(())
}

/// A producer and a consumer on separate threads agree on how many frames
/// were handed over.
pub fn run_concurrent_handoff<B>()
where
    B: Backend,
    B::Handle: Send,
{
    run(
        "run_concurrent_handoff",
        run_concurrent_handoff_inner::<B>(),
    );
}

fn run_concurrent_handoff_inner<B>() -> Result<(), TestError>
where
    B: Backend,
    B::Handle: Send,
{
    concurrent_handoff::<B>(HANDOFF_LEN)
}

const HANDOFF_FRAMES: usize = 64;
const HANDOFF_LEN: usize = 256;

/// Hand over [`HANDOFF_FRAMES`] frames of [`HANDOFF_LEN`] bytes, with the
/// consumer expecting frames of `expected_len` bytes.
///
/// Either side stopping early stops the other, so a failure never leaves a
/// thread spinning.
fn concurrent_handoff<B>(expected_len: usize) -> Result<(), TestError>
where
    B: Backend,
    B::Handle: Send,
{
    let mut channel = channel::<B>("concurrent");
    // Create the segment up front so the consumer has a name to open.
    publish(&mut channel, &[0; HANDOFF_LEN], Publish::Delivered)?;
    let mut reader = FrameReader::<B>::open(channel.current_name(), HANDOFF_LEN)?;
    let consumer_done = AtomicBool::new(false);

    std::thread::scope(|scope| {
        let consumer_done = &consumer_done;
        let producer = scope.spawn(move || -> Result<usize, TestError> {
            let mut delivered = 1;
            let mut attempts = 0usize;
            while delivered < HANDOFF_FRAMES {
                if consumer_done.load(Ordering::Relaxed) {
                    return Err(TestError::Assertion(format!(
                        "consumer stopped after {} of {} frames were delivered",
                        delivered, HANDOFF_FRAMES
                    )));
                }
                match channel.publish(&[delivered as u8; HANDOFF_LEN])? {
                    Publish::Delivered => delivered += 1,
                    Publish::Dropped => std::thread::yield_now(),
                }
                attempts += 1;
            }
            Ok(attempts)
        });

        let consumed = drain(&mut reader, expected_len, || producer.is_finished());
        consumer_done.store(true, Ordering::Relaxed);

        let produced = producer
            .join()
            .map_err(|_| TestError::Assertion("producer thread panicked".into()))?;
        consumed?;
        let attempts = produced?;
        ensure!(
            attempts >= HANDOFF_FRAMES - 1,
            "producer finished after {} attempts",
            attempts
        );
        Ok(())
    })
}

/// Read [`HANDOFF_FRAMES`] frames, giving up once the producer has exited
/// with nothing left to read.
fn drain<B: Backend>(
    reader: &mut FrameReader<B>,
    expected_len: usize,
    producer_finished: impl Fn() -> bool,
) -> Result<(), TestError> {
    let mut frame = Vec::new();
    let mut read = 0;
    while read < HANDOFF_FRAMES {
        if reader.try_read(&mut frame) {
            ensure!(
                frame.len() == expected_len,
                "read {} bytes, expected {}",
                frame.len(),
                expected_len
            );
            read += 1;
        } else if producer_finished() && !reader.is_full() {
            return Err(TestError::Assertion(format!(
                "producer exited after {} of {} frames were read",
                read, HANDOFF_FRAMES
            )));
        } else {
            std::thread::yield_now();
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use shmframe::PlatformBackend;

    #[test]
    fn concurrent_handoff_passes() {
        concurrent_handoff::<PlatformBackend>(HANDOFF_LEN).unwrap();
    }

    #[test]
    fn failing_consumer_stops_the_producer() {
        let result = concurrent_handoff::<PlatformBackend>(HANDOFF_LEN + 1);
        assert!(
            matches!(result, Err(TestError::Assertion(ref msg)) if msg.contains("expected")),
            "{result:?}"
        );
    }

    #[test]
    fn test_names_are_unique() {
        let mut a = TestNames::new("unique");
        let mut b = TestNames::new("unique");
        assert_ne!(a.next_name(), b.next_name());
    }
}
