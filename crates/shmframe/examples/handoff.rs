//! Producer and consumer exchanging frames through shared memory.
//!
//! This example shows:
//! - A compositor-style producer driving a `LayeredUpdater`
//! - Passing the segment name to the consumer out of band
//! - The consumer draining frames with `FrameReader`
//! - A resize moving both sides to a new segment
//!
//! Run with: `RUST_LOG=shmframe=debug cargo run --example handoff -p shmframe`

use std::sync::mpsc;
use std::thread;
use std::time::Duration;

use shmframe::{FrameChannel, FrameReader, LayeredUpdater, PixelSize, RandomNames, Rect};
use tracing_subscriber::EnvFilter;

/// What the producer tells the consumer whenever the segment changes.
struct Endpoint {
    name: String,
    payload_size: usize,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let (tx, rx) = mpsc::channel::<Endpoint>();

    let consumer = thread::spawn(move || -> Result<usize, shmframe::ShmError> {
        let mut received = 0;
        let mut frame = Vec::new();
        // The producer hangs up after its last frame.
        while let Ok(endpoint) = rx.recv() {
            let mut reader: FrameReader = FrameReader::open(&endpoint.name, endpoint.payload_size)?;
            println!(
                "consumer: attached to {} ({} bytes)",
                reader.name(),
                reader.payload_size()
            );
            for _ in 0..20 {
                if reader.try_read(&mut frame) {
                    received += 1;
                }
                thread::sleep(Duration::from_millis(2));
            }
        }
        Ok(received)
    });

    let channel = FrameChannel::new(RandomNames::from_entropy());
    let mut updater: LayeredUpdater<_> = LayeredUpdater::new(channel);
    updater.set_active(true);

    for size in [PixelSize::new(64, 48), PixelSize::new(128, 96)] {
        updater.on_allocated(size);
        let len = size.byte_size().ok_or("canvas too large")?;
        let mut announced = false;

        for tick in 0..10u8 {
            let pixels = vec![tick; len];
            let outcome = updater.draw(Rect::from_size(size), &pixels, |damage, _, _| {
                tracing::trace!(?damage, "painted");
            });
            println!(
                "producer: frame {tick} at {}x{}: {outcome:?}",
                size.width, size.height
            );

            if !announced && !updater.endpoint().is_empty() {
                tx.send(Endpoint {
                    name: updater.endpoint().to_owned(),
                    payload_size: len,
                })?;
                announced = true;
            }
            thread::sleep(Duration::from_millis(4));
        }
        // Give the consumer time to finish with this segment before it moves.
        thread::sleep(Duration::from_millis(50));
    }
    drop(tx);

    let received = consumer.join().map_err(|_| "consumer thread panicked")??;
    println!("consumer received {received} frames");
    Ok(())
}
