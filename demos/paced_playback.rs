//! Paced playback demo - plays a synthetic 30 fps interlaced stream
//!
//! Run with: cargo run --example paced_playback [SECONDS]
//!
//! This demo shows:
//! - Wiring a `Scheduler` to a display, an output monitor, a clock and a
//!   tokio-driven tick source
//! - A producer pushing frames ahead of time and being held back by the
//!   ring buffer when it runs too far ahead
//! - Deinterlacing: every source frame is shown as two fields
//! - A seek in the middle of playback (skip start, skip end)
//!
//! Set `RUST_LOG=frame_pacer=debug` to see drops and clock corrections.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use frame_pacer::pacing::{
    Backends, ChannelId, DisplayProgram, DisplayRequest, FrameRecord, IntervalTicker,
    MonotonicClock, PacingConfig, Scheduler, SharedOutputs, StartParams,
};

const FPS: i64 = 30;

/// Display that logs what it is asked to show
#[derive(Default)]
struct LoggingDisplay {
    fields: AtomicU64,
}

impl DisplayProgram for LoggingDisplay {
    fn display(&self, request: &DisplayRequest) {
        self.fields.fetch_add(1, Ordering::Relaxed);
        match request.field {
            Some(field) => tracing::debug!(
                channel = %request.channel,
                frame_id = request.frame.id,
                timestamp = request.frame.timestamp,
                field = field.index,
                parity = ?field.parity,
                "Display field"
            ),
            None => tracing::debug!(
                channel = %request.channel,
                frame_id = request.frame.id,
                timestamp = request.frame.timestamp,
                "Display frame"
            ),
        }
    }

    fn disable(&self, channel: ChannelId) {
        tracing::info!(channel = %channel, "Layer disabled");
    }

    fn release_deinterlacer(&self, channel: ChannelId) {
        tracing::info!(channel = %channel, "Deinterlacer released");
    }
}

/// Push frames with timestamps starting at `first_ts`, declaring the
/// producer's elapsed time as sync time
async fn produce(
    scheduler: &Scheduler,
    first_id: u64,
    first_ts: i64,
    count: u64,
) -> frame_pacer::Result<()> {
    let started = tokio::time::Instant::now();
    for n in 0..count {
        let ts = first_ts + (n as i64 * 1000) / FPS;
        let sync_time = first_ts + started.elapsed().as_millis() as i64;
        let frame = FrameRecord::new(first_id + n, ts, 720, 480)
            .interlaced(false)
            .with_sync_time(sync_time)
            .with_plane(Bytes::from(vec![0u8; 64]));
        scheduler.push(ChannelId::MAIN, frame).await?;

        // Stay a few frames ahead of the display
        let ahead = ts - (first_ts + started.elapsed().as_millis() as i64);
        if ahead > 100 {
            tokio::time::sleep(Duration::from_millis((ahead - 100) as u64)).await;
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let seconds: u64 = match std::env::args().nth(1) {
        Some(arg) => arg.parse()?,
        None => 2,
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("frame_pacer=info".parse()?)
                .add_directive("paced_playback=info".parse()?),
        )
        .init();

    let config = PacingConfig::default().ring_capacity(6);
    let display = Arc::new(LoggingDisplay::default());
    let scheduler = Scheduler::new(
        config.clone(),
        Backends {
            display: display.clone(),
            outputs: Arc::new(SharedOutputs::default()),
            clock: Arc::new(MonotonicClock::new()),
            ticker: Arc::new(IntervalTicker::new(config.tick_interval())),
        },
    );

    scheduler.start(
        ChannelId::MAIN,
        StartParams::default().deinterlace().frame_rate(FPS as u32),
    )?;

    let frames = seconds * FPS as u64;
    produce(&scheduler, 0, 0, frames).await?;
    tokio::time::sleep(Duration::from_millis(200)).await;

    // Seek: discard everything, restart the clock, resume from a new position
    scheduler.skip_start(ChannelId::MAIN)?;
    scheduler.skip_end(ChannelId::MAIN)?;
    produce(&scheduler, frames, 0, frames).await?;
    tokio::time::sleep(Duration::from_millis(200)).await;

    let stats = scheduler.stats(ChannelId::MAIN)?;
    scheduler.shutdown();

    println!();
    println!("=== Playback summary ===");
    println!("frames pushed:      {}", stats.pushed);
    println!("display calls:      {}", stats.dispatched);
    println!("  of which fields:  {}", stats.fields);
    println!("superseded:         {}", stats.superseded);
    println!("dropped:            {}", stats.dropped);
    println!("clock adjustments:  {}", stats.clock_adjustments);
    println!("clock resets:       {}", stats.clock_resets);
    println!("backpressure waits: {}", stats.backpressure_waits);
    println!("drop rate:          {:.1}%", stats.drop_rate());
    println!(
        "fields seen by display: {}",
        display.fields.load(Ordering::Relaxed)
    );

    Ok(())
}
