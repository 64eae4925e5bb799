//! Remote capture feeder
//!
//! Runs on a machine near an audio device the gateway cannot reach
//! directly (a second PC with a receiver line-in, for example).
//! Captures the device, converts to mono 16-bit PCM at the gateway
//! rate, and streams length-prefixed frames over TCP. The link
//! reconnects on a fixed interval; captured audio is discarded while
//! disconnected so the device stream never stalls.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use radiomix::audio::buffer::create_shared_buffer;
use radiomix::audio::capture::CaptureReader;
use radiomix::audio::chunk::AudioFormat;
use radiomix::audio::device::list_devices;
use radiomix::constants::{
    DEFAULT_BUFFER_CAPACITY_CHUNKS, DEFAULT_REMOTE_PORT, RECONNECT_INTERVAL_SECS,
};
use radiomix::engine::TickClock;
use radiomix::net::FeedClient;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let mut args = std::env::args().skip(1);
    let first = args.next();
    if first.as_deref() == Some("--list-devices") {
        println!("\n=== Available Audio Devices ===");
        for device in list_devices().into_iter().filter(|d| d.is_input) {
            let default_marker = if device.is_default { " [DEFAULT]" } else { "" };
            println!("  {}{}  (id: {})", device.name, default_marker, device.id);
        }
        println!();
        return Ok(());
    }

    let target = first.unwrap_or_else(|| format!("127.0.0.1:{DEFAULT_REMOTE_PORT}"));
    let device = args.next().unwrap_or_else(|| "default".to_string());
    let format = AudioFormat::default();

    tracing::info!(%target, %device, "starting feeder");

    // No cushion: the gateway side does the pre-buffering.
    let buffer = create_shared_buffer(format.chunk_bytes(), DEFAULT_BUFFER_CAPACITY_CHUNKS, 0);
    let mut reader = CaptureReader::new("feeder", &device, format.sample_rate, 1.0, buffer.clone());
    reader.start()?;

    let running = Arc::new(AtomicBool::new(true));
    let pump_running = running.clone();
    let pump = std::thread::Builder::new()
        .name("feed-pump".to_string())
        .spawn(move || {
            let mut client = FeedClient::new(
                &target,
                Duration::from_secs(RECONNECT_INTERVAL_SECS),
            );
            let mut clock = TickClock::new(format.chunk_duration());
            while pump_running.load(Ordering::Relaxed) {
                clock.wait();
                while let Some(pcm) = buffer.take_chunk() {
                    client.send(&pcm);
                }
            }
        })?;

    tokio::signal::ctrl_c().await?;
    tracing::info!("shutting down");
    running.store(false, Ordering::SeqCst);
    let _ = pump.join();
    reader.stop();
    Ok(())
}
