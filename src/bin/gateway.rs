//! Mixing gateway application
//!
//! Loads the configuration, starts the engine and prints a periodic
//! one-line status until Ctrl+C.

use std::path::PathBuf;

use anyhow::Result;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use radiomix::audio::device::list_devices;
use radiomix::config::GatewayConfig;
use radiomix::engine;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let arg = std::env::args().nth(1);
    if arg.as_deref() == Some("--list-devices") {
        print_devices();
        return Ok(());
    }

    let config_path = arg.map_or_else(default_config_path, PathBuf::from);
    tracing::info!("loading configuration from {}", config_path.display());
    let config = GatewayConfig::from_file(&config_path)?;
    if config.sources.is_empty() {
        tracing::warn!("no sources configured, the gateway will emit silence");
    }

    let status_interval = config.engine.status_interval;
    let handle = engine::start(config)?;

    if status_interval.is_zero() {
        tokio::signal::ctrl_c().await?;
    } else {
        let mut ticker = tokio::time::interval(status_interval);
        ticker.tick().await; // first tick fires immediately
        loop {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => break,
                _ = ticker.tick() => print_status(&handle),
            }
        }
    }

    tracing::info!("shutting down");
    handle.shutdown();
    Ok(())
}

fn print_status(handle: &engine::EngineHandle) {
    let snap = handle.snapshot();
    let sources: Vec<String> = snap
        .sources
        .iter()
        .map(|s| {
            let mut line = format!("{} {:>6.1}dB", s.name, s.level_dbfs);
            if s.muted {
                line.push_str(" [muted]");
            } else if !s.enabled {
                line.push_str(" [off]");
            } else if s.pre_buffering == Some(true) {
                line.push_str(" [buffering]");
            }
            line
        })
        .collect();
    tracing::info!(
        "tick {} ptt={} | {}",
        snap.ticks,
        if snap.transmit_demand { "on" } else { "off" },
        sources.join("  ")
    );
}

fn default_config_path() -> PathBuf {
    directories::ProjectDirs::from("", "", "radiomix")
        .map(|dirs| dirs.config_dir().join("gateway.conf"))
        .unwrap_or_else(|| PathBuf::from("gateway.conf"))
}

fn print_devices() {
    println!("\n=== Available Audio Devices ===");
    for device in list_devices() {
        let kind = match (device.is_input, device.is_output) {
            (true, true) => "Input/Output",
            (true, false) => "Input",
            (false, true) => "Output",
            _ => "Unknown",
        };
        let default_marker = if device.is_default { " [DEFAULT]" } else { "" };
        println!("  {} ({}){}:", device.name, kind, default_marker);
        println!("    ID: {}", device.id);
    }
    println!();
}
