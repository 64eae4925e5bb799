//! Engine assembly and lifecycle
//!
//! Builds sources and sinks from configuration, runs the mixer on its
//! own elevated-priority thread, and supervises hardware sources with
//! the watchdog. The returned [`EngineHandle`] is the control seam:
//! mute/enable toggles, announcement queueing, status snapshots, and
//! ordered shutdown.

pub mod detect;
pub mod duck;
pub mod mixer;
pub mod rt;
pub mod tick;
pub mod watchdog;

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use dashmap::DashMap;
use serde::Serialize;

pub use duck::{DuckArbiter, DuckPhase};
pub use mixer::{MixOutput, MixTickState, Mixer};
pub use tick::TickClock;
pub use watchdog::{Recoverable, RecoveryStage, Watchdog};

use crate::audio::buffer::SharedSourceBuffer;
use crate::audio::chunk::AudioFormat;
use crate::config::{GatewayConfig, SourceConfig, SourceKind};
use crate::error::{Error, Result, SourceError};
use crate::sink::{MonitorSink, NullPtt, StreamSink, TransmitSink};
use crate::sources::file::AnnouncementQueue;
use crate::sources::{
    AudioSource, FileSource, HardwareCaptureSource, NamedPipeSource, NetworkCaptureSource, Source,
    SourceControl,
};

/// Counters the mixer thread publishes for status reporting.
struct EngineStats {
    ticks: AtomicU64,
    transmit_demand: AtomicBool,
}

/// Point-in-time view of one source for the status line.
#[derive(Debug, Serialize)]
pub struct SourceStatus {
    pub name: String,
    pub enabled: bool,
    pub muted: bool,
    pub level_dbfs: f32,
    /// Only buffered (hardware/network/pipe) sources report this
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pre_buffering: Option<bool>,
}

#[derive(Debug, Serialize)]
pub struct StatusSnapshot {
    pub ticks: u64,
    pub transmit_demand: bool,
    pub sources: Vec<SourceStatus>,
}

/// Start the engine from a parsed configuration.
pub fn start(config: GatewayConfig) -> Result<EngineHandle> {
    let format = AudioFormat::new(config.engine.sample_rate, config.engine.chunk_samples);

    let controls: Arc<DashMap<String, Arc<SourceControl>>> = Arc::new(DashMap::new());
    let queues: Arc<DashMap<String, AnnouncementQueue>> = Arc::new(DashMap::new());
    let mut buffers: Vec<(String, SharedSourceBuffer)> = Vec::new();
    let mut names = Vec::with_capacity(config.sources.len());
    let mut watchdog_targets: Vec<(Box<dyn Recoverable>, SourceConfig)> = Vec::new();
    let mut sources: Vec<(Source, SourceConfig)> = Vec::new();

    for cfg in &config.sources {
        if controls.contains_key(&cfg.name) {
            return Err(Error::Source(SourceError::Duplicate(cfg.name.clone())));
        }

        let source = match &cfg.kind {
            SourceKind::Hardware { device } => {
                let s = HardwareCaptureSource::new(cfg, device, format)?;
                buffers.push((cfg.name.clone(), s.buffer().clone()));
                watchdog_targets.push((Box::new(s.recovery_target()), cfg.clone()));
                Source::Hardware(s)
            }
            SourceKind::Network { port } => {
                let s = NetworkCaptureSource::new(cfg, *port, format)?;
                buffers.push((cfg.name.clone(), s.buffer().clone()));
                Source::Network(s)
            }
            SourceKind::Pipe { path } => Source::Pipe(NamedPipeSource::new(cfg, path, format)?),
            SourceKind::File => {
                let s = FileSource::new(cfg, format);
                queues.insert(cfg.name.clone(), s.queue());
                Source::File(s)
            }
        };

        controls.insert(cfg.name.clone(), source.descriptor().control.clone());
        names.push(cfg.name.clone());
        sources.push((source, cfg.clone()));
        tracing::info!(source = %cfg.name, kind = ?cfg.kind, priority = cfg.priority, "source ready");
    }

    let watchdog = if watchdog_targets.is_empty() {
        None
    } else {
        Some(Watchdog::spawn(
            config.engine.watchdog_poll,
            config.engine.watchdog_grace,
            watchdog_targets,
        ))
    };

    // Sink failures degrade the gateway, they do not abort it.
    let transmit = config.sinks.transmit_device.as_ref().and_then(|device| {
        TransmitSink::spawn(
            device,
            format.sample_rate,
            Box::new(NullPtt::new()),
            config.engine.ptt_release_delay,
        )
        .map_err(|e| tracing::error!("transmit sink unavailable: {e}"))
        .ok()
    });
    let monitor = config.sinks.monitor_device.as_ref().and_then(|device| {
        MonitorSink::spawn(device, format.sample_rate)
            .map_err(|e| tracing::error!("monitor sink unavailable: {e}"))
            .ok()
    });
    let stream = config.sinks.stream_target.as_ref().and_then(|target| {
        StreamSink::spawn(
            target,
            format.sample_rate,
            format.chunk_samples,
            config.sinks.stream_bitrate,
            std::time::Duration::from_secs(crate::constants::RECONNECT_INTERVAL_SECS),
        )
        .map_err(|e| tracing::error!("stream sink unavailable: {e}"))
        .ok()
    });

    let stats = Arc::new(EngineStats {
        ticks: AtomicU64::new(0),
        transmit_demand: AtomicBool::new(false),
    });
    let running = Arc::new(AtomicBool::new(true));

    let mut mixer = Mixer::new(&config.engine, format, sources);
    let thread_running = running.clone();
    let thread_stats = stats.clone();

    let mixer_thread = thread::Builder::new()
        .name("mixer".to_string())
        .spawn(move || {
            rt::elevate_current_thread();
            let mut clock = TickClock::new(format.chunk_duration());
            let mut transmit = transmit;
            let mut monitor = monitor;
            let mut stream = stream;

            while thread_running.load(Ordering::Relaxed) {
                let now = clock.wait();
                let out = mixer.tick(now);

                thread_stats.ticks.fetch_add(1, Ordering::Relaxed);
                thread_stats
                    .transmit_demand
                    .store(out.transmit_demand, Ordering::Relaxed);

                if let Some(sink) = &transmit {
                    sink.send(out.transmit, out.transmit_demand, now);
                }
                if let Some(sink) = &monitor {
                    sink.send(out.mix.clone());
                }
                if let Some(sink) = &stream {
                    sink.send(out.mix);
                }
            }

            // Readers stop first so no source keeps filling, then the
            // sinks drain what is already queued and unkey.
            mixer.shutdown();
            if let Some(sink) = transmit.as_mut() {
                sink.stop();
            }
            if let Some(sink) = monitor.as_mut() {
                sink.stop();
            }
            if let Some(sink) = stream.as_mut() {
                sink.stop();
            }
        })
        .map_err(Error::Io)?;

    tracing::info!(
        sample_rate = format.sample_rate,
        chunk_samples = format.chunk_samples,
        tick_ms = format.chunk_duration().as_millis() as u64,
        sources = names.len(),
        "engine started"
    );

    Ok(EngineHandle {
        names,
        controls,
        queues,
        buffers,
        stats,
        running,
        mixer_thread: Some(mixer_thread),
        watchdog,
    })
}

/// Control seam over a running engine.
pub struct EngineHandle {
    names: Vec<String>,
    controls: Arc<DashMap<String, Arc<SourceControl>>>,
    queues: Arc<DashMap<String, AnnouncementQueue>>,
    buffers: Vec<(String, SharedSourceBuffer)>,
    stats: Arc<EngineStats>,
    running: Arc<AtomicBool>,
    mixer_thread: Option<JoinHandle<()>>,
    watchdog: Option<Watchdog>,
}

impl EngineHandle {
    pub fn set_muted(&self, name: &str, muted: bool) -> Result<()> {
        let control = self.control(name)?;
        control.set_muted(muted);
        tracing::info!(source = %name, muted, "mute changed");
        Ok(())
    }

    pub fn set_enabled(&self, name: &str, enabled: bool) -> Result<()> {
        let control = self.control(name)?;
        control.set_enabled(enabled);
        tracing::info!(source = %name, enabled, "enable changed");
        Ok(())
    }

    /// Queue a WAV file on a file source.
    pub fn play_announcement(&self, source: &str, path: PathBuf) -> Result<()> {
        let queue = self
            .queues
            .get(source)
            .ok_or_else(|| SourceError::NotFound(source.to_string()))?;
        queue.enqueue(path);
        Ok(())
    }

    pub fn is_transmit_demanded(&self) -> bool {
        self.stats.transmit_demand.load(Ordering::Relaxed)
    }

    pub fn tick_count(&self) -> u64 {
        self.stats.ticks.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> StatusSnapshot {
        let sources = self
            .names
            .iter()
            .map(|name| {
                let (enabled, muted, level) = self
                    .controls
                    .get(name)
                    .map(|c| (c.is_enabled(), c.is_muted(), c.level_dbfs()))
                    .unwrap_or((false, false, -100.0));
                let pre_buffering = self
                    .buffers
                    .iter()
                    .find(|(n, _)| n == name)
                    .map(|(_, b)| b.is_pre_buffering());
                SourceStatus {
                    name: name.clone(),
                    enabled,
                    muted,
                    level_dbfs: level,
                    pre_buffering,
                }
            })
            .collect();

        StatusSnapshot {
            ticks: self.stats.ticks.load(Ordering::Relaxed),
            transmit_demand: self.stats.transmit_demand.load(Ordering::Relaxed),
            sources,
        }
    }

    /// Stop everything: mixer loop, reader threads, sinks, watchdog.
    pub fn shutdown(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.mixer_thread.take() {
            let _ = handle.join();
        }
        if let Some(watchdog) = self.watchdog.as_mut() {
            watchdog.stop();
        }
        tracing::info!("engine stopped");
    }

    fn control(&self, name: &str) -> Result<Arc<SourceControl>> {
        self.controls
            .get(name)
            .map(|c| Arc::clone(c.value()))
            .ok_or_else(|| SourceError::NotFound(name.to_string()).into())
    }
}

impl Drop for EngineHandle {
    fn drop(&mut self) {
        if self.mixer_thread.is_some() {
            self.stop();
        }
    }
}
