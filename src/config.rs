//! Gateway configuration
//!
//! Flat `key = value` text file. Engine-wide keys are bare
//! (`attack_time = 0.15`), per-source keys are namespaced
//! (`source.radio.priority = 0`). Parsing is defensive per-field: a
//! malformed value logs a warning and keeps that field's default without
//! aborting the rest of the file. Structural problems (duplicate source
//! names, unknown source kinds) fail fast at startup instead.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::constants::{
    DEFAULT_BUFFER_CAPACITY_CHUNKS, DEFAULT_BUFFER_CUSHION_CHUNKS, DEFAULT_CHUNK_SAMPLES,
    DEFAULT_INSTANT_THRESHOLD_DBFS, DEFAULT_SAMPLE_RATE,
};
use crate::error::{Error, Result};

/// Engine-wide tuning. All durations are configured in seconds.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub sample_rate: u32,
    pub chunk_samples: usize,
    /// Instant signal-presence threshold fed to every SignalDetector
    pub instant_threshold_dbfs: f32,
    /// Default hysteresis, overridable per source
    pub attack_time: Duration,
    pub release_time: Duration,
    /// Post-release hold bridging bursty upstream delivery
    pub release_hold: Duration,
    pub switch_padding_time: Duration,
    pub watchdog_poll: Duration,
    /// How long a recovery stage gets to restore reads before escalating
    pub watchdog_grace: Duration,
    /// Transmitter stays keyed this long after the last transmit demand
    pub ptt_release_delay: Duration,
    /// Status line interval; zero disables status reporting
    pub status_interval: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            sample_rate: DEFAULT_SAMPLE_RATE,
            chunk_samples: DEFAULT_CHUNK_SAMPLES,
            instant_threshold_dbfs: DEFAULT_INSTANT_THRESHOLD_DBFS,
            attack_time: Duration::from_millis(150),
            release_time: Duration::from_secs(3),
            release_hold: Duration::from_secs(1),
            switch_padding_time: Duration::from_secs(1),
            watchdog_poll: Duration::from_secs(1),
            watchdog_grace: Duration::from_secs(5),
            ptt_release_delay: Duration::from_millis(300),
            status_interval: Duration::from_secs(5),
        }
    }
}

/// Where a source's bytes originate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceKind {
    /// Blocking hardware capture device (cpal id, `default` allowed)
    Hardware { device: String },
    /// Length-prefixed PCM over one TCP connection; we listen
    Network { port: u16 },
    /// Raw PCM from a named pipe (FIFO)
    Pipe { path: PathBuf },
    /// Queued WAV announcements
    File,
}

/// One configured source.
#[derive(Debug, Clone)]
pub struct SourceConfig {
    pub name: String,
    pub kind: SourceKind,
    /// Lower number = higher priority
    pub priority: i32,
    pub duck_eligible: bool,
    /// Audio goes straight to the transmit sink, bypassing arbitration
    pub ptt_triggering: bool,
    /// Direct-path audio is also summed into the general mix
    pub direct_mix: bool,
    /// Used when ducking is disabled or several equal-priority sources mix
    pub mix_ratio: f32,
    /// Linear gain applied at ingestion
    pub gain: f32,
    pub enabled: bool,
    pub muted: bool,
    pub buffer_cushion_chunks: usize,
    pub buffer_capacity_chunks: usize,
    /// Per-source hysteresis overrides (engine defaults when None)
    pub attack_time: Option<Duration>,
    pub release_time: Option<Duration>,
    pub switch_padding_time: Option<Duration>,
    pub watchdog_timeout: Duration,
    pub watchdog_max_restarts: u32,
    /// Stage-3 privileged reset command; stage 3 is skipped when unset
    pub watchdog_reset_cmd: Option<String>,
}

impl SourceConfig {
    pub fn new(name: &str, kind: SourceKind) -> Self {
        Self {
            name: name.to_string(),
            kind,
            priority: 10,
            duck_eligible: false,
            ptt_triggering: false,
            direct_mix: false,
            mix_ratio: 1.0,
            gain: 1.0,
            enabled: true,
            muted: false,
            buffer_cushion_chunks: DEFAULT_BUFFER_CUSHION_CHUNKS,
            buffer_capacity_chunks: DEFAULT_BUFFER_CAPACITY_CHUNKS,
            attack_time: None,
            release_time: None,
            switch_padding_time: None,
            watchdog_timeout: Duration::from_secs(10),
            watchdog_max_restarts: 8,
            watchdog_reset_cmd: None,
        }
    }

    /// Hardware-backed sources are the ones the watchdog supervises.
    pub fn is_hardware_backed(&self) -> bool {
        matches!(self.kind, SourceKind::Hardware { .. })
    }
}

/// Output sink wiring. A device/target of `none` disables that sink.
#[derive(Debug, Clone)]
pub struct SinkConfig {
    /// Transmit output device id
    pub transmit_device: Option<String>,
    /// Local monitor output device id
    pub monitor_device: Option<String>,
    /// `host:port` of the downstream Opus stream receiver
    pub stream_target: Option<String>,
    pub stream_bitrate: u32,
}

impl Default for SinkConfig {
    fn default() -> Self {
        Self {
            transmit_device: Some("default".to_string()),
            monitor_device: None,
            stream_target: None,
            stream_bitrate: 32_000,
        }
    }
}

/// Complete gateway configuration.
#[derive(Debug, Clone, Default)]
pub struct GatewayConfig {
    pub engine: EngineConfig,
    pub sources: Vec<SourceConfig>,
    pub sinks: SinkConfig,
}

impl GatewayConfig {
    /// Load from a file; a missing file logs a warning and yields
    /// defaults, matching long-standing gateway behavior.
    pub fn from_file(path: &Path) -> Result<Self> {
        match std::fs::read_to_string(path) {
            Ok(text) => Self::parse(&text),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::warn!("config file {} not found, using defaults", path.display());
                Ok(Self::default())
            }
            Err(e) => Err(Error::Io(e)),
        }
    }

    /// Parse configuration text.
    pub fn parse(text: &str) -> Result<Self> {
        let mut cfg = Self::default();
        let mut seen_sources: HashSet<String> = HashSet::new();

        for (lineno, raw) in text.lines().enumerate() {
            let line = raw.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let Some((key, value)) = line.split_once('=') else {
                tracing::warn!("config line {}: not a key = value pair, skipped", lineno + 1);
                continue;
            };
            let key = key.trim();
            let value = value.trim();
            if value.is_empty() {
                continue;
            }

            if let Some(rest) = key.strip_prefix("source.") {
                let Some((name, field)) = rest.split_once('.') else {
                    tracing::warn!("config line {}: malformed source key {key:?}", lineno + 1);
                    continue;
                };
                cfg.apply_source_field(name, field, value, &mut seen_sources)?;
            } else if let Some(field) = key.strip_prefix("sink.") {
                cfg.apply_sink_field(field, value);
            } else {
                cfg.apply_engine_field(key, value);
            }
        }

        Ok(cfg)
    }

    fn source_mut(&mut self, name: &str, seen: &mut HashSet<String>) -> &mut SourceConfig {
        if !seen.contains(name) {
            seen.insert(name.to_string());
            // Kind gets fixed up by the `kind`/`device`/`port`/`path`
            // fields; default to a file source so a partial stanza still
            // yields something harmless.
            self.sources.push(SourceConfig::new(name, SourceKind::File));
        }
        // Unwrap is fine: the entry was just inserted above.
        self.sources
            .iter_mut()
            .find(|s| s.name == name)
            .expect("source entry just inserted")
    }

    fn apply_source_field(
        &mut self,
        name: &str,
        field: &str,
        value: &str,
        seen: &mut HashSet<String>,
    ) -> Result<()> {
        let src = self.source_mut(name, seen);
        match field {
            "kind" => match value.to_ascii_lowercase().as_str() {
                "hardware" => {
                    if !matches!(src.kind, SourceKind::Hardware { .. }) {
                        src.kind = SourceKind::Hardware {
                            device: "default".to_string(),
                        };
                    }
                }
                "network" => {
                    if !matches!(src.kind, SourceKind::Network { .. }) {
                        src.kind = SourceKind::Network {
                            port: crate::constants::DEFAULT_REMOTE_PORT,
                        };
                    }
                }
                "pipe" => {
                    if !matches!(src.kind, SourceKind::Pipe { .. }) {
                        src.kind = SourceKind::Pipe {
                            path: PathBuf::new(),
                        };
                    }
                }
                "file" => src.kind = SourceKind::File,
                other => {
                    return Err(Error::Config(format!(
                        "source {name}: unknown kind {other:?}"
                    )));
                }
            },
            "device" => {
                src.kind = SourceKind::Hardware {
                    device: value.to_string(),
                };
            }
            "port" => {
                if let Some(port) = parse_field::<u16>(name, field, value) {
                    src.kind = SourceKind::Network { port };
                }
            }
            "path" => {
                src.kind = SourceKind::Pipe {
                    path: PathBuf::from(value),
                };
            }
            "priority" => set_parsed(&mut src.priority, name, field, value),
            "duck_eligible" => src.duck_eligible = parse_bool(value),
            "ptt_triggering" => src.ptt_triggering = parse_bool(value),
            "direct_mix" => src.direct_mix = parse_bool(value),
            "mix_ratio" => set_parsed(&mut src.mix_ratio, name, field, value),
            "gain" => set_parsed(&mut src.gain, name, field, value),
            "enabled" => src.enabled = parse_bool(value),
            "muted" => src.muted = parse_bool(value),
            "buffer_cushion" => set_parsed(&mut src.buffer_cushion_chunks, name, field, value),
            "buffer_capacity" => set_parsed(&mut src.buffer_capacity_chunks, name, field, value),
            "attack_time" => src.attack_time = parse_secs(name, field, value),
            "release_time" => src.release_time = parse_secs(name, field, value),
            "switch_padding_time" => src.switch_padding_time = parse_secs(name, field, value),
            "watchdog_timeout" => {
                if let Some(d) = parse_secs(name, field, value) {
                    src.watchdog_timeout = d;
                }
            }
            "watchdog_max_restarts" => {
                set_parsed(&mut src.watchdog_max_restarts, name, field, value)
            }
            "watchdog_reset_cmd" => src.watchdog_reset_cmd = Some(value.to_string()),
            other => {
                tracing::warn!("source {name}: unknown field {other:?} ignored");
            }
        }
        Ok(())
    }

    fn apply_sink_field(&mut self, field: &str, value: &str) {
        let s = &mut self.sinks;
        match field {
            "transmit_device" => s.transmit_device = optional_name(value),
            "monitor_device" => s.monitor_device = optional_name(value),
            "stream_target" => s.stream_target = optional_name(value),
            "stream_bitrate" => set_parsed(&mut s.stream_bitrate, "sink", field, value),
            other => {
                tracing::warn!("unknown sink field {other:?} ignored");
            }
        }
    }

    fn apply_engine_field(&mut self, key: &str, value: &str) {
        let e = &mut self.engine;
        match key {
            "sample_rate" => set_parsed(&mut e.sample_rate, "engine", key, value),
            "chunk_samples" => set_parsed(&mut e.chunk_samples, "engine", key, value),
            "instant_threshold_dbfs" => {
                set_parsed(&mut e.instant_threshold_dbfs, "engine", key, value)
            }
            "attack_time" => {
                if let Some(d) = parse_secs("engine", key, value) {
                    e.attack_time = d;
                }
            }
            "release_time" => {
                if let Some(d) = parse_secs("engine", key, value) {
                    e.release_time = d;
                }
            }
            "release_hold" => {
                if let Some(d) = parse_secs("engine", key, value) {
                    e.release_hold = d;
                }
            }
            "switch_padding_time" => {
                if let Some(d) = parse_secs("engine", key, value) {
                    e.switch_padding_time = d;
                }
            }
            "watchdog_poll" => {
                if let Some(d) = parse_secs("engine", key, value) {
                    e.watchdog_poll = d;
                }
            }
            "watchdog_grace" => {
                if let Some(d) = parse_secs("engine", key, value) {
                    e.watchdog_grace = d;
                }
            }
            "ptt_release_delay" => {
                if let Some(d) = parse_secs("engine", key, value) {
                    e.ptt_release_delay = d;
                }
            }
            "status_interval" => {
                if let Some(d) = parse_secs("engine", key, value) {
                    e.status_interval = d;
                }
            }
            other => {
                tracing::warn!("unknown config key {other:?} ignored");
            }
        }
    }
}

/// `none`/`off` disables an optional device/target setting.
fn optional_name(value: &str) -> Option<String> {
    match value.to_ascii_lowercase().as_str() {
        "none" | "off" => None,
        _ => Some(value.to_string()),
    }
}

fn parse_bool(value: &str) -> bool {
    matches!(
        value.to_ascii_lowercase().as_str(),
        "true" | "yes" | "1" | "on"
    )
}

/// Parse a field, logging and returning None on failure so the caller
/// keeps the default.
fn parse_field<T: std::str::FromStr>(scope: &str, field: &str, value: &str) -> Option<T> {
    match value.parse::<T>() {
        Ok(v) => Some(v),
        Err(_) => {
            tracing::warn!("{scope}.{field}: malformed value {value:?}, keeping default");
            None
        }
    }
}

fn set_parsed<T: std::str::FromStr>(target: &mut T, scope: &str, field: &str, value: &str) {
    if let Some(v) = parse_field(scope, field, value) {
        *target = v;
    }
}

/// Seconds-valued field; negative values are rejected.
fn parse_secs(scope: &str, field: &str, value: &str) -> Option<Duration> {
    match value.parse::<f64>() {
        Ok(secs) if secs >= 0.0 && secs.is_finite() => Some(Duration::from_secs_f64(secs)),
        _ => {
            tracing::warn!("{scope}.{field}: malformed duration {value:?}, keeping default");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_when_empty() {
        let cfg = GatewayConfig::parse("").unwrap();
        assert_eq!(cfg.engine.sample_rate, DEFAULT_SAMPLE_RATE);
        assert!(cfg.sources.is_empty());
    }

    #[test]
    fn parses_engine_and_source_fields() {
        let text = "\
# gateway config
sample_rate = 44100
attack_time = 0.2

source.radio.kind = hardware
source.radio.device = input:AIOC
source.radio.priority = 0
source.radio.ptt_triggering = yes

source.sdr1.kind = network
source.sdr1.port = 9600
source.sdr1.priority = 1
source.sdr1.duck_eligible = true
source.sdr1.mix_ratio = 0.8
";
        let cfg = GatewayConfig::parse(text).unwrap();
        assert_eq!(cfg.engine.sample_rate, 44_100);
        assert_eq!(cfg.engine.attack_time, Duration::from_millis(200));
        assert_eq!(cfg.sources.len(), 2);

        let radio = &cfg.sources[0];
        assert_eq!(radio.name, "radio");
        assert_eq!(
            radio.kind,
            SourceKind::Hardware {
                device: "input:AIOC".into()
            }
        );
        assert_eq!(radio.priority, 0);
        assert!(radio.ptt_triggering);

        let sdr = &cfg.sources[1];
        assert_eq!(sdr.kind, SourceKind::Network { port: 9600 });
        assert!(sdr.duck_eligible);
        assert!((sdr.mix_ratio - 0.8).abs() < f32::EPSILON);
    }

    #[test]
    fn malformed_numeric_does_not_abort_later_fields() {
        let text = "\
sample_rate = not_a_number
release_time = 2.5
source.sdr1.priority = oops
source.sdr1.duck_eligible = true
";
        let cfg = GatewayConfig::parse(text).unwrap();
        // Malformed field keeps its default...
        assert_eq!(cfg.engine.sample_rate, DEFAULT_SAMPLE_RATE);
        assert_eq!(cfg.sources[0].priority, 10);
        // ...while later fields still apply.
        assert_eq!(cfg.engine.release_time, Duration::from_secs_f64(2.5));
        assert!(cfg.sources[0].duck_eligible);
    }

    #[test]
    fn unknown_kind_fails_fast() {
        let err = GatewayConfig::parse("source.x.kind = quantum").unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn negative_duration_keeps_default() {
        let cfg = GatewayConfig::parse("attack_time = -1.0").unwrap();
        assert_eq!(cfg.engine.attack_time, Duration::from_millis(150));
    }

    #[test]
    fn bool_forms() {
        for v in ["true", "YES", "1", "on"] {
            let cfg = GatewayConfig::parse(&format!("source.a.muted = {v}")).unwrap();
            assert!(cfg.sources[0].muted, "{v}");
        }
        let cfg = GatewayConfig::parse("source.a.muted = off").unwrap();
        assert!(!cfg.sources[0].muted);
    }

    #[test]
    fn sink_fields_and_disabling() {
        let text = "\
sink.transmit_device = output:USB Audio
sink.monitor_device = none
sink.stream_target = 10.0.0.5:9700
sink.stream_bitrate = 24000
";
        let cfg = GatewayConfig::parse(text).unwrap();
        assert_eq!(cfg.sinks.transmit_device.as_deref(), Some("output:USB Audio"));
        assert!(cfg.sinks.monitor_device.is_none());
        assert_eq!(cfg.sinks.stream_target.as_deref(), Some("10.0.0.5:9700"));
        assert_eq!(cfg.sinks.stream_bitrate, 24_000);

        let cfg = GatewayConfig::parse("sink.transmit_device = none").unwrap();
        assert!(cfg.sinks.transmit_device.is_none());
    }

    #[test]
    fn missing_file_yields_defaults() {
        let cfg = GatewayConfig::from_file(Path::new("/nonexistent/gateway.conf")).unwrap();
        assert!(cfg.sources.is_empty());
    }

    #[test]
    fn file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("gateway.conf");
        std::fs::write(&path, "source.ann.kind = file\nsource.ann.ptt_triggering = on\n")
            .unwrap();
        let cfg = GatewayConfig::from_file(&path).unwrap();
        assert_eq!(cfg.sources.len(), 1);
        assert!(cfg.sources[0].ptt_triggering);
    }
}
