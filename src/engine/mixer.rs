//! Mixer tick orchestration
//!
//! One pass per tick: poll every source, update its meter and detector,
//! resolve the direct transmit path, run duck arbitration with the
//! direct/unconditional sources as higher-priority context, then sum the
//! included audio. Summing clips to the sample range rather than
//! averaging, so a single active source always passes through at full
//! scale. The output is never absent: ticks with no audio emit silence
//! of the exact chunk length so continuous encoders downstream keep
//! their state.

use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::audio::chunk::{AudioChunk, AudioFormat};
use crate::config::{EngineConfig, SourceConfig};
use crate::engine::detect::{LevelMeter, SignalDetector};
use crate::engine::duck::{DuckArbiter, DuckPhase};
use crate::sources::{AudioSource, Source};

/// What one tick hands to the sink workers.
pub struct MixOutput {
    /// Everything audible, direct path included. Feeds the transmitter.
    pub transmit: AudioChunk,
    /// The general mix (monitor/stream outputs). Direct-path audio is
    /// included here only for sources configured with `direct_mix`.
    pub mix: AudioChunk,
    /// Raw PTT demand for this tick; the transmit sink applies the
    /// release delay.
    pub transmit_demand: bool,
}

/// Per-tick diagnostic record, emitted at trace level as JSON.
#[derive(Serialize)]
pub struct MixTickState {
    pub timestamp: DateTime<Utc>,
    pub tick: u64,
    pub transmit_demand: bool,
    pub sources: Vec<SourceTickTrace>,
}

#[derive(Serialize)]
pub struct SourceTickTrace {
    pub name: String,
    pub level_dbfs: f32,
    pub active: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phase: Option<DuckPhase>,
    pub included: bool,
}

struct SourceSlot {
    source: Source,
    meter: LevelMeter,
    detector: SignalDetector,
    /// File playback is a deterministic event; everything else is
    /// debounced through the detector.
    debounced: bool,
    priority: i32,
    ptt_triggering: bool,
    direct_mix: bool,
    mix_ratio: f32,
    duck_index: Option<usize>,
    last_muted: bool,
    last_enabled: bool,
}

struct Polled {
    chunk: Option<AudioChunk>,
    active: bool,
}

pub struct Mixer {
    format: AudioFormat,
    slots: Vec<SourceSlot>,
    arbiter: DuckArbiter,
    duck_count: usize,
    tick_count: u64,
}

impl Mixer {
    pub fn new(engine: &EngineConfig, format: AudioFormat, sources: Vec<(Source, SourceConfig)>) -> Self {
        let mut arbiter = DuckArbiter::new();
        let mut duck_count = 0;

        let slots = sources
            .into_iter()
            .map(|(source, cfg)| {
                let duck_index = if cfg.duck_eligible && !cfg.ptt_triggering {
                    duck_count += 1;
                    Some(arbiter.register(
                        cfg.priority,
                        cfg.switch_padding_time.unwrap_or(engine.switch_padding_time),
                    ))
                } else {
                    None
                };
                let muted = source.descriptor().control.is_muted();
                let enabled = source.descriptor().control.is_enabled();
                SourceSlot {
                    source,
                    meter: LevelMeter::new(),
                    detector: SignalDetector::new(
                        engine.instant_threshold_dbfs,
                        cfg.attack_time.unwrap_or(engine.attack_time),
                        cfg.release_time.unwrap_or(engine.release_time),
                        engine.release_hold,
                    ),
                    debounced: !matches!(cfg.kind, crate::config::SourceKind::File),
                    priority: cfg.priority,
                    ptt_triggering: cfg.ptt_triggering,
                    direct_mix: cfg.direct_mix,
                    mix_ratio: cfg.mix_ratio,
                    duck_index,
                    last_muted: muted,
                    last_enabled: enabled,
                }
            })
            .collect();

        Self {
            format,
            slots,
            arbiter,
            duck_count,
            tick_count: 0,
        }
    }

    /// Run one tick. Always returns full-length chunks.
    pub fn tick(&mut self, now: Instant) -> MixOutput {
        self.tick_count += 1;
        let n = self.format.chunk_samples;

        let mut duck_active = vec![false; self.duck_count];
        let mut context_priority: Option<i32> = None;
        let mut transmit_demand = false;
        let mut polled = Vec::with_capacity(self.slots.len());

        for slot in &mut self.slots {
            let control = slot.source.descriptor().control.clone();

            let muted = control.is_muted();
            if muted != slot.last_muted {
                slot.last_muted = muted;
                slot.source.on_mute_changed(muted);
                slot.detector.reset();
            }
            let enabled = control.is_enabled();
            if enabled != slot.last_enabled {
                slot.last_enabled = enabled;
                if enabled {
                    // Debounce state from before the disable window is
                    // stale; a re-enabled source starts idle.
                    slot.detector.reset();
                }
            }
            if muted || !enabled {
                // Keep draining so resume plays live audio, not the
                // backlog captured during the pause.
                slot.source.discard_tick();
                control.set_level_dbfs(-100.0);
                polled.push(Polled {
                    chunk: None,
                    active: false,
                });
                continue;
            }

            let poll = slot.source.poll(now);
            let instant_dbfs = poll.chunk.as_ref().map_or(-100.0, AudioChunk::rms_dbfs);
            control.set_level_dbfs(slot.meter.update(instant_dbfs));

            let active = if slot.debounced {
                slot.detector.update(instant_dbfs, now)
            } else {
                poll.chunk.is_some()
            };

            // PTT keys on the debounced flag, not bare chunk presence, so
            // line noise on an idle radio cannot hold the transmitter.
            transmit_demand |= poll.wants_transmit && active;

            if let Some(index) = slot.duck_index {
                duck_active[index] = active;
            } else if active {
                context_priority = Some(context_priority.map_or(slot.priority, |p| p.min(slot.priority)));
            }

            polled.push(Polled {
                chunk: poll.chunk,
                active,
            });
        }

        let included = self.arbiter.arbitrate(&duck_active, context_priority, now);
        let included_duck_count = included.iter().filter(|i| **i).count();

        let mut transmit_acc = vec![0i32; n];
        let mut mix_acc = vec![0i32; n];
        let mut trace_sources = Vec::with_capacity(self.slots.len());

        for (slot, p) in self.slots.iter().zip(&polled) {
            let mut is_included = false;
            if let Some(chunk) = &p.chunk {
                if slot.ptt_triggering {
                    // Direct path: straight to the transmitter, never
                    // delayed by arbitration.
                    accumulate(&mut transmit_acc, &chunk.samples, slot.mix_ratio);
                    if slot.direct_mix {
                        accumulate(&mut mix_acc, &chunk.samples, slot.mix_ratio);
                    }
                    is_included = true;
                } else if let Some(index) = slot.duck_index {
                    if included[index] {
                        let ratio = if included_duck_count > 1 {
                            slot.mix_ratio
                        } else {
                            1.0
                        };
                        accumulate(&mut mix_acc, &chunk.samples, ratio);
                        is_included = true;
                    }
                } else {
                    // Duck-disabled: always in the mix, always at the
                    // configured ratio.
                    accumulate(&mut mix_acc, &chunk.samples, slot.mix_ratio);
                    is_included = true;
                }
            }
            trace_sources.push(SourceTickTrace {
                name: slot.source.descriptor().name.clone(),
                level_dbfs: slot.source.descriptor().control.level_dbfs(),
                active: p.active,
                phase: slot.duck_index.map(|i| self.arbiter.phase(i)),
                included: is_included,
            });
        }

        // The transmitter carries the general mix too.
        for (t, m) in transmit_acc.iter_mut().zip(&mix_acc) {
            *t += *m;
        }

        if tracing::enabled!(target: "radiomix::engine::mixer", tracing::Level::TRACE) {
            let state = MixTickState {
                timestamp: Utc::now(),
                tick: self.tick_count,
                transmit_demand,
                sources: trace_sources,
            };
            if let Ok(json) = serde_json::to_string(&state) {
                tracing::trace!(target: "radiomix::engine::mixer", "{json}");
            }
        }

        MixOutput {
            transmit: clip_to_chunk(&transmit_acc, self.format, now),
            mix: clip_to_chunk(&mix_acc, self.format, now),
            transmit_demand,
        }
    }

    pub fn shutdown(&mut self) {
        for slot in &mut self.slots {
            slot.source.shutdown();
        }
    }
}

fn accumulate(acc: &mut [i32], samples: &[i16], ratio: f32) {
    if (ratio - 1.0).abs() < f32::EPSILON {
        for (a, &s) in acc.iter_mut().zip(samples) {
            *a += i32::from(s);
        }
    } else {
        for (a, &s) in acc.iter_mut().zip(samples) {
            *a += (f32::from(s) * ratio) as i32;
        }
    }
}

fn clip_to_chunk(acc: &[i32], format: AudioFormat, now: Instant) -> AudioChunk {
    let samples = acc
        .iter()
        .map(|&v| v.clamp(i32::from(i16::MIN), i32::from(i16::MAX)) as i16)
        .collect();
    AudioChunk::from_samples(samples, format, now)
}
