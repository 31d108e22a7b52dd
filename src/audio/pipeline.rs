//! Per-frame analysis: bands, smoothing, peaks, beat, activity

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use serde::Serialize;
use thiserror::Error;

use super::bands::{
    compute_bands, compute_rms, finite_or_zero, Band, BandEnergySet, BandLayout, SpectralFrame,
};
use super::beat::{BeatEstimator, BeatState};
use super::presets::AudioPreset;
use super::smoothing::{BandPeaks, EnergySmoother};
use super::{AudioConfig, BASS_BOOST_RANGE, SENSITIVITY_RANGE};

const STATS_WINDOW: usize = 30;
const STATS_LOG_EVERY: u64 = 1000;

/// Everything a renderer needs from one analysis frame
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct FeatureSnapshot {
    /// Smoothed RMS loudness
    pub rms: f32,

    /// Smoothed band energies
    pub bands: BandEnergySet,

    /// Peak-hold values for each band
    pub peaks: BandEnergySet,

    pub rms_peak: f32,

    /// Tempo estimate, 0 while unknown
    pub bpm: f32,

    /// An onset was accepted on this frame
    pub is_beat: bool,

    /// Position within the current beat cycle [0, 1)
    pub beat_phase: f32,

    /// Input is above the activity threshold (or was recently)
    pub is_active: bool,

    /// Normalised magnitudes, DC to Nyquist
    pub spectrum: Vec<f32>,

    /// Sample-clock time of this frame in ms
    pub timestamp_ms: f64,
}

/// A frame the analysis cannot use. Never escapes the pipeline.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum AnalysisFault {
    #[error("spectral frame has no bins")]
    EmptySpectrum,

    #[error("spectral frame has sample rate 0")]
    InvalidSampleRate,

    #[error("{0} non-finite values in frame")]
    NonFiniteInput(usize),
}

impl AnalysisFault {
    fn check(frame: &SpectralFrame) -> Result<(), AnalysisFault> {
        if frame.magnitudes.is_empty() {
            return Err(AnalysisFault::EmptySpectrum);
        }
        if frame.sample_rate == 0 {
            return Err(AnalysisFault::InvalidSampleRate);
        }
        let bad = frame
            .magnitudes
            .iter()
            .chain(frame.time_samples.iter())
            .filter(|v| !v.is_finite())
            .count();
        if bad > 0 {
            return Err(AnalysisFault::NonFiniteInput(bad));
        }
        Ok(())
    }
}

/// RMS gate with a hold time, so short gaps don't flicker the active flag
#[derive(Debug, Clone)]
struct ActivityGate {
    threshold: f32,
    hold_ms: f64,
    last_active_ms: Option<f64>,
}

impl ActivityGate {
    fn update(&mut self, rms: f32, now_ms: f64) -> bool {
        if rms > self.threshold {
            self.last_active_ms = Some(now_ms);
            return true;
        }
        self.last_active_ms
            .is_some_and(|last| now_ms - last <= self.hold_ms)
    }

    fn reset(&mut self) {
        self.last_active_ms = None;
    }
}

/// Rolling per-frame processing time
#[derive(Debug, Clone, Default)]
struct ProcessingStats {
    recent: VecDeque<Duration>,
    frames: u64,
}

impl ProcessingStats {
    fn record(&mut self, elapsed: Duration) {
        self.recent.push_back(elapsed);
        if self.recent.len() > STATS_WINDOW {
            self.recent.pop_front();
        }
        self.frames += 1;

        if self.frames % STATS_LOG_EVERY == 0 {
            log::debug!(
                "Analysis: {} frames, avg {:.3} ms/frame over last {}",
                self.frames,
                self.average().as_secs_f64() * 1000.0,
                self.recent.len()
            );
        }
    }

    fn average(&self) -> Duration {
        if self.recent.is_empty() {
            return Duration::ZERO;
        }
        self.recent.iter().sum::<Duration>() / self.recent.len() as u32
    }
}

/// Owns all numeric analysis state for one capture session
#[derive(Debug)]
pub struct AnalysisPipeline {
    layout: BandLayout,
    beat_band: Band,
    sensitivity: f32,
    bass_boost: f32,
    smoother: EnergySmoother,
    peaks: BandPeaks,
    beat: BeatEstimator,
    activity: ActivityGate,
    stats: ProcessingStats,
    consecutive_faults: u32,
    max_consecutive_faults: u32,
    total_faults: u64,
}

impl AnalysisPipeline {
    pub fn new(config: &AudioConfig) -> Self {
        Self {
            layout: config.bands.clone(),
            beat_band: config.beat_band,
            sensitivity: config.sensitivity.clamp(SENSITIVITY_RANGE.0, SENSITIVITY_RANGE.1),
            bass_boost: config.bass_boost.clamp(BASS_BOOST_RANGE.0, BASS_BOOST_RANGE.1),
            smoother: EnergySmoother::new(config.smoothing_factor),
            peaks: BandPeaks::new(config.peak_decay),
            beat: BeatEstimator::new(config.beat.clone()),
            activity: ActivityGate {
                threshold: config.activity_threshold,
                hold_ms: config.activity_hold_ms as f64,
                last_active_ms: None,
            },
            stats: ProcessingStats::default(),
            consecutive_faults: 0,
            max_consecutive_faults: config.max_consecutive_faults.max(1),
            total_faults: 0,
        }
    }

    /// Run one frame through every stage.
    ///
    /// A malformed frame is analysed as silence; its fault is logged and
    /// counted but never returned.
    pub fn process(&mut self, frame: &SpectralFrame, now_ms: f64) -> FeatureSnapshot {
        let started = Instant::now();

        let (raw_bands, raw_rms) = match AnalysisFault::check(frame) {
            Ok(()) => {
                self.consecutive_faults = 0;
                let bands = self.apply_gains(compute_bands(frame, &self.layout));
                (bands, compute_rms(&frame.time_samples))
            }
            Err(fault) => {
                self.record_fault(&fault);
                (BandEnergySet::default(), 0.0)
            }
        };

        let (bands, rms) = self.smoother.apply(&raw_bands, raw_rms);
        let (peaks, rms_peak) = self.peaks.update(&bands, rms);
        // Onsets need the unsmoothed rise; smoothing flattens the attack
        let beat = self.beat.on_frame(raw_bands.get(self.beat_band), now_ms);
        let is_active = self.activity.update(rms, now_ms);

        let snapshot = FeatureSnapshot {
            rms,
            bands,
            peaks,
            rms_peak,
            bpm: beat.bpm,
            is_beat: beat.is_beat,
            beat_phase: self.beat.beat_phase(now_ms),
            is_active,
            spectrum: frame.magnitudes.iter().copied().map(finite_or_zero).collect(),
            timestamp_ms: now_ms,
        };

        self.stats.record(started.elapsed());
        snapshot
    }

    fn apply_gains(&self, raw: BandEnergySet) -> BandEnergySet {
        BandEnergySet::from_fn(|band| {
            let gain = if band == Band::Bass {
                self.sensitivity * self.bass_boost
            } else {
                self.sensitivity
            };
            raw.get(band) * gain
        })
    }

    fn record_fault(&mut self, fault: &AnalysisFault) {
        if self.consecutive_faults == 0 {
            log::warn!("Analysis fault, substituting silence: {}", fault);
        } else {
            log::debug!(
                "Analysis fault ({} in a row): {}",
                self.consecutive_faults + 1,
                fault
            );
        }
        self.consecutive_faults = self.consecutive_faults.saturating_add(1);
        self.total_faults += 1;
    }

    /// Too many faulty frames in a row to keep going
    pub fn fault_limit_exceeded(&self) -> bool {
        self.consecutive_faults >= self.max_consecutive_faults
    }

    pub fn consecutive_faults(&self) -> u32 {
        self.consecutive_faults
    }

    pub fn total_faults(&self) -> u64 {
        self.total_faults
    }

    /// Average processing time over the most recent frames
    pub fn average_frame_time(&self) -> Duration {
        self.stats.average()
    }

    /// Apply a preset, updating tunable parameters without resetting state
    pub fn apply_preset(&mut self, preset: &AudioPreset) {
        self.smoother.set_factor(preset.smoothing_factor);
        self.peaks.set_decay(preset.peak_decay);
        self.beat.set_onset_threshold(preset.onset_threshold);
        self.set_sensitivity(preset.sensitivity);
        self.set_bass_boost(preset.bass_boost);
    }

    pub fn set_sensitivity(&mut self, sensitivity: f32) {
        if sensitivity.is_finite() {
            self.sensitivity = sensitivity.clamp(SENSITIVITY_RANGE.0, SENSITIVITY_RANGE.1);
        }
    }

    pub fn set_bass_boost(&mut self, boost: f32) {
        if boost.is_finite() {
            self.bass_boost = boost.clamp(BASS_BOOST_RANGE.0, BASS_BOOST_RANGE.1);
        }
    }

    pub fn sensitivity(&self) -> f32 {
        self.sensitivity
    }

    pub fn bass_boost(&self) -> f32 {
        self.bass_boost
    }

    pub fn beat_state(&self) -> &BeatState {
        self.beat.state()
    }

    /// Zero every piece of numeric state; tuning is kept
    pub fn reset(&mut self) {
        self.smoother.reset();
        self.peaks.reset();
        self.beat.reset();
        self.activity.reset();
        self.consecutive_faults = 0;
    }
}
