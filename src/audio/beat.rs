//! Low-band onset detection and BPM estimation

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

use super::bands::finite_or_zero;
use crate::error::{Error, Result};

/// Tunables for [`BeatEstimator`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BeatConfig {
    /// Absolute low-band level an onset must exceed
    pub onset_threshold: f32,
    /// Minimum rise over the previous frame's low-band level
    pub min_increase: f32,
    /// Onsets closer than this are dropped (300ms caps tempo at 200 BPM)
    pub min_interval_ms: f64,
    /// Intervals longer than this are ignored when estimating tempo
    pub max_interval_ms: f64,
    /// Onset history length
    pub history_size: usize,
    /// Onsets older than this are evicted
    pub history_window_ms: f64,
    /// Fraction of sorted intervals trimmed from each end before averaging
    pub trim_fraction: f32,
    /// Intervals needed before a tempo is reported
    pub min_intervals: usize,
    /// Plausible tempo range; candidates outside are octave-corrected into it
    pub min_bpm: f32,
    pub max_bpm: f32,
    /// Jumps larger than this use `fast_blend`, others `slow_blend`
    pub relock_threshold: f32,
    pub fast_blend: f32,
    pub slow_blend: f32,
    /// Largest change of a non-zero estimate per update
    pub max_bpm_step: f32,
}

impl Default for BeatConfig {
    fn default() -> Self {
        Self {
            onset_threshold: 0.25,
            min_increase: 0.08,
            min_interval_ms: 300.0,
            max_interval_ms: 2000.0,
            history_size: 8,
            history_window_ms: 8000.0,
            trim_fraction: 0.2,
            min_intervals: 2,
            min_bpm: 90.0,
            max_bpm: 180.0,
            relock_threshold: 10.0,
            fast_blend: 0.5,
            slow_blend: 0.2,
            max_bpm_step: 8.0,
        }
    }
}

impl BeatConfig {
    pub fn validate(&self) -> Result<()> {
        fn invalid(msg: &str) -> Result<()> {
            Err(Error::InvalidConfig(format!("beat.{msg}")))
        }

        if !(self.onset_threshold.is_finite() && self.onset_threshold >= 0.0) {
            return invalid("onset_threshold must be a non-negative number");
        }
        if !(self.min_increase.is_finite() && self.min_increase >= 0.0) {
            return invalid("min_increase must be a non-negative number");
        }
        if !(self.min_interval_ms > 0.0 && self.min_interval_ms < self.max_interval_ms) {
            return invalid("min_interval_ms must be positive and below max_interval_ms");
        }
        if !self.max_interval_ms.is_finite() {
            return invalid("max_interval_ms must be finite");
        }
        if self.history_size < 2 {
            return invalid("history_size must be at least 2");
        }
        if !(self.history_window_ms > 0.0 && self.history_window_ms.is_finite()) {
            return invalid("history_window_ms must be positive");
        }
        if !(0.0..0.5).contains(&self.trim_fraction) {
            return invalid("trim_fraction must be in [0, 0.5)");
        }
        if self.min_intervals == 0 {
            return invalid("min_intervals must be at least 1");
        }
        if !(self.min_bpm > 0.0 && self.max_bpm.is_finite()) {
            return invalid("min_bpm must be positive");
        }
        if self.max_bpm < self.min_bpm * 2.0 {
            return invalid("max_bpm must be at least twice min_bpm for octave correction");
        }
        if !(0.0..=1.0).contains(&self.fast_blend) || !(0.0..=1.0).contains(&self.slow_blend) {
            return invalid("fast_blend and slow_blend must be in [0, 1]");
        }
        if !(self.relock_threshold.is_finite() && self.relock_threshold >= 0.0) {
            return invalid("relock_threshold must be a non-negative number");
        }
        if !(self.max_bpm_step >= 1.0 && self.max_bpm_step.is_finite()) {
            return invalid("max_bpm_step must be at least 1");
        }
        Ok(())
    }
}

/// Rolling onset history and the current tempo estimate
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BeatState {
    /// Accepted onset times in ms, oldest first
    pub onsets: VecDeque<f64>,
    /// 0 while unknown
    pub bpm: f32,
    pub last_onset_ms: Option<f64>,
}

/// Per-frame output of [`BeatEstimator::on_frame`]
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct BeatEstimate {
    pub bpm: f32,
    /// An onset was accepted on this frame
    pub is_beat: bool,
}

/// Heuristic peak-interval tempo tracker.
///
/// An onset is a sharp rise in low-band energy above an absolute floor.
/// Accepted onsets feed a short history whose trimmed mean interval gives a
/// tempo candidate; the candidate is octave-corrected and blended into the
/// running estimate in bounded steps.
#[derive(Debug, Clone)]
pub struct BeatEstimator {
    config: BeatConfig,
    state: BeatState,
    previous_low: f32,
}

impl BeatEstimator {
    pub fn new(config: BeatConfig) -> Self {
        Self {
            config,
            state: BeatState::default(),
            previous_low: 0.0,
        }
    }

    pub fn config(&self) -> &BeatConfig {
        &self.config
    }

    pub fn set_onset_threshold(&mut self, threshold: f32) {
        if threshold.is_finite() && threshold >= 0.0 {
            self.config.onset_threshold = threshold;
        }
    }

    pub fn state(&self) -> &BeatState {
        &self.state
    }

    pub fn bpm(&self) -> f32 {
        self.state.bpm
    }

    /// Feed one frame of low-band energy observed at `now_ms`
    pub fn on_frame(&mut self, low_band_energy: f32, now_ms: f64) -> BeatEstimate {
        let low = finite_or_zero(low_band_energy);
        let delta = low - self.previous_low;
        self.previous_low = low;

        if !now_ms.is_finite() {
            return BeatEstimate {
                bpm: self.state.bpm,
                is_beat: false,
            };
        }

        let is_onset = low > self.config.onset_threshold && delta > self.config.min_increase;
        let debounced = match self.state.last_onset_ms {
            Some(last) => now_ms - last > self.config.min_interval_ms,
            None => true,
        };

        let is_beat = is_onset && debounced;
        if is_beat {
            self.state.last_onset_ms = Some(now_ms);
            self.state.onsets.push_back(now_ms);
            self.evict(now_ms);

            if let Some(candidate) = self.candidate_bpm() {
                self.state.bpm = self.blend(candidate);
            }
        }

        BeatEstimate {
            bpm: self.state.bpm,
            is_beat,
        }
    }

    /// Position within the current beat in [0, 1)
    pub fn beat_phase(&self, now_ms: f64) -> f32 {
        let Some(last) = self.state.last_onset_ms else {
            return 0.0;
        };
        if self.state.bpm <= 0.0 {
            return 0.0;
        }

        let beat_period = 60_000.0 / self.state.bpm as f64;
        let elapsed = (now_ms - last).max(0.0);
        let phase = (elapsed / beat_period).fract() as f32;
        if phase.is_finite() {
            phase
        } else {
            0.0
        }
    }

    pub fn reset(&mut self) {
        self.state = BeatState::default();
        self.previous_low = 0.0;
    }

    fn evict(&mut self, now_ms: f64) {
        let onsets = &mut self.state.onsets;
        while onsets.len() > self.config.history_size {
            onsets.pop_front();
        }
        while onsets
            .front()
            .is_some_and(|&t| now_ms - t > self.config.history_window_ms)
        {
            onsets.pop_front();
        }
    }

    /// Octave-corrected tempo from the trimmed mean onset interval
    fn candidate_bpm(&self) -> Option<f32> {
        let mut intervals: Vec<f64> = self
            .state
            .onsets
            .iter()
            .zip(self.state.onsets.iter().skip(1))
            .map(|(a, b)| b - a)
            .filter(|i| (self.config.min_interval_ms..=self.config.max_interval_ms).contains(i))
            .collect();

        if intervals.len() < self.config.min_intervals {
            return None;
        }

        intervals.sort_by(|a, b| a.total_cmp(b));
        let trim = (intervals.len() as f32 * self.config.trim_fraction).floor() as usize;
        let kept = if intervals.len() > 2 * trim {
            &intervals[trim..intervals.len() - trim]
        } else {
            &intervals[..]
        };

        let average = kept.iter().sum::<f64>() / kept.len() as f64;
        if average <= 0.0 {
            return None;
        }

        let mut bpm = (60_000.0 / average) as f32;
        let mut guard = 0;
        while bpm < self.config.min_bpm && guard < 8 {
            bpm *= 2.0;
            guard += 1;
        }
        while bpm > self.config.max_bpm && guard < 16 {
            bpm /= 2.0;
            guard += 1;
        }

        bpm.is_finite()
            .then(|| bpm.clamp(self.config.min_bpm, self.config.max_bpm))
    }

    fn blend(&self, candidate: f32) -> f32 {
        let previous = self.state.bpm;
        if previous <= 0.0 {
            return candidate.round();
        }

        let diff = candidate - previous;
        let weight = if diff.abs() > self.config.relock_threshold {
            self.config.fast_blend
        } else {
            self.config.slow_blend
        };

        let max_step = self.config.max_bpm_step.floor();
        let step = (diff * weight).clamp(-max_step, max_step);
        (previous + step).round()
    }
}
