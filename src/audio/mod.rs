//! Audio capture and analysis module

mod backend;
mod bands;
mod beat;
mod capture;
mod fft;
mod host;
mod pipeline;
mod presets;
mod smoothing;
mod sources;

pub use backend::{
    AudioBackend, BlockSink, CaptureEvent, FaultReporter, InputStream, ProcessingConstraints,
    RawInput, StreamInfo, StreamRequest,
};
pub use bands::{
    band_energy, bin_range, compute_bands, compute_rms, compute_rms_centered, Band,
    BandEnergySet, BandLayout, FrequencyRange, SpectralFrame,
};
pub use beat::{BeatConfig, BeatEstimate, BeatEstimator, BeatState};
pub use capture::CaptureSession;
pub use fft::SpectrumTransform;
pub use host::CpalBackend;
pub use pipeline::{AnalysisFault, AnalysisPipeline, FeatureSnapshot};
pub use presets::{get_preset, get_presets, AudioPreset};
pub use smoothing::{smooth, BandPeaks, EnergySmoother, PeakHold};
pub use sources::{
    catalog_inputs, find_preferred, DeviceCatalog, InputDevice, DEFAULT_CONTROLLER_KEYWORDS,
};

#[cfg(test)]
pub(crate) use backend::testing;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

pub const SENSITIVITY_RANGE: (f32, f32) = (0.1, 3.0);
pub const BASS_BOOST_RANGE: (f32, f32) = (0.5, 3.0);

/// Audio processing configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    /// Samples per analysis block
    pub buffer_size: usize,

    /// FFT window size
    pub fft_size: usize,

    /// Requested sample rate in Hz; the device may pick another
    pub sample_rate: u32,

    /// dB range mapped onto [0, 1] for spectrum magnitudes
    pub min_decibels: f32,
    pub max_decibels: f32,

    /// Band edges
    pub bands: BandLayout,

    /// Band fed to the beat estimator
    pub beat_band: Band,

    /// Gain on every band (0.1 - 3.0)
    pub sensitivity: f32,

    /// Extra gain on the bass band (0.5 - 3.0)
    pub bass_boost: f32,

    /// Exponential smoothing factor (0-1), higher is steadier
    pub smoothing_factor: f32,

    /// Per-frame peak-hold decay (0-1)
    pub peak_decay: f32,

    pub beat: BeatConfig,

    /// RMS above which the input counts as active
    pub activity_threshold: f32,

    /// How long activity is held after the signal drops
    pub activity_hold_ms: u64,

    /// Platform-side processing requested from the input
    pub processing: ProcessingConstraints,

    /// Pause between stop and start when switching devices
    pub settle_delay_ms: u64,

    /// Upper bound on waiting for the device to open
    pub start_timeout_ms: u64,

    /// Consecutive faulty frames before the session gives up
    pub max_consecutive_faults: u32,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            buffer_size: 512,
            fft_size: 1024,
            sample_rate: 44100,
            min_decibels: -90.0,
            max_decibels: -10.0,
            bands: BandLayout::default(),
            beat_band: Band::Bass,
            sensitivity: 1.0,
            bass_boost: 1.0,
            smoothing_factor: 0.75,
            peak_decay: 0.95,
            beat: BeatConfig::default(),
            activity_threshold: 0.005,
            activity_hold_ms: 500,
            processing: ProcessingConstraints::default(),
            settle_delay_ms: 100,
            start_timeout_ms: 5000,
            max_consecutive_faults: 64,
        }
    }
}

impl AudioConfig {
    /// Parse a (possibly partial) JSON config; missing fields take defaults
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| Error::InvalidConfig(format!("malformed config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.buffer_size == 0 {
            return Err(Error::InvalidConfig("buffer_size must be positive".into()));
        }
        if self.fft_size < 32 || !self.fft_size.is_power_of_two() {
            return Err(Error::InvalidConfig(
                "fft_size must be a power of two of at least 32".into(),
            ));
        }
        if self.sample_rate == 0 {
            return Err(Error::InvalidConfig("sample_rate must be positive".into()));
        }
        if !(self.min_decibels.is_finite()
            && self.max_decibels.is_finite()
            && self.min_decibels < self.max_decibels)
        {
            return Err(Error::InvalidConfig(
                "min_decibels must be below max_decibels".into(),
            ));
        }
        if !(0.0..=1.0).contains(&self.smoothing_factor) {
            return Err(Error::InvalidConfig(
                "smoothing_factor must be in [0, 1]".into(),
            ));
        }
        if !(0.0..=1.0).contains(&self.peak_decay) {
            return Err(Error::InvalidConfig("peak_decay must be in [0, 1]".into()));
        }
        if !(SENSITIVITY_RANGE.0..=SENSITIVITY_RANGE.1).contains(&self.sensitivity) {
            return Err(Error::InvalidConfig(format!(
                "sensitivity must be in [{}, {}]",
                SENSITIVITY_RANGE.0, SENSITIVITY_RANGE.1
            )));
        }
        if !(BASS_BOOST_RANGE.0..=BASS_BOOST_RANGE.1).contains(&self.bass_boost) {
            return Err(Error::InvalidConfig(format!(
                "bass_boost must be in [{}, {}]",
                BASS_BOOST_RANGE.0, BASS_BOOST_RANGE.1
            )));
        }
        if !(self.activity_threshold.is_finite() && self.activity_threshold >= 0.0) {
            return Err(Error::InvalidConfig(
                "activity_threshold must be a non-negative number".into(),
            ));
        }
        if self.start_timeout_ms == 0 {
            return Err(Error::InvalidConfig("start_timeout_ms must be positive".into()));
        }
        if self.max_consecutive_faults == 0 {
            return Err(Error::InvalidConfig(
                "max_consecutive_faults must be positive".into(),
            ));
        }
        self.bands.validate()?;
        self.beat.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let config = AudioConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.buffer_size, 512);
        assert_eq!(config.sample_rate, 44100);
        assert_eq!(config.beat_band, Band::Bass);
        assert!(!config.processing.echo_cancellation);
    }

    #[test]
    fn from_json_fills_missing_fields() {
        let json = r#"{"smoothing_factor": 0.5, "beat": {"min_bpm": 70, "max_bpm": 160}}"#;
        let config = AudioConfig::from_json(json).unwrap();
        assert_eq!(config.smoothing_factor, 0.5);
        assert_eq!(config.beat.min_bpm, 70.0);
        assert_eq!(config.beat.onset_threshold, 0.25);
        assert_eq!(config.fft_size, 1024);
    }

    #[test]
    fn from_json_rejects_garbage() {
        let err = AudioConfig::from_json("{ not json").unwrap_err();
        assert!(matches!(err, Error::InvalidConfig(_)));
    }

    #[test]
    fn validate_rejects_out_of_range_values() {
        let config = AudioConfig {
            fft_size: 1000,
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = AudioConfig {
            sensitivity: 5.0,
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = AudioConfig {
            smoothing_factor: 1.5,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn config_round_trips_through_json() {
        let config = AudioConfig::default();
        let json = serde_json::to_string(&config).unwrap();
        assert_eq!(AudioConfig::from_json(&json).unwrap(), config);
    }
}
