//! Band energy extraction from magnitude spectra

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};

/// One analysis frame: magnitude spectrum plus the time-domain block it came from
#[derive(Debug, Clone, PartialEq)]
pub struct SpectralFrame {
    /// Magnitudes, bin 0 (DC) to Nyquist, normalised to roughly [0, 1]
    pub magnitudes: Vec<f32>,

    /// Mono time-domain samples centred at zero
    pub time_samples: Vec<f32>,

    /// Sample rate of the source in Hz
    pub sample_rate: u32,
}

/// Named frequency bands, ordered low to high
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Band {
    SubBass,
    Bass,
    LowMid,
    Mid,
    HighMid,
    Presence,
    High,
}

impl Band {
    pub const ALL: [Band; 7] = [
        Band::SubBass,
        Band::Bass,
        Band::LowMid,
        Band::Mid,
        Band::HighMid,
        Band::Presence,
        Band::High,
    ];
}

/// Per-band energies.
///
/// Values sit in [0, ~1] but gains can push them above 1. They are always finite.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct BandEnergySet {
    pub sub_bass: f32,
    pub bass: f32,
    pub low_mid: f32,
    pub mid: f32,
    pub high_mid: f32,
    pub presence: f32,
    pub high: f32,
}

impl BandEnergySet {
    pub fn get(&self, band: Band) -> f32 {
        match band {
            Band::SubBass => self.sub_bass,
            Band::Bass => self.bass,
            Band::LowMid => self.low_mid,
            Band::Mid => self.mid,
            Band::HighMid => self.high_mid,
            Band::Presence => self.presence,
            Band::High => self.high,
        }
    }

    pub fn set(&mut self, band: Band, value: f32) {
        let slot = match band {
            Band::SubBass => &mut self.sub_bass,
            Band::Bass => &mut self.bass,
            Band::LowMid => &mut self.low_mid,
            Band::Mid => &mut self.mid,
            Band::HighMid => &mut self.high_mid,
            Band::Presence => &mut self.presence,
            Band::High => &mut self.high,
        };
        *slot = finite_or_zero(value);
    }

    /// Build a set by evaluating `f` for every band
    pub fn from_fn(mut f: impl FnMut(Band) -> f32) -> Self {
        let mut set = Self::default();
        for band in Band::ALL {
            set.set(band, f(band));
        }
        set
    }

    pub fn iter(&self) -> impl Iterator<Item = (Band, f32)> + '_ {
        Band::ALL.into_iter().map(move |band| (band, self.get(band)))
    }

    /// Largest band value
    pub fn max(&self) -> f32 {
        self.iter().map(|(_, v)| v).fold(0.0, f32::max)
    }

    pub fn is_finite(&self) -> bool {
        self.iter().all(|(_, v)| v.is_finite())
    }
}

/// Inclusive frequency range in Hz
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FrequencyRange {
    pub min_hz: f32,
    pub max_hz: f32,
}

impl FrequencyRange {
    pub const fn new(min_hz: f32, max_hz: f32) -> Self {
        Self { min_hz, max_hz }
    }
}

/// Band edges used by [`compute_bands`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BandLayout {
    pub sub_bass: FrequencyRange,
    pub bass: FrequencyRange,
    pub low_mid: FrequencyRange,
    pub mid: FrequencyRange,
    pub high_mid: FrequencyRange,
    pub presence: FrequencyRange,
    pub high: FrequencyRange,
}

impl Default for BandLayout {
    fn default() -> Self {
        Self {
            sub_bass: FrequencyRange::new(20.0, 80.0),
            bass: FrequencyRange::new(20.0, 250.0),
            low_mid: FrequencyRange::new(250.0, 500.0),
            mid: FrequencyRange::new(500.0, 2000.0),
            high_mid: FrequencyRange::new(2000.0, 4000.0),
            presence: FrequencyRange::new(4000.0, 6000.0),
            high: FrequencyRange::new(6000.0, 20000.0),
        }
    }
}

impl BandLayout {
    pub fn range(&self, band: Band) -> FrequencyRange {
        match band {
            Band::SubBass => self.sub_bass,
            Band::Bass => self.bass,
            Band::LowMid => self.low_mid,
            Band::Mid => self.mid,
            Band::HighMid => self.high_mid,
            Band::Presence => self.presence,
            Band::High => self.high,
        }
    }

    /// Every range must be non-empty and lower edges must not decrease band to band.
    pub fn validate(&self) -> Result<()> {
        let mut previous_min = 0.0_f32;
        for band in Band::ALL {
            let range = self.range(band);
            if !(range.min_hz.is_finite() && range.max_hz.is_finite()) {
                return Err(Error::InvalidConfig(format!(
                    "{band:?} band edges must be finite"
                )));
            }
            if range.min_hz < 0.0 || range.min_hz >= range.max_hz {
                return Err(Error::InvalidConfig(format!(
                    "{band:?} band must satisfy 0 <= min_hz < max_hz (got {}..{})",
                    range.min_hz, range.max_hz
                )));
            }
            if range.min_hz < previous_min {
                return Err(Error::InvalidConfig(format!(
                    "{band:?} band starts below the band before it"
                )));
            }
            previous_min = range.min_hz;
        }
        Ok(())
    }
}

/// Map a frequency range onto an inclusive bin range.
///
/// `bin_hz = (sample_rate / 2) / (num_bins - 1)`, start is floored and end is
/// ceiled, both clamped to `[0, num_bins - 1]`. Returns `None` when no bin
/// falls in the range.
pub fn bin_range(
    sample_rate: u32,
    num_bins: usize,
    min_hz: f32,
    max_hz: f32,
) -> Option<(usize, usize)> {
    if num_bins == 0 || sample_rate == 0 {
        return None;
    }
    if !(min_hz.is_finite() && max_hz.is_finite()) || min_hz >= max_hz || max_hz <= 0.0 {
        return None;
    }
    if num_bins == 1 {
        return Some((0, 0));
    }

    let last = num_bins - 1;
    let bin_hz = (sample_rate as f32 / 2.0) / last as f32;

    let start = (min_hz.max(0.0) / bin_hz).floor();
    if start > last as f32 {
        // Entire range above Nyquist
        return None;
    }
    let end = (max_hz / bin_hz).ceil().min(last as f32);

    let (start, end) = (start as usize, end as usize);
    (start <= end).then_some((start, end))
}

/// Mean magnitude over the bins covered by `range`; 0 when the range is empty.
pub fn band_energy(magnitudes: &[f32], sample_rate: u32, range: FrequencyRange) -> f32 {
    let Some((start, end)) = bin_range(sample_rate, magnitudes.len(), range.min_hz, range.max_hz)
    else {
        return 0.0;
    };

    let bins = &magnitudes[start..=end];
    let sum: f32 = bins.iter().copied().map(finite_or_zero).sum();
    finite_or_zero(sum / bins.len() as f32)
}

/// Energy for every band of `layout`. Pure: same frame in, same bits out.
pub fn compute_bands(frame: &SpectralFrame, layout: &BandLayout) -> BandEnergySet {
    BandEnergySet::from_fn(|band| {
        band_energy(&frame.magnitudes, frame.sample_rate, layout.range(band))
    })
}

/// RMS of a zero-centred block
pub fn compute_rms(samples: &[f32]) -> f32 {
    compute_rms_centered(samples, 0.0)
}

/// RMS around `center`, the zero point of the sample encoding
/// (0.0 for float PCM, 128.0 for unsigned bytes).
pub fn compute_rms_centered(samples: &[f32], center: f32) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum: f32 = samples
        .iter()
        .map(|&s| {
            let d = finite_or_zero(s - center);
            d * d
        })
        .sum();
    finite_or_zero((sum / samples.len() as f32).sqrt())
}

pub(crate) fn finite_or_zero(value: f32) -> f32 {
    if value.is_finite() {
        value
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn frame(magnitudes: Vec<f32>) -> SpectralFrame {
        SpectralFrame {
            magnitudes,
            time_samples: vec![0.0; 512],
            sample_rate: 44100,
        }
    }

    #[test]
    fn bin_range_matches_nyquist_mapping() {
        // 513 bins at 44.1kHz => 43.07Hz per bin
        let (start, end) = bin_range(44100, 513, 20.0, 250.0).unwrap();
        assert_eq!(start, 0);
        assert_eq!(end, 6);

        let (start, end) = bin_range(44100, 513, 6000.0, 20000.0).unwrap();
        assert_eq!(start, 139);
        assert_eq!(end, 465);
    }

    #[test]
    fn bin_range_clamps_to_last_bin() {
        let (_, end) = bin_range(16000, 257, 4000.0, 20000.0).unwrap();
        assert_eq!(end, 256);
    }

    #[test]
    fn bin_range_above_nyquist_is_empty() {
        assert_eq!(bin_range(8000, 128, 6000.0, 20000.0), None);
    }

    #[test]
    fn bin_range_rejects_degenerate_input() {
        assert_eq!(bin_range(44100, 0, 20.0, 250.0), None);
        assert_eq!(bin_range(0, 512, 20.0, 250.0), None);
        assert_eq!(bin_range(44100, 512, 250.0, 20.0), None);
        assert_eq!(bin_range(44100, 512, f32::NAN, 20.0), None);
        assert_eq!(bin_range(44100, 1, 20.0, 250.0), Some((0, 0)));
    }

    #[test]
    fn silence_yields_exact_zeros() {
        let bands = compute_bands(&frame(vec![0.0; 513]), &BandLayout::default());
        assert_eq!(bands, BandEnergySet::default());
        assert_eq!(compute_rms(&[0.0; 512]), 0.0);
    }

    #[test]
    fn empty_inputs_yield_zero_not_nan() {
        let bands = compute_bands(&frame(Vec::new()), &BandLayout::default());
        assert_eq!(bands, BandEnergySet::default());
        assert_eq!(compute_rms(&[]), 0.0);
    }

    #[test]
    fn non_finite_bins_are_ignored() {
        let mut magnitudes = vec![0.5; 513];
        magnitudes[3] = f32::NAN;
        magnitudes[4] = f32::INFINITY;
        let bands = compute_bands(&frame(magnitudes), &BandLayout::default());
        assert!(bands.is_finite());
        assert!(bands.bass > 0.0);
    }

    #[test]
    fn uniform_spectrum_gives_uniform_bands() {
        let bands = compute_bands(&frame(vec![0.4; 513]), &BandLayout::default());
        for (band, value) in bands.iter() {
            assert!((value - 0.4).abs() < 1e-4, "{band:?} = {value}");
        }
    }

    #[test]
    fn energy_is_monotonic_in_magnitude() {
        let quiet = compute_bands(&frame(vec![0.2; 513]), &BandLayout::default());
        let loud = compute_bands(&frame(vec![0.6; 513]), &BandLayout::default());
        for band in Band::ALL {
            assert!(loud.get(band) > quiet.get(band));
        }
    }

    #[test]
    fn compute_bands_is_pure() {
        let magnitudes: Vec<f32> = (0..513).map(|i| (i as f32 * 0.37).sin().abs()).collect();
        let frozen = frame(magnitudes);
        let layout = BandLayout::default();

        let first = compute_bands(&frozen, &layout);
        let second = compute_bands(&frozen, &layout);
        for band in Band::ALL {
            assert_eq!(first.get(band).to_bits(), second.get(band).to_bits());
        }
    }

    #[test]
    fn rms_of_full_scale_square_wave_is_one() {
        let samples: Vec<f32> = (0..512).map(|i| if i % 2 == 0 { 1.0 } else { -1.0 }).collect();
        assert!((compute_rms(&samples) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn rms_respects_encoding_center() {
        let bytes = [128.0_f32; 64];
        assert_eq!(compute_rms_centered(&bytes, 128.0), 0.0);
    }

    #[test]
    fn default_layout_is_valid() {
        assert!(BandLayout::default().validate().is_ok());
    }

    #[test]
    fn layout_rejects_inverted_band() {
        let layout = BandLayout {
            mid: FrequencyRange::new(2000.0, 500.0),
            ..Default::default()
        };
        assert!(matches!(layout.validate(), Err(Error::InvalidConfig(_))));
    }

    #[test]
    fn layout_rejects_out_of_order_bands() {
        let layout = BandLayout {
            high: FrequencyRange::new(100.0, 20000.0),
            ..Default::default()
        };
        assert!(layout.validate().is_err());
    }

    proptest! {
        #[test]
        fn bin_range_stays_in_bounds(
            sample_rate in 8_000u32..192_000,
            num_bins in 1usize..4096,
            min_hz in 0.0f32..30_000.0,
            width in 0.5f32..20_000.0,
        ) {
            if let Some((start, end)) = bin_range(sample_rate, num_bins, min_hz, min_hz + width) {
                prop_assert!(start <= end);
                prop_assert!(end <= num_bins - 1);
            }
        }

        #[test]
        fn bands_are_always_finite(
            magnitudes in proptest::collection::vec(proptest::num::f32::ANY, 0..600),
            sample_rate in 0u32..96_000,
        ) {
            let frame = SpectralFrame { magnitudes, time_samples: Vec::new(), sample_rate };
            prop_assert!(compute_bands(&frame, &BandLayout::default()).is_finite());
        }
    }
}
