//! Frame-to-frame smoothing and peak-hold for band energies

use super::bands::{finite_or_zero, BandEnergySet};

/// Exponential smoothing step: `previous * factor + current * (1 - factor)`.
///
/// `factor` is clamped to [0, 1]; 0 follows the input exactly, 1 freezes it.
pub fn smooth(previous: f32, current: f32, factor: f32) -> f32 {
    let factor = if factor.is_nan() { 0.0 } else { factor.clamp(0.0, 1.0) };
    finite_or_zero(previous * factor + current * (1.0 - factor))
}

/// Applies [`smooth`] independently to every band and to RMS
#[derive(Debug, Clone)]
pub struct EnergySmoother {
    factor: f32,
    bands: BandEnergySet,
    rms: f32,
}

impl EnergySmoother {
    pub fn new(factor: f32) -> Self {
        Self {
            factor: factor.clamp(0.0, 1.0),
            bands: BandEnergySet::default(),
            rms: 0.0,
        }
    }

    pub fn factor(&self) -> f32 {
        self.factor
    }

    /// Retune without touching the current values
    pub fn set_factor(&mut self, factor: f32) {
        self.factor = factor.clamp(0.0, 1.0);
    }

    /// Feed one frame of raw values and return the smoothed ones
    pub fn apply(&mut self, raw: &BandEnergySet, raw_rms: f32) -> (BandEnergySet, f32) {
        let previous = self.bands;
        self.bands =
            BandEnergySet::from_fn(|band| smooth(previous.get(band), raw.get(band), self.factor));
        self.rms = smooth(self.rms, raw_rms, self.factor);
        (self.bands, self.rms)
    }

    pub fn bands(&self) -> &BandEnergySet {
        &self.bands
    }

    pub fn rms(&self) -> f32 {
        self.rms
    }

    pub fn reset(&mut self) {
        self.bands = BandEnergySet::default();
        self.rms = 0.0;
    }
}

/// Holds the highest value seen and lets it fall geometrically
#[derive(Debug, Clone, Copy)]
pub struct PeakHold {
    value: f32,
    decay: f32,
}

impl PeakHold {
    pub fn new(decay: f32) -> Self {
        Self {
            value: 0.0,
            decay: decay.clamp(0.0, 1.0),
        }
    }

    /// Take a new reading; returns the held value
    pub fn update(&mut self, value: f32) -> f32 {
        let value = finite_or_zero(value);
        if value > self.value {
            self.value = value;
        } else {
            self.value *= self.decay;
        }
        self.value
    }

    pub fn value(&self) -> f32 {
        self.value
    }

    pub fn set_decay(&mut self, decay: f32) {
        self.decay = decay.clamp(0.0, 1.0);
    }

    pub fn reset(&mut self) {
        self.value = 0.0;
    }
}

/// Peak-hold tracker for every band plus RMS
#[derive(Debug, Clone)]
pub struct BandPeaks {
    bands: [PeakHold; 7],
    rms: PeakHold,
}

impl BandPeaks {
    pub fn new(decay: f32) -> Self {
        Self {
            bands: [PeakHold::new(decay); 7],
            rms: PeakHold::new(decay),
        }
    }

    pub fn update(&mut self, bands: &BandEnergySet, rms: f32) -> (BandEnergySet, f32) {
        let held =
            BandEnergySet::from_fn(|band| self.bands[band as usize].update(bands.get(band)));
        (held, self.rms.update(rms))
    }

    pub fn set_decay(&mut self, decay: f32) {
        for peak in &mut self.bands {
            peak.set_decay(decay);
        }
        self.rms.set_decay(decay);
    }

    pub fn reset(&mut self) {
        for peak in &mut self.bands {
            peak.reset();
        }
        self.rms.reset();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn smooth_blends_by_factor() {
        assert!((smooth(1.0, 0.0, 0.75) - 0.75).abs() < 1e-6);
        assert!((smooth(0.0, 1.0, 0.75) - 0.25).abs() < 1e-6);
    }

    #[test]
    fn smooth_clamps_factor() {
        assert_eq!(smooth(0.3, 0.9, 2.0), 0.3);
        assert_eq!(smooth(0.3, 0.9, -1.0), 0.9);
    }

    #[test]
    fn smoother_converges_towards_input() {
        let mut smoother = EnergySmoother::new(0.8);
        let raw = BandEnergySet {
            bass: 1.0,
            ..Default::default()
        };

        let mut last = 0.0;
        for _ in 0..50 {
            let (bands, _) = smoother.apply(&raw, 0.0);
            assert!(bands.bass >= last);
            last = bands.bass;
        }
        assert!(last > 0.99);
        assert_eq!(smoother.bands().mid, 0.0);
    }

    #[test]
    fn smoother_reset_zeroes_state() {
        let mut smoother = EnergySmoother::new(0.5);
        let raw = BandEnergySet::from_fn(|_| 0.8);
        smoother.apply(&raw, 0.5);

        smoother.reset();
        assert_eq!(*smoother.bands(), BandEnergySet::default());
        assert_eq!(smoother.rms(), 0.0);
    }

    #[test]
    fn peak_hold_decays_geometrically() {
        let mut peak = PeakHold::new(0.5);
        assert_eq!(peak.update(1.0), 1.0);
        assert_eq!(peak.update(0.0), 0.5);
        assert_eq!(peak.update(0.1), 0.25);
        assert_eq!(peak.update(0.9), 0.9);
    }

    #[test]
    fn peak_hold_ignores_non_finite() {
        let mut peak = PeakHold::new(0.95);
        peak.update(0.4);
        assert!(peak.update(f32::NAN).is_finite());
        assert!(peak.update(f32::INFINITY) <= 0.4);
    }

    #[test]
    fn band_peaks_track_each_band_independently() {
        let mut peaks = BandPeaks::new(0.9);
        let loud_bass = BandEnergySet {
            bass: 0.8,
            ..Default::default()
        };
        peaks.update(&loud_bass, 0.3);

        let (held, rms) = peaks.update(&BandEnergySet::default(), 0.0);
        assert!((held.bass - 0.72).abs() < 1e-6);
        assert_eq!(held.high, 0.0);
        assert!((rms - 0.27).abs() < 1e-6);
    }

    proptest! {
        #[test]
        fn zero_factor_follows_input(prev in -10.0f32..10.0, cur in -10.0f32..10.0) {
            prop_assert_eq!(smooth(prev, cur, 0.0), cur);
        }

        #[test]
        fn unit_factor_holds_previous(prev in -10.0f32..10.0, cur in -10.0f32..10.0) {
            prop_assert_eq!(smooth(prev, cur, 1.0), prev);
        }
    }
}
