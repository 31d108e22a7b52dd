//! Time-domain block to normalised magnitude spectrum

use std::sync::Arc;

use rustfft::{num_complex::Complex, Fft, FftPlanner};

use super::bands::finite_or_zero;

/// Windowed FFT producing `fft_size / 2 + 1` magnitudes from DC to Nyquist.
///
/// Magnitudes are converted to dB and mapped linearly from
/// `[min_decibels, max_decibels]` onto `[0, 1]`, the same scale browser
/// analyser nodes report on.
pub struct SpectrumTransform {
    fft: Arc<dyn Fft<f32>>,
    fft_size: usize,
    window: Vec<f32>,
    window_sum: f32,
    min_decibels: f32,
    max_decibels: f32,
    buffer: Vec<Complex<f32>>,
}

impl SpectrumTransform {
    pub fn new(fft_size: usize, min_decibels: f32, max_decibels: f32) -> Self {
        let fft_size = fft_size.max(2);

        // Hann window
        let window: Vec<f32> = (0..fft_size)
            .map(|i| {
                0.5 * (1.0 - (2.0 * std::f32::consts::PI * i as f32 / (fft_size - 1) as f32).cos())
            })
            .collect();
        let window_sum = window.iter().sum::<f32>().max(f32::EPSILON);

        let fft = FftPlanner::new().plan_fft_forward(fft_size);

        Self {
            fft,
            fft_size,
            window,
            window_sum,
            min_decibels,
            max_decibels,
            buffer: vec![Complex::new(0.0, 0.0); fft_size],
        }
    }

    pub fn fft_size(&self) -> usize {
        self.fft_size
    }

    /// Number of magnitudes returned by [`Self::magnitudes`]
    pub fn num_bins(&self) -> usize {
        self.fft_size / 2 + 1
    }

    /// Transform the first `fft_size` samples; shorter input is zero-padded.
    pub fn magnitudes(&mut self, samples: &[f32]) -> Vec<f32> {
        for (i, slot) in self.buffer.iter_mut().enumerate() {
            let sample = samples.get(i).copied().map(finite_or_zero).unwrap_or(0.0);
            *slot = Complex::new(sample * self.window[i], 0.0);
        }

        self.fft.process(&mut self.buffer);

        let range = (self.max_decibels - self.min_decibels).max(f32::EPSILON);
        self.buffer
            .iter()
            .take(self.num_bins())
            .map(|c| {
                let amplitude = c.norm() * 2.0 / self.window_sum;
                if amplitude <= 1e-10 {
                    return 0.0;
                }
                let db = 20.0 * amplitude.log10();
                finite_or_zero(((db - self.min_decibels) / range).clamp(0.0, 1.0))
            })
            .collect()
    }
}

impl std::fmt::Debug for SpectrumTransform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SpectrumTransform")
            .field("fft_size", &self.fft_size)
            .field("min_decibels", &self.min_decibels)
            .field("max_decibels", &self.max_decibels)
            .finish()
    }
}
