use rustfft::{num_complex::Complex, Fft, FftPlanner};
use std::sync::Arc;

use crate::error::AnalysisError;

pub const BASS_LOW_HZ: f32 = 60.0;
pub const BASS_HIGH_HZ: f32 = 250.0;

/// Energy split of one analysis window.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SpectralEnergy {
    pub bass_energy: f32,
    pub total_energy: f32,
    pub bass_bins: usize,
    pub total_bins: usize,
}

impl SpectralEnergy {
    /// Fraction of the window's energy that falls in the bass band.
    pub fn bass_share(&self) -> Option<f32> {
        if self.total_energy <= 0.0 {
            return None;
        }
        Some(self.bass_energy / self.total_energy)
    }

    /// Bass band's share of the energy divided by its share of the bins.
    ///
    /// A flat spectrum scores 1.0; a window dominated by 60-250 Hz content
    /// scores far above it.
    pub fn bass_density_ratio(&self) -> Option<f32> {
        if self.bass_bins == 0 {
            return None;
        }
        let bin_share = self.bass_bins as f32 / self.total_bins as f32;
        Some(self.bass_share()? / bin_share)
    }
}

pub struct SpectralAnalyzer {
    sample_rate: f32,
    fft_size: usize,
    fft: Arc<dyn Fft<f32>>,
    window: Vec<f32>,
    bass_mask: Vec<bool>,
}

impl SpectralAnalyzer {
    pub fn new(sample_rate: f32, fft_size: usize) -> Self {
        let mut planner = FftPlanner::new();
        let fft = planner.plan_fft_forward(fft_size);

        let window = Self::hann_window(fft_size);
        let bass_mask = Self::bin_frequencies(sample_rate, fft_size)
            .into_iter()
            .map(|f| (BASS_LOW_HZ..=BASS_HIGH_HZ).contains(&f.abs()))
            .collect();

        Self {
            sample_rate,
            fft_size,
            fft,
            window,
            bass_mask,
        }
    }

    fn hann_window(size: usize) -> Vec<f32> {
        if size < 2 {
            return vec![1.0; size];
        }
        (0..size)
            .map(|i| {
                let phase = 2.0 * std::f32::consts::PI * i as f32 / (size - 1) as f32;
                0.5 * (1.0 - phase.cos())
            })
            .collect()
    }

    /// Signed centre frequency of every bin of a full complex transform:
    /// non-negative frequencies first, then the negative half.
    pub fn bin_frequencies(sample_rate: f32, fft_size: usize) -> Vec<f32> {
        let bin_width = sample_rate / fft_size as f32;
        let positive = fft_size.div_ceil(2);
        (0..fft_size)
            .map(|k| {
                if k < positive {
                    k as f32 * bin_width
                } else {
                    (k as f32 - fft_size as f32) * bin_width
                }
            })
            .collect()
    }

    pub fn fft_size(&self) -> usize {
        self.fft_size
    }

    pub fn sample_rate(&self) -> f32 {
        self.sample_rate
    }

    pub fn analyze(&self, samples: &[f32]) -> Result<SpectralEnergy, AnalysisError> {
        if samples.len() != self.fft_size {
            return Err(AnalysisError::InsufficientSamples {
                needed: self.fft_size,
                available: samples.len(),
            });
        }
        if samples.iter().any(|s| !s.is_finite()) {
            return Err(AnalysisError::NonFinite);
        }

        let mut buffer: Vec<Complex<f32>> = samples
            .iter()
            .zip(self.window.iter())
            .map(|(&x, &w)| Complex::new(x * w, 0.0))
            .collect();

        self.fft.process(&mut buffer);

        let mut bass_energy = 0.0;
        let mut total_energy = 0.0;
        let mut bass_bins = 0;
        for (bin, &in_bass) in buffer.iter().zip(self.bass_mask.iter()) {
            let energy = bin.norm_sqr();
            total_energy += energy;
            if in_bass {
                bass_energy += energy;
                bass_bins += 1;
            }
        }

        if total_energy <= 0.0 {
            return Err(AnalysisError::SilentWindow);
        }

        Ok(SpectralEnergy {
            bass_energy,
            total_energy,
            bass_bins,
            total_bins: self.fft_size,
        })
    }
}
