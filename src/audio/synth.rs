use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::f64::consts::PI;

pub const SYNTH_BLOCK_SIZE: usize = 1024;

const BASS_HZ: f64 = 60.0;
const MID_HZ: f64 = 200.0;
const HIGH_HZ: f64 = 2000.0;
const KICK_HZ: f64 = 40.0;
const SNARE_HZ: f64 = 1000.0;
const NOISE_SIGMA: f64 = 0.1;

/// Draws one sample from N(0, sigma²) using the Box-Muller transform.
pub fn gaussian<R: Rng + ?Sized>(rng: &mut R, sigma: f64) -> f64 {
    // Keep u1 away from zero so ln() stays finite.
    let u1: f64 = rng.random::<f64>().max(f64::MIN_POSITIVE);
    let u2: f64 = rng.random::<f64>();
    (-2.0 * u1.ln()).sqrt() * (2.0 * PI * u2).cos() * sigma
}

/// Stand-in audio source used when no live capture is attached.
///
/// Produces a three-tone mix whose bass and high registers pulse with the
/// current tempo estimate, plus a little noise, so the detector always has
/// material to work on.
pub struct SyntheticSampleProducer {
    sample_rate: f64,
    sample_index: u64,
    rng: StdRng,
}

impl SyntheticSampleProducer {
    pub fn new(sample_rate: u32) -> Self {
        Self::with_rng(sample_rate, StdRng::from_os_rng())
    }

    pub fn with_seed(sample_rate: u32, seed: u64) -> Self {
        Self::with_rng(sample_rate, StdRng::seed_from_u64(seed))
    }

    fn with_rng(sample_rate: u32, rng: StdRng) -> Self {
        Self {
            sample_rate: sample_rate as f64,
            sample_index: 0,
            rng,
        }
    }

    /// Produces the next `SYNTH_BLOCK_SIZE` samples, clipped to [-1, 1].
    pub fn produce(&mut self, bpm: f32) -> Vec<f32> {
        let bpm = bpm as f64;
        let mut block = Vec::with_capacity(SYNTH_BLOCK_SIZE);

        for _ in 0..SYNTH_BLOCK_SIZE {
            let t = self.sample_index as f64 / self.sample_rate;
            self.sample_index += 1;

            let mut bass = (2.0 * PI * BASS_HZ * t).sin() * 0.7;
            let mid = (2.0 * PI * MID_HZ * t).sin() * 0.3;
            let mut high = (2.0 * PI * HIGH_HZ * t).sin() * 0.2;

            if bpm > 0.0 {
                let beat_phase = (t * bpm / 60.0).fract();
                if beat_phase < 0.1 {
                    bass += (2.0 * PI * KICK_HZ * t).sin() * 0.8;
                } else if beat_phase > 0.4 && beat_phase < 0.5 {
                    high += (2.0 * PI * SNARE_HZ * t).sin() * 0.5;
                }
            }

            let noise = gaussian(&mut self.rng, NOISE_SIGMA);
            block.push((bass + mid + high + noise).clamp(-1.0, 1.0) as f32);
        }

        block
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn produces_clipped_blocks_of_fixed_size() {
        let mut producer = SyntheticSampleProducer::with_seed(44100, 7);
        for bpm in [0.0, 120.0, 174.0] {
            let block = producer.produce(bpm);
            assert_eq!(block.len(), SYNTH_BLOCK_SIZE);
            assert!(block.iter().all(|s| (-1.0..=1.0).contains(s)));
        }
    }

    #[test]
    fn phase_continues_across_blocks() {
        let mut a = SyntheticSampleProducer::with_seed(44100, 3);
        let mut b = SyntheticSampleProducer::with_seed(44100, 3);
        a.produce(0.0);
        let second = a.produce(0.0);
        let first_of_b = b.produce(0.0);
        assert_ne!(second, first_of_b);
    }

    #[test]
    fn gaussian_noise_is_roughly_centered() {
        let mut rng = StdRng::seed_from_u64(11);
        let n = 20_000;
        let samples: Vec<f64> = (0..n).map(|_| gaussian(&mut rng, 0.1)).collect();
        let mean = samples.iter().sum::<f64>() / n as f64;
        let var = samples.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / n as f64;
        assert!(mean.abs() < 0.01, "mean {mean}");
        assert!((var.sqrt() - 0.1).abs() < 0.01, "sigma {}", var.sqrt());
    }
}
