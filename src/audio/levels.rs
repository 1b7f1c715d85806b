use log::debug;
use rand::rngs::StdRng;
use rand::SeedableRng;

use super::synth::gaussian;
use super::VISUALIZATION_BANDS;

const BASE_FREQUENCIES: [f64; 10] = [
    60.0, 120.0, 250.0, 500.0, 1000.0, 2000.0, 4000.0, 8000.0, 12000.0, 16000.0,
];
const MAX_BAND_FREQUENCY: f64 = 22000.0;
const SYNTHETIC_TICK: f64 = 1.0 / 60.0;

const MIN_ACTIVE_LEVEL: f32 = 0.05;
const DECAY_FACTOR: f32 = 0.9;
const DECAY_FLOOR: f32 = 0.01;
const LEVEL_NOISE_SIGMA: f64 = 0.05;

const VISUAL_BEAT_AVG: f32 = 0.65;
const VISUAL_BEAT_RMS: f32 = 0.5;
const LOG_INTERVAL_SECS: f64 = 5.0;

/// What the generator needs to know about playback for one tick.
#[derive(Debug, Clone, Copy)]
pub struct LevelInput {
    /// Playback position in seconds; `None` advances the internal clock.
    pub position: Option<f64>,
    pub playing: bool,
    pub volume: f32,
    pub bpm: f32,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LevelFrame {
    pub levels: [f32; VISUALIZATION_BANDS],
    pub beat_detected: bool,
}

impl Default for LevelFrame {
    fn default() -> Self {
        Self {
            levels: [0.0; VISUALIZATION_BANDS],
            beat_detected: false,
        }
    }
}

/// Procedural 64-band levels that keep the visualizer moving whether or
/// not real samples are flowing.
pub struct SyntheticLevelGenerator {
    frame: LevelFrame,
    band_frequencies: [f64; VISUALIZATION_BANDS],
    elapsed: f64,
    last_visual_beat: f64,
    next_log_at: f64,
    rng: StdRng,
}

impl SyntheticLevelGenerator {
    pub fn new() -> Self {
        Self::with_rng(StdRng::from_os_rng())
    }

    pub fn with_seed(seed: u64) -> Self {
        Self::with_rng(StdRng::seed_from_u64(seed))
    }

    fn with_rng(rng: StdRng) -> Self {
        Self {
            frame: LevelFrame::default(),
            band_frequencies: Self::band_frequencies(),
            elapsed: 0.0,
            last_visual_beat: -10.0,
            next_log_at: 0.0,
            rng,
        }
    }

    /// Nominal centre frequency per band: the fixed table, then
    /// eighth-octave steps above 16 kHz, capped at 22 kHz.
    pub fn band_frequencies() -> [f64; VISUALIZATION_BANDS] {
        let mut freqs = [0.0; VISUALIZATION_BANDS];
        let last = BASE_FREQUENCIES[BASE_FREQUENCIES.len() - 1];
        for (i, freq) in freqs.iter_mut().enumerate() {
            *freq = match BASE_FREQUENCIES.get(i) {
                Some(&f) => f,
                None => {
                    let octaves = (i - BASE_FREQUENCIES.len()) as f64 / 8.0;
                    (last * 2f64.powf(octaves)).min(MAX_BAND_FREQUENCY)
                }
            };
        }
        freqs
    }

    pub fn frame(&self) -> &LevelFrame {
        &self.frame
    }

    pub fn elapsed(&self) -> f64 {
        self.elapsed
    }

    pub fn tick(&mut self, input: LevelInput) -> &LevelFrame {
        match input.position {
            Some(position) => {
                if position < self.last_visual_beat {
                    // Seeked backwards.
                    self.last_visual_beat = -10.0;
                }
                self.elapsed = position;
            }
            None => self.elapsed += SYNTHETIC_TICK,
        }

        // NaN volume counts as silence.
        if !input.playing || !input.volume.is_finite() || input.volume <= 0.0 {
            self.decay();
        } else {
            self.generate(input.bpm, input.volume);
        }
        &self.frame
    }

    fn decay(&mut self) {
        for level in self.frame.levels.iter_mut() {
            *level *= DECAY_FACTOR;
            if *level < DECAY_FLOOR {
                *level = 0.0;
            }
        }
        self.frame.beat_detected = false;
    }

    fn generate(&mut self, bpm: f32, volume: f32) {
        let t = self.elapsed;
        let bass = (t * 2.5).sin() * 0.4 + (t * 0.5).sin() * 0.3;
        let mid = (t * 4.0).sin() * 0.3 + (t * 8.0).sin() * 0.2;
        let high = (t * 12.0).sin() * 0.2 + (t * 20.0).sin() * 0.1;

        let beat_phase = if bpm > 0.0 {
            Some((t * bpm as f64 / 60.0).rem_euclid(1.0))
        } else {
            None
        };

        for (i, level) in self.frame.levels.iter_mut().enumerate() {
            let freq = self.band_frequencies[i];

            let mut response = if freq < 200.0 {
                1.2 + bass * 0.8
            } else if freq < 2000.0 {
                1.0 + mid * 0.6
            } else {
                0.8 + high * 0.4
            };

            if let Some(phase) = beat_phase {
                if phase < 0.1 && freq < 200.0 {
                    response *= 1.5;
                } else if phase > 0.4 && phase < 0.5 && freq > 2000.0 {
                    response *= 1.3;
                }
            }

            let wiggle = (t * 2.0 + i as f64 * 0.3).sin() + (t * 7.0 + i as f64 * 0.7).sin() * 0.5;
            let dynamic = 0.3 + 0.4 * (1.0 + wiggle * 0.5);
            let noise = gaussian(&mut self.rng, LEVEL_NOISE_SIGMA);

            let raw = (0.3 + response * 0.4 + dynamic + noise) * volume as f64;
            *level = (raw as f32).clamp(MIN_ACTIVE_LEVEL, 1.0);
        }

        let n = VISUALIZATION_BANDS as f32;
        let avg = self.frame.levels.iter().sum::<f32>() / n;
        let rms = (self.frame.levels.iter().map(|x| x * x).sum::<f32>() / n).sqrt();

        let beat_interval = if bpm > 0.0 { 60.0 / bpm as f64 } else { 1.0 };
        let loud = avg > VISUAL_BEAT_AVG || rms > VISUAL_BEAT_RMS;
        self.frame.beat_detected = loud && t - self.last_visual_beat > beat_interval * 0.6;
        if self.frame.beat_detected {
            self.last_visual_beat = t;
        }

        if t >= self.next_log_at {
            debug!(
                "Levels at {:.2}s - avg: {:.3}, rms: {:.3}, beat: {}",
                t, avg, rms, self.frame.beat_detected
            );
            self.next_log_at = t + LOG_INTERVAL_SECS;
        }
    }

    #[cfg(test)]
    fn set_levels(&mut self, levels: [f32; VISUALIZATION_BANDS]) {
        self.frame.levels = levels;
    }
}

impl Default for SyntheticLevelGenerator {
    fn default() -> Self {
        Self::new()
    }
}
