use std::collections::VecDeque;
use std::str::FromStr;

use log::{debug, error};
use serde::{Deserialize, Serialize};

use super::fft::{SpectralAnalyzer, SpectralEnergy};
use super::sample_buffer::SharedSampleBuffer;
use super::{ANALYSIS_WINDOW, BEAT_THRESHOLD, HOP_SIZE, MIN_BEAT_INTERVAL};
use crate::error::AnalysisError;

const HISTORY_RETENTION_SECS: f64 = 30.0;
const HISTORY_COUNT_CAP: usize = 100;
const HISTORY_TRIM_TO: usize = 50;
const BPM_MIN_BEATS: usize = 4;
const BPM_WINDOW: usize = 8;
const ENERGY_HISTORY_CAP: usize = 100;
const ENERGY_HISTORY_MIN: usize = 10;
const SHARE_HISTORY_LEN: usize = ENERGY_HISTORY_MIN - 1;

/// Gap added to "now" before a beat counts as upcoming.
pub const BEAT_SYNC_OFFSET: f64 = 0.1;

/// Timestamps of declared beat onsets, strictly increasing and at least
/// `MIN_BEAT_INTERVAL` apart.
#[derive(Debug, Clone, Default)]
pub struct BeatHistory {
    beats: VecDeque<f64>,
}

impl BeatHistory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records an onset unless it falls inside the refractory period of the
    /// previous one. Returns whether it was recorded.
    pub fn record(&mut self, t: f64) -> bool {
        if let Some(&last) = self.beats.back() {
            if t - last < MIN_BEAT_INTERVAL {
                return false;
            }
        }

        self.beats.push_back(t);

        while let Some(&oldest) = self.beats.front() {
            if t - oldest > HISTORY_RETENTION_SECS {
                self.beats.pop_front();
            } else {
                break;
            }
        }
        if self.beats.len() > HISTORY_COUNT_CAP {
            let excess = self.beats.len() - HISTORY_TRIM_TO;
            self.beats.drain(..excess);
        }

        true
    }

    /// 60 / mean inter-beat interval over the last eight beats, once at least
    /// four beats are known.
    pub fn estimate_bpm(&self) -> Option<f32> {
        if self.beats.len() < BPM_MIN_BEATS {
            return None;
        }

        let start = self.beats.len().saturating_sub(BPM_WINDOW);
        let recent: Vec<f64> = self.beats.range(start..).copied().collect();
        let intervals: Vec<f64> = recent.windows(2).map(|w| w[1] - w[0]).collect();
        if intervals.is_empty() {
            return None;
        }

        let avg_interval = intervals.iter().sum::<f64>() / intervals.len() as f64;
        if avg_interval > 0.0 {
            Some((60.0 / avg_interval) as f32)
        } else {
            None
        }
    }

    /// First beat expected after `from + offset`: a recorded beat if one is
    /// that late, otherwise the last beat extrapolated by whole intervals.
    pub fn next_beat_after(&self, from: f64, offset: f64, bpm: f32) -> Option<f64> {
        let horizon = from + offset;
        if let Some(&beat) = self.beats.iter().find(|&&b| b > horizon) {
            return Some(beat);
        }

        if bpm <= 0.0 {
            return None;
        }
        let last = *self.beats.back()?;
        let interval = 60.0 / bpm as f64;
        let steps = ((horizon - last) / interval).floor() + 1.0;
        Some(last + steps.max(1.0) * interval)
    }

    pub fn last(&self) -> Option<f64> {
        self.beats.back().copied()
    }

    pub fn len(&self) -> usize {
        self.beats.len()
    }

    pub fn is_empty(&self) -> bool {
        self.beats.is_empty()
    }

    pub fn clear(&mut self) {
        self.beats.clear();
    }

    pub fn to_vec(&self) -> Vec<f64> {
        self.beats.iter().copied().collect()
    }
}

impl From<Vec<f64>> for BeatHistory {
    fn from(beats: Vec<f64>) -> Self {
        Self { beats: beats.into() }
    }
}

/// Outcome of one detector tick.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct BeatAnalysis {
    pub beat_detected: bool,
    pub bpm_updated: bool,
    pub bpm: f32,
}

/// Onset detector fed from the shared sample buffer.
///
/// Implementations share the same observable contract: a beat flag per tick,
/// the 0.2 s refractory period, and BPM from the mean of the last eight
/// inter-beat intervals once four beats are known.
pub trait BeatDetector: Send {
    fn analyze(&mut self, buffer: &SharedSampleBuffer, now: f64) -> BeatAnalysis;

    fn tracker(&self) -> &TempoTracker;

    fn reset(&mut self);

    fn name(&self) -> &'static str;

    fn bpm(&self) -> f32 {
        self.tracker().bpm()
    }

    fn history(&self) -> &BeatHistory {
        self.tracker().history()
    }

    fn beat_detected(&self) -> bool {
        self.tracker().beat_detected()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DetectorKind {
    /// Bass share of a 1024-sample FFT window against the recent windows.
    #[default]
    Spectral,
    /// Broadband window energy against the recent average, 512-sample hops.
    HopEnergy,
}

impl FromStr for DetectorKind {
    type Err = String;

    /// Accepts the config names; `-` and `_` are interchangeable.
    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.to_lowercase().replace('-', "_").as_str() {
            "spectral" => Ok(DetectorKind::Spectral),
            "hop_energy" => Ok(DetectorKind::HopEnergy),
            other => Err(format!("unknown detector '{}'", other)),
        }
    }
}

impl DetectorKind {
    pub fn build(self, sample_rate: u32) -> Box<dyn BeatDetector> {
        match self {
            DetectorKind::Spectral => Box::new(SpectralBeatDetector::new(sample_rate)),
            DetectorKind::HopEnergy => Box::new(HopEnergyDetector::new()),
        }
    }
}

/// Beat history plus the BPM derived from it.
#[derive(Debug, Clone, Default)]
pub struct TempoTracker {
    history: BeatHistory,
    bpm: f32,
    beat_detected: bool,
}

impl TempoTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declares an onset at `now` if the refractory period allows it.
    pub fn declare(&mut self, now: f64) -> BeatAnalysis {
        if !self.history.record(now) {
            return self.quiet();
        }

        let previous = self.bpm;
        // Trimming can leave fewer than four beats; BPM is then unknown.
        self.bpm = self.history.estimate_bpm().unwrap_or(0.0);
        debug!("Beat at {:.3}s (history {}, BPM {:.1})", now, self.history.len(), self.bpm);

        BeatAnalysis {
            beat_detected: true,
            bpm_updated: self.bpm != previous,
            bpm: self.bpm,
        }
    }

    pub fn quiet(&self) -> BeatAnalysis {
        BeatAnalysis {
            beat_detected: false,
            bpm_updated: false,
            bpm: self.bpm,
        }
    }

    /// Stores the tick's outcome as the current beat flag.
    pub fn finish(&mut self, analysis: BeatAnalysis) -> BeatAnalysis {
        self.beat_detected = analysis.beat_detected;
        analysis
    }

    pub fn bpm(&self) -> f32 {
        self.bpm
    }

    /// Beat flag of the most recent tick.
    pub fn beat_detected(&self) -> bool {
        self.beat_detected
    }

    pub fn history(&self) -> &BeatHistory {
        &self.history
    }

    pub fn reset(&mut self) {
        self.history.clear();
        self.bpm = 0.0;
        self.beat_detected = false;
    }
}

impl From<BeatHistory> for TempoTracker {
    fn from(history: BeatHistory) -> Self {
        let bpm = history.estimate_bpm().unwrap_or(0.0);
        Self {
            history,
            bpm,
            beat_detected: false,
        }
    }
}

fn log_analysis_error(detector: &str, err: &AnalysisError) {
    match err {
        // Silence while paused is routine.
        AnalysisError::SilentWindow => debug!("{}: {}", detector, err),
        _ => error!("{} analysis error: {}", detector, err),
    }
}

/// Flags a beat when the bass band's share of the newest window's energy
/// exceeds `BEAT_THRESHOLD` times its mean share over the previous nine
/// windows.
///
/// With no earlier window to compare against, the first one is judged by
/// bass density instead: its bass share against the band's share of bins.
/// A window already analyzed is never analyzed again.
pub struct SpectralBeatDetector {
    analyzer: SpectralAnalyzer,
    tracker: TempoTracker,
    threshold: f32,
    share_history: VecDeque<f32>,
    last_written: Option<u64>,
}

impl SpectralBeatDetector {
    pub fn new(sample_rate: u32) -> Self {
        Self {
            analyzer: SpectralAnalyzer::new(sample_rate as f32, ANALYSIS_WINDOW),
            tracker: TempoTracker::new(),
            threshold: BEAT_THRESHOLD,
            share_history: VecDeque::with_capacity(SHARE_HISTORY_LEN),
            last_written: None,
        }
    }

    pub fn with_tracker(mut self, tracker: TempoTracker) -> Self {
        self.tracker = tracker;
        self
    }

    fn is_onset(&mut self, energy: &SpectralEnergy) -> Result<bool, AnalysisError> {
        let share = energy.bass_share().ok_or(AnalysisError::SilentWindow)?;

        let onset = if self.share_history.is_empty() {
            let density = energy.bass_density_ratio().ok_or(AnalysisError::SilentWindow)?;
            density > self.threshold
        } else {
            let mean = self.share_history.iter().sum::<f32>() / self.share_history.len() as f32;
            mean > 0.0 && share / mean > self.threshold
        };

        self.share_history.push_back(share);
        if self.share_history.len() > SHARE_HISTORY_LEN {
            self.share_history.pop_front();
        }
        Ok(onset)
    }

    fn try_analyze(&mut self, window: &[f32], now: f64) -> Result<BeatAnalysis, AnalysisError> {
        let energy = self.analyzer.analyze(window)?;
        if self.is_onset(&energy)? {
            Ok(self.tracker.declare(now))
        } else {
            Ok(self.tracker.quiet())
        }
    }
}

impl BeatDetector for SpectralBeatDetector {
    fn analyze(&mut self, buffer: &SharedSampleBuffer, now: f64) -> BeatAnalysis {
        let fresh = buffer
            .snapshot_marked(self.analyzer.fft_size())
            .filter(|(_, written)| self.last_written != Some(*written));
        let Some((window, written)) = fresh else {
            let quiet = self.tracker.quiet();
            return self.tracker.finish(quiet);
        };
        self.last_written = Some(written);

        // The buffer lock is already released; the FFT runs unlocked.
        let analysis = match self.try_analyze(&window, now) {
            Ok(analysis) => analysis,
            Err(e) => {
                log_analysis_error(self.name(), &e);
                self.tracker.quiet()
            }
        };
        self.tracker.finish(analysis)
    }

    fn tracker(&self) -> &TempoTracker {
        &self.tracker
    }

    fn reset(&mut self) {
        self.share_history.clear();
        self.last_written = None;
        self.tracker.reset();
    }

    fn name(&self) -> &'static str {
        "spectral"
    }
}

/// Streaming detector: walks the buffer front in 1024-sample windows with a
/// 512-sample hop and flags a beat when a window's energy exceeds
/// `BEAT_THRESHOLD` times the mean of the nine windows before it.
pub struct HopEnergyDetector {
    window: usize,
    hop: usize,
    energy_history: VecDeque<f32>,
    tracker: TempoTracker,
    threshold: f32,
}

impl HopEnergyDetector {
    pub fn new() -> Self {
        Self {
            window: ANALYSIS_WINDOW,
            hop: HOP_SIZE,
            energy_history: VecDeque::with_capacity(ENERGY_HISTORY_CAP),
            tracker: TempoTracker::new(),
            threshold: BEAT_THRESHOLD,
        }
    }

    fn window_energy(frame: &[f32]) -> Result<f32, AnalysisError> {
        let energy: f32 = frame.iter().map(|x| x * x).sum();
        if energy.is_finite() {
            Ok(energy)
        } else {
            Err(AnalysisError::NonFinite)
        }
    }

    fn is_onset(&mut self, energy: f32) -> bool {
        self.energy_history.push_back(energy);
        if self.energy_history.len() > ENERGY_HISTORY_CAP {
            self.energy_history.pop_front();
        }
        if self.energy_history.len() < ENERGY_HISTORY_MIN {
            return false;
        }

        let len = self.energy_history.len();
        let previous = self.energy_history.range(len - ENERGY_HISTORY_MIN..len - 1);
        let recent_avg = previous.sum::<f32>() / (ENERGY_HISTORY_MIN - 1) as f32;
        recent_avg > 0.0 && energy / recent_avg > self.threshold
    }
}

impl Default for HopEnergyDetector {
    fn default() -> Self {
        Self::new()
    }
}

impl BeatDetector for HopEnergyDetector {
    fn analyze(&mut self, buffer: &SharedSampleBuffer, now: f64) -> BeatAnalysis {
        let mut outcome = self.tracker.quiet();

        while let Some(frame) = buffer.take_window(self.window, self.hop) {
            let onset = match Self::window_energy(&frame) {
                Ok(energy) => self.is_onset(energy),
                Err(e) => {
                    log_analysis_error(self.name(), &e);
                    false
                }
            };

            if onset {
                let analysis = self.tracker.declare(now);
                outcome.beat_detected |= analysis.beat_detected;
                outcome.bpm_updated |= analysis.bpm_updated;
            }
        }

        outcome.bpm = self.tracker.bpm();
        self.tracker.finish(outcome)
    }

    fn tracker(&self) -> &TempoTracker {
        &self.tracker
    }

    fn reset(&mut self) {
        self.energy_history.clear();
        self.tracker.reset();
    }

    fn name(&self) -> &'static str {
        "hop_energy"
    }
}
