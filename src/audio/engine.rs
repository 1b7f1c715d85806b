use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use log::{debug, info, warn};

use super::analysis::{
    analyze_now, lock_detector, AnalysisLoop, AnalysisWorker, SharedDetector, SharedTempo, JOIN_TIMEOUT,
};
use super::beat_detector::{BeatAnalysis, BEAT_SYNC_OFFSET};
use super::clock::{Clock, MonotonicClock};
use super::crossfade::{
    CrossfadeScheduler, CrossfadeSession, CrossfadeStart, CrossfadeState, CrossfadeTick, TempoHint,
};
use super::levels::{LevelInput, SyntheticLevelGenerator};
use super::pipeline::{teardown, Pipeline, PipelineEvent, PipelineFactory, PipelineState, TEARDOWN_GRACE};
use super::processor::CaptureProcessor;
use super::publisher::{LevelPublisher, VisualizationHandle, VisualizationSink, VisualizationState};
use super::sample_buffer::SharedSampleBuffer;
use super::synth::SyntheticSampleProducer;
use crate::config::{clamp_or, EngineConfig};
use crate::error::{EngineError, Result};

/// What the host should do after the active pipeline reached its end.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndOfStreamAction {
    /// A fade is already running and will promote the next track.
    Crossfading,
    /// The staged track was started as a crossfade.
    CrossfadeStarted,
    /// Nothing staged; advance the playlist or stop.
    Advance,
}

/// The player-side engine: beat analysis, synthetic levels, the published
/// visualization state, and crossfades between pipelines built by `F`.
///
/// All timestamps (beat history, crossfade scheduling) come from one
/// monotonic `Clock`.
pub struct AudioEngine<F: PipelineFactory> {
    config: EngineConfig,
    clock: Arc<dyn Clock>,
    seed: Option<u64>,

    buffer: SharedSampleBuffer,
    detector: SharedDetector,
    tempo: SharedTempo,
    /// Set while capture or the host supplies samples.
    external_input: Arc<AtomicBool>,
    capture: Option<CaptureProcessor>,
    host_fed: bool,
    idle_loop: Option<AnalysisLoop>,
    worker: Option<AnalysisWorker>,

    levels: SyntheticLevelGenerator,
    publisher: LevelPublisher,
    sink: Option<Box<dyn VisualizationSink>>,

    crossfade: CrossfadeScheduler<F>,
    player: Option<F::Pipeline>,
}

impl<F: PipelineFactory> AudioEngine<F> {
    pub fn new(config: EngineConfig, factory: F) -> Result<Self> {
        Self::with_clock(config, factory, Arc::new(MonotonicClock::new()), None)
    }

    /// Builds the engine on an explicit clock. A `seed` makes every noise
    /// source deterministic.
    pub fn with_clock(
        config: EngineConfig,
        factory: F,
        clock: Arc<dyn Clock>,
        seed: Option<u64>,
    ) -> Result<Self> {
        let config = config.validated();
        let buffer = SharedSampleBuffer::new(config.sample_rate);
        let detector: SharedDetector = Arc::new(Mutex::new(config.detector.build(config.sample_rate)));

        let levels = match seed {
            Some(seed) => SyntheticLevelGenerator::with_seed(seed),
            None => SyntheticLevelGenerator::new(),
        };

        let mut crossfade = CrossfadeScheduler::new(factory);
        crossfade.set_master_volume(config.volume);
        crossfade.set_beat_aware(config.beat_aware_enabled);
        if config.crossfade_enabled {
            crossfade.enable(config.crossfade_duration);
        }

        let mut engine = Self {
            publisher: LevelPublisher::new(config.smoothing_alpha),
            clock,
            seed,
            buffer,
            detector,
            tempo: SharedTempo::new(),
            external_input: Arc::new(AtomicBool::new(false)),
            capture: None,
            host_fed: false,
            idle_loop: None,
            worker: None,
            levels,
            sink: None,
            crossfade,
            player: None,
            config,
        };

        info!(
            "Audio engine ready ({} detector, {} Hz)",
            lock_detector(&engine.detector).name(),
            engine.config.sample_rate
        );

        if engine.config.beat_aware_enabled {
            engine.start_analysis()?;
        }
        Ok(engine)
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn now(&self) -> f64 {
        self.clock.now()
    }

    pub fn sample_buffer(&self) -> &SharedSampleBuffer {
        &self.buffer
    }

    fn new_analysis_loop(&self) -> AnalysisLoop {
        let producer = match self.seed {
            Some(seed) => SyntheticSampleProducer::with_seed(self.config.sample_rate, seed),
            None => SyntheticSampleProducer::new(self.config.sample_rate),
        };
        AnalysisLoop::new(
            self.buffer.clone(),
            self.detector.clone(),
            self.tempo.clone(),
            producer,
            self.external_input.clone(),
            self.clock.clone(),
        )
    }

    // Beat analysis

    pub fn enable_beat_aware(&mut self) -> Result<()> {
        self.config.beat_aware_enabled = true;
        self.crossfade.set_beat_aware(true);
        self.start_analysis()?;
        info!("Beat-aware mode enabled");
        Ok(())
    }

    pub fn disable_beat_aware(&mut self) {
        let was_enabled = self.config.beat_aware_enabled;
        self.config.beat_aware_enabled = false;
        self.crossfade.set_beat_aware(false);
        self.stop_analysis();
        if was_enabled {
            info!("Beat-aware mode disabled");
        }
    }

    pub fn is_beat_aware(&self) -> bool {
        self.config.beat_aware_enabled
    }

    /// Starts the background worker unless one is already running or the
    /// host drives analysis through `feed_samples`.
    pub fn start_analysis(&mut self) -> Result<()> {
        if self.analysis_alive() {
            return Ok(());
        }
        if self.host_fed {
            debug!("Host feeds samples; no analysis thread needed");
            return Ok(());
        }
        self.worker = None;

        let analysis = match self.idle_loop.take() {
            Some(analysis) => analysis,
            None => self.new_analysis_loop(),
        };
        self.worker = Some(AnalysisWorker::spawn(analysis)?);
        Ok(())
    }

    /// Stops the worker (bounded join) and clears the buffer and the beat
    /// history.
    pub fn stop_analysis(&mut self) {
        if let Some(worker) = self.worker.take() {
            // A worker that missed the deadline is detached; a fresh loop is
            // built on the next start.
            self.idle_loop = worker.stop(JOIN_TIMEOUT);
        }
        self.buffer.clear();
        lock_detector(&self.detector).reset();
        self.tempo.reset();
    }

    pub fn analysis_alive(&self) -> bool {
        self.worker.as_ref().is_some_and(|w| w.is_alive())
    }

    /// Runs one produce-then-analyze step on the caller's thread. While the
    /// worker runs this only reports the detector's latest state.
    pub fn analyze_once(&mut self) -> BeatAnalysis {
        if self.worker.is_some() {
            return BeatAnalysis {
                beat_detected: self.tempo.beat_detected(),
                bpm_updated: false,
                bpm: self.tempo.bpm(),
            };
        }

        if self.idle_loop.is_none() {
            self.idle_loop = Some(self.new_analysis_loop());
        }
        match self.idle_loop.as_mut() {
            Some(analysis) => analysis.step(),
            None => BeatAnalysis::default(),
        }
    }

    /// Never blocks on a running analysis.
    pub fn current_bpm(&self) -> f32 {
        self.tempo.bpm()
    }

    /// The detector's beat flag, as opposed to the visual one.
    pub fn detector_beat(&self) -> bool {
        self.tempo.beat_detected()
    }

    /// Appends samples decoded by the host and analyzes them at the engine
    /// clock's current time.
    ///
    /// The first call stops the worker and clears the synthetic material;
    /// from then on the host drives analysis until `resume_synthetic_input`.
    pub fn feed_samples(&mut self, samples: &[f32]) -> BeatAnalysis {
        if !self.host_fed {
            self.stop_analysis();
            self.host_fed = true;
            self.external_input.store(true, Ordering::Release);
            info!("Analysis now fed by the host");
        }
        self.buffer.append(samples);
        analyze_now(&self.buffer, &self.detector, &self.tempo, &*self.clock)
    }

    /// Hands the buffer back to capture or the synthetic producer and
    /// restarts the worker when beat-aware mode wants it.
    pub fn resume_synthetic_input(&mut self) -> Result<()> {
        if !self.host_fed {
            return Ok(());
        }
        self.host_fed = false;
        self.external_input.store(self.capture.is_some(), Ordering::Release);
        if self.config.beat_aware_enabled {
            self.start_analysis()?;
        }
        Ok(())
    }

    pub fn is_host_fed(&self) -> bool {
        self.host_fed
    }

    pub fn beat_positions(&self) -> Vec<f64> {
        lock_detector(&self.detector).history().to_vec()
    }

    /// Predicted engine-clock time of the next beat after now.
    pub fn next_beat_time(&self) -> Option<f64> {
        let now = self.clock.now();
        let detector = lock_detector(&self.detector);
        detector
            .history()
            .next_beat_after(now, BEAT_SYNC_OFFSET, detector.bpm())
    }

    /// Taps the default input device. The worker stops producing synthetic
    /// samples until the capture is detached.
    pub fn attach_capture(&mut self) -> Result<()> {
        if self.capture.is_some() {
            return Ok(());
        }
        let capture = CaptureProcessor::start(self.buffer.clone(), self.external_input.clone())?;
        if capture.sample_rate() != self.config.sample_rate {
            warn!(
                "Capture runs at {} Hz, analysis assumes {} Hz",
                capture.sample_rate(),
                self.config.sample_rate
            );
        }
        self.capture = Some(capture);
        Ok(())
    }

    pub fn detach_capture(&mut self) {
        self.capture = None;
        if self.host_fed {
            // Dropping the capture cleared the flag the host still needs.
            self.external_input.store(true, Ordering::Release);
        }
    }

    pub fn is_capturing(&self) -> bool {
        self.capture.is_some()
    }

    // Visualization

    pub fn set_visualization_sink(&mut self, sink: Option<Box<dyn VisualizationSink>>) {
        self.sink = sink;
    }

    pub fn visualization_handle(&self) -> VisualizationHandle {
        self.publisher.handle()
    }

    /// Latest published state. Cheap; never recomputes.
    pub fn visualization_state(&self) -> VisualizationState {
        self.publisher.current_levels()
    }

    /// Generates, smooths and publishes one frame of levels.
    pub fn update_visualization(&mut self) -> VisualizationState {
        self.reap_dead_worker();

        let input = self.level_input();
        let frame = *self.levels.tick(input);
        let state = self.publisher.publish(&frame, input.bpm);

        if let Some(sink) = self.sink.as_mut() {
            sink.update(&state);
        }
        state
    }

    fn level_input(&self) -> LevelInput {
        let bpm = self.current_bpm();
        let Some(player) = self.player.as_ref() else {
            // Free-running: keep the visualizer moving on the internal clock.
            return LevelInput {
                position: None,
                playing: true,
                volume: self.config.volume,
                bpm,
            };
        };

        let playing = player.state() == PipelineState::Playing;
        let volume = if self.crossfade.is_active() {
            self.config.volume
        } else {
            player.volume()
        };
        LevelInput {
            position: playing.then(|| player.position_seconds()),
            playing,
            volume,
            bpm,
        }
    }

    fn reap_dead_worker(&mut self) {
        if self.worker.as_ref().is_some_and(|w| !w.is_alive()) {
            warn!("Beat analysis thread exited; continuing with last known BPM");
            self.worker = None;
        }
    }

    // Crossfade

    pub fn enable_crossfade(&mut self, duration: f32) {
        self.crossfade.enable(duration);
        self.config.crossfade_enabled = true;
        self.config.crossfade_duration = self.crossfade.duration();
    }

    pub fn disable_crossfade(&mut self) {
        self.crossfade.disable();
        self.config.crossfade_enabled = false;
    }

    pub fn crossfade_state(&self) -> CrossfadeState {
        self.crossfade.state()
    }

    pub fn crossfade_session(&self) -> Option<&CrossfadeSession> {
        self.crossfade.session()
    }

    pub fn crossfade_needs_tick(&self) -> bool {
        self.crossfade.needs_tick()
    }

    pub fn prepare_crossfade(&mut self, uri: &str) -> bool {
        self.crossfade.prepare(uri)
    }

    /// Starts the staged crossfade, beat-aligned when beat-aware mode has a
    /// tempo to work with.
    pub fn start_crossfade(&mut self) -> Option<CrossfadeStart> {
        let now = self.clock.now();
        let tempo = self.tempo_hint(now);
        let current = self.player.as_mut()?;
        self.crossfade.start(current, now, tempo)
    }

    fn tempo_hint(&self, now: f64) -> Option<TempoHint> {
        if !self.config.beat_aware_enabled {
            return None;
        }
        let detector = lock_detector(&self.detector);
        let bpm = detector.bpm();
        if bpm <= 0.0 {
            return None;
        }
        Some(TempoHint {
            bpm,
            next_beat: detector.history().next_beat_after(now, BEAT_SYNC_OFFSET, bpm),
        })
    }

    pub fn tick_crossfade(&mut self) -> CrossfadeTick {
        let now = self.clock.now();
        match self.player.as_mut() {
            Some(current) => self.crossfade.tick(current, now),
            None => {
                // Nothing left to fade from.
                self.crossfade.cancel();
                CrossfadeTick::Inactive
            }
        }
    }

    /// Stages `next_uri` when crossfading is on and no fade is running.
    pub fn on_about_to_finish(&mut self, next_uri: Option<&str>) -> bool {
        if !self.crossfade.is_enabled() || self.crossfade.is_active() {
            return false;
        }
        let Some(uri) = next_uri else {
            return false;
        };
        self.crossfade.prepare(uri)
    }

    pub fn on_end_of_stream(&mut self) -> EndOfStreamAction {
        if self.crossfade.is_active() {
            debug!("End of stream during active crossfade");
            return EndOfStreamAction::Crossfading;
        }
        if self.crossfade.is_enabled()
            && self.crossfade.state() == CrossfadeState::Prepared
            && self.start_crossfade().is_some()
        {
            return EndOfStreamAction::CrossfadeStarted;
        }
        EndOfStreamAction::Advance
    }

    /// Drains the next stream notification from the active pipeline.
    pub fn poll_pipeline_event(&mut self) -> Option<PipelineEvent> {
        self.player.as_mut()?.poll_event()
    }

    // Transport

    pub fn player(&self) -> Option<&F::Pipeline> {
        self.player.as_ref()
    }

    /// Replaces the active pipeline with a new one for `uri` and starts it.
    /// Any staged or running crossfade is dropped.
    pub fn play_uri(&mut self, uri: &str) -> Result<()> {
        self.crossfade.cancel();

        let mut pipeline = self.crossfade.factory_mut().create(uri)?;
        pipeline.set_volume(self.config.volume)?;
        pipeline.play()?;

        if let Some(mut old) = self.player.replace(pipeline) {
            teardown(&mut old, TEARDOWN_GRACE);
        }
        info!("Playing: {}", uri);
        Ok(())
    }

    fn player_mut(&mut self) -> Result<&mut F::Pipeline> {
        self.player.as_mut().ok_or(EngineError::NoTrack)
    }

    pub fn play(&mut self) -> Result<()> {
        self.player_mut()?.play()?;
        Ok(())
    }

    pub fn pause(&mut self) -> Result<()> {
        self.player_mut()?.pause()?;
        Ok(())
    }

    pub fn stop(&mut self) -> Result<()> {
        self.crossfade.cancel();
        self.player_mut()?.stop()?;
        Ok(())
    }

    pub fn seek_percent(&mut self, percent: f64) -> Result<()> {
        self.player_mut()?.seek_to_percent(percent)?;
        Ok(())
    }

    pub fn position_percent(&self) -> f64 {
        self.player.as_ref().map_or(0.0, |p| p.position_percent())
    }

    pub fn position_seconds(&self) -> f64 {
        self.player.as_ref().map_or(0.0, |p| p.position_seconds())
    }

    /// Sets the master volume. Mid-fade the new value applies once the fade
    /// completes. Non-finite input keeps the current volume.
    pub fn set_volume(&mut self, volume: f32) -> Result<()> {
        let volume = clamp_or(volume, 0.0, 1.0, self.config.volume);
        self.config.volume = volume;
        self.crossfade.set_master_volume(volume);

        if !self.crossfade.is_active() {
            if let Some(player) = self.player.as_mut() {
                player.set_volume(volume)?;
            }
        }
        Ok(())
    }

    pub fn volume(&self) -> f32 {
        self.config.volume
    }

    /// Stops analysis, drops any crossfade and tears the player down.
    pub fn shutdown(&mut self) {
        self.stop_analysis();
        self.detach_capture();
        self.crossfade.cancel();
        if let Some(mut player) = self.player.take() {
            teardown(&mut player, TEARDOWN_GRACE);
        }
        info!("Audio engine shut down");
    }
}

impl<F: PipelineFactory> Drop for AudioEngine<F> {
    fn drop(&mut self) {
        if let Some(worker) = self.worker.take() {
            let _ = worker.stop(JOIN_TIMEOUT);
        }
    }
}
