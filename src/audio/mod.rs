pub mod analysis;
pub mod beat_detector;
pub mod clock;
pub mod crossfade;
pub mod engine;
pub mod fft;
pub mod levels;
pub mod pipeline;
pub mod playback;
pub mod processor;
pub mod publisher;
pub mod sample_buffer;
pub mod synth;

use std::time::Duration;

pub use analysis::{AnalysisLoop, AnalysisWorker, SharedTempo};
pub use beat_detector::{BeatAnalysis, BeatDetector, DetectorKind, HopEnergyDetector, SpectralBeatDetector};
pub use clock::{Clock, ManualClock, MonotonicClock};
pub use crossfade::{CrossfadeScheduler, CrossfadeStart, CrossfadeState, CrossfadeTick};
pub use engine::{AudioEngine, EndOfStreamAction};
pub use levels::{LevelFrame, SyntheticLevelGenerator};
pub use pipeline::{Pipeline, PipelineEvent, PipelineFactory, PipelineState};
pub use playback::{RodioPipeline, RodioPipelineFactory};
pub use processor::CaptureProcessor;
pub use publisher::{VisualizationHandle, VisualizationSink, VisualizationState};
pub use sample_buffer::SharedSampleBuffer;

pub const SAMPLE_RATE: u32 = 44100;
/// FFT / analysis window in samples.
pub const ANALYSIS_WINDOW: usize = 1024;
pub const HOP_SIZE: usize = 512;
/// Onset ratio a window must exceed to count as a beat.
pub const BEAT_THRESHOLD: f32 = 1.3;
/// Refractory period between declared beats, in seconds.
pub const MIN_BEAT_INTERVAL: f64 = 0.2;
pub const VISUALIZATION_BANDS: usize = 64;

/// Cadence of synthetic level generation.
pub const AUDIO_UPDATE_INTERVAL: Duration = Duration::from_millis(50);
/// Cadence at which renderers read the published state.
pub const RENDER_INTERVAL: Duration = Duration::from_millis(16);
