use std::thread;
use std::time::{Duration, Instant};

use log::warn;

use crate::error::PipelineError;

/// How long a stopped pipeline gets to settle before it is force-killed.
pub const TEARDOWN_GRACE: Duration = Duration::from_millis(500);
const TEARDOWN_POLL: Duration = Duration::from_millis(10);

const NANOS_PER_SEC: f64 = 1_000_000_000.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Null,
    Paused,
    Playing,
}

/// Notifications a pipeline raises towards the end of its stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineEvent {
    AboutToFinish,
    EndOfStream,
}

/// One playback pipeline: a decoded stream routed to an output with its own
/// volume and transport state.
pub trait Pipeline {
    fn uri(&self) -> &str;

    fn set_state(&mut self, state: PipelineState) -> Result<(), PipelineError>;

    fn state(&self) -> PipelineState;

    fn set_volume(&mut self, fraction: f32) -> Result<(), PipelineError>;

    fn volume(&self) -> f32;

    fn position_ns(&self) -> Option<u64>;

    fn duration_ns(&self) -> Option<u64>;

    fn seek_ns(&mut self, position: u64) -> Result<(), PipelineError>;

    /// Releases the pipeline's resources without waiting on it.
    fn force_kill(&mut self);

    /// Drains the next pending stream notification.
    fn poll_event(&mut self) -> Option<PipelineEvent> {
        None
    }

    fn is_stopped(&self) -> bool {
        self.state() == PipelineState::Null
    }

    fn play(&mut self) -> Result<(), PipelineError> {
        self.set_state(PipelineState::Playing)
    }

    fn pause(&mut self) -> Result<(), PipelineError> {
        self.set_state(PipelineState::Paused)
    }

    fn stop(&mut self) -> Result<(), PipelineError> {
        self.set_state(PipelineState::Null)
    }

    fn position_seconds(&self) -> f64 {
        self.position_ns()
            .map(|ns| ns as f64 / NANOS_PER_SEC)
            .unwrap_or(0.0)
    }

    fn position_percent(&self) -> f64 {
        match (self.position_ns(), self.duration_ns()) {
            (Some(pos), Some(dur)) if dur > 0 => pos as f64 / dur as f64 * 100.0,
            _ => 0.0,
        }
    }

    fn seek_to_percent(&mut self, percent: f64) -> Result<(), PipelineError> {
        let duration = self
            .duration_ns()
            .filter(|&d| d > 0)
            .ok_or_else(|| PipelineError::Query("duration unknown".to_string()))?;
        let target = (percent.clamp(0.0, 100.0) / 100.0 * duration as f64) as u64;
        self.seek_ns(target)
    }
}

/// Builds pipelines for URIs. Crossfades use it to stage the next track.
pub trait PipelineFactory {
    type Pipeline: Pipeline;

    fn create(&mut self, uri: &str) -> Result<Self::Pipeline, PipelineError>;
}

/// Stops a pipeline, escalating to `force_kill` if it refuses to stop or
/// does not settle within `grace`.
pub fn teardown<P: Pipeline + ?Sized>(pipeline: &mut P, grace: Duration) {
    if let Err(e) = pipeline.stop() {
        warn!("Pipeline {} failed to stop ({}), forcing", pipeline.uri(), e);
        pipeline.force_kill();
        return;
    }

    let deadline = Instant::now() + grace;
    while !pipeline.is_stopped() {
        if Instant::now() >= deadline {
            warn!(
                "Pipeline {} did not stop within {:?}, forcing",
                pipeline.uri(),
                grace
            );
            pipeline.force_kill();
            return;
        }
        thread::sleep(TEARDOWN_POLL);
    }
}
