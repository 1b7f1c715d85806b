use std::sync::{Arc, Mutex, MutexGuard};

use super::levels::LevelFrame;
use super::VISUALIZATION_BANDS;

/// Smoothing factor applied between generation ticks.
pub const DEFAULT_SMOOTHING_ALPHA: f32 = 0.3;

/// What the renderer draws: smoothed band levels, the beat flag and the
/// tempo estimate.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VisualizationState {
    pub levels: [f32; VISUALIZATION_BANDS],
    pub beat_detected: bool,
    pub bpm: f32,
}

impl Default for VisualizationState {
    fn default() -> Self {
        Self {
            levels: [0.0; VISUALIZATION_BANDS],
            beat_detected: false,
            bpm: 0.0,
        }
    }
}

/// Renderer-side capability. The engine pushes every published state to the
/// attached sink, if any.
pub trait VisualizationSink {
    fn update(&mut self, state: &VisualizationState);
}

/// Cheap, cloneable read handle for render threads.
#[derive(Debug, Clone, Default)]
pub struct VisualizationHandle {
    state: Arc<Mutex<VisualizationState>>,
}

impl VisualizationHandle {
    fn lock(&self) -> MutexGuard<'_, VisualizationState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Latest published state. Never triggers recomputation.
    pub fn current(&self) -> VisualizationState {
        *self.lock()
    }
}

/// Single writer of `VisualizationState`. Smooths each generated frame into
/// the cached state: `smoothed = (1 - alpha) * smoothed + alpha * raw`.
pub struct LevelPublisher {
    alpha: f32,
    smoothed: [f32; VISUALIZATION_BANDS],
    handle: VisualizationHandle,
}

impl LevelPublisher {
    pub fn new(alpha: f32) -> Self {
        Self {
            alpha: alpha.clamp(0.0, 1.0),
            smoothed: [0.0; VISUALIZATION_BANDS],
            handle: VisualizationHandle::default(),
        }
    }

    pub fn alpha(&self) -> f32 {
        self.alpha
    }

    pub fn handle(&self) -> VisualizationHandle {
        self.handle.clone()
    }

    pub fn publish(&mut self, frame: &LevelFrame, bpm: f32) -> VisualizationState {
        for (smoothed, &raw) in self.smoothed.iter_mut().zip(frame.levels.iter()) {
            *smoothed = (1.0 - self.alpha) * *smoothed + self.alpha * raw;
        }

        let state = VisualizationState {
            levels: self.smoothed,
            beat_detected: frame.beat_detected,
            bpm: bpm.max(0.0),
        };
        *self.handle.lock() = state;
        state
    }

    pub fn current_levels(&self) -> VisualizationState {
        self.handle.current()
    }

    pub fn reset(&mut self) {
        self.smoothed = [0.0; VISUALIZATION_BANDS];
        *self.handle.lock() = VisualizationState::default();
    }
}

impl Default for LevelPublisher {
    fn default() -> Self {
        Self::new(DEFAULT_SMOOTHING_ALPHA)
    }
}
