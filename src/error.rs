use thiserror::Error;

/// Failures of the analysis path. These never leave the detector: they are
/// logged and the tick is treated as "no beat".
#[derive(Debug, Error, PartialEq)]
pub enum AnalysisError {
    #[error("need {needed} samples, buffer holds {available}")]
    InsufficientSamples { needed: usize, available: usize },

    #[error("analysis window carries no energy")]
    SilentWindow,

    #[error("non-finite value in analysis window")]
    NonFinite,
}

/// Failures reported by a playback pipeline.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("failed to create pipeline for {uri}: {reason}")]
    Create { uri: String, reason: String },

    #[error("state change failed: {0}")]
    StateChange(String),

    #[error("volume change failed: {0}")]
    Volume(String),

    #[error("query failed: {0}")]
    Query(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Pipeline(#[from] PipelineError),

    #[error("no track loaded")]
    NoTrack,

    #[error("no audio input device available")]
    NoInputDevice,

    #[error("audio capture failed: {0}")]
    Capture(String),

    #[error("failed to spawn analysis thread: {0}")]
    Spawn(#[source] std::io::Error),

    #[error("config error: {0}")]
    Config(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

pub type Result<T, E = EngineError> = std::result::Result<T, E>;
