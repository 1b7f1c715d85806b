//! Beat detection, synthetic visualization levels and crossfade scheduling
//! for the Linamp player.

pub mod audio;
pub mod config;
pub mod error;

pub use audio::engine::{AudioEngine, EndOfStreamAction};
pub use config::EngineConfig;
pub use error::{EngineError, PipelineError, Result};
