#![allow(dead_code)]

use std::collections::VecDeque;
use std::f32::consts::PI;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use linamp_engine::audio::{ManualClock, Pipeline, PipelineEvent, PipelineFactory, PipelineState};
use linamp_engine::{AudioEngine, EngineConfig, PipelineError};

pub const TRACK_LENGTH_NS: u64 = 180_000_000_000;

/// Knobs and a record of everything the fake pipelines were asked to do.
#[derive(Default)]
pub struct Script {
    pub fail_create: bool,
    pub fail_play: bool,
    pub fail_volume: bool,
    /// Pipelines ignore `stop` and must be force-killed.
    pub stubborn: bool,
    pub created: Vec<String>,
    pub stopped: Vec<String>,
    pub killed: Vec<String>,
    pub events: VecDeque<(String, PipelineEvent)>,
}

#[derive(Clone, Default)]
pub struct ScriptHandle(Arc<Mutex<Script>>);

impl ScriptHandle {
    pub fn lock(&self) -> MutexGuard<'_, Script> {
        self.0.lock().unwrap()
    }

    pub fn created(&self) -> Vec<String> {
        self.lock().created.clone()
    }

    pub fn stopped(&self) -> Vec<String> {
        self.lock().stopped.clone()
    }

    pub fn killed(&self) -> Vec<String> {
        self.lock().killed.clone()
    }

    pub fn push_event(&self, uri: &str, event: PipelineEvent) {
        self.lock().events.push_back((uri.to_string(), event));
    }
}

pub struct FakeFactory {
    pub script: ScriptHandle,
}

impl FakeFactory {
    pub fn new() -> (Self, ScriptHandle) {
        let script = ScriptHandle::default();
        (
            Self {
                script: script.clone(),
            },
            script,
        )
    }
}

impl PipelineFactory for FakeFactory {
    type Pipeline = FakePipeline;

    fn create(&mut self, uri: &str) -> Result<FakePipeline, PipelineError> {
        let mut script = self.script.lock();
        if script.fail_create {
            return Err(PipelineError::Create {
                uri: uri.to_string(),
                reason: "scripted failure".to_string(),
            });
        }
        script.created.push(uri.to_string());
        Ok(FakePipeline::new(uri, self.script.clone()))
    }
}

pub struct FakePipeline {
    uri: String,
    state: PipelineState,
    volume: f32,
    position_ns: u64,
    script: ScriptHandle,
}

impl FakePipeline {
    pub fn new(uri: &str, script: ScriptHandle) -> Self {
        Self {
            uri: uri.to_string(),
            state: PipelineState::Null,
            volume: 1.0,
            position_ns: 0,
            script,
        }
    }

    pub fn set_position_seconds(&mut self, seconds: f64) {
        self.position_ns = (seconds * 1e9) as u64;
    }
}

impl Pipeline for FakePipeline {
    fn uri(&self) -> &str {
        &self.uri
    }

    fn set_state(&mut self, state: PipelineState) -> Result<(), PipelineError> {
        let mut script = self.script.lock();
        match state {
            PipelineState::Playing if script.fail_play => {
                return Err(PipelineError::StateChange("scripted failure".into()));
            }
            PipelineState::Null => {
                script.stopped.push(self.uri.clone());
                if script.stubborn {
                    return Ok(());
                }
            }
            _ => {}
        }
        self.state = state;
        Ok(())
    }

    fn state(&self) -> PipelineState {
        self.state
    }

    fn set_volume(&mut self, fraction: f32) -> Result<(), PipelineError> {
        if self.script.lock().fail_volume {
            return Err(PipelineError::Volume("scripted failure".into()));
        }
        self.volume = fraction;
        Ok(())
    }

    fn volume(&self) -> f32 {
        self.volume
    }

    fn position_ns(&self) -> Option<u64> {
        (self.state != PipelineState::Null).then_some(self.position_ns)
    }

    fn duration_ns(&self) -> Option<u64> {
        Some(TRACK_LENGTH_NS)
    }

    fn seek_ns(&mut self, position: u64) -> Result<(), PipelineError> {
        self.position_ns = position.min(TRACK_LENGTH_NS);
        Ok(())
    }

    fn force_kill(&mut self) {
        self.script.lock().killed.push(self.uri.clone());
        self.state = PipelineState::Null;
    }

    fn poll_event(&mut self) -> Option<PipelineEvent> {
        let mut script = self.script.lock();
        let index = script.events.iter().position(|(uri, _)| *uri == self.uri)?;
        script.events.remove(index).map(|(_, event)| event)
    }
}

pub const SHORT_GRACE: Duration = Duration::from_millis(20);

pub struct Harness {
    pub engine: AudioEngine<FakeFactory>,
    pub clock: ManualClock,
    pub script: ScriptHandle,
}

pub fn engine_with(config: EngineConfig) -> Harness {
    let (factory, script) = FakeFactory::new();
    let clock = ManualClock::new(100.0);
    let engine =
        AudioEngine::with_clock(config, factory, Arc::new(clock.clone()), Some(7)).unwrap();
    Harness {
        engine,
        clock,
        script,
    }
}

/// One analysis window: a treble bed with a 129 Hz tone of amplitude `bass`.
pub fn mixed_block(bass: f32) -> Vec<f32> {
    let bass_hz = 3.0 * 44100.0 / 1024.0;
    let treble_hz = 300.0 * 44100.0 / 1024.0;
    (0..1024)
        .map(|i| {
            let t = i as f32 / 44100.0;
            (2.0 * PI * treble_hz * t).sin() * 0.5 + (2.0 * PI * bass_hz * t).sin() * bass
        })
        .collect()
}

pub fn kick_block() -> Vec<f32> {
    mixed_block(0.8)
}

pub fn bed_block() -> Vec<f32> {
    mixed_block(0.03)
}
