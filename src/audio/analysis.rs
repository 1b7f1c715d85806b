use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender};
use log::{error, info, warn};

use super::beat_detector::{BeatAnalysis, BeatDetector};
use super::clock::Clock;
use super::sample_buffer::SharedSampleBuffer;
use super::synth::SyntheticSampleProducer;
use crate::error::{EngineError, Result};

/// Pause between analysis iterations.
pub const ANALYSIS_INTERVAL: Duration = Duration::from_millis(50);
/// Longer pause after an iteration that panicked.
pub const ERROR_BACKOFF: Duration = Duration::from_millis(100);
/// How long `stop` waits for the worker before detaching it.
pub const JOIN_TIMEOUT: Duration = Duration::from_secs(1);

pub type SharedDetector = Arc<Mutex<Box<dyn BeatDetector>>>;

pub fn lock_detector(detector: &SharedDetector) -> MutexGuard<'_, Box<dyn BeatDetector>> {
    detector.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Latest BPM and beat flag, published after every detector tick so readers
/// never wait on the detector lock.
#[derive(Clone, Default)]
pub struct SharedTempo {
    bpm_bits: Arc<AtomicU32>,
    beat: Arc<AtomicBool>,
}

impl SharedTempo {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn publish(&self, analysis: &BeatAnalysis) {
        self.bpm_bits.store(analysis.bpm.to_bits(), Ordering::Release);
        self.beat.store(analysis.beat_detected, Ordering::Release);
    }

    pub fn bpm(&self) -> f32 {
        f32::from_bits(self.bpm_bits.load(Ordering::Acquire))
    }

    pub fn beat_detected(&self) -> bool {
        self.beat.load(Ordering::Acquire)
    }

    pub fn reset(&self) {
        self.publish(&BeatAnalysis::default());
    }
}

/// One produce-then-analyze step, shared by the worker thread and by
/// synchronous callers.
pub struct AnalysisLoop {
    buffer: SharedSampleBuffer,
    detector: SharedDetector,
    tempo: SharedTempo,
    producer: SyntheticSampleProducer,
    external_input: Arc<AtomicBool>,
    clock: Arc<dyn Clock>,
}

impl AnalysisLoop {
    pub fn new(
        buffer: SharedSampleBuffer,
        detector: SharedDetector,
        tempo: SharedTempo,
        producer: SyntheticSampleProducer,
        external_input: Arc<AtomicBool>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            buffer,
            detector,
            tempo,
            producer,
            external_input,
            clock,
        }
    }

    pub fn step(&mut self) -> BeatAnalysis {
        // Capture or the host feeds the buffer when external input is on.
        if !self.external_input.load(Ordering::Acquire) {
            let block = self.producer.produce(self.tempo.bpm());
            self.buffer.append(&block);
        }
        analyze_now(&self.buffer, &self.detector, &self.tempo, &*self.clock)
    }
}

/// Runs the detector over the buffer at the clock's current time and
/// publishes the outcome.
pub fn analyze_now(
    buffer: &SharedSampleBuffer,
    detector: &SharedDetector,
    tempo: &SharedTempo,
    clock: &dyn Clock,
) -> BeatAnalysis {
    let now = clock.now();
    let analysis = lock_detector(detector).analyze(buffer, now);
    tempo.publish(&analysis);
    analysis
}

/// Cooperative stop flag. Setting it also wakes the worker from its sleep.
#[derive(Clone)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
    wake: Sender<()>,
}

impl CancellationToken {
    fn new() -> (Self, Receiver<()>) {
        let (wake, sleeper) = bounded(1);
        let token = Self {
            cancelled: Arc::new(AtomicBool::new(false)),
            wake,
        };
        (token, sleeper)
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
        let _ = self.wake.try_send(());
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }
}

/// Background thread running `AnalysisLoop::step` every `ANALYSIS_INTERVAL`.
pub struct AnalysisWorker {
    token: CancellationToken,
    handle: Option<JoinHandle<AnalysisLoop>>,
    done: Receiver<()>,
}

impl AnalysisWorker {
    pub fn spawn(mut analysis: AnalysisLoop) -> Result<Self> {
        let (token, sleeper) = CancellationToken::new();
        let (done_tx, done) = bounded(1);
        let worker_token = token.clone();

        let handle = thread::Builder::new()
            .name("beat-analysis".to_string())
            .spawn(move || {
                run(&mut analysis, &worker_token, &sleeper);
                let _ = done_tx.send(());
                analysis
            })
            .map_err(EngineError::Spawn)?;

        info!("Beat analysis thread started");
        Ok(Self {
            token,
            handle: Some(handle),
            done,
        })
    }

    pub fn is_alive(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Signals the worker and waits up to `timeout` for it to exit. Returns
    /// the loop state on a clean exit so it can be resumed later.
    pub fn stop(mut self, timeout: Duration) -> Option<AnalysisLoop> {
        self.token.cancel();
        let handle = self.handle.take()?;

        match self.done.recv_timeout(timeout) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => match handle.join() {
                Ok(analysis) => {
                    info!("Beat analysis thread stopped");
                    Some(analysis)
                }
                Err(_) => {
                    error!("Beat analysis thread panicked");
                    None
                }
            },
            Err(RecvTimeoutError::Timeout) => {
                warn!("Beat analysis thread did not stop within {:?}; detaching", timeout);
                None
            }
        }
    }
}

impl Drop for AnalysisWorker {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

fn run(analysis: &mut AnalysisLoop, token: &CancellationToken, sleeper: &Receiver<()>) {
    while !token.is_cancelled() {
        let pause = match panic::catch_unwind(AssertUnwindSafe(|| analysis.step())) {
            Ok(_) => ANALYSIS_INTERVAL,
            Err(_) => {
                error!("Beat analysis iteration panicked; continuing");
                ERROR_BACKOFF
            }
        };

        match sleeper.recv_timeout(pause) {
            Err(RecvTimeoutError::Timeout) => {}
            Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
        }
    }
}
