use std::time::Duration;

use log::{debug, error, info, warn};

use super::pipeline::{teardown, Pipeline, PipelineFactory, PipelineState, TEARDOWN_GRACE};

/// Period of the volume animation timer.
pub const CROSSFADE_TICK: Duration = Duration::from_millis(50);

pub const DEFAULT_CROSSFADE_DURATION: f32 = 3.0;
pub const MIN_CROSSFADE_DURATION: f32 = 1.0;
pub const MAX_CROSSFADE_DURATION: f32 = 10.0;

const MAX_BEAT_DELAY_SECS: f64 = 5.0;
const PHRASE_BEATS: f64 = 4.0;
const MIN_PHRASE_SECS: f64 = 1.0;
const MAX_PHRASE_SECS: f64 = 8.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CrossfadeState {
    Idle,
    /// Next pipeline staged, paused at volume 0.
    Prepared,
    /// Both pipelines playing, volumes animating.
    Active,
    /// Old pipeline torn down, next promoted.
    Completed,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CrossfadeSession {
    /// Engine-clock time the volume animation starts (after any beat delay).
    pub start: f64,
    pub duration: f64,
    pub current_volume: f32,
    pub next_volume: f32,
    pub beat_aware: bool,
}

/// Tempo information used to line a crossfade up with the beat.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TempoHint {
    pub bpm: f32,
    pub next_beat: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CrossfadeStart {
    Immediate,
    /// Animation held back until the predicted beat.
    Delayed(Duration),
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CrossfadeTick {
    /// No active session; the timer can be cancelled.
    Inactive,
    /// Active but still waiting for the beat-aligned start.
    Waiting,
    Animating {
        progress: f64,
        current_volume: f32,
        next_volume: f32,
    },
    Completed,
}

/// Ease-in envelope: returns `(outgoing, incoming)` volumes for `progress`.
pub fn envelope(progress: f64) -> (f32, f32) {
    let fade = progress.clamp(0.0, 1.0).powi(2) as f32;
    ((1.0 - fade).max(0.0), fade.min(1.0))
}

/// Four beats, when that lands between one and eight seconds.
pub fn phrase_duration(bpm: f32) -> Option<f64> {
    if bpm <= 0.0 {
        return None;
    }
    let phrase = 60.0 / bpm as f64 * PHRASE_BEATS;
    (MIN_PHRASE_SECS..=MAX_PHRASE_SECS).contains(&phrase).then_some(phrase)
}

/// Coordinates the hand-over from the active pipeline to a staged one.
///
/// The scheduler owns the staged pipeline; the active pipeline stays with
/// the caller and is lent to `start`/`tick`, which swap the two on
/// completion.
pub struct CrossfadeScheduler<F: PipelineFactory> {
    factory: F,
    enabled: bool,
    duration: f32,
    beat_aware: bool,
    master_volume: f32,
    teardown_grace: Duration,
    state: CrossfadeState,
    session: Option<CrossfadeSession>,
    next: Option<F::Pipeline>,
}

impl<F: PipelineFactory> CrossfadeScheduler<F> {
    pub fn new(factory: F) -> Self {
        Self {
            factory,
            enabled: false,
            duration: DEFAULT_CROSSFADE_DURATION,
            beat_aware: false,
            master_volume: 1.0,
            teardown_grace: TEARDOWN_GRACE,
            state: CrossfadeState::Idle,
            session: None,
            next: None,
        }
    }

    pub fn with_teardown_grace(mut self, grace: Duration) -> Self {
        self.teardown_grace = grace;
        self
    }

    pub fn enable(&mut self, duration: f32) {
        self.enabled = true;
        self.duration = duration.clamp(MIN_CROSSFADE_DURATION, MAX_CROSSFADE_DURATION);
        info!("Crossfade enabled with duration: {:.1}s", self.duration);
    }

    /// Tears down any staged or fading pipeline and returns to `Idle`.
    pub fn disable(&mut self) {
        let was_enabled = self.enabled;
        self.enabled = false;
        let had_session = self.cancel();

        if had_session || was_enabled {
            info!("Crossfade disabled");
        }
    }

    /// Drops the staged or fading pipeline but stays enabled. Returns
    /// whether there was anything to drop.
    pub fn cancel(&mut self) -> bool {
        let had_session = self.next.is_some() || self.state != CrossfadeState::Idle;
        if let Some(mut next) = self.next.take() {
            teardown(&mut next, self.teardown_grace);
        }
        self.state = CrossfadeState::Idle;
        self.session = None;
        had_session
    }

    pub fn set_beat_aware(&mut self, enabled: bool) {
        self.beat_aware = enabled;
    }

    pub fn set_master_volume(&mut self, volume: f32) {
        self.master_volume = volume.clamp(0.0, 1.0);
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn is_beat_aware(&self) -> bool {
        self.beat_aware
    }

    pub fn duration(&self) -> f32 {
        self.duration
    }

    pub fn state(&self) -> CrossfadeState {
        self.state
    }

    pub fn session(&self) -> Option<&CrossfadeSession> {
        self.session.as_ref()
    }

    pub fn is_active(&self) -> bool {
        self.state == CrossfadeState::Active
    }

    /// Whether a staged or fading pipeline exists.
    pub fn is_busy(&self) -> bool {
        matches!(self.state, CrossfadeState::Prepared | CrossfadeState::Active)
    }

    /// The animation timer should be running.
    pub fn needs_tick(&self) -> bool {
        self.is_active()
    }

    pub fn next_pipeline(&self) -> Option<&F::Pipeline> {
        self.next.as_ref()
    }

    pub fn factory(&self) -> &F {
        &self.factory
    }

    pub fn factory_mut(&mut self) -> &mut F {
        &mut self.factory
    }

    /// Stages `uri` paused at volume 0. Fails without side effects when
    /// disabled, when a session is already staged or fading, or when the
    /// pipeline cannot be built.
    pub fn prepare(&mut self, uri: &str) -> bool {
        if !self.enabled || self.is_busy() {
            return false;
        }

        let mut next = match self.factory.create(uri) {
            Ok(pipeline) => pipeline,
            Err(e) => {
                error!("Failed to prepare crossfade: {}", e);
                return false;
            }
        };

        let staged = next
            .set_volume(0.0)
            .and_then(|_| next.set_state(PipelineState::Paused));
        if let Err(e) = staged {
            error!("Failed to stage crossfade pipeline: {}", e);
            teardown(&mut next, self.teardown_grace);
            return false;
        }

        self.next = Some(next);
        self.session = None;
        self.state = CrossfadeState::Prepared;
        debug!("Crossfade prepared for: {}", uri);
        true
    }

    /// Starts the staged pipeline and the volume animation.
    ///
    /// In beat-aware mode the animation waits for `tempo.next_beat` when it
    /// is less than five seconds away, and runs for a four-beat phrase when
    /// that is between one and eight seconds.
    pub fn start(
        &mut self,
        current: &mut F::Pipeline,
        now: f64,
        tempo: Option<TempoHint>,
    ) -> Option<CrossfadeStart> {
        if !self.enabled || self.state != CrossfadeState::Prepared {
            return None;
        }
        let next = self.next.as_mut()?;

        self.state = CrossfadeState::Active;
        if let Err(e) = next.play() {
            error!("Failed to start crossfade: {}", e);
            self.complete(current);
            return None;
        }

        let tempo = tempo.filter(|t| self.beat_aware && t.bpm > 0.0);

        let mut duration = self.duration as f64;
        if let Some(phrase) = tempo.and_then(|t| phrase_duration(t.bpm)) {
            debug!("Using beat-aware crossfade duration: {:.1}s", phrase);
            duration = phrase;
        }

        let delay = tempo
            .and_then(|t| t.next_beat)
            .map(|beat| beat - now)
            .filter(|&d| d > 0.0 && d < MAX_BEAT_DELAY_SECS);

        self.session = Some(CrossfadeSession {
            start: now + delay.unwrap_or(0.0),
            duration,
            current_volume: 1.0,
            next_volume: 0.0,
            beat_aware: tempo.is_some(),
        });

        match (delay, tempo) {
            (Some(d), Some(t)) => {
                info!(
                    "Beat-aware crossfade scheduled in {:.0}ms (BPM: {:.1})",
                    d * 1000.0,
                    t.bpm
                );
                Some(CrossfadeStart::Delayed(Duration::from_secs_f64(d)))
            }
            _ => {
                info!("Crossfade started ({:.1}s duration)", duration);
                Some(CrossfadeStart::Immediate)
            }
        }
    }

    /// Advances the animation to `now`. Called every `CROSSFADE_TICK` while
    /// `needs_tick` holds.
    pub fn tick(&mut self, current: &mut F::Pipeline, now: f64) -> CrossfadeTick {
        if !self.is_active() {
            return CrossfadeTick::Inactive;
        }
        if !self.enabled || self.next.is_none() {
            self.complete(current);
            return CrossfadeTick::Completed;
        }
        let Some(session) = self.session.as_mut() else {
            self.complete(current);
            return CrossfadeTick::Completed;
        };

        if now < session.start {
            return CrossfadeTick::Waiting;
        }

        let progress = ((now - session.start) / session.duration).min(1.0);
        let (current_volume, next_volume) = envelope(progress);
        session.current_volume = current_volume;
        session.next_volume = next_volume;

        let applied = match self.next.as_mut() {
            Some(next) => current
                .set_volume(current_volume)
                .and_then(|_| next.set_volume(next_volume)),
            None => Ok(()),
        };
        if let Err(e) = applied {
            error!("Error updating crossfade: {}", e);
            self.complete(current);
            return CrossfadeTick::Completed;
        }

        if progress >= 1.0 {
            self.complete(current);
            return CrossfadeTick::Completed;
        }

        CrossfadeTick::Animating {
            progress,
            current_volume,
            next_volume,
        }
    }

    /// Promotes the staged pipeline into `current` and tears the old one
    /// down. Also the recovery path for any failure mid-fade.
    fn complete(&mut self, current: &mut F::Pipeline) {
        if let Some(mut outgoing) = self.next.take() {
            std::mem::swap(current, &mut outgoing);
            teardown(&mut outgoing, self.teardown_grace);

            if let Err(e) = current.set_volume(self.master_volume) {
                warn!("Failed to restore volume after crossfade: {}", e);
            }
            info!("Crossfade completed");
        }

        if let Some(session) = self.session.as_mut() {
            session.current_volume = 0.0;
            session.next_volume = 1.0;
        }
        self.state = CrossfadeState::Completed;
    }
}
