use log::{debug, info};
use rodio::{Decoder, OutputStream, OutputStreamHandle, Sink, Source};
use std::fs::File;
use std::io::BufReader;
use std::path::PathBuf;
use std::time::{Duration, Instant};

use super::pipeline::{Pipeline, PipelineEvent, PipelineFactory, PipelineState};
use crate::error::PipelineError;

/// How far ahead of the end `AboutToFinish` is raised.
pub const ABOUT_TO_FINISH_LEAD: Duration = Duration::from_secs(5);

/// Maps a `file://` URI or plain path to a filesystem path.
pub fn uri_to_path(uri: &str) -> PathBuf {
    PathBuf::from(uri.strip_prefix("file://").unwrap_or(uri))
}

/// Opens the default output device once and builds rodio-backed pipelines
/// that share it.
pub struct RodioPipelineFactory {
    #[allow(dead_code)]
    stream: OutputStream,
    stream_handle: OutputStreamHandle,
    lead: Duration,
}

impl RodioPipelineFactory {
    pub fn new() -> Result<Self, PipelineError> {
        let (stream, stream_handle) = OutputStream::try_default().map_err(|e| PipelineError::Create {
            uri: "default output".to_string(),
            reason: e.to_string(),
        })?;

        Ok(Self {
            stream,
            stream_handle,
            lead: ABOUT_TO_FINISH_LEAD,
        })
    }

    pub fn with_about_to_finish_lead(mut self, lead: Duration) -> Self {
        self.lead = lead;
        self
    }
}

impl PipelineFactory for RodioPipelineFactory {
    type Pipeline = RodioPipeline;

    fn create(&mut self, uri: &str) -> Result<RodioPipeline, PipelineError> {
        RodioPipeline::open(uri, self.stream_handle.clone(), self.lead)
    }
}

/// A decoded file feeding its own `Sink`. Position is tracked from the
/// transport calls since the sink does not report it.
pub struct RodioPipeline {
    uri: String,
    path: PathBuf,
    stream_handle: OutputStreamHandle,
    sink: Option<Sink>,
    state: PipelineState,
    volume: f32,
    duration: Option<Duration>,
    offset: Duration,
    played: Duration,
    playing_since: Option<Instant>,
    lead: Duration,
    about_to_finish_sent: bool,
    end_of_stream_sent: bool,
}

impl RodioPipeline {
    fn open(uri: &str, stream_handle: OutputStreamHandle, lead: Duration) -> Result<Self, PipelineError> {
        let path = uri_to_path(uri);
        let mut pipeline = Self {
            uri: uri.to_string(),
            path,
            stream_handle,
            sink: None,
            state: PipelineState::Null,
            volume: 1.0,
            duration: None,
            offset: Duration::ZERO,
            played: Duration::ZERO,
            playing_since: None,
            lead,
            about_to_finish_sent: false,
            end_of_stream_sent: false,
        };
        pipeline.load(Duration::ZERO)?;
        info!("Loaded audio file: {:?}", pipeline.path);
        Ok(pipeline)
    }

    /// Decodes the file again, skipping to `start`, into a fresh paused sink.
    fn load(&mut self, start: Duration) -> Result<(), PipelineError> {
        let create_err = |reason: String| PipelineError::Create {
            uri: self.uri.clone(),
            reason,
        };

        let file = BufReader::new(File::open(&self.path)?);
        let source = Decoder::new(file).map_err(|e| create_err(e.to_string()))?;
        if self.duration.is_none() {
            self.duration = source.total_duration();
        }

        let sink = Sink::try_new(&self.stream_handle).map_err(|e| create_err(e.to_string()))?;
        sink.pause();
        sink.set_volume(self.volume);
        sink.append(source.skip_duration(start));

        if let Some(old) = self.sink.replace(sink) {
            old.stop();
        }
        self.offset = start;
        self.played = Duration::ZERO;
        self.playing_since = None;
        Ok(())
    }

    fn elapsed(&self) -> Duration {
        let running = self.playing_since.map_or(Duration::ZERO, |since| since.elapsed());
        self.offset + self.played + running
    }

    fn hold_clock(&mut self) {
        if let Some(since) = self.playing_since.take() {
            self.played += since.elapsed();
        }
    }
}

impl Pipeline for RodioPipeline {
    fn uri(&self) -> &str {
        &self.uri
    }

    fn set_state(&mut self, state: PipelineState) -> Result<(), PipelineError> {
        match state {
            PipelineState::Playing => {
                if self.sink.is_none() {
                    self.load(Duration::ZERO)?;
                }
                if let Some(sink) = &self.sink {
                    sink.play();
                }
                if self.playing_since.is_none() {
                    self.playing_since = Some(Instant::now());
                }
                debug!("Audio playback started: {}", self.uri);
            }
            PipelineState::Paused => {
                if self.sink.is_none() {
                    self.load(Duration::ZERO)?;
                }
                if let Some(sink) = &self.sink {
                    sink.pause();
                }
                self.hold_clock();
            }
            PipelineState::Null => {
                if let Some(sink) = self.sink.take() {
                    sink.stop();
                }
                self.hold_clock();
                self.offset = Duration::ZERO;
                self.played = Duration::ZERO;
                self.about_to_finish_sent = false;
                self.end_of_stream_sent = false;
            }
        }
        self.state = state;
        Ok(())
    }

    fn state(&self) -> PipelineState {
        self.state
    }

    fn set_volume(&mut self, fraction: f32) -> Result<(), PipelineError> {
        self.volume = fraction.clamp(0.0, 1.0);
        if let Some(sink) = &self.sink {
            sink.set_volume(self.volume);
        }
        Ok(())
    }

    fn volume(&self) -> f32 {
        self.volume
    }

    fn position_ns(&self) -> Option<u64> {
        if self.state == PipelineState::Null {
            return None;
        }
        let position = match self.duration {
            Some(total) => self.elapsed().min(total),
            None => self.elapsed(),
        };
        Some(position.as_nanos() as u64)
    }

    fn duration_ns(&self) -> Option<u64> {
        self.duration.map(|d| d.as_nanos() as u64)
    }

    fn seek_ns(&mut self, position: u64) -> Result<(), PipelineError> {
        let resume = self.state == PipelineState::Playing;
        self.load(Duration::from_nanos(position))?;
        self.about_to_finish_sent = false;
        self.end_of_stream_sent = false;
        if resume {
            self.set_state(PipelineState::Playing)?;
        }
        Ok(())
    }

    fn force_kill(&mut self) {
        // Dropping the sink detaches it from the mixer immediately.
        self.sink = None;
        self.playing_since = None;
        self.state = PipelineState::Null;
    }

    fn poll_event(&mut self) -> Option<PipelineEvent> {
        if self.state != PipelineState::Playing {
            return None;
        }

        let finished = self.sink.as_ref().map_or(true, |sink| sink.empty());
        if finished && !self.end_of_stream_sent {
            self.end_of_stream_sent = true;
            return Some(PipelineEvent::EndOfStream);
        }

        if let Some(total) = self.duration {
            let remaining = total.saturating_sub(self.elapsed());
            if remaining <= self.lead && !self.about_to_finish_sent {
                self.about_to_finish_sent = true;
                return Some(PipelineEvent::AboutToFinish);
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uri_to_path_strips_file_scheme() {
        assert_eq!(uri_to_path("file:///music/a.flac"), PathBuf::from("/music/a.flac"));
        assert_eq!(uri_to_path("/music/b.ogg"), PathBuf::from("/music/b.ogg"));
    }
}
