use anyhow::Result;
use clap::Parser;
use log::{error, info, warn};
use std::future;
use std::io::Write;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use linamp_engine::audio::crossfade::CROSSFADE_TICK;
use linamp_engine::audio::{
    CrossfadeTick, DetectorKind, PipelineEvent, PipelineFactory, RodioPipeline,
    RodioPipelineFactory, VisualizationSink, VisualizationState, AUDIO_UPDATE_INTERVAL,
    RENDER_INTERVAL,
};
use linamp_engine::{AudioEngine, EndOfStreamAction, EngineConfig, PipelineError};

#[derive(Parser)]
#[command(name = "linamp-engine")]
#[command(about = "Plays a list of tracks with crossfades and prints live visualization levels")]
struct Args {
    /// Audio files to play in order. Without files the engine runs on
    /// synthetic audio only.
    tracks: Vec<String>,

    /// Config file (defaults to the user config directory)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Enable crossfading with this duration in seconds
    #[arg(long)]
    crossfade: Option<f32>,

    /// Align crossfades with detected beats
    #[arg(long)]
    beat_aware: bool,

    /// Beat detector: 'spectral' or 'hop_energy'
    #[arg(long, value_parser = DetectorKind::from_str)]
    detector: Option<DetectorKind>,

    /// Playback volume (0.0 - 1.0)
    #[arg(long)]
    volume: Option<f32>,

    /// Feed the detector from the default input device
    #[arg(long)]
    capture: bool,

    /// Stop after this many seconds
    #[arg(long)]
    seconds: Option<f64>,

    /// Write the effective settings back to the config file
    #[arg(long)]
    save_config: bool,
}

/// Stands in for an output device when there is nothing to play.
struct NoPlayback;

impl PipelineFactory for NoPlayback {
    type Pipeline = RodioPipeline;

    fn create(&mut self, uri: &str) -> Result<RodioPipeline, PipelineError> {
        Err(PipelineError::Create {
            uri: uri.to_string(),
            reason: "playback disabled".to_string(),
        })
    }
}

/// Prints a one-line spectrum a few times per second.
struct ConsoleMeter {
    frames: u64,
    every: u64,
}

impl ConsoleMeter {
    fn new() -> Self {
        let every = (Duration::from_millis(250).as_millis() / RENDER_INTERVAL.as_millis()).max(1);
        Self {
            frames: 0,
            every: every as u64,
        }
    }
}

impl VisualizationSink for ConsoleMeter {
    fn update(&mut self, state: &VisualizationState) {
        self.frames += 1;
        if self.frames % self.every != 0 {
            return;
        }

        const GLYPHS: [char; 8] = ['▁', '▂', '▃', '▄', '▅', '▆', '▇', '█'];
        let bars: String = state
            .levels
            .chunks(2)
            .map(|pair| {
                let level = pair.iter().copied().fold(0.0f32, f32::max).clamp(0.0, 1.0);
                GLYPHS[((level * 7.0).round() as usize).min(7)]
            })
            .collect();

        let beat = if state.beat_detected { '*' } else { ' ' };
        print!("\r{} {} {:6.1} BPM", bars, beat, state.bpm);
        let _ = std::io::stdout().flush();
    }
}

struct Playlist {
    tracks: Vec<String>,
    current: usize,
}

impl Playlist {
    fn current_uri(&self) -> Option<&str> {
        self.tracks.get(self.current).map(String::as_str)
    }

    fn next_uri(&self) -> Option<&str> {
        self.tracks.get(self.current + 1).map(String::as_str)
    }

    fn advance(&mut self) -> Option<&str> {
        if self.current + 1 < self.tracks.len() {
            self.current += 1;
            self.current_uri()
        } else {
            None
        }
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();

    info!("Starting Linamp engine");

    let config_path = args.config.clone().or_else(EngineConfig::default_path);
    let mut config = match &config_path {
        Some(path) => EngineConfig::load_or_default(path),
        None => EngineConfig::default(),
    };

    if let Some(duration) = args.crossfade {
        config.crossfade_enabled = true;
        config.crossfade_duration = duration;
    }
    if args.beat_aware {
        config.beat_aware_enabled = true;
    }
    if let Some(detector) = args.detector {
        config.detector = detector;
    }
    if let Some(volume) = args.volume {
        config.volume = volume;
    }
    let config = config.validated();

    if args.save_config {
        if let Some(path) = &config_path {
            config.save(path)?;
            info!("Saved settings to {}", path.display());
        }
    }

    let playlist = Playlist {
        tracks: args.tracks.clone(),
        current: 0,
    };
    let limit = args.seconds.map(Duration::from_secs_f64);

    if playlist.tracks.is_empty() {
        info!("No tracks given; running on synthetic audio");
        let engine = AudioEngine::new(config, NoPlayback)?;
        run(engine, playlist, args.capture, limit).await
    } else {
        let engine = AudioEngine::new(config, RodioPipelineFactory::new()?)?;
        run(engine, playlist, args.capture, limit).await
    }
}

async fn run<F: PipelineFactory>(
    mut engine: AudioEngine<F>,
    mut playlist: Playlist,
    capture: bool,
    limit: Option<Duration>,
) -> Result<()> {
    if capture {
        if let Err(e) = engine.attach_capture() {
            warn!("Live capture unavailable, using synthetic audio: {}", e);
        }
    }

    if let Some(uri) = playlist.current_uri().map(str::to_string) {
        engine.play_uri(&uri)?;
    }
    engine.set_visualization_sink(Some(Box::new(ConsoleMeter::new())));

    let mut render = tokio::time::interval(RENDER_INTERVAL);
    let mut events = tokio::time::interval(AUDIO_UPDATE_INTERVAL);
    let mut crossfade = tokio::time::interval(CROSSFADE_TICK);

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    let deadline = async {
        match limit {
            Some(limit) => tokio::time::sleep(limit).await,
            None => future::pending().await,
        }
    };
    tokio::pin!(deadline);

    loop {
        tokio::select! {
            _ = &mut ctrl_c => {
                info!("Interrupted");
                break;
            }
            _ = &mut deadline => {
                info!("Time limit reached");
                break;
            }
            _ = render.tick() => {
                engine.update_visualization();
            }
            _ = events.tick() => {
                if !handle_events(&mut engine, &mut playlist)? {
                    break;
                }
            }
            _ = crossfade.tick(), if engine.crossfade_needs_tick() => {
                if engine.tick_crossfade() == CrossfadeTick::Completed {
                    playlist.advance();
                    info!("Now playing: {}", playlist.current_uri().unwrap_or("-"));
                }
            }
        }
    }

    println!();
    engine.shutdown();
    Ok(())
}

/// Returns `false` once the playlist has run out.
fn handle_events<F: PipelineFactory>(
    engine: &mut AudioEngine<F>,
    playlist: &mut Playlist,
) -> Result<bool> {
    while let Some(event) = engine.poll_pipeline_event() {
        match event {
            PipelineEvent::AboutToFinish => {
                if engine.on_about_to_finish(playlist.next_uri()) {
                    info!("Next track staged for crossfade");
                }
            }
            PipelineEvent::EndOfStream => match engine.on_end_of_stream() {
                EndOfStreamAction::Crossfading | EndOfStreamAction::CrossfadeStarted => {}
                EndOfStreamAction::Advance => match playlist.advance().map(str::to_string) {
                    Some(uri) => {
                        if let Err(e) = engine.play_uri(&uri) {
                            error!("Failed to play {}: {}", uri, e);
                            return Ok(false);
                        }
                    }
                    None => {
                        engine.stop()?;
                        info!("Playlist finished");
                        return Ok(false);
                    }
                },
            },
        }
    }
    Ok(true)
}
