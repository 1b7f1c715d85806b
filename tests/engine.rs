mod common;

use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use common::{bed_block, engine_with, kick_block, Harness};
use linamp_engine::audio::{
    CrossfadeStart, CrossfadeState, CrossfadeTick, Pipeline, PipelineEvent, PipelineState,
    VisualizationSink, VisualizationState,
};
use linamp_engine::{EndOfStreamAction, EngineConfig, EngineError};

const A: &str = "file:///music/a.ogg";
const B: &str = "file:///music/b.ogg";
const C: &str = "file:///music/c.ogg";

fn crossfading() -> Harness {
    engine_with(EngineConfig {
        crossfade_enabled: true,
        ..EngineConfig::default()
    })
}

struct Recorder(Arc<Mutex<Vec<VisualizationState>>>);

impl VisualizationSink for Recorder {
    fn update(&mut self, state: &VisualizationState) {
        self.0.lock().unwrap().push(*state);
    }
}

#[test]
fn free_running_levels_stay_in_range_and_are_published() {
    let Harness { mut engine, .. } = engine_with(EngineConfig::default());
    let handle = engine.visualization_handle();

    let mut state = engine.update_visualization();
    for _ in 0..30 {
        state = engine.update_visualization();
    }

    assert!(state.levels.iter().all(|&l| l > 0.0 && l <= 1.0));
    assert_eq!(engine.visualization_state(), state);
    assert_eq!(handle.current(), state);
    assert_eq!(state.bpm, 0.0);
}

#[test]
fn attached_sink_sees_every_published_state() {
    let Harness { mut engine, .. } = engine_with(EngineConfig::default());
    let seen = Arc::new(Mutex::new(Vec::new()));
    engine.set_visualization_sink(Some(Box::new(Recorder(seen.clone()))));

    let last = (0..3).map(|_| engine.update_visualization()).last().unwrap();

    let seen = seen.lock().unwrap();
    assert_eq!(seen.len(), 3);
    assert_eq!(seen[2], last);
}

#[test]
fn paused_playback_decays_levels_to_silence() {
    let Harness { mut engine, .. } = engine_with(EngineConfig::default());
    engine.play_uri(A).unwrap();
    for _ in 0..10 {
        engine.update_visualization();
    }
    assert!(engine.visualization_state().levels.iter().all(|&l| l > 0.0));

    engine.pause().unwrap();
    let mut state = engine.visualization_state();
    for _ in 0..100 {
        state = engine.update_visualization();
        assert!(!state.beat_detected);
    }
    assert!(state.levels.iter().all(|&l| (0.0..0.01).contains(&l)));
}

#[test]
fn transport_requires_a_loaded_track() {
    let Harness { mut engine, .. } = engine_with(EngineConfig::default());
    assert!(matches!(engine.play(), Err(EngineError::NoTrack)));
    assert!(matches!(engine.seek_percent(10.0), Err(EngineError::NoTrack)));
    assert_eq!(engine.position_percent(), 0.0);
}

#[test]
fn play_uri_starts_at_the_configured_volume_and_seeks() {
    let Harness { mut engine, script, .. } = engine_with(EngineConfig::default());
    engine.play_uri(A).unwrap();

    let player = engine.player().unwrap();
    assert_eq!(player.state(), PipelineState::Playing);
    assert_eq!(player.volume(), 0.8);
    assert_eq!(script.created(), vec![A.to_string()]);

    engine.seek_percent(50.0).unwrap();
    assert!((engine.position_percent() - 50.0).abs() < 1e-6);
    assert!((engine.position_seconds() - 90.0).abs() < 1e-6);
}

#[test]
fn set_volume_clamps_and_updates_config() {
    let Harness { mut engine, .. } = engine_with(EngineConfig::default());
    engine.play_uri(A).unwrap();

    engine.set_volume(0.5).unwrap();
    assert_eq!(engine.config().volume, 0.5);
    assert_eq!(engine.player().unwrap().volume(), 0.5);

    engine.set_volume(1.7).unwrap();
    assert_eq!(engine.volume(), 1.0);
}

#[test]
fn nan_volume_keeps_the_current_volume_and_levels_finite() {
    let Harness { mut engine, .. } = engine_with(EngineConfig::default());
    engine.play_uri(A).unwrap();
    engine.set_volume(0.4).unwrap();

    engine.set_volume(f32::NAN).unwrap();
    assert_eq!(engine.volume(), 0.4);
    assert_eq!(engine.player().unwrap().volume(), 0.4);

    for _ in 0..10 {
        let state = engine.update_visualization();
        assert!(state.levels.iter().all(|l| l.is_finite()));
    }
}

#[test]
fn about_to_finish_then_end_of_stream_crossfades_into_the_next_track() {
    let Harness {
        mut engine, clock, ..
    } = crossfading();
    engine.play_uri(A).unwrap();

    assert!(engine.on_about_to_finish(Some(B)));
    assert!(!engine.on_about_to_finish(Some(C)));
    assert_eq!(engine.crossfade_state(), CrossfadeState::Prepared);

    assert_eq!(engine.on_end_of_stream(), EndOfStreamAction::CrossfadeStarted);
    assert_eq!(engine.on_end_of_stream(), EndOfStreamAction::Crossfading);
    assert!(engine.crossfade_needs_tick());

    clock.advance(1.5);
    assert!(matches!(
        engine.tick_crossfade(),
        CrossfadeTick::Animating { .. }
    ));

    clock.advance(1.6);
    assert_eq!(engine.tick_crossfade(), CrossfadeTick::Completed);

    let player = engine.player().unwrap();
    assert_eq!(player.uri(), B);
    assert_eq!(player.volume(), 0.8);
    assert!(!engine.crossfade_needs_tick());
}

#[test]
fn without_crossfade_the_host_advances() {
    let Harness { mut engine, .. } = engine_with(EngineConfig::default());
    engine.play_uri(A).unwrap();

    assert!(!engine.on_about_to_finish(Some(B)));
    assert_eq!(engine.on_end_of_stream(), EndOfStreamAction::Advance);

    let Harness {
        engine: mut enabled, ..
    } = crossfading();
    enabled.play_uri(A).unwrap();
    assert!(!enabled.on_about_to_finish(None));
    assert_eq!(enabled.on_end_of_stream(), EndOfStreamAction::Advance);
}

#[test]
fn pipeline_events_are_drained_from_the_active_track() {
    let Harness {
        mut engine, script, ..
    } = engine_with(EngineConfig::default());
    engine.play_uri(A).unwrap();

    script.push_event(B, PipelineEvent::EndOfStream);
    script.push_event(A, PipelineEvent::AboutToFinish);

    assert_eq!(engine.poll_pipeline_event(), Some(PipelineEvent::AboutToFinish));
    assert_eq!(engine.poll_pipeline_event(), None);
}

#[test]
fn playing_a_new_track_drops_the_staged_one() {
    let Harness {
        mut engine, script, ..
    } = crossfading();
    engine.play_uri(A).unwrap();
    assert!(engine.prepare_crossfade(B));

    engine.play_uri(C).unwrap();

    assert_eq!(engine.crossfade_state(), CrossfadeState::Idle);
    assert_eq!(engine.player().unwrap().uri(), C);
    let stopped = script.stopped();
    assert!(stopped.contains(&A.to_string()));
    assert!(stopped.contains(&B.to_string()));
}

#[test]
fn disabling_crossfade_tears_down_the_staged_track() {
    let Harness {
        mut engine, script, ..
    } = crossfading();
    engine.play_uri(A).unwrap();
    assert!(engine.prepare_crossfade(B));

    engine.disable_crossfade();
    engine.disable_crossfade();

    assert_eq!(engine.crossfade_state(), CrossfadeState::Idle);
    assert!(!engine.config().crossfade_enabled);
    assert_eq!(script.stopped(), vec![B.to_string()]);
    assert!(!engine.prepare_crossfade(B));

    engine.enable_crossfade(12.0);
    assert_eq!(engine.config().crossfade_duration, 10.0);
    assert!(engine.prepare_crossfade(B));
}

#[test]
fn synchronous_analysis_feeds_the_buffer_and_keeps_bpm_unknown() {
    let Harness { mut engine, .. } = engine_with(EngineConfig::default());

    for _ in 0..5 {
        let analysis = engine.analyze_once();
        assert!(analysis.bpm >= 0.0);
    }

    assert_eq!(engine.sample_buffer().len(), 5 * 1024);
    // The clock never moved, so at most one beat clears the refractory period.
    assert!(engine.beat_positions().len() <= 1);
    assert_eq!(engine.current_bpm(), 0.0);
    assert_eq!(engine.next_beat_time(), None);
}

#[test]
fn beat_aware_mode_runs_and_stops_the_worker() {
    let Harness { mut engine, .. } = engine_with(EngineConfig::default());
    assert!(!engine.analysis_alive());

    engine.enable_beat_aware().unwrap();
    assert!(engine.is_beat_aware());
    assert!(engine.analysis_alive());
    thread::sleep(Duration::from_millis(150));
    assert!(!engine.sample_buffer().is_empty());

    engine.disable_beat_aware();
    assert!(!engine.analysis_alive());
    assert!(engine.sample_buffer().is_empty());
    assert!(engine.beat_positions().is_empty());
    assert_eq!(engine.current_bpm(), 0.0);

    engine.enable_beat_aware().unwrap();
    assert!(engine.analysis_alive());
}

#[test]
fn beat_aware_config_starts_the_worker_eagerly() {
    let Harness { engine, .. } = engine_with(EngineConfig {
        beat_aware_enabled: true,
        ..EngineConfig::default()
    });
    assert!(engine.analysis_alive());
}

#[test]
fn beat_aware_crossfade_starts_on_the_next_detected_beat() {
    let Harness {
        mut engine, clock, ..
    } = engine_with(EngineConfig {
        crossfade_enabled: true,
        beat_aware_enabled: true,
        ..EngineConfig::default()
    });
    engine.play_uri(A).unwrap();

    for beat in 0..4 {
        let t = 100.0 + beat as f64 * 0.5;
        clock.set(t);
        assert!(engine.feed_samples(&kick_block()).beat_detected, "kick at {}", t);
        clock.set(t + 0.25);
        assert!(!engine.feed_samples(&bed_block()).beat_detected);
    }
    assert!(engine.is_host_fed());
    assert!(!engine.analysis_alive());
    assert_eq!(engine.beat_positions(), vec![100.0, 100.5, 101.0, 101.5]);
    assert!((engine.current_bpm() - 120.0).abs() < 1e-3);

    clock.set(101.7);
    assert!(engine.prepare_crossfade(B));
    let start = engine.start_crossfade().unwrap();
    let CrossfadeStart::Delayed(delay) = start else {
        panic!("expected a delayed start, got {:?}", start);
    };
    assert!((delay.as_secs_f64() - 0.3).abs() < 1e-6);

    let session = *engine.crossfade_session().unwrap();
    assert!(session.beat_aware);
    assert!((session.duration - 2.0).abs() < 1e-9);

    clock.set(101.9);
    assert_eq!(engine.tick_crossfade(), CrossfadeTick::Waiting);
    clock.set(103.0);
    match engine.tick_crossfade() {
        CrossfadeTick::Animating { progress, .. } => assert!((progress - 0.5).abs() < 1e-6),
        other => panic!("unexpected tick {:?}", other),
    }
}

#[test]
fn without_a_tempo_beat_aware_crossfades_start_immediately() {
    let Harness { mut engine, .. } = engine_with(EngineConfig {
        crossfade_enabled: true,
        beat_aware_enabled: true,
        ..EngineConfig::default()
    });
    engine.play_uri(A).unwrap();
    engine.feed_samples(&bed_block());

    assert!(engine.prepare_crossfade(B));
    assert_eq!(engine.start_crossfade(), Some(CrossfadeStart::Immediate));
}

#[test]
fn resuming_synthetic_input_restarts_the_worker() {
    let Harness { mut engine, .. } = engine_with(EngineConfig {
        beat_aware_enabled: true,
        ..EngineConfig::default()
    });
    engine.feed_samples(&bed_block());
    assert!(!engine.analysis_alive());
    engine.enable_beat_aware().unwrap();
    assert!(!engine.analysis_alive());

    engine.resume_synthetic_input().unwrap();
    assert!(!engine.is_host_fed());
    assert!(engine.analysis_alive());
}

#[test]
fn shutdown_releases_the_player() {
    let Harness {
        mut engine, script, ..
    } = engine_with(EngineConfig::default());
    engine.play_uri(A).unwrap();

    engine.shutdown();

    assert!(engine.player().is_none());
    assert_eq!(script.stopped(), vec![A.to_string()]);
}
