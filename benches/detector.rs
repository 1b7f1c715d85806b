use criterion::{black_box, criterion_group, criterion_main, Criterion};

use linamp_engine::audio::fft::SpectralAnalyzer;
use linamp_engine::audio::synth::SyntheticSampleProducer;
use linamp_engine::audio::{
    BeatDetector, HopEnergyDetector, SharedSampleBuffer, SpectralBeatDetector, ANALYSIS_WINDOW,
    SAMPLE_RATE,
};

fn window() -> Vec<f32> {
    SyntheticSampleProducer::with_seed(SAMPLE_RATE, 1).produce(120.0)
}

fn bench_fft(c: &mut Criterion) {
    let analyzer = SpectralAnalyzer::new(SAMPLE_RATE as f32, ANALYSIS_WINDOW);
    let samples = window();

    c.bench_function("spectral energy 1024", |b| {
        b.iter(|| analyzer.analyze(black_box(&samples)))
    });
}

fn bench_detectors(c: &mut Criterion) {
    let samples = window();

    let buffer = SharedSampleBuffer::new(SAMPLE_RATE);
    let mut spectral = SpectralBeatDetector::new(SAMPLE_RATE);
    let mut now = 0.0;
    c.bench_function("spectral detector tick", |b| {
        b.iter(|| {
            // Already-analyzed windows are skipped, so every tick needs new samples.
            buffer.append(&samples);
            now += 0.05;
            spectral.analyze(black_box(&buffer), now)
        })
    });

    let mut hop = HopEnergyDetector::new();
    let hop_buffer = SharedSampleBuffer::new(SAMPLE_RATE);
    let mut now = 0.0;
    c.bench_function("hop energy detector tick", |b| {
        b.iter(|| {
            hop_buffer.append(&samples);
            now += 0.05;
            hop.analyze(black_box(&hop_buffer), now)
        })
    });
}

criterion_group!(benches, bench_fft, bench_detectors);
criterion_main!(benches);
