/// Pipeline benchmarks
///
/// Measures per-block cost of feature extraction and the full detector step.
/// A block must be processed well within its own duration (100 ms by default).

use clap_detector::{BlockFormat, ClapDetector, DetectorConfig, FeatureExtractor, SyntheticSource};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};

fn bench_feature_extraction(c: &mut Criterion) {
    let mut group = c.benchmark_group("feature_extraction");

    for &(sample_rate, channels) in &[(16000u32, 1u16), (44100, 1), (44100, 2), (48000, 2)] {
        let config = DetectorConfig {
            sample_rate,
            channels,
            ..Default::default()
        };
        let extractor = FeatureExtractor::new(&config);
        let block = SyntheticSource::tone_block(&BlockFormat::from_config(&config), 2000.0, 0.5);

        group.bench_with_input(
            BenchmarkId::new("extract", format!("{}Hz_{}ch", sample_rate, channels)),
            &block,
            |b, block| {
                b.iter(|| {
                    let features = extractor.extract(black_box(block)).unwrap();
                    black_box(features);
                });
            },
        );
    }

    group.finish();
}

fn bench_process_block(c: &mut Criterion) {
    let config = DetectorConfig::default();
    let format = BlockFormat::from_config(&config);
    let clap = SyntheticSource::tone_block(&format, 2000.0, 0.8);
    let silence = SyntheticSource::silence_block(&format);

    let mut detector = ClapDetector::new(config).unwrap();

    c.bench_function("process_block_alternating", |b| {
        let mut noisy = false;
        b.iter(|| {
            noisy = !noisy;
            let block = if noisy { &clap } else { &silence };
            black_box(detector.process_block(black_box(block)));
        });
    });
}

criterion_group!(benches, bench_feature_extraction, bench_process_block);
criterion_main!(benches);
