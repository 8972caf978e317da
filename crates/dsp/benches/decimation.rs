use criterion::{black_box, criterion_group, criterion_main, Criterion};
use grape_dsp::DecimationPipeline;
use num_complex::Complex32;

fn bench_one_minute_20khz(c: &mut Criterion) {
    let input: Vec<Complex32> = (0..20_000 * 60)
        .map(|i| Complex32::new((i as f32 * 0.001).sin(), (i as f32 * 0.0013).cos()))
        .collect();

    c.bench_function("decimate_one_minute_20khz", |b| {
        b.iter(|| {
            let mut pipeline = DecimationPipeline::for_input_rate(20_000).unwrap();
            black_box(pipeline.process(black_box(&input)).unwrap());
        })
    });
}

criterion_group!(benches, bench_one_minute_20khz);
criterion_main!(benches);
