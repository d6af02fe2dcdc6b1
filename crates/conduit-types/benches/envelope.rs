//! Criterion benchmarks for envelope construction and typed access.
//!
//! Every stage touches envelopes on the hot path, so these track the cost
//! of building a record and reading fields back by name and by position.

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};

use conduit_types::{DeploymentRequest, Envelope, StageDescriptor, StageType, Value};

fn sample(width: usize) -> Envelope {
    let mut builder = Envelope::builder();
    for i in 0..width {
        builder = builder.put(format!("field_{i}"), Value::Int(i64::try_from(i).unwrap()));
    }
    builder.build().unwrap()
}

fn bench_build(c: &mut Criterion) {
    let mut group = c.benchmark_group("envelope/build");
    for width in [4, 16, 64] {
        group.bench_with_input(BenchmarkId::new("fields", width), &width, |b, &width| {
            b.iter(|| sample(width));
        });
    }
    group.finish();
}

fn bench_access(c: &mut Criterion) {
    let mut group = c.benchmark_group("envelope/access");
    for width in [4, 16, 64] {
        let env = sample(width);
        let last = format!("field_{}", width - 1);
        group.bench_with_input(BenchmarkId::new("by_name", width), &width, |b, _| {
            b.iter(|| env.get_i64(last.as_str()).unwrap());
        });
        group.bench_with_input(BenchmarkId::new("by_index", width), &width, |b, &width| {
            b.iter(|| env.get_i64(width - 1).unwrap());
        });
    }
    group.finish();
}

fn bench_request_codec(c: &mut Criterion) {
    let request = DeploymentRequest::deploy(StageDescriptor {
        group: "bench".into(),
        stage_type: StageType::Processor,
        kind: "transform".into(),
        index: 1,
        parameters: [("expression".to_string(), "payload".to_string())].into(),
    });
    let bytes = request.encode().unwrap();
    c.bench_function("deploy/encode", |b| b.iter(|| request.encode().unwrap()));
    c.bench_function("deploy/decode", |b| {
        b.iter(|| DeploymentRequest::decode(&bytes).unwrap());
    });
}

criterion_group!(benches, bench_build, bench_access, bench_request_codec);
criterion_main!(benches);
