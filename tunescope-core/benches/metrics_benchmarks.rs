use criterion::{Criterion, black_box, criterion_group, criterion_main};
use tunescope_core::align::{align, generalization_gap};
use tunescope_core::checkpoint::{select_best, top_k};
use tunescope_core::parser::LogRecordParser;
use tunescope_core::record::MetricSeries;
use tunescope_core::session::{SessionId, SessionSummary};
use tunescope_core::stats::rolling_stability;

fn dense_series(len: u64) -> MetricSeries {
    MetricSeries::from_pairs(
        (0..len).map(|i| (i, 2.0 / (1.0 + i as f64 * 0.01) + (i % 7) as f64 * 0.01)),
    )
}

fn sparse_series(len: u64, every: u64) -> MetricSeries {
    MetricSeries::from_pairs(
        (0..len)
            .filter(|i| i % every == 0)
            .map(|i| (i, 2.1 / (1.0 + i as f64 * 0.01))),
    )
}

fn bench_statistics(c: &mut Criterion) {
    let val = dense_series(10_000);

    c.bench_function("rolling_stability_10k_window_10", |b| {
        b.iter(|| rolling_stability(black_box(&val), 10))
    });

    c.bench_function("rolling_stability_10k_window_100", |b| {
        b.iter(|| rolling_stability(black_box(&val), 100))
    });
}

fn bench_alignment(c: &mut Criterion) {
    let train = dense_series(20_000);
    let val = sparse_series(20_000, 50);

    c.bench_function("align_20k_dense_400_sparse", |b| {
        b.iter(|| align(black_box(&train), black_box(&val)))
    });

    c.bench_function("generalization_gap_20k", |b| {
        b.iter(|| generalization_gap(black_box(&train), black_box(&val)))
    });
}

fn bench_selection(c: &mut Criterion) {
    let val = dense_series(50_000);

    c.bench_function("select_best_50k", |b| b.iter(|| select_best(black_box(&val))));

    c.bench_function("top_k_3_50k", |b| b.iter(|| top_k(black_box(&val), 3)));
}

fn bench_parser(c: &mut Criterion) {
    let records: Vec<serde_json::Value> = (0..5_000)
        .map(|i| {
            let val_loss = (i % 25 == 0).then(|| 2.1 - i as f64 * 1e-4);
            serde_json::json!({
                "iteration": i,
                "train_loss": 2.0 - i as f64 * 1e-4,
                "val_loss": val_loss,
                "learning_rate": 1e-5,
            })
        })
        .collect();
    let raw = serde_json::json!({"config": {"fine_tune_type": "lora"}, "metrics": records})
        .to_string();
    let summary = SessionSummary {
        session_id: SessionId::new("bench_lr1e_05_bs4"),
        display_name: "bench_lr1e_05_bs4".into(),
        model_name: None,
        log_location: "models/cpt/bench_lr1e_05_bs4/CPT_1.json".into(),
        latest_iteration: None,
        started_at: None,
    };
    let parser = LogRecordParser::new();

    c.bench_function("parse_record_log_5k", |b| {
        b.iter(|| parser.parse(black_box(&summary), black_box(raw.as_bytes())))
    });
}

criterion_group!(
    benches,
    bench_statistics,
    bench_alignment,
    bench_selection,
    bench_parser,
);
criterion_main!(benches);
