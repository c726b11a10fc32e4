use criterion::{black_box, criterion_group, criterion_main, Criterion};
use serde_json::json;
use tally_agg::{aggregate, aggregate_grouped, AggregationOptions, NullPolicy};
use tally_core::record::Record;
use tally_filter::{Dataset, FilterEngine, FilterOptions, Predicate, PredicateSet};

const PARTIES: [&str; 4] = ["APC", "PDP", "LP", "NNPP"];

fn make_records(rows: usize) -> Dataset {
    let records: Vec<Record> = (0..rows)
        .map(|i| {
            let turnout = if i % 17 == 0 {
                serde_json::Value::Null
            } else {
                json!((i % 100) as f64 / 2.0)
            };
            Record::from_value(json!({
                "party": PARTIES[i % 4],
                "state": format!("state-{}", i % 37),
                "votes": i as i64,
                "turnout": turnout,
            }))
            .unwrap()
        })
        .collect();
    records.into()
}

fn bench_filter(c: &mut Criterion) {
    let records = make_records(20_000);
    let preds = PredicateSet::new()
        .with("state", Predicate::exact("state-7"))
        .unwrap()
        .with("party", Predicate::any_of(["APC", "LP"]))
        .unwrap();
    let opts = FilterOptions::default().without_cache();

    let mut indexed = FilterEngine::default();
    indexed.build_indexes(&records, &["state", "party"]).unwrap();
    c.bench_function("filter_indexed", |b| {
        b.iter(|| black_box(indexed.filter(&records, &preds, &opts)))
    });

    let mut scan = FilterEngine::default();
    c.bench_function("filter_full_scan", |b| {
        b.iter(|| black_box(scan.filter(&records, &preds, &opts)))
    });
}

fn bench_aggregate(c: &mut Criterion) {
    let records = make_records(20_000);
    let opts = AggregationOptions::default().with_nulls(NullPolicy::Interpolate);
    c.bench_function("aggregate_interpolated_mean", |b| {
        b.iter(|| black_box(aggregate(&records, "turnout", &opts).unwrap()))
    });
    c.bench_function("aggregate_grouped", |b| {
        b.iter(|| black_box(aggregate_grouped(&records, "turnout", "party", &opts).unwrap()))
    });
}

criterion_group!(engine, bench_filter, bench_aggregate);
criterion_main!(engine);
