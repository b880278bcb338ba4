use criterion::{black_box, criterion_group, criterion_main, Criterion};
use flate2::write::GzEncoder;
use flate2::Compression;
use std::io::Write;
use tempfile::TempDir;

use subrange::builder::build_index;
use subrange::catalog::{Catalog, DatasetInfo};
use subrange::config::EngineConfig;
use subrange::engine::QueryEngine;
use subrange::rangetable::RangeTable;

/// Build a synthetic sorted dataset large enough to exercise more than one
/// checkpoint, so the benchmark measures a real seek-and-discard, not just
/// a decode from the very first checkpoint.
fn fixture() -> (TempDir, EngineConfig, Catalog, RangeTable) {
    let dir = TempDir::new().unwrap();
    let mut content = String::from("subject_id,value\n");
    for subject_id in 0..50_000u64 {
        for row in 0..4 {
            content.push_str(&format!("{subject_id},row-{row}\n"));
        }
    }

    let path = dir.path().join("chartevents.csv.gz");
    let mut enc = GzEncoder::new(std::fs::File::create(path).unwrap(), Compression::default());
    enc.write_all(content.as_bytes()).unwrap();
    enc.finish().unwrap();

    let config = EngineConfig::new(dir.path()).with_checkpoint_spacing(256 * 1024);
    let mut catalog = Catalog::new();
    catalog
        .register(DatasetInfo {
            dataset_id: "chartevents".to_string(),
            sort_column: "subject_id".to_string(),
            row_count_hint: Some(200_000),
        })
        .unwrap();
    let mut table = RangeTable::new();
    build_index(&config, &catalog, &mut table, "chartevents", None).unwrap();

    (dir, config, catalog, table)
}

fn bench_query(c: &mut Criterion) {
    let (_dir, config, catalog, table) = fixture();
    let dataset = catalog.lookup("chartevents").unwrap();
    let engine = QueryEngine::new(&config, dataset, &table);

    c.bench_function("query subject near start", |b| {
        b.iter(|| engine.search(black_box(10)).unwrap())
    });

    c.bench_function("query subject near end", |b| {
        b.iter(|| engine.search(black_box(49_990)).unwrap())
    });

    c.bench_function("query absent subject", |b| {
        b.iter(|| engine.search(black_box(999_999)).unwrap())
    });
}

criterion_group!(benches, bench_query);
criterion_main!(benches);
