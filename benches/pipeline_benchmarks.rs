//! Pipeline benchmarks: staleness decisions, file naming, concatenation
//!
//! Toyota Way: Genchi Genbutsu (measure, don't guess)
//!
//! Run with: cargo bench --bench pipeline_benchmarks

use chrono::NaiveDate;
use climate_regrid::catalog::Catalog;
use climate_regrid::dataset::{Axis, MemoryDataset, Variable};
use climate_regrid::ensemble::{EnsembleConcatenator, EnsembleMember, EnsembleWindow};
use climate_regrid::resolver::{FileNameSpec, NameStem, PathResolver};
use climate_regrid::staleness::StalenessOracle;
use climate_regrid::{Period, ProductKind};
use criterion::{black_box, criterion_group, criterion_main, BatchSize, BenchmarkId, Criterion};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

const CATALOG: &str = r#"{
    "avg_root": "/data/avg",
    "diag_root": "/data/diag",
    "grid_folder": "/data/grids",
    "model_prefix": "cesm",
    "filetypes": [{"name": "atm", "families": ["climatology", "time_series"]}]
}"#;

fn bench_staleness(c: &mut Criterion) {
    let mut group = c.benchmark_group("staleness_decision");
    let oracle = StalenessOracle::default();

    for count in [10usize, 1_000] {
        let sources: Vec<SystemTime> = (0..count)
            .map(|i| UNIX_EPOCH + Duration::from_secs(i as u64 * 60))
            .collect();
        let sink = Some(UNIX_EPOCH + Duration::from_secs(30));
        group.bench_with_input(BenchmarkId::new("oldest_source", count), &sources, |b, s| {
            b.iter(|| oracle.decide_with_times(black_box(s), sink, false));
        });
    }

    group.finish();
}

fn bench_file_name(c: &mut Criterion) {
    let catalog = Arc::new(Catalog::from_json_str(CATALOG).unwrap());
    let resolver = PathResolver::new(catalog);
    let period = Some(Period::new(1979, 1994).unwrap());

    c.bench_function("climatology_file_name", |b| {
        b.iter(|| {
            resolver.file_name(black_box(&FileNameSpec {
                kind: ProductKind::Climatology,
                stem: NameStem::Model {
                    name: "Ctrl-1",
                    filetype: "atm",
                },
                grid_tag: "_arb2_d02",
                period,
                concatenated: false,
            }))
        });
    });
}

#[allow(clippy::cast_precision_loss)]
fn members(count: usize, months: usize, cells: usize) -> Vec<EnsembleMember> {
    (0..count)
        .map(|i| {
            let mut ds = MemoryDataset::new(format!("m{i}"));
            ds.push_axis(Axis::new("time", "month", (0..months).map(|t| t as f64).collect()))
                .unwrap();
            ds.push_axis(Axis::new("cell", "", (0..cells).map(|x| x as f64).collect()))
                .unwrap();
            ds.push_variable(Variable::new(
                "precip",
                "mm/day",
                vec!["time".into(), "cell".into()],
                vec![1.0; months * cells],
            ))
            .unwrap();
            EnsembleMember {
                name: format!("m{i}"),
                begin: NaiveDate::from_ymd_opt(1979 + i32::try_from(i).unwrap(), 1, 1).unwrap(),
                dataset: Box::new(ds),
            }
        })
        .collect()
}

fn bench_concatenate(c: &mut Criterion) {
    let mut group = c.benchmark_group("ensemble_concatenate");
    let concatenator = EnsembleConcatenator::time_series(EnsembleWindow::years(15));

    for cells in [16usize, 4_096] {
        group.bench_with_input(BenchmarkId::new("five_members", cells), &cells, |b, &cells| {
            b.iter_batched(
                || members(5, 180, cells),
                |m| concatenator.concatenate("Ens", m).unwrap(),
                BatchSize::LargeInput,
            );
        });
    }

    group.finish();
}

criterion_group!(benches, bench_staleness, bench_file_name, bench_concatenate);
criterion_main!(benches);
