use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use std::collections::BTreeSet;
use std::sync::Arc;
use tableview::*;

struct Fixture {
    handler: ViewHandler,
    table_id: TableId,
    text: Field,
    number: Field,
    view: View,
}

fn fixture(size: i64, auto_index: bool) -> Fixture {
    let config = EngineConfig {
        auto_index_view_enabled: auto_index,
        ..EngineConfig::default()
    };
    let handler = ViewHandler::with_immediate_indexing(config, Arc::new(AllowAll)).unwrap();
    let table_id = handler.create_table(1, 1, "bench").unwrap();
    let text = handler.create_field(table_id, "Text", FieldType::Text).unwrap();
    let number = handler.create_field(table_id, "Number", FieldType::number()).unwrap();
    for i in 0..size {
        handler
            .create_row(
                table_id,
                vec![
                    (text.id, FieldValue::text(&format!("row {}", (i * 7919) % size))),
                    (number.id, FieldValue::number((i * 31) % 1000)),
                ],
            )
            .unwrap();
    }
    let view = handler
        .create_view(1, table_id, NewView::new(ViewKind::Grid, "bench").public())
        .unwrap();
    Fixture {
        handler,
        table_id,
        text,
        number,
        view,
    }
}

fn rows(fx: &Fixture) -> RowSet {
    let table = fx.handler.get_table(fx.table_id).unwrap();
    let table = table.read().unwrap();
    let model = table.full_model();
    table.query(&model)
}

fn bench_tiered_sequence_insert(c: &mut Criterion) {
    let mut group = c.benchmark_group("tiered_sequence_insert_middle");

    for size in [1000, 10000].iter() {
        group.bench_with_input(BenchmarkId::from_parameter(size), size, |b, &size| {
            b.iter(|| {
                let mut seq = TieredSequence::<u64>::new();
                for i in 0..size {
                    let at = seq.len() / 2;
                    seq.insert(at, black_box(i)).unwrap();
                }
            });
        });
    }
    group.finish();
}

fn bench_apply_filters(c: &mut Criterion) {
    let mut group = c.benchmark_group("apply_filters");

    for size in [1000, 10000].iter() {
        let fx = fixture(*size, false);
        fx.handler
            .create_filter(1, fx.view.id, fx.number.id, FilterOperator::HigherThan, "500", None)
            .unwrap();
        fx.handler
            .create_filter(1, fx.view.id, fx.text.id, FilterOperator::Contains, "1", None)
            .unwrap();

        group.bench_with_input(BenchmarkId::from_parameter(size), size, |b, _| {
            b.iter(|| {
                let filtered = fx.handler.apply_filters(fx.view.id, rows(&fx)).unwrap();
                black_box(filtered.len())
            });
        });
    }
    group.finish();
}

fn bench_sort_scan_vs_index(c: &mut Criterion) {
    let mut group = c.benchmark_group("apply_sorting");

    for size in [1000, 10000].iter() {
        for auto_index in [false, true] {
            let fx = fixture(*size, auto_index);
            fx.handler
                .create_sort(1, fx.view.id, fx.number.id, SortOrder::Descending)
                .unwrap();
            fx.handler
                .create_sort(1, fx.view.id, fx.text.id, SortOrder::Ascending)
                .unwrap();
            let label = if auto_index { "index" } else { "scan" };

            group.bench_with_input(BenchmarkId::new(label, size), size, |b, _| {
                b.iter(|| {
                    let sorted = fx.handler.apply_sorting(fx.view.id, rows(&fx)).unwrap();
                    black_box(sorted.len())
                });
            });
        }
    }
    group.finish();
}

fn bench_row_checker(c: &mut Criterion) {
    let mut group = c.benchmark_group("public_row_checker");

    for size in [1000, 10000].iter() {
        let fx = fixture(*size, false);
        fx.handler
            .create_filter(1, fx.view.id, fx.number.id, FilterOperator::LowerThan, "100", None)
            .unwrap();
        let model = fx.handler.get_table(fx.table_id).unwrap().read().unwrap().full_model();
        let row_ids: Vec<RowId> = rows(&fx).ids().into_iter().take(100).collect();

        group.bench_with_input(BenchmarkId::from_parameter(size), size, |b, _| {
            b.iter(|| {
                let mut checker = fx
                    .handler
                    .get_public_views_row_checker(fx.table_id, &model, true, Some(BTreeSet::from([fx.text.id])))
                    .unwrap();
                black_box(checker.get_public_views_where_rows_are_visible(&row_ids).unwrap())
            });
        });
    }
    group.finish();
}

criterion_group!(
    benches,
    bench_tiered_sequence_insert,
    bench_apply_filters,
    bench_sort_scan_vs_index,
    bench_row_checker
);
criterion_main!(benches);
