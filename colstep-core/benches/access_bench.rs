//! Row vs whole-column access benchmarks.

use colstep_core::{tags, Array, EngineConfig, StorageManager};
use criterion::{black_box, criterion_group, criterion_main, Criterion};

const ROWS: u64 = 256;
const CELL: [u64; 2] = [8, 16];

fn filled_manager() -> StorageManager {
    let config = EngineConfig {
        engine_type: "Inline".into(),
        ..Default::default()
    };
    let mut manager = StorageManager::with_config(config).unwrap();
    manager.set_file_name("bench/table.f0");
    let data = manager.make_dir_arr_column("data", tags::ARRAY_FLOAT, "").unwrap();
    manager.set_shape_column(data, &CELL).unwrap();
    manager.create(ROWS).unwrap();

    let mut shape = vec![ROWS];
    shape.extend_from_slice(&CELL);
    let all = Array::from_fn(shape, |i| i as f32);
    manager.column(data).unwrap().put_column(&all).unwrap();
    manager
}

fn row_access_benchmark(c: &mut Criterion) {
    let mut manager = filled_manager();
    c.bench_function("get_array_256_rows", |b| {
        b.iter(|| {
            let mut column = manager.column(0).unwrap();
            for row in 0..ROWS {
                black_box(column.get_array::<f32>(row).unwrap());
            }
        })
    });
}

fn column_access_benchmark(c: &mut Criterion) {
    let mut manager = filled_manager();
    c.bench_function("get_column_256_rows", |b| {
        b.iter(|| black_box(manager.column(0).unwrap().get_column::<f32>().unwrap()))
    });
}

fn row_write_benchmark(c: &mut Criterion) {
    let mut manager = filled_manager();
    let cell = Array::from_fn(CELL.to_vec(), |i| i as f32 * 0.5);
    c.bench_function("put_array_256_rows", |b| {
        b.iter(|| {
            let mut column = manager.column(0).unwrap();
            for row in 0..ROWS {
                column.put_array(row, black_box(&cell)).unwrap();
            }
        })
    });
}

criterion_group!(
    benches,
    row_access_benchmark,
    column_access_benchmark,
    row_write_benchmark
);
criterion_main!(benches);
