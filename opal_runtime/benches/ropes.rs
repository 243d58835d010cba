//! Rope engine benchmarks.
//!
//! Measures the two ends of the rope trade-off: concatenation must stay
//! constant-time regardless of operand size, while content access pays
//! O(depth) on the trees that repeated one-sided concatenation builds.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use opal_runtime::{Heap, Value};

fn bench_concat(c: &mut Criterion) {
    let mut group = c.benchmark_group("rope_concat");
    for size in [1usize << 10, 1 << 16, 1 << 20] {
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, &size| {
            let mut heap = Heap::new();
            let left = heap.make_leaf(vec![b'a'; size]);
            let right = heap.make_leaf(vec![b'b'; size]);
            b.iter(|| {
                let node = heap.rope_concat(black_box(left), black_box(right)).unwrap();
                black_box(node)
            });
        });
    }
    group.finish();
}

fn bench_deep_access(c: &mut Criterion) {
    let mut group = c.benchmark_group("rope_byte_deep");
    for depth in [16usize, 256, 4096] {
        group.bench_with_input(BenchmarkId::from_parameter(depth), &depth, |b, &depth| {
            let mut heap = Heap::new();
            // left-spine tree from repeated one-sided concatenation
            let mut rope = heap.make_leaf(b"x".to_vec());
            for _ in 0..depth {
                let leaf = heap.make_leaf(b"y".to_vec());
                rope = heap.rope_concat(rope, leaf).unwrap();
            }
            b.iter(|| heap.rope_byte(black_box(rope), 0).unwrap());
        });
    }
    group.finish();
}

fn bench_cmp_shapes(c: &mut Criterion) {
    let mut heap = Heap::new();
    let chunk = vec![b'z'; 4096];
    let mut left = heap.make_leaf(chunk.clone());
    for _ in 0..64 {
        let leaf = heap.make_leaf(chunk.clone());
        left = heap.rope_concat(left, leaf).unwrap();
    }
    let flat = heap.make_leaf(vec![b'z'; 4096 * 65]);
    let a = heap.alloc(opal_runtime::ObjBody::Str(opal_runtime::Str::new(left)));
    let b = heap.alloc(opal_runtime::ObjBody::Str(opal_runtime::Str::new(flat)));

    c.bench_function("str_cmp_mixed_shapes", |bench| {
        bench.iter(|| {
            heap.str_cmp(black_box(Value::Obj(a)), black_box(Value::Obj(b)))
                .unwrap()
        })
    });
}

criterion_group!(benches, bench_concat, bench_deep_access, bench_cmp_shapes);
criterion_main!(benches);
