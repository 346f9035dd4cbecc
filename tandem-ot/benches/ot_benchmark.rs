use criterion::{black_box, criterion_group, criterion_main, Criterion};
use tandem_ot::{compose, transform, Side, TextOperation};

fn typing_ops(base: &str, count: usize) -> Vec<TextOperation> {
    let mut text = base.to_string();
    let mut ops = Vec::with_capacity(count);
    for i in 0..count {
        let len = text.chars().count();
        let op = TextOperation::from_edit(&text, len / 2, "", if i % 2 == 0 { "a" } else { "b" })
            .unwrap();
        text = op.apply(&text).unwrap();
        ops.push(op);
    }
    ops
}

fn bench_apply(c: &mut Criterion) {
    let base = "lorem ipsum dolor sit amet ".repeat(200);
    let op = TextOperation::from_edit(&base, 2_000, "dolor", "DOLOR").unwrap();

    c.bench_function("apply_5KB", |b| {
        b.iter(|| black_box(op.apply(black_box(&base)).unwrap()))
    });
}

fn bench_transform(c: &mut Criterion) {
    let base = "lorem ipsum dolor sit amet ".repeat(200);
    let a = TextOperation::from_edit(&base, 100, "", "left").unwrap();
    let b = TextOperation::from_edit(&base, 4_000, "sit", "").unwrap();

    c.bench_function("transform_5KB", |bench| {
        bench.iter(|| black_box(transform(black_box(&a), black_box(&b), Side::Left).unwrap()))
    });
}

fn bench_compose_chain(c: &mut Criterion) {
    let ops = typing_ops("seed text", 100);

    c.bench_function("compose_100_keystrokes", |b| {
        b.iter(|| {
            let mut acc = ops[0].clone();
            for op in &ops[1..] {
                acc = compose(&acc, op).unwrap();
            }
            black_box(acc)
        })
    });
}

criterion_group!(benches, bench_apply, bench_transform, bench_compose_chain);
criterion_main!(benches);
