use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

use bazaar_catalog::model::{Assignment, Attribute, AttributeOption, AttributeWithOptions, Variant};
use bazaar_catalog::{combinations, plan_deduplication, Dimensions, ProductMatrix};
use bazaar_core::{AttributeId, OptionId, ProductId, VariantId};
use chrono::Utc;

/// `attributes` dimensions with `options` values each, ids laid out densely.
fn square(attributes: i64, options: i64) -> Vec<(AttributeId, Vec<OptionId>)> {
    (1..=attributes)
        .map(|a| {
            let opts = (1..=options).map(|o| OptionId::new(a * 1000 + o)).collect();
            (AttributeId::new(a), opts)
        })
        .collect()
}

/// A fully expanded matrix where every variant is duplicated once.
fn duplicated_matrix(attributes: i64, options: i64) -> ProductMatrix {
    let product_id = ProductId::new(1);
    let dims = square(attributes, options);

    let attrs = dims
        .iter()
        .map(|(a, opts)| AttributeWithOptions {
            attribute: Attribute {
                id: *a,
                product_id,
                label: format!("attr-{}", a.get()),
            },
            options: opts
                .iter()
                .map(|o| AttributeOption {
                    id: *o,
                    attribute_id: *a,
                    value: format!("opt-{}", o.get()),
                })
                .collect(),
        })
        .collect();

    let mut variants = Vec::new();
    let mut assignments: Vec<Assignment> = Vec::new();
    let mut next = 1;
    for combo in combinations(dims) {
        for _ in 0..2 {
            let id = VariantId::new(next);
            next += 1;
            variants.push(Variant {
                id,
                product_id,
                quantity: 0,
                created_at: Utc::now(),
            });
            assignments.extend(combo.assignments_for(id));
        }
    }

    ProductMatrix::new(product_id, attrs, variants, assignments)
}

fn bench_generator(c: &mut Criterion) {
    let mut group = c.benchmark_group("combination_generator");

    for (attributes, options) in [(2, 4), (3, 5), (4, 6), (5, 5)].iter() {
        let dims = Dimensions::from_pairs(square(*attributes, *options));
        group.throughput(Throughput::Elements(dims.combination_count() as u64));
        group.bench_with_input(
            BenchmarkId::from_parameter(format!("{attributes}x{options}")),
            &dims,
            |b, dims| {
                b.iter(|| black_box(dims.combinations().count()));
            },
        );
    }

    group.finish();
}

fn bench_deduplication(c: &mut Criterion) {
    let mut group = c.benchmark_group("deduplication");

    for (attributes, options) in [(2, 4), (3, 5), (4, 5)].iter() {
        let matrix = duplicated_matrix(*attributes, *options);
        group.throughput(Throughput::Elements(matrix.variants.len() as u64));
        group.bench_with_input(
            BenchmarkId::from_parameter(format!("{attributes}x{options}")),
            &matrix,
            |b, matrix| {
                b.iter(|| black_box(plan_deduplication(matrix)));
            },
        );
    }

    group.finish();
}

criterion_group!(benches, bench_generator, bench_deduplication);
criterion_main!(benches);
