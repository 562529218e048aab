use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use hotel_session_sync::cart::{Cart, CartLine, Product};
use rand::{seq::SliceRandom, thread_rng, Rng};

fn products(count: usize) -> Vec<Product> {
    (0..count)
        .map(|i| Product {
            id: format!("room{}", i),
            title: format!("Room {}", i),
            price: 50.0 + i as f64,
            image: None,
        })
        .collect()
}

// Mixed cart mutations, as the cart screen issues them
pub fn cart_mutation_benchmark(c: &mut Criterion) {
    let mut group = c.benchmark_group("cart_mutations");

    for distinct in [10, 100, 1000].iter() {
        let catalog = products(*distinct);
        group.bench_with_input(
            BenchmarkId::from_parameter(distinct),
            &catalog,
            |b, catalog| {
                b.iter(|| {
                    let mut rng = thread_rng();
                    let mut cart = Cart::new();
                    for _ in 0..1000 {
                        let product = catalog.choose(&mut rng).unwrap();
                        match rng.gen_range(0..10) {
                            // 60% adds
                            0..=5 => cart.add(product, rng.gen_range(1..4)),
                            // 30% quantity edits, some of which remove the line
                            6..=8 => cart.set_quantity(&product.id, rng.gen_range(-1..6)),
                            _ => {
                                cart.remove(&product.id);
                            }
                        }
                    }
                    black_box(cart.total())
                });
            },
        );
    }

    group.finish();
}

// Rebuilding a cart from a stored snapshot with duplicate lines
pub fn cart_snapshot_benchmark(c: &mut Criterion) {
    let mut rng = thread_rng();
    let lines: Vec<CartLine> = (0..500)
        .map(|_| {
            let i = rng.gen_range(0..100);
            CartLine {
                id: format!("room{}", i),
                title: format!("Room {}", i),
                price: 80.0,
                image: None,
                quantity: rng.gen_range(0..5),
            }
        })
        .collect();
    let raw = serde_json::to_string(&lines).unwrap();

    c.bench_function("cart_from_snapshot", |b| {
        b.iter(|| {
            let lines: Vec<CartLine> = serde_json::from_str(black_box(&raw)).unwrap();
            black_box(Cart::from_lines(lines))
        })
    });
}

criterion_group!(benches, cart_mutation_benchmark, cart_snapshot_benchmark);
criterion_main!(benches);
