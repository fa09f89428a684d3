use criterion::{black_box, criterion_group, criterion_main, Criterion};
use modtree::{Context, PutOptions, Signal};
use tokio::runtime::Runtime;

fn bench_context_put_get(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    c.bench_function("context put+get u64", |b| {
        b.iter(|| {
            rt.block_on(async {
                let ctx = Context::new_root("bench");
                ctx.put(42u64, PutOptions::default()).await.unwrap();
                let token = ctx.get::<u64>(None).await.unwrap();
                black_box(token.unwrap().unwrap());
            })
        })
    });
}

fn bench_signal_emit(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    c.bench_function("signal emit to 8 sync callbacks", |b| {
        b.iter(|| {
            rt.block_on(async {
                let signal: Signal<u32> = Signal::new();
                for _ in 0..8 {
                    signal.connect(|v: &u32| {
                        black_box(*v);
                    });
                }
                signal.emit(7).await;
            })
        })
    });
}

criterion_group!(benches, bench_context_put_get, bench_signal_emit);
criterion_main!(benches);
