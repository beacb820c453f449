//! Performance benchmarks for a3s-session
//!
//! Run with: cargo bench

use a3s_session::{
    AuthChangeEvent, MemoryIdentityProvider, Session, SessionChange, SessionSynchronizer, User,
};
use criterion::{criterion_group, criterion_main, Criterion};
use std::sync::Arc;

fn change(i: usize) -> SessionChange {
    if i % 2 == 0 {
        SessionChange::new(
            AuthChangeEvent::SignedIn,
            Some(Session::new("tok", User::new("usr-1", "a@b.com"))),
        )
    } else {
        SessionChange::new(AuthChangeEvent::SignedOut, None)
    }
}

fn bench_change_serialization(c: &mut Criterion) {
    let signed_in = change(0);

    c.bench_function("SessionChange serialize", |b| {
        b.iter(|| serde_json::to_vec(&signed_in).unwrap());
    });

    let bytes = serde_json::to_vec(&signed_in).unwrap();
    c.bench_function("SessionChange deserialize", |b| {
        b.iter(|| serde_json::from_slice::<SessionChange>(&bytes).unwrap());
    });
}

fn bench_notification_throughput(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();

    let mut group = c.benchmark_group("notification_throughput");
    for count in [10, 100, 1000] {
        group.bench_function(format!("{} changes", count), |b| {
            b.to_async(&rt).iter(|| async {
                let provider = Arc::new(MemoryIdentityProvider::default());
                let sync = SessionSynchronizer::new(provider.clone(), Arc::new(|_: &str| {}));
                sync.activate().unwrap();
                for i in 0..count {
                    provider.emit(change(i));
                }
                sync.deactivate();
            });
        });
    }
    group.finish();
}

fn bench_sign_in_cycle(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let provider = Arc::new(MemoryIdentityProvider::default().with_account("a@b.com", "pw"));

    c.bench_function("sign_in + sign_out", |b| {
        b.to_async(&rt).iter(|| async {
            let sync = SessionSynchronizer::new(provider.clone(), Arc::new(|_: &str| {}));
            sync.activate().unwrap();
            sync.sign_in("a@b.com", "pw").await.unwrap();
            sync.sign_out().await;
        });
    });
}

criterion_group!(
    benches,
    bench_change_serialization,
    bench_notification_throughput,
    bench_sign_in_cycle,
);
criterion_main!(benches);
