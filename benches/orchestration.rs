//! Benchmarks for the hot paths of the orchestration layer
//!
//! This benchmark measures:
//! - Error classification (status and message patterns)
//! - TTL cache hit / insert-with-eviction
//! - Fixed-window admission under many keys
//! - A full fallback pass over healthy and failing providers

use ai_orchestra::cache::{CacheConfig, CacheKeyGenerator, TtlCache};
use ai_orchestra::resilience::classifier::classify_message;
use ai_orchestra::resilience::fallback::{FallbackOptions, FallbackOrchestrator};
use ai_orchestra::resilience::rate_limiter::FixedWindowRateLimiter;
use ai_orchestra::{Error, RetryPolicy};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use std::collections::BTreeMap;
use std::time::Duration;

const MESSAGES: &[(Option<u16>, &str)] = &[
    (Some(429), "Too many requests"),
    (None, "request timed out after 30s"),
    (None, "maximum context length is 8192 tokens"),
    (Some(401), "invalid api key"),
    (None, "response did not match the JSON schema"),
    (None, "connection reset by peer"),
    (None, "something unexpected happened"),
];

fn bench_classifier(c: &mut Criterion) {
    let mut group = c.benchmark_group("classifier");
    group.throughput(Throughput::Elements(MESSAGES.len() as u64));

    group.bench_function("classify_mixed", |b| {
        b.iter(|| {
            for (status, msg) in MESSAGES {
                black_box(classify_message(*status, black_box(msg)));
            }
        })
    });

    // Unknown messages fall through every pattern group
    group.bench_function("classify_unknown", |b| {
        b.iter(|| black_box(classify_message(None, black_box("opaque failure"))))
    });

    group.finish();
}

fn bench_ttl_cache(c: &mut Criterion) {
    let mut group = c.benchmark_group("ttl_cache");

    let cache: TtlCache<String, u64> =
        TtlCache::new("bench", CacheConfig::new().with_ttl(Duration::from_secs(600)));
    for i in 0..500u64 {
        cache.set(format!("k{i}"), i);
    }
    group.bench_function("get_hit", |b| {
        b.iter(|| black_box(cache.get(black_box(&"k250".to_string()))))
    });

    for size in [64usize, 1024] {
        group.bench_with_input(BenchmarkId::new("set_evicting", size), &size, |b, &size| {
            let cache: TtlCache<u64, u64> =
                TtlCache::new("bench", CacheConfig::new().with_max_size(size));
            let mut n = 0u64;
            b.iter(|| {
                n += 1;
                cache.set(n, n);
            })
        });
    }

    let keys = CacheKeyGenerator::new();
    let settings: BTreeMap<String, serde_json::Value> = [
        ("temperature".to_string(), serde_json::json!(0.2)),
        ("max_tokens".to_string(), serde_json::json!(512)),
    ]
    .into_iter()
    .collect();
    group.bench_function("model_key", |b| {
        b.iter(|| black_box(keys.for_model("openai", "gpt-4o", "chat", black_box(&settings))))
    });

    group.finish();
}

fn bench_rate_limiter(c: &mut Criterion) {
    let mut group = c.benchmark_group("rate_limiter");
    let window = Duration::from_secs(60);

    let limiter = FixedWindowRateLimiter::new();
    group.bench_function("allow_single_key", |b| {
        b.iter(|| black_box(limiter.allow("hot", u32::MAX, window)))
    });

    let keys: Vec<String> = (0..1000).map(|i| format!("user-{i}")).collect();
    group.throughput(Throughput::Elements(keys.len() as u64));
    group.bench_function("allow_many_keys", |b| {
        let limiter = FixedWindowRateLimiter::new();
        b.iter(|| {
            for k in &keys {
                black_box(limiter.allow(k, 100, window));
            }
        })
    });

    group.finish();
}

fn bench_fallback(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let mut group = c.benchmark_group("fallback");

    let orchestrator = FallbackOrchestrator::new(RetryPolicy::no_retry());
    let providers = ["primary", "secondary", "tertiary"];

    group.bench_function("first_provider_succeeds", |b| {
        b.to_async(&rt).iter(|| async {
            let result = orchestrator
                .execute_with_fallback(&providers, FallbackOptions::new("bench"), |p| async move {
                    Ok::<_, Error>(p)
                })
                .await;
            black_box(result.is_success())
        })
    });

    group.bench_function("last_provider_succeeds", |b| {
        b.to_async(&rt).iter(|| async {
            let result = orchestrator
                .execute_with_fallback(&providers, FallbackOptions::new("bench"), |p| async move {
                    if p == "tertiary" {
                        Ok(p)
                    } else {
                        Err(Error::provider_status(400, "bad request"))
                    }
                })
                .await;
            black_box(result.is_success())
        })
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_classifier,
    bench_ttl_cache,
    bench_rate_limiter,
    bench_fallback
);
criterion_main!(benches);
