// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use appproft_sync::domain::models::rate_limit_bucket::{
    BucketKey, EndpointLimit, RateLimitBucket, RateLimitTable, SP_API,
};
use chrono::{Duration, TimeZone, Utc};

fn bucket(rate: f64, burst: u32) -> RateLimitBucket {
    let start = Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap();
    RateLimitBucket::new(
        BucketKey::new(SP_API, "/orders/v0/orders", "default"),
        EndpointLimit::new(rate, burst),
        start,
    )
}

#[test]
fn test_tokens_stay_within_bounds_for_any_call_pattern() {
    // 固定的伪随机间隔序列，覆盖突发、空闲和长时间静默
    let gaps_ms = [0, 0, 0, 3, 17, 250, 1_000, 0, 5, 60_000, 0, 0, 1, 999, 86_400_000];
    for (rate, burst) in [(0.0167, 20), (1.0, 1), (2.0, 2), (10.0, 20), (0.0, 3)] {
        let mut b = bucket(rate, burst);
        let mut now = b.last_refill_at;
        for (i, gap) in gaps_ms.iter().cycle().take(200).enumerate() {
            now += Duration::milliseconds(*gap + i as i64 % 7);
            let decision = b.try_consume(now);
            assert!(
                b.tokens >= 0.0 && b.tokens <= burst as f64,
                "rate {} burst {}: tokens {} out of bounds",
                rate,
                burst,
                b.tokens
            );
            if decision.allowed {
                assert_eq!(decision.wait_time_ms, 0);
            } else {
                assert!(decision.wait_time_ms > 0);
            }
        }
    }
}

#[test]
fn test_burst_is_spent_before_first_denial() {
    let mut b = bucket(0.0167, 20);
    let now = b.last_refill_at;
    let allowed = (0..25).filter(|_| b.try_consume(now).allowed).count();
    assert_eq!(allowed, 20);
    // 补充一个令牌需要约 60 秒
    let wait = b.wait_time_ms();
    assert!((59_000..=60_000).contains(&wait), "wait: {}", wait);
}

#[test]
fn test_zero_rate_bucket_never_refills() {
    let mut b = bucket(0.0, 1);
    let now = b.last_refill_at;
    assert!(b.try_consume(now).allowed);
    let later = now + Duration::days(30);
    let decision = b.try_consume(later);
    assert!(!decision.allowed);
    assert_eq!(decision.wait_time_ms, u64::MAX);
}

#[test]
fn test_stored_bucket_is_clamped_on_load() {
    let mut stored = bucket(1.0, 5);
    stored.tokens = 42.0;
    assert_eq!(stored.clone().clamp().tokens, 5.0);
    stored.tokens = -3.0;
    assert_eq!(stored.clamp().tokens, 0.0);
}

#[test]
fn test_table_resolves_path_parameters_and_falls_back() {
    let table = RateLimitTable::default();
    let item = table.resolve(SP_API, "/orders/v0/orders/902-3159896-1390916/items");
    assert_eq!(item.pattern, "/orders/v0/orders/{orderId}/items");
    assert_eq!(item.limit, EndpointLimit::new(0.5, 30));

    let unknown = table.resolve(SP_API, "/sellers/v1/marketplaceParticipations");
    assert_eq!(unknown.limit, EndpointLimit::new(5.0, 10));
}
