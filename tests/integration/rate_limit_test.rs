// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use super::helpers::memory_db;
use appproft_sync::domain::models::rate_limit_bucket::{EndpointLimit, RateLimitTable, SP_API};
use appproft_sync::domain::services::rate_limiting_service::RateLimitingService;
use appproft_sync::infrastructure::repositories::rate_limit_repo_impl::RateLimitRepositoryImpl;
use appproft_sync::infrastructure::services::rate_limiting_service_impl::{
    RateLimitingConfig, RateLimitingServiceImpl,
};
use futures::future::join_all;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

fn config(endpoint: &str, rate: f64, burst: u32) -> RateLimitingConfig {
    let mut table = RateLimitTable::default();
    table.insert(SP_API, endpoint, EndpointLimit::new(rate, burst));
    RateLimitingConfig {
        table,
        flush_interval: Duration::from_millis(50),
    }
}

#[tokio::test]
async fn test_single_token_bucket_allows_deny_then_allow() {
    let repo = Arc::new(RateLimitRepositoryImpl::new(memory_db().await));
    let limiter = RateLimitingServiceImpl::new(repo, config("/orders/v0/orders", 1.0, 1));

    let first = limiter
        .check_and_consume(SP_API, "/orders/v0/orders", "default")
        .await
        .unwrap();
    assert!(first.allowed);
    assert_eq!(first.wait_time_ms, 0);

    let second = limiter
        .check_and_consume(SP_API, "/orders/v0/orders", "default")
        .await
        .unwrap();
    assert!(!second.allowed);
    assert!(
        (900..=1000).contains(&second.wait_time_ms),
        "wait_time_ms: {}",
        second.wait_time_ms
    );

    tokio::time::sleep(Duration::from_millis(1000)).await;
    let third = limiter
        .check_and_consume(SP_API, "/orders/v0/orders", "default")
        .await
        .unwrap();
    assert!(third.allowed);
}

#[tokio::test]
async fn test_concurrent_callers_never_exceed_burst() {
    let repo = Arc::new(RateLimitRepositoryImpl::new(memory_db().await));
    let limiter = Arc::new(RateLimitingServiceImpl::new(
        repo,
        config("/catalog/2022-04-01/items/{asin}", 0.0001, 5),
    ));

    let decisions = join_all((0..40).map(|i| {
        let limiter = limiter.clone();
        tokio::spawn(async move {
            let endpoint = format!("/catalog/2022-04-01/items/B{:03}", i);
            limiter
                .check_and_consume(SP_API, &endpoint, "default")
                .await
                .unwrap()
        })
    }))
    .await;

    let allowed = decisions
        .into_iter()
        .map(|joined| joined.unwrap())
        .filter(|decision| decision.allowed)
        .count();
    assert_eq!(allowed, 5);

    let bucket = limiter
        .snapshot(SP_API, "/catalog/2022-04-01/items/B000", "default")
        .unwrap();
    assert!(bucket.tokens >= 0.0 && bucket.tokens <= 5.0);
}

#[tokio::test]
async fn test_flush_task_persists_usage_for_the_next_process() {
    let db = memory_db().await;
    let repo = Arc::new(RateLimitRepositoryImpl::new(db.clone()));
    let limiter = Arc::new(RateLimitingServiceImpl::new(
        repo.clone(),
        config("/fba/inventory/v1/summaries", 0.0001, 10),
    ));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let handle = limiter.clone().start_flush_task(shutdown_rx);
    for _ in 0..4 {
        assert!(
            limiter
                .check_and_consume(SP_API, "/fba/inventory/v1/summaries", "t1")
                .await
                .unwrap()
                .allowed
        );
    }
    shutdown_tx.send(true).unwrap();
    handle.await.unwrap();

    let restarted = RateLimitingServiceImpl::new(repo, config("/fba/inventory/v1/summaries", 0.0001, 10));
    let stats = restarted.usage_stats("t1").await.unwrap();
    assert_eq!(stats.len(), 1);
    assert_eq!(stats[0].api_name, SP_API);
    assert_eq!(stats[0].calls_today, 4);
    assert!(restarted.usage_stats("other-tenant").await.unwrap().is_empty());
}
