// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use super::helpers::{queue_fixture, QueueFixture};
use appproft_sync::domain::models::queue_task::{NewQueueTask, TaskStatus};
use appproft_sync::domain::models::sync_record::RecordKind;
use appproft_sync::domain::repositories::data_sink::DataSink;
use appproft_sync::domain::repositories::queue_task_repository::QueueTaskRepository;
use appproft_sync::executor::handlers::polling::PollSettings;
use appproft_sync::executor::handlers::HandlerContext;
use appproft_sync::executor::{ExecutionOutcome, HandlerRouter, TaskExecutor};
use appproft_sync::infrastructure::repositories::data_sink_impl::SeaOrmDataSink;
use appproft_sync::infrastructure::repositories::rate_limit_repo_impl::RateLimitRepositoryImpl;
use appproft_sync::infrastructure::services::marketplace_client::{
    HttpMarketplaceClient, MarketplaceClientConfig, RateLimitedMarketplace,
};
use appproft_sync::infrastructure::services::notification_service_impl::{
    WebhookNotifier, WebhookNotifierConfig,
};
use appproft_sync::infrastructure::services::rate_limiting_service_impl::{
    RateLimitingConfig, RateLimitingServiceImpl,
};
use appproft_sync::queue::task_queue::TaskQueue;
use appproft_sync::workers::sync_worker::SyncWorker;
use appproft_sync::workers::Worker;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

struct Pipeline {
    fx: QueueFixture,
    sink: Arc<SeaOrmDataSink>,
    executor: Arc<TaskExecutor>,
}

async fn pipeline(server: &MockServer) -> Pipeline {
    let fx = queue_fixture().await;
    let limiter = Arc::new(RateLimitingServiceImpl::new(
        Arc::new(RateLimitRepositoryImpl::new(fx.db.clone())),
        RateLimitingConfig::default(),
    ));
    let client = HttpMarketplaceClient::new(MarketplaceClientConfig {
        sp_api_base_url: server.uri(),
        advertising_base_url: server.uri(),
        sp_api_access_token: Some("sp-token".to_string()),
        advertising_access_token: None,
        advertising_client_id: None,
        timeout: Duration::from_secs(5),
    })
    .unwrap();
    let notifier = WebhookNotifier::new(WebhookNotifierConfig {
        enabled: false,
        webhook_url: None,
        alerts_url: None,
        secret: "secret".to_string(),
        timeout: Duration::from_secs(1),
    })
    .unwrap();
    let sink = Arc::new(SeaOrmDataSink::new(fx.db.clone()));

    let ctx = HandlerContext {
        marketplace: Arc::new(RateLimitedMarketplace::new(
            client,
            limiter,
            Duration::from_millis(500),
        )),
        sink: sink.clone(),
        notifier: Arc::new(notifier),
        marketplace_id: "ATVPDKIKX0DER".to_string(),
        poll: PollSettings {
            interval: Duration::from_millis(5),
            max_wait: Duration::from_secs(1),
        },
    };
    let executor = Arc::new(TaskExecutor::new(
        fx.queue.clone(),
        Arc::new(HandlerRouter::new(ctx)),
    ));

    Pipeline { fx, sink, executor }
}

async fn mount_orders(server: &MockServer) {
    Mock::given(method("GET"))
        .and(path("/orders/v0/orders"))
        .and(header("x-amz-access-token", "sp-token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "payload": {"Orders": [
                {"AmazonOrderId": "111-1", "OrderStatus": "Shipped"},
                {"AmazonOrderId": "111-2", "OrderStatus": "Pending"}
            ]}
        })))
        .mount(server)
        .await;
}

#[tokio::test]
async fn test_successful_task_stores_records_and_completes() {
    let server = MockServer::start().await;
    mount_orders(&server).await;
    let p = pipeline(&server).await;

    let id = p
        .fx
        .queue
        .enqueue(NewQueueTask::new("fetch_orders", "/orders/v0/orders", json!({})))
        .await
        .unwrap()
        .id;
    let task = p.fx.queue.dequeue_next().await.unwrap().unwrap();

    assert_eq!(p.executor.execute(&task).await.unwrap(), ExecutionOutcome::Completed);
    let stored = p.fx.repo.find_by_id(id).await.unwrap().unwrap();
    assert_eq!(stored.status, TaskStatus::Completed);
    assert!(stored.completed_at.is_some());
    assert_eq!(p.sink.count_records(RecordKind::Order, "default").await.unwrap(), 2);

    // 重复执行同一任务不会产生重复记录
    let again = p
        .fx
        .queue
        .enqueue(NewQueueTask::new("fetch_orders", "/orders/v0/orders", json!({})))
        .await
        .unwrap();
    let task = p.fx.queue.dequeue_next().await.unwrap().unwrap();
    assert_eq!(task.id, again.id);
    p.executor.execute(&task).await.unwrap();
    assert_eq!(p.sink.count_records(RecordKind::Order, "default").await.unwrap(), 2);
}

#[tokio::test]
async fn test_upstream_failure_schedules_retry_with_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/fba/inventory/v1/summaries"))
        .respond_with(ResponseTemplate::new(500).set_body_string("InternalFailure"))
        .mount(&server)
        .await;
    let p = pipeline(&server).await;

    let id = p
        .fx
        .queue
        .enqueue(NewQueueTask::new("fetch_inventory", "/fba/inventory/v1/summaries", json!({})))
        .await
        .unwrap()
        .id;
    let task = p.fx.queue.dequeue_next().await.unwrap().unwrap();

    assert_eq!(p.executor.execute(&task).await.unwrap(), ExecutionOutcome::Retrying);
    let stored = p.fx.repo.find_by_id(id).await.unwrap().unwrap();
    assert_eq!(stored.status, TaskStatus::Retry);
    assert_eq!(stored.attempt_count, 1);
    assert!(stored.next_retry_at.is_some());
    assert!(stored.last_error.is_some());
}

#[tokio::test]
async fn test_unknown_task_type_fails_without_retry() {
    let server = MockServer::start().await;
    let p = pipeline(&server).await;

    let id = p
        .fx
        .queue
        .enqueue(NewQueueTask::new("sync_the_moon", "/moon", json!({})))
        .await
        .unwrap()
        .id;
    let task = p.fx.queue.dequeue_next().await.unwrap().unwrap();

    assert_eq!(p.executor.execute(&task).await.unwrap(), ExecutionOutcome::Failed);
    let stored = p.fx.repo.find_by_id(id).await.unwrap().unwrap();
    assert_eq!(stored.status, TaskStatus::Failed);
    assert_eq!(stored.attempt_count, 0);
    assert!(stored.last_error.unwrap().contains("sync_the_moon"));
}

#[tokio::test]
async fn test_sync_worker_drains_queue_until_shutdown() {
    let server = MockServer::start().await;
    mount_orders(&server).await;
    let p = pipeline(&server).await;

    for priority in [3, 1, 2] {
        p.fx.queue
            .enqueue(NewQueueTask::new("fetch_orders", "/orders/v0/orders", json!({})).with_priority(priority))
            .await
            .unwrap();
    }

    let worker = Arc::new(SyncWorker::new(
        p.fx.queue.clone(),
        p.executor.clone(),
        Duration::from_millis(10),
        Duration::from_millis(10),
    ));
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let handle = {
        let worker = worker.clone();
        tokio::spawn(async move { worker.run(shutdown_rx).await })
    };

    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while p.fx.queue.stats(24).await.unwrap().count(TaskStatus::Completed) < 3 {
        assert!(tokio::time::Instant::now() < deadline, "worker did not drain the queue");
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    shutdown_tx.send(true).unwrap();
    tokio::time::timeout(Duration::from_secs(2), handle)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert_eq!(p.fx.queue.outstanding().await.unwrap(), 0);
    assert_eq!(p.sink.count_records(RecordKind::Order, "default").await.unwrap(), 2);
}
