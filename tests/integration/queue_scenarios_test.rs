// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use super::helpers::queue_fixture;
use appproft_sync::domain::models::queue_task::{NewQueueTask, TaskStatus};
use appproft_sync::domain::repositories::queue_task_repository::QueueTaskRepository;
use appproft_sync::infrastructure::database::entities::sync_queue;
use appproft_sync::queue::task_queue::TaskQueue;
use chrono::{Duration, Utc};
use futures::future::join_all;
use sea_orm::{ActiveModelTrait, EntityTrait, IntoActiveModel, Set};
use serde_json::json;
use std::collections::HashSet;

#[tokio::test]
async fn test_lower_priority_value_is_dequeued_first() {
    let fx = queue_fixture().await;
    fx.queue
        .enqueue(NewQueueTask::new("fetch_orders", "/orders/v0/orders", json!({})).with_priority(5))
        .await
        .unwrap();
    let urgent = fx
        .queue
        .enqueue(NewQueueTask::new("fetch_inventory", "/fba/inventory/v1/summaries", json!({})).with_priority(1))
        .await
        .unwrap();

    let first = fx.queue.dequeue_next().await.unwrap().unwrap();
    assert_eq!(first.id, urgent.id);
    assert_eq!(first.priority, 1);
    assert_eq!(first.status, TaskStatus::Processing);

    let second = fx.queue.dequeue_next().await.unwrap().unwrap();
    assert_eq!(second.priority, 5);
    assert!(fx.queue.dequeue_next().await.unwrap().is_none());
}

#[tokio::test]
async fn test_third_failure_marks_task_failed() {
    let fx = queue_fixture().await;
    let id = fx
        .queue
        .enqueue(NewQueueTask::new("fetch_orders", "/orders/v0/orders", json!({})).with_max_attempts(3))
        .await
        .unwrap()
        .id;

    let mut statuses = Vec::new();
    for attempt in 1..=3 {
        fx.queue.dequeue_next().await.unwrap().unwrap();
        let status = fx
            .queue
            .schedule_retry(id, &format!("failure {}", attempt))
            .await
            .unwrap();
        statuses.push(status);

        // 把重试时间拨回过去，避免等待退避
        if status == TaskStatus::Retry {
            let mut active = sync_queue::Entity::find_by_id(id)
                .one(fx.db.as_ref())
                .await
                .unwrap()
                .unwrap()
                .into_active_model();
            active.next_retry_at = Set(Some(Utc::now().fixed_offset() - Duration::seconds(1)));
            active.update(fx.db.as_ref()).await.unwrap();
        }
    }

    assert_eq!(
        statuses,
        vec![TaskStatus::Retry, TaskStatus::Retry, TaskStatus::Failed]
    );
    let task = fx.repo.find_by_id(id).await.unwrap().unwrap();
    assert_eq!(task.status, TaskStatus::Failed);
    assert_eq!(task.last_error.as_deref(), Some("failure 3"));
    assert!(fx.queue.dequeue_next().await.unwrap().is_none());
}

#[tokio::test]
async fn test_cleanup_removes_only_old_terminal_tasks() {
    let fx = queue_fixture().await;
    let done = fx
        .queue
        .enqueue(NewQueueTask::new("fetch_orders", "/x", json!({})))
        .await
        .unwrap()
        .id;
    fx.queue.dequeue_next().await.unwrap();
    fx.queue.complete(done).await.unwrap();
    let waiting = fx
        .queue
        .enqueue(NewQueueTask::new("fetch_catalog", "/y", json!({})))
        .await
        .unwrap()
        .id;

    let now = Utc::now().fixed_offset();
    let mut completed = sync_queue::Entity::find_by_id(done)
        .one(fx.db.as_ref())
        .await
        .unwrap()
        .unwrap()
        .into_active_model();
    completed.updated_at = Set(now - Duration::days(8));
    completed.update(fx.db.as_ref()).await.unwrap();

    let mut pending = sync_queue::Entity::find_by_id(waiting)
        .one(fx.db.as_ref())
        .await
        .unwrap()
        .unwrap()
        .into_active_model();
    pending.created_at = Set(now - Duration::days(10));
    pending.updated_at = Set(now - Duration::days(10));
    pending.update(fx.db.as_ref()).await.unwrap();

    assert_eq!(fx.queue.cleanup(7).await.unwrap(), 1);
    assert!(fx.repo.find_by_id(done).await.unwrap().is_none());
    let survivor = fx.repo.find_by_id(waiting).await.unwrap().unwrap();
    assert_eq!(survivor.status, TaskStatus::Pending);
}

#[tokio::test]
async fn test_dequeue_returns_none_when_all_retries_are_in_the_future() {
    let fx = queue_fixture().await;
    for _ in 0..3 {
        fx.queue
            .enqueue(NewQueueTask::new("fetch_pricing", "/products/pricing/v0/price", json!({})))
            .await
            .unwrap();
    }
    for _ in 0..3 {
        let task = fx.queue.dequeue_next().await.unwrap().unwrap();
        assert_eq!(
            fx.queue.schedule_retry(task.id, "throttled").await.unwrap(),
            TaskStatus::Retry
        );
    }

    assert!(fx.queue.dequeue_next().await.unwrap().is_none());
    assert_eq!(fx.queue.outstanding().await.unwrap(), 3);
}

#[tokio::test]
async fn test_concurrent_dequeue_never_hands_out_a_task_twice() {
    let fx = queue_fixture().await;
    for i in 0..20 {
        fx.queue
            .enqueue(NewQueueTask::new("fetch_orders", "/x", json!({ "n": i })).with_priority(i % 3))
            .await
            .unwrap();
    }

    let claims = join_all((0..30).map(|_| {
        let queue = fx.queue.clone();
        tokio::spawn(async move { queue.dequeue_next().await })
    }))
    .await;

    let ids: Vec<i32> = claims
        .into_iter()
        .filter_map(|joined| joined.unwrap().unwrap())
        .map(|task| task.id)
        .collect();
    let unique: HashSet<i32> = ids.iter().copied().collect();

    assert_eq!(ids.len(), 20);
    assert_eq!(unique.len(), ids.len());
}
