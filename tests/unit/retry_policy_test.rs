// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use appproft_sync::domain::models::queue_task::{
    ErrorClass, QueueTask, RetryOutcome, TaskStatus, DEFAULT_TENANT,
};
use appproft_sync::utils::retry_policy::RetryPolicy;
use chrono::{TimeZone, Utc};
use serde_json::json;
use std::time::Duration;

fn processing_task(attempt_count: i32, max_attempts: i32) -> QueueTask {
    let now = Utc.with_ymd_and_hms(2025, 6, 1, 8, 0, 0).unwrap();
    QueueTask {
        id: 7,
        task_type: "fetch_orders".to_string(),
        endpoint: "/orders/v0/orders".to_string(),
        payload: json!({}),
        priority: 5,
        status: TaskStatus::Processing,
        attempt_count,
        max_attempts,
        next_retry_at: None,
        last_error: None,
        created_at: now,
        updated_at: now,
        completed_at: None,
        tenant_id: DEFAULT_TENANT.to_string(),
    }
}

#[test]
fn test_backoff_follows_schedule_and_saturates() {
    let policy = RetryPolicy::standard();
    let delays: Vec<u64> = (1..=7)
        .map(|attempt| policy.delay_for_attempt(attempt).as_secs())
        .collect();
    assert_eq!(delays, vec![1, 2, 5, 10, 30, 30, 30]);
    assert_eq!(policy.schedule.iter().sum::<Duration>(), Duration::from_secs(48));
}

#[test]
fn test_empty_schedule_falls_back_to_default() {
    assert_eq!(RetryPolicy::from_secs(&[]), RetryPolicy::standard());
    let custom = RetryPolicy::from_secs(&[3]);
    assert_eq!(custom.delay_for_attempt(0), Duration::from_secs(3));
    assert_eq!(custom.delay_for_attempt(9), Duration::from_secs(3));
}

#[test]
fn test_status_transitions_never_return_to_pending() {
    for from in TaskStatus::ALL {
        assert!(!from.can_transition_to(TaskStatus::Pending), "{} -> pending", from);
    }
    assert!(TaskStatus::Pending.can_transition_to(TaskStatus::Processing));
    assert!(TaskStatus::Retry.can_transition_to(TaskStatus::Processing));
    assert!(TaskStatus::Processing.can_transition_to(TaskStatus::Retry));
    assert!(!TaskStatus::Completed.can_transition_to(TaskStatus::Processing));
    assert!(!TaskStatus::Failed.can_transition_to(TaskStatus::Retry));
}

#[test]
fn test_http_status_classification() {
    assert_eq!(ErrorClass::from_http_status(429), ErrorClass::RateLimited);
    assert_eq!(ErrorClass::from_http_status(503), ErrorClass::Transient);
    assert_eq!(ErrorClass::from_http_status(404), ErrorClass::Permanent);
    assert_eq!(ErrorClass::from_http_status(302), ErrorClass::Unclassified);
}

#[test]
fn test_retry_outcome_boundary_at_max_attempts() {
    let policy = RetryPolicy::standard();
    let now = Utc.with_ymd_and_hms(2025, 6, 1, 9, 0, 0).unwrap();

    assert_eq!(
        processing_task(0, 3).retry_outcome(&policy, now),
        RetryOutcome::Retry {
            attempt_count: 1,
            next_retry_at: now + chrono::Duration::seconds(1),
        }
    );
    assert_eq!(
        processing_task(1, 3).retry_outcome(&policy, now),
        RetryOutcome::Retry {
            attempt_count: 2,
            next_retry_at: now + chrono::Duration::seconds(2),
        }
    );
    assert_eq!(processing_task(2, 3).retry_outcome(&policy, now), RetryOutcome::Exhausted);
    assert_eq!(processing_task(0, 1).retry_outcome(&policy, now), RetryOutcome::Exhausted);
}
