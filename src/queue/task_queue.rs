// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use crate::domain::models::queue_task::{
    NewQueueTask, QueueTask, RetryOutcome, TaskId, TaskStatus,
};
use crate::domain::repositories::queue_task_repository::{
    QueueTaskRepository, RepositoryError, StatusStats, TaskTypeStats,
};
use crate::utils::retry_policy::RetryPolicy;
use async_trait::async_trait;
use chrono::{Duration, Utc};
use metrics::counter;
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

/// 崩溃恢复时 processing 任务的默认重试延迟（秒）
pub const DEFAULT_RECOVERY_DELAY_SECS: i64 = 30;

/// 队列错误类型
#[derive(Error, Debug)]
pub enum QueueError {
    /// 仓库错误
    #[error("Repository error: {0}")]
    Repository(#[from] RepositoryError),

    /// 任务不存在
    #[error("Task {0} not found")]
    NotFound(TaskId),

    /// 任务当前状态不允许该操作
    #[error("Task {id} is {status}, expected processing")]
    InvalidState { id: TaskId, status: TaskStatus },
}

/// 时间窗口内的队列统计
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueueStats {
    pub window_hours: i64,
    pub by_status: BTreeMap<TaskStatus, StatusStats>,
}

impl QueueStats {
    pub fn count(&self, status: TaskStatus) -> i64 {
        self.by_status.get(&status).map_or(0, |s| s.count)
    }

    pub fn total(&self) -> i64 {
        self.by_status.values().map(|s| s.count).sum()
    }

    /// 失败任务占比，窗口内没有任务时为 0
    pub fn failure_rate(&self) -> f64 {
        let total = self.total();
        if total == 0 {
            return 0.0;
        }
        self.count(TaskStatus::Failed) as f64 / total as f64
    }
}

/// 任务队列特质
#[async_trait]
pub trait TaskQueue: Send + Sync {
    /// 入队任务，状态为 pending，attempt_count 为 0
    async fn enqueue(&self, task: NewQueueTask) -> Result<QueueTask, QueueError>;

    /// 独占领取下一个可执行任务
    ///
    /// 按 (priority, created_at) 升序选择 pending/retry 且到期的任务，
    /// 没有可执行任务时返回 `Ok(None)`
    async fn dequeue_next(&self) -> Result<Option<QueueTask>, QueueError>;

    /// 标记完成，重复调用不会报错
    async fn complete(&self, task_id: TaskId) -> Result<(), QueueError>;

    /// 记录一次失败并安排重试
    ///
    /// # 返回值
    ///
    /// 任务的新状态：`Retry` 或尝试次数耗尽后的 `Failed`
    async fn schedule_retry(&self, task_id: TaskId, error: &str)
        -> Result<TaskStatus, QueueError>;

    /// 直接标记失败，不消耗重试次数
    async fn fail(&self, task_id: TaskId, error: &str) -> Result<(), QueueError>;

    /// 最近 `window_hours` 小时内创建的任务按状态统计
    async fn stats(&self, window_hours: i64) -> Result<QueueStats, QueueError>;

    /// 最近 `window_hours` 小时内创建的任务按类型统计
    async fn task_type_stats(&self, window_hours: i64) -> Result<Vec<TaskTypeStats>, QueueError>;

    /// 删除 `older_than_days` 天前更新的终态任务
    async fn cleanup(&self, older_than_days: i64) -> Result<u64, QueueError>;

    /// 将上次运行遗留的 processing 任务重置为 retry
    async fn recover_processing(&self) -> Result<u64, QueueError>;

    /// pending 与 retry 任务数
    async fn outstanding(&self) -> Result<u64, QueueError>;

    /// 检查存储是否可达
    async fn ping(&self) -> Result<(), QueueError>;
}

/// 持久化任务队列实现
pub struct PersistentTaskQueue {
    /// 任务仓库
    repository: Arc<dyn QueueTaskRepository>,
    retry_policy: RetryPolicy,
    recovery_delay: Duration,
}

impl PersistentTaskQueue {
    /// 创建新的持久化任务队列实例
    ///
    /// # 参数
    ///
    /// * `repository` - 任务仓库
    /// * `retry_policy` - 退避表
    pub fn new(repository: Arc<dyn QueueTaskRepository>, retry_policy: RetryPolicy) -> Self {
        Self {
            repository,
            retry_policy,
            recovery_delay: Duration::seconds(DEFAULT_RECOVERY_DELAY_SECS),
        }
    }

    pub fn with_recovery_delay(mut self, seconds: i64) -> Self {
        self.recovery_delay = Duration::seconds(seconds);
        self
    }

    /// 按任务类型、端点、负载和优先级入队
    pub async fn enqueue_task(
        &self,
        task_type: &str,
        endpoint: &str,
        payload: Value,
        priority: i32,
    ) -> Result<TaskId, QueueError> {
        let task = NewQueueTask::new(task_type, endpoint, payload).with_priority(priority);
        Ok(self.enqueue(task).await?.id)
    }

    /// 条件更新没有命中时，区分任务不存在和状态不符
    async fn explain_miss(&self, task_id: TaskId) -> Result<QueueTask, QueueError> {
        self.repository
            .find_by_id(task_id)
            .await?
            .ok_or(QueueError::NotFound(task_id))
    }
}

#[async_trait]
impl TaskQueue for PersistentTaskQueue {
    async fn enqueue(&self, task: NewQueueTask) -> Result<QueueTask, QueueError> {
        let created = self.repository.insert(&task).await?;
        debug!(
            task_id = created.id,
            task_type = %created.task_type,
            priority = created.priority,
            "Task enqueued"
        );
        Ok(created)
    }

    async fn dequeue_next(&self) -> Result<Option<QueueTask>, QueueError> {
        let task = self.repository.claim_next(Utc::now()).await?;
        if let Some(task) = &task {
            counter!("sync_tasks_claimed_total").increment(1);
            debug!(task_id = task.id, task_type = %task.task_type, "Task claimed");
        }
        Ok(task)
    }

    async fn complete(&self, task_id: TaskId) -> Result<(), QueueError> {
        if self.repository.mark_completed(task_id, Utc::now()).await? == 1 {
            return Ok(());
        }

        let task = self.explain_miss(task_id).await?;
        match task.status {
            TaskStatus::Completed => {
                debug!(task_id, "Task already completed");
                Ok(())
            }
            status => Err(QueueError::InvalidState {
                id: task_id,
                status,
            }),
        }
    }

    async fn schedule_retry(
        &self,
        task_id: TaskId,
        error: &str,
    ) -> Result<TaskStatus, QueueError> {
        let task = self.explain_miss(task_id).await?;
        if task.status != TaskStatus::Processing {
            return Err(QueueError::InvalidState {
                id: task_id,
                status: task.status,
            });
        }

        let now = Utc::now();
        let (status, rows) = match task.retry_outcome(&self.retry_policy, now) {
            RetryOutcome::Retry {
                attempt_count,
                next_retry_at,
            } => {
                info!(
                    task_id,
                    attempt = attempt_count,
                    max_attempts = task.max_attempts,
                    next_retry_at = %next_retry_at,
                    "Task scheduled for retry"
                );
                let rows = self
                    .repository
                    .mark_retry(task_id, attempt_count, next_retry_at, error, now)
                    .await?;
                (TaskStatus::Retry, rows)
            }
            RetryOutcome::Exhausted => {
                warn!(
                    task_id,
                    max_attempts = task.max_attempts,
                    "Task exhausted its attempts, marking failed"
                );
                let rows = self.repository.mark_failed(task_id, error, now).await?;
                (TaskStatus::Failed, rows)
            }
        };

        if rows == 0 {
            // 读取之后被其他调用方改过状态
            let current = self.explain_miss(task_id).await?;
            return Err(QueueError::InvalidState {
                id: task_id,
                status: current.status,
            });
        }
        Ok(status)
    }

    async fn fail(&self, task_id: TaskId, error: &str) -> Result<(), QueueError> {
        if self.repository.mark_failed(task_id, error, Utc::now()).await? == 1 {
            return Ok(());
        }

        let task = self.explain_miss(task_id).await?;
        match task.status {
            TaskStatus::Failed => Ok(()),
            status => Err(QueueError::InvalidState {
                id: task_id,
                status,
            }),
        }
    }

    async fn stats(&self, window_hours: i64) -> Result<QueueStats, QueueError> {
        let since = Utc::now() - Duration::hours(window_hours);
        let by_status = self
            .repository
            .status_stats(since)
            .await?
            .into_iter()
            .map(|s| (s.status, s))
            .collect();

        Ok(QueueStats {
            window_hours,
            by_status,
        })
    }

    async fn task_type_stats(&self, window_hours: i64) -> Result<Vec<TaskTypeStats>, QueueError> {
        let since = Utc::now() - Duration::hours(window_hours);
        Ok(self.repository.task_type_stats(since).await?)
    }

    async fn cleanup(&self, older_than_days: i64) -> Result<u64, QueueError> {
        let cutoff = Utc::now() - Duration::days(older_than_days);
        let deleted = self.repository.delete_terminal_before(cutoff).await?;
        info!(deleted, older_than_days, "Old terminal tasks cleaned up");
        Ok(deleted)
    }

    async fn recover_processing(&self) -> Result<u64, QueueError> {
        let now = Utc::now();
        let recovered = self
            .repository
            .recover_processing(now + self.recovery_delay, now)
            .await?;
        if recovered > 0 {
            warn!(
                recovered,
                delay_secs = self.recovery_delay.num_seconds(),
                "Recovered tasks left in processing by a previous run"
            );
        }
        Ok(recovered)
    }

    async fn outstanding(&self) -> Result<u64, QueueError> {
        Ok(self
            .repository
            .count_by_status(&[TaskStatus::Pending, TaskStatus::Retry])
            .await?)
    }

    async fn ping(&self) -> Result<(), QueueError> {
        Ok(self.repository.ping().await?)
    }
}

#[async_trait]
impl<T: TaskQueue + ?Sized> TaskQueue for Arc<T> {
    async fn enqueue(&self, task: NewQueueTask) -> Result<QueueTask, QueueError> {
        (**self).enqueue(task).await
    }

    async fn dequeue_next(&self) -> Result<Option<QueueTask>, QueueError> {
        (**self).dequeue_next().await
    }

    async fn complete(&self, task_id: TaskId) -> Result<(), QueueError> {
        (**self).complete(task_id).await
    }

    async fn schedule_retry(
        &self,
        task_id: TaskId,
        error: &str,
    ) -> Result<TaskStatus, QueueError> {
        (**self).schedule_retry(task_id, error).await
    }

    async fn fail(&self, task_id: TaskId, error: &str) -> Result<(), QueueError> {
        (**self).fail(task_id, error).await
    }

    async fn stats(&self, window_hours: i64) -> Result<QueueStats, QueueError> {
        (**self).stats(window_hours).await
    }

    async fn task_type_stats(&self, window_hours: i64) -> Result<Vec<TaskTypeStats>, QueueError> {
        (**self).task_type_stats(window_hours).await
    }

    async fn cleanup(&self, older_than_days: i64) -> Result<u64, QueueError> {
        (**self).cleanup(older_than_days).await
    }

    async fn recover_processing(&self) -> Result<u64, QueueError> {
        (**self).recover_processing().await
    }

    async fn outstanding(&self) -> Result<u64, QueueError> {
        (**self).outstanding().await
    }

    async fn ping(&self) -> Result<(), QueueError> {
        (**self).ping().await
    }
}

#[cfg(test)]
#[path = "task_queue_test.rs"]
mod tests;
