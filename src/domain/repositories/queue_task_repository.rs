// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use crate::domain::models::queue_task::{NewQueueTask, QueueTask, TaskId, TaskStatus};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sea_orm::DbErr;
use serde::Serialize;
use thiserror::Error;

/// 仓库错误类型
#[derive(Error, Debug)]
pub enum RepositoryError {
    /// 数据库错误
    #[error("Database error: {0}")]
    Database(#[from] DbErr),
    /// 记录未找到
    #[error("Record not found")]
    NotFound,
    /// 存储中的数据无法映射为领域对象
    #[error("Corrupt row: {0}")]
    Corrupt(String),
}

/// 按状态聚合的队列统计
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatusStats {
    pub status: TaskStatus,
    pub count: i64,
    pub avg_attempts: f64,
}

/// 按任务类型聚合的执行统计
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TaskTypeStats {
    pub task_type: String,
    pub total: i64,
    pub completed: i64,
    pub failed: i64,
    pub avg_attempts: f64,
    /// 已完成任务从创建到完成的平均耗时
    pub avg_duration_secs: Option<f64>,
}

/// 队列任务仓库特质
///
/// 所有状态变更都是带状态条件的更新，返回受影响行数，
/// 调用方据此判断是否抢到了该行。
#[async_trait]
pub trait QueueTaskRepository: Send + Sync {
    /// 插入 pending 任务
    async fn insert(&self, task: &NewQueueTask) -> Result<QueueTask, RepositoryError>;

    /// 根据ID查找任务
    async fn find_by_id(&self, id: TaskId) -> Result<Option<QueueTask>, RepositoryError>;

    /// 独占领取下一个可执行任务并置为 processing
    ///
    /// # 参数
    ///
    /// * `now` - 判定 `next_retry_at` 是否到期的时间
    ///
    /// # 返回值
    ///
    /// * `Ok(Some(task))` - 已领取的任务
    /// * `Ok(None)` - 当前没有可执行任务
    async fn claim_next(&self, now: DateTime<Utc>) -> Result<Option<QueueTask>, RepositoryError>;

    /// processing → completed
    async fn mark_completed(&self, id: TaskId, now: DateTime<Utc>)
        -> Result<u64, RepositoryError>;

    /// processing → retry
    async fn mark_retry(
        &self,
        id: TaskId,
        attempt_count: i32,
        next_retry_at: DateTime<Utc>,
        error: &str,
        now: DateTime<Utc>,
    ) -> Result<u64, RepositoryError>;

    /// processing → failed
    async fn mark_failed(
        &self,
        id: TaskId,
        error: &str,
        now: DateTime<Utc>,
    ) -> Result<u64, RepositoryError>;

    /// 将所有 processing 任务重置为 retry
    async fn recover_processing(
        &self,
        next_retry_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<u64, RepositoryError>;

    /// 统计给定状态的任务数
    async fn count_by_status(&self, statuses: &[TaskStatus]) -> Result<u64, RepositoryError>;

    /// 统计 `since` 之后创建的任务，按状态分组
    async fn status_stats(&self, since: DateTime<Utc>) -> Result<Vec<StatusStats>, RepositoryError>;

    /// 统计 `since` 之后创建的任务，按任务类型分组
    async fn task_type_stats(
        &self,
        since: DateTime<Utc>,
    ) -> Result<Vec<TaskTypeStats>, RepositoryError>;

    /// 删除 `updated_at` 早于 `cutoff` 的终态任务
    async fn delete_terminal_before(&self, cutoff: DateTime<Utc>) -> Result<u64, RepositoryError>;

    /// 检查存储是否可达
    async fn ping(&self) -> Result<(), RepositoryError>;
}
