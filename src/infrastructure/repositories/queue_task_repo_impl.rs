// Copyright 2025 Kirky.X
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use crate::domain::models::queue_task::{NewQueueTask, QueueTask, TaskId, TaskStatus};
use crate::domain::repositories::queue_task_repository::{
    QueueTaskRepository, RepositoryError, StatusStats, TaskTypeStats,
};
use crate::infrastructure::database::entities::sync_queue as queue_entity;
use async_trait::async_trait;
use chrono::{DateTime, FixedOffset, Utc};
use sea_orm::{
    sea_query::{Expr, LockBehavior, LockType},
    ActiveModelTrait, ColumnTrait, Condition, DatabaseConnection, EntityTrait, PaginatorTrait,
    QueryFilter, QueryOrder, QuerySelect, Set, TransactionTrait,
};
use std::collections::BTreeMap;
use std::sync::Arc;

/// 单次 dequeue 最多尝试的候选行数
const MAX_CLAIM_CANDIDATES: usize = 5;

/// 队列任务仓库实现
///
/// 基于SeaORM实现。领取任务时在事务内使用 `FOR UPDATE SKIP LOCKED`
/// 读取候选行，再以带状态条件的更新完成独占领取。
#[derive(Clone)]
pub struct QueueTaskRepositoryImpl {
    /// 数据库连接
    db: Arc<DatabaseConnection>,
}

impl QueueTaskRepositoryImpl {
    /// 创建新的队列任务仓库实例
    ///
    /// # 参数
    ///
    /// * `db` - 数据库连接
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }
}

fn ts(at: DateTime<Utc>) -> DateTime<FixedOffset> {
    at.into()
}

impl TryFrom<queue_entity::Model> for QueueTask {
    type Error = RepositoryError;

    fn try_from(model: queue_entity::Model) -> Result<Self, Self::Error> {
        let status = model
            .status
            .parse::<TaskStatus>()
            .map_err(|e| RepositoryError::Corrupt(format!("sync_queue.id={}: {}", model.id, e)))?;

        Ok(Self {
            id: model.id,
            task_type: model.task_type,
            endpoint: model.endpoint,
            payload: model.payload,
            priority: model.priority,
            status,
            attempt_count: model.attempt_count,
            max_attempts: model.max_attempts,
            next_retry_at: model.next_retry_at.map(|t| t.with_timezone(&Utc)),
            last_error: model.last_error,
            created_at: model.created_at.with_timezone(&Utc),
            updated_at: model.updated_at.with_timezone(&Utc),
            completed_at: model.completed_at.map(|t| t.with_timezone(&Utc)),
            tenant_id: model.tenant_id,
        })
    }
}

fn claimable_condition(now: DateTime<Utc>) -> Condition {
    Condition::all()
        .add(queue_entity::Column::Status.is_in([
            TaskStatus::Pending.as_str(),
            TaskStatus::Retry.as_str(),
        ]))
        .add(
            Condition::any()
                .add(queue_entity::Column::NextRetryAt.is_null())
                .add(queue_entity::Column::NextRetryAt.lte(ts(now))),
        )
}

#[async_trait]
impl QueueTaskRepository for QueueTaskRepositoryImpl {
    async fn insert(&self, task: &NewQueueTask) -> Result<QueueTask, RepositoryError> {
        let now = ts(Utc::now());
        let model = queue_entity::ActiveModel {
            task_type: Set(task.task_type.clone()),
            endpoint: Set(task.endpoint.clone()),
            payload: Set(task.payload.clone()),
            priority: Set(task.priority),
            status: Set(TaskStatus::Pending.to_string()),
            attempt_count: Set(0),
            max_attempts: Set(task.max_attempts),
            next_retry_at: Set(None),
            last_error: Set(None),
            created_at: Set(now),
            updated_at: Set(now),
            completed_at: Set(None),
            tenant_id: Set(task.tenant_id.clone()),
            ..Default::default()
        };

        let inserted = model.insert(self.db.as_ref()).await?;
        QueueTask::try_from(inserted)
    }

    async fn find_by_id(&self, id: TaskId) -> Result<Option<QueueTask>, RepositoryError> {
        let model = queue_entity::Entity::find_by_id(id)
            .one(self.db.as_ref())
            .await?;

        model.map(QueueTask::try_from).transpose()
    }

    async fn claim_next(&self, now: DateTime<Utc>) -> Result<Option<QueueTask>, RepositoryError> {
        let txn = self.db.begin().await?;

        for _ in 0..MAX_CLAIM_CANDIDATES {
            let candidate = queue_entity::Entity::find()
                .filter(claimable_condition(now))
                .order_by_asc(queue_entity::Column::Priority)
                .order_by_asc(queue_entity::Column::CreatedAt)
                .order_by_asc(queue_entity::Column::Id)
                .lock_with_behavior(LockType::Update, LockBehavior::SkipLocked)
                .one(&txn)
                .await?;

            let Some(candidate) = candidate else {
                txn.commit().await?;
                return Ok(None);
            };

            // 带状态条件的更新：只有一个领取者能成功
            let claimed = queue_entity::Entity::update_many()
                .col_expr(
                    queue_entity::Column::Status,
                    Expr::value(TaskStatus::Processing.to_string()),
                )
                .col_expr(queue_entity::Column::UpdatedAt, Expr::value(ts(now)))
                .filter(queue_entity::Column::Id.eq(candidate.id))
                .filter(queue_entity::Column::Status.eq(candidate.status.clone()))
                .exec(&txn)
                .await?;

            if claimed.rows_affected == 1 {
                let updated = queue_entity::Entity::find_by_id(candidate.id)
                    .one(&txn)
                    .await?
                    .ok_or(RepositoryError::NotFound)?;
                txn.commit().await?;
                return QueueTask::try_from(updated).map(Some);
            }
        }

        txn.commit().await?;
        Ok(None)
    }

    async fn mark_completed(
        &self,
        id: TaskId,
        now: DateTime<Utc>,
    ) -> Result<u64, RepositoryError> {
        let result = queue_entity::Entity::update_many()
            .col_expr(
                queue_entity::Column::Status,
                Expr::value(TaskStatus::Completed.to_string()),
            )
            .col_expr(queue_entity::Column::CompletedAt, Expr::value(Some(ts(now))))
            .col_expr(queue_entity::Column::UpdatedAt, Expr::value(ts(now)))
            .filter(queue_entity::Column::Id.eq(id))
            .filter(queue_entity::Column::Status.eq(TaskStatus::Processing.to_string()))
            .exec(self.db.as_ref())
            .await?;

        Ok(result.rows_affected)
    }

    async fn mark_retry(
        &self,
        id: TaskId,
        attempt_count: i32,
        next_retry_at: DateTime<Utc>,
        error: &str,
        now: DateTime<Utc>,
    ) -> Result<u64, RepositoryError> {
        let result = queue_entity::Entity::update_many()
            .col_expr(
                queue_entity::Column::Status,
                Expr::value(TaskStatus::Retry.to_string()),
            )
            .col_expr(queue_entity::Column::AttemptCount, Expr::value(attempt_count))
            .col_expr(
                queue_entity::Column::NextRetryAt,
                Expr::value(Some(ts(next_retry_at))),
            )
            .col_expr(
                queue_entity::Column::LastError,
                Expr::value(Some(error.to_string())),
            )
            .col_expr(queue_entity::Column::UpdatedAt, Expr::value(ts(now)))
            .filter(queue_entity::Column::Id.eq(id))
            .filter(queue_entity::Column::Status.eq(TaskStatus::Processing.to_string()))
            .exec(self.db.as_ref())
            .await?;

        Ok(result.rows_affected)
    }

    async fn mark_failed(
        &self,
        id: TaskId,
        error: &str,
        now: DateTime<Utc>,
    ) -> Result<u64, RepositoryError> {
        let result = queue_entity::Entity::update_many()
            .col_expr(
                queue_entity::Column::Status,
                Expr::value(TaskStatus::Failed.to_string()),
            )
            .col_expr(
                queue_entity::Column::NextRetryAt,
                Expr::value(Option::<DateTime<FixedOffset>>::None),
            )
            .col_expr(
                queue_entity::Column::LastError,
                Expr::value(Some(error.to_string())),
            )
            .col_expr(queue_entity::Column::UpdatedAt, Expr::value(ts(now)))
            .filter(queue_entity::Column::Id.eq(id))
            .filter(queue_entity::Column::Status.eq(TaskStatus::Processing.to_string()))
            .exec(self.db.as_ref())
            .await?;

        Ok(result.rows_affected)
    }

    async fn recover_processing(
        &self,
        next_retry_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<u64, RepositoryError> {
        let result = queue_entity::Entity::update_many()
            .col_expr(
                queue_entity::Column::Status,
                Expr::value(TaskStatus::Retry.to_string()),
            )
            .col_expr(
                queue_entity::Column::NextRetryAt,
                Expr::value(Some(ts(next_retry_at))),
            )
            .col_expr(queue_entity::Column::UpdatedAt, Expr::value(ts(now)))
            .filter(queue_entity::Column::Status.eq(TaskStatus::Processing.to_string()))
            .exec(self.db.as_ref())
            .await?;

        Ok(result.rows_affected)
    }

    async fn count_by_status(&self, statuses: &[TaskStatus]) -> Result<u64, RepositoryError> {
        let count = queue_entity::Entity::find()
            .filter(queue_entity::Column::Status.is_in(statuses.iter().map(|s| s.as_str())))
            .count(self.db.as_ref())
            .await?;

        Ok(count)
    }

    async fn status_stats(&self, since: DateTime<Utc>) -> Result<Vec<StatusStats>, RepositoryError> {
        let rows: Vec<(String, i64, Option<i64>)> = queue_entity::Entity::find()
            .filter(queue_entity::Column::CreatedAt.gte(ts(since)))
            .select_only()
            .column(queue_entity::Column::Status)
            .column_as(queue_entity::Column::Id.count(), "task_count")
            .column_as(queue_entity::Column::AttemptCount.sum(), "attempt_sum")
            .group_by(queue_entity::Column::Status)
            .into_tuple()
            .all(self.db.as_ref())
            .await?;

        let mut stats = Vec::with_capacity(rows.len());
        for (status, count, attempt_sum) in rows {
            let status = status
                .parse::<TaskStatus>()
                .map_err(|e| RepositoryError::Corrupt(e.to_string()))?;
            stats.push(StatusStats {
                status,
                count,
                avg_attempts: average(attempt_sum.unwrap_or(0) as f64, count),
            });
        }
        stats.sort_by_key(|s| s.status);

        Ok(stats)
    }

    async fn task_type_stats(
        &self,
        since: DateTime<Utc>,
    ) -> Result<Vec<TaskTypeStats>, RepositoryError> {
        let rows: Vec<(String, String, i64, Option<i64>)> = queue_entity::Entity::find()
            .filter(queue_entity::Column::CreatedAt.gte(ts(since)))
            .select_only()
            .column(queue_entity::Column::TaskType)
            .column(queue_entity::Column::Status)
            .column_as(queue_entity::Column::Id.count(), "task_count")
            .column_as(queue_entity::Column::AttemptCount.sum(), "attempt_sum")
            .group_by(queue_entity::Column::TaskType)
            .group_by(queue_entity::Column::Status)
            .into_tuple()
            .all(self.db.as_ref())
            .await?;

        // 耗时在应用侧计算，避免依赖数据库方言的时间差函数
        let durations: Vec<(String, DateTime<FixedOffset>, Option<DateTime<FixedOffset>>)> =
            queue_entity::Entity::find()
                .filter(queue_entity::Column::CreatedAt.gte(ts(since)))
                .filter(queue_entity::Column::Status.eq(TaskStatus::Completed.to_string()))
                .select_only()
                .column(queue_entity::Column::TaskType)
                .column(queue_entity::Column::CreatedAt)
                .column(queue_entity::Column::CompletedAt)
                .into_tuple()
                .all(self.db.as_ref())
                .await?;

        let mut by_type: BTreeMap<String, (TaskTypeStats, i64)> = BTreeMap::new();
        for (task_type, status, count, attempt_sum) in rows {
            let (entry, attempts) = by_type.entry(task_type.clone()).or_insert_with(|| {
                (
                    TaskTypeStats {
                        task_type,
                        total: 0,
                        completed: 0,
                        failed: 0,
                        avg_attempts: 0.0,
                        avg_duration_secs: None,
                    },
                    0,
                )
            });
            entry.total += count;
            *attempts += attempt_sum.unwrap_or(0);
            if status == TaskStatus::Completed.as_str() {
                entry.completed += count;
            } else if status == TaskStatus::Failed.as_str() {
                entry.failed += count;
            }
        }

        let mut duration_sums: BTreeMap<String, (f64, i64)> = BTreeMap::new();
        for (task_type, created_at, completed_at) in durations {
            if let Some(completed_at) = completed_at {
                let secs = (completed_at - created_at).num_milliseconds() as f64 / 1000.0;
                let slot = duration_sums.entry(task_type).or_insert((0.0, 0));
                slot.0 += secs.max(0.0);
                slot.1 += 1;
            }
        }

        Ok(by_type
            .into_values()
            .map(|(mut stats, attempts)| {
                stats.avg_attempts = average(attempts as f64, stats.total);
                stats.avg_duration_secs = duration_sums
                    .get(&stats.task_type)
                    .map(|(sum, n)| average(*sum, *n));
                stats
            })
            .collect())
    }

    async fn delete_terminal_before(&self, cutoff: DateTime<Utc>) -> Result<u64, RepositoryError> {
        let result = queue_entity::Entity::delete_many()
            .filter(queue_entity::Column::Status.is_in([
                TaskStatus::Completed.as_str(),
                TaskStatus::Failed.as_str(),
            ]))
            .filter(queue_entity::Column::UpdatedAt.lt(ts(cutoff)))
            .exec(self.db.as_ref())
            .await?;

        Ok(result.rows_affected)
    }

    async fn ping(&self) -> Result<(), RepositoryError> {
        self.db.ping().await?;
        Ok(())
    }
}

fn average(sum: f64, count: i64) -> f64 {
    if count == 0 {
        0.0
    } else {
        sum / count as f64
    }
}

#[cfg(test)]
#[path = "queue_task_repo_impl_test.rs"]
mod tests;
