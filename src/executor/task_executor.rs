// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use std::sync::Arc;
use std::time::Instant;

use metrics::{counter, histogram};
use tracing::{error, info, instrument, warn};

use crate::domain::models::queue_task::{ErrorClass, QueueTask, TaskStatus};
use crate::executor::router::HandlerRouter;
use crate::queue::task_queue::{QueueError, TaskQueue};

/// 一次执行对任务状态的影响
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionOutcome {
    Completed,
    /// 已安排下一次重试
    Retrying,
    Failed,
}

/// 任务执行器
///
/// 执行器是处理器与队列状态之间唯一的边界：每次执行都恰好产生一次
/// `completed`、`retry` 或 `failed` 转换。只有队列存储本身的错误会向上传播。
pub struct TaskExecutor {
    queue: Arc<dyn TaskQueue>,
    router: Arc<HandlerRouter>,
    /// 为 true 时永久性错误不再重试
    fail_fast_permanent_errors: bool,
}

impl TaskExecutor {
    pub fn new(queue: Arc<dyn TaskQueue>, router: Arc<HandlerRouter>) -> Self {
        Self {
            queue,
            router,
            fail_fast_permanent_errors: false,
        }
    }

    pub fn with_fail_fast(mut self, enabled: bool) -> Self {
        self.fail_fast_permanent_errors = enabled;
        self
    }

    /// 执行一个已领取的任务并更新其队列状态
    ///
    /// # 参数
    ///
    /// * `task` - 处于 processing 状态的任务
    ///
    /// # 返回值
    ///
    /// * `Ok(ExecutionOutcome)` - 任务的新状态
    /// * `Err(QueueError)` - 队列状态无法更新
    #[instrument(skip(self, task), fields(task_id = task.id, task_type = %task.task_type, attempt = task.attempt_count))]
    pub async fn execute(&self, task: &QueueTask) -> Result<ExecutionOutcome, QueueError> {
        let handler = match self.router.route(&task.task_type) {
            Ok(handler) => handler,
            Err(e) => {
                error!("No handler registered: {}", e);
                self.queue.fail(task.id, &e.to_string()).await?;
                counter!("sync_tasks_failed_total", "reason" => "unknown_task_type").increment(1);
                return Ok(ExecutionOutcome::Failed);
            }
        };

        let started = Instant::now();
        let result = handler.execute(task).await;
        histogram!("sync_task_duration_seconds", "task_type" => task.task_type.clone())
            .record(started.elapsed().as_secs_f64());

        match result {
            Ok(summary) => {
                self.queue.complete(task.id).await?;
                counter!("sync_tasks_completed_total").increment(1);
                info!(
                    duration_ms = started.elapsed().as_millis() as u64,
                    result = %summary,
                    "Task completed"
                );
                Ok(ExecutionOutcome::Completed)
            }
            Err(e) => {
                let class = e.class();
                let message = e.to_string();

                if class == ErrorClass::Permanent && self.fail_fast_permanent_errors {
                    warn!(class = %class, "Task failed permanently: {}", message);
                    self.queue.fail(task.id, &message).await?;
                    counter!("sync_tasks_failed_total", "reason" => "permanent").increment(1);
                    return Ok(ExecutionOutcome::Failed);
                }

                warn!(class = %class, "Task execution failed: {}", message);
                match self.queue.schedule_retry(task.id, &message).await? {
                    TaskStatus::Retry => {
                        counter!("sync_tasks_retried_total").increment(1);
                        Ok(ExecutionOutcome::Retrying)
                    }
                    _ => {
                        counter!("sync_tasks_failed_total", "reason" => "exhausted").increment(1);
                        Ok(ExecutionOutcome::Failed)
                    }
                }
            }
        }
    }
}
