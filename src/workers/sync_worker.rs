// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::watch;
use tracing::{debug, error, info};

use crate::executor::task_executor::{ExecutionOutcome, TaskExecutor};
use crate::queue::task_queue::{QueueError, TaskQueue};
use crate::utils::errors::WorkerError;
use crate::workers::worker::Worker;

/// 同步工作器
///
/// 单一执行流：领取 → 执行 → 更新状态，一次只处理一个任务。
/// 队列为空时休眠 `idle_interval`；关闭信号只在两个任务之间生效，
/// 正在执行的任务总会自然结束。
pub struct SyncWorker {
    queue: Arc<dyn TaskQueue>,
    executor: Arc<TaskExecutor>,
    idle_interval: Duration,
    error_backoff: Duration,
}

impl SyncWorker {
    /// 创建新的同步工作器实例
    ///
    /// # 参数
    ///
    /// * `queue` - 任务队列
    /// * `executor` - 任务执行器
    /// * `idle_interval` - 队列为空时的休眠时间
    /// * `error_backoff` - 队列操作出错后的等待时间
    pub fn new(
        queue: Arc<dyn TaskQueue>,
        executor: Arc<TaskExecutor>,
        idle_interval: Duration,
        error_backoff: Duration,
    ) -> Self {
        Self {
            queue,
            executor,
            idle_interval,
            error_backoff,
        }
    }

    /// 领取并执行一个任务
    ///
    /// # 返回值
    ///
    /// 队列为空时返回 `Ok(None)`
    pub async fn run_once(&self) -> Result<Option<ExecutionOutcome>, QueueError> {
        match self.queue.dequeue_next().await? {
            Some(task) => Ok(Some(self.executor.execute(&task).await?)),
            None => Ok(None),
        }
    }

    /// 等待指定时间，期间收到关闭信号则提前返回
    async fn pause(&self, duration: Duration, shutdown: &mut watch::Receiver<bool>) {
        tokio::select! {
            _ = tokio::time::sleep(duration) => {}
            _ = shutdown.changed() => {}
        }
    }

    /// 队列操作出错后判断存储是否仍然可用
    async fn recover_from(
        &self,
        err: QueueError,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Result<(), WorkerError> {
        error!("Sync loop error, backing off: {}", err);
        self.pause(self.error_backoff, shutdown).await;
        self.queue
            .ping()
            .await
            .map_err(|e| WorkerError::StorageUnavailable(e.to_string()))
    }
}

#[async_trait]
impl Worker for SyncWorker {
    async fn run(&self, mut shutdown: watch::Receiver<bool>) -> Result<(), WorkerError> {
        info!(idle_secs = self.idle_interval.as_secs(), "Sync worker started");

        while !*shutdown.borrow() {
            match self.run_once().await {
                Ok(Some(outcome)) => debug!(?outcome, "Task processed"),
                Ok(None) => self.pause(self.idle_interval, &mut shutdown).await,
                Err(e) => self.recover_from(e, &mut shutdown).await?,
            }
        }

        info!("Sync worker stopped");
        Ok(())
    }

    fn name(&self) -> &str {
        "sync_worker"
    }
}
