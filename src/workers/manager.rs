// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use parking_lot::RwLock;
use tokio::sync::watch;
use tracing::{error, info, warn};

use crate::config::settings::WorkerSettings;
use crate::domain::models::sync_state::{LifecyclePhase, SystemCheckpoint, SYSTEM_STATE_ID};
use crate::domain::repositories::sync_state_repository::SyncStateRepository;
use crate::domain::services::rate_limiting_service::RateLimitingService;
use crate::queue::scheduler::TaskScheduler;
use crate::queue::task_queue::TaskQueue;
use crate::utils::errors::WorkerError;
use crate::workers::maintenance_worker::MaintenanceWorker;
use crate::workers::sync_worker::SyncWorker;
use crate::workers::worker::Worker;

/// 管理器生命周期状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ManagerState {
    Stopped,
    Starting,
    Running,
    Restarting,
    ShuttingDown,
}

impl fmt::Display for ManagerState {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let s = match self {
            ManagerState::Stopped => "stopped",
            ManagerState::Starting => "starting",
            ManagerState::Running => "running",
            ManagerState::Restarting => "restarting",
            ManagerState::ShuttingDown => "shutting_down",
        };
        f.write_str(s)
    }
}

/// 滚动窗口内的崩溃计数
#[derive(Debug)]
pub struct CrashTracker {
    ceiling: u32,
    window: Duration,
    crashes: VecDeque<Instant>,
}

impl CrashTracker {
    pub fn new(ceiling: u32, window: Duration) -> Self {
        Self {
            ceiling,
            window,
            crashes: VecDeque::new(),
        }
    }

    /// 记录一次崩溃，返回窗口内的崩溃次数
    pub fn record(&mut self, at: Instant) -> usize {
        while let Some(first) = self.crashes.front() {
            if at.duration_since(*first) > self.window {
                self.crashes.pop_front();
            } else {
                break;
            }
        }
        self.crashes.push_back(at);
        self.crashes.len()
    }

    /// 窗口内崩溃次数是否超过上限
    pub fn exceeded(&self) -> bool {
        self.crashes.len() > self.ceiling as usize
    }
}

/// 管理器配置
#[derive(Debug, Clone)]
pub struct ManagerConfig {
    pub restart_delay: Duration,
    pub max_crash_restarts: u32,
    pub crash_window: Duration,
    pub tenant_id: String,
}

impl From<&WorkerSettings> for ManagerConfig {
    fn from(settings: &WorkerSettings) -> Self {
        Self {
            restart_delay: settings.restart_delay(),
            max_crash_restarts: settings.max_crash_restarts,
            crash_window: settings.crash_window(),
            tenant_id: settings.tenant_id.clone(),
        }
    }
}

/// 工作管理器
///
/// 负责启动流程、运行同步与维护工作器、崩溃后自动重启和优雅关闭
pub struct WorkerManager {
    queue: Arc<dyn TaskQueue>,
    scheduler: Arc<TaskScheduler>,
    sync_worker: Arc<SyncWorker>,
    maintenance_worker: Arc<MaintenanceWorker>,
    rate_limiter: Arc<dyn RateLimitingService>,
    state_repository: Arc<dyn SyncStateRepository>,
    config: ManagerConfig,
    state: RwLock<ManagerState>,
}

impl WorkerManager {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        queue: Arc<dyn TaskQueue>,
        scheduler: Arc<TaskScheduler>,
        sync_worker: Arc<SyncWorker>,
        maintenance_worker: Arc<MaintenanceWorker>,
        rate_limiter: Arc<dyn RateLimitingService>,
        state_repository: Arc<dyn SyncStateRepository>,
        config: ManagerConfig,
    ) -> Self {
        Self {
            queue,
            scheduler,
            sync_worker,
            maintenance_worker,
            rate_limiter,
            state_repository,
            config,
            state: RwLock::new(ManagerState::Stopped),
        }
    }

    pub fn state(&self) -> ManagerState {
        *self.state.read()
    }

    fn set_state(&self, next: ManagerState) {
        let mut state = self.state.write();
        if *state != next {
            info!(from = %*state, to = %next, "Worker manager state changed");
            *state = next;
        }
    }

    /// 写入进程检查点，失败只记录日志
    async fn checkpoint(&self, phase: LifecyclePhase, crash_count: u32, error: Option<String>) {
        let checkpoint = SystemCheckpoint::new(phase, crash_count, error);
        let data = match serde_json::to_value(&checkpoint) {
            Ok(data) => data,
            Err(e) => {
                warn!("Failed to encode checkpoint: {}", e);
                return;
            }
        };
        if let Err(e) = self
            .state_repository
            .save(SYSTEM_STATE_ID, &self.config.tenant_id, data, Utc::now())
            .await
        {
            warn!(phase = ?phase, "Failed to save system checkpoint: {}", e);
        }
    }

    /// 上一次运行留下的检查点
    pub async fn last_checkpoint(&self) -> Option<SystemCheckpoint> {
        match self.state_repository.load(SYSTEM_STATE_ID).await {
            Ok(Some(state)) => serde_json::from_value(state.state_data).ok(),
            Ok(None) => None,
            Err(e) => {
                warn!("Failed to load system checkpoint: {}", e);
                None
            }
        }
    }

    /// 启动流程
    ///
    /// 检查存储 → 恢复 processing 任务 → 队列为空时入队批量同步 → 写入启动检查点
    pub async fn start(&self, crash_count: u32) -> Result<(), WorkerError> {
        self.set_state(ManagerState::Starting);

        self.queue
            .ping()
            .await
            .map_err(|e| WorkerError::StorageUnavailable(e.to_string()))?;

        if let Some(previous) = self.last_checkpoint().await {
            if previous.phase == LifecyclePhase::Crashed {
                warn!(
                    at = %previous.at,
                    pid = previous.pid,
                    error = previous.error.as_deref().unwrap_or(""),
                    "Previous run ended in a crash"
                );
            }
        }

        self.queue.recover_processing().await?;
        if self.queue.outstanding().await? == 0 {
            info!("Queue is empty, enqueuing bulk sync task set");
            self.scheduler.enqueue_bulk_sync().await?;
        }

        self.checkpoint(LifecyclePhase::Started, crash_count, None).await;
        Ok(())
    }

    /// 运行同步与维护工作器，直到关闭或任一工作器出错
    ///
    /// 维护工作器在运行中崩溃时先停止同步工作器（等待进行中的任务结束），
    /// 再返回错误交给崩溃重启流程处理。
    async fn run_workers(&self, mut shutdown: watch::Receiver<bool>) -> Result<(), WorkerError> {
        self.set_state(ManagerState::Running);

        let (stop_tx, stop_rx) = watch::channel(*shutdown.borrow());
        let maintenance = self.maintenance_worker.clone();
        let mut maintenance_handle = {
            let stop_rx = stop_rx.clone();
            tokio::spawn(async move { maintenance.run(stop_rx).await })
        };
        let sync = self.sync_worker.clone();
        let mut sync_handle = tokio::spawn(async move { sync.run(stop_rx).await });

        let mut stopping = *shutdown.borrow();
        let mut maintenance_done = false;
        let result = loop {
            tokio::select! {
                joined = &mut sync_handle => {
                    break match joined {
                        Ok(result) => result,
                        Err(e) => Err(WorkerError::Panicked(e.to_string())),
                    };
                }
                joined = &mut maintenance_handle, if !maintenance_done => {
                    maintenance_done = true;
                    let err = match joined {
                        Ok(Ok(())) => continue,
                        Ok(Err(e)) => e,
                        Err(e) => WorkerError::Panicked(e.to_string()),
                    };
                    if stopping {
                        error!("Maintenance worker failed during shutdown: {}", err);
                        continue;
                    }
                    error!("Maintenance worker crashed, stopping sync worker: {}", err);
                    let _ = stop_tx.send(true);
                    match (&mut sync_handle).await {
                        Ok(Ok(())) => {}
                        Ok(Err(e)) => error!("Sync worker failed while stopping: {}", e),
                        Err(e) => error!("Sync worker panicked while stopping: {}", e),
                    }
                    return Err(err);
                }
                changed = shutdown.changed(), if !stopping => {
                    if changed.is_err() || *shutdown.borrow() {
                        stopping = true;
                        let _ = stop_tx.send(true);
                    }
                }
            }
        };

        let _ = stop_tx.send(true);
        if !maintenance_done {
            match maintenance_handle.await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => error!("Maintenance worker failed: {}", e),
                Err(e) => error!("Maintenance worker panicked: {}", e),
            }
        }
        result
    }

    /// 关闭：写回限流状态并写入关闭检查点
    async fn shutdown(&self, crash_count: u32) {
        self.set_state(ManagerState::ShuttingDown);
        match self.rate_limiter.flush().await {
            Ok(buckets) => info!(buckets, "Rate limit state flushed"),
            Err(e) => error!("Failed to flush rate limit state: {}", e),
        }
        self.checkpoint(LifecyclePhase::Shutdown, crash_count, None).await;
        self.set_state(ManagerState::Stopped);
    }

    /// 运行直到收到关闭信号
    ///
    /// 启动或运行中出错时记录崩溃检查点，延迟 `restart_delay` 后重新执行启动流程。
    /// 滚动窗口内崩溃次数超过上限时返回 `WorkerError::CrashLoop`。
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> Result<(), WorkerError> {
        let mut crashes = CrashTracker::new(self.config.max_crash_restarts, self.config.crash_window);
        let mut crash_count = 0u32;

        loop {
            let result = match self.start(crash_count).await {
                Ok(()) => self.run_workers(shutdown.clone()).await,
                Err(e) => Err(e),
            };

            let err = match result {
                Ok(()) => break,
                Err(e) => e,
            };
            if *shutdown.borrow() {
                error!("Worker error during shutdown: {}", err);
                break;
            }

            let count = crashes.record(Instant::now());
            crash_count = count as u32;
            error!(crashes = count, "Worker crashed: {}", err);
            self.checkpoint(LifecyclePhase::Crashed, crash_count, Some(err.to_string()))
                .await;

            if crashes.exceeded() {
                error!(
                    crashes = count,
                    window_secs = self.config.crash_window.as_secs(),
                    "Crash ceiling exceeded, giving up"
                );
                self.set_state(ManagerState::Stopped);
                return Err(WorkerError::CrashLoop {
                    crashes: count,
                    window_secs: self.config.crash_window.as_secs(),
                });
            }

            self.set_state(ManagerState::Restarting);
            tokio::select! {
                _ = tokio::time::sleep(self.config.restart_delay) => {}
                _ = shutdown.changed() => {}
            }
            if *shutdown.borrow() {
                break;
            }
        }

        self.shutdown(crash_count).await;
        Ok(())
    }
}

#[cfg(test)]
#[path = "manager_test.rs"]
mod tests;
