// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use metrics::gauge;
use parking_lot::Mutex;
use sysinfo::{ProcessesToUpdate, System};
use tokio::sync::watch;
use tokio::time::{interval_at, MissedTickBehavior};
use tracing::{error, info, warn};

use crate::config::settings::WorkerSettings;
use crate::domain::models::queue_task::TaskStatus;
use crate::queue::scheduler::TaskScheduler;
use crate::queue::task_queue::{QueueError, QueueStats, TaskQueue};
use crate::utils::errors::WorkerError;
use crate::workers::worker::Worker;

/// 维护工作器配置
#[derive(Debug, Clone)]
pub struct MaintenanceConfig {
    pub bulk_sync_interval: Duration,
    pub health_check_interval: Duration,
    pub cleanup_interval: Duration,
    pub cleanup_age_days: i64,
    pub stats_window_hours: i64,
    /// 进程内存告警阈值（字节）
    pub memory_warn_bytes: u64,
    pub failure_rate_warn: f64,
}

impl From<&WorkerSettings> for MaintenanceConfig {
    fn from(settings: &WorkerSettings) -> Self {
        Self {
            bulk_sync_interval: settings.bulk_sync_interval(),
            health_check_interval: settings.health_check_interval(),
            cleanup_interval: settings.cleanup_interval(),
            cleanup_age_days: settings.cleanup_age_days,
            stats_window_hours: settings.stats_window_hours,
            memory_warn_bytes: settings.memory_warn_mb * 1024 * 1024,
            failure_rate_warn: settings.failure_rate_warn,
        }
    }
}

/// 健康检查告警
#[derive(Debug, Clone, PartialEq)]
pub enum HealthWarning {
    /// 窗口内失败任务占比过高
    HighFailureRate(f64),
    /// 进程常驻内存过高（字节）
    HighMemory(u64),
}

/// 一次健康检查的结果
#[derive(Debug, Clone)]
pub struct HealthReport {
    pub stats: QueueStats,
    pub outstanding: u64,
    pub memory_bytes: Option<u64>,
    pub uptime: Duration,
    pub warnings: Vec<HealthWarning>,
}

/// 根据阈值评估统计和内存
pub fn evaluate_health(
    stats: &QueueStats,
    memory_bytes: Option<u64>,
    config: &MaintenanceConfig,
) -> Vec<HealthWarning> {
    let mut warnings = Vec::new();
    let failure_rate = stats.failure_rate();
    if stats.total() > 0 && failure_rate > config.failure_rate_warn {
        warnings.push(HealthWarning::HighFailureRate(failure_rate));
    }
    if let Some(bytes) = memory_bytes.filter(|b| *b > config.memory_warn_bytes) {
        warnings.push(HealthWarning::HighMemory(bytes));
    }
    warnings
}

/// 维护工作器
///
/// 与同步循环并行运行三个独立定时器：批量同步入队、健康检查、旧任务清理。
/// 定时器出错只记录日志，不会中断工作器。
pub struct MaintenanceWorker {
    queue: Arc<dyn TaskQueue>,
    scheduler: Arc<TaskScheduler>,
    config: MaintenanceConfig,
    system: Mutex<System>,
    started_at: Instant,
}

impl MaintenanceWorker {
    pub fn new(
        queue: Arc<dyn TaskQueue>,
        scheduler: Arc<TaskScheduler>,
        config: MaintenanceConfig,
    ) -> Self {
        Self {
            queue,
            scheduler,
            config,
            system: Mutex::new(System::new()),
            started_at: Instant::now(),
        }
    }

    /// 入队标准批量同步任务集
    pub async fn bulk_enqueue(&self) -> Result<usize, QueueError> {
        let ids = self.scheduler.enqueue_bulk_sync().await?;
        Ok(ids.len())
    }

    /// 当前进程常驻内存（字节）
    fn process_memory(&self) -> Option<u64> {
        let pid = sysinfo::get_current_pid().ok()?;
        let mut system = self.system.lock();
        system.refresh_processes(ProcessesToUpdate::Some(&[pid]), true);
        system.process(pid).map(|p| p.memory())
    }

    /// 执行健康检查并更新仪表
    pub async fn health_check(&self) -> Result<HealthReport, QueueError> {
        let stats = self.queue.stats(self.config.stats_window_hours).await?;
        let outstanding = self.queue.outstanding().await?;
        let memory_bytes = self.process_memory();

        for status in TaskStatus::ALL {
            gauge!("sync_queue_depth", "status" => status.as_str()).set(stats.count(status) as f64);
        }
        if let Some(bytes) = memory_bytes {
            gauge!("sync_process_memory_bytes").set(bytes as f64);
        }

        let warnings = evaluate_health(&stats, memory_bytes, &self.config);
        for warning in &warnings {
            match warning {
                HealthWarning::HighFailureRate(rate) => warn!(
                    failure_rate = rate,
                    window_hours = self.config.stats_window_hours,
                    "High task failure rate"
                ),
                HealthWarning::HighMemory(bytes) => {
                    warn!(memory_mb = bytes / 1024 / 1024, "High process memory usage")
                }
            }
        }

        let report = HealthReport {
            stats,
            outstanding,
            memory_bytes,
            uptime: self.started_at.elapsed(),
            warnings,
        };
        info!(
            total = report.stats.total(),
            pending = report.stats.count(TaskStatus::Pending),
            processing = report.stats.count(TaskStatus::Processing),
            completed = report.stats.count(TaskStatus::Completed),
            failed = report.stats.count(TaskStatus::Failed),
            retry = report.stats.count(TaskStatus::Retry),
            outstanding = report.outstanding,
            memory_mb = report.memory_bytes.map(|b| b / 1024 / 1024),
            uptime_secs = report.uptime.as_secs(),
            "Health check"
        );
        Ok(report)
    }

    /// 清理过期的终态任务
    pub async fn cleanup(&self) -> Result<u64, QueueError> {
        self.queue.cleanup(self.config.cleanup_age_days).await
    }
}

#[async_trait]
impl Worker for MaintenanceWorker {
    async fn run(&self, mut shutdown: watch::Receiver<bool>) -> Result<(), WorkerError> {
        let now = tokio::time::Instant::now();
        // 启动流程已经处理过一次入队和恢复，定时器从一个周期之后开始
        let mut bulk = interval_at(now + self.config.bulk_sync_interval, self.config.bulk_sync_interval);
        let mut health =
            interval_at(now + self.config.health_check_interval, self.config.health_check_interval);
        let mut cleanup = interval_at(now + self.config.cleanup_interval, self.config.cleanup_interval);
        for timer in [&mut bulk, &mut health, &mut cleanup] {
            timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
        }

        info!("Maintenance worker started");
        loop {
            tokio::select! {
                _ = bulk.tick() => {
                    if let Err(e) = self.bulk_enqueue().await {
                        error!("Periodic bulk sync enqueue failed: {}", e);
                    }
                }
                _ = health.tick() => {
                    if let Err(e) = self.health_check().await {
                        error!("Health check failed: {}", e);
                    }
                }
                _ = cleanup.tick() => {
                    if let Err(e) = self.cleanup().await {
                        error!("Queue cleanup failed: {}", e);
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        info!("Maintenance worker stopped");
        Ok(())
    }

    fn name(&self) -> &str {
        "maintenance_worker"
    }
}
