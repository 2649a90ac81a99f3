// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

#[cfg(test)]
mod tests {
    use crate::domain::models::queue_task::{NewQueueTask, QueueTask, TaskId, TaskStatus};
    use crate::domain::models::sync_state::LifecyclePhase;
    use crate::domain::repositories::queue_task_repository::{
        QueueTaskRepository, RepositoryError, TaskTypeStats,
    };
    use crate::executor::router::HandlerRouter;
    use crate::executor::task_executor::TaskExecutor;
    use crate::infrastructure::repositories::queue_task_repo_impl::QueueTaskRepositoryImpl;
    use crate::infrastructure::repositories::rate_limit_repo_impl::RateLimitRepositoryImpl;
    use crate::infrastructure::repositories::sync_state_repo_impl::SyncStateRepositoryImpl;
    use crate::infrastructure::services::rate_limiting_service_impl::{
        RateLimitingConfig, RateLimitingServiceImpl,
    };
    use crate::queue::scheduler::TaskScheduler;
    use crate::queue::task_queue::{PersistentTaskQueue, QueueError, QueueStats, TaskQueue};
    use crate::utils::errors::WorkerError;
    use crate::utils::retry_policy::RetryPolicy;
    use crate::workers::maintenance_worker::{MaintenanceConfig, MaintenanceWorker};
    use crate::workers::manager::{CrashTracker, ManagerConfig, ManagerState, WorkerManager};
    use crate::workers::sync_worker::SyncWorker;
    use async_trait::async_trait;
    use migration::{Migrator, MigratorTrait};
    use sea_orm::{Database, DbErr};
    use serde_json::json;
    use std::sync::Arc;
    use std::time::{Duration, Instant};
    use tokio::sync::watch;

    /// 存储不可达的队列
    struct DownQueue;

    fn down() -> QueueError {
        QueueError::Repository(RepositoryError::Database(DbErr::Custom("connection refused".into())))
    }

    #[async_trait]
    impl TaskQueue for DownQueue {
        async fn enqueue(&self, _task: NewQueueTask) -> Result<QueueTask, QueueError> {
            Err(down())
        }
        async fn dequeue_next(&self) -> Result<Option<QueueTask>, QueueError> {
            Err(down())
        }
        async fn complete(&self, _task_id: TaskId) -> Result<(), QueueError> {
            Err(down())
        }
        async fn schedule_retry(&self, _task_id: TaskId, _error: &str) -> Result<TaskStatus, QueueError> {
            Err(down())
        }
        async fn fail(&self, _task_id: TaskId, _error: &str) -> Result<(), QueueError> {
            Err(down())
        }
        async fn stats(&self, _window_hours: i64) -> Result<QueueStats, QueueError> {
            Err(down())
        }
        async fn task_type_stats(&self, _window_hours: i64) -> Result<Vec<TaskTypeStats>, QueueError> {
            Err(down())
        }
        async fn cleanup(&self, _older_than_days: i64) -> Result<u64, QueueError> {
            Err(down())
        }
        async fn recover_processing(&self) -> Result<u64, QueueError> {
            Err(down())
        }
        async fn outstanding(&self) -> Result<u64, QueueError> {
            Err(down())
        }
        async fn ping(&self) -> Result<(), QueueError> {
            Err(down())
        }
    }

    struct Fixture {
        manager: Arc<WorkerManager>,
        repo: Arc<QueueTaskRepositoryImpl>,
        queue: Arc<PersistentTaskQueue>,
    }

    fn maintenance_config() -> MaintenanceConfig {
        MaintenanceConfig {
            bulk_sync_interval: Duration::from_secs(3600),
            health_check_interval: Duration::from_secs(3600),
            cleanup_interval: Duration::from_secs(3600),
            cleanup_age_days: 7,
            stats_window_hours: 24,
            memory_warn_bytes: u64::MAX,
            failure_rate_warn: 0.5,
        }
    }

    async fn fixture(manager_queue: Option<Arc<dyn TaskQueue>>, max_crash_restarts: u32) -> Fixture {
        fixture_with(manager_queue, max_crash_restarts, maintenance_config()).await
    }

    async fn fixture_with(
        manager_queue: Option<Arc<dyn TaskQueue>>,
        max_crash_restarts: u32,
        maintenance_config: MaintenanceConfig,
    ) -> Fixture {
        let db = Arc::new(Database::connect("sqlite::memory:").await.unwrap());
        Migrator::up(db.as_ref(), None).await.unwrap();

        let repo = Arc::new(QueueTaskRepositoryImpl::new(db.clone()));
        let queue = Arc::new(PersistentTaskQueue::new(repo.clone(), RetryPolicy::standard()));
        let scheduler = Arc::new(TaskScheduler::new(queue.clone()));
        let executor = Arc::new(TaskExecutor::new(queue.clone(), Arc::new(HandlerRouter::empty())));
        let sync_worker = Arc::new(SyncWorker::new(
            queue.clone(),
            executor,
            Duration::from_millis(20),
            Duration::from_millis(20),
        ));
        let maintenance = Arc::new(MaintenanceWorker::new(
            queue.clone(),
            scheduler.clone(),
            maintenance_config,
        ));
        let limiter = Arc::new(RateLimitingServiceImpl::new(
            Arc::new(RateLimitRepositoryImpl::new(db.clone())),
            RateLimitingConfig::default(),
        ));

        let manager = Arc::new(WorkerManager::new(
            manager_queue.unwrap_or_else(|| queue.clone()),
            scheduler,
            sync_worker,
            maintenance,
            limiter,
            Arc::new(SyncStateRepositoryImpl::new(db.clone())),
            ManagerConfig {
                restart_delay: Duration::from_millis(5),
                max_crash_restarts,
                crash_window: Duration::from_secs(60),
                tenant_id: "default".to_string(),
            },
        ));
        Fixture { manager, repo, queue }
    }

    #[test]
    fn test_crash_tracker_forgets_old_crashes() {
        let mut tracker = CrashTracker::new(2, Duration::from_secs(10));
        let t0 = Instant::now();

        assert_eq!(tracker.record(t0), 1);
        assert_eq!(tracker.record(t0 + Duration::from_secs(1)), 2);
        assert!(!tracker.exceeded());
        // 第一次崩溃已离开窗口
        assert_eq!(tracker.record(t0 + Duration::from_secs(11)), 2);
        assert!(!tracker.exceeded());
        // t0+1s 距 t0+12s 已超过 10 秒
        assert_eq!(tracker.record(t0 + Duration::from_secs(12)), 2);
        assert!(!tracker.exceeded());
        // 三次崩溃落在同一窗口内
        assert_eq!(tracker.record(t0 + Duration::from_millis(12_500)), 3);
        assert!(tracker.exceeded());
    }

    #[tokio::test]
    async fn test_start_recovers_and_seeds_empty_queue() {
        let f = fixture(None, 3).await;
        assert_eq!(f.manager.state(), ManagerState::Stopped);

        f.manager.start(0).await.unwrap();

        assert_eq!(f.manager.state(), ManagerState::Starting);
        assert_eq!(f.queue.outstanding().await.unwrap(), 6);
        let checkpoint = f.manager.last_checkpoint().await.unwrap();
        assert_eq!(checkpoint.phase, LifecyclePhase::Started);
    }

    #[tokio::test]
    async fn test_start_resets_processing_without_reseeding() {
        let f = fixture(None, 3).await;
        let id = f.queue.enqueue_task("fetch_orders", "/x", json!({}), 1).await.unwrap();
        f.queue.dequeue_next().await.unwrap().unwrap();

        f.manager.start(0).await.unwrap();

        let task = f.repo.find_by_id(id).await.unwrap().unwrap();
        assert_eq!(task.status, TaskStatus::Retry);
        assert!(task.next_retry_at.is_some());
        assert_eq!(f.queue.outstanding().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_run_until_shutdown_writes_shutdown_checkpoint() {
        let f = fixture(None, 3).await;
        let (tx, rx) = watch::channel(false);
        let handle = tokio::spawn({
            let manager = f.manager.clone();
            async move { manager.run(rx).await }
        });

        for _ in 0..100 {
            if f.manager.state() == ManagerState::Running {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(f.manager.state(), ManagerState::Running);

        tx.send(true).unwrap();
        handle.await.unwrap().unwrap();

        assert_eq!(f.manager.state(), ManagerState::Stopped);
        let checkpoint = f.manager.last_checkpoint().await.unwrap();
        assert_eq!(checkpoint.phase, LifecyclePhase::Shutdown);
    }

    #[tokio::test]
    async fn test_storage_outage_hits_crash_ceiling() {
        let f = fixture(Some(Arc::new(DownQueue)), 2).await;
        let (_tx, rx) = watch::channel(false);

        let err = f.manager.run(rx).await.unwrap_err();

        assert!(matches!(err, WorkerError::CrashLoop { crashes: 3, .. }));
        assert_eq!(f.manager.state(), ManagerState::Stopped);
        let checkpoint = f.manager.last_checkpoint().await.unwrap();
        assert_eq!(checkpoint.phase, LifecyclePhase::Crashed);
        assert_eq!(checkpoint.crash_count, 3);
        assert!(checkpoint.error.unwrap().contains("connection refused"));
    }

    #[tokio::test]
    async fn test_maintenance_panic_is_treated_as_crash() {
        // 零周期的定时器会在维护工作器内 panic，同步工作器本身一切正常
        let f = fixture_with(
            None,
            1,
            MaintenanceConfig {
                bulk_sync_interval: Duration::ZERO,
                ..maintenance_config()
            },
        )
        .await;
        let (_tx, rx) = watch::channel(false);

        let err = tokio::time::timeout(Duration::from_secs(5), f.manager.run(rx))
            .await
            .expect("manager kept running after maintenance worker panicked")
            .unwrap_err();

        assert!(matches!(err, WorkerError::CrashLoop { crashes: 2, .. }));
        assert_eq!(f.manager.state(), ManagerState::Stopped);
        let checkpoint = f.manager.last_checkpoint().await.unwrap();
        assert_eq!(checkpoint.phase, LifecyclePhase::Crashed);
        assert!(checkpoint.error.unwrap().contains("panicked"));
    }
}
