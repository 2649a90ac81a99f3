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

use std::sync::Arc;

use appproft_sync::config::settings::Settings;
use appproft_sync::executor::handlers::polling::PollSettings;
use appproft_sync::executor::handlers::HandlerContext;
use appproft_sync::executor::{HandlerRouter, TaskExecutor};
use appproft_sync::infrastructure::database::connection;
use appproft_sync::infrastructure::metrics;
use appproft_sync::infrastructure::repositories::data_sink_impl::SeaOrmDataSink;
use appproft_sync::infrastructure::repositories::queue_task_repo_impl::QueueTaskRepositoryImpl;
use appproft_sync::infrastructure::repositories::rate_limit_repo_impl::RateLimitRepositoryImpl;
use appproft_sync::infrastructure::repositories::sync_state_repo_impl::SyncStateRepositoryImpl;
use appproft_sync::infrastructure::services::marketplace_client::{
    HttpMarketplaceClient, RateLimitedMarketplace,
};
use appproft_sync::infrastructure::services::notification_service_impl::WebhookNotifier;
use appproft_sync::infrastructure::services::rate_limiting_service_impl::{
    RateLimitingConfig, RateLimitingServiceImpl,
};
use appproft_sync::queue::scheduler::TaskScheduler;
use appproft_sync::queue::task_queue::PersistentTaskQueue;
use appproft_sync::utils::telemetry;
use appproft_sync::workers::maintenance_worker::MaintenanceWorker;
use appproft_sync::workers::manager::WorkerManager;
use appproft_sync::workers::sync_worker::SyncWorker;
use tokio::sync::watch;
use tracing::{error, info};

/// 主函数
///
/// 初始化所有组件并运行同步管理器，直到收到关闭信号
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 1. Load configuration
    let settings = Settings::new()?;

    // 2. Initialize logging and metrics
    telemetry::init_telemetry(settings.telemetry.json_logs);
    info!("Starting appproft-sync...");
    metrics::init_metrics(settings.telemetry.metrics_addr.as_deref());

    // 3. Connect to database
    let db = Arc::new(connection::create_pool(&settings.database).await?);
    info!("Running database migrations...");
    connection::run_migrations(db.as_ref()).await?;
    info!("Database migrations applied");

    // 4. Rate limiter with periodic write-back
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let rate_limiter = Arc::new(RateLimitingServiceImpl::new(
        Arc::new(RateLimitRepositoryImpl::new(db.clone())),
        RateLimitingConfig {
            table: settings.rate_limiting.table(),
            flush_interval: settings.rate_limiting.flush_interval(),
        },
    ));
    let flush_handle = rate_limiter.clone().start_flush_task(shutdown_rx.clone());

    // 5. Queue and scheduler
    let queue = Arc::new(
        PersistentTaskQueue::new(
            Arc::new(QueueTaskRepositoryImpl::new(db.clone())),
            settings.worker.retry_policy(),
        )
        .with_recovery_delay(settings.worker.recovery_delay_secs),
    );
    let scheduler = Arc::new(
        TaskScheduler::new(queue.clone())
            .with_tenant(settings.worker.tenant_id.clone())
            .with_max_attempts(settings.worker.default_max_attempts),
    );

    // 6. Handlers and executor
    let marketplace = RateLimitedMarketplace::new(
        HttpMarketplaceClient::new((&settings.marketplace).into())?,
        rate_limiter.clone(),
        settings.rate_limiting.max_wait(),
    );
    let context = HandlerContext {
        marketplace: Arc::new(marketplace),
        sink: Arc::new(SeaOrmDataSink::new(db.clone())),
        notifier: Arc::new(WebhookNotifier::new((&settings.notifications).into())?),
        marketplace_id: settings.marketplace.marketplace_id.clone(),
        poll: PollSettings {
            interval: settings.marketplace.report_poll_interval(),
            max_wait: settings.marketplace.report_max_wait(),
        },
    };
    let executor = Arc::new(
        TaskExecutor::new(queue.clone(), Arc::new(HandlerRouter::new(context)))
            .with_fail_fast(settings.worker.fail_fast_permanent_errors),
    );

    // 7. Workers
    let sync_worker = Arc::new(SyncWorker::new(
        queue.clone(),
        executor,
        settings.worker.idle_interval(),
        settings.worker.error_backoff(),
    ));
    let maintenance_worker = Arc::new(MaintenanceWorker::new(
        queue.clone(),
        scheduler.clone(),
        (&settings.worker).into(),
    ));
    let manager = WorkerManager::new(
        queue,
        scheduler,
        sync_worker,
        maintenance_worker,
        rate_limiter,
        Arc::new(SyncStateRepositoryImpl::new(db.clone())),
        (&settings.worker).into(),
    );

    let shutdown_tx = Arc::new(shutdown_tx);
    tokio::spawn({
        let shutdown_tx = shutdown_tx.clone();
        async move {
            shutdown_signal().await;
            info!("Shutdown signal received");
            let _ = shutdown_tx.send(true);
        }
    });

    let result = manager.run(shutdown_rx).await;
    // 崩溃上限退出时也要停止写回任务
    let _ = shutdown_tx.send(true);
    if let Err(e) = flush_handle.await {
        error!("Rate limit flush task panicked: {}", e);
    }

    match result {
        Ok(()) => {
            info!("appproft-sync stopped");
            Ok(())
        }
        Err(e) => {
            error!("appproft-sync terminated: {}", e);
            Err(e.into())
        }
    }
}

/// 等待 Ctrl+C 或 SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Unable to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!("Unable to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
