// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use appproft_sync::infrastructure::repositories::queue_task_repo_impl::QueueTaskRepositoryImpl;
use appproft_sync::queue::task_queue::PersistentTaskQueue;
use appproft_sync::utils::retry_policy::RetryPolicy;
use migration::{Migrator, MigratorTrait};
use sea_orm::{Database, DatabaseConnection};
use std::sync::Arc;

/// 已执行迁移的内存数据库
pub async fn memory_db() -> Arc<DatabaseConnection> {
    let db = Database::connect("sqlite::memory:")
        .await
        .expect("Failed to open in-memory database");
    Migrator::up(&db, None)
        .await
        .expect("Failed to run migrations");
    Arc::new(db)
}

pub struct QueueFixture {
    pub db: Arc<DatabaseConnection>,
    pub repo: Arc<QueueTaskRepositoryImpl>,
    pub queue: Arc<PersistentTaskQueue>,
}

pub async fn queue_fixture() -> QueueFixture {
    let db = memory_db().await;
    let repo = Arc::new(QueueTaskRepositoryImpl::new(db.clone()));
    let queue = Arc::new(PersistentTaskQueue::new(repo.clone(), RetryPolicy::standard()));
    QueueFixture { db, repo, queue }
}
