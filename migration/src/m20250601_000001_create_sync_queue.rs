// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use sea_orm_migration::prelude::*;

/// 同步任务队列表
#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    /// 创建 sync_queue 表及其索引
    ///
    /// # 参数
    ///
    /// * `manager` - 数据库模式管理器
    ///
    /// # 返回值
    ///
    /// * `Ok(())` - 迁移成功
    /// * `Err(DbErr)` - 迁移失败
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(SyncQueue::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(SyncQueue::Id)
                            .integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(SyncQueue::TaskType).string_len(50).not_null())
                    .col(ColumnDef::new(SyncQueue::Endpoint).string_len(200).not_null())
                    .col(ColumnDef::new(SyncQueue::Payload).json_binary().not_null())
                    .col(
                        ColumnDef::new(SyncQueue::Priority)
                            .integer()
                            .not_null()
                            .default(5),
                    )
                    .col(
                        ColumnDef::new(SyncQueue::Status)
                            .string_len(20)
                            .not_null()
                            .default("pending"),
                    )
                    .col(
                        ColumnDef::new(SyncQueue::AttemptCount)
                            .integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(SyncQueue::MaxAttempts)
                            .integer()
                            .not_null()
                            .default(5),
                    )
                    .col(
                        ColumnDef::new(SyncQueue::NextRetryAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(ColumnDef::new(SyncQueue::LastError).text().null())
                    .col(
                        ColumnDef::new(SyncQueue::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(SyncQueue::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(SyncQueue::CompletedAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(SyncQueue::TenantId)
                            .string_len(50)
                            .not_null()
                            .default("default"),
                    )
                    .to_owned(),
            )
            .await?;

        // dequeue 的扫描顺序
        manager
            .create_index(
                Index::create()
                    .name("idx_sync_queue_status")
                    .table(SyncQueue::Table)
                    .col(SyncQueue::Status)
                    .col(SyncQueue::Priority)
                    .col(SyncQueue::NextRetryAt)
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_sync_queue_type")
                    .table(SyncQueue::Table)
                    .col(SyncQueue::TaskType)
                    .col(SyncQueue::Status)
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(SyncQueue::Table).to_owned())
            .await
    }
}

#[derive(Iden)]
enum SyncQueue {
    Table,
    Id,
    TaskType,
    Endpoint,
    Payload,
    Priority,
    Status,
    AttemptCount,
    MaxAttempts,
    NextRetryAt,
    LastError,
    CreatedAt,
    UpdatedAt,
    CompletedAt,
    TenantId,
}
