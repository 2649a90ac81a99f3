// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use sea_orm_migration::prelude::*;

/// 同步结果落地表
///
/// 以 (record_kind, tenant_id, natural_key) 作为业务唯一键，
/// 保证任务至少一次执行时不会产生重复记录
#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(SyncRecords::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(SyncRecords::Id)
                            .integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(SyncRecords::RecordKind).string_len(50).not_null())
                    .col(
                        ColumnDef::new(SyncRecords::TenantId)
                            .string_len(50)
                            .not_null()
                            .default("default"),
                    )
                    .col(ColumnDef::new(SyncRecords::NaturalKey).string_len(200).not_null())
                    .col(ColumnDef::new(SyncRecords::Data).json_binary().not_null())
                    .col(
                        ColumnDef::new(SyncRecords::SyncedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("uq_sync_records_natural_key")
                    .table(SyncRecords::Table)
                    .col(SyncRecords::RecordKind)
                    .col(SyncRecords::TenantId)
                    .col(SyncRecords::NaturalKey)
                    .unique()
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(SyncRecords::Table).to_owned())
            .await
    }
}

#[derive(Iden)]
enum SyncRecords {
    Table,
    Id,
    RecordKind,
    TenantId,
    NaturalKey,
    Data,
    SyncedAt,
}
