// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(ApiRateLimits::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(ApiRateLimits::Id)
                            .integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(ApiRateLimits::ApiName).string_len(50).not_null())
                    .col(ColumnDef::new(ApiRateLimits::Endpoint).string_len(200).not_null())
                    .col(
                        ColumnDef::new(ApiRateLimits::TenantId)
                            .string_len(50)
                            .not_null()
                            .default("default"),
                    )
                    .col(ColumnDef::new(ApiRateLimits::CallsPerSecond).double().not_null())
                    .col(ColumnDef::new(ApiRateLimits::BurstSize).integer().not_null())
                    .col(ColumnDef::new(ApiRateLimits::TokensAvailable).double().not_null())
                    .col(
                        ColumnDef::new(ApiRateLimits::LastRefillAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(ApiRateLimits::CallsToday)
                            .integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(ApiRateLimits::CallsThisHour)
                            .integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(ApiRateLimits::LastCallAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .to_owned(),
            )
            .await?;

        // upsert 依赖该唯一约束
        manager
            .create_index(
                Index::create()
                    .name("uq_api_rate_limits_bucket")
                    .table(ApiRateLimits::Table)
                    .col(ApiRateLimits::ApiName)
                    .col(ApiRateLimits::Endpoint)
                    .col(ApiRateLimits::TenantId)
                    .unique()
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(ApiRateLimits::Table).to_owned())
            .await
    }
}

#[derive(Iden)]
enum ApiRateLimits {
    Table,
    Id,
    ApiName,
    Endpoint,
    TenantId,
    CallsPerSecond,
    BurstSize,
    TokensAvailable,
    LastRefillAt,
    CallsToday,
    CallsThisHour,
    LastCallAt,
}
