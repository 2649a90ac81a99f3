// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

pub use sea_orm_migration::prelude::*;

mod m20250601_000001_create_sync_queue;
mod m20250601_000002_create_api_rate_limits;
mod m20250601_000003_create_sync_state;
mod m20250612_000001_create_sync_records;

/// 数据库迁移器
pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    /// 获取所有迁移
    ///
    /// # 返回值
    ///
    /// 返回迁移列表
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m20250601_000001_create_sync_queue::Migration),
            Box::new(m20250601_000002_create_api_rate_limits::Migration),
            Box::new(m20250601_000003_create_sync_state::Migration),
            Box::new(m20250612_000001_create_sync_records::Migration),
        ]
    }
}
