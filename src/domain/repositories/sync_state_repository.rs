// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use crate::domain::models::sync_state::SyncState;
use crate::domain::repositories::queue_task_repository::RepositoryError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// 同步检查点仓库特质
#[async_trait]
pub trait SyncStateRepository: Send + Sync {
    /// 写入检查点，已存在时覆盖 state_data 与 last_checkpoint
    async fn save(
        &self,
        id: &str,
        tenant_id: &str,
        state_data: serde_json::Value,
        now: DateTime<Utc>,
    ) -> Result<SyncState, RepositoryError>;

    /// 读取检查点
    async fn load(&self, id: &str) -> Result<Option<SyncState>, RepositoryError>;
}
