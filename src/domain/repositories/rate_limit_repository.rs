// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use crate::domain::models::rate_limit_bucket::{ApiUsageStats, BucketKey, RateLimitBucket};
use crate::domain::repositories::queue_task_repository::RepositoryError;
use async_trait::async_trait;

/// 限流桶仓库特质
#[async_trait]
pub trait RateLimitRepository: Send + Sync {
    /// 按键加载桶
    async fn find(&self, key: &BucketKey) -> Result<Option<RateLimitBucket>, RepositoryError>;

    /// 批量写入桶状态，按 (api_name, endpoint, tenant_id) 覆盖
    async fn upsert_many(&self, buckets: &[RateLimitBucket]) -> Result<(), RepositoryError>;

    /// 某个租户按 API 汇总的用量
    async fn usage_stats(&self, tenant_id: &str) -> Result<Vec<ApiUsageStats>, RepositoryError>;
}
