// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;
use tracing::debug;

use crate::domain::models::rate_limit_bucket::{ApiUsageStats, RateLimitDecision};
use crate::domain::repositories::queue_task_repository::RepositoryError;

/// 两次尝试之间的最短休眠
pub const MIN_WAIT_SLEEP: Duration = Duration::from_millis(100);

/// 限流服务接口
///
/// 按 (api, 端点模式, 租户) 维护令牌桶，控制对外部 API 的调用速率
#[async_trait]
pub trait RateLimitingService: Send + Sync {
    /// 非阻塞地检查并扣减一个令牌
    ///
    /// # 参数
    ///
    /// * `api` - API 名称，如 `sp-api`
    /// * `endpoint` - 原始端点路径，内部解析为端点模式
    /// * `tenant_id` - 租户ID
    ///
    /// # 返回值
    ///
    /// 放行时 `wait_time_ms` 为 0，否则为下一个令牌可用前的最短等待时间
    async fn check_and_consume(
        &self,
        api: &str,
        endpoint: &str,
        tenant_id: &str,
    ) -> Result<RateLimitDecision, RateLimitingError>;

    /// 等待直到拿到令牌或超过 `max_wait`
    ///
    /// 只挂起当前任务，不阻塞运行时的其他任务
    async fn wait_for_token(
        &self,
        api: &str,
        endpoint: &str,
        tenant_id: &str,
        max_wait: Duration,
    ) -> Result<(), RateLimitingError> {
        let started = Instant::now();
        loop {
            let decision = self.check_and_consume(api, endpoint, tenant_id).await?;
            if decision.allowed {
                return Ok(());
            }

            let waited = started.elapsed();
            if waited >= max_wait {
                return Err(RateLimitingError::Timeout {
                    api: api.to_string(),
                    endpoint: endpoint.to_string(),
                    waited_ms: waited.as_millis() as u64,
                });
            }

            let sleep = Duration::from_millis(decision.wait_time_ms).max(MIN_WAIT_SLEEP);
            debug!(
                api,
                endpoint,
                wait_ms = sleep.as_millis() as u64,
                "Rate limited, waiting for token"
            );
            tokio::time::sleep(sleep.min(max_wait.saturating_sub(waited).max(MIN_WAIT_SLEEP)))
                .await;
        }
    }

    /// 将缓存中的所有桶写入持久化存储，返回写入的桶数量
    async fn flush(&self) -> Result<usize, RateLimitingError>;

    /// 某个租户按 API 汇总的用量
    async fn usage_stats(&self, tenant_id: &str) -> Result<Vec<ApiUsageStats>, RateLimitingError>;

    /// 恢复满桶并清零计数
    async fn reset_counters(
        &self,
        api: &str,
        endpoint: &str,
        tenant_id: &str,
    ) -> Result<(), RateLimitingError>;
}

/// 限流错误类型
#[derive(Debug, thiserror::Error)]
pub enum RateLimitingError {
    #[error("等待令牌超时: {api} {endpoint} ({waited_ms}ms)")]
    Timeout {
        api: String,
        endpoint: String,
        waited_ms: u64,
    },

    #[error("限流存储错误: {0}")]
    Storage(#[from] RepositoryError),
}
