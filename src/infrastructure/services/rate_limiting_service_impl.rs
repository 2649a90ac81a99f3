// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use metrics::counter;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::domain::models::rate_limit_bucket::{
    ApiUsageStats, BucketKey, RateLimitBucket, RateLimitDecision, RateLimitTable,
    ResolvedEndpoint,
};
use crate::domain::repositories::rate_limit_repository::RateLimitRepository;
use crate::domain::services::rate_limiting_service::{RateLimitingError, RateLimitingService};

/// 限流服务配置
#[derive(Debug, Clone)]
pub struct RateLimitingConfig {
    /// 端点限流表
    pub table: RateLimitTable,
    /// 缓存写回间隔
    pub flush_interval: Duration,
}

impl Default for RateLimitingConfig {
    fn default() -> Self {
        Self {
            table: RateLimitTable::default(),
            flush_interval: Duration::from_secs(30),
        }
    }
}

/// 令牌桶限流服务实现
///
/// 所有判定都在内存缓存上完成；缓存未命中时从存储惰性加载，
/// 存储不存在时创建满桶。后台任务按固定间隔把缓存写回存储，
/// 关闭时再写回一次。存储不可用时限流器仍基于内存状态工作。
pub struct RateLimitingServiceImpl {
    repository: Arc<dyn RateLimitRepository>,
    config: RateLimitingConfig,
    cache: DashMap<BucketKey, RateLimitBucket>,
}

impl RateLimitingServiceImpl {
    pub fn new(repository: Arc<dyn RateLimitRepository>, config: RateLimitingConfig) -> Self {
        Self {
            repository,
            config,
            cache: DashMap::new(),
        }
    }

    fn resolve(&self, api: &str, endpoint: &str, tenant_id: &str) -> (BucketKey, ResolvedEndpoint) {
        let resolved = self.config.table.resolve(api, endpoint);
        (
            BucketKey::new(api, resolved.pattern.clone(), tenant_id),
            resolved,
        )
    }

    /// 确保缓存中存在该桶
    async fn ensure_cached(&self, key: &BucketKey, resolved: &ResolvedEndpoint) {
        if self.cache.contains_key(key) {
            return;
        }

        let now = Utc::now();
        let bucket = match self.repository.find(key).await {
            Ok(Some(mut stored)) => {
                // 限流参数以当前配置为准
                stored.rate = resolved.limit.rate;
                stored.burst = resolved.limit.burst;
                debug!(bucket = %key, tokens = stored.tokens, "Loaded rate limit bucket from storage");
                stored.clamp()
            }
            Ok(None) => RateLimitBucket::new(key.clone(), resolved.limit, now),
            Err(e) => {
                warn!(bucket = %key, "Failed to load rate limit bucket, using fresh bucket: {}", e);
                RateLimitBucket::new(key.clone(), resolved.limit, now)
            }
        };

        // 并发创建时保留先写入的那个
        self.cache.entry(key.clone()).or_insert(bucket);
    }

    /// 当前缓存中的桶数量
    pub fn cached_buckets(&self) -> usize {
        self.cache.len()
    }

    /// 读取缓存中的桶快照
    pub fn snapshot(&self, api: &str, endpoint: &str, tenant_id: &str) -> Option<RateLimitBucket> {
        let (key, _) = self.resolve(api, endpoint, tenant_id);
        self.cache.get(&key).map(|b| b.clone())
    }

    /// 启动后台写回任务
    ///
    /// 收到关闭信号后执行最后一次写回再退出
    pub fn start_flush_task(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(self.config.flush_interval);
            // 第一次 tick 立即返回
            interval.tick().await;
            info!(
                interval_secs = self.config.flush_interval.as_secs(),
                "Rate limit flush task started"
            );

            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        if let Err(e) = self.flush().await {
                            error!("Rate limit flush failed, retrying next interval: {}", e);
                        }
                    }
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                }
            }

            match self.flush().await {
                Ok(count) => info!(buckets = count, "Rate limit state flushed on shutdown"),
                Err(e) => error!("Final rate limit flush failed: {}", e),
            }
        })
    }
}

#[async_trait]
impl RateLimitingService for RateLimitingServiceImpl {
    async fn check_and_consume(
        &self,
        api: &str,
        endpoint: &str,
        tenant_id: &str,
    ) -> Result<RateLimitDecision, RateLimitingError> {
        let (key, resolved) = self.resolve(api, endpoint, tenant_id);
        self.ensure_cached(&key, &resolved).await;

        let decision = match self.cache.get_mut(&key) {
            Some(mut bucket) => bucket.try_consume(Utc::now()),
            None => {
                // 缓存被 reset 之外的路径清空时重新建桶
                let mut bucket = RateLimitBucket::new(key.clone(), resolved.limit, Utc::now());
                let decision = bucket.try_consume(Utc::now());
                self.cache.insert(key.clone(), bucket);
                decision
            }
        };

        if decision.allowed {
            counter!("rate_limit_allowed_total", "api" => api.to_string()).increment(1);
        } else {
            counter!("rate_limit_denied_total", "api" => api.to_string()).increment(1);
            debug!(
                bucket = %key,
                wait_ms = decision.wait_time_ms,
                "Rate limit token unavailable"
            );
        }

        Ok(decision)
    }

    async fn flush(&self) -> Result<usize, RateLimitingError> {
        let buckets: Vec<RateLimitBucket> =
            self.cache.iter().map(|entry| entry.value().clone()).collect();
        if buckets.is_empty() {
            return Ok(0);
        }

        if let Err(e) = self.repository.upsert_many(&buckets).await {
            counter!("rate_limit_flush_failures_total").increment(1);
            return Err(e.into());
        }

        debug!(buckets = buckets.len(), "Flushed rate limit buckets");
        Ok(buckets.len())
    }

    async fn usage_stats(&self, tenant_id: &str) -> Result<Vec<ApiUsageStats>, RateLimitingError> {
        if let Err(e) = self.flush().await {
            warn!("Usage stats may be stale, flush failed: {}", e);
        }
        Ok(self.repository.usage_stats(tenant_id).await?)
    }

    async fn reset_counters(
        &self,
        api: &str,
        endpoint: &str,
        tenant_id: &str,
    ) -> Result<(), RateLimitingError> {
        let (key, resolved) = self.resolve(api, endpoint, tenant_id);
        let bucket = RateLimitBucket::new(key.clone(), resolved.limit, Utc::now());

        self.cache.insert(key.clone(), bucket.clone());
        self.repository.upsert_many(&[bucket]).await?;

        info!(bucket = %key, "Rate limit counters reset");
        Ok(())
    }
}

#[cfg(test)]
#[path = "rate_limiting_service_impl_test.rs"]
mod tests;
