// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use crate::domain::models::rate_limit_bucket::{ApiUsageStats, BucketKey, RateLimitBucket};
use crate::domain::repositories::queue_task_repository::RepositoryError;
use crate::domain::repositories::rate_limit_repository::RateLimitRepository;
use crate::infrastructure::database::entities::api_rate_limits as bucket_entity;
use async_trait::async_trait;
use chrono::Utc;
use sea_orm::{
    sea_query::OnConflict, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder,
    QuerySelect, Set,
};
use std::sync::Arc;

/// 限流桶仓库实现
#[derive(Clone)]
pub struct RateLimitRepositoryImpl {
    db: Arc<DatabaseConnection>,
}

impl RateLimitRepositoryImpl {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }
}

impl From<bucket_entity::Model> for RateLimitBucket {
    fn from(model: bucket_entity::Model) -> Self {
        RateLimitBucket {
            key: BucketKey::new(model.api_name, model.endpoint, model.tenant_id),
            rate: model.calls_per_second,
            burst: model.burst_size.max(0) as u32,
            tokens: model.tokens_available,
            last_refill_at: model.last_refill_at.with_timezone(&Utc),
            calls_today: model.calls_today,
            calls_this_hour: model.calls_this_hour,
            last_call_at: model.last_call_at.map(|t| t.with_timezone(&Utc)),
        }
        .clamp()
    }
}

impl From<&RateLimitBucket> for bucket_entity::ActiveModel {
    fn from(bucket: &RateLimitBucket) -> Self {
        Self {
            api_name: Set(bucket.key.api.clone()),
            endpoint: Set(bucket.key.endpoint.clone()),
            tenant_id: Set(bucket.key.tenant_id.clone()),
            calls_per_second: Set(bucket.rate),
            burst_size: Set(bucket.burst.min(i32::MAX as u32) as i32),
            tokens_available: Set(bucket.tokens),
            last_refill_at: Set(bucket.last_refill_at.into()),
            calls_today: Set(bucket.calls_today),
            calls_this_hour: Set(bucket.calls_this_hour),
            last_call_at: Set(bucket.last_call_at.map(Into::into)),
            ..Default::default()
        }
    }
}

#[async_trait]
impl RateLimitRepository for RateLimitRepositoryImpl {
    async fn find(&self, key: &BucketKey) -> Result<Option<RateLimitBucket>, RepositoryError> {
        let model = bucket_entity::Entity::find()
            .filter(bucket_entity::Column::ApiName.eq(key.api.as_str()))
            .filter(bucket_entity::Column::Endpoint.eq(key.endpoint.as_str()))
            .filter(bucket_entity::Column::TenantId.eq(key.tenant_id.as_str()))
            .one(self.db.as_ref())
            .await?;

        Ok(model.map(Into::into))
    }

    async fn upsert_many(&self, buckets: &[RateLimitBucket]) -> Result<(), RepositoryError> {
        if buckets.is_empty() {
            return Ok(());
        }

        let models: Vec<bucket_entity::ActiveModel> = buckets.iter().map(Into::into).collect();

        bucket_entity::Entity::insert_many(models)
            .on_conflict(
                OnConflict::columns([
                    bucket_entity::Column::ApiName,
                    bucket_entity::Column::Endpoint,
                    bucket_entity::Column::TenantId,
                ])
                .update_columns([
                    bucket_entity::Column::CallsPerSecond,
                    bucket_entity::Column::BurstSize,
                    bucket_entity::Column::TokensAvailable,
                    bucket_entity::Column::LastRefillAt,
                    bucket_entity::Column::CallsToday,
                    bucket_entity::Column::CallsThisHour,
                    bucket_entity::Column::LastCallAt,
                ])
                .to_owned(),
            )
            .exec_without_returning(self.db.as_ref())
            .await?;

        Ok(())
    }

    async fn usage_stats(&self, tenant_id: &str) -> Result<Vec<ApiUsageStats>, RepositoryError> {
        let rows: Vec<(String, i64, Option<i64>, Option<i64>, Option<f64>)> =
            bucket_entity::Entity::find()
                .filter(bucket_entity::Column::TenantId.eq(tenant_id))
                .select_only()
                .column(bucket_entity::Column::ApiName)
                .column_as(bucket_entity::Column::Id.count(), "endpoints_used")
                .column_as(bucket_entity::Column::CallsToday.sum(), "calls_today")
                .column_as(bucket_entity::Column::CallsThisHour.sum(), "calls_this_hour")
                .column_as(bucket_entity::Column::TokensAvailable.sum(), "tokens_sum")
                .group_by(bucket_entity::Column::ApiName)
                .order_by_asc(bucket_entity::Column::ApiName)
                .into_tuple()
                .all(self.db.as_ref())
                .await?;

        Ok(rows
            .into_iter()
            .map(
                |(api_name, endpoints_used, calls_today, calls_this_hour, tokens_sum)| {
                    ApiUsageStats {
                        api_name,
                        endpoints_used,
                        calls_today: calls_today.unwrap_or(0),
                        calls_this_hour: calls_this_hour.unwrap_or(0),
                        avg_tokens_available: if endpoints_used > 0 {
                            tokens_sum.unwrap_or(0.0) / endpoints_used as f64
                        } else {
                            0.0
                        },
                    }
                },
            )
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::rate_limit_bucket::EndpointLimit;
    use chrono::Duration;
    use migration::{Migrator, MigratorTrait};
    use sea_orm::Database;

    async fn setup_repo() -> RateLimitRepositoryImpl {
        let db = Database::connect("sqlite::memory:").await.unwrap();
        Migrator::up(&db, None).await.unwrap();
        RateLimitRepositoryImpl::new(Arc::new(db))
    }

    #[tokio::test]
    async fn test_upsert_then_find_round_trips_state() {
        let repo = setup_repo().await;
        let now = Utc::now();
        let key = BucketKey::new("sp-api", "/orders/v0/orders", "default");
        let mut bucket = RateLimitBucket::new(key.clone(), EndpointLimit::new(0.0167, 20), now);
        bucket.try_consume(now);

        repo.upsert_many(std::slice::from_ref(&bucket)).await.unwrap();
        let loaded = repo.find(&key).await.unwrap().unwrap();
        assert_eq!(loaded.tokens, 19.0);
        assert_eq!(loaded.calls_today, 1);

        // 第二次写入覆盖同一行
        bucket.try_consume(now + Duration::seconds(1));
        repo.upsert_many(&[bucket]).await.unwrap();
        let loaded = repo.find(&key).await.unwrap().unwrap();
        assert_eq!(loaded.calls_today, 2);
        assert!(loaded.tokens < 19.0);

        assert!(repo
            .find(&BucketKey::new("sp-api", "/orders/v0/orders", "other"))
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_usage_stats_groups_by_api() {
        let repo = setup_repo().await;
        let now = Utc::now();

        let mut buckets = vec![
            RateLimitBucket::new(
                BucketKey::new("sp-api", "/a", "default"),
                EndpointLimit::new(1.0, 10),
                now,
            ),
            RateLimitBucket::new(
                BucketKey::new("sp-api", "/b", "default"),
                EndpointLimit::new(1.0, 4),
                now,
            ),
            RateLimitBucket::new(
                BucketKey::new("advertising-api", "/c", "default"),
                EndpointLimit::new(1.0, 5),
                now,
            ),
        ];
        for bucket in buckets.iter_mut() {
            bucket.try_consume(now);
        }
        repo.upsert_many(&buckets).await.unwrap();

        let stats = repo.usage_stats("default").await.unwrap();
        assert_eq!(stats.len(), 2);
        assert_eq!(stats[0].api_name, "advertising-api");
        assert_eq!(stats[1].api_name, "sp-api");
        assert_eq!(stats[1].endpoints_used, 2);
        assert_eq!(stats[1].calls_today, 2);
        assert_eq!(stats[1].avg_tokens_available, 6.0);

        assert!(repo.usage_stats("nobody").await.unwrap().is_empty());
    }
}
