// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use crate::domain::models::sync_record::{RecordKind, SyncRecord};
use crate::domain::repositories::data_sink::{DataSink, SinkError};
use crate::infrastructure::database::entities::sync_records as record_entity;
use async_trait::async_trait;
use chrono::Utc;
use sea_orm::{
    sea_query::OnConflict, ColumnTrait, DatabaseConnection, EntityTrait, PaginatorTrait,
    QueryFilter, Set,
};
use std::collections::HashMap;
use std::sync::Arc;

/// 单条 INSERT 的最大行数
const UPSERT_CHUNK_SIZE: usize = 500;

/// 基于 `sync_records` 表的数据落地实现
#[derive(Clone)]
pub struct SeaOrmDataSink {
    db: Arc<DatabaseConnection>,
}

impl SeaOrmDataSink {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }
}

#[async_trait]
impl DataSink for SeaOrmDataSink {
    async fn upsert_records(&self, records: &[SyncRecord]) -> Result<u64, SinkError> {
        if let Some(bad) = records.iter().find(|r| r.natural_key.is_empty()) {
            return Err(SinkError::InvalidRecord(format!(
                "{} record without natural key",
                bad.kind
            )));
        }

        // 同一批次里的重复键只保留最后一条，否则 ON CONFLICT 会在同一语句内冲突
        let mut latest: HashMap<(RecordKind, &str, &str), &SyncRecord> = HashMap::new();
        for record in records {
            latest.insert(
                (record.kind, record.tenant_id.as_str(), record.natural_key.as_str()),
                record,
            );
        }
        let deduped: Vec<&SyncRecord> = latest.into_values().collect();

        let now = Utc::now();
        let mut written = 0u64;
        for chunk in deduped.chunks(UPSERT_CHUNK_SIZE) {
            let models = chunk.iter().map(|record| record_entity::ActiveModel {
                record_kind: Set(record.kind.to_string()),
                tenant_id: Set(record.tenant_id.clone()),
                natural_key: Set(record.natural_key.clone()),
                data: Set(record.data.clone()),
                synced_at: Set(now.into()),
                ..Default::default()
            });

            record_entity::Entity::insert_many(models)
                .on_conflict(
                    OnConflict::columns([
                        record_entity::Column::RecordKind,
                        record_entity::Column::TenantId,
                        record_entity::Column::NaturalKey,
                    ])
                    .update_columns([record_entity::Column::Data, record_entity::Column::SyncedAt])
                    .to_owned(),
                )
                .exec_without_returning(self.db.as_ref())
                .await?;
            written += chunk.len() as u64;
        }

        Ok(written)
    }

    async fn count_records(&self, kind: RecordKind, tenant_id: &str) -> Result<u64, SinkError> {
        let count = record_entity::Entity::find()
            .filter(record_entity::Column::RecordKind.eq(kind.as_str()))
            .filter(record_entity::Column::TenantId.eq(tenant_id))
            .count(self.db.as_ref())
            .await?;

        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use migration::{Migrator, MigratorTrait};
    use sea_orm::Database;
    use serde_json::json;

    async fn setup_sink() -> (SeaOrmDataSink, Arc<DatabaseConnection>) {
        let db = Arc::new(Database::connect("sqlite::memory:").await.unwrap());
        Migrator::up(db.as_ref(), None).await.unwrap();
        (SeaOrmDataSink::new(db.clone()), db)
    }

    #[tokio::test]
    async fn test_repeated_upserts_do_not_duplicate() {
        let (sink, db) = setup_sink().await;
        let first = vec![
            SyncRecord::new(RecordKind::Order, "default", "111", json!({"status": "Pending"})),
            SyncRecord::new(RecordKind::Order, "default", "222", json!({"status": "Shipped"})),
        ];

        sink.upsert_records(&first).await.unwrap();
        sink.upsert_records(&[SyncRecord::new(
            RecordKind::Order,
            "default",
            "111",
            json!({"status": "Shipped"}),
        )])
        .await
        .unwrap();

        assert_eq!(sink.count_records(RecordKind::Order, "default").await.unwrap(), 2);

        let row = record_entity::Entity::find()
            .filter(record_entity::Column::NaturalKey.eq("111"))
            .one(db.as_ref())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(row.data, json!({"status": "Shipped"}));
    }

    #[tokio::test]
    async fn test_duplicate_keys_within_batch_collapse() {
        let (sink, _db) = setup_sink().await;
        let batch = vec![
            SyncRecord::new(RecordKind::Pricing, "default", "B01", json!({"price": 1})),
            SyncRecord::new(RecordKind::Pricing, "default", "B01", json!({"price": 2})),
        ];

        assert_eq!(sink.upsert_records(&batch).await.unwrap(), 1);
        assert_eq!(sink.count_records(RecordKind::Pricing, "default").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_rejects_empty_natural_key() {
        let (sink, _db) = setup_sink().await;
        let err = sink
            .upsert_records(&[SyncRecord::new(RecordKind::Order, "default", "", json!({}))])
            .await
            .unwrap_err();
        assert!(matches!(err, SinkError::InvalidRecord(_)));
    }
}
