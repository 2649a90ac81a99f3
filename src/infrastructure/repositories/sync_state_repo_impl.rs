// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use crate::domain::models::sync_state::SyncState;
use crate::domain::repositories::queue_task_repository::RepositoryError;
use crate::domain::repositories::sync_state_repository::SyncStateRepository;
use crate::infrastructure::database::entities::sync_state as state_entity;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sea_orm::{sea_query::OnConflict, DatabaseConnection, EntityTrait, Set};
use std::sync::Arc;

/// 同步检查点仓库实现
#[derive(Clone)]
pub struct SyncStateRepositoryImpl {
    db: Arc<DatabaseConnection>,
}

impl SyncStateRepositoryImpl {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }
}

impl From<state_entity::Model> for SyncState {
    fn from(model: state_entity::Model) -> Self {
        Self {
            id: model.id,
            state_data: model.state_data,
            last_checkpoint: model.last_checkpoint.with_timezone(&Utc),
            tenant_id: model.tenant_id,
        }
    }
}

#[async_trait]
impl SyncStateRepository for SyncStateRepositoryImpl {
    async fn save(
        &self,
        id: &str,
        tenant_id: &str,
        state_data: serde_json::Value,
        now: DateTime<Utc>,
    ) -> Result<SyncState, RepositoryError> {
        let model = state_entity::ActiveModel {
            id: Set(id.to_string()),
            state_data: Set(state_data.clone()),
            last_checkpoint: Set(now.into()),
            tenant_id: Set(tenant_id.to_string()),
        };

        state_entity::Entity::insert(model)
            .on_conflict(
                OnConflict::column(state_entity::Column::Id)
                    .update_columns([
                        state_entity::Column::StateData,
                        state_entity::Column::LastCheckpoint,
                        state_entity::Column::TenantId,
                    ])
                    .to_owned(),
            )
            .exec_without_returning(self.db.as_ref())
            .await?;

        Ok(SyncState {
            id: id.to_string(),
            state_data,
            last_checkpoint: now,
            tenant_id: tenant_id.to_string(),
        })
    }

    async fn load(&self, id: &str) -> Result<Option<SyncState>, RepositoryError> {
        let model = state_entity::Entity::find_by_id(id.to_string())
            .one(self.db.as_ref())
            .await?;

        Ok(model.map(Into::into))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use migration::{Migrator, MigratorTrait};
    use sea_orm::Database;
    use serde_json::json;

    #[tokio::test]
    async fn test_save_overwrites_existing_checkpoint() {
        let db = Database::connect("sqlite::memory:").await.unwrap();
        Migrator::up(&db, None).await.unwrap();
        let repo = SyncStateRepositoryImpl::new(Arc::new(db));
        let now = Utc::now();

        assert!(repo.load("system_state").await.unwrap().is_none());

        repo.save("system_state", "default", json!({"phase": "started"}), now)
            .await
            .unwrap();
        repo.save(
            "system_state",
            "default",
            json!({"phase": "shutdown"}),
            now + Duration::seconds(5),
        )
        .await
        .unwrap();

        let state = repo.load("system_state").await.unwrap().unwrap();
        assert_eq!(state.state_data, json!({"phase": "shutdown"}));
        assert!(state.last_checkpoint > now);
    }
}
