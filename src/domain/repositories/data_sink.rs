// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use crate::domain::models::sync_record::{RecordKind, SyncRecord};
use async_trait::async_trait;
use sea_orm::DbErr;
use thiserror::Error;

/// 数据落地错误
#[derive(Error, Debug)]
pub enum SinkError {
    #[error("Sink storage error: {0}")]
    Storage(#[from] DbErr),
    #[error("Invalid record: {0}")]
    InvalidRecord(String),
}

/// 同步结果的幂等写入接口
///
/// 以业务自然键去重，同一任务重复执行不会产生重复记录
#[async_trait]
pub trait DataSink: Send + Sync {
    /// 批量 upsert，返回写入条数
    async fn upsert_records(&self, records: &[SyncRecord]) -> Result<u64, SinkError>;

    /// 统计某类记录的条数
    async fn count_records(&self, kind: RecordKind, tenant_id: &str) -> Result<u64, SinkError>;
}
