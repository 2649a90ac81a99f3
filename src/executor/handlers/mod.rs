// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

/// 任务处理器
///
/// 按外部系统划分：SP-API 数据、报告、广告、通知、Data Kiosk
pub mod advertising;
pub mod data_kiosk;
pub mod notifications;
pub mod polling;
pub mod reports;
pub mod sp_api;

use std::sync::Arc;

use serde_json::Value;
use tracing::warn;

use crate::domain::models::queue_task::QueueTask;
use crate::domain::models::sync_record::{RecordKind, SyncRecord};
use crate::domain::repositories::data_sink::DataSink;
use crate::domain::services::marketplace_service::MarketplaceService;
use crate::domain::services::notification_service::NotificationService;
use crate::executor::traits::TaskError;

use self::polling::PollSettings;

/// 处理器共享的协作方
#[derive(Clone)]
pub struct HandlerContext {
    /// 限流后的市场客户端
    pub marketplace: Arc<dyn MarketplaceService>,
    pub sink: Arc<dyn DataSink>,
    pub notifier: Arc<dyn NotificationService>,
    /// 默认站点
    pub marketplace_id: String,
    pub poll: PollSettings,
}

impl HandlerContext {
    /// 写入记录，空列表直接返回
    pub async fn store(&self, records: &[SyncRecord]) -> Result<u64, TaskError> {
        if records.is_empty() {
            return Ok(0);
        }
        Ok(self.sink.upsert_records(records).await?)
    }
}

/// 任务所属租户，负载中的 `tenantId` 优先
pub fn tenant_of(task: &QueueTask) -> String {
    task.payload
        .get("tenantId")
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| task.tenant_id.clone())
}

/// 读取可选字符串字段
pub fn optional_str(payload: &Value, key: &str) -> Option<String> {
    match payload.get(key) {
        Some(Value::String(s)) if !s.is_empty() => Some(s.clone()),
        Some(Value::Number(n)) => Some(n.to_string()),
        _ => None,
    }
}

/// 读取字符串数组字段，缺失或为 null 时返回空列表
pub fn string_list(payload: &Value, key: &str) -> Result<Vec<String>, TaskError> {
    match payload.get(key) {
        None | Some(Value::Null) => Ok(Vec::new()),
        Some(Value::Array(items)) => items
            .iter()
            .map(|item| {
                item.as_str()
                    .map(str::to_string)
                    .ok_or_else(|| TaskError::InvalidPayload(format!("{} must contain strings", key)))
            })
            .collect(),
        Some(_) => Err(TaskError::InvalidPayload(format!("{} must be an array", key))),
    }
}

/// 把响应条目转换为同步记录，缺少自然键的条目被跳过
pub fn records_from(
    kind: RecordKind,
    tenant_id: &str,
    items: &[Value],
    key_fields: &[&str],
) -> Vec<SyncRecord> {
    let mut skipped = 0usize;
    let records: Vec<SyncRecord> = items
        .iter()
        .filter_map(|item| match SyncRecord::key_from(item, key_fields) {
            Some(key) => Some(SyncRecord::new(kind, tenant_id, key, item.clone())),
            None => {
                skipped += 1;
                None
            }
        })
        .collect();

    if skipped > 0 {
        warn!(kind = %kind, skipped, "Skipped records without a natural key");
    }
    records
}

/// 按路径读取数组，缺失时为空
pub fn array_at<'a>(value: &'a Value, pointer: &str) -> &'a [Value] {
    value
        .pointer(pointer)
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or(&[])
}
