// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use serde::{Deserialize, Serialize};
use std::fmt;

/// 同步结果的业务类别
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordKind {
    Order,
    OrderItem,
    InventorySummary,
    Pricing,
    CatalogItem,
    ReportRow,
    AdvertisingProfile,
    Campaign,
    AdvertisingReportRow,
    DataKioskRow,
    Alert,
}

impl RecordKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecordKind::Order => "order",
            RecordKind::OrderItem => "order_item",
            RecordKind::InventorySummary => "inventory_summary",
            RecordKind::Pricing => "pricing",
            RecordKind::CatalogItem => "catalog_item",
            RecordKind::ReportRow => "report_row",
            RecordKind::AdvertisingProfile => "advertising_profile",
            RecordKind::Campaign => "campaign",
            RecordKind::AdvertisingReportRow => "advertising_report_row",
            RecordKind::DataKioskRow => "data_kiosk_row",
            RecordKind::Alert => "alert",
        }
    }
}

impl fmt::Display for RecordKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 待写入的同步记录
///
/// `(kind, tenant_id, natural_key)` 唯一标识一条业务记录，
/// 重复写入只会覆盖 data。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncRecord {
    pub kind: RecordKind,
    pub tenant_id: String,
    /// 业务自然键（订单号、ASIN、广告活动ID等）
    pub natural_key: String,
    pub data: serde_json::Value,
}

impl SyncRecord {
    pub fn new(
        kind: RecordKind,
        tenant_id: impl Into<String>,
        natural_key: impl Into<String>,
        data: serde_json::Value,
    ) -> Self {
        Self {
            kind,
            tenant_id: tenant_id.into(),
            natural_key: natural_key.into(),
            data,
        }
    }

    /// 从对象中按候选字段名依次提取自然键
    pub fn key_from(data: &serde_json::Value, fields: &[&str]) -> Option<String> {
        fields.iter().find_map(|field| match data.get(*field)? {
            serde_json::Value::String(s) if !s.is_empty() => Some(s.clone()),
            serde_json::Value::Number(n) => Some(n.to_string()),
            _ => None,
        })
    }
}
