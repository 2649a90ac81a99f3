// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use async_trait::async_trait;
use chrono::{Duration, NaiveDate, Utc};
use serde_json::{json, Value};
use tracing::{info, warn};

use crate::domain::models::queue_task::QueueTask;
use crate::domain::models::sync_record::{RecordKind, SyncRecord};
use crate::domain::services::marketplace_service::MarketplaceRequest;
use crate::executor::handlers::polling::poll_until_done;
use crate::executor::handlers::{optional_str, tenant_of, HandlerContext};
use crate::executor::traits::{TaskError, TaskHandler};
use crate::infrastructure::services::marketplace_client::DATA_KIOSK_API;
use crate::queue::scheduler::{DataKioskScope, DATA_KIOSK_QUERIES_ENDPOINT};

pub const DATA_KIOSK_DOCUMENTS_ENDPOINT: &str = "/dataKiosk/2023-11-15/documents";

const DEFAULT_DAYS_BACK: i64 = 7;

/// 查询粒度
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Granularity {
    Daily,
    Asin,
}

impl Granularity {
    fn key_prefix(&self) -> &'static str {
        match self {
            Granularity::Daily => "daily",
            Granularity::Asin => "asin",
        }
    }
}

/// 一次 Data Kiosk 查询的日期范围
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DateRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

/// 构造 GraphQL 查询
fn build_query(granularity: Granularity, range: DateRange, marketplace_id: &str) -> String {
    let (root, group, fields) = match granularity {
        Granularity::Daily => (
            "salesAndTrafficByDate",
            "aggregateBy: DAY",
            "startDate endDate sales { orderedProductSales { amount currencyCode } unitsOrdered } traffic { pageViews sessions }",
        ),
        Granularity::Asin => (
            "salesAndTrafficByAsin",
            "aggregateBy: CHILD",
            "startDate endDate childAsin parentAsin sales { orderedProductSales { amount currencyCode } unitsOrdered } traffic { pageViews sessions }",
        ),
    };
    format!(
        "query {{ analytics_salesAndTraffic_2023_11_15 {{ {root}(startDate: \"{start}\" endDate: \"{end}\" {group} marketplaceIds: [\"{mp}\"]) {{ {fields} }} }} }}",
        root = root,
        start = range.start,
        end = range.end,
        group = group,
        mp = marketplace_id,
        fields = fields,
    )
}

/// 解析 JSON Lines 文档，无法解析的行被跳过
pub fn parse_jsonl(document: &str) -> Vec<Value> {
    let mut skipped = 0usize;
    let rows: Vec<Value> = document
        .lines()
        .filter(|l| !l.trim().is_empty())
        .filter_map(|line| match serde_json::from_str(line) {
            Ok(value) => Some(value),
            Err(_) => {
                skipped += 1;
                None
            }
        })
        .collect();
    if skipped > 0 {
        warn!(skipped, "Skipped malformed Data Kiosk lines");
    }
    rows
}

/// Data Kiosk 同步处理器
pub struct DataKioskHandler {
    ctx: HandlerContext,
    scope: DataKioskScope,
}

impl DataKioskHandler {
    pub fn new(ctx: HandlerContext, scope: DataKioskScope) -> Self {
        Self { ctx, scope }
    }

    /// 提交查询、等待完成并写入结果行
    async fn run_query(
        &self,
        tenant_id: &str,
        granularity: Granularity,
        range: DateRange,
    ) -> Result<u64, TaskError> {
        let query = build_query(granularity, range, &self.ctx.marketplace_id);
        let created = self
            .ctx
            .marketplace
            .send(MarketplaceRequest::post(
                DATA_KIOSK_API,
                DATA_KIOSK_QUERIES_ENDPOINT,
                tenant_id,
                json!({ "query": query }),
            ))
            .await?;
        let query_id = optional_str(&created, "queryId")
            .ok_or_else(|| TaskError::unexpected("createQuery", "missing queryId"))?;
        info!(query_id = %query_id, granularity = granularity.key_prefix(), "Data Kiosk query created");

        let status_endpoint = format!("{}/{}", DATA_KIOSK_QUERIES_ENDPOINT, query_id);
        let finished = poll_until_done(
            "getQuery",
            self.ctx.poll,
            "processingStatus",
            &["DONE"],
            &["FATAL", "CANCELLED"],
            || {
                self.ctx.marketplace.send(MarketplaceRequest::get(
                    DATA_KIOSK_API,
                    status_endpoint.clone(),
                    tenant_id,
                ))
            },
        )
        .await?;

        // 查询范围内没有数据时不生成文档
        let document_id = match optional_str(&finished, "dataDocumentId") {
            Some(id) => id,
            None => {
                info!(query_id = %query_id, "Data Kiosk query returned no data");
                return Ok(0);
            }
        };

        let document = self
            .ctx
            .marketplace
            .send(MarketplaceRequest::get(
                DATA_KIOSK_API,
                format!("{}/{}", DATA_KIOSK_DOCUMENTS_ENDPOINT, document_id),
                tenant_id,
            ))
            .await?;
        let url = optional_str(&document, "documentUrl")
            .ok_or_else(|| TaskError::unexpected("getDocument", "missing documentUrl"))?;

        let records: Vec<SyncRecord> = parse_jsonl(&self.ctx.marketplace.download(&url).await?)
            .into_iter()
            .filter_map(|row| {
                let start = optional_str(&row, "startDate")?;
                let key = match granularity {
                    Granularity::Daily => format!("daily:{}", start),
                    Granularity::Asin => {
                        format!("asin:{}:{}", optional_str(&row, "childAsin")?, start)
                    }
                };
                Some(SyncRecord::new(RecordKind::DataKioskRow, tenant_id, key, row))
            })
            .collect();
        self.ctx.store(&records).await
    }
}

/// daily 查询单日，缺省为当天
fn daily_range(payload: &Value) -> Result<DateRange, TaskError> {
    let day = match optional_str(payload, "date") {
        Some(raw) => NaiveDate::parse_from_str(&raw, "%Y-%m-%d")
            .map_err(|e| TaskError::InvalidPayload(format!("date {}: {}", raw, e)))?,
        None => Utc::now().date_naive(),
    };
    Ok(DateRange { start: day, end: day })
}

/// 商品维度查询最近 `daysBack` 天
fn trailing_range(payload: &Value) -> Result<DateRange, TaskError> {
    let days_back = match payload.get("daysBack") {
        None | Some(Value::Null) => DEFAULT_DAYS_BACK,
        Some(value) => value
            .as_i64()
            .filter(|d| *d > 0)
            .ok_or_else(|| TaskError::InvalidPayload("daysBack must be a positive integer".into()))?,
    };
    let end = Utc::now().date_naive();
    Ok(DateRange {
        start: end - Duration::days(days_back),
        end,
    })
}

#[async_trait]
impl TaskHandler for DataKioskHandler {
    async fn execute(&self, task: &QueueTask) -> Result<Value, TaskError> {
        let tenant_id = tenant_of(task);
        let mut daily = 0;
        let mut products = 0;

        if matches!(self.scope, DataKioskScope::Full | DataKioskScope::Daily) {
            let range = daily_range(&task.payload)?;
            daily = self.run_query(&tenant_id, Granularity::Daily, range).await?;
        }
        if matches!(self.scope, DataKioskScope::Full | DataKioskScope::Products) {
            let range = trailing_range(&task.payload)?;
            products = self.run_query(&tenant_id, Granularity::Asin, range).await?;
        }

        info!(daily, products, "Data Kiosk sync finished");
        Ok(json!({ "dailyRows": daily, "productRows": products }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::services::marketplace_service::HttpMethod;
    use crate::executor::handlers::testing::{
        context, task, MemorySink, RecordingNotifier, ScriptedMarketplace,
    };
    use std::sync::Arc;

    fn handler(
        marketplace: Arc<ScriptedMarketplace>,
        sink: Arc<MemorySink>,
        scope: DataKioskScope,
    ) -> DataKioskHandler {
        DataKioskHandler::new(
            context(marketplace, sink, Arc::new(RecordingNotifier::default())),
            scope,
        )
    }

    #[test]
    fn test_query_names_range_and_marketplace() {
        let day = NaiveDate::from_ymd_opt(2025, 6, 1).unwrap();
        let query = build_query(
            Granularity::Asin,
            DateRange { start: day, end: day },
            "ATVPDKIKX0DER",
        );
        assert!(query.contains("salesAndTrafficByAsin"));
        assert!(query.contains("startDate: \"2025-06-01\""));
        assert!(query.contains("marketplaceIds: [\"ATVPDKIKX0DER\"]"));
    }

    #[test]
    fn test_parse_jsonl_skips_bad_lines() {
        let rows = parse_jsonl("{\"a\":1}\nnot json\n\n{\"a\":2}\n");
        assert_eq!(rows, vec![json!({"a": 1}), json!({"a": 2})]);
    }

    #[test]
    fn test_trailing_range_rejects_bad_days_back() {
        assert!(matches!(
            trailing_range(&json!({"daysBack": -1})),
            Err(TaskError::InvalidPayload(_))
        ));
        let range = trailing_range(&json!({})).unwrap();
        assert_eq!(range.end - range.start, Duration::days(7));
    }

    #[tokio::test]
    async fn test_daily_rows_keyed_by_start_date() {
        let marketplace = Arc::new(ScriptedMarketplace::default());
        let sink = Arc::new(MemorySink::default());
        marketplace
            .on(HttpMethod::Post, DATA_KIOSK_QUERIES_ENDPOINT, json!({"queryId": "q1"}))
            .on(
                HttpMethod::Get,
                "/dataKiosk/2023-11-15/queries/q1",
                json!({"processingStatus": "IN_PROGRESS"}),
            )
            .on(
                HttpMethod::Get,
                "/dataKiosk/2023-11-15/queries/q1",
                json!({"processingStatus": "DONE", "dataDocumentId": "d1"}),
            )
            .on(
                HttpMethod::Get,
                "/dataKiosk/2023-11-15/documents/d1",
                json!({"documentUrl": "https://example.test/d1"}),
            )
            .on_download(
                "https://example.test/d1",
                "{\"startDate\":\"2025-06-01\",\"sales\":{}}\n",
            );

        let result = handler(marketplace, sink.clone(), DataKioskScope::Daily)
            .execute(&task("data_kiosk_daily", json!({"date": "2025-06-01"})))
            .await
            .unwrap();

        assert_eq!(result["dailyRows"], 1);
        assert_eq!(
            sink.records(RecordKind::DataKioskRow)[0].natural_key,
            "daily:2025-06-01"
        );
    }

    #[tokio::test]
    async fn test_done_without_document_stores_nothing() {
        let marketplace = Arc::new(ScriptedMarketplace::default());
        let sink = Arc::new(MemorySink::default());
        marketplace
            .on(HttpMethod::Post, DATA_KIOSK_QUERIES_ENDPOINT, json!({"queryId": "q2"}))
            .on(
                HttpMethod::Get,
                "/dataKiosk/2023-11-15/queries/q2",
                json!({"processingStatus": "DONE"}),
            );

        let result = handler(marketplace, sink.clone(), DataKioskScope::Products)
            .execute(&task("data_kiosk_products", json!({"daysBack": 3})))
            .await
            .unwrap();

        assert_eq!(result["productRows"], 0);
        assert!(sink.records(RecordKind::DataKioskRow).is_empty());
    }

    #[tokio::test]
    async fn test_fatal_query_is_remote_failure() {
        let marketplace = Arc::new(ScriptedMarketplace::default());
        marketplace
            .on(HttpMethod::Post, DATA_KIOSK_QUERIES_ENDPOINT, json!({"queryId": "q3"}))
            .on(
                HttpMethod::Get,
                "/dataKiosk/2023-11-15/queries/q3",
                json!({"processingStatus": "FATAL"}),
            );

        let err = handler(marketplace, Arc::new(MemorySink::default()), DataKioskScope::Full)
            .execute(&task("data_kiosk_sync", json!({})))
            .await
            .unwrap_err();
        assert!(matches!(err, TaskError::RemoteFailure { ref status, .. } if status == "FATAL"));
    }
}
