// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use async_trait::async_trait;
use serde_json::{json, Map, Value};
use tracing::info;

use crate::domain::models::queue_task::QueueTask;
use crate::domain::models::rate_limit_bucket::SP_API;
use crate::domain::models::sync_record::{RecordKind, SyncRecord};
use crate::domain::services::marketplace_service::MarketplaceRequest;
use crate::executor::handlers::polling::poll_until_done;
use crate::executor::handlers::{optional_str, tenant_of, HandlerContext};
use crate::executor::traits::{TaskError, TaskHandler};

pub const REPORTS_ENDPOINT: &str = "/reports/2021-06-30/reports";
pub const REPORT_DOCUMENTS_ENDPOINT: &str = "/reports/2021-06-30/documents";
pub const DEFAULT_REPORT_TYPE: &str = "GET_MERCHANT_LISTINGS_ALL_DATA";

/// 报告行的自然键候选列
const ROW_KEY_COLUMNS: [&str; 4] = ["seller-sku", "sku", "asin1", "asin"];

/// Reports API 同步处理器
///
/// 创建报告 → 轮询到 DONE → 取文档地址 → 下载 TSV → 按行写入
pub struct ReportsHandler {
    ctx: HandlerContext,
}

impl ReportsHandler {
    pub fn new(ctx: HandlerContext) -> Self {
        Self { ctx }
    }
}

/// 解析制表符分隔的报告文档
///
/// 第一行为列名，空行忽略，缺失的列按空字符串处理
pub fn parse_tsv(document: &str) -> Vec<Value> {
    let mut lines = document.lines().filter(|l| !l.trim().is_empty());
    let headers: Vec<&str> = match lines.next() {
        Some(header) => header.split('\t').map(str::trim).collect(),
        None => return Vec::new(),
    };

    lines
        .map(|line| {
            let mut cells = line.split('\t');
            let row: Map<String, Value> = headers
                .iter()
                .map(|h| {
                    let cell = cells.next().unwrap_or("").trim();
                    (h.to_string(), Value::String(cell.to_string()))
                })
                .collect();
            Value::Object(row)
        })
        .collect()
}

#[async_trait]
impl TaskHandler for ReportsHandler {
    async fn execute(&self, task: &QueueTask) -> Result<Value, TaskError> {
        let tenant_id = tenant_of(task);
        let report_type =
            optional_str(&task.payload, "reportType").unwrap_or_else(|| DEFAULT_REPORT_TYPE.to_string());

        let created = self
            .ctx
            .marketplace
            .send(MarketplaceRequest::post(
                SP_API,
                REPORTS_ENDPOINT,
                &tenant_id,
                json!({
                    "reportType": report_type,
                    "marketplaceIds": [self.ctx.marketplace_id],
                }),
            ))
            .await?;
        let report_id = optional_str(&created, "reportId")
            .ok_or_else(|| TaskError::unexpected("createReport", "missing reportId"))?;
        info!(report_id = %report_id, report_type = %report_type, "Report requested");

        let status_endpoint = format!("{}/{}", REPORTS_ENDPOINT, report_id);
        let report = poll_until_done(
            "getReport",
            self.ctx.poll,
            "processingStatus",
            &["DONE"],
            &["FATAL", "CANCELLED"],
            || {
                self.ctx.marketplace.send(MarketplaceRequest::get(
                    SP_API,
                    status_endpoint.clone(),
                    &tenant_id,
                ))
            },
        )
        .await?;
        let document_id = optional_str(&report, "reportDocumentId")
            .ok_or_else(|| TaskError::unexpected("getReport", "missing reportDocumentId"))?;

        let document = self
            .ctx
            .marketplace
            .send(MarketplaceRequest::get(
                SP_API,
                format!("{}/{}", REPORT_DOCUMENTS_ENDPOINT, document_id),
                &tenant_id,
            ))
            .await?;
        let url = optional_str(&document, "url")
            .ok_or_else(|| TaskError::unexpected("getReportDocument", "missing url"))?;
        let rows = parse_tsv(&self.ctx.marketplace.download(&url).await?);

        let records: Vec<SyncRecord> = rows
            .into_iter()
            .filter_map(|row| {
                let key = SyncRecord::key_from(&row, &ROW_KEY_COLUMNS)?;
                Some(SyncRecord::new(
                    RecordKind::ReportRow,
                    &tenant_id,
                    format!("{}:{}", report_type, key),
                    row,
                ))
            })
            .collect();
        let stored = self.ctx.store(&records).await?;

        info!(report_id = %report_id, rows = stored, "Report rows stored");
        Ok(json!({ "reportId": report_id, "reportType": report_type, "rows": stored }))
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

    #[test]
    fn test_parse_tsv_maps_columns() {
        let rows = parse_tsv("seller-sku\tprice\tquantity\nSKU-1\t9.99\t3\n\nSKU-2\t1.00\n");
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0]["seller-sku"], "SKU-1");
        assert_eq!(rows[0]["quantity"], "3");
        assert_eq!(rows[1]["quantity"], "");
    }

    #[tokio::test]
    async fn test_report_flow_stores_rows() {
        let marketplace = Arc::new(ScriptedMarketplace::default());
        let sink = Arc::new(MemorySink::default());
        marketplace
            .on(HttpMethod::Post, REPORTS_ENDPOINT, json!({"reportId": "r1"}))
            .on(
                HttpMethod::Get,
                "/reports/2021-06-30/reports/r1",
                json!({"processingStatus": "IN_PROGRESS"}),
            )
            .on(
                HttpMethod::Get,
                "/reports/2021-06-30/reports/r1",
                json!({"processingStatus": "DONE", "reportDocumentId": "doc1"}),
            )
            .on(
                HttpMethod::Get,
                "/reports/2021-06-30/documents/doc1",
                json!({"url": "https://example.test/doc1"}),
            )
            .on_download("https://example.test/doc1", "seller-sku\tqty\nA\t1\nB\t2\n");

        let handler = ReportsHandler::new(context(
            marketplace.clone(),
            sink.clone(),
            Arc::new(RecordingNotifier::default()),
        ));
        let result = handler.execute(&task("reports_sync", json!({}))).await.unwrap();

        assert_eq!(result["rows"], 2);
        assert_eq!(marketplace.calls_to("/reports/2021-06-30/reports/r1"), 2);
        let rows = sink.records(RecordKind::ReportRow);
        assert_eq!(rows[0].natural_key, "GET_MERCHANT_LISTINGS_ALL_DATA:A");
    }

    #[tokio::test]
    async fn test_fatal_report_is_an_error() {
        let marketplace = Arc::new(ScriptedMarketplace::default());
        marketplace
            .on(HttpMethod::Post, REPORTS_ENDPOINT, json!({"reportId": "r2"}))
            .on(
                HttpMethod::Get,
                "/reports/2021-06-30/reports/r2",
                json!({"processingStatus": "FATAL"}),
            );

        let handler = ReportsHandler::new(context(
            marketplace,
            Arc::new(MemorySink::default()),
            Arc::new(RecordingNotifier::default()),
        ));
        let err = handler.execute(&task("reports_sync", json!({}))).await.unwrap_err();
        assert!(matches!(err, TaskError::RemoteFailure { .. }));
    }
}
