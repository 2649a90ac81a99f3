// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use async_trait::async_trait;
use chrono::{Duration, SecondsFormat, Utc};
use serde_json::{json, Value};
use tracing::{info, warn};

use crate::domain::models::queue_task::QueueTask;
use crate::domain::models::rate_limit_bucket::SP_API;
use crate::domain::models::sync_record::{RecordKind, SyncRecord};
use crate::domain::services::marketplace_service::MarketplaceRequest;
use crate::executor::handlers::{
    array_at, optional_str, records_from, string_list, tenant_of, HandlerContext,
};
use crate::executor::traits::{TaskError, TaskHandler};
use crate::queue::scheduler::BATCH_PRICING_ENDPOINT;

pub const ORDERS_ENDPOINT: &str = "/orders/v0/orders";
pub const INVENTORY_ENDPOINT: &str = "/fba/inventory/v1/summaries";
pub const PRICING_ENDPOINT: &str = "/products/pricing/v0/price";

/// 单次报价请求的最大 ASIN 数
const PRICING_CHUNK: usize = 20;
/// 分页拉取的最大页数
const MAX_PAGES: usize = 20;
/// 订单默认回溯天数
const DEFAULT_ORDER_DAYS: i64 = 7;

/// SP-API 数据同步种类
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpApiSync {
    Orders,
    Inventory,
    Pricing,
    Catalog,
    /// 订单 + 库存 + 在库商品报价
    Optimized,
    /// 库存最多的商品优先报价
    Priority,
    BatchPricing,
}

/// SP-API 同步处理器
pub struct SpApiHandler {
    ctx: HandlerContext,
    sync: SpApiSync,
}

impl SpApiHandler {
    pub fn new(ctx: HandlerContext, sync: SpApiSync) -> Self {
        Self { ctx, sync }
    }

    async fn fetch_orders(&self, tenant_id: &str, payload: &Value) -> Result<u64, TaskError> {
        let created_after = optional_str(payload, "createdAfter").unwrap_or_else(|| {
            (Utc::now() - Duration::days(DEFAULT_ORDER_DAYS)).to_rfc3339_opts(SecondsFormat::Secs, true)
        });

        let mut stored = 0;
        let mut next_token: Option<String> = None;
        for _ in 0..MAX_PAGES {
            let mut request = MarketplaceRequest::get(SP_API, ORDERS_ENDPOINT, tenant_id)
                .query("MarketplaceIds", self.ctx.marketplace_id.clone());
            request = match &next_token {
                Some(token) => request.query("NextToken", token.clone()),
                None => request.query("CreatedAfter", created_after.clone()),
            };

            let response = self.ctx.marketplace.send(request).await?;
            let orders = array_at(&response, "/payload/Orders");
            stored += self
                .ctx
                .store(&records_from(RecordKind::Order, tenant_id, orders, &["AmazonOrderId"]))
                .await?;

            next_token = optional_str(&response["payload"], "NextToken");
            if next_token.is_none() {
                break;
            }
        }
        Ok(stored)
    }

    /// 拉取库存，返回写入条数和 (ASIN, 可售数量)
    async fn fetch_inventory(&self, tenant_id: &str) -> Result<(u64, Vec<(String, i64)>), TaskError> {
        let mut stored = 0;
        let mut stock = Vec::new();
        let mut next_token: Option<String> = None;
        for _ in 0..MAX_PAGES {
            let mut request = MarketplaceRequest::get(SP_API, INVENTORY_ENDPOINT, tenant_id)
                .query("details", "true")
                .query("granularityType", "Marketplace")
                .query("granularityId", self.ctx.marketplace_id.clone())
                .query("marketplaceIds", self.ctx.marketplace_id.clone());
            if let Some(token) = &next_token {
                request = request.query("nextToken", token.clone());
            }

            let response = self.ctx.marketplace.send(request).await?;
            let summaries = array_at(&response, "/payload/inventorySummaries");
            for summary in summaries {
                if let Some(asin) = optional_str(summary, "asin") {
                    let quantity = summary
                        .pointer("/inventoryDetails/fulfillableQuantity")
                        .or_else(|| summary.get("totalQuantity"))
                        .and_then(Value::as_i64)
                        .unwrap_or(0);
                    stock.push((asin, quantity));
                }
            }
            stored += self
                .ctx
                .store(&records_from(
                    RecordKind::InventorySummary,
                    tenant_id,
                    summaries,
                    &["sellerSku", "asin"],
                ))
                .await?;

            next_token = response
                .pointer("/pagination/nextToken")
                .and_then(Value::as_str)
                .map(str::to_string);
            if next_token.is_none() {
                break;
            }
        }
        Ok((stored, stock))
    }

    async fn fetch_pricing(&self, tenant_id: &str, asins: &[String]) -> Result<u64, TaskError> {
        let mut stored = 0;
        for chunk in asins.chunks(PRICING_CHUNK) {
            let request = MarketplaceRequest::get(SP_API, PRICING_ENDPOINT, tenant_id)
                .query("MarketplaceId", self.ctx.marketplace_id.clone())
                .query("ItemType", "Asin")
                .query("Asins", chunk.join(","));
            let response = self.ctx.marketplace.send(request).await?;
            stored += self
                .ctx
                .store(&records_from(
                    RecordKind::Pricing,
                    tenant_id,
                    array_at(&response, "/payload"),
                    &["ASIN"],
                ))
                .await?;
        }
        Ok(stored)
    }

    async fn fetch_catalog(&self, tenant_id: &str, asins: &[String]) -> Result<u64, TaskError> {
        let mut records = Vec::with_capacity(asins.len());
        for asin in asins {
            let request = MarketplaceRequest::get(
                SP_API,
                format!("/catalog/v2022-04-01/items/{}", asin),
                tenant_id,
            )
            .query("marketplaceIds", self.ctx.marketplace_id.clone())
            .query("includedData", "summaries,salesRanks");
            let item = self.ctx.marketplace.send(request).await?;
            records.push(SyncRecord::new(RecordKind::CatalogItem, tenant_id, asin.clone(), item));
        }
        self.ctx.store(&records).await
    }

    async fn batch_pricing(&self, tenant_id: &str, asins: &[String]) -> Result<u64, TaskError> {
        let mut stored = 0;
        let mut rejected = 0;
        for chunk in asins.chunks(PRICING_CHUNK) {
            let requests: Vec<Value> = chunk
                .iter()
                .map(|asin| {
                    json!({
                        "uri": format!("/products/pricing/v0/items/{}/offers", asin),
                        "method": "GET",
                        "MarketplaceId": self.ctx.marketplace_id,
                        "ItemCondition": "New",
                        "CustomerType": "Consumer",
                    })
                })
                .collect();
            let response = self
                .ctx
                .marketplace
                .send(MarketplaceRequest::post(
                    SP_API,
                    BATCH_PRICING_ENDPOINT,
                    tenant_id,
                    json!({ "requests": requests }),
                ))
                .await?;

            let mut records = Vec::new();
            for (asin, item) in chunk.iter().zip(array_at(&response, "/responses")) {
                let ok = item
                    .pointer("/status/statusCode")
                    .and_then(Value::as_u64)
                    .map_or(false, |code| (200..300).contains(&code));
                if !ok {
                    rejected += 1;
                    continue;
                }
                let payload = item.pointer("/body/payload").cloned().unwrap_or(Value::Null);
                let key = optional_str(&payload, "ASIN").unwrap_or_else(|| asin.clone());
                records.push(SyncRecord::new(RecordKind::Pricing, tenant_id, key, payload));
            }
            stored += self.ctx.store(&records).await?;
        }

        if rejected > 0 {
            warn!(rejected, "Batch pricing returned item-level errors");
        }
        Ok(stored)
    }
}

/// 按可售数量从多到少取前 `limit` 个 ASIN
fn top_stocked(mut stock: Vec<(String, i64)>, limit: usize) -> Vec<String> {
    stock.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    let mut asins: Vec<String> = Vec::with_capacity(limit);
    for (asin, quantity) in stock {
        if asins.len() == limit {
            break;
        }
        if quantity > 0 && !asins.contains(&asin) {
            asins.push(asin);
        }
    }
    asins
}

#[async_trait]
impl TaskHandler for SpApiHandler {
    async fn execute(&self, task: &QueueTask) -> Result<Value, TaskError> {
        let tenant_id = tenant_of(task);
        let summary = match self.sync {
            SpApiSync::Orders => json!({ "orders": self.fetch_orders(&tenant_id, &task.payload).await? }),
            SpApiSync::Inventory => json!({ "inventory": self.fetch_inventory(&tenant_id).await?.0 }),
            SpApiSync::Pricing => {
                let asins = string_list(&task.payload, "asins")?;
                json!({ "pricing": self.fetch_pricing(&tenant_id, &asins).await? })
            }
            SpApiSync::Catalog => {
                let asins = string_list(&task.payload, "asins")?;
                json!({ "catalog": self.fetch_catalog(&tenant_id, &asins).await? })
            }
            SpApiSync::BatchPricing => {
                let asins = string_list(&task.payload, "asins")?;
                if asins.is_empty() {
                    return Err(TaskError::InvalidPayload("asins must not be empty".into()));
                }
                json!({ "pricing": self.batch_pricing(&tenant_id, &asins).await? })
            }
            SpApiSync::Optimized => {
                let orders = self.fetch_orders(&tenant_id, &task.payload).await?;
                let (inventory, stock) = self.fetch_inventory(&tenant_id).await?;
                let asins = top_stocked(stock, usize::MAX);
                let pricing = self.batch_pricing(&tenant_id, &asins).await?;
                json!({ "orders": orders, "inventory": inventory, "pricing": pricing })
            }
            SpApiSync::Priority => {
                let (inventory, stock) = self.fetch_inventory(&tenant_id).await?;
                let asins = top_stocked(stock, PRICING_CHUNK);
                let pricing = self.batch_pricing(&tenant_id, &asins).await?;
                json!({ "inventory": inventory, "pricing": pricing, "asins": asins })
            }
        };

        info!(tenant_id = %tenant_id, summary = %summary, "SP-API sync finished");
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::queue_task::ErrorClass;
    use crate::domain::services::marketplace_service::HttpMethod;
    use crate::executor::handlers::testing::{
        context, task, MemorySink, RecordingNotifier, ScriptedMarketplace,
    };
    use std::sync::Arc;

    fn setup() -> (Arc<ScriptedMarketplace>, Arc<MemorySink>, HandlerContext) {
        let marketplace = Arc::new(ScriptedMarketplace::default());
        let sink = Arc::new(MemorySink::default());
        let ctx = context(
            marketplace.clone(),
            sink.clone(),
            Arc::new(RecordingNotifier::default()),
        );
        (marketplace, sink, ctx)
    }

    #[tokio::test]
    async fn test_orders_follow_next_token() {
        let (marketplace, sink, ctx) = setup();
        marketplace
            .on(
                HttpMethod::Get,
                ORDERS_ENDPOINT,
                json!({"payload": {"Orders": [{"AmazonOrderId": "1"}], "NextToken": "n1"}}),
            )
            .on(
                HttpMethod::Get,
                ORDERS_ENDPOINT,
                json!({"payload": {"Orders": [{"AmazonOrderId": "2"}, {"AmazonOrderId": "1"}]}}),
            );

        let result = SpApiHandler::new(ctx, SpApiSync::Orders)
            .execute(&task("fetch_orders", json!({"tenantId": "default"})))
            .await
            .unwrap();

        assert_eq!(result["orders"], 3);
        assert_eq!(sink.records(RecordKind::Order).len(), 2);
        let requests = marketplace.requests();
        assert_eq!(requests.len(), 2);
        assert!(requests[1].query.contains(&("NextToken".to_string(), "n1".to_string())));
    }

    #[tokio::test]
    async fn test_priority_sync_prices_stocked_items_first() {
        let (marketplace, sink, ctx) = setup();
        marketplace
            .on(
                HttpMethod::Get,
                INVENTORY_ENDPOINT,
                json!({"payload": {"inventorySummaries": [
                    {"sellerSku": "s1", "asin": "A1", "totalQuantity": 3},
                    {"sellerSku": "s2", "asin": "A2", "totalQuantity": 0},
                    {"sellerSku": "s3", "asin": "A3", "totalQuantity": 9}
                ]}}),
            )
            .on(
                HttpMethod::Post,
                BATCH_PRICING_ENDPOINT,
                json!({"responses": [
                    {"status": {"statusCode": 200}, "body": {"payload": {"ASIN": "A3"}}},
                    {"status": {"statusCode": 404}, "body": {}}
                ]}),
            );

        let result = SpApiHandler::new(ctx, SpApiSync::Priority)
            .execute(&task("priority_sync", json!({})))
            .await
            .unwrap();

        assert_eq!(result["asins"], json!(["A3", "A1"]));
        assert_eq!(result["pricing"], 1);
        assert_eq!(sink.records(RecordKind::InventorySummary).len(), 3);
        assert_eq!(sink.records(RecordKind::Pricing)[0].natural_key, "A3");
    }

    #[tokio::test]
    async fn test_batch_pricing_without_asins_is_permanent() {
        let (_, _, ctx) = setup();
        let err = SpApiHandler::new(ctx, SpApiSync::BatchPricing)
            .execute(&task("batch_pricing", json!({"asins": []})))
            .await
            .unwrap_err();
        assert_eq!(err.class(), ErrorClass::Permanent);
    }

    #[tokio::test]
    async fn test_throttled_response_is_rate_limited() {
        let (marketplace, _, ctx) = setup();
        marketplace.fail(HttpMethod::Get, INVENTORY_ENDPOINT, 429);

        let err = SpApiHandler::new(ctx, SpApiSync::Inventory)
            .execute(&task("fetch_inventory", json!({})))
            .await
            .unwrap_err();
        assert_eq!(err.class(), ErrorClass::RateLimited);
    }

    #[test]
    fn test_top_stocked_orders_by_quantity() {
        let stock = vec![("A".to_string(), 1), ("B".to_string(), 5), ("C".to_string(), 0)];
        assert_eq!(top_stocked(stock, 1), vec!["B".to_string()]);
    }
}
