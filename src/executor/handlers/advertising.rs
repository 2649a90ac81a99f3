// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use async_trait::async_trait;
use chrono::{Duration, NaiveDate, Utc};
use serde_json::{json, Value};
use tracing::info;

use crate::domain::models::queue_task::QueueTask;
use crate::domain::models::rate_limit_bucket::ADVERTISING_API;
use crate::domain::models::sync_record::{RecordKind, SyncRecord};
use crate::domain::services::marketplace_service::MarketplaceRequest;
use crate::executor::handlers::polling::poll_until_done;
use crate::executor::handlers::{optional_str, records_from, tenant_of, HandlerContext};
use crate::executor::traits::{TaskError, TaskHandler};
use crate::queue::scheduler::{AdvertisingScope, ADVERTISING_PROFILES_ENDPOINT};

pub const CAMPAIGNS_ENDPOINT: &str = "/v2/sp/campaigns";
pub const CAMPAIGN_REPORT_ENDPOINT: &str = "/v2/sp/campaigns/report";
pub const SCOPE_HEADER: &str = "Amazon-Advertising-API-Scope";

const REPORT_METRICS: &str = "campaignName,campaignId,impressions,clicks,cost,attributedSales14d,attributedConversions14d";

/// Advertising API 同步处理器
pub struct AdvertisingHandler {
    ctx: HandlerContext,
    scope: AdvertisingScope,
}

impl AdvertisingHandler {
    pub fn new(ctx: HandlerContext, scope: AdvertisingScope) -> Self {
        Self { ctx, scope }
    }

    /// 负载指定 profile 时只处理该 profile，否则拉取全部 profile
    async fn profiles(&self, tenant_id: &str, payload: &Value) -> Result<Vec<String>, TaskError> {
        if let Some(profile_id) = optional_str(payload, "profileId") {
            return Ok(vec![profile_id]);
        }

        let response = self
            .ctx
            .marketplace
            .send(MarketplaceRequest::get(
                ADVERTISING_API,
                ADVERTISING_PROFILES_ENDPOINT,
                tenant_id,
            ))
            .await?;
        let profiles = response.as_array().map(Vec::as_slice).unwrap_or(&[]);
        self.ctx
            .store(&records_from(
                RecordKind::AdvertisingProfile,
                tenant_id,
                profiles,
                &["profileId"],
            ))
            .await?;

        Ok(profiles
            .iter()
            .filter_map(|p| optional_str(p, "profileId"))
            .collect())
    }

    async fn campaigns(&self, tenant_id: &str, profile_id: &str) -> Result<u64, TaskError> {
        let response = self
            .ctx
            .marketplace
            .send(
                MarketplaceRequest::get(ADVERTISING_API, CAMPAIGNS_ENDPOINT, tenant_id)
                    .header(SCOPE_HEADER, profile_id),
            )
            .await?;
        let campaigns = response.as_array().map(Vec::as_slice).unwrap_or(&[]);
        self.ctx
            .store(&records_from(RecordKind::Campaign, tenant_id, campaigns, &["campaignId"]))
            .await
    }

    async fn campaign_report(
        &self,
        tenant_id: &str,
        profile_id: &str,
        report_date: NaiveDate,
    ) -> Result<u64, TaskError> {
        let date = report_date.format("%Y%m%d").to_string();
        let created = self
            .ctx
            .marketplace
            .send(
                MarketplaceRequest::post(
                    ADVERTISING_API,
                    CAMPAIGN_REPORT_ENDPOINT,
                    tenant_id,
                    json!({ "reportDate": date, "metrics": REPORT_METRICS }),
                )
                .header(SCOPE_HEADER, profile_id),
            )
            .await?;
        let report_id = optional_str(&created, "reportId")
            .ok_or_else(|| TaskError::unexpected("requestCampaignReport", "missing reportId"))?;

        let status_endpoint = format!("/v2/reports/{}", report_id);
        let report = poll_until_done(
            "getAdvertisingReport",
            self.ctx.poll,
            "status",
            &["SUCCESS"],
            &["FAILURE"],
            || {
                self.ctx.marketplace.send(
                    MarketplaceRequest::get(ADVERTISING_API, status_endpoint.clone(), tenant_id)
                        .header(SCOPE_HEADER, profile_id),
                )
            },
        )
        .await?;
        let location = optional_str(&report, "location")
            .ok_or_else(|| TaskError::unexpected("getAdvertisingReport", "missing location"))?;

        let body = self.ctx.marketplace.download(&location).await?;
        let rows: Vec<Value> = serde_json::from_str(&body)
            .map_err(|e| TaskError::unexpected("downloadAdvertisingReport", e.to_string()))?;

        let records: Vec<SyncRecord> = rows
            .into_iter()
            .filter_map(|row| {
                let campaign_id = SyncRecord::key_from(&row, &["campaignId"])?;
                Some(SyncRecord::new(
                    RecordKind::AdvertisingReportRow,
                    tenant_id,
                    format!("{}:{}:{}", profile_id, campaign_id, date),
                    row,
                ))
            })
            .collect();
        self.ctx.store(&records).await
    }
}

/// 报告日期：负载中的 `reportDate`/`endDate`，缺省为昨天
fn report_date(payload: &Value) -> Result<NaiveDate, TaskError> {
    match optional_str(payload, "reportDate").or_else(|| optional_str(payload, "endDate")) {
        Some(raw) => NaiveDate::parse_from_str(&raw, "%Y-%m-%d")
            .map_err(|e| TaskError::InvalidPayload(format!("reportDate {}: {}", raw, e))),
        None => Ok((Utc::now() - Duration::days(1)).date_naive()),
    }
}

#[async_trait]
impl TaskHandler for AdvertisingHandler {
    async fn execute(&self, task: &QueueTask) -> Result<Value, TaskError> {
        let tenant_id = tenant_of(task);
        let date = report_date(&task.payload)?;
        let profiles = self.profiles(&tenant_id, &task.payload).await?;

        let mut campaigns = 0;
        let mut report_rows = 0;
        for profile_id in &profiles {
            if matches!(self.scope, AdvertisingScope::Full | AdvertisingScope::Campaigns) {
                campaigns += self.campaigns(&tenant_id, profile_id).await?;
            }
            if matches!(self.scope, AdvertisingScope::Full | AdvertisingScope::Reports) {
                report_rows += self.campaign_report(&tenant_id, profile_id, date).await?;
            }
        }

        info!(
            profiles = profiles.len(),
            campaigns,
            report_rows,
            "Advertising sync finished"
        );
        Ok(json!({
            "profiles": profiles.len(),
            "campaigns": campaigns,
            "reportRows": report_rows,
        }))
    }
}
