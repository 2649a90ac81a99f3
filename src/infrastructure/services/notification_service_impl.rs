// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use crate::config::settings::NotificationSettings;
use crate::domain::services::notification_service::{
    AlertCheck, CheckOutcome, NotificationError, NotificationEvent, NotificationService,
};
use async_trait::async_trait;
use hmac::{Hmac, Mac};
use metrics::counter;
use reqwest::header;
use serde_json::{json, Value};
use sha2::Sha256;
use std::time::Duration;
use tracing::{debug, info, warn};

type HmacSha256 = Hmac<Sha256>;

/// Webhook 通知配置
#[derive(Debug, Clone)]
pub struct WebhookNotifierConfig {
    pub enabled: bool,
    pub webhook_url: Option<String>,
    pub alerts_url: Option<String>,
    pub secret: String,
    pub timeout: Duration,
}

impl From<&NotificationSettings> for WebhookNotifierConfig {
    fn from(settings: &NotificationSettings) -> Self {
        Self {
            enabled: settings.enabled,
            webhook_url: settings.webhook_url.clone(),
            alerts_url: settings.alerts_url.clone(),
            secret: settings.secret.clone(),
            timeout: Duration::from_secs(settings.timeout_secs),
        }
    }
}

/// 基于签名 Webhook 的通知服务实现
///
/// 通知投递到 `webhook_url`，告警检查调用 `alerts_url/{check}`。
/// 两类请求都带 HMAC-SHA256 签名，签名内容为 `{timestamp}.{body}`。
pub struct WebhookNotifier {
    /// HTTP 客户端
    client: reqwest::Client,
    config: WebhookNotifierConfig,
}

impl WebhookNotifier {
    /// 创建新的通知服务
    pub fn new(config: WebhookNotifierConfig) -> Result<Self, NotificationError> {
        let mut headers = header::HeaderMap::new();
        headers.insert(
            header::USER_AGENT,
            header::HeaderValue::from_static("AppProft-Notifier/0.1.0"),
        );
        let client = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(config.timeout)
            .build()
            .map_err(|e| NotificationError::Configuration(e.to_string()))?;

        Ok(Self { client, config })
    }

    /// 为负载生成签名
    fn generate_signature(&self, payload: &str, timestamp: i64) -> Result<String, NotificationError> {
        let message = format!("{}.{}", timestamp, payload);
        let mut mac = HmacSha256::new_from_slice(self.config.secret.as_bytes())
            .map_err(|e| NotificationError::Configuration(e.to_string()))?;
        mac.update(message.as_bytes());
        Ok(hex::encode(mac.finalize().into_bytes()))
    }

    async fn post_signed(
        &self,
        url: &str,
        event_kind: &str,
        body: &Value,
    ) -> Result<reqwest::Response, NotificationError> {
        let timestamp = chrono::Utc::now().timestamp();
        let payload = serde_json::to_string(body)
            .map_err(|e| NotificationError::Configuration(e.to_string()))?;
        let signature = self.generate_signature(&payload, timestamp)?;

        let response = self
            .client
            .post(url)
            .header(header::CONTENT_TYPE, "application/json")
            .header("X-AppProft-Signature", signature)
            .header("X-AppProft-Timestamp", timestamp.to_string())
            .header("X-AppProft-Event", event_kind)
            .body(payload)
            .send()
            .await
            .map_err(|e| NotificationError::Network(e.to_string()))?;

        if response.status().is_success() {
            Ok(response)
        } else {
            Err(NotificationError::Http {
                status: response.status().as_u16(),
            })
        }
    }
}

#[async_trait]
impl NotificationService for WebhookNotifier {
    async fn notify(&self, event: &NotificationEvent) -> Result<(), NotificationError> {
        if !self.config.enabled {
            debug!(kind = %event.kind, "Notifications disabled, dropping event");
            return Ok(());
        }
        let url = self
            .config
            .webhook_url
            .as_deref()
            .ok_or_else(|| NotificationError::Configuration("webhook_url not set".into()))?;

        let body = serde_json::to_value(event)
            .map_err(|e| NotificationError::Configuration(e.to_string()))?;
        match self.post_signed(url, &event.kind, &body).await {
            Ok(_) => {
                counter!("notification_deliveries_total", "outcome" => "delivered").increment(1);
                info!(kind = %event.kind, tenant_id = %event.tenant_id, "Notification delivered");
                Ok(())
            }
            Err(e) => {
                counter!("notification_deliveries_total", "outcome" => "failed").increment(1);
                warn!(kind = %event.kind, "Notification delivery failed: {}", e);
                Err(e)
            }
        }
    }

    async fn run_check(
        &self,
        check: AlertCheck,
        tenant_id: &str,
    ) -> Result<CheckOutcome, NotificationError> {
        if !self.config.enabled {
            debug!(check = %check, "Notifications disabled, skipping alert check");
            return Ok(CheckOutcome { check, alerts: 0 });
        }
        let base = self
            .config
            .alerts_url
            .as_deref()
            .ok_or_else(|| NotificationError::Configuration("alerts_url not set".into()))?;
        let url = format!("{}/{}", base.trim_end_matches('/'), check.as_str());

        let response = self
            .post_signed(&url, check.as_str(), &json!({ "tenantId": tenant_id }))
            .await?;
        // 响应体缺失或不是 JSON 时按零告警处理
        let body: Value = response.json().await.unwrap_or(Value::Null);
        let alerts = body.get("alerts").and_then(Value::as_u64).unwrap_or(0);

        debug!(check = %check, alerts, "Alert check finished");
        Ok(CheckOutcome { check, alerts })
    }
}
