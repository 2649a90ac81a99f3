// Copyright 2025 Kirky.X
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use metrics::{counter, histogram};
use reqwest::header::{self, HeaderMap, HeaderName, HeaderValue};
use reqwest::{Client, RequestBuilder};
use serde_json::Value;
use tracing::{debug, warn};

use crate::config::settings::MarketplaceSettings;
use crate::domain::models::rate_limit_bucket::{ADVERTISING_API, SP_API};
use crate::domain::services::marketplace_service::{
    HttpMethod, MarketplaceError, MarketplaceRequest, MarketplaceService,
};
use crate::domain::services::rate_limiting_service::RateLimitingService;

/// Data Kiosk 走 SP-API 网关
pub const DATA_KIOSK_API: &str = "data-kiosk";

/// 错误响应体在错误信息中保留的最大长度
const MAX_ERROR_BODY: usize = 512;

/// 市场 API 客户端配置
#[derive(Debug, Clone)]
pub struct MarketplaceClientConfig {
    pub sp_api_base_url: String,
    pub advertising_base_url: String,
    pub sp_api_access_token: Option<String>,
    pub advertising_access_token: Option<String>,
    pub advertising_client_id: Option<String>,
    pub timeout: Duration,
}

impl From<&MarketplaceSettings> for MarketplaceClientConfig {
    fn from(settings: &MarketplaceSettings) -> Self {
        Self {
            sp_api_base_url: settings.sp_api_base_url.clone(),
            advertising_base_url: settings.advertising_base_url.clone(),
            sp_api_access_token: settings.sp_api_access_token.clone(),
            advertising_access_token: settings.advertising_access_token.clone(),
            advertising_client_id: settings.advertising_client_id.clone(),
            timeout: settings.request_timeout(),
        }
    }
}

/// 基于reqwest的市场 API 客户端
///
/// 负责基础 URL、鉴权头和错误映射，不做限流
pub struct HttpMarketplaceClient {
    client: Client,
    config: MarketplaceClientConfig,
}

impl HttpMarketplaceClient {
    /// 创建新的客户端
    ///
    /// # 参数
    ///
    /// * `config` - 客户端配置
    ///
    /// # 返回值
    ///
    /// * `Ok(HttpMarketplaceClient)` - 客户端实例
    /// * `Err(MarketplaceError)` - HTTP 客户端构建失败
    pub fn new(config: MarketplaceClientConfig) -> Result<Self, MarketplaceError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::USER_AGENT,
            HeaderValue::from_static("AppProft-Sync/0.1.0"),
        );
        headers.insert(header::ACCEPT, HeaderValue::from_static("application/json"));

        let client = Client::builder()
            .default_headers(headers)
            .timeout(config.timeout)
            .build()
            .map_err(|e| MarketplaceError::Configuration(e.to_string()))?;

        Ok(Self { client, config })
    }

    fn base_url(&self, api: &str) -> Result<&str, MarketplaceError> {
        match api {
            SP_API | DATA_KIOSK_API => Ok(&self.config.sp_api_base_url),
            ADVERTISING_API => Ok(&self.config.advertising_base_url),
            other => Err(MarketplaceError::Configuration(format!(
                "Unknown marketplace api: {}",
                other
            ))),
        }
    }

    fn authorize(&self, api: &str, builder: RequestBuilder) -> Result<RequestBuilder, MarketplaceError> {
        match api {
            ADVERTISING_API => {
                let token = self.config.advertising_access_token.as_deref().ok_or_else(|| {
                    MarketplaceError::Configuration("Advertising access token missing".into())
                })?;
                let builder = builder.bearer_auth(token);
                Ok(match &self.config.advertising_client_id {
                    Some(client_id) => builder.header("Amazon-Advertising-API-ClientId", client_id),
                    None => builder,
                })
            }
            _ => {
                let token = self.config.sp_api_access_token.as_deref().ok_or_else(|| {
                    MarketplaceError::Configuration("SP-API access token missing".into())
                })?;
                Ok(builder.header("x-amz-access-token", token))
            }
        }
    }
}

fn truncate(body: String) -> String {
    if body.len() <= MAX_ERROR_BODY {
        return body;
    }
    let mut end = MAX_ERROR_BODY;
    while !body.is_char_boundary(end) {
        end -= 1;
    }
    body[..end].to_string()
}

#[async_trait]
impl MarketplaceService for HttpMarketplaceClient {
    async fn send(&self, request: MarketplaceRequest) -> Result<Value, MarketplaceError> {
        let url = format!(
            "{}{}",
            self.base_url(&request.api)?.trim_end_matches('/'),
            request.endpoint
        );

        let mut builder = match request.method {
            HttpMethod::Get => self.client.get(&url),
            HttpMethod::Post => self.client.post(&url),
        };
        if !request.query.is_empty() {
            builder = builder.query(&request.query);
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }
        for (k, v) in &request.headers {
            let name = HeaderName::from_bytes(k.as_bytes())
                .map_err(|e| MarketplaceError::Configuration(format!("Invalid header {}: {}", k, e)))?;
            let value = HeaderValue::from_str(v)
                .map_err(|e| MarketplaceError::Configuration(format!("Invalid header {}: {}", k, e)))?;
            builder = builder.header(name, value);
        }
        let builder = self.authorize(&request.api, builder)?;

        debug!(api = %request.api, method = %request.method, endpoint = %request.endpoint, "Sending marketplace request");
        let start = Instant::now();
        let response = builder
            .send()
            .await
            .map_err(|e| MarketplaceError::Network(e.to_string()))?;
        histogram!("marketplace_request_duration_seconds", "api" => request.api.clone())
            .record(start.elapsed().as_secs_f64());

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| MarketplaceError::Network(e.to_string()))?;

        if !status.is_success() {
            counter!(
                "marketplace_request_errors_total",
                "api" => request.api.clone(),
                "status" => status.as_u16().to_string()
            )
            .increment(1);
            warn!(
                api = %request.api,
                endpoint = %request.endpoint,
                status = status.as_u16(),
                "Marketplace request failed"
            );
            return Err(MarketplaceError::Http {
                status: status.as_u16(),
                body: truncate(text),
            });
        }

        if text.trim().is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_str(&text).map_err(|e| MarketplaceError::Decode(e.to_string()))
    }

    async fn download(&self, url: &str) -> Result<String, MarketplaceError> {
        // 预签名地址，不带鉴权头
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| MarketplaceError::Network(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(MarketplaceError::Http {
                status: status.as_u16(),
                body: truncate(body),
            });
        }

        response
            .text()
            .await
            .map_err(|e| MarketplaceError::Network(e.to_string()))
    }
}

/// 先取令牌再发请求的客户端包装
///
/// 处理器只持有该包装，保证每次外部调用前都经过限流器
pub struct RateLimitedMarketplace<M> {
    inner: M,
    limiter: Arc<dyn RateLimitingService>,
    max_wait: Duration,
}

impl<M: MarketplaceService> RateLimitedMarketplace<M> {
    pub fn new(inner: M, limiter: Arc<dyn RateLimitingService>, max_wait: Duration) -> Self {
        Self {
            inner,
            limiter,
            max_wait,
        }
    }
}

#[async_trait]
impl<M: MarketplaceService> MarketplaceService for RateLimitedMarketplace<M> {
    async fn send(&self, request: MarketplaceRequest) -> Result<Value, MarketplaceError> {
        self.limiter
            .wait_for_token(&request.api, &request.endpoint, &request.tenant_id, self.max_wait)
            .await?;
        self.inner.send(request).await
    }

    async fn download(&self, url: &str) -> Result<String, MarketplaceError> {
        self.inner.download(url).await
    }
}

#[cfg(test)]
#[path = "marketplace_client_test.rs"]
mod tests;
