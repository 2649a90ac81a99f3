// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use async_trait::async_trait;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

use crate::domain::models::queue_task::ErrorClass;
use crate::domain::services::rate_limiting_service::RateLimitingError;

/// HTTP 方法
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMethod {
    Get,
    Post,
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            HttpMethod::Get => f.write_str("GET"),
            HttpMethod::Post => f.write_str("POST"),
        }
    }
}

/// 对外部市场 API 的一次请求
#[derive(Debug, Clone, PartialEq)]
pub struct MarketplaceRequest {
    /// API 名称，决定基础 URL 与限流表
    pub api: String,
    pub method: HttpMethod,
    /// 端点路径（不含查询串）
    pub endpoint: String,
    pub query: Vec<(String, String)>,
    pub body: Option<Value>,
    pub tenant_id: String,
    /// 附加请求头，如 Advertising API 的 profile 作用域
    pub headers: Vec<(String, String)>,
}

impl MarketplaceRequest {
    pub fn get(api: &str, endpoint: impl Into<String>, tenant_id: &str) -> Self {
        Self {
            api: api.to_string(),
            method: HttpMethod::Get,
            endpoint: endpoint.into(),
            query: Vec::new(),
            body: None,
            tenant_id: tenant_id.to_string(),
            headers: Vec::new(),
        }
    }

    pub fn post(api: &str, endpoint: impl Into<String>, tenant_id: &str, body: Value) -> Self {
        Self {
            method: HttpMethod::Post,
            body: Some(body),
            ..Self::get(api, endpoint, tenant_id)
        }
    }

    pub fn query(mut self, key: &str, value: impl Into<String>) -> Self {
        self.query.push((key.to_string(), value.into()));
        self
    }

    pub fn header(mut self, key: &str, value: impl Into<String>) -> Self {
        self.headers.push((key.to_string(), value.into()));
        self
    }
}

/// 市场 API 错误
#[derive(Error, Debug)]
pub enum MarketplaceError {
    #[error("HTTP {status}: {body}")]
    Http { status: u16, body: String },

    #[error("Network error: {0}")]
    Network(String),

    #[error("Decode error: {0}")]
    Decode(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error(transparent)]
    RateLimit(#[from] RateLimitingError),
}

impl MarketplaceError {
    /// 重试分类
    pub fn class(&self) -> ErrorClass {
        match self {
            MarketplaceError::Http { status, .. } => ErrorClass::from_http_status(*status),
            MarketplaceError::Network(_) => ErrorClass::Transient,
            MarketplaceError::Decode(_) | MarketplaceError::Configuration(_) => {
                ErrorClass::Permanent
            }
            MarketplaceError::RateLimit(RateLimitingError::Timeout { .. }) => {
                ErrorClass::RateLimited
            }
            MarketplaceError::RateLimit(RateLimitingError::Storage(_)) => ErrorClass::Transient,
        }
    }
}

/// 市场 API 客户端接口
///
/// 处理器只通过该接口访问外部 API，实现方负责鉴权和限流
#[async_trait]
pub trait MarketplaceService: Send + Sync {
    /// 发送请求并返回 JSON 响应
    async fn send(&self, request: MarketplaceRequest) -> Result<Value, MarketplaceError>;

    /// 下载报告文档等预签名 URL 的文本内容
    async fn download(&self, url: &str) -> Result<String, MarketplaceError>;
}

#[async_trait]
impl<T: MarketplaceService + ?Sized> MarketplaceService for Arc<T> {
    async fn send(&self, request: MarketplaceRequest) -> Result<Value, MarketplaceError> {
        (**self).send(request).await
    }

    async fn download(&self, url: &str) -> Result<String, MarketplaceError> {
        (**self).download(url).await
    }
}
