// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// SP-API 名称
pub const SP_API: &str = "sp-api";
/// Advertising API 名称
pub const ADVERTISING_API: &str = "advertising-api";
/// 每个 API 的兜底桶键
pub const DEFAULT_ENDPOINT_KEY: &str = "default";

/// 浮点误差容忍度，保证按 wait_time_ms 等待后一定能拿到令牌
const TOKEN_EPSILON: f64 = 1e-9;

/// 单个端点的限流参数
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EndpointLimit {
    /// 每秒补充的令牌数
    pub rate: f64,
    /// 桶容量
    pub burst: u32,
}

impl EndpointLimit {
    pub const fn new(rate: f64, burst: u32) -> Self {
        Self { rate, burst }
    }
}

/// 限流桶键：(api, 端点模式, 租户)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BucketKey {
    pub api: String,
    /// 解析后的端点模式，而非原始端点
    pub endpoint: String,
    pub tenant_id: String,
}

impl BucketKey {
    pub fn new(
        api: impl Into<String>,
        endpoint: impl Into<String>,
        tenant_id: impl Into<String>,
    ) -> Self {
        Self {
            api: api.into(),
            endpoint: endpoint.into(),
            tenant_id: tenant_id.into(),
        }
    }
}

impl fmt::Display for BucketKey {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}:{}:{}", self.api, self.endpoint, self.tenant_id)
    }
}

/// 限流判定结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitDecision {
    /// 是否放行
    pub allowed: bool,
    /// 距离下一个令牌可用的最短等待时间（毫秒），放行时为 0
    pub wait_time_ms: u64,
}

impl RateLimitDecision {
    pub fn allowed() -> Self {
        Self {
            allowed: true,
            wait_time_ms: 0,
        }
    }

    pub fn denied(wait_time_ms: u64) -> Self {
        Self {
            allowed: false,
            wait_time_ms,
        }
    }
}

/// 令牌桶状态
///
/// 不变量：`0 <= tokens <= burst`。令牌按 `elapsed * rate` 连续补充，
/// 只有补充后 `tokens >= 1` 时才允许扣减。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RateLimitBucket {
    pub key: BucketKey,
    /// 每秒补充速率
    pub rate: f64,
    /// 桶容量
    pub burst: u32,
    /// 当前令牌数
    pub tokens: f64,
    pub last_refill_at: DateTime<Utc>,
    pub calls_today: i32,
    pub calls_this_hour: i32,
    pub last_call_at: Option<DateTime<Utc>>,
}

impl RateLimitBucket {
    /// 创建满桶
    pub fn new(key: BucketKey, limit: EndpointLimit, now: DateTime<Utc>) -> Self {
        Self {
            key,
            rate: limit.rate,
            burst: limit.burst,
            tokens: limit.burst as f64,
            last_refill_at: now,
            calls_today: 0,
            calls_this_hour: 0,
            last_call_at: None,
        }
    }

    /// 将令牌数限制在合法区间内（从存储加载时使用）
    pub fn clamp(mut self) -> Self {
        self.tokens = clamp_tokens(self.tokens, self.burst);
        self
    }

    /// 按经过的时间补充令牌
    pub fn refill(&mut self, now: DateTime<Utc>) {
        if now <= self.last_refill_at {
            return;
        }
        let elapsed = now - self.last_refill_at;
        let elapsed_secs = match elapsed.num_microseconds() {
            Some(micros) => micros as f64 / 1_000_000.0,
            None => elapsed.num_seconds() as f64,
        };
        if self.rate > 0.0 {
            self.tokens = clamp_tokens(self.tokens + elapsed_secs * self.rate, self.burst);
        }
        self.last_refill_at = now;
    }

    /// 补充后尝试扣减一个令牌
    pub fn try_consume(&mut self, now: DateTime<Utc>) -> RateLimitDecision {
        self.refill(now);

        if self.tokens + TOKEN_EPSILON >= 1.0 {
            self.tokens = clamp_tokens(self.tokens - 1.0, self.burst);
            self.record_call(now);
            return RateLimitDecision::allowed();
        }

        RateLimitDecision::denied(self.wait_time_ms())
    }

    /// 下一个令牌可用前的最短等待时间
    pub fn wait_time_ms(&self) -> u64 {
        if self.tokens + TOKEN_EPSILON >= 1.0 {
            return 0;
        }
        if self.rate <= 0.0 {
            return u64::MAX;
        }
        ((1.0 - self.tokens) / self.rate * 1000.0).ceil() as u64
    }

    /// 记录一次放行的调用，按需重置小时/日计数
    fn record_call(&mut self, now: DateTime<Utc>) {
        if let Some(last) = self.last_call_at {
            if now - last >= Duration::hours(1) {
                self.calls_this_hour = 0;
            }
            if last.date_naive() != now.date_naive() {
                self.calls_today = 0;
            }
        }
        self.calls_today = self.calls_today.saturating_add(1);
        self.calls_this_hour = self.calls_this_hour.saturating_add(1);
        self.last_call_at = Some(now);
    }

    /// 恢复满桶并清零计数
    pub fn reset(&mut self, now: DateTime<Utc>) {
        self.tokens = self.burst as f64;
        self.last_refill_at = now;
        self.calls_today = 0;
        self.calls_this_hour = 0;
        self.last_call_at = None;
    }
}

fn clamp_tokens(tokens: f64, burst: u32) -> f64 {
    if tokens.is_nan() {
        return 0.0;
    }
    tokens.clamp(0.0, burst as f64)
}

/// 单个 API 的用量汇总
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiUsageStats {
    pub api_name: String,
    pub endpoints_used: i64,
    pub calls_today: i64,
    pub calls_this_hour: i64,
    pub avg_tokens_available: f64,
}

/// 端点限流表
///
/// 端点解析顺序：精确匹配 → 含 `{param}` 占位符的模式逐段匹配 → 该 API 的 `default`。
/// 未登记的 API 使用 SP-API 的表。
#[derive(Debug, Clone)]
pub struct RateLimitTable {
    apis: BTreeMap<String, BTreeMap<String, EndpointLimit>>,
}

/// 解析后的端点
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedEndpoint {
    /// 用作桶键的端点模式
    pub pattern: String,
    pub limit: EndpointLimit,
}

impl Default for RateLimitTable {
    fn default() -> Self {
        let mut table = Self::empty();

        let sp_api: [(&str, f64, u32); 14] = [
            ("/orders/v0/orders", 0.0167, 20),
            ("/orders/v0/orders/{orderId}", 0.5, 30),
            ("/orders/v0/orders/{orderId}/items", 0.5, 30),
            ("/fba/inventory/v1/summaries", 2.0, 2),
            ("/catalog/v2022-04-01/items", 2.0, 2),
            ("/catalog/v2022-04-01/items/{asin}", 2.0, 2),
            ("/catalog/v2022-04-01/items/search", 2.0, 2),
            ("/products/pricing/v0/price", 10.0, 20),
            ("/products/pricing/v0/competitivePrice", 10.0, 20),
            ("/products/pricing/v0/items/{asin}/offers", 5.0, 10),
            ("/products/fees/v0/feesEstimate", 10.0, 20),
            ("/reports/2021-06-30/reports", 2.0, 15),
            ("/reports/2021-06-30/documents/{documentId}", 2.0, 15),
            (DEFAULT_ENDPOINT_KEY, 5.0, 10),
        ];
        for (endpoint, rate, burst) in sp_api {
            table.insert(SP_API, endpoint, EndpointLimit::new(rate, burst));
        }

        let advertising: [(&str, f64, u32); 6] = [
            ("/v2/sp/campaigns", 10.0, 10),
            ("/v2/sp/campaigns/report", 1.0, 5),
            ("/v2/sp/keywords", 10.0, 10),
            ("/v2/sp/keywords/report", 1.0, 5),
            ("/v2/sp/searchTerms/report", 1.0, 5),
            (DEFAULT_ENDPOINT_KEY, 5.0, 10),
        ];
        for (endpoint, rate, burst) in advertising {
            table.insert(ADVERTISING_API, endpoint, EndpointLimit::new(rate, burst));
        }

        table
    }
}

impl RateLimitTable {
    pub fn empty() -> Self {
        Self {
            apis: BTreeMap::new(),
        }
    }

    /// 登记或覆盖某个端点的限流参数
    pub fn insert(&mut self, api: &str, endpoint: &str, limit: EndpointLimit) {
        self.apis
            .entry(api.to_string())
            .or_default()
            .insert(endpoint.to_string(), limit);
    }

    /// 解析端点到桶模式与限流参数
    pub fn resolve(&self, api: &str, endpoint: &str) -> ResolvedEndpoint {
        let limits = self.apis.get(api).or_else(|| self.apis.get(SP_API));
        let path = strip_query(endpoint);

        let Some(limits) = limits else {
            return ResolvedEndpoint {
                pattern: DEFAULT_ENDPOINT_KEY.to_string(),
                limit: EndpointLimit::new(5.0, 10),
            };
        };

        if let Some(limit) = limits.get(path) {
            return ResolvedEndpoint {
                pattern: path.to_string(),
                limit: *limit,
            };
        }

        // 多个模式同时匹配时取占位符最少的那个
        let best = limits
            .iter()
            .filter(|(pattern, _)| pattern.contains('{') && matches_pattern(pattern, path))
            .min_by_key(|(pattern, _)| placeholder_count(pattern));
        if let Some((pattern, limit)) = best {
            return ResolvedEndpoint {
                pattern: pattern.clone(),
                limit: *limit,
            };
        }

        ResolvedEndpoint {
            pattern: DEFAULT_ENDPOINT_KEY.to_string(),
            limit: limits
                .get(DEFAULT_ENDPOINT_KEY)
                .copied()
                .unwrap_or(EndpointLimit::new(5.0, 10)),
        }
    }
}

fn strip_query(endpoint: &str) -> &str {
    endpoint.split('?').next().unwrap_or(endpoint)
}

fn is_placeholder(segment: &str) -> bool {
    segment.len() > 2 && segment.starts_with('{') && segment.ends_with('}')
}

fn placeholder_count(pattern: &str) -> usize {
    pattern.split('/').filter(|s| is_placeholder(s)).count()
}

/// 逐段匹配，`{param}` 段匹配任意非空段
fn matches_pattern(pattern: &str, path: &str) -> bool {
    let pattern_segments: Vec<&str> = pattern.split('/').collect();
    let path_segments: Vec<&str> = path.split('/').collect();

    pattern_segments.len() == path_segments.len()
        && pattern_segments
            .iter()
            .zip(path_segments.iter())
            .all(|(p, s)| if is_placeholder(p) { !s.is_empty() } else { p == s })
}
