// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use chrono::{DateTime, Utc};
use std::time::Duration;

/// 默认退避表（秒）
pub const DEFAULT_BACKOFF_SCHEDULE_SECS: [u64; 5] = [1, 2, 5, 10, 30];

/// 重试策略配置
///
/// 退避时间取自一张固定的递增表，第 N 次重试使用第 N 项，
/// 超出表长度后固定使用最后一项。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// 退避表
    pub schedule: Vec<Duration>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_secs(&DEFAULT_BACKOFF_SCHEDULE_SECS)
    }
}

impl RetryPolicy {
    /// 创建标准重试策略
    pub fn standard() -> Self {
        Self::default()
    }

    /// 由秒数列表创建重试策略，空列表回退到默认表
    pub fn from_secs(secs: &[u64]) -> Self {
        if secs.is_empty() {
            return Self::default();
        }
        Self {
            schedule: secs.iter().map(|s| Duration::from_secs(*s)).collect(),
        }
    }

    /// 第 `attempt` 次重试（从 1 开始）前的等待时间
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let index = (attempt.max(1) as usize - 1).min(self.schedule.len().saturating_sub(1));
        self.schedule.get(index).copied().unwrap_or_default()
    }

    /// 计算下次重试时间
    pub fn next_retry_time(&self, attempt: u32, base_time: DateTime<Utc>) -> DateTime<Utc> {
        let backoff = self.delay_for_attempt(attempt);
        base_time + chrono::Duration::milliseconds(backoff.as_millis() as i64)
    }
}
