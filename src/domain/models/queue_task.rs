// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

use crate::utils::retry_policy::RetryPolicy;

/// 队列任务ID（数据库自增主键）
pub type TaskId = i32;

/// 默认租户
pub const DEFAULT_TENANT: &str = "default";

/// 默认最大尝试次数
pub const DEFAULT_MAX_ATTEMPTS: i32 = 5;

/// 默认优先级
pub const DEFAULT_PRIORITY: i32 = 5;

/// 队列任务实体
///
/// 表示一个可延迟、可重试的同步工作单元。状态只允许按照
/// pending/retry → processing → completed | retry | failed 的方向流转，
/// 离开 pending 之后不会再回到 pending。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueTask {
    /// 任务ID，单调递增
    pub id: TaskId,
    /// 任务类型标签。保留原始字符串，未知类型由执行器判定为永久失败
    pub task_type: String,
    /// 端点，用于限流桶解析与日志
    pub endpoint: String,
    /// 任务负载
    pub payload: serde_json::Value,
    /// 优先级，数值越小越先执行
    pub priority: i32,
    /// 任务状态
    pub status: TaskStatus,
    /// 已记录的失败重试次数
    pub attempt_count: i32,
    /// 最大尝试次数
    pub max_attempts: i32,
    /// 下一次重试时间，仅在 retry 状态下有意义
    pub next_retry_at: Option<DateTime<Utc>>,
    /// 最近一次错误信息
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    /// 租户ID
    pub tenant_id: String,
}

/// 待入队任务
#[derive(Debug, Clone, PartialEq)]
pub struct NewQueueTask {
    pub task_type: String,
    pub endpoint: String,
    pub payload: serde_json::Value,
    pub priority: i32,
    pub max_attempts: i32,
    pub tenant_id: String,
}

impl NewQueueTask {
    /// 创建新的待入队任务，使用默认优先级、最大尝试次数和租户
    pub fn new(
        task_type: impl Into<String>,
        endpoint: impl Into<String>,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            task_type: task_type.into(),
            endpoint: endpoint.into(),
            payload,
            priority: DEFAULT_PRIORITY,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            tenant_id: DEFAULT_TENANT.to_string(),
        }
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_max_attempts(mut self, max_attempts: i32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    pub fn with_tenant(mut self, tenant_id: impl Into<String>) -> Self {
        self.tenant_id = tenant_id.into();
        self
    }
}

/// 任务类型枚举
///
/// 每种类型对应执行器中的一个处理器
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
    FetchOrders,
    FetchInventory,
    FetchPricing,
    FetchCatalog,
    OptimizedSync,
    ReportsSync,
    PrioritySync,
    BatchPricing,
    AdvertisingSync,
    AdvertisingCampaigns,
    AdvertisingReports,
    CheckNotifications,
    SendNotification,
    CheckHijackers,
    DataKioskSync,
    DataKioskDaily,
    DataKioskProducts,
}

impl TaskType {
    /// 所有任务类型
    pub const ALL: [TaskType; 17] = [
        TaskType::FetchOrders,
        TaskType::FetchInventory,
        TaskType::FetchPricing,
        TaskType::FetchCatalog,
        TaskType::OptimizedSync,
        TaskType::ReportsSync,
        TaskType::PrioritySync,
        TaskType::BatchPricing,
        TaskType::AdvertisingSync,
        TaskType::AdvertisingCampaigns,
        TaskType::AdvertisingReports,
        TaskType::CheckNotifications,
        TaskType::SendNotification,
        TaskType::CheckHijackers,
        TaskType::DataKioskSync,
        TaskType::DataKioskDaily,
        TaskType::DataKioskProducts,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TaskType::FetchOrders => "fetch_orders",
            TaskType::FetchInventory => "fetch_inventory",
            TaskType::FetchPricing => "fetch_pricing",
            TaskType::FetchCatalog => "fetch_catalog",
            TaskType::OptimizedSync => "optimized_sync",
            TaskType::ReportsSync => "reports_sync",
            TaskType::PrioritySync => "priority_sync",
            TaskType::BatchPricing => "batch_pricing",
            TaskType::AdvertisingSync => "advertising_sync",
            TaskType::AdvertisingCampaigns => "advertising_campaigns",
            TaskType::AdvertisingReports => "advertising_reports",
            TaskType::CheckNotifications => "check_notifications",
            TaskType::SendNotification => "send_notification",
            TaskType::CheckHijackers => "check_hijackers",
            TaskType::DataKioskSync => "data_kiosk_sync",
            TaskType::DataKioskDaily => "data_kiosk_daily",
            TaskType::DataKioskProducts => "data_kiosk_products",
        }
    }
}

impl fmt::Display for TaskType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskType {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        TaskType::ALL
            .iter()
            .copied()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| DomainError::UnknownTaskType(s.to_string()))
    }
}

/// 任务状态枚举
///
/// 状态转换：
/// Pending/Retry → Processing → Completed | Retry | Failed
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default,
)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// 已入队，等待首次执行
    #[default]
    Pending,
    /// 已被某个工作器独占领取
    Processing,
    /// 执行成功（终态）
    Completed,
    /// 尝试次数耗尽或永久错误（终态）
    Failed,
    /// 等待退避后重试
    Retry,
}

impl TaskStatus {
    pub const ALL: [TaskStatus; 5] = [
        TaskStatus::Pending,
        TaskStatus::Processing,
        TaskStatus::Completed,
        TaskStatus::Failed,
        TaskStatus::Retry,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Processing => "processing",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
            TaskStatus::Retry => "retry",
        }
    }

    /// 是否为终态
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Failed)
    }

    /// 是否可以被 dequeue 领取
    pub fn is_claimable(&self) -> bool {
        matches!(self, TaskStatus::Pending | TaskStatus::Retry)
    }

    /// 判断状态转换是否合法
    pub fn can_transition_to(&self, next: TaskStatus) -> bool {
        match (self, next) {
            (TaskStatus::Pending | TaskStatus::Retry, TaskStatus::Processing) => true,
            (
                TaskStatus::Processing,
                TaskStatus::Completed | TaskStatus::Retry | TaskStatus::Failed,
            ) => true,
            // complete 是幂等的
            (TaskStatus::Completed, TaskStatus::Completed) => true,
            _ => false,
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(TaskStatus::Pending),
            "processing" => Ok(TaskStatus::Processing),
            "completed" => Ok(TaskStatus::Completed),
            "failed" => Ok(TaskStatus::Failed),
            "retry" => Ok(TaskStatus::Retry),
            other => Err(DomainError::UnknownStatus(other.to_string())),
        }
    }
}

/// 失败后的下一步
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryOutcome {
    /// 进入 retry 状态
    Retry {
        attempt_count: i32,
        next_retry_at: DateTime<Utc>,
    },
    /// 尝试次数耗尽，进入 failed
    Exhausted,
}

/// 任务失败的分类
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorClass {
    /// 外部 API 限流（HTTP 429 或本地令牌等待超时）
    RateLimited,
    /// 网络抖动、5xx、超时
    Transient,
    /// 重试也无法成功的错误，如负载缺字段、4xx
    Permanent,
    /// 处理器未给出分类
    Unclassified,
}

impl ErrorClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorClass::RateLimited => "rate_limited",
            ErrorClass::Transient => "transient",
            ErrorClass::Permanent => "permanent",
            ErrorClass::Unclassified => "unclassified",
        }
    }

    /// 按 HTTP 状态码分类
    pub fn from_http_status(status: u16) -> Self {
        match status {
            429 => ErrorClass::RateLimited,
            408 | 500..=599 => ErrorClass::Transient,
            400..=499 => ErrorClass::Permanent,
            _ => ErrorClass::Unclassified,
        }
    }
}

impl fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 领域错误类型
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// 无效的状态转换
    #[error("Invalid state transition from {from} to {to}")]
    InvalidStateTransition { from: TaskStatus, to: TaskStatus },

    /// 未注册的任务类型
    #[error("Unknown task type: {0}")]
    UnknownTaskType(String),

    /// 无法识别的状态字符串
    #[error("Unknown task status: {0}")]
    UnknownStatus(String),
}

impl QueueTask {
    /// 解析任务类型
    pub fn kind(&self) -> Result<TaskType, DomainError> {
        self.task_type.parse()
    }

    /// 计算一次失败之后的状态
    ///
    /// 如果下一次尝试会达到或超过 `max_attempts`，任务进入 failed；
    /// 否则 attempt_count 加一并按退避表安排下一次重试。
    pub fn retry_outcome(&self, policy: &RetryPolicy, now: DateTime<Utc>) -> RetryOutcome {
        let next_attempt = self.attempt_count + 1;
        if next_attempt >= self.max_attempts {
            return RetryOutcome::Exhausted;
        }

        RetryOutcome::Retry {
            attempt_count: next_attempt,
            next_retry_at: policy.next_retry_time(next_attempt as u32, now),
        }
    }

    /// 任务当前是否可被领取
    pub fn is_eligible(&self, now: DateTime<Utc>) -> bool {
        self.status.is_claimable() && self.next_retry_at.map_or(true, |at| at <= now)
    }
}
