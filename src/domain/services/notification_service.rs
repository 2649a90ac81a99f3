// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use thiserror::Error;

use crate::domain::models::queue_task::ErrorClass;

/// 系统错误通知类型
pub const SYSTEM_ERROR_EVENT: &str = "system_error";

/// 一条待发送的通知
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationEvent {
    /// 通知类型，如 `low_stock`、`system_error`
    #[serde(rename = "type")]
    pub kind: String,
    pub tenant_id: String,
    pub data: Value,
    #[serde(default)]
    pub options: Value,
}

/// 告警检查项
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertCheck {
    /// 库存告警
    Inventory,
    /// Buy Box 变化
    BuyBox,
    /// 到期的定时通知
    Scheduled,
    /// 跟卖检测
    Hijackers,
}

impl AlertCheck {
    /// `check_notifications` 依次执行的检查
    pub const AUTOMATIC: [AlertCheck; 3] =
        [AlertCheck::Inventory, AlertCheck::BuyBox, AlertCheck::Scheduled];

    pub fn as_str(&self) -> &'static str {
        match self {
            AlertCheck::Inventory => "inventory",
            AlertCheck::BuyBox => "buy_box",
            AlertCheck::Scheduled => "scheduled",
            AlertCheck::Hijackers => "hijackers",
        }
    }
}

impl fmt::Display for AlertCheck {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 一次检查的结果
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckOutcome {
    pub check: AlertCheck,
    /// 本次产生的告警数
    pub alerts: u64,
}

/// 通知错误
#[derive(Error, Debug)]
pub enum NotificationError {
    #[error("Notification endpoint returned HTTP {status}")]
    Http { status: u16 },

    #[error("Notification delivery failed: {0}")]
    Network(String),

    #[error("Notification configuration error: {0}")]
    Configuration(String),
}

impl NotificationError {
    pub fn class(&self) -> ErrorClass {
        match self {
            NotificationError::Http { status } => ErrorClass::from_http_status(*status),
            NotificationError::Network(_) => ErrorClass::Transient,
            NotificationError::Configuration(_) => ErrorClass::Permanent,
        }
    }
}

/// 通知与告警系统接口
#[async_trait]
pub trait NotificationService: Send + Sync {
    /// 发送一条通知
    async fn notify(&self, event: &NotificationEvent) -> Result<(), NotificationError>;

    /// 执行一项告警检查
    async fn run_check(
        &self,
        check: AlertCheck,
        tenant_id: &str,
    ) -> Result<CheckOutcome, NotificationError>;
}
