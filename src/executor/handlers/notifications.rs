// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::{error, info, warn};

use crate::domain::models::queue_task::QueueTask;
use crate::domain::services::notification_service::{
    AlertCheck, NotificationEvent, SYSTEM_ERROR_EVENT,
};
use crate::executor::handlers::{optional_str, tenant_of, HandlerContext};
use crate::executor::traits::{TaskError, TaskHandler};

/// 通知处理器的工作方式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationMode {
    /// 依次执行自动告警检查
    Check,
    /// 发送负载中描述的通知
    Send,
    /// 跟卖检查
    Hijackers,
}

pub struct NotificationHandler {
    ctx: HandlerContext,
    mode: NotificationMode,
}

impl NotificationHandler {
    pub fn new(ctx: HandlerContext, mode: NotificationMode) -> Self {
        Self { ctx, mode }
    }

    async fn run_automatic_checks(&self, tenant_id: &str) -> Result<Value, TaskError> {
        let mut results = Vec::with_capacity(AlertCheck::AUTOMATIC.len());
        for check in AlertCheck::AUTOMATIC {
            match self.ctx.notifier.run_check(check, tenant_id).await {
                Ok(outcome) => results.push(json!({ "check": check.as_str(), "alerts": outcome.alerts })),
                Err(e) => {
                    error!(check = %check, "Automatic notification check failed: {}", e);
                    self.report_system_error(tenant_id, &e.to_string()).await;
                    return Err(e.into());
                }
            }
        }
        Ok(json!({ "checks": results }))
    }

    /// 发送系统错误通知，发送失败只记录日志
    async fn report_system_error(&self, tenant_id: &str, message: &str) {
        let event = NotificationEvent {
            kind: SYSTEM_ERROR_EVENT.to_string(),
            tenant_id: tenant_id.to_string(),
            data: json!({
                "error_message": message,
                "component": "automatic_notifications",
            }),
            options: Value::Null,
        };
        if let Err(e) = self.ctx.notifier.notify(&event).await {
            warn!("Failed to send system error notification: {}", e);
        }
    }

    async fn send(&self, tenant_id: &str, payload: &Value) -> Result<Value, TaskError> {
        let kind = optional_str(payload, "type")
            .ok_or_else(|| TaskError::InvalidPayload("notification type is required".into()))?;
        let event = NotificationEvent {
            kind: kind.clone(),
            tenant_id: tenant_id.to_string(),
            data: payload.get("data").cloned().unwrap_or(Value::Null),
            options: payload.get("options").cloned().unwrap_or(Value::Null),
        };
        self.ctx.notifier.notify(&event).await?;
        info!(kind = %kind, tenant_id, "Notification sent");
        Ok(json!({ "sent": kind }))
    }
}

#[async_trait]
impl TaskHandler for NotificationHandler {
    async fn execute(&self, task: &QueueTask) -> Result<Value, TaskError> {
        let tenant_id = tenant_of(task);
        match self.mode {
            NotificationMode::Check => self.run_automatic_checks(&tenant_id).await,
            NotificationMode::Send => self.send(&tenant_id, &task.payload).await,
            NotificationMode::Hijackers => {
                let outcome = self
                    .ctx
                    .notifier
                    .run_check(AlertCheck::Hijackers, &tenant_id)
                    .await?;
                info!(alerts = outcome.alerts, "Hijacker check finished");
                Ok(json!({ "check": outcome.check.as_str(), "alerts": outcome.alerts }))
            }
        }
    }
}
