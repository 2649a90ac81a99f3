// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

use crate::domain::models::queue_task::{ErrorClass, QueueTask};
use crate::domain::repositories::data_sink::SinkError;
use crate::domain::services::marketplace_service::MarketplaceError;
use crate::domain::services::notification_service::NotificationError;

/// 处理器错误类型
#[derive(Error, Debug)]
pub enum TaskError {
    /// 市场 API 调用失败
    #[error(transparent)]
    Marketplace(#[from] MarketplaceError),

    /// 通知系统调用失败
    #[error(transparent)]
    Notification(#[from] NotificationError),

    /// 结果写入失败
    #[error(transparent)]
    Sink(#[from] SinkError),

    /// 负载缺少字段或字段类型错误
    #[error("Invalid payload: {0}")]
    InvalidPayload(String),

    /// 响应结构不符合预期
    #[error("Unexpected response from {operation}: {detail}")]
    UnexpectedResponse { operation: String, detail: String },

    /// 远端异步作业失败
    #[error("{operation} finished with status {status}")]
    RemoteFailure { operation: String, status: String },

    /// 远端异步作业在等待上限内未完成
    #[error("{operation} not finished after {waited_secs}s")]
    PollTimeout { operation: String, waited_secs: u64 },
}

impl TaskError {
    /// 判断错误属于哪一类
    ///
    /// 执行器据此决定是重试还是直接失败
    pub fn class(&self) -> ErrorClass {
        match self {
            TaskError::Marketplace(e) => e.class(),
            TaskError::Notification(e) => e.class(),
            TaskError::Sink(SinkError::Storage(_)) => ErrorClass::Transient,
            TaskError::Sink(SinkError::InvalidRecord(_)) => ErrorClass::Permanent,
            TaskError::InvalidPayload(_) => ErrorClass::Permanent,
            TaskError::UnexpectedResponse { .. } => ErrorClass::Unclassified,
            TaskError::RemoteFailure { .. } => ErrorClass::Unclassified,
            TaskError::PollTimeout { .. } => ErrorClass::Transient,
        }
    }

    pub fn unexpected(operation: &str, detail: impl Into<String>) -> Self {
        TaskError::UnexpectedResponse {
            operation: operation.to_string(),
            detail: detail.into(),
        }
    }
}

/// 任务处理器特质
///
/// 每种任务类型对应一个实现。处理器只通过限流后的市场客户端访问外部 API
#[async_trait]
pub trait TaskHandler: Send + Sync {
    /// 执行任务
    ///
    /// # 参数
    ///
    /// * `task` - 已领取的任务
    ///
    /// # 返回值
    ///
    /// * `Ok(Value)` - 执行摘要，只用于日志
    /// * `Err(TaskError)` - 带分类的执行错误
    async fn execute(&self, task: &QueueTask) -> Result<Value, TaskError>;
}
