// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use std::future::Future;
use std::time::Duration;

use serde_json::Value;
use tokio::time::Instant;
use tracing::debug;

use crate::domain::services::marketplace_service::MarketplaceError;
use crate::executor::traits::TaskError;

/// 异步作业轮询参数
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PollSettings {
    /// 两次查询之间的间隔
    pub interval: Duration,
    /// 最长等待时间
    pub max_wait: Duration,
}

impl Default for PollSettings {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(30),
            max_wait: Duration::from_secs(30 * 60),
        }
    }
}

/// 轮询远端作业直到进入终态
///
/// # 参数
///
/// * `operation` - 作业名称，用于日志和错误
/// * `status_field` - 响应中表示状态的字段
/// * `done` - 成功状态
/// * `failed` - 失败状态
/// * `fetch` - 查询一次作业状态
///
/// # 返回值
///
/// 成功时返回最后一次状态响应
pub async fn poll_until_done<F, Fut>(
    operation: &str,
    settings: PollSettings,
    status_field: &str,
    done: &[&str],
    failed: &[&str],
    mut fetch: F,
) -> Result<Value, TaskError>
where
    F: FnMut() -> Fut + Send,
    Fut: Future<Output = Result<Value, MarketplaceError>> + Send,
{
    let started = Instant::now();
    loop {
        let response = fetch().await?;
        let status = response
            .get(status_field)
            .and_then(Value::as_str)
            .ok_or_else(|| TaskError::unexpected(operation, format!("missing {}", status_field)))?;

        if done.contains(&status) {
            return Ok(response);
        }
        if failed.contains(&status) {
            return Err(TaskError::RemoteFailure {
                operation: operation.to_string(),
                status: status.to_string(),
            });
        }

        let waited = started.elapsed();
        if waited >= settings.max_wait {
            return Err(TaskError::PollTimeout {
                operation: operation.to_string(),
                waited_secs: waited.as_secs(),
            });
        }
        debug!(operation, status, "Remote job not finished, polling again");
        tokio::time::sleep(settings.interval).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::queue_task::ErrorClass;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn settings() -> PollSettings {
        PollSettings {
            interval: Duration::from_millis(10),
            max_wait: Duration::from_millis(200),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_returns_response_once_done() {
        let calls = AtomicUsize::new(0);
        let response = poll_until_done("report", settings(), "processingStatus", &["DONE"], &["FATAL"], || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                Ok(if n < 2 {
                    json!({"processingStatus": "IN_PROGRESS"})
                } else {
                    json!({"processingStatus": "DONE", "reportDocumentId": "d1"})
                })
            }
        })
        .await
        .unwrap();

        assert_eq!(response["reportDocumentId"], "d1");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_status_is_remote_failure() {
        let err = poll_until_done("query", settings(), "processingStatus", &["DONE"], &["FATAL", "CANCELLED"], || async {
            Ok(json!({"processingStatus": "CANCELLED"}))
        })
        .await
        .unwrap_err();

        assert!(matches!(err, TaskError::RemoteFailure { ref status, .. } if status == "CANCELLED"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_times_out_as_transient() {
        let err = poll_until_done("query", settings(), "processingStatus", &["DONE"], &["FATAL"], || async {
            Ok(json!({"processingStatus": "IN_QUEUE"}))
        })
        .await
        .unwrap_err();

        assert!(matches!(err, TaskError::PollTimeout { .. }));
        assert_eq!(err.class(), ErrorClass::Transient);
    }
}
