// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use crate::domain::models::queue_task::{
    NewQueueTask, TaskId, TaskType, DEFAULT_MAX_ATTEMPTS, DEFAULT_TENANT,
};
use crate::queue::task_queue::{QueueError, TaskQueue};
use chrono::NaiveDate;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{info, warn};

/// Data Kiosk 查询端点
pub const DATA_KIOSK_QUERIES_ENDPOINT: &str = "/dataKiosk/2023-11-15/queries";
/// 批量报价端点
pub const BATCH_PRICING_ENDPOINT: &str = "/batches/products/pricing/v0/itemOffers";
/// 通知发送端点
pub const SEND_NOTIFICATION_ENDPOINT: &str = "/notifications/send";
/// 广告 profile 端点
pub const ADVERTISING_PROFILES_ENDPOINT: &str = "/v2/profiles";

/// 通知任务的默认优先级
pub const DEFAULT_NOTIFICATION_PRIORITY: i32 = 3;
/// 手动跟卖检查的默认优先级
pub const DEFAULT_HIJACKER_CHECK_PRIORITY: i32 = 2;

/// 批量同步任务集：(类型, 端点, 优先级)
pub const BULK_SYNC_SET: [(TaskType, &str, i32); 6] = [
    (TaskType::OptimizedSync, "/optimized", 1),
    (TaskType::ReportsSync, "/reports/2021-06-30/reports", 2),
    (TaskType::PrioritySync, "/priority", 3),
    (TaskType::AdvertisingSync, ADVERTISING_PROFILES_ENDPOINT, 4),
    (TaskType::CheckNotifications, "/notifications/check", 5),
    (TaskType::CheckHijackers, "/hijackers/check", 4),
];

/// 广告同步范围
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdvertisingScope {
    Full,
    Campaigns,
    Reports,
}

impl AdvertisingScope {
    pub fn task_type(&self) -> TaskType {
        match self {
            AdvertisingScope::Full => TaskType::AdvertisingSync,
            AdvertisingScope::Campaigns => TaskType::AdvertisingCampaigns,
            AdvertisingScope::Reports => TaskType::AdvertisingReports,
        }
    }
}

/// Data Kiosk 同步范围
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataKioskScope {
    Full,
    Daily,
    Products,
}

impl DataKioskScope {
    pub fn task_type(&self) -> TaskType {
        match self {
            DataKioskScope::Full => TaskType::DataKioskSync,
            DataKioskScope::Daily => TaskType::DataKioskDaily,
            DataKioskScope::Products => TaskType::DataKioskProducts,
        }
    }
}

/// Data Kiosk 入队参数
#[derive(Debug, Clone, PartialEq)]
pub struct DataKioskOptions {
    pub tenant_id: Option<String>,
    pub days_back: u32,
    pub priority: i32,
    /// 仅 daily 使用，缺省为当天
    pub date: Option<NaiveDate>,
}

impl Default for DataKioskOptions {
    fn default() -> Self {
        Self {
            tenant_id: None,
            days_back: 7,
            priority: 4,
            date: None,
        }
    }
}

/// 任务调度器
///
/// 把各类同步需求转换为带固定端点和优先级的队列任务
pub struct TaskScheduler {
    queue: Arc<dyn TaskQueue>,
    /// 默认租户
    tenant_id: String,
    max_attempts: i32,
}

impl TaskScheduler {
    /// 创建新的任务调度器实例
    ///
    /// # 参数
    ///
    /// * `queue` - 任务队列
    pub fn new(queue: Arc<dyn TaskQueue>) -> Self {
        Self {
            queue,
            tenant_id: DEFAULT_TENANT.to_string(),
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }

    pub fn with_tenant(mut self, tenant_id: impl Into<String>) -> Self {
        self.tenant_id = tenant_id.into();
        self
    }

    /// 新任务的最大尝试次数
    pub fn with_max_attempts(mut self, max_attempts: i32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    async fn submit(
        &self,
        task_type: TaskType,
        endpoint: &str,
        payload: Value,
        priority: i32,
    ) -> Result<TaskId, QueueError> {
        let task = NewQueueTask::new(task_type.as_str(), endpoint, payload)
            .with_priority(priority)
            .with_max_attempts(self.max_attempts)
            .with_tenant(self.tenant_id.clone());
        Ok(self.queue.enqueue(task).await?.id)
    }

    /// 入队标准批量同步任务集
    ///
    /// # 返回值
    ///
    /// 按入队顺序返回任务ID
    pub async fn enqueue_bulk_sync(&self) -> Result<Vec<TaskId>, QueueError> {
        let mut ids = Vec::with_capacity(BULK_SYNC_SET.len());
        for (task_type, endpoint, priority) in BULK_SYNC_SET {
            let id = self
                .submit(
                    task_type,
                    endpoint,
                    json!({ "tenantId": self.tenant_id }),
                    priority,
                )
                .await?;
            ids.push(id);
        }

        info!(task_ids = ?ids, "Bulk sync task set enqueued");
        Ok(ids)
    }

    /// 入队批量报价任务，ASIN 列表为空时不入队
    pub async fn enqueue_batch_pricing(
        &self,
        asins: &[String],
    ) -> Result<Option<TaskId>, QueueError> {
        if asins.is_empty() {
            warn!("No ASINs supplied for batch pricing");
            return Ok(None);
        }

        let id = self
            .submit(
                TaskType::BatchPricing,
                BATCH_PRICING_ENDPOINT,
                json!({ "tenantId": self.tenant_id, "asins": asins }),
                2,
            )
            .await?;
        info!(task_id = id, asins = asins.len(), "Batch pricing enqueued");
        Ok(Some(id))
    }

    /// 入队一条通知发送任务
    ///
    /// # 参数
    ///
    /// * `kind` - 通知类型
    /// * `data` - 通知内容
    /// * `options` - 投递选项
    /// * `priority` - 优先级，缺省为 3
    pub async fn schedule_notification(
        &self,
        kind: &str,
        data: Value,
        options: Value,
        priority: Option<i32>,
    ) -> Result<TaskId, QueueError> {
        self.submit(
            TaskType::SendNotification,
            SEND_NOTIFICATION_ENDPOINT,
            json!({
                "type": kind,
                "tenantId": self.tenant_id,
                "data": data,
                "options": options,
            }),
            priority.unwrap_or(DEFAULT_NOTIFICATION_PRIORITY),
        )
        .await
    }

    /// 入队广告同步任务
    pub async fn enqueue_advertising_sync(
        &self,
        profile_id: Option<&str>,
        scope: AdvertisingScope,
    ) -> Result<TaskId, QueueError> {
        self.submit(
            scope.task_type(),
            ADVERTISING_PROFILES_ENDPOINT,
            json!({ "profileId": profile_id, "tenantId": self.tenant_id }),
            4,
        )
        .await
    }

    /// 入队手动跟卖检查
    pub async fn enqueue_hijacker_check(&self, priority: Option<i32>) -> Result<TaskId, QueueError> {
        info!("Enqueuing hijacker check");
        self.submit(
            TaskType::CheckHijackers,
            "/hijackers/check",
            json!({ "tenantId": self.tenant_id, "manual": true }),
            priority.unwrap_or(DEFAULT_HIJACKER_CHECK_PRIORITY),
        )
        .await
    }

    /// 入队 Data Kiosk 同步
    pub async fn enqueue_data_kiosk_sync(
        &self,
        scope: DataKioskScope,
        options: DataKioskOptions,
    ) -> Result<TaskId, QueueError> {
        let tenant_id = options.tenant_id.unwrap_or_else(|| self.tenant_id.clone());
        info!(
            task_type = %scope.task_type(),
            tenant_id = %tenant_id,
            days_back = options.days_back,
            "Enqueuing Data Kiosk sync"
        );

        self.submit(
            scope.task_type(),
            DATA_KIOSK_QUERIES_ENDPOINT,
            json!({
                "tenantId": tenant_id,
                "daysBack": options.days_back,
                "date": options.date.map(|d| d.to_string()),
            }),
            options.priority,
        )
        .await
    }
}
