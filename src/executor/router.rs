// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use std::collections::HashMap;
use std::sync::Arc;

use crate::domain::models::queue_task::{DomainError, TaskType};
use crate::executor::handlers::advertising::AdvertisingHandler;
use crate::executor::handlers::data_kiosk::DataKioskHandler;
use crate::executor::handlers::notifications::{NotificationHandler, NotificationMode};
use crate::executor::handlers::reports::ReportsHandler;
use crate::executor::handlers::sp_api::{SpApiHandler, SpApiSync};
use crate::executor::handlers::HandlerContext;
use crate::executor::traits::TaskHandler;
use crate::queue::scheduler::{AdvertisingScope, DataKioskScope};

/// 处理器路由表
///
/// 任务类型字符串 → 处理器。未注册的类型返回 `DomainError::UnknownTaskType`
pub struct HandlerRouter {
    handlers: HashMap<TaskType, Arc<dyn TaskHandler>>,
}

impl HandlerRouter {
    /// 为全部任务类型注册默认处理器
    ///
    /// # 参数
    ///
    /// * `ctx` - 处理器共享的协作方
    pub fn new(ctx: HandlerContext) -> Self {
        let handlers = TaskType::ALL
            .iter()
            .map(|task_type| (*task_type, Self::default_handler(*task_type, &ctx)))
            .collect();
        Self { handlers }
    }

    /// 空路由表，用于按需注册
    pub fn empty() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }

    fn default_handler(task_type: TaskType, ctx: &HandlerContext) -> Arc<dyn TaskHandler> {
        let ctx = ctx.clone();
        match task_type {
            TaskType::FetchOrders => Arc::new(SpApiHandler::new(ctx, SpApiSync::Orders)),
            TaskType::FetchInventory => Arc::new(SpApiHandler::new(ctx, SpApiSync::Inventory)),
            TaskType::FetchPricing => Arc::new(SpApiHandler::new(ctx, SpApiSync::Pricing)),
            TaskType::FetchCatalog => Arc::new(SpApiHandler::new(ctx, SpApiSync::Catalog)),
            TaskType::OptimizedSync => Arc::new(SpApiHandler::new(ctx, SpApiSync::Optimized)),
            TaskType::PrioritySync => Arc::new(SpApiHandler::new(ctx, SpApiSync::Priority)),
            TaskType::BatchPricing => Arc::new(SpApiHandler::new(ctx, SpApiSync::BatchPricing)),
            TaskType::ReportsSync => Arc::new(ReportsHandler::new(ctx)),
            TaskType::AdvertisingSync => {
                Arc::new(AdvertisingHandler::new(ctx, AdvertisingScope::Full))
            }
            TaskType::AdvertisingCampaigns => {
                Arc::new(AdvertisingHandler::new(ctx, AdvertisingScope::Campaigns))
            }
            TaskType::AdvertisingReports => {
                Arc::new(AdvertisingHandler::new(ctx, AdvertisingScope::Reports))
            }
            TaskType::CheckNotifications => {
                Arc::new(NotificationHandler::new(ctx, NotificationMode::Check))
            }
            TaskType::SendNotification => {
                Arc::new(NotificationHandler::new(ctx, NotificationMode::Send))
            }
            TaskType::CheckHijackers => {
                Arc::new(NotificationHandler::new(ctx, NotificationMode::Hijackers))
            }
            TaskType::DataKioskSync => Arc::new(DataKioskHandler::new(ctx, DataKioskScope::Full)),
            TaskType::DataKioskDaily => {
                Arc::new(DataKioskHandler::new(ctx, DataKioskScope::Daily))
            }
            TaskType::DataKioskProducts => {
                Arc::new(DataKioskHandler::new(ctx, DataKioskScope::Products))
            }
        }
    }

    /// 替换或注册某个任务类型的处理器
    pub fn with_handler(mut self, task_type: TaskType, handler: Arc<dyn TaskHandler>) -> Self {
        self.handlers.insert(task_type, handler);
        self
    }

    /// 按任务类型字符串查找处理器
    pub fn route(&self, task_type: &str) -> Result<Arc<dyn TaskHandler>, DomainError> {
        let kind: TaskType = task_type.parse()?;
        self.handlers
            .get(&kind)
            .cloned()
            .ok_or_else(|| DomainError::UnknownTaskType(task_type.to_string()))
    }

    pub fn registered(&self) -> usize {
        self.handlers.len()
    }
}
