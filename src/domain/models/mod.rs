// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

/// 领域模型模块
///
/// - 队列任务（queue_task）：持久化队列中的一条待执行工作及其状态机
/// - 限流桶（rate_limit_bucket）：按 (api, endpoint, tenant) 划分的令牌桶
/// - 同步检查点（sync_state）：进程级生命周期检查点
/// - 同步记录（sync_record）：处理器写入数据表的业务记录
pub mod queue_task;
pub mod rate_limit_bucket;
pub mod sync_record;
pub mod sync_state;
