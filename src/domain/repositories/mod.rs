// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

/// 仓库接口模块
///
/// 该模块定义了领域层的仓库接口，遵循依赖倒置原则。
/// 具体实现由基础设施层提供。
///
/// 包含的仓库接口：
/// - 数据写入（data_sink）：按自然键幂等写入同步记录
/// - 队列任务仓库（queue_task_repository）：任务的持久化和带条件的状态变更
/// - 限流仓库（rate_limit_repository）：令牌桶的持久化
/// - 检查点仓库（sync_state_repository）：进程检查点的读写
pub mod data_sink;
pub mod queue_task_repository;
pub mod rate_limit_repository;
pub mod sync_state_repository;
