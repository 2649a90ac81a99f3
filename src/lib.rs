// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

/// 配置模块
///
/// 处理应用程序的配置设置和环境变量
pub mod config;

/// 领域模块
///
/// 包含核心业务实体、服务和仓库接口
pub mod domain;

/// 执行器模块
///
/// 任务类型到处理器的路由与执行结果的处理
pub mod executor;

/// 基础设施模块
///
/// 提供外部服务集成，如数据库、市场 API、通知等
pub mod infrastructure;

/// 队列模块
///
/// 实现持久化任务队列和调度功能
pub mod queue;

/// 工具模块
///
/// 提供通用的工具函数和辅助功能
pub mod utils;

/// 工作器模块
///
/// 实现同步循环、维护任务和工作器管理
pub mod workers;
