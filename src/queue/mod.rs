// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

/// 队列模块
///
/// 提供持久化任务队列和任务调度功能
/// 负责任务的排队、领取、重试和清理
pub mod scheduler;
pub mod task_queue;
