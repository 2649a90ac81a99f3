// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

/// 工作器模块
///
/// 提供后台任务处理和工作器管理功能
/// 包括同步循环、维护定时器和崩溃恢复
pub mod maintenance_worker;
pub mod manager;
pub mod sync_worker;
pub mod worker;

pub use worker::Worker;
