// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

/// 仓库实现模块
///
/// 提供领域仓库接口的 SeaORM 实现
pub mod data_sink_impl;
pub mod queue_task_repo_impl;
pub mod rate_limit_repo_impl;
pub mod sync_state_repo_impl;
