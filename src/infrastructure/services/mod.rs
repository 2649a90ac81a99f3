// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

/// 基础设施服务模块
///
/// 提供基础设施层的服务实现
/// 包括限流服务、市场 API 客户端和通知服务
pub mod marketplace_client;
pub mod notification_service_impl;
pub mod rate_limiting_service_impl;
