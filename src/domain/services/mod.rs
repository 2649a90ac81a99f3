// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

/// 领域服务模块
///
/// 包含的服务接口：
/// - 市场 API（marketplace_service）：SP-API、Advertising API、Data Kiosk 请求
/// - 通知（notification_service）：通知投递与告警检查
/// - 限流（rate_limiting_service）：令牌桶检查与等待
pub mod marketplace_service;
pub mod notification_service;
pub mod rate_limiting_service;
