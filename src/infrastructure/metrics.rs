// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use metrics::{describe_counter, describe_gauge, describe_histogram, Unit};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use tracing::{info, warn};

/// 初始化指标系统
///
/// 在 `addr` 上启动 Prometheus 抓取端点并注册指标说明。
/// 地址为空或无法解析时只记录警告，指标宏在没有 recorder 时为空操作。
pub fn init_metrics(addr: Option<&str>) {
    let Some(addr) = addr.filter(|a| !a.is_empty()) else {
        info!("Metrics exporter disabled");
        return;
    };
    let addr: SocketAddr = match addr.parse() {
        Ok(addr) => addr,
        Err(e) => {
            warn!("Invalid metrics address {}: {}", addr, e);
            return;
        }
    };

    // 端口被占用时继续运行
    if let Err(e) = PrometheusBuilder::new().with_http_listener(addr).install() {
        warn!("Failed to install Prometheus recorder: {}. This might happen if the port is already in use.", e);
        return;
    }
    describe_metrics();
    info!("Metrics exporter listening on {}", addr);
}

fn describe_metrics() {
    describe_counter!("sync_tasks_claimed_total", "Total number of tasks claimed from the queue");
    describe_counter!("sync_tasks_completed_total", "Total number of tasks completed");
    describe_counter!(
        "sync_tasks_retried_total",
        "Total number of task failures scheduled for retry"
    );
    describe_counter!(
        "sync_tasks_failed_total",
        "Total number of tasks marked failed, by reason"
    );
    describe_histogram!(
        "sync_task_duration_seconds",
        Unit::Seconds,
        "Handler execution time by task type"
    );

    describe_counter!("rate_limit_allowed_total", "Rate limit checks that consumed a token");
    describe_counter!("rate_limit_denied_total", "Rate limit checks denied for lack of tokens");
    describe_counter!(
        "rate_limit_flush_failures_total",
        "Buckets that could not be written back to storage"
    );

    describe_histogram!(
        "marketplace_request_duration_seconds",
        Unit::Seconds,
        "Marketplace API request latency by API"
    );
    describe_counter!(
        "marketplace_request_errors_total",
        "Marketplace API responses with a non-success status"
    );
    describe_counter!(
        "notification_deliveries_total",
        "Notification webhook deliveries by outcome"
    );

    describe_gauge!("sync_queue_depth", "Tasks created within the stats window, by status");
    describe_gauge!(
        "sync_process_memory_bytes",
        Unit::Bytes,
        "Resident memory of the sync process"
    );
}
