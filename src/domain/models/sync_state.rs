// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// 进程级检查点使用的状态ID
pub const SYSTEM_STATE_ID: &str = "system_state";

/// 同步检查点
///
/// 以字符串ID为键的任意JSON数据，仅用于崩溃诊断和粗粒度的恢复信号，
/// 单个任务的进度保存在队列任务自身上。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncState {
    pub id: String,
    pub state_data: serde_json::Value,
    pub last_checkpoint: DateTime<Utc>,
    pub tenant_id: String,
}

/// 进程生命周期阶段
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecyclePhase {
    Started,
    Crashed,
    Shutdown,
}

/// 写入 `system_state` 的进程检查点
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystemCheckpoint {
    pub phase: LifecyclePhase,
    pub pid: u32,
    pub at: DateTime<Utc>,
    /// 本次运行窗口内的崩溃次数
    #[serde(default)]
    pub crash_count: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl SystemCheckpoint {
    pub fn new(phase: LifecyclePhase, crash_count: u32, error: Option<String>) -> Self {
        Self {
            phase,
            pid: std::process::id(),
            at: Utc::now(),
            crash_count,
            error,
        }
    }
}
