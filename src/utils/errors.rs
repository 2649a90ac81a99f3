// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use thiserror::Error;

use crate::queue::task_queue::QueueError;

/// Worker错误类型
#[derive(Error, Debug)]
pub enum WorkerError {
    #[error("队列错误: {0}")]
    Queue(#[from] QueueError),

    #[error("存储不可用: {0}")]
    StorageUnavailable(String),

    #[error("工作任务异常退出: {0}")]
    Panicked(String),

    #[error("崩溃次数超过上限: {crashes} 次 / {window_secs} 秒")]
    CrashLoop { crashes: usize, window_secs: u64 },
}
