// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

/// 任务执行模块
///
/// 任务类型到处理器的路由，以及处理结果到队列状态的转换
pub mod handlers;
pub mod router;
pub mod task_executor;
pub mod traits;

pub use router::HandlerRouter;
pub use task_executor::{ExecutionOutcome, TaskExecutor};
pub use traits::{TaskError, TaskHandler};
