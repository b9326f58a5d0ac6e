//! Vader - 认知周期 Agent 内核
//!
//! 模块划分：
//! - **agent**: Agent 运行时入口（execute / enqueue_input / run / stop）
//! - **commands**: 命令注册表、结果信封与内置命令
//! - **config**: 应用配置加载（TOML + 环境变量）与运行期配置树
//! - **context**: 上下文存储、短期记忆、任务记录、环境采样与持久化
//! - **core**: 错误与恢复、周期调度器、任务追踪、优雅关闭
//! - **observability**: 日志初始化

pub mod agent;
pub mod commands;
pub mod config;
pub mod context;
pub mod core;
pub mod observability;

pub use agent::Agent;
pub use commands::{CommandRegistry, CommandResult};
pub use crate::core::{AgentBuilder, AgentError};
