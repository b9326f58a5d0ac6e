//! 错误恢复引擎
//!
//! 根据 AgentError 类型返回 RecoveryAction，供调度循环决定是继续、降级还是停止。

use crate::core::{AgentError, RecoveryAction};

/// 语义化错误恢复：将错误映射为调度器可执行的动作（继续 / 降级 / 停止）
#[derive(Debug, Default)]
pub struct RecoveryEngine;

impl RecoveryEngine {
    pub fn new() -> Self {
        Self
    }

    pub fn handle(&self, err: &AgentError) -> RecoveryAction {
        match err {
            // 调用方的问题，Agent 本身是健康的
            AgentError::Validation(_) | AgentError::UnknownCommand(_) => RecoveryAction::Continue,
            // 持久化失败只记录日志，不影响循环
            AgentError::Persistence(_) => RecoveryAction::Continue,
            AgentError::HandlerFault(_) | AgentError::Timeout { .. } => RecoveryAction::Degrade,
            AgentError::FatalLoop(_) => RecoveryAction::Halt,
            AgentError::AlreadyRunning => RecoveryAction::Continue,
        }
    }
}
