//! Agent 错误类型、错误种类与恢复动作
//!
//! 与 RecoveryEngine 配合：根据 AgentError 决定 Continue / Degrade / Halt。
//! 每个捕获点都必须带上 ErrorKind，而不仅是一段消息文本。

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Agent 运行过程中可能出现的错误（参数、处理器故障、超时、持久化、主循环致命错误）
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AgentError {
    /// 命令参数缺失或格式错误
    #[error("invalid parameters: {0}")]
    Validation(String),

    /// 处理器内部失败或 panic；消息即故障文本
    #[error("{0}")]
    HandlerFault(String),

    #[error("{step} timed out after {timeout_ms}ms")]
    Timeout { step: String, timeout_ms: u64 },

    #[error("persistence error: {0}")]
    Persistence(String),

    /// 发生在任何故障边界之外，唯一会让调度器停止的错误
    #[error("fatal loop error: {0}")]
    FatalLoop(String),

    #[error("unknown command: {0}")]
    UnknownCommand(String),

    #[error("scheduler is already running")]
    AlreadyRunning,
}

impl AgentError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn fault(msg: impl Into<String>) -> Self {
        Self::HandlerFault(msg.into())
    }

    pub fn timeout(step: impl Into<String>, timeout_ms: u64) -> Self {
        Self::Timeout {
            step: step.into(),
            timeout_ms,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            AgentError::Validation(_) => ErrorKind::Validation,
            AgentError::HandlerFault(_) => ErrorKind::HandlerFault,
            AgentError::Timeout { .. } => ErrorKind::Timeout,
            AgentError::Persistence(_) => ErrorKind::Persistence,
            AgentError::FatalLoop(_) => ErrorKind::FatalLoop,
            AgentError::UnknownCommand(_) => ErrorKind::UnknownCommand,
            AgentError::AlreadyRunning => ErrorKind::Lifecycle,
        }
    }
}

impl From<serde_json::Error> for AgentError {
    fn from(e: serde_json::Error) -> Self {
        AgentError::Persistence(e.to_string())
    }
}

impl From<std::io::Error> for AgentError {
    fn from(e: std::io::Error) -> Self {
        AgentError::Persistence(e.to_string())
    }
}

/// 错误种类：随错误结果一起序列化，供调用方按类别处理
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Validation,
    HandlerFault,
    Timeout,
    Persistence,
    FatalLoop,
    UnknownCommand,
    Lifecycle,
}

/// 恢复引擎根据错误类型给出的建议动作
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryAction {
    /// 记录后继续，不影响 Agent 阶段
    Continue,
    /// 继续循环，但将上下文阶段标记为 Degraded，直到下一个干净的周期
    Degrade,
    /// 停止调度器（仅 FatalLoop）
    Halt,
}

/// 将 panic 负载转为可读文本（&str / String 之外的负载给出占位描述）
pub fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "panic with non-string payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_command_message() {
        let err = AgentError::UnknownCommand("nope".into());
        assert_eq!(err.to_string(), "unknown command: nope");
        assert_eq!(err.kind(), ErrorKind::UnknownCommand);
    }

    #[test]
    fn test_handler_fault_keeps_text() {
        let err = AgentError::fault("disk on fire");
        assert_eq!(err.to_string(), "disk on fire");
    }

    #[test]
    fn test_timeout_message() {
        let err = AgentError::timeout("command 'scan'", 250);
        assert_eq!(err.to_string(), "command 'scan' timed out after 250ms");
        assert_eq!(err.kind(), ErrorKind::Timeout);
    }

    #[test]
    fn test_panic_message_variants() {
        let boxed: Box<dyn std::any::Any + Send> = Box::new("boom");
        assert_eq!(panic_message(boxed.as_ref()), "boom");
        let boxed: Box<dyn std::any::Any + Send> = Box::new(String::from("bang"));
        assert_eq!(panic_message(boxed.as_ref()), "bang");
        let boxed: Box<dyn std::any::Any + Send> = Box::new(7u8);
        assert_eq!(panic_message(boxed.as_ref()), "panic with non-string payload");
    }
}
