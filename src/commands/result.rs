//! 统一的命令结果信封
//!
//! 序列化形式与传输层响应体一致：
//! `{"status":"success","payload":{..}}` 或 `{"status":"error","message":"..","kind":".."}`。

use serde::{Deserialize, Serialize};

use crate::commands::Payload;
use crate::core::{AgentError, ErrorKind};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Success,
    Error,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CommandResult {
    #[serde(rename = "status")]
    pub outcome: Outcome,
    #[serde(default)]
    pub payload: Payload,
    #[serde(rename = "message", default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<ErrorKind>,
}

impl CommandResult {
    pub fn success(payload: Payload) -> Self {
        Self {
            outcome: Outcome::Success,
            payload,
            error_message: None,
            kind: None,
        }
    }

    pub fn failure(err: &AgentError) -> Self {
        Self {
            outcome: Outcome::Error,
            payload: Payload::new(),
            error_message: Some(err.to_string()),
            kind: Some(err.kind()),
        }
    }

    pub fn is_success(&self) -> bool {
        self.outcome == Outcome::Success
    }

    pub fn is_error(&self) -> bool {
        self.outcome == Outcome::Error
    }

    pub fn message(&self) -> Option<&str> {
        self.error_message.as_deref()
    }
}

impl From<Result<Payload, AgentError>> for CommandResult {
    fn from(result: Result<Payload, AgentError>) -> Self {
        match result {
            Ok(payload) => Self::success(payload),
            Err(e) => Self::failure(&e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_success_shape() {
        let mut payload = Payload::new();
        payload.insert("x".into(), json!(1));
        let json = serde_json::to_value(CommandResult::success(payload)).unwrap();
        assert_eq!(json, json!({"status": "success", "payload": {"x": 1}}));
    }

    #[test]
    fn test_error_shape() {
        let result = CommandResult::failure(&AgentError::UnknownCommand("zap".into()));
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["status"], "error");
        assert_eq!(json["message"], "unknown command: zap");
        assert_eq!(json["kind"], "unknown_command");
        assert!(result.is_error());
    }
}
