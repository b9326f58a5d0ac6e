//! Ingest 步：逐条处理本周期取出的外部输入
//!
//! 处理器由宿主提供，可以写入记忆或发起任务；调度器对每条输入施加超时并捕获 panic，
//! 失败的输入记录日志后跳过。

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::commands::CommandRegistry;
use crate::context::{ContextStore, InputRecord};
use crate::core::AgentError;

#[async_trait]
pub trait InputProcessor: Send + Sync {
    async fn process(
        &self,
        input: InputRecord,
        context: &ContextStore,
        registry: &CommandRegistry,
    ) -> Result<(), AgentError>;
}

/// 默认处理器：每条输入写入短期记忆；带 `command` 字段的输入立即经注册表执行，结果也写入记忆
#[derive(Debug, Default, Clone, Copy)]
pub struct MemoryInputProcessor;

#[async_trait]
impl InputProcessor for MemoryInputProcessor {
    async fn process(
        &self,
        input: InputRecord,
        context: &ContextStore,
        registry: &CommandRegistry,
    ) -> Result<(), AgentError> {
        let command = match input.get("command") {
            None => None,
            Some(Value::String(name)) => Some(name.clone()),
            Some(_) => return Err(AgentError::validation("input field 'command' must be a string")),
        };
        let params = match input.get("params") {
            None | Some(Value::Null) => Default::default(),
            Some(Value::Object(map)) => map.clone(),
            Some(_) => return Err(AgentError::validation("input field 'params' must be an object")),
        };

        context.append_memory(json!({ "input": input })).await;

        if let Some(name) = command {
            let result = registry.dispatch(&name, params).await;
            if let Some(message) = result.message() {
                tracing::warn!(command = %name, error = message, "Input command failed");
            }
            context
                .append_memory(json!({ "command": name, "result": result }))
                .await;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::{FnHandler, Params};

    fn record(v: Value) -> InputRecord {
        v.as_object().cloned().unwrap_or_default()
    }

    #[tokio::test]
    async fn test_plain_input_goes_to_memory() {
        let context = ContextStore::default();
        let registry = CommandRegistry::new();
        MemoryInputProcessor
            .process(record(json!({"text": "hi"})), &context, &registry)
            .await
            .unwrap();
        let memory = context.recent_memory(1).await;
        assert_eq!(memory[0].data["input"]["text"], "hi");
    }

    #[tokio::test]
    async fn test_command_input_is_dispatched() {
        let context = ContextStore::default();
        let registry = CommandRegistry::new();
        registry.register("echo", FnHandler::new("", |p: Params| Ok(p)));
        MemoryInputProcessor
            .process(
                record(json!({"command": "echo", "params": {"x": 1}})),
                &context,
                &registry,
            )
            .await
            .unwrap();
        let memory = context.recent_memory(2).await;
        assert_eq!(memory.len(), 2);
        assert_eq!(memory[1].data["result"]["status"], "success");
        assert_eq!(memory[1].data["result"]["payload"]["x"], 1);
    }

    #[tokio::test]
    async fn test_malformed_command_field_is_validation_error() {
        let context = ContextStore::default();
        let registry = CommandRegistry::new();
        let err = MemoryInputProcessor
            .process(record(json!({"command": 7})), &context, &registry)
            .await
            .unwrap_err();
        assert!(matches!(err, AgentError::Validation(_)));
        assert_eq!(context.memory_len().await, 0);
    }
}
