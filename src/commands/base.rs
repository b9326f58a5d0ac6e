//! 基础命令：help、status、start、stop、restart、list、config

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::{json, Value};

use crate::commands::params::{optional_bool, optional_object, optional_str, payload, required_str};
use crate::commands::{CommandHandler, CommandRegistry, CommandServices, Params, Payload};
use crate::context::Task;
use crate::core::AgentError;

pub fn register(registry: &CommandRegistry, services: Arc<CommandServices>) {
    registry.register("help", HelpCommand(Arc::clone(&services)));
    registry.register("status", StatusCommand(Arc::clone(&services)));
    registry.register("start", StartCommand(Arc::clone(&services)));
    registry.register("stop", StopCommand(Arc::clone(&services)));
    registry.register("restart", RestartCommand(Arc::clone(&services)));
    registry.register("list", ListCommand(Arc::clone(&services)));
    registry.register("config", ConfigCommand(services));
}

fn tasks_json(tasks: &[Task]) -> Result<Value, AgentError> {
    serde_json::to_value(tasks).map_err(|e| AgentError::fault(e.to_string()))
}

/// 已注册命令及其描述
pub struct HelpCommand(Arc<CommandServices>);

#[async_trait]
impl CommandHandler for HelpCommand {
    fn description(&self) -> &str {
        "Display this help message"
    }

    async fn invoke(&self, _command: &str, _params: Params) -> Result<Payload, AgentError> {
        let registry = self
            .0
            .registry()
            .ok_or_else(|| AgentError::fault("command registry is gone"))?;
        Ok(payload(json!({ "commands": registry.descriptions() })))
    }
}

pub struct StatusCommand(Arc<CommandServices>);

#[async_trait]
impl CommandHandler for StatusCommand {
    fn description(&self) -> &str {
        "Get system status"
    }

    async fn invoke(&self, _command: &str, _params: Params) -> Result<Payload, AgentError> {
        let services = &self.0;
        let report = services.status_report().await;
        let tasks = services.tracker.list().await;
        Ok(payload(json!({
            "status_info": {
                "timestamp": Utc::now().to_rfc3339(),
                "system_status": report,
                "active_tasks": tasks_json(&tasks)?,
                "memory_usage": services.memory_usage().await,
                "uptime_secs": services.uptime_secs(),
            }
        })))
    }
}

/// `{type, params?}` → `{task_id}`
pub struct StartCommand(Arc<CommandServices>);

#[async_trait]
impl CommandHandler for StartCommand {
    fn description(&self) -> &str {
        "Start a task or process. Params: {\"type\": \"kind\", \"params\": {..}}"
    }

    async fn invoke(&self, _command: &str, params: Params) -> Result<Payload, AgentError> {
        let kind = required_str(&params, "type")?;
        let task_params = optional_object(&params, "params")?;
        let task_id = self.0.tracker.start(&kind, task_params).await;
        Ok(payload(json!({ "task_id": task_id })))
    }
}

/// `{task_id, force?}` → `{stopped}`
pub struct StopCommand(Arc<CommandServices>);

#[async_trait]
impl CommandHandler for StopCommand {
    fn description(&self) -> &str {
        "Stop a task or process. Params: {\"task_id\": \"..\", \"force\": false}"
    }

    async fn invoke(&self, _command: &str, params: Params) -> Result<Payload, AgentError> {
        let task_id = required_str(&params, "task_id")?;
        let force = optional_bool(&params, "force", false)?;
        let stopped = self.0.tracker.stop(&task_id, force).await;
        Ok(payload(json!({ "stopped": stopped })))
    }
}

/// `{task_id}` → `{restarted, task_id?}`
pub struct RestartCommand(Arc<CommandServices>);

#[async_trait]
impl CommandHandler for RestartCommand {
    fn description(&self) -> &str {
        "Restart a task with the same kind and params. Params: {\"task_id\": \"..\"}"
    }

    async fn invoke(&self, _command: &str, params: Params) -> Result<Payload, AgentError> {
        let task_id = required_str(&params, "task_id")?;
        let out = match self.0.tracker.restart(&task_id).await {
            Some(new_id) => json!({ "restarted": true, "task_id": new_id }),
            None => json!({ "restarted": false }),
        };
        Ok(payload(out))
    }
}

/// `{type?=all, filter?}`：tasks / commands / memory / all
pub struct ListCommand(Arc<CommandServices>);

impl ListCommand {
    async fn tasks(&self, filter: &Params) -> Result<Value, AgentError> {
        let state = optional_str(filter, "state")?;
        let kind = optional_str(filter, "kind")?;
        let tasks: Vec<Task> = self
            .0
            .tracker
            .list()
            .await
            .into_iter()
            .filter(|t| state.as_deref().map_or(true, |s| t.state.as_str() == s))
            .filter(|t| kind.as_deref().map_or(true, |k| t.kind == k))
            .collect();
        tasks_json(&tasks)
    }

    fn commands(&self) -> Value {
        let names = self
            .0
            .registry()
            .map(|r| r.command_names())
            .unwrap_or_default();
        json!(names)
    }

    async fn memory(&self) -> Result<Value, AgentError> {
        let context = &self.0.context;
        let entries = context.recent_memory(context.memory_capacity()).await;
        serde_json::to_value(entries).map_err(|e| AgentError::fault(e.to_string()))
    }
}

#[async_trait]
impl CommandHandler for ListCommand {
    fn description(&self) -> &str {
        "List tasks, commands or memory. Params: {\"type\": \"tasks|commands|memory|all\", \"filter\": {\"state\": .., \"kind\": ..}}"
    }

    async fn invoke(&self, _command: &str, params: Params) -> Result<Payload, AgentError> {
        let resource = optional_str(&params, "type")?.unwrap_or_else(|| "all".to_string());
        let filter = optional_object(&params, "filter")?;
        let items = match resource.as_str() {
            "tasks" => self.tasks(&filter).await?,
            "commands" => self.commands(),
            "memory" => self.memory().await?,
            "all" => json!({
                "tasks": self.tasks(&filter).await?,
                "commands": self.commands(),
                "memory": self.memory().await?,
            }),
            other => {
                return Err(AgentError::validation(format!("unknown resource type: {other}")))
            }
        };
        Ok(payload(json!({ "type": resource, "items": items })))
    }
}

/// `{action?=view, path?, value?}`
pub struct ConfigCommand(Arc<CommandServices>);

#[async_trait]
impl CommandHandler for ConfigCommand {
    fn description(&self) -> &str {
        "View or modify configuration. Params: {\"action\": \"view|set\", \"path\": \"a.b\", \"value\": ..}"
    }

    async fn invoke(&self, _command: &str, params: Params) -> Result<Payload, AgentError> {
        let action = optional_str(&params, "action")?.unwrap_or_else(|| "view".to_string());
        let path = optional_str(&params, "path")?.unwrap_or_default();
        match action.as_str() {
            "view" => {
                let config = self
                    .0
                    .config
                    .get(&path)
                    .ok_or_else(|| AgentError::validation(format!("unknown config path: {path}")))?;
                Ok(payload(json!({ "path": path, "config": config })))
            }
            "set" => {
                let value = params
                    .get("value")
                    .cloned()
                    .ok_or_else(|| AgentError::validation("missing required parameter: value"))?;
                if path.is_empty() {
                    return Err(AgentError::validation("missing required parameter: path"));
                }
                let updated = self.0.config.set(&path, value);
                tracing::info!(path = %path, updated, "Runtime config updated");
                Ok(payload(json!({ "path": path, "updated": updated })))
            }
            _ => Err(AgentError::validation("Invalid action")),
        }
    }
}
