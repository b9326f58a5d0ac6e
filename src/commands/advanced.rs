//! 进阶命令：trace、surge、debug

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use serde_json::json;

use crate::commands::params::{optional_str, optional_u64, payload};
use crate::commands::{CommandHandler, CommandRegistry, CommandServices, Params, Payload};
use crate::core::AgentError;

const DEFAULT_TRACE_DEPTH: u64 = 5;
const DEFAULT_SURGE_SECS: u64 = 60;

pub fn register(registry: &CommandRegistry, services: Arc<CommandServices>) {
    registry.register("trace", TraceCommand(Arc::clone(&services)));
    registry.register("surge", SurgeCommand(Arc::clone(&services)));
    registry.register("debug", DebugCommand(services));
}

/// 最近 depth 条记忆 + 当前上下文快照
pub struct TraceCommand(Arc<CommandServices>);

#[async_trait]
impl CommandHandler for TraceCommand {
    fn description(&self) -> &str {
        "Trace recent activity. Params: {\"trace_id\": \"..\", \"depth\": 5}"
    }

    async fn invoke(&self, _command: &str, params: Params) -> Result<Payload, AgentError> {
        let now = Utc::now();
        let trace_id = optional_str(&params, "trace_id")?
            .filter(|id| !id.is_empty())
            .unwrap_or_else(|| now.format("%Y%m%d_%H%M%S").to_string());
        let depth = optional_u64(&params, "depth", DEFAULT_TRACE_DEPTH)?;

        let context = &self.0.context;
        let recent = context.recent_memory(depth as usize).await;
        let snapshot = context.snapshot().await;
        Ok(payload(json!({
            "trace_data": {
                "trace_id": trace_id,
                "timestamp": now.to_rfc3339(),
                "depth": depth,
                "recent": recent,
                "context": snapshot,
            }
        })))
    }
}

/// 记录一次资源提升请求；实际资源调度由宿主根据记忆决定
pub struct SurgeCommand(Arc<CommandServices>);

#[async_trait]
impl CommandHandler for SurgeCommand {
    fn description(&self) -> &str {
        "Temporarily boost a resource. Params: {\"duration\": 60, \"resource\": \"cpu\"}"
    }

    async fn invoke(&self, _command: &str, params: Params) -> Result<Payload, AgentError> {
        let duration = optional_u64(&params, "duration", DEFAULT_SURGE_SECS)?;
        if duration == 0 {
            return Err(AgentError::validation("parameter 'duration' must be positive"));
        }
        let resource = optional_str(&params, "resource")?.unwrap_or_else(|| "cpu".to_string());

        let applied_at = Utc::now();
        let expires_at = i64::try_from(duration)
            .ok()
            .and_then(ChronoDuration::try_seconds)
            .and_then(|d| applied_at.checked_add_signed(d))
            .ok_or_else(|| AgentError::validation("parameter 'duration' is too large"))?;
        let surge = json!({
            "resource": resource,
            "duration": duration,
            "applied_at": applied_at.to_rfc3339(),
            "expires_at": expires_at.to_rfc3339(),
        });
        self.0.context.append_memory(json!({ "surge": surge })).await;
        tracing::info!(resource = %resource, duration, "Surge recorded");
        Ok(payload(json!({ "surge_applied": surge })))
    }
}

/// 系统状态、记忆占用、活跃任务
pub struct DebugCommand(Arc<CommandServices>);

#[async_trait]
impl CommandHandler for DebugCommand {
    fn description(&self) -> &str {
        "Collect debug information. Params: {\"component\": \"..\", \"level\": \"detailed\"}"
    }

    async fn invoke(&self, _command: &str, params: Params) -> Result<Payload, AgentError> {
        let component = optional_str(&params, "component")?;
        let level = optional_str(&params, "level")?.unwrap_or_else(|| "detailed".to_string());
        let services = &self.0;

        let report = services.status_report().await;
        let commands = services
            .registry()
            .map(|r| r.command_names())
            .unwrap_or_default();
        let processes: Vec<_> = services
            .tracker
            .list()
            .await
            .into_iter()
            .map(|t| json!({ "task_id": t.id, "kind": t.kind, "state": t.state }))
            .collect();

        Ok(payload(json!({
            "debug_info": {
                "timestamp": Utc::now().to_rfc3339(),
                "component": component,
                "level": level,
                "system_state": {
                    "phase": report.phase,
                    "scheduler": report.scheduler,
                    "registered_commands": commands,
                    "error_count": report.error_count,
                },
                "memory_usage": services.memory_usage().await,
                "active_processes": processes,
            }
        })))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::Agent;
    use crate::config::AppConfig;
    use serde_json::Value;

    fn agent() -> Agent {
        let mut config = AppConfig::default();
        config.persistence.enabled = false;
        Agent::builder(config).build()
    }

    fn params(v: Value) -> Params {
        payload(v)
    }

    #[tokio::test]
    async fn test_trace_defaults() {
        let agent = agent();
        for i in 0..8 {
            agent.context().append_memory(json!({ "n": i })).await;
        }
        let result = agent.execute("trace", Params::new()).await;
        let data = &result.payload["trace_data"];
        assert_eq!(data["depth"], 5);
        assert_eq!(data["trace_id"].as_str().unwrap().len(), "20240101_120000".len());
        let recent = data["recent"].as_array().unwrap();
        assert_eq!(recent.len(), 5);
        assert_eq!(recent[4]["data"]["n"], 7);
        assert!(data["context"].get("short_term_memory").is_some());
    }

    #[tokio::test]
    async fn test_trace_keeps_given_id() {
        let result = agent()
            .execute("trace", params(json!({"trace_id": "abc", "depth": 1})))
            .await;
        assert_eq!(result.payload["trace_data"]["trace_id"], "abc");
    }

    #[tokio::test]
    async fn test_surge_records_into_memory() {
        let agent = agent();
        let result = agent
            .execute("surge", params(json!({"duration": 30, "resource": "gpu"})))
            .await;
        assert!(result.is_success());
        assert_eq!(result.payload["surge_applied"]["resource"], "gpu");
        assert_eq!(result.payload["surge_applied"]["duration"], 30);
        let memory = agent.context().recent_memory(1).await;
        assert_eq!(memory[0].data["surge"]["resource"], "gpu");
    }

    #[tokio::test]
    async fn test_surge_rejects_non_positive_duration() {
        let agent = agent();
        let zero = agent.execute("surge", params(json!({"duration": 0}))).await;
        assert!(zero.is_error());
        let negative = agent.execute("surge", params(json!({"duration": -5}))).await;
        assert!(negative.is_error());
        assert_eq!(agent.context().memory_len().await, 0);
    }

    #[tokio::test]
    async fn test_debug_lists_processes() {
        let agent = agent();
        agent
            .execute("start", params(json!({"type": "scan"})))
            .await;
        let result = agent
            .execute("debug", params(json!({"component": "scheduler"})))
            .await;
        let info = &result.payload["debug_info"];
        assert_eq!(info["level"], "detailed");
        assert_eq!(info["component"], "scheduler");
        assert_eq!(info["active_processes"].as_array().unwrap().len(), 1);
        assert_eq!(info["system_state"]["error_count"], 0);
    }
}
