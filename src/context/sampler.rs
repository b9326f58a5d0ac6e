//! 环境采样：由宿主提供，每个 Observe 步调用一次

use std::time::Instant;

use async_trait::async_trait;
use serde_json::json;

use crate::context::JsonMap;
use crate::core::AgentError;

#[async_trait]
pub trait EnvironmentSampler: Send + Sync {
    async fn sample(&self) -> Result<JsonMap, AgentError>;
}

/// 默认采样器：进程号、运行时长、采样时间
#[derive(Debug)]
pub struct ProcessSampler {
    started: Instant,
}

impl ProcessSampler {
    pub fn new() -> Self {
        Self {
            started: Instant::now(),
        }
    }
}

impl Default for ProcessSampler {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EnvironmentSampler for ProcessSampler {
    async fn sample(&self) -> Result<JsonMap, AgentError> {
        let mut env = JsonMap::new();
        env.insert("pid".into(), json!(std::process::id()));
        env.insert("uptime_secs".into(), json!(self.started.elapsed().as_secs()));
        env.insert("sampled_at".into(), json!(chrono::Utc::now().to_rfc3339()));
        Ok(env)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_process_sampler_fields() {
        let env = ProcessSampler::new().sample().await.unwrap();
        assert_eq!(env["pid"], json!(std::process::id()));
        assert!(env.contains_key("uptime_secs"));
        assert!(env.contains_key("sampled_at"));
    }
}
