//! 状态定义：Agent 阶段、调度器状态与 status() 报告
//!
//! AgentPhase 属于上下文（会被持久化）；SchedulerState 只描述主循环本身。

use serde::{Deserialize, Serialize};

/// Agent 自身的生命周期阶段
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentPhase {
    #[default]
    Initializing,
    Ready,
    /// 最近一个周期出现可恢复错误
    Degraded,
    Stopped,
}

/// 调度器状态机：Idle → Running → Stopped；Stopped 之后可以再次 run
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SchedulerState {
    #[default]
    Idle,
    Running,
    Stopped,
}

/// status() 的返回值：阶段、周期数、上一周期耗时、错误计数
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusReport {
    pub phase: AgentPhase,
    pub scheduler: SchedulerState,
    pub cycle_count: u64,
    pub last_cycle_duration_ms: u64,
    pub error_count: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_report_uses_camel_case() {
        let report = StatusReport {
            phase: AgentPhase::Ready,
            scheduler: SchedulerState::Running,
            cycle_count: 3,
            last_cycle_duration_ms: 12,
            error_count: 1,
        };
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["phase"], "ready");
        assert_eq!(json["cycleCount"], 3);
        assert_eq!(json["lastCycleDurationMs"], 12);
        assert_eq!(json["errorCount"], 1);
    }
}
