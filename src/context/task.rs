//! 长时任务记录（由命令发起，独立于周期节奏）

use serde::{Deserialize, Serialize};

use crate::context::JsonMap;

/// 任务 ID（进程生命周期内唯一）
pub type TaskId = String;

/// 任务状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    Starting,
    Running,
    Stopping,
    Stopped,
    Failed,
}

impl TaskState {
    /// Starting / Running 可以被 stop
    pub fn is_stoppable(&self) -> bool {
        matches!(self, TaskState::Starting | TaskState::Running)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TaskState::Starting => "starting",
            TaskState::Running => "running",
            TaskState::Stopping => "stopping",
            TaskState::Stopped => "stopped",
            TaskState::Failed => "failed",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub kind: String,
    #[serde(default)]
    pub params: JsonMap,
    pub state: TaskState,
    /// 创建时间（毫秒时间戳）
    #[serde(default)]
    pub created_at: i64,
    /// 最近一次状态变更时间（毫秒时间戳）
    #[serde(default)]
    pub updated_at: i64,
}

impl Task {
    pub fn new(kind: impl Into<String>, params: JsonMap) -> Self {
        let now = chrono::Utc::now().timestamp_millis();
        Self {
            id: format!("task_{}", uuid::Uuid::new_v4()),
            kind: kind.into(),
            params,
            state: TaskState::Starting,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn set_state(&mut self, state: TaskState) {
        self.state = state;
        self.updated_at = chrono::Utc::now().timestamp_millis();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_task_starts_in_starting() {
        let task = Task::new("scan", JsonMap::new());
        assert_eq!(task.state, TaskState::Starting);
        assert!(task.id.starts_with("task_"));
    }

    #[test]
    fn test_ids_are_unique() {
        let a = Task::new("scan", JsonMap::new());
        let b = Task::new("scan", JsonMap::new());
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn test_state_serializes_snake_case() {
        let json = serde_json::to_value(TaskState::Stopping).unwrap();
        assert_eq!(json, "stopping");
    }
}
